//! Existing-table reconciliation.
//!
//! Runs only after CREATE TABLE failed. The caller's [`TableExistsPolicy`]
//! picks the single recovery strategy; nothing is retried beyond what the
//! policy names.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use clap::ValueEnum;
use itertools::Itertools;
use log::{debug, info, warn};

use crate::{analyzer::ColumnStats, connection::Connection, dialect::Dialect};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum TableExistsPolicy {
    #[default]
    Error,
    Drop,
    Append,
    Truncate,
}

impl TableExistsPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableExistsPolicy::Error => "error",
            TableExistsPolicy::Drop => "drop",
            TableExistsPolicy::Append => "append",
            TableExistsPolicy::Truncate => "truncate",
        }
    }
}

impl fmt::Display for TableExistsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableExistsPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(TableExistsPolicy::Error),
            "drop" => Ok(TableExistsPolicy::Drop),
            "append" => Ok(TableExistsPolicy::Append),
            "truncate" => Ok(TableExistsPolicy::Truncate),
            _ => Err(anyhow!(
                "Unknown table-exists policy '{value}'. Expected error, drop, append or truncate"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Proceed,
    Conflict(String),
    Unsupported(String),
}

/// One side of the name join that failed to match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnConflict {
    pub name: String,
    pub existing_type: Option<String>,
    pub expected_type: Option<String>,
}

impl fmt::Display for ColumnConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.existing_type, &self.expected_type) {
            (Some(existing), Some(expected)) => write!(
                f,
                "{} is {existing} in the table but {expected} in the column stats",
                self.name
            ),
            (None, Some(_)) => write!(f, "{} is missing from the table", self.name),
            (Some(_), None) => write!(f, "{} is not in the column stats", self.name),
            (None, None) => write!(f, "{}", self.name),
        }
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// `(name, type)` pairs the catalog reports for `table`, empty when the table
/// does not exist.
pub fn existing_columns(
    conn: &mut dyn Connection,
    dialect: Dialect,
    table: &str,
) -> Result<Vec<(String, String)>> {
    let query = dialect.conflict_query(table);
    debug!("Catalog query: {}", query.sql);
    let rows = conn.query(&query.sql, &query.params)?;
    rows.into_iter()
        .map(|row| {
            let mut cells = row.into_iter();
            match (cells.next(), cells.next()) {
                (Some(name), Some(kind)) => Ok((name, kind)),
                _ => Err(anyhow!("catalog query returned fewer than two columns")),
            }
        })
        .collect()
}

/// Outer join of the catalog columns against the stats on name, comparing
/// names and types case-insensitively.
pub fn detect_conflicts(existing: &[(String, String)], stats: &ColumnStats) -> Vec<ColumnConflict> {
    let mut conflicts = Vec::new();
    for stat in stats {
        let key = normalize(&stat.sanitized_name);
        match existing.iter().find(|(name, _)| normalize(name) == key) {
            None => conflicts.push(ColumnConflict {
                name: stat.sanitized_name.clone(),
                existing_type: None,
                expected_type: Some(stat.sql_type.clone()),
            }),
            Some((_, kind)) if normalize(kind) != normalize(&stat.sql_type) => {
                conflicts.push(ColumnConflict {
                    name: stat.sanitized_name.clone(),
                    existing_type: Some(kind.clone()),
                    expected_type: Some(stat.sql_type.clone()),
                })
            }
            Some(_) => {}
        }
    }
    for (name, kind) in existing {
        let key = normalize(name);
        if !stats.iter().any(|stat| normalize(&stat.sanitized_name) == key) {
            conflicts.push(ColumnConflict {
                name: name.clone(),
                existing_type: Some(kind.clone()),
                expected_type: None,
            });
        }
    }
    conflicts
}

fn check_shape(
    conn: &mut dyn Connection,
    dialect: Dialect,
    table: &str,
    stats: &ColumnStats,
) -> Option<String> {
    let existing = match existing_columns(conn, dialect, table) {
        Ok(existing) => existing,
        Err(err) => return Some(format!("could not read the columns of {table}: {err:#}")),
    };
    let conflicts = detect_conflicts(&existing, stats);
    if conflicts.is_empty() {
        None
    } else {
        Some(format!(
            "table {table} does not match the column stats: {}",
            conflicts.iter().join("; ")
        ))
    }
}

/// Applies `policy` to an existing `table` whose CREATE failed with
/// `create_error`.
pub fn reconcile(
    conn: &mut dyn Connection,
    dialect: Dialect,
    policy: TableExistsPolicy,
    table: &str,
    stats: &ColumnStats,
    create_error: &anyhow::Error,
) -> Outcome {
    info!("Table {table} already exists; applying '{policy}' policy");
    match policy {
        TableExistsPolicy::Error => Outcome::Conflict(format!(
            "table {table} already exists and the table-exists policy is error: {create_error:#}"
        )),
        TableExistsPolicy::Drop => {
            if let Err(err) = conn.execute(&dialect.drop_statement(table), &[]) {
                return Outcome::Conflict(format!("dropping {table}: {err:#}"));
            }
            match conn.execute(&dialect.ddl_statement(table, &stats.columns), &[]) {
                Ok(_) => Outcome::Proceed,
                Err(err) => Outcome::Conflict(format!("re-creating {table}: {err:#}")),
            }
        }
        TableExistsPolicy::Append => match check_shape(conn, dialect, table, stats) {
            Some(message) => Outcome::Conflict(message),
            None => Outcome::Proceed,
        },
        TableExistsPolicy::Truncate => {
            let Some(statement) = dialect.truncate_statement(table) else {
                warn!("{dialect} has no TRUNCATE TABLE");
                return Outcome::Unsupported(format!("truncate is not supported by {dialect}"));
            };
            if let Some(message) = check_shape(conn, dialect, table, stats) {
                return Outcome::Conflict(message);
            }
            match conn.execute(&statement, &[]) {
                Ok(_) => Outcome::Proceed,
                Err(err) => Outcome::Conflict(format!("truncating {table}: {err:#}")),
            }
        }
    }
}
