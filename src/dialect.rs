//! Per-backend SQL policy.
//!
//! Each [`Dialect`] decides the text column type for an inferred byte width,
//! the INSERT placeholder syntax, whether TRUNCATE exists, and how to ask the
//! catalog for an existing table's columns.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use clap::ValueEnum;
use itertools::Itertools;

use crate::analyzer::ColumnStat;

const ORACLE_SHORT: u64 = 1000;
const ORACLE_LONG: u64 = 4000;
const MYSQL_TEXT: u64 = 65_535;
const MYSQL_MEDIUMTEXT: u64 = 16_777_215;
const MYSQL_LONGTEXT: u64 = 4_294_967_295;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Dialect {
    #[value(name = "oracle")]
    Oracle,
    #[value(name = "postgresql", alias = "postgres")]
    Postgres,
    #[value(name = "mysql")]
    MySql,
    #[value(name = "sqlserver")]
    SqlServer,
    #[value(name = "sqlite")]
    Sqlite,
}

/// Catalog lookup returning `(column name, type descriptor)` rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    pub sql: String,
    pub params: Vec<String>,
}

impl Dialect {
    pub const ALL: [Dialect; 5] = [
        Dialect::Oracle,
        Dialect::Postgres,
        Dialect::MySql,
        Dialect::SqlServer,
        Dialect::Sqlite,
    ];

    /// Key used in credential files and on the command line.
    pub fn key(&self) -> &'static str {
        match self {
            Dialect::Oracle => "oracle",
            Dialect::Postgres => "postgresql",
            Dialect::MySql => "mysql",
            Dialect::SqlServer => "sqlserver",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Column type able to hold `max_bytes` bytes of text. MySQL has no type
    /// past LONGTEXT and returns `None`.
    pub fn width_to_type(&self, max_bytes: u64) -> Option<&'static str> {
        match self {
            Dialect::Oracle => Some(match max_bytes {
                0..=ORACLE_SHORT => "VARCHAR2(1000)",
                ..=ORACLE_LONG => "VARCHAR2(4000)",
                _ => "CLOB",
            }),
            Dialect::SqlServer => Some(match max_bytes {
                0..=ORACLE_SHORT => "VARCHAR(1000)",
                ..=ORACLE_LONG => "VARCHAR(4000)",
                _ => "VARCHAR(MAX)",
            }),
            Dialect::MySql => match max_bytes {
                0..=MYSQL_TEXT => Some("TEXT"),
                ..=MYSQL_MEDIUMTEXT => Some("MEDIUMTEXT"),
                ..=MYSQL_LONGTEXT => Some("LONGTEXT"),
                _ => None,
            },
            Dialect::Postgres | Dialect::Sqlite => Some("TEXT"),
        }
    }

    pub fn supports_truncate(&self) -> bool {
        !matches!(self, Dialect::Sqlite)
    }

    /// Whether inserts go through a single multi-row `VALUES %s` call.
    pub fn supports_bulk_values(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Positional placeholder for the 1-based parameter `index`.
    pub fn param(&self, index: usize) -> String {
        match self {
            Dialect::Oracle => format!(":{index}"),
            Dialect::Postgres | Dialect::MySql => "%s".to_string(),
            Dialect::SqlServer | Dialect::Sqlite => "?".to_string(),
        }
    }

    pub fn insert_template(&self, table: &str, columns: &[String]) -> String {
        let names = columns.join(",");
        if self.supports_bulk_values() {
            return format!("INSERT INTO {table}({names}) VALUES %s");
        }
        let placeholders = (1..=columns.len()).map(|i| self.param(i)).join(",");
        format!("INSERT INTO {table}({names}) VALUES ({placeholders})")
    }

    pub fn ddl_statement(&self, table: &str, stats: &[ColumnStat]) -> String {
        let columns = stats
            .iter()
            .map(|stat| format!("{} {}", stat.sanitized_name, stat.sql_type))
            .join(",");
        format!("CREATE TABLE {table}({columns})")
    }

    pub fn drop_statement(&self, table: &str) -> String {
        format!("DROP TABLE {table}")
    }

    pub fn truncate_statement(&self, table: &str) -> Option<String> {
        self.supports_truncate()
            .then(|| format!("TRUNCATE TABLE {table}"))
    }

    /// Catalog query listing the columns of `table` with a type descriptor in
    /// the same spelling [`Dialect::width_to_type`] produces.
    pub fn conflict_query(&self, table: &str) -> CatalogQuery {
        let (sql, params) = match self {
            Dialect::Postgres => (
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_name = lower(%s) AND table_schema = current_schema() \
                 ORDER BY ordinal_position"
                    .to_string(),
                vec![table.to_string()],
            ),
            Dialect::Oracle => (
                "SELECT column_name, CASE WHEN data_type = 'VARCHAR2' \
                 THEN data_type || '(' || char_length || ')' ELSE data_type END \
                 FROM sys.all_tab_columns WHERE table_name = upper(:1) ORDER BY column_id"
                    .to_string(),
                vec![table.to_string()],
            ),
            Dialect::SqlServer => (
                "SELECT column_name, CASE WHEN character_maximum_length = -1 \
                 THEN data_type + '(MAX)' \
                 WHEN character_maximum_length IS NOT NULL \
                 THEN data_type + '(' + CAST(character_maximum_length AS VARCHAR(10)) + ')' \
                 ELSE data_type END \
                 FROM information_schema.columns WHERE upper(table_name) = upper(?) \
                 ORDER BY ordinal_position"
                    .to_string(),
                vec![table.to_string()],
            ),
            Dialect::MySql => (format!("SHOW COLUMNS FROM {table}"), Vec::new()),
            Dialect::Sqlite => (
                "SELECT name, type FROM pragma_table_info(?) ORDER BY cid".to_string(),
                vec![table.to_string()],
            ),
        };
        CatalogQuery { sql, params }
    }

    /// Connection parameters a credentials entry must carry.
    pub fn required_credential_keys(&self) -> &'static [&'static str] {
        match self {
            Dialect::Oracle => &["host", "user", "password", "service"],
            Dialect::Sqlite => &["host"],
            Dialect::Postgres | Dialect::MySql | Dialect::SqlServer => {
                &["host", "user", "password", "dbname"]
            }
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Dialect {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Dialect::ALL
            .into_iter()
            .find(|dialect| dialect.key() == normalized)
            .or_else(|| (normalized == "postgres").then_some(Dialect::Postgres))
            .ok_or_else(|| {
                anyhow!(
                    "Unknown dialect '{value}'. Supported: {}",
                    Dialect::ALL.iter().map(Dialect::key).join(", ")
                )
            })
    }
}
