//! Backend connection seam.
//!
//! The load session talks to databases only through [`Connection`]. SQLite is
//! built in; other backends are reached through a caller-supplied
//! [`Connector`] that wraps their driver.

use std::path::Path;

use anyhow::{Context, Result, bail};
use itertools::Itertools;
use log::debug;
use rusqlite::types::ValueRef;

use crate::{credentials::Credentials, dialect::Dialect};

pub trait Connection {
    /// Runs one statement, returning the affected row count when known.
    fn execute(&mut self, sql: &str, params: &[String]) -> Result<u64>;

    /// Runs `sql` once per parameter row.
    fn execute_many(&mut self, sql: &str, rows: &[Vec<String>]) -> Result<u64> {
        let mut affected = 0;
        for row in rows {
            affected += self.execute(sql, row)?;
        }
        Ok(affected)
    }

    /// Multi-row insert through a single `VALUES %s` placeholder. The default
    /// expands the placeholder into one `(%s,...)` group per row.
    fn execute_values(&mut self, sql: &str, rows: &[Vec<String>]) -> Result<u64> {
        let Some(first) = rows.first() else {
            return Ok(0);
        };
        let Some(at) = sql.rfind("%s") else {
            bail!("statement has no VALUES %s placeholder: {sql}");
        };
        let group = format!("({})", std::iter::repeat_n("%s", first.len()).join(","));
        let groups = std::iter::repeat_n(group.as_str(), rows.len()).join(",");
        let expanded = format!("{}{groups}{}", &sql[..at], &sql[at + 2..]);
        let params: Vec<String> = rows.iter().flatten().cloned().collect();
        self.execute(&expanded, &params)
    }

    /// Runs a query and fetches every row rendered as text; NULL becomes "".
    fn query(&mut self, sql: &str, params: &[String]) -> Result<Vec<Vec<String>>>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    fn close(self: Box<Self>) -> Result<()>;
}

pub trait Connector {
    fn connect(&self, dialect: Dialect, credentials: &Credentials) -> Result<Box<dyn Connection>>;
}

/// Connects SQLite destinations with the bundled driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnector;

impl Connector for DefaultConnector {
    fn connect(&self, dialect: Dialect, credentials: &Credentials) -> Result<Box<dyn Connection>> {
        match dialect {
            Dialect::Sqlite => {
                let path = credentials.connection_string(dialect)?;
                Ok(Box::new(SqliteConnection::open(Path::new(&path))?))
            }
            other => bail!(
                "no built-in driver for {other}; supply a Connector for this backend"
            ),
        }
    }
}

/// SQLite connection holding one open transaction until commit or rollback.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    in_transaction: bool,
}

impl SqliteConnection {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Opening SQLite database {path:?}"))?;
        Self::begin(conn)
    }

    fn begin(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch("BEGIN").context("Starting transaction")?;
        Ok(Self {
            conn,
            in_transaction: true,
        })
    }
}

fn value_to_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[String]) -> Result<u64> {
        debug!("sqlite execute: {sql}");
        let affected = self
            .conn
            .execute(sql, rusqlite::params_from_iter(params.iter()))
            .with_context(|| format!("Executing {sql}"))?;
        Ok(affected as u64)
    }

    fn execute_many(&mut self, sql: &str, rows: &[Vec<String>]) -> Result<u64> {
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .with_context(|| format!("Preparing {sql}"))?;
        let mut affected = 0u64;
        for (index, row) in rows.iter().enumerate() {
            affected += stmt
                .execute(rusqlite::params_from_iter(row.iter()))
                .with_context(|| format!("Inserting row {} of batch", index + 1))?
                as u64;
        }
        Ok(affected)
    }

    fn query(&mut self, sql: &str, params: &[String]) -> Result<Vec<Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("Preparing {sql}"))?;
        let width = stmt.column_count();
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(value_to_text(row.get_ref(index)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn.execute_batch("COMMIT").context("Committing")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn.execute_batch("ROLLBACK").context("Rolling back")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, err)| err)
            .context("Closing SQLite connection")
    }
}
