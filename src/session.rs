//! Analyze-then-load orchestration.
//!
//! A [`LoadSession`] pairs one [`ChunkedSource`] with one [`Destination`].
//! Loading holds a single backend connection for the whole session: it is
//! committed and closed on success, rolled back and closed on any failure, so
//! a failed load never leaves a partial commit behind.

use std::time::Instant;

use log::{debug, info, warn};

use crate::{
    analyzer::{self, AnalyzeResult, ColumnStats},
    connection::{Connection, Connector, DefaultConnector},
    credentials::Credentials,
    dialect::Dialect,
    error::{LoaderError, Status},
    reconcile::{self, Outcome, TableExistsPolicy},
    sanitize::sanitize_table_name,
    source::ChunkedSource,
};

#[derive(Debug, Clone)]
pub struct Destination {
    pub table_name: String,
    pub dialect: Dialect,
    pub policy: TableExistsPolicy,
    pub credentials: Credentials,
}

impl Destination {
    pub fn new(table_name: impl Into<String>, dialect: Dialect, credentials: Credentials) -> Self {
        Self {
            table_name: table_name.into(),
            dialect,
            policy: TableExistsPolicy::default(),
            credentials,
        }
    }

    pub fn with_policy(mut self, policy: TableExistsPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Table name as it is created in the database.
    pub fn sanitized_table_name(&self) -> String {
        sanitize_table_name(&self.table_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    pub status: Status,
    pub message: String,
    /// Rows handed to the backend; `None` unless the load succeeded.
    pub records_inserted: Option<u64>,
    pub table_name: String,
}

impl LoadResult {
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

pub struct LoadSession {
    source: ChunkedSource,
    destination: Destination,
    connector: Box<dyn Connector>,
}

impl LoadSession {
    pub fn new(source: ChunkedSource, destination: Destination) -> Self {
        Self {
            source,
            destination,
            connector: Box::new(DefaultConnector),
        }
    }

    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Box::new(connector);
        self
    }

    pub fn source(&self) -> &ChunkedSource {
        &self.source
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// One full pass over the source measuring column widths.
    pub fn analyze(&self) -> AnalyzeResult {
        info!(
            "Analyzing {} for {}",
            self.source.describe(),
            self.destination.dialect
        );
        match self.source.stream() {
            Ok(stream) => analyzer::analyze(stream, self.destination.dialect),
            Err(err) => AnalyzeResult::from(err),
        }
    }

    /// Loads the source into the destination table. Without `column_stats`
    /// the source is analyzed first, then read again for the insert pass.
    pub fn load(&self, column_stats: Option<&ColumnStats>) -> LoadResult {
        let table_name = self.destination.sanitized_table_name();
        match self.try_load(&table_name, column_stats) {
            Ok(records) => LoadResult {
                status: Status::Ok,
                message: String::new(),
                records_inserted: Some(records),
                table_name,
            },
            Err(err) => {
                warn!("Load into {table_name} failed: {err}");
                LoadResult {
                    status: Status::Error(err.kind()),
                    message: err.message().to_string(),
                    records_inserted: None,
                    table_name,
                }
            }
        }
    }

    fn try_load(&self, table: &str, column_stats: Option<&ColumnStats>) -> Result<u64, LoaderError> {
        let dialect = self.destination.dialect;
        if table.is_empty() {
            return Err(LoaderError::Configuration(format!(
                "table name '{}' is empty once sanitized",
                self.destination.table_name
            )));
        }
        self.destination.credentials.validate(dialect)?;

        let mut conn = self
            .connector
            .connect(dialect, &self.destination.credentials)
            .map_err(|err| {
                LoaderError::with_cause(
                    LoaderError::Connection,
                    format!("connecting to {dialect}"),
                    &err,
                )
            })?;
        debug!("Connected to {dialect}");

        let outcome = self.load_with(conn.as_mut(), table, column_stats);
        release(conn, outcome)
    }

    fn load_with(
        &self,
        conn: &mut dyn Connection,
        table: &str,
        column_stats: Option<&ColumnStats>,
    ) -> Result<u64, LoaderError> {
        let dialect = self.destination.dialect;
        let analyzed;
        let stats = match column_stats {
            Some(stats) => stats,
            None => {
                let (records, stats) = self.analyze().into_result()?;
                info!("Analysis found {records} record(s) in {} column(s)", stats.len());
                analyzed = stats;
                &analyzed
            }
        };
        stats.validate()?;

        let stream = self.source.stream()?;
        if stream.columns().len() != stats.len() {
            return Err(LoaderError::SchemaMismatch(format!(
                "column stats describe {} column(s) but {} has {}",
                stats.len(),
                self.source.describe(),
                stream.columns().len()
            )));
        }

        let ddl = dialect.ddl_statement(table, &stats.columns);
        let insert = dialect.insert_template(table, &stats.sanitized_names());
        debug!("DDL: {ddl}");
        debug!("DML: {insert}");

        if let Err(create_error) = conn.execute(&ddl, &[]) {
            self.resolve_existing(conn, table, stats, &create_error)?;
        }

        let start = Instant::now();
        let mut inserted = 0u64;
        for (index, batch) in stream.enumerate() {
            let rows = batch?.into_rows();
            if rows.is_empty() {
                continue;
            }
            let written = if dialect.supports_bulk_values() {
                conn.execute_values(&insert, &rows)
            } else {
                conn.execute_many(&insert, &rows)
            };
            written.map_err(|err| {
                LoaderError::with_cause(
                    LoaderError::Load,
                    format!("inserting chunk {} into {table}", index + 1),
                    &err,
                )
            })?;
            inserted += rows.len() as u64;
            info!(
                "Loaded chunk {}: {inserted} record(s) so far ({:.2}s elapsed)",
                index + 1,
                start.elapsed().as_secs_f64()
            );
        }
        info!(
            "Loaded {inserted} record(s) into {table} in {:.2}s",
            start.elapsed().as_secs_f64()
        );
        Ok(inserted)
    }

    /// CREATE failed: a missing table means the DDL itself is broken,
    /// otherwise the table-exists policy decides.
    fn resolve_existing(
        &self,
        conn: &mut dyn Connection,
        table: &str,
        stats: &ColumnStats,
        create_error: &anyhow::Error,
    ) -> Result<(), LoaderError> {
        let dialect = self.destination.dialect;
        let existing = reconcile::existing_columns(conn, dialect, table).map_err(|err| {
            LoaderError::Ddl(format!(
                "creating {table}: {create_error:#}; checking for an existing table: {err:#}"
            ))
        })?;
        if existing.is_empty() {
            return Err(LoaderError::with_cause(
                LoaderError::Ddl,
                format!("creating {table}"),
                create_error,
            ));
        }
        match reconcile::reconcile(
            conn,
            dialect,
            self.destination.policy,
            table,
            stats,
            create_error,
        ) {
            Outcome::Proceed => Ok(()),
            Outcome::Conflict(message) => Err(LoaderError::Conflict(message)),
            Outcome::Unsupported(message) => Err(LoaderError::Unsupported(message)),
        }
    }
}

/// Commit-then-close on success, rollback-then-close on failure.
fn release(mut conn: Box<dyn Connection>, outcome: Result<u64, LoaderError>) -> Result<u64, LoaderError> {
    match outcome {
        Ok(records) => {
            if let Err(err) = conn.commit() {
                let failure = LoaderError::with_cause(LoaderError::Load, "committing", &err);
                if let Err(rollback) = conn.rollback() {
                    warn!("Rollback after failed commit also failed: {rollback:#}");
                }
                close_quietly(conn);
                return Err(failure);
            }
            close_quietly(conn);
            Ok(records)
        }
        Err(err) => {
            if let Err(rollback) = conn.rollback() {
                warn!("Rollback failed: {rollback:#}");
            }
            close_quietly(conn);
            Err(err)
        }
    }
}

fn close_quietly(conn: Box<dyn Connection>) {
    if let Err(err) = conn.close() {
        warn!("Closing connection failed: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ErrorKind,
        source::{MemoryTable, SourceConfig},
        value::SourceValue,
    };
    use anyhow::{Result, bail};
    use std::{
        cell::RefCell,
        rc::Rc,
        sync::Arc,
    };

    #[derive(Default)]
    struct Log {
        statements: Vec<String>,
        params: Vec<Vec<String>>,
        commits: usize,
        rollbacks: usize,
        closes: usize,
    }

    /// Postgres-flavoured fake: the catalog holds `existing` and inserts
    /// can be made to fail.
    struct FakeConnection {
        log: Rc<RefCell<Log>>,
        existing: Vec<(String, String)>,
        fail_inserts: bool,
    }

    impl Connection for FakeConnection {
        fn execute(&mut self, sql: &str, params: &[String]) -> Result<u64> {
            if sql.starts_with("CREATE") && !self.existing.is_empty() {
                bail!("relation already exists");
            }
            if sql.starts_with("INSERT") && self.fail_inserts {
                bail!("value too long");
            }
            let mut log = self.log.borrow_mut();
            log.statements.push(sql.to_string());
            log.params.push(params.to_vec());
            Ok(0)
        }

        fn query(&mut self, _sql: &str, _params: &[String]) -> Result<Vec<Vec<String>>> {
            Ok(self
                .existing
                .iter()
                .map(|(n, t)| vec![n.clone(), t.clone()])
                .collect())
        }

        fn commit(&mut self) -> Result<()> {
            self.log.borrow_mut().commits += 1;
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            self.log.borrow_mut().rollbacks += 1;
            Ok(())
        }

        fn close(self: Box<Self>) -> Result<()> {
            self.log.borrow_mut().closes += 1;
            Ok(())
        }
    }

    struct FakeConnector {
        log: Rc<RefCell<Log>>,
        existing: Vec<(String, String)>,
        fail_inserts: bool,
    }

    impl Connector for FakeConnector {
        fn connect(&self, _dialect: Dialect, _credentials: &Credentials) -> Result<Box<dyn Connection>> {
            Ok(Box::new(FakeConnection {
                log: self.log.clone(),
                existing: self.existing.clone(),
                fail_inserts: self.fail_inserts,
            }))
        }
    }

    fn postgres_credentials() -> Credentials {
        [("host", "h"), ("user", "u"), ("password", "p"), ("dbname", "d")]
            .into_iter()
            .collect()
    }

    fn memory_source(chunk_size: usize) -> ChunkedSource {
        let table = MemoryTable::new(
            vec!["Name".into(), "Score #".into()],
            vec![
                vec!["héllo".into(), SourceValue::Float(3.0)],
                vec!["".into(), SourceValue::Null],
                vec!["1234567890".into(), SourceValue::Boolean(true)],
            ],
        );
        ChunkedSource::with_options(
            SourceConfig::Memory(Arc::new(table)),
            crate::source::SourceOptions {
                chunk_size,
                converter: None,
            },
        )
        .unwrap()
    }

    fn session(existing: &[(&str, &str)], fail_inserts: bool) -> (LoadSession, Rc<RefCell<Log>>) {
        let log = Rc::new(RefCell::new(Log::default()));
        let connector = FakeConnector {
            log: log.clone(),
            existing: existing
                .iter()
                .map(|(n, t)| (n.to_string(), t.to_string()))
                .collect(),
            fail_inserts,
        };
        let destination = Destination::new("daily scores", Dialect::Postgres, postgres_credentials())
            .with_policy(TableExistsPolicy::Append);
        (
            LoadSession::new(memory_source(10), destination).with_connector(connector),
            log,
        )
    }

    #[test]
    fn load_analyzes_creates_and_bulk_inserts() {
        let (session, log) = session(&[], false);
        let result = session.load(None);
        assert!(result.is_ok(), "{}", result.message);
        assert_eq!(result.records_inserted, Some(3));
        assert_eq!(result.table_name, "DAILY_SCORES");

        let log = log.borrow();
        assert_eq!(
            log.statements,
            vec![
                "CREATE TABLE DAILY_SCORES(NAME TEXT,SCORE_NO TEXT)",
                "INSERT INTO DAILY_SCORES(NAME,SCORE_NO) VALUES (%s,%s),(%s,%s),(%s,%s)",
            ]
        );
        assert_eq!(log.params[1], vec!["héllo", "3", "", "", "1234567890", "TRUE"]);
        assert_eq!((log.commits, log.rollbacks, log.closes), (1, 0, 1));
    }

    #[test]
    fn append_conflict_rolls_back_without_inserting() {
        let (session, log) = session(&[("NAME", "text")], false);
        let result = session.load(None);
        assert_eq!(result.status, Status::Error(ErrorKind::Conflict));
        assert!(result.message.contains("SCORE_NO is missing"));
        assert_eq!(result.records_inserted, None);

        let log = log.borrow();
        assert!(log.statements.iter().all(|sql| !sql.starts_with("INSERT")));
        assert_eq!((log.commits, log.rollbacks, log.closes), (0, 1, 1));
    }

    #[test]
    fn append_into_matching_table_inserts() {
        let (session, log) = session(&[("name", "text"), ("score_no", "text")], false);
        let result = session.load(None);
        assert!(result.is_ok(), "{}", result.message);
        assert_eq!(result.records_inserted, Some(3));
        assert_eq!(log.borrow().statements.len(), 1);
    }

    #[test]
    fn insert_failure_is_a_load_error_and_nothing_commits() {
        let (session, log) = session(&[], true);
        let result = session.load(None);
        assert_eq!(result.status, Status::Error(ErrorKind::Load));
        assert!(result.message.contains("value too long"));
        assert_eq!(log.borrow().commits, 0);
        assert_eq!(log.borrow().rollbacks, 1);
    }

    #[test]
    fn missing_credentials_fail_before_connecting() {
        let log = Rc::new(RefCell::new(Log::default()));
        let connector = FakeConnector {
            log: log.clone(),
            existing: Vec::new(),
            fail_inserts: false,
        };
        let destination = Destination::new("t", Dialect::Oracle, postgres_credentials());
        let result = LoadSession::new(memory_source(10), destination)
            .with_connector(connector)
            .load(None);
        assert_eq!(result.status, Status::Error(ErrorKind::Configuration));
        assert!(result.message.contains("service"));
        assert_eq!(log.borrow().closes, 0);
    }

    #[test]
    fn incomplete_stats_are_a_schema_mismatch() {
        let (session, _log) = session(&[], false);
        let mut stats = session.analyze().column_stats;
        stats.columns[1].sql_type.clear();
        let result = session.load(Some(&stats));
        assert_eq!(result.status, Status::Error(ErrorKind::SchemaMismatch));

        let narrow = ColumnStats::new(vec![stats.columns[0].clone()]);
        let result = session.load(Some(&narrow));
        assert_eq!(result.status, Status::Error(ErrorKind::SchemaMismatch));
    }

    #[test]
    fn non_postgres_backends_insert_row_by_row() {
        let log = Rc::new(RefCell::new(Log::default()));
        let connector = FakeConnector {
            log: log.clone(),
            existing: Vec::new(),
            fail_inserts: false,
        };
        let credentials = [("host", "h"), ("user", "u"), ("password", "p"), ("dbname", "d")]
            .into_iter()
            .collect();
        let destination = Destination::new("t", Dialect::MySql, credentials);
        let result = LoadSession::new(memory_source(2), destination)
            .with_connector(connector)
            .load(None);
        assert!(result.is_ok(), "{}", result.message);
        let log = log.borrow();
        let inserts = log
            .statements
            .iter()
            .filter(|sql| sql.as_str() == "INSERT INTO T(NAME,SCORE_NO) VALUES (%s,%s)")
            .count();
        assert_eq!(inserts, 3);
    }
}
