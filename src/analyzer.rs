//! Column width analysis.
//!
//! Batches are reduced to per-column minimum and maximum UTF-8 byte lengths.
//! The reduction is an elementwise min/max, so any split of the same rows into
//! batches produces the same statistics. Once every batch has been seen the
//! column names are sanitized and each column is given the dialect's text type
//! for its maximum width.

use std::{
    collections::HashSet,
    fs::File,
    io::BufReader,
    path::Path,
    time::Instant,
};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    dialect::Dialect,
    error::{LoaderError, Status},
    sanitize::sanitize_column_name,
    source::RowBatch,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnStat {
    pub name: String,
    pub max_len: u64,
    pub min_len: u64,
    pub sanitized_name: String,
    pub sql_type: String,
}

/// Column statistics in source column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub columns: Vec<ColumnStat>,
}

impl ColumnStats {
    pub fn new(columns: Vec<ColumnStat>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColumnStat> {
        self.columns.iter()
    }

    pub fn sanitized_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|stat| stat.sanitized_name.clone())
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Creating column stats file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing column stats YAML")
    }

    /// Reads stats written by [`ColumnStats::save`]. Entries missing any field
    /// are a schema mismatch.
    pub fn load(path: &Path) -> Result<Self, LoaderError> {
        let file = File::open(path).map_err(|err| {
            LoaderError::Configuration(format!("opening column stats file {path:?}: {err}"))
        })?;
        let stats: ColumnStats = serde_yaml::from_reader(BufReader::new(file)).map_err(|err| {
            LoaderError::SchemaMismatch(format!("column stats file {path:?}: {err}"))
        })?;
        Ok(stats)
    }

    /// Checks that the stats can drive DDL generation.
    pub fn validate(&self) -> Result<(), LoaderError> {
        if self.columns.is_empty() {
            return Err(LoaderError::SchemaMismatch(
                "column stats contain no columns".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for stat in &self.columns {
            if stat.sanitized_name.trim().is_empty() {
                return Err(LoaderError::SchemaMismatch(format!(
                    "column '{}' has no sanitized name",
                    stat.name
                )));
            }
            if stat.sql_type.trim().is_empty() {
                return Err(LoaderError::SchemaMismatch(format!(
                    "column '{}' has no SQL type",
                    stat.name
                )));
            }
            if stat.min_len > stat.max_len {
                return Err(LoaderError::SchemaMismatch(format!(
                    "column '{}' has min length {} above max length {}",
                    stat.name, stat.min_len, stat.max_len
                )));
            }
            if !seen.insert(stat.sanitized_name.to_ascii_uppercase()) {
                return Err(LoaderError::SchemaMismatch(format!(
                    "sanitized name '{}' is used by more than one column",
                    stat.sanitized_name
                )));
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ColumnStats {
    type Item = &'a ColumnStat;
    type IntoIter = std::slice::Iter<'a, ColumnStat>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeResult {
    pub status: Status,
    pub message: String,
    pub record_count: u64,
    pub column_stats: ColumnStats,
}

impl AnalyzeResult {
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    fn failed(err: LoaderError) -> Self {
        Self {
            status: Status::Error(err.kind()),
            message: err.message().to_string(),
            record_count: 0,
            column_stats: ColumnStats::default(),
        }
    }

    pub fn into_result(self) -> Result<(u64, ColumnStats), LoaderError> {
        match self.status {
            Status::Ok => Ok((self.record_count, self.column_stats)),
            Status::Error(_) => Err(self.into_error()),
        }
    }

    fn into_error(self) -> LoaderError {
        use crate::error::ErrorKind;
        let message = self.message;
        match self.status {
            Status::Error(ErrorKind::Configuration) => LoaderError::Configuration(message),
            Status::Error(ErrorKind::Encoding) => LoaderError::Encoding(message),
            Status::Error(ErrorKind::Source) => LoaderError::Source(message),
            _ => LoaderError::Analysis(message),
        }
    }
}

impl From<LoaderError> for AnalyzeResult {
    fn from(err: LoaderError) -> Self {
        AnalyzeResult::failed(err)
    }
}

/// Running min/max byte lengths; `None` until a column has seen a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WidthAccumulator {
    columns: Option<Vec<String>>,
    bounds: Vec<Option<(u64, u64)>>,
    records: u64,
}

impl WidthAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> u64 {
        self.records
    }

    pub fn columns(&self) -> &[String] {
        self.columns.as_deref().unwrap_or_default()
    }

    fn ensure_columns(&mut self, columns: &[String]) -> Result<(), LoaderError> {
        match &self.columns {
            None => {
                self.columns = Some(columns.to_vec());
                self.bounds = vec![None; columns.len()];
                Ok(())
            }
            Some(known) if known.as_slice() == columns => Ok(()),
            Some(known) => Err(LoaderError::Analysis(format!(
                "batch columns [{}] differ from the first batch [{}]",
                columns.join(", "),
                known.join(", ")
            ))),
        }
    }

    pub fn observe(&mut self, batch: &RowBatch) -> Result<(), LoaderError> {
        self.ensure_columns(batch.columns())?;
        for row in batch.rows() {
            if row.len() != self.bounds.len() {
                return Err(LoaderError::Analysis(format!(
                    "row {} has {} value(s) for {} column(s)",
                    self.records + 1,
                    row.len(),
                    self.bounds.len()
                )));
            }
            for (bound, cell) in self.bounds.iter_mut().zip(row) {
                let len = cell.len() as u64;
                *bound = Some(match *bound {
                    None => (len, len),
                    Some((min, max)) => (min.min(len), max.max(len)),
                });
            }
            self.records += 1;
        }
        Ok(())
    }

    /// Elementwise combine with an accumulator built over the same columns.
    pub fn merge(&mut self, other: WidthAccumulator) -> Result<(), LoaderError> {
        let Some(columns) = other.columns else {
            return Ok(());
        };
        self.ensure_columns(&columns)?;
        for (bound, incoming) in self.bounds.iter_mut().zip(other.bounds) {
            *bound = match (*bound, incoming) {
                (None, other) => other,
                (current, None) => current,
                (Some((a_min, a_max)), Some((b_min, b_max))) => {
                    Some((a_min.min(b_min), a_max.max(b_max)))
                }
            };
        }
        self.records += other.records;
        Ok(())
    }

    pub fn finish(self, dialect: Dialect) -> Result<ColumnStats, LoaderError> {
        let columns = self.columns.unwrap_or_default();
        let mut stats = Vec::with_capacity(columns.len());
        for (name, bound) in columns.into_iter().zip(self.bounds) {
            let (min_len, max_len) = bound.unwrap_or((0, 0));
            let sql_type = dialect.width_to_type(max_len).ok_or_else(|| {
                LoaderError::Analysis(format!(
                    "column '{name}' needs {max_len} bytes, more than any {dialect} text type holds"
                ))
            })?;
            stats.push(ColumnStat {
                sanitized_name: sanitize_column_name(&name),
                sql_type: sql_type.to_string(),
                name,
                max_len,
                min_len,
            });
        }
        Ok(ColumnStats::new(stats))
    }
}

/// Reduces a batch stream to column statistics for `dialect`.
pub fn analyze<I>(batches: I, dialect: Dialect) -> AnalyzeResult
where
    I: IntoIterator<Item = Result<RowBatch, LoaderError>>,
{
    match try_analyze(batches, dialect) {
        Ok((record_count, column_stats)) => AnalyzeResult {
            status: Status::Ok,
            message: String::new(),
            record_count,
            column_stats,
        },
        Err(err) => AnalyzeResult::failed(err),
    }
}

fn try_analyze<I>(batches: I, dialect: Dialect) -> Result<(u64, ColumnStats), LoaderError>
where
    I: IntoIterator<Item = Result<RowBatch, LoaderError>>,
{
    let start = Instant::now();
    let mut accumulator = WidthAccumulator::new();
    for (index, batch) in batches.into_iter().enumerate() {
        let batch = batch.map_err(|err| {
            LoaderError::Analysis(format!("reading batch {}: {err}", index + 1))
        })?;
        accumulator.observe(&batch).map_err(|err| {
            LoaderError::Analysis(format!("measuring batch {}: {}", index + 1, err.message()))
        })?;
        info!(
            "Analyzed chunk {}: {} record(s) so far ({:.2}s elapsed)",
            index + 1,
            accumulator.record_count(),
            start.elapsed().as_secs_f64()
        );
    }
    let record_count = accumulator.record_count();
    let stats = accumulator.finish(dialect)?;
    debug!(
        "Analysis produced {} column stat(s) over {record_count} record(s)",
        stats.len()
    );
    Ok((record_count, stats))
}
