//! Chunked row sources.
//!
//! A [`ChunkedSource`] hides the file format behind a lazy sequence of
//! [`RowBatch`]es whose cells are already rendered to text. Every call to
//! [`ChunkedSource::stream`] re-opens the underlying reader, so analysis and
//! loading are two independent passes over the same input.
//!
//! Flat and DBF files are read by the built-in readers. Spreadsheets and
//! desktop database tables need a caller-supplied [`ReaderFactory`].

pub mod dbf;
pub mod flat;
pub mod memory;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use encoding_rs::{Encoding, UTF_8};
use log::{debug, info};

use crate::{
    encoding::{ScanKind, detect_encoding},
    error::LoaderError,
    io_utils,
    value::{SourceValue, Stringifier, ValueConverter},
};

pub use memory::MemoryTable;

pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Pull interface implemented by every format reader.
pub trait RowReader {
    /// Column names in source order.
    fn columns(&self) -> &[String];

    /// Returns up to `limit` rows (all remaining rows for `None`); an empty
    /// vector means the reader is exhausted.
    fn read_rows(&mut self, limit: Option<usize>) -> anyhow::Result<Vec<Vec<SourceValue>>>;
}

/// Opens a reader for `(path, sheet-or-table name)`.
pub type ReaderFactory =
    Arc<dyn Fn(&Path, &str) -> anyhow::Result<Box<dyn RowReader>> + Send + Sync>;

/// Rows sharing one column set; cells are already stringified.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    columns: Arc<[String]>,
    rows: Vec<Vec<String>>,
}

impl RowBatch {
    pub fn new(columns: Arc<[String]>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows
    }
}

#[derive(Debug, Clone)]
pub struct FlatFileConfig {
    pub path: PathBuf,
    pub separator: u8,
    pub qualifier: bool,
    pub encoding: Option<String>,
}

impl FlatFileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            separator: io_utils::DEFAULT_CSV_DELIMITER,
            qualifier: false,
            encoding: None,
        }
    }

    pub fn with_separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_qualifier(mut self, qualifier: bool) -> Self {
        self.qualifier = qualifier;
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct DbfConfig {
    pub path: PathBuf,
    pub encoding: Option<String>,
}

impl DbfConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            encoding: None,
        }
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }
}

#[derive(Clone)]
pub struct SpreadsheetConfig {
    pub path: PathBuf,
    pub sheet_name: String,
    pub reader: ReaderFactory,
}

#[derive(Clone)]
pub struct DesktopDbConfig {
    pub path: PathBuf,
    pub table_name: String,
    pub reader: ReaderFactory,
}

#[derive(Clone)]
pub enum SourceConfig {
    Flat(FlatFileConfig),
    Dbf(DbfConfig),
    Spreadsheet(SpreadsheetConfig),
    DesktopDb(DesktopDbConfig),
    Memory(Arc<MemoryTable>),
}

impl SourceConfig {
    pub fn describe(&self) -> String {
        match self {
            SourceConfig::Flat(cfg) => format!("flat file {:?}", cfg.path),
            SourceConfig::Dbf(cfg) => format!("DBF file {:?}", cfg.path),
            SourceConfig::Spreadsheet(cfg) => {
                format!("sheet '{}' of {:?}", cfg.sheet_name, cfg.path)
            }
            SourceConfig::DesktopDb(cfg) => {
                format!("table '{}' of {:?}", cfg.table_name, cfg.path)
            }
            SourceConfig::Memory(table) => {
                format!("in-memory table ({} rows)", table.rows().len())
            }
        }
    }

    /// Formats without incremental reads come back as a single batch.
    fn supports_chunking(&self) -> bool {
        matches!(
            self,
            SourceConfig::Flat(_) | SourceConfig::Dbf(_) | SourceConfig::DesktopDb(_)
        )
    }
}

#[derive(Clone)]
pub struct SourceOptions {
    pub chunk_size: usize,
    pub converter: Option<ValueConverter>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            converter: None,
        }
    }
}

#[derive(Clone)]
pub struct ChunkedSource {
    config: SourceConfig,
    chunk_size: usize,
    stringifier: Stringifier,
}

impl ChunkedSource {
    pub fn new(config: SourceConfig) -> Result<Self, LoaderError> {
        Self::with_options(config, SourceOptions::default())
    }

    /// Validates the configuration and settles the text encoding up front,
    /// running the detector when no explicit encoding was given.
    pub fn with_options(config: SourceConfig, options: SourceOptions) -> Result<Self, LoaderError> {
        if options.chunk_size == 0 {
            return Err(LoaderError::Configuration(
                "chunk size must be at least 1".to_string(),
            ));
        }
        let encoding = match &config {
            SourceConfig::Flat(cfg) => {
                if !cfg.separator.is_ascii() {
                    return Err(LoaderError::Configuration(format!(
                        "separator byte 0x{:02x} is not ASCII",
                        cfg.separator
                    )));
                }
                settle_encoding(&cfg.path, cfg.encoding.as_deref(), ScanKind::Flat)?
            }
            SourceConfig::Dbf(cfg) => {
                settle_encoding(&cfg.path, cfg.encoding.as_deref(), ScanKind::Dbf)?
            }
            SourceConfig::Spreadsheet(cfg) => {
                require_name(&cfg.sheet_name, "sheet_name", "spreadsheet")?;
                UTF_8
            }
            SourceConfig::DesktopDb(cfg) => {
                require_name(&cfg.table_name, "table_name", "desktop database")?;
                UTF_8
            }
            SourceConfig::Memory(table) => {
                table.validate()?;
                UTF_8
            }
        };
        let stringifier = match options.converter {
            Some(converter) => Stringifier::with_converter(encoding, converter),
            None => Stringifier::new(encoding),
        };
        Ok(Self {
            config,
            chunk_size: options.chunk_size,
            stringifier,
        })
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.stringifier.encoding()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn describe(&self) -> String {
        self.config.describe()
    }

    /// Opens a fresh pass over the source.
    pub fn stream(&self) -> Result<BatchStream<'_>, LoaderError> {
        let reader = self.open_reader().map_err(|err| {
            LoaderError::with_cause(
                LoaderError::Source,
                format!("opening {}", self.describe()),
                &err,
            )
        })?;
        let columns: Arc<[String]> = reader.columns().to_vec().into();
        debug!(
            "Opened {} with {} column(s){}",
            self.describe(),
            columns.len(),
            if self.stringifier.is_custom() {
                ", custom value converter"
            } else {
                ""
            }
        );
        let limit = self
            .config
            .supports_chunking()
            .then_some(self.chunk_size);
        Ok(BatchStream {
            reader,
            columns,
            limit,
            stringifier: &self.stringifier,
            emitted: 0,
            rows_seen: 0,
            done: false,
        })
    }

    fn open_reader(&self) -> anyhow::Result<Box<dyn RowReader>> {
        Ok(match &self.config {
            SourceConfig::Flat(cfg) => Box::new(flat::FlatReader::open(
                &cfg.path,
                cfg.separator,
                cfg.qualifier,
                self.encoding(),
            )?),
            SourceConfig::Dbf(cfg) => Box::new(dbf::DbfReader::open(&cfg.path, self.encoding())?),
            SourceConfig::Spreadsheet(cfg) => (cfg.reader)(&cfg.path, &cfg.sheet_name)?,
            SourceConfig::DesktopDb(cfg) => (cfg.reader)(&cfg.path, &cfg.table_name)?,
            SourceConfig::Memory(table) => Box::new(memory::MemoryReader::new(table.clone())),
        })
    }
}

fn settle_encoding(
    path: &Path,
    explicit: Option<&str>,
    kind: ScanKind,
) -> Result<&'static Encoding, LoaderError> {
    match explicit {
        Some(label) => io_utils::resolve_encoding(Some(label))
            .map_err(|err| LoaderError::Configuration(format!("{err:#}"))),
        None => {
            let detected = detect_encoding(path, kind)?;
            info!("Detected {detected} encoding for {path:?}");
            Ok(detected.encoding())
        }
    }
}

fn require_name(value: &str, field: &str, format: &str) -> Result<(), LoaderError> {
    if value.trim().is_empty() {
        Err(LoaderError::Configuration(format!(
            "{field} is required for {format} sources"
        )))
    } else {
        Ok(())
    }
}

/// One pass over a source. Yields at least one batch so the column set is
/// always observable, even for an input without data rows.
pub struct BatchStream<'a> {
    reader: Box<dyn RowReader>,
    columns: Arc<[String]>,
    limit: Option<usize>,
    stringifier: &'a Stringifier,
    emitted: usize,
    rows_seen: usize,
    done: bool,
}

impl BatchStream<'_> {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_batch(&mut self) -> Result<Option<RowBatch>, LoaderError> {
        let raw = self.reader.read_rows(self.limit).map_err(|err| {
            LoaderError::with_cause(
                LoaderError::Source,
                format!("reading chunk {}", self.emitted + 1),
                &err,
            )
        })?;
        if self.limit.is_none() {
            self.done = true;
        }
        if raw.is_empty() && self.emitted > 0 {
            self.done = true;
            return Ok(None);
        }
        if raw.is_empty() {
            self.done = true;
        }

        let width = self.columns.len();
        let mut rows = Vec::with_capacity(raw.len());
        for mut row in raw {
            self.rows_seen += 1;
            if row.len() > width {
                return Err(LoaderError::Source(format!(
                    "row {} has {} field(s) but the source declares {width} column(s)",
                    self.rows_seen,
                    row.len()
                )));
            }
            row.resize(width, SourceValue::Null);
            rows.push(self.stringifier.stringify_row(&row));
        }
        self.emitted += 1;
        Ok(Some(RowBatch::new(self.columns.clone(), rows)))
    }
}

impl Iterator for BatchStream<'_> {
    type Item = Result<RowBatch, LoaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => None,
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
