//! Error taxonomy shared by analysis and load sessions.
//!
//! Collaborators (row readers, database drivers, connectors) report failures
//! through `anyhow`; the pipeline translates them into a [`LoaderError`] at the
//! point of use so the caller always receives one of a fixed set of kinds with
//! the underlying cause embedded in the message.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoaderError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("analysis error: {0}")]
    Analysis(String),
    #[error("column stats mismatch: {0}")]
    SchemaMismatch(String),
    #[error("source error: {0}")]
    Source(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("ddl error: {0}")]
    Ddl(String),
    #[error("table conflict: {0}")]
    Conflict(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("load error: {0}")]
    Load(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Encoding,
    Analysis,
    SchemaMismatch,
    Source,
    Connection,
    Ddl,
    Conflict,
    Unsupported,
    Load,
}

impl LoaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoaderError::Configuration(_) => ErrorKind::Configuration,
            LoaderError::Encoding(_) => ErrorKind::Encoding,
            LoaderError::Analysis(_) => ErrorKind::Analysis,
            LoaderError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            LoaderError::Source(_) => ErrorKind::Source,
            LoaderError::Connection(_) => ErrorKind::Connection,
            LoaderError::Ddl(_) => ErrorKind::Ddl,
            LoaderError::Conflict(_) => ErrorKind::Conflict,
            LoaderError::Unsupported(_) => ErrorKind::Unsupported,
            LoaderError::Load(_) => ErrorKind::Load,
        }
    }

    /// Message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            LoaderError::Configuration(m)
            | LoaderError::Encoding(m)
            | LoaderError::Analysis(m)
            | LoaderError::SchemaMismatch(m)
            | LoaderError::Source(m)
            | LoaderError::Connection(m)
            | LoaderError::Ddl(m)
            | LoaderError::Conflict(m)
            | LoaderError::Unsupported(m)
            | LoaderError::Load(m) => m,
        }
    }

    /// Wraps a collaborator failure, keeping its full cause chain.
    pub fn with_cause(
        make: fn(String) -> LoaderError,
        context: impl fmt::Display,
        cause: &anyhow::Error,
    ) -> LoaderError {
        make(format!("{context}: {cause:#}"))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Encoding => "encoding",
            ErrorKind::Analysis => "analysis",
            ErrorKind::SchemaMismatch => "schema-mismatch",
            ErrorKind::Source => "source",
            ErrorKind::Connection => "connection",
            ErrorKind::Ddl => "ddl",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Load => "load",
        };
        f.write_str(label)
    }
}

/// Terminal status carried by analyze and load results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error(ErrorKind),
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}
