use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{dialect::Dialect, reconcile::TableExistsPolicy, source::DEFAULT_CHUNK_SIZE};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load tabular files into relational databases with inferred column widths",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Measure column widths and print the column types a dialect would use
    Analyze(AnalyzeArgs),
    /// Create (or reconcile) the destination table and insert every row
    Load(LoadArgs),
    /// Report whether an input decodes as utf8 or cp1252
    DetectEncoding(DetectEncodingArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum InputFormat {
    /// Delimited text (CSV, TSV, pipe separated, ...)
    Flat,
    /// dBASE table
    Dbf,
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// Input file
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Input layout; defaults to dbf for .dbf files and flat otherwise
    #[arg(long, value_enum)]
    pub format: Option<InputFormat>,
    /// Field separator for flat files (defaults to tab for .tsv, comma otherwise)
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Honour double-quote text qualifiers in flat files
    #[arg(long)]
    pub qualifier: bool,
    /// Character encoding of the input; detected when omitted
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Rows per chunk for sources that read incrementally
    #[arg(long = "chunk-size", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Dialect whose column types are reported
    #[arg(long, value_enum, default_value_t = Dialect::Postgres)]
    pub dialect: Dialect,
    /// Write the column stats as YAML for a later `load --stats`
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Destination backend
    #[arg(long, value_enum)]
    pub dialect: Dialect,
    /// JSON or YAML credentials file keyed by dialect
    #[arg(long)]
    pub credentials: PathBuf,
    /// Destination table (sanitized before use)
    #[arg(long)]
    pub table: String,
    /// What to do when the destination table already exists
    #[arg(long = "if-exists", value_enum, default_value_t = TableExistsPolicy::Error)]
    pub if_exists: TableExistsPolicy,
    /// Column stats written by `analyze --output`; skips the analysis pass
    #[arg(long)]
    pub stats: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct DetectEncodingArgs {
    /// Input file
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Input layout; defaults to dbf for .dbf files and flat otherwise
    #[arg(long, value_enum)]
    pub format: Option<InputFormat>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" | "\\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
