pub mod analyzer;
pub mod cli;
pub mod connection;
pub mod credentials;
pub mod dialect;
pub mod encoding;
pub mod error;
pub mod io_utils;
pub mod reconcile;
pub mod report;
pub mod sanitize;
pub mod session;
pub mod source;
pub mod value;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    analyzer::ColumnStats,
    cli::{Cli, Commands, InputArgs, InputFormat},
    credentials::{Credentials, CredentialsFile},
    encoding::{ScanKind, detect_encoding},
    session::{Destination, LoadSession},
    source::{ChunkedSource, DbfConfig, FlatFileConfig, SourceConfig, SourceOptions},
};

pub use crate::{
    analyzer::{AnalyzeResult, ColumnStat},
    dialect::Dialect,
    error::{ErrorKind, LoaderError, Status},
    reconcile::TableExistsPolicy,
    session::LoadResult,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("tabular_loader", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Analyze(args) => handle_analyze(&args),
        Commands::Load(args) => handle_load(&args),
        Commands::DetectEncoding(args) => handle_detect_encoding(&args),
    }
}

fn handle_analyze(args: &cli::AnalyzeArgs) -> Result<()> {
    let source = build_source(&args.input)?;
    info!(
        "Analyzing {} ({} encoding) for {}",
        source.describe(),
        io_utils::encoding_label(source.encoding()),
        args.dialect
    );
    let result = match source.stream() {
        Ok(stream) => analyzer::analyze(stream, args.dialect),
        Err(err) => AnalyzeResult::from(err),
    };
    if !result.is_ok() {
        return Err(anyhow!(
            "analyze failed ({}): {}",
            describe_status(result.status),
            result.message
        ));
    }
    report::print_analysis(&result);
    if let Some(path) = &args.output {
        result
            .column_stats
            .save(path)
            .with_context(|| format!("Writing column stats to {path:?}"))?;
        info!(
            "Column stats for {} column(s) written to {path:?}",
            result.column_stats.len()
        );
    }
    Ok(())
}

fn handle_load(args: &cli::LoadArgs) -> Result<()> {
    let credentials = load_credentials(&args.credentials, args.dialect)?;
    let stats = match &args.stats {
        Some(path) => Some(
            ColumnStats::load(path).with_context(|| format!("Loading column stats from {path:?}"))?,
        ),
        None => None,
    };
    let source = build_source(&args.input)?;
    let destination =
        Destination::new(&args.table, args.dialect, credentials).with_policy(args.if_exists);
    info!(
        "Loading {} into {} table {} (if exists: {})",
        source.describe(),
        args.dialect,
        destination.sanitized_table_name(),
        args.if_exists
    );
    let result = LoadSession::new(source, destination).load(stats.as_ref());
    if !result.is_ok() {
        return Err(anyhow!(
            "load failed ({}): {}",
            describe_status(result.status),
            result.message
        ));
    }
    println!(
        "Loaded {} record(s) into {}",
        result.records_inserted.unwrap_or_default(),
        result.table_name
    );
    Ok(())
}

fn handle_detect_encoding(args: &cli::DetectEncodingArgs) -> Result<()> {
    let kind = match resolve_format(&args.input, args.format) {
        InputFormat::Flat => ScanKind::Flat,
        InputFormat::Dbf => ScanKind::Dbf,
    };
    let detected = detect_encoding(&args.input, kind)
        .with_context(|| format!("Detecting encoding of {:?}", args.input))?;
    println!("{detected}");
    Ok(())
}

fn build_source(args: &InputArgs) -> Result<ChunkedSource> {
    let config = match resolve_format(&args.input, args.format) {
        InputFormat::Flat => {
            let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
            debug!(
                "Flat input {:?}: delimiter '{}', qualifier {}",
                args.input,
                printable_delimiter(delimiter),
                args.qualifier
            );
            let mut config = FlatFileConfig::new(&args.input)
                .with_separator(delimiter)
                .with_qualifier(args.qualifier);
            if let Some(encoding) = &args.input_encoding {
                config = config.with_encoding(encoding);
            }
            SourceConfig::Flat(config)
        }
        InputFormat::Dbf => {
            let mut config = DbfConfig::new(&args.input);
            if let Some(encoding) = &args.input_encoding {
                config = config.with_encoding(encoding);
            }
            SourceConfig::Dbf(config)
        }
    };
    let options = SourceOptions {
        chunk_size: args.chunk_size,
        converter: None,
    };
    ChunkedSource::with_options(config, options)
        .with_context(|| format!("Opening input {:?}", args.input))
}

fn resolve_format(path: &Path, provided: Option<InputFormat>) -> InputFormat {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("dbf") => InputFormat::Dbf,
        _ => InputFormat::Flat,
    })
}

fn load_credentials(path: &Path, dialect: Dialect) -> Result<Credentials> {
    let file = CredentialsFile::load(path)?;
    file.credentials(dialect)
        .with_context(|| format!("Reading {dialect} credentials from {path:?}"))
}

fn describe_status(status: Status) -> String {
    match status {
        Status::Ok => "ok".to_string(),
        Status::Error(kind) => kind.to_string(),
    }
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
