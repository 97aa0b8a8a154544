//! Trial-decode encoding detection for flat and DBF sources.
//!
//! The whole source is scanned under UTF-8 first; on the first undecodable
//! line (or record) the scan restarts under cp1252. DBF scans only look at
//! character and memo fields. When both fail the caller
//! has to name the encoding explicitly.

use std::{
    fmt,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use log::{debug, warn};

use crate::{error::LoaderError, source::dbf::DbfFile};

/// Bytes left undefined by the strict cp1252 table; encoding_rs maps them to C1 controls.
const CP1252_UNDEFINED: [u8; 5] = [0x81, 0x8D, 0x8F, 0x90, 0x9D];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedEncoding {
    Utf8,
    Cp1252,
}

impl DetectedEncoding {
    pub fn label(&self) -> &'static str {
        match self {
            DetectedEncoding::Utf8 => "utf8",
            DetectedEncoding::Cp1252 => "cp1252",
        }
    }

    pub fn encoding(&self) -> &'static Encoding {
        match self {
            DetectedEncoding::Utf8 => UTF_8,
            DetectedEncoding::Cp1252 => WINDOWS_1252,
        }
    }

    fn accepts(&self, bytes: &[u8]) -> bool {
        match self {
            DetectedEncoding::Utf8 => std::str::from_utf8(bytes).is_ok(),
            DetectedEncoding::Cp1252 => !bytes.iter().any(|b| CP1252_UNDEFINED.contains(b)),
        }
    }
}

impl fmt::Display for DetectedEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Source layouts that carry raw text and therefore need detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    Flat,
    Dbf,
}

impl ScanKind {
    fn unit(&self) -> &'static str {
        match self {
            ScanKind::Flat => "line",
            ScanKind::Dbf => "record",
        }
    }
}

pub fn detect_encoding(path: &Path, kind: ScanKind) -> Result<DetectedEncoding, LoaderError> {
    if kind == ScanKind::Dbf
        && let Some(marked) = dbf_header_encoding(path)?
    {
        debug!("Trusting DBF code page marker for {path:?}: {marked}");
        return Ok(marked);
    }

    let utf8_failure = match first_rejected_unit(path, kind, DetectedEncoding::Utf8)? {
        None => return Ok(DetectedEncoding::Utf8),
        Some(index) => index,
    };
    warn!(
        "{path:?} is not valid utf8 at {} {utf8_failure}; retrying as cp1252",
        kind.unit()
    );

    match first_rejected_unit(path, kind, DetectedEncoding::Cp1252)? {
        None => Ok(DetectedEncoding::Cp1252),
        Some(cp1252_failure) => Err(LoaderError::Encoding(format!(
            "could not infer the encoding of {path:?}: utf8 failed at {unit} {utf8_failure}, \
             cp1252 failed at {unit} {cp1252_failure}; supply the encoding explicitly",
            unit = kind.unit()
        ))),
    }
}

/// Returns the 1-based index of the first line/record the candidate cannot decode.
fn first_rejected_unit(
    path: &Path,
    kind: ScanKind,
    candidate: DetectedEncoding,
) -> Result<Option<usize>, LoaderError> {
    match kind {
        ScanKind::Flat => first_rejected_line(path, candidate),
        ScanKind::Dbf => first_rejected_record(path, candidate),
    }
}

fn first_rejected_line(
    path: &Path,
    candidate: DetectedEncoding,
) -> Result<Option<usize>, LoaderError> {
    let file = File::open(path)
        .map_err(|err| LoaderError::Source(format!("opening {path:?}: {err}")))?;
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    let mut index = 0usize;
    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .map_err(|err| LoaderError::Source(format!("reading {path:?}: {err}")))?;
        if read == 0 {
            return Ok(None);
        }
        index += 1;
        if !candidate.accepts(&line) {
            return Ok(Some(index));
        }
    }
}

fn first_rejected_record(
    path: &Path,
    candidate: DetectedEncoding,
) -> Result<Option<usize>, LoaderError> {
    let mut dbf = DbfFile::open(path)
        .map_err(|err| LoaderError::with_cause(LoaderError::Source, "opening DBF file", &err))?;
    let mut index = 0usize;
    while let Some(record) = dbf
        .next_raw_record()
        .map_err(|err| LoaderError::with_cause(LoaderError::Source, "reading DBF file", &err))?
    {
        index += 1;
        let segments = dbf
            .text_segments(&record)
            .map_err(|err| LoaderError::with_cause(LoaderError::Source, "reading DBF memo", &err))?;
        if !segments.iter().all(|segment| candidate.accepts(segment)) {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn dbf_header_encoding(path: &Path) -> Result<Option<DetectedEncoding>, LoaderError> {
    let dbf = DbfFile::open(path)
        .map_err(|err| LoaderError::with_cause(LoaderError::Source, "opening DBF file", &err))?;
    Ok(dbf.marked_encoding())
}
