//! I/O helpers for reading delimited input and decoding bytes.
//!
//! Flat-file reads in tabular-loader flow through this module:
//!
//! - **Encoding resolution**: explicit labels resolve through `encoding_rs`,
//!   defaulting to UTF-8.
//! - **Reader construction**: `open_csv_reader` applies the separator and the
//!   qualifier switch (quote processing on/off).
//! - **Strict decoding**: fields are decoded without replacement characters so
//!   a wrong encoding surfaces as an error instead of silently mangled text.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

const UTF8_BOM: char = '\u{feff}';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        let trimmed = value.trim();
        // Short spellings seen in existing credential/config files.
        let normalized = match trimmed.to_ascii_lowercase().as_str() {
            "utf8" | "utf_8" => "utf-8".to_string(),
            "cp1252" => "windows-1252".to_string(),
            other => other.to_string(),
        };
        Encoding::for_label(normalized.as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

/// Short label for log lines and results (`utf8`, `cp1252`, or the WHATWG name).
pub fn encoding_label(encoding: &'static Encoding) -> String {
    if encoding == UTF_8 {
        "utf8".to_string()
    } else if encoding == WINDOWS_1252 {
        "cp1252".to_string()
    } else {
        encoding.name().to_ascii_lowercase()
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8, qualifier: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .quoting(qualifier)
        .double_quote(qualifier)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(
    path: &Path,
    delimiter: u8,
    qualifier: bool,
) -> Result<csv::Reader<BufReader<File>>> {
    let reader =
        BufReader::new(File::open(path).with_context(|| format!("Opening input file {path:?}"))?);
    Ok(open_csv_reader(reader, delimiter, qualifier))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>>
where
    R: Read,
{
    let headers = reader.byte_headers()?.clone();
    let mut decoded = decode_record(&headers, encoding)?;
    if let Some(first) = decoded.first_mut()
        && first.starts_with(UTF8_BOM)
    {
        *first = first.trim_start_matches(UTF8_BOM).to_string();
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_encoding_accepts_short_labels() {
        assert_eq!(resolve_encoding(Some("utf8")).unwrap(), UTF_8);
        assert_eq!(resolve_encoding(Some("cp1252")).unwrap(), WINDOWS_1252);
        assert_eq!(resolve_encoding(Some("latin1")).unwrap(), WINDOWS_1252);
        assert_eq!(resolve_encoding(None).unwrap(), UTF_8);
        assert!(resolve_encoding(Some("klingon")).is_err());
    }

    #[test]
    fn decode_bytes_rejects_invalid_utf8() {
        assert!(decode_bytes(b"caf\xe9", UTF_8).is_err());
        assert_eq!(decode_bytes(b"caf\xe9", WINDOWS_1252).unwrap(), "café");
    }

    #[test]
    fn headers_drop_leading_bom() {
        let data = "\u{feff}id,name\n1,a\n";
        let mut reader = open_csv_reader(data.as_bytes(), b',', true);
        let headers = reader_headers(&mut reader, UTF_8).unwrap();
        assert_eq!(headers, vec!["id", "name"]);
    }

    #[test]
    fn unqualified_reader_keeps_quotes_literal() {
        let data = "a,b\n\"x,y\",z\n";
        let mut reader = open_csv_reader(data.as_bytes(), b',', false);
        let record = reader.byte_records().next().unwrap().unwrap();
        assert_eq!(record.len(), 3);
        assert_eq!(&record[0], b"\"x");
    }

    #[test]
    fn resolve_input_delimiter_uses_extension() {
        assert_eq!(resolve_input_delimiter(Path::new("a.tsv"), None), b'\t');
        assert_eq!(resolve_input_delimiter(Path::new("a.txt"), None), b',');
        assert_eq!(resolve_input_delimiter(Path::new("a.tsv"), Some(b'|')), b'|');
    }
}
