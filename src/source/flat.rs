use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use encoding_rs::Encoding;

use crate::{io_utils, source::RowReader, value::SourceValue};

/// Delimited text reader; empty cells surface as nulls.
pub struct FlatReader {
    reader: csv::Reader<BufReader<File>>,
    columns: Vec<String>,
    encoding: &'static Encoding,
    record: csv::ByteRecord,
    line: usize,
}

impl FlatReader {
    pub fn open(
        path: &Path,
        separator: u8,
        qualifier: bool,
        encoding: &'static Encoding,
    ) -> Result<Self> {
        let mut reader = io_utils::open_csv_reader_from_path(path, separator, qualifier)?;
        let columns = io_utils::reader_headers(&mut reader, encoding)
            .with_context(|| format!("Reading header of {path:?}"))?;
        Ok(Self {
            reader,
            columns,
            encoding,
            record: csv::ByteRecord::new(),
            line: 1,
        })
    }
}

impl RowReader for FlatReader {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn read_rows(&mut self, limit: Option<usize>) -> Result<Vec<Vec<SourceValue>>> {
        let mut rows = Vec::with_capacity(limit.unwrap_or(0));
        while limit.is_none_or(|max| rows.len() < max) {
            let has_record = self
                .reader
                .read_byte_record(&mut self.record)
                .with_context(|| format!("Reading record after line {}", self.line))?;
            if !has_record {
                break;
            }
            self.line = self
                .record
                .position()
                .map(|pos| pos.line() as usize)
                .unwrap_or(self.line + 1);
            let mut row = Vec::with_capacity(self.record.len());
            for field in self.record.iter() {
                if field.is_empty() {
                    row.push(SourceValue::Null);
                    continue;
                }
                let text = io_utils::decode_bytes(field, self.encoding)
                    .with_context(|| format!("Decoding line {}", self.line))?;
                row.push(SourceValue::Text(text));
            }
            rows.push(row);
        }
        Ok(rows)
    }
}
