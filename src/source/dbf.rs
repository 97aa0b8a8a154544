//! dBASE III style `.dbf` reader.
//!
//! Layout: a 32 byte header (record count at 4, header length at 8, record
//! length at 10, language driver at 29), 32 byte field descriptors terminated
//! by `0x0D`, then fixed-width records that start with a deletion flag.
//! `M` fields hold a block number into a sibling `.dbt` or `.fpt` memo file.

use std::{
    borrow::Cow,
    fs::File,
    io::{self, BufRead, BufReader, Read, Seek, SeekFrom},
    ops::Range,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail, ensure};
use chrono::NaiveDate;
use encoding_rs::Encoding;
use log::debug;

use crate::{encoding::DetectedEncoding, io_utils, source::RowReader, value::SourceValue};

const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const DESCRIPTOR_END: u8 = 0x0D;
const END_OF_FILE: u8 = 0x1A;
const DELETED: u8 = b'*';
const DBASE3_MEMO_VERSION: u8 = 0x83;
const DBASE3_BLOCK_SIZE: u64 = 512;
const DBASE4_BLOCK_MARKER: [u8; 4] = [0xFF, 0xFF, 0x08, 0x00];
const MEMO_EXTENSIONS: [&str; 4] = ["dbt", "DBT", "fpt", "FPT"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbfField {
    pub name: String,
    pub kind: u8,
    pub length: usize,
    /// Start of the field within a record, deletion flag excluded.
    pub offset: usize,
}

impl DbfField {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.length
    }

    /// `C` and `M` fields carry encoded text; everything else is ASCII or binary.
    pub fn is_text(&self) -> bool {
        matches!(self.kind, b'C' | b'M')
    }
}

pub struct DbfFile {
    reader: BufReader<File>,
    fields: Vec<DbfField>,
    memo: Option<MemoFile>,
    record_count: u32,
    record_length: usize,
    language_driver: u8,
    consumed: u32,
    buffer: Vec<u8>,
}

impl DbfFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening DBF file {path:?}"))?;
        let mut reader = BufReader::new(file);
        let mut header = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut header)
            .with_context(|| format!("Reading DBF header of {path:?}"))?;
        let version = header[0];
        let record_count = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let header_length = u16::from_le_bytes([header[8], header[9]]) as usize;
        let record_length = u16::from_le_bytes([header[10], header[11]]) as usize;
        let language_driver = header[29];
        ensure!(
            header_length > HEADER_LEN,
            "DBF header length {header_length} is too small"
        );

        let mut fields = Vec::new();
        let mut offset = HEADER_LEN;
        let mut field_offset = 0usize;
        let mut descriptor = [0u8; DESCRIPTOR_LEN];
        while offset + DESCRIPTOR_LEN <= header_length {
            reader.read_exact(&mut descriptor[..1])?;
            if descriptor[0] == DESCRIPTOR_END {
                break;
            }
            reader.read_exact(&mut descriptor[1..])?;
            let field = parse_descriptor(&descriptor, field_offset);
            field_offset += field.length;
            fields.push(field);
            offset += DESCRIPTOR_LEN;
        }
        let declared = field_offset + 1;
        ensure!(
            declared == record_length,
            "DBF record length {record_length} does not match field widths ({declared})"
        );

        let memo = if fields.iter().any(|f| f.kind == b'M') {
            let memo_path = locate_memo(path).ok_or_else(|| {
                anyhow!("memo file for {path:?} is missing (expected a .dbt or .fpt beside it)")
            })?;
            Some(MemoFile::open(&memo_path, version)?)
        } else {
            None
        };
        reader.seek(SeekFrom::Start(header_length as u64))?;

        Ok(Self {
            reader,
            fields,
            memo,
            record_count,
            record_length,
            language_driver,
            consumed: 0,
            buffer: vec![0u8; record_length],
        })
    }

    pub fn fields(&self) -> &[DbfField] {
        &self.fields
    }

    /// Code page implied by the language driver byte, when it is one we trust.
    pub fn marked_encoding(&self) -> Option<DetectedEncoding> {
        match self.language_driver {
            0x03 | 0x57 | 0x58 | 0x59 => Some(DetectedEncoding::Cp1252),
            _ => None,
        }
    }

    /// Next live record without its deletion flag.
    pub fn next_raw_record(&mut self) -> Result<Option<Vec<u8>>> {
        while self.consumed < self.record_count {
            match self.reader.read_exact(&mut self.buffer) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(err) => return Err(err).context("Reading DBF record"),
            }
            self.consumed += 1;
            match self.buffer[0] {
                END_OF_FILE => return Ok(None),
                DELETED => continue,
                _ => return Ok(Some(self.buffer[1..self.record_length].to_vec())),
            }
        }
        Ok(None)
    }

    /// Encoded text carried by a raw record: the bytes of each `C` field and
    /// the contents of each non-empty memo. Binary and numeric fields are left out.
    pub fn text_segments<'r>(&mut self, record: &'r [u8]) -> Result<Vec<Cow<'r, [u8]>>> {
        let mut segments = Vec::new();
        for field in self.fields.iter().filter(|f| f.is_text()) {
            let bytes = &record[field.range()];
            if field.kind == b'C' {
                segments.push(Cow::Borrowed(bytes));
            } else if let Some(text) = read_memo(self.memo.as_mut(), field, bytes)
                .with_context(|| format!("Field '{}'", field.name))?
            {
                segments.push(Cow::Owned(text));
            }
        }
        Ok(segments)
    }
}

fn parse_descriptor(bytes: &[u8; DESCRIPTOR_LEN], offset: usize) -> DbfField {
    let name_bytes = &bytes[..11];
    let end = name_bytes.iter().position(|b| *b == 0).unwrap_or(11);
    DbfField {
        name: String::from_utf8_lossy(&name_bytes[..end]).trim().to_string(),
        kind: bytes[11],
        length: bytes[16] as usize,
        offset,
    }
}

fn locate_memo(path: &Path) -> Option<PathBuf> {
    MEMO_EXTENSIONS
        .iter()
        .map(|ext| path.with_extension(ext))
        .find(|candidate| candidate.is_file())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemoLayout {
    /// Text runs until `0x1A`.
    Dbase3,
    /// Blocks may open with `FF FF 08 00` and a little-endian length.
    Dbase4,
    /// Blocks open with a big-endian type and length.
    FoxPro,
}

struct MemoFile {
    reader: BufReader<File>,
    layout: MemoLayout,
    block_size: u64,
}

impl MemoFile {
    fn open(path: &Path, version: u8) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening memo file {path:?}"))?;
        let mut reader = BufReader::new(file);
        let mut header = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut header)
            .with_context(|| format!("Reading memo header of {path:?}"))?;
        let foxpro = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("fpt"));
        let (layout, block_size) = if foxpro {
            (
                MemoLayout::FoxPro,
                u16::from_be_bytes([header[6], header[7]]) as u64,
            )
        } else if version == DBASE3_MEMO_VERSION {
            (MemoLayout::Dbase3, DBASE3_BLOCK_SIZE)
        } else {
            match u16::from_le_bytes([header[20], header[21]]) as u64 {
                0 => (MemoLayout::Dbase4, DBASE3_BLOCK_SIZE),
                size => (MemoLayout::Dbase4, size),
            }
        };
        ensure!(block_size > 0, "memo file {path:?} declares a zero block size");
        debug!("Memo file {path:?}: {layout:?} layout, {block_size} byte blocks");
        Ok(Self {
            reader,
            layout,
            block_size,
        })
    }

    fn read_block(&mut self, block: u64) -> Result<Vec<u8>> {
        self.reader
            .seek(SeekFrom::Start(block * self.block_size))
            .with_context(|| format!("Seeking memo block {block}"))?;
        match self.layout {
            MemoLayout::FoxPro => {
                let mut head = [0u8; 8];
                self.reader.read_exact(&mut head)?;
                let length = u32::from_be_bytes([head[4], head[5], head[6], head[7]]) as usize;
                let mut data = vec![0u8; length];
                self.reader
                    .read_exact(&mut data)
                    .with_context(|| format!("Memo block {block} is truncated"))?;
                Ok(data)
            }
            MemoLayout::Dbase4 => {
                let mut head = [0u8; 8];
                self.reader.read_exact(&mut head)?;
                if head[..4] != DBASE4_BLOCK_MARKER {
                    self.reader.seek_relative(-8)?;
                    return self.read_terminated();
                }
                let length = u32::from_le_bytes([head[4], head[5], head[6], head[7]]) as usize;
                ensure!(length >= 8, "memo block {block} declares length {length}");
                let mut data = vec![0u8; length - 8];
                self.reader
                    .read_exact(&mut data)
                    .with_context(|| format!("Memo block {block} is truncated"))?;
                Ok(data)
            }
            MemoLayout::Dbase3 => self.read_terminated(),
        }
    }

    fn read_terminated(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.reader.read_until(END_OF_FILE, &mut data)?;
        if data.last() == Some(&END_OF_FILE) {
            data.pop();
        }
        Ok(data)
    }
}

/// Block number stored in a memo field: ASCII digits, or a little-endian
/// integer when the field is four bytes wide. Blank and zero mean no memo.
fn memo_block(field: &DbfField, bytes: &[u8]) -> Result<Option<u64>> {
    if field.length == 4 {
        let block = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64;
        return Ok((block != 0).then_some(block));
    }
    let trimmed = trim_padding(bytes);
    if trimmed.is_empty() {
        return Ok(None);
    }
    let text = std::str::from_utf8(trimmed)?;
    let block: u64 = text
        .parse()
        .map_err(|_| anyhow!("'{text}' is not a memo block number"))?;
    Ok((block != 0).then_some(block))
}

fn read_memo(memo: Option<&mut MemoFile>, field: &DbfField, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
    let Some(block) = memo_block(field, bytes)? else {
        return Ok(None);
    };
    let memo = memo.ok_or_else(|| anyhow!("no memo file is open"))?;
    memo.read_block(block).map(Some)
}

/// Typed reader over a [`DbfFile`].
pub struct DbfReader {
    file: DbfFile,
    columns: Vec<String>,
    encoding: &'static Encoding,
    record_index: usize,
}

impl DbfReader {
    pub fn open(path: &Path, encoding: &'static Encoding) -> Result<Self> {
        let file = DbfFile::open(path)?;
        debug!(
            "DBF {path:?}: {} field(s), {} record(s) declared",
            file.fields.len(),
            file.record_count
        );
        let columns = file.fields().iter().map(|f| f.name.clone()).collect();
        Ok(Self {
            file,
            columns,
            encoding,
            record_index: 0,
        })
    }

    fn decode_record(&mut self, raw: &[u8]) -> Result<Vec<SourceValue>> {
        let encoding = self.encoding;
        let DbfFile { fields, memo, .. } = &mut self.file;
        let mut values = Vec::with_capacity(fields.len());
        for field in fields.iter() {
            let bytes = &raw[field.range()];
            let value = if field.kind == b'M' {
                read_memo(memo.as_mut(), field, bytes).and_then(|text| match text {
                    Some(text) => Ok(SourceValue::Text(io_utils::decode_bytes(&text, encoding)?)),
                    None => Ok(SourceValue::Null),
                })
            } else {
                parse_field(field, bytes, encoding)
            }
            .with_context(|| format!("Field '{}'", field.name))?;
            values.push(value);
        }
        Ok(values)
    }
}

impl RowReader for DbfReader {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn read_rows(&mut self, limit: Option<usize>) -> Result<Vec<Vec<SourceValue>>> {
        let mut rows = Vec::new();
        while limit.is_none_or(|max| rows.len() < max) {
            let Some(raw) = self.file.next_raw_record()? else {
                break;
            };
            self.record_index += 1;
            let index = self.record_index;
            let row = self
                .decode_record(&raw)
                .with_context(|| format!("Decoding record {index}"))?;
            rows.push(row);
        }
        Ok(rows)
    }
}

fn trim_padding(bytes: &[u8]) -> &[u8] {
    let is_pad = |b: &u8| *b == b' ' || *b == 0;
    let start = bytes.iter().position(|b| !is_pad(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_pad(b)).map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn parse_field(field: &DbfField, bytes: &[u8], encoding: &'static Encoding) -> Result<SourceValue> {
    match field.kind {
        b'C' => {
            let end = bytes
                .iter()
                .rposition(|b| *b != b' ' && *b != 0)
                .map_or(0, |i| i + 1);
            Ok(SourceValue::Text(io_utils::decode_bytes(
                &bytes[..end],
                encoding,
            )?))
        }
        b'N' | b'F' => {
            let trimmed = trim_padding(bytes);
            if trimmed.iter().all(|b| *b == b'*') {
                return Ok(SourceValue::Null);
            }
            let text = std::str::from_utf8(trimmed)?;
            if let Ok(int) = text.parse::<i64>() {
                Ok(SourceValue::Integer(int))
            } else {
                let float = text
                    .parse::<f64>()
                    .map_err(|_| anyhow!("'{text}' is not a number"))?;
                Ok(SourceValue::Float(float))
            }
        }
        b'L' => match bytes.first() {
            Some(b'T' | b't' | b'Y' | b'y') => Ok(SourceValue::Boolean(true)),
            Some(b'F' | b'f' | b'N' | b'n') => Ok(SourceValue::Boolean(false)),
            Some(b'?' | b' ') | None => Ok(SourceValue::Null),
            Some(other) => bail!("invalid logical flag 0x{other:02x}"),
        },
        b'D' => {
            let trimmed = trim_padding(bytes);
            if trimmed.is_empty() || trimmed.iter().all(|b| *b == b'0') {
                return Ok(SourceValue::Date(None));
            }
            let text = std::str::from_utf8(trimmed)?;
            let date = NaiveDate::parse_from_str(text, "%Y%m%d")
                .with_context(|| format!("'{text}' is not a YYYYMMDD date"))?;
            Ok(SourceValue::Date(Some(date)))
        }
        b'I' if bytes.len() == 4 => Ok(SourceValue::Integer(
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        )),
        _ => {
            let trimmed = trim_padding(bytes);
            if trimmed.is_empty() {
                Ok(SourceValue::Null)
            } else {
                Ok(SourceValue::Bytes(trimmed.to_vec()))
            }
        }
    }
}
