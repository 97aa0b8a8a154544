#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }

    /// Writes a JSON credentials file pointing the sqlite section at `db`.
    pub fn sqlite_credentials(&self, db: &Path) -> PathBuf {
        let body = serde_json::json!({ "sqlite": { "host": db.to_string_lossy() } });
        self.write("credentials.json", &body.to_string())
    }
}

/// Reads every row of `table` as text, in insertion order.
pub fn table_rows(db: &Path, table: &str) -> Vec<Vec<String>> {
    let conn = Connection::open(db).expect("open sqlite");
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {table} ORDER BY rowid"))
        .expect("prepare select");
    let width = stmt.column_count();
    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, Option<String>>(i).map(Option::unwrap_or_default))
                .collect::<Result<Vec<_>, _>>()
        })
        .expect("query rows");
    rows.collect::<Result<Vec<_>, _>>().expect("collect rows")
}

/// Declared `(name, type)` pairs of `table`.
pub fn table_columns(db: &Path, table: &str) -> Vec<(String, String)> {
    let conn = Connection::open(db).expect("open sqlite");
    let mut stmt = conn
        .prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
        .expect("prepare pragma");
    let rows = stmt
        .query_map([table], |row| Ok((row.get(0)?, row.get(1)?)))
        .expect("query pragma");
    rows.collect::<Result<Vec<_>, _>>().expect("collect columns")
}

/// Minimal dBASE III image with character fields only.
pub fn dbf_image(fields: &[(&str, u8)], records: &[&[&[u8]]]) -> Vec<u8> {
    let header_len = 32 + fields.len() * 32 + 1;
    let record_len = 1 + fields.iter().map(|(_, len)| *len as usize).sum::<usize>();
    let mut out = vec![0u8; 32];
    out[0] = 0x03;
    out[4..8].copy_from_slice(&(records.len() as u32).to_le_bytes());
    out[8..10].copy_from_slice(&(header_len as u16).to_le_bytes());
    out[10..12].copy_from_slice(&(record_len as u16).to_le_bytes());
    for (name, len) in fields {
        let mut descriptor = [0u8; 32];
        descriptor[..name.len()].copy_from_slice(name.as_bytes());
        descriptor[11] = b'C';
        descriptor[16] = *len;
        out.extend_from_slice(&descriptor);
    }
    out.push(0x0D);
    for record in records {
        out.push(b' ');
        for ((_, len), value) in fields.iter().zip(record.iter()) {
            let mut cell = value.to_vec();
            cell.resize(*len as usize, b' ');
            out.extend_from_slice(&cell);
        }
    }
    out.push(0x1A);
    out
}
