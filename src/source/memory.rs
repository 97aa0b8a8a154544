use std::{collections::HashSet, sync::Arc};

use anyhow::Result;

use crate::{error::LoaderError, source::RowReader, value::SourceValue};

/// Rows already held by the caller, e.g. a data frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Vec<SourceValue>>,
}

impl MemoryTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SourceValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<SourceValue>] {
        &self.rows
    }

    pub fn validate(&self) -> Result<(), LoaderError> {
        let mut seen = HashSet::new();
        for name in &self.columns {
            if name.trim().is_empty() {
                return Err(LoaderError::Configuration(
                    "in-memory table has an unnamed column".to_string(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(LoaderError::Configuration(format!(
                    "in-memory table repeats column '{name}'"
                )));
            }
        }
        if let Some((index, row)) = self
            .rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() > self.columns.len())
        {
            return Err(LoaderError::Configuration(format!(
                "in-memory row {} has {} value(s) for {} column(s)",
                index + 1,
                row.len(),
                self.columns.len()
            )));
        }
        Ok(())
    }
}

pub struct MemoryReader {
    table: Arc<MemoryTable>,
    cursor: usize,
}

impl MemoryReader {
    pub fn new(table: Arc<MemoryTable>) -> Self {
        Self { table, cursor: 0 }
    }
}

impl RowReader for MemoryReader {
    fn columns(&self) -> &[String] {
        self.table.columns()
    }

    fn read_rows(&mut self, limit: Option<usize>) -> Result<Vec<Vec<SourceValue>>> {
        let remaining = &self.table.rows()[self.cursor..];
        let take = limit.map_or(remaining.len(), |max| max.min(remaining.len()));
        self.cursor += take;
        Ok(remaining[..take].to_vec())
    }
}
