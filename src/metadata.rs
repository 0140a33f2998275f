//! # Metadata table
//!
//! Row-per-image table aligned with [`FlatL2Index`](crate::vector_index::FlatL2Index)
//! positions. Row `i` describes the image whose vector is index entry `i`. Rows are
//! created once and never mutated; the table is saved and loaded as a whole.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::debug;

use crate::error::{Result, RetrievalError};
use crate::persist;

const TABLE_MAGIC: [u8; 4] = *b"IRMT";

/// Everything known about one ingested image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRow {
    /// Position of the matching index entry.
    pub position: usize,
    /// File name relative to the images folder.
    pub filename: String,
    /// Copy of the embedding stored in the index.
    pub vector: Vec<f32>,
    /// Caption text, absent when captioning failed.
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataTable {
    rows: Vec<MetadataRow>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row; its position is the row count before the append.
    pub fn append_row(
        &mut self,
        filename: impl Into<String>,
        vector: Vec<f32>,
        caption: Option<String>,
    ) -> usize {
        let position = self.rows.len();
        self.rows.push(MetadataRow {
            position,
            filename: filename.into(),
            vector,
            caption,
        });
        position
    }

    /// # Errors
    /// [`RetrievalError::OutOfRange`] if `position >= len()`.
    pub fn row_at(&self, position: usize) -> Result<&MetadataRow> {
        self.rows.get(position).ok_or(RetrievalError::OutOfRange {
            position,
            len: self.rows.len(),
        })
    }

    pub fn rows(&self) -> &[MetadataRow] {
        &self.rows
    }

    pub fn contains_filename(&self, filename: &str) -> bool {
        self.rows.iter().any(|row| row.filename == filename)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        persist::encode(TABLE_MAGIC, self).map_err(|e| std::io::Error::other(e).into())
    }

    pub fn from_bytes(bytes: &[u8], origin: &Path) -> Result<Self> {
        let corrupt = |reason: String| RetrievalError::CorruptTable {
            path: origin.to_path_buf(),
            reason,
        };
        let table: MetadataTable = persist::decode(TABLE_MAGIC, bytes).map_err(corrupt)?;
        if let Some(row) = table
            .rows
            .iter()
            .enumerate()
            .find_map(|(i, row)| (row.position != i).then_some(row))
        {
            return Err(corrupt(format!(
                "row for {} claims position {}",
                row.filename, row.position
            )));
        }
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        let tmp = persist::stage(path, &bytes)?;
        persist::commit(tmp, path)?;
        debug!("Saved {} rows to {}", self.len(), path.display());
        Ok(())
    }

    /// # Errors
    /// - [`RetrievalError::Io`] if the file cannot be read.
    /// - [`RetrievalError::CorruptTable`] if its content is not a valid table.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let table = Self::from_bytes(&bytes, path)?;
        debug!("Loaded {} rows from {}", table.len(), path.display());
        Ok(table)
    }
}
