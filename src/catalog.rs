//! # ImageCatalog
//!
//! Owns a [`FlatL2Index`] and a [`MetadataTable`] and keeps them position-aligned: the
//! only way to add an image is [`ImageCatalog::append`], which writes the vector and the
//! row together, and loading refuses a pair whose counts differ.
//!
//! ## Persistence
//! [`ImageCatalog::save`] writes both blobs to temporary files next to their
//! destinations and renames them into place only after both writes succeeded. A crash
//! during the writes leaves the previous pair untouched.

use std::path::Path;
use tracing::{debug, info};

use crate::error::{Result, RetrievalError};
use crate::metadata::{MetadataRow, MetadataTable};
use crate::persist;
use crate::vector_index::FlatL2Index;

/// A search result resolved through the metadata table.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub position: usize,
    pub filename: String,
    pub caption: Option<String>,
    /// Squared Euclidean distance to the query.
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageCatalog {
    index: FlatL2Index,
    table: MetadataTable,
}

impl ImageCatalog {
    /// Create an empty catalog for vectors of length `dimension`.
    ///
    /// # Errors
    /// [`RetrievalError::ZeroDimension`] if `dimension == 0`.
    pub fn new(dimension: usize) -> Result<Self> {
        Ok(Self {
            index: FlatL2Index::new(dimension)?,
            table: MetadataTable::new(),
        })
    }

    /// Pair an index with a table, checking that they line up.
    pub fn from_parts(index: FlatL2Index, table: MetadataTable) -> Result<Self> {
        if index.len() != table.len() {
            return Err(RetrievalError::InconsistentCatalog {
                index_len: index.len(),
                table_len: table.len(),
            });
        }
        Ok(Self { index, table })
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.index.len(), self.table.len());
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index(&self) -> &FlatL2Index {
        &self.index
    }

    pub fn table(&self) -> &MetadataTable {
        &self.table
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.table.contains_filename(filename)
    }

    /// Add one image to both structures and return its position.
    ///
    /// The vector is validated before anything is written, so a rejected vector leaves
    /// the catalog unchanged.
    pub fn append(
        &mut self,
        filename: impl Into<String>,
        vector: Vec<f32>,
        caption: Option<String>,
    ) -> Result<usize> {
        let position = self.index.add(&vector)?;
        let row = self.table.append_row(filename, vector, caption);
        debug_assert_eq!(position, row);
        Ok(position)
    }

    pub fn row_at(&self, position: usize) -> Result<&MetadataRow> {
        self.table.row_at(position)
    }

    /// Nearest `k` images to `query`, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.index
            .search(query, k)?
            .into_iter()
            .map(|neighbor| -> Result<SearchHit> {
                let row = self.table.row_at(neighbor.position)?;
                Ok(SearchHit {
                    position: neighbor.position,
                    filename: row.filename.clone(),
                    caption: row.caption.clone(),
                    distance: neighbor.distance,
                })
            })
            .collect()
    }

    /// Persist index and table as a pair.
    pub fn save(&self, index_path: &Path, metadata_path: &Path) -> Result<()> {
        let index_tmp = persist::stage(index_path, &self.index.to_bytes()?)?;
        let table_tmp = persist::stage(metadata_path, &self.table.to_bytes()?)?;
        persist::commit(index_tmp, index_path)?;
        persist::commit(table_tmp, metadata_path)?;
        info!(
            "Saved catalog of {} images to {} and {}",
            self.len(),
            index_path.display(),
            metadata_path.display()
        );
        Ok(())
    }

    /// Load a pair written by [`save`](Self::save).
    pub fn load(index_path: &Path, metadata_path: &Path) -> Result<Self> {
        let table = MetadataTable::load(metadata_path)?;
        let index = FlatL2Index::load(index_path)?;
        let catalog = Self::from_parts(index, table)?;
        debug!("Catalog ready with {} images", catalog.len());
        Ok(catalog)
    }

    /// Load when both files exist, start empty when neither does.
    ///
    /// # Errors
    /// [`RetrievalError::IncompleteCatalog`] when only one of the two files exists. Nothing
    /// is created or overwritten in that case.
    pub fn load_or_new(index_path: &Path, metadata_path: &Path, dimension: usize) -> Result<Self> {
        match (index_path.exists(), metadata_path.exists()) {
            (true, true) => {
                let catalog = Self::load(index_path, metadata_path)?;
                if catalog.dimension() != dimension {
                    return Err(RetrievalError::DimensionMismatch {
                        expected: dimension,
                        actual: catalog.dimension(),
                    });
                }
                Ok(catalog)
            }
            (false, false) => Self::new(dimension),
            (true, false) => Err(RetrievalError::IncompleteCatalog {
                present: index_path.to_path_buf(),
                missing: metadata_path.to_path_buf(),
            }),
            (false, true) => Err(RetrievalError::IncompleteCatalog {
                present: metadata_path.to_path_buf(),
                missing: index_path.to_path_buf(),
            }),
        }
    }

    /// Replace the in-memory state with the pair on disk. On error `self` is unchanged.
    pub fn reload(&mut self, index_path: &Path, metadata_path: &Path) -> Result<()> {
        *self = Self::load(index_path, metadata_path)?;
        Ok(())
    }
}
