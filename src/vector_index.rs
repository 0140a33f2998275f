//! # Flat L2 index
//!
//! Exact nearest-neighbour index over fixed-length `f32` vectors. Vectors are kept in one
//! contiguous buffer in insertion order; entry `i` is the `i`-th vector ever added. Search
//! is an exhaustive scan with squared Euclidean distance, so results are exact and
//! deterministic: ascending by distance, ties resolved by the lower position.
//!
//! There is no removal or update. The index only grows.
//!
//! ## Quick Example
//! ```
//! use image_retrieval::vector_index::FlatL2Index;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut index = FlatL2Index::new(2)?;
//! index.add(&[1.0, 0.0])?;
//! index.add(&[0.0, 1.0])?;
//! index.add(&[1.0, 1.0])?;
//!
//! let hits = index.search(&[1.0, 0.0], 2)?;
//! assert_eq!(hits[0].position, 0);
//! assert_eq!(hits[1].position, 2);
//! assert_eq!(hits[1].distance, 1.0);
//! # Ok(()) }
//! ```

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::debug;

use crate::error::{Result, RetrievalError};
use crate::persist;

const INDEX_MAGIC: [u8; 4] = *b"IRIX";

/// A single search result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Insertion position of the matched vector.
    pub position: usize,
    /// Squared Euclidean distance to the query.
    pub distance: f32,
}

/// Exhaustive L2 index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatL2Index {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    /// Create an empty index for vectors of length `dimension`.
    ///
    /// # Errors
    /// [`RetrievalError::ZeroDimension`] if `dimension == 0`.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RetrievalError::ZeroDimension);
        }
        Ok(Self {
            dimension,
            data: Vec::new(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a vector and return its position.
    ///
    /// # Errors
    /// [`RetrievalError::DimensionMismatch`] if `vector.len() != dimension`.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize> {
        self.check_dimension(vector)?;
        let position = self.len();
        self.data.extend_from_slice(vector);
        Ok(position)
    }

    /// The vector stored at `position`, if any.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        let end = start.checked_add(self.dimension)?;
        self.data.get(start..end)
    }

    /// Iterate over stored vectors in insertion order.
    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.max(1))
    }

    /// Return up to `k` nearest entries to `query`, nearest first.
    ///
    /// An empty index, or `k == 0`, yields an empty result.
    ///
    /// # Errors
    /// [`RetrievalError::DimensionMismatch`] if the query has the wrong length.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check_dimension(query)?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Neighbor> = self
            .vectors()
            .enumerate()
            .map(|(position, v)| Neighbor {
                position,
                distance: squared_l2(query, v),
            })
            .collect();

        // Stable sort keeps insertion order among equal distances.
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);
        Ok(scored)
    }

    /// Serialize the complete index state.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        persist::encode(INDEX_MAGIC, self).map_err(|e| std::io::Error::other(e).into())
    }

    /// Rebuild an index from [`to_bytes`](Self::to_bytes) output. `origin` is only used
    /// in error messages.
    pub fn from_bytes(bytes: &[u8], origin: &Path) -> Result<Self> {
        let corrupt = |reason: String| RetrievalError::CorruptIndex {
            path: origin.to_path_buf(),
            reason,
        };
        let index: FlatL2Index = persist::decode(INDEX_MAGIC, bytes).map_err(corrupt)?;
        if index.dimension == 0 {
            return Err(corrupt("dimension is zero".into()));
        }
        if index.data.len() % index.dimension != 0 {
            return Err(corrupt(format!(
                "{} values do not divide into vectors of length {}",
                index.data.len(),
                index.dimension
            )));
        }
        Ok(index)
    }

    /// Write the index to `path`, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        let tmp = persist::stage(path, &bytes)?;
        persist::commit(tmp, path)?;
        debug!("Saved {} vectors to {}", self.len(), path.display());
        Ok(())
    }

    /// Load an index previously written by [`save`](Self::save).
    ///
    /// # Errors
    /// - [`RetrievalError::Io`] if the file cannot be read.
    /// - [`RetrievalError::CorruptIndex`] if its content is not a valid index.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let index = Self::from_bytes(&bytes, path)?;
        debug!("Loaded {} vectors from {}", index.len(), path.display());
        Ok(index)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Squared Euclidean distance between two equal-length vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
