//! # Errors
//!
//! Every fallible operation in the crate returns [`Result<T>`], whose error side is
//! [`RetrievalError`]. The variants follow the failure domains of the system:
//!
//! | Variant | Raised by | Typical handling |
//! |---------|-----------|------------------|
//! | [`Config`](RetrievalError::Config) | [`crate::config::load_config`] | fatal at startup |
//! | [`RemoteService`](RetrievalError::RemoteService) | [`crate::vision`] | record and continue during ingestion, fatal for queries |
//! | [`CorruptIndex`](RetrievalError::CorruptIndex) / [`CorruptTable`](RetrievalError::CorruptTable) | `load` of persisted blobs | fatal, no repair |
//! | [`OutOfRange`](RetrievalError::OutOfRange) | [`crate::metadata::MetadataTable::row_at`] | programmer error |
//! | [`DimensionMismatch`](RetrievalError::DimensionMismatch) | index appends and searches | rejects the vector |
//! | [`ZeroDimension`](RetrievalError::ZeroDimension) | index and catalog construction | programmer or config error |
//! | [`InconsistentCatalog`](RetrievalError::InconsistentCatalog) / [`IncompleteCatalog`](RetrievalError::IncompleteCatalog) | catalog load | fatal, files left untouched |

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("remote service error ({operation}): {message}")]
    RemoteService {
        operation: &'static str,
        message: String,
    },

    #[error("corrupt index blob at {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("corrupt metadata table at {path}: {reason}")]
    CorruptTable { path: PathBuf, reason: String },

    #[error("position {position} out of range (table has {len} rows)")]
    OutOfRange { position: usize, len: usize },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector dimension must be greater than zero")]
    ZeroDimension,

    #[error("index has {index_len} entries but metadata table has {table_len} rows")]
    InconsistentCatalog { index_len: usize, table_len: usize },

    #[error("found {present} but not its counterpart {missing}")]
    IncompleteCatalog { present: PathBuf, missing: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RetrievalError {
    pub(crate) fn remote(operation: &'static str, message: impl ToString) -> Self {
        RetrievalError::RemoteService {
            operation,
            message: message.to_string(),
        }
    }

    /// `true` for failures that come from talking to the vision service.
    pub fn is_remote(&self) -> bool {
        matches!(self, RetrievalError::RemoteService { .. })
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
