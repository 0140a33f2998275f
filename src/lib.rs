//! # image_retrieval (library root)
//!
//! Text-to-image and image-to-image search over a local photo folder, backed by a cloud
//! vision service:
//!
//! - Cloud vision bindings and the [`vision::Embedder`] / [`vision::Captioner`] seams (`vision`).
//! - Exact L2 nearest-neighbour index (`vector_index`).
//! - Position-aligned per-image metadata (`metadata`).
//! - The index + table pair and its persistence (`catalog`, `persist`).
//! - Ingestion and query orchestration (`pipeline`).
//! - Configuration, errors, CLI parsing and terminal output (`config`, `error`,
//!   `commands`, `pretty`).
//!
//! ## Data flow
//!
//! ```text
//! images/ ──► vectorize + caption ──► ImageCatalog::append ──► save(index, table)
//! "a dog" ──► vectorize text ──► FlatL2Index::search ──► MetadataTable rows
//! ```
//!
//! ## Modules
//! - [`catalog`], [`commands`], [`config`], [`error`], [`metadata`], [`pipeline`],
//!   [`pretty`], [`vector_index`], [`vision`]

use directories::ProjectDirs;
use std::error::Error;

pub mod catalog;
pub mod commands;
pub mod config;
pub mod error;
pub mod metadata;
mod persist;
pub mod pipeline;
pub mod pretty;
pub mod vector_index;
pub mod vision;

pub use catalog::{ImageCatalog, SearchHit};
pub use error::{Result, RetrievalError};

/// Return the per-platform configuration directory used by `imret`.
///
/// The directory is **not** created by this function.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined.
///
/// # Examples
/// ```no_run
/// let cfg = image_retrieval::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> std::result::Result<std::path::PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "image-retrieval", "imret")
        .ok_or("Unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
