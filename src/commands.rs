//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a [`Cli`] struct that represents the parsed command-line arguments,
//! and a [`Commands`] enum for the available subcommands.
//!
//! # Examples
//!
//! ```sh
//! imret init
//! imret ingest --dir downloaded_images --limit 50
//! imret query "a dog running on the beach" -k 3
//! imret query-image photos/query.jpg
//! imret show 12
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Auto)]
pub struct Cli {
    /// Path to the YAML configuration. Defaults to `config.yaml` in the config directory.
    #[arg(short = 'c', long, global = true, env = "IMRET_CONFIG")]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a template configuration file.
    Init,

    /// Send every image of a folder to the vision service and store the results.
    #[clap(name = "ingest", alias = "i")]
    Ingest {
        /// Folder to scan. Overrides `ingest.IMAGES_DIR`.
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Maximum number of images. Overrides `ingest.NUMBER_PROCESS_IMAGES`.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Stop at the first image that fails.
        #[arg(long)]
        abort_on_error: bool,
    },

    /// Search the catalog with a text description.
    #[clap(name = "query", alias = "q")]
    Query {
        text: String,

        /// Number of results. Defaults to `index.RESULT_COUNT`.
        #[arg(short)]
        k: Option<usize>,
    },

    /// Search the catalog with an image.
    #[clap(name = "query-image", alias = "qi")]
    QueryImage {
        path: PathBuf,

        #[arg(short)]
        k: Option<usize>,
    },

    /// Print the stored row at a position.
    Show { position: usize },

    /// Print the size of the stored catalog.
    Stats,
}
