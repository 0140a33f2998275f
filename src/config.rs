//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the [`RetrievalConfig`] struct, which holds every setting the pipeline needs,
//! and a [`load_config`] function to load it from a YAML file. The configuration is loaded
//! once at startup and then passed by reference to the constructors that need it; nothing
//! in the crate keeps it in a global.
//!
//! # File layout
//!
//! Keys inside each section are upper-case, matching the `config.yml` files the photo
//! download scripts already use:
//!
//! ```yaml
//! flickr:
//!   API_KEY: "..."
//!   API_SECRET: "..."
//!   NUMBER_OF_IMAGES: 100
//! azure:
//!   ENDPOINT: "https://my-vision.cognitiveservices.azure.com"
//!   KEY: "..."
//! index:
//!   DIMENSION: 1024
//!   RESULT_COUNT: 5
//!   INDEX_PATH: "image_index.bin"
//!   METADATA_PATH: "image_metadata.bin"
//! ingest:
//!   IMAGES_DIR: "downloaded_images"
//!   NUMBER_PROCESS_IMAGES: 50
//!   DELAY_MS: 3000
//! ```
//!
//! Only `azure` is required; `index` and `ingest` fall back to defaults and `flickr` is
//! carried for the external downloader.
//!
//! # Examples
//!
//! ```no_run
//! use image_retrieval::config::load_config;
//!
//! let config = load_config("config.yml").unwrap();
//! println!("{:?}", config.index.dimension);
//! ```

use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};
use tracing::debug;

use crate::error::{Result, RetrievalError};

/// Represents the application's configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct RetrievalConfig {
    /// Photo host credentials. Consumed by the downloader, not by this crate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flickr: Option<FlickrSettings>,

    /// Cloud vision endpoint and key.
    pub azure: AzureSettings,

    #[serde(default)]
    pub index: IndexSettings,

    #[serde(default)]
    pub ingest: IngestSettings,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FlickrSettings {
    pub api_key: String,
    pub api_secret: String,
    #[serde(default)]
    pub number_of_images: usize,
}

/// Settings for the cloud vision service.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AzureSettings {
    /// Base URL of the vision resource, without a trailing path.
    pub endpoint: String,

    /// Subscription key sent as `Ocp-Apim-Subscription-Key`.
    pub key: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_model_version")]
    pub model_version: String,

    // Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Settings for the vector index and its metadata table.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct IndexSettings {
    /// Length of every embedding vector.
    pub dimension: usize,

    /// Number of results returned by a query when none is given.
    pub result_count: usize,

    pub index_path: PathBuf,

    pub metadata_path: PathBuf,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            dimension: 1024,
            result_count: 5,
            index_path: PathBuf::from("image_index.bin"),
            metadata_path: PathBuf::from("image_metadata.bin"),
        }
    }
}

/// Settings for the ingestion loop.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct IngestSettings {
    /// Folder scanned for images.
    pub images_dir: PathBuf,

    /// Upper bound on images processed per run. `None` processes everything.
    pub number_process_images: Option<usize>,

    /// Pause between two images, to stay under the service's rate limit.
    pub delay_ms: u64,

    /// Stop the whole run on the first failed image instead of recording it.
    pub abort_on_error: bool,

    /// Recognised file extensions, compared case-insensitively.
    pub extensions: Vec<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("downloaded_images"),
            number_process_images: None,
            delay_ms: 3000,
            abort_on_error: false,
            extensions: vec!["jpg".into(), "jpeg".into(), "png".into()],
        }
    }
}

impl IngestSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

fn default_api_version() -> String {
    "2023-02-01-preview".to_string()
}

fn default_model_version() -> String {
    "latest".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl RetrievalConfig {
    /// Build a configuration with default index/ingest sections.
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            flickr: None,
            azure: AzureSettings {
                endpoint: endpoint.into(),
                key: key.into(),
                api_version: default_api_version(),
                model_version: default_model_version(),
                timeout_secs: default_timeout_secs(),
            },
            index: IndexSettings::default(),
            ingest: IngestSettings::default(),
        }
    }

    /// Check the values serde cannot check on its own.
    pub fn validate(&self) -> Result<()> {
        if self.azure.endpoint.trim().is_empty() {
            return Err(RetrievalError::Config("azure.ENDPOINT is empty".into()));
        }
        if self.index.dimension == 0 {
            return Err(RetrievalError::Config(
                "index.DIMENSION must be greater than zero".into(),
            ));
        }
        if self.index.result_count == 0 {
            return Err(RetrievalError::Config(
                "index.RESULT_COUNT must be greater than zero".into(),
            ));
        }
        if self.ingest.extensions.is_empty() {
            return Err(RetrievalError::Config(
                "ingest.EXTENSIONS must list at least one extension".into(),
            ));
        }
        Ok(())
    }
}

/// Loads the application's configuration from a YAML file.
///
/// Reads the file at `file`, parses it as YAML and validates the result.
///
/// # Errors
///
/// [`RetrievalError::Config`] when the file is missing, unreadable, malformed, or
/// holds invalid values.
pub fn load_config(file: impl Into<PathBuf>) -> Result<RetrievalConfig> {
    let file = file.into();
    debug!("Loading config from: {}", file.display());
    let content = fs::read_to_string(&file).map_err(|e| {
        RetrievalError::Config(format!("cannot read {}: {e}", file.display()))
    })?;
    let config: RetrievalConfig = serde_yaml::from_str(&content).map_err(|e| {
        RetrievalError::Config(format!("cannot parse {}: {e}", file.display()))
    })?;
    config.validate()?;
    Ok(config)
}
