//! Main module for the image retrieval CLI (`imret`).
//!
//! Parses the command line, loads the configuration, loads the persisted catalog and
//! runs the requested command.
//!
//! # Examples
//!
//! ```sh
//! imret init
//! imret ingest
//! imret query "a dog running on the beach"
//! ```

use clap::Parser;
use image_retrieval::{
    ImageCatalog,
    commands::{Cli, Commands},
    config::{RetrievalConfig, load_config},
    config_dir,
    pipeline::{IngestOptions, Pipeline},
    pretty,
    vision::VisionClient,
};
use once_cell::sync::OnceCell;
use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

fn default_config_path() -> Result<PathBuf, Box<dyn Error>> {
    Ok(config_dir()?.join("config.yaml"))
}

/// Parses the command line and dispatches the command.
///
/// # Errors
///
/// Configuration, catalog and vision service errors are returned as-is; `main` turns
/// them into a non-zero exit.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };

    match cli.command {
        Commands::Init => init(&config_path),
        Commands::Ingest {
            dir,
            limit,
            abort_on_error,
        } => ingest(&config_path, dir, limit, abort_on_error).await,
        Commands::Query { text, k } => {
            let (config, pipeline) = vision_pipeline(&config_path)?;
            let catalog = load_catalog(&config)?;
            let hits = pipeline
                .query_by_text(&catalog, &text, k.unwrap_or(config.index.result_count))
                .await?;
            pretty::print_hits(&hits)?;
            Ok(())
        }
        Commands::QueryImage { path, k } => {
            let (config, pipeline) = vision_pipeline(&config_path)?;
            let catalog = load_catalog(&config)?;
            let hits = pipeline
                .query_by_image(&catalog, &path, k.unwrap_or(config.index.result_count))
                .await?;
            pretty::print_hits(&hits)?;
            Ok(())
        }
        Commands::Show { position } => {
            let catalog = load_catalog(&load_config(&config_path)?)?;
            pretty::print_row(catalog.row_at(position)?)?;
            Ok(())
        }
        Commands::Stats => stats(&load_config(&config_path)?),
    }
}

fn load_catalog(config: &RetrievalConfig) -> Result<ImageCatalog, Box<dyn Error>> {
    Ok(ImageCatalog::load(
        &config.index.index_path,
        &config.index.metadata_path,
    )?)
}

/// Load the config and build a pipeline backed by the vision service.
fn vision_pipeline(
    config_path: &Path,
) -> Result<(RetrievalConfig, Pipeline<VisionClient, VisionClient>), Box<dyn Error>> {
    debug!("Loading config from: {}", config_path.display());
    let config = load_config(config_path)?;
    let client = VisionClient::new(&config.azure, config.index.dimension)?;
    let options = IngestOptions::from(&config.ingest);
    Ok((config, Pipeline::new(client.clone(), client, options)))
}

async fn ingest(
    config_path: &Path,
    dir: Option<PathBuf>,
    limit: Option<usize>,
    abort_on_error: bool,
) -> Result<(), Box<dyn Error>> {
    debug!("Loading config from: {}", config_path.display());
    let config = load_config(config_path)?;
    let index = &config.index;
    let client = VisionClient::new(&config.azure, index.dimension)?;

    let mut options = IngestOptions::from(&config.ingest);
    if limit.is_some() {
        options.limit = limit;
    }
    options.abort_on_error |= abort_on_error;
    let dir = dir.unwrap_or_else(|| config.ingest.images_dir.clone());

    let mut catalog =
        ImageCatalog::load_or_new(&index.index_path, &index.metadata_path, index.dimension)?;
    info!("Starting ingestion of {} ({} images indexed)", dir.display(), catalog.len());
    let pipeline = Pipeline::new(client.clone(), client, options);
    let report = pipeline
        .ingest_and_save(&mut catalog, &dir, &index.index_path, &index.metadata_path)
        .await?;
    pretty::print_report(&report)?;
    Ok(())
}

fn stats(config: &RetrievalConfig) -> Result<(), Box<dyn Error>> {
    let catalog = load_catalog(config)?;
    let captioned = catalog
        .table()
        .rows()
        .iter()
        .filter(|row| row.caption.is_some())
        .count();
    println!(
        "{} images, {} with caption, dimension {}",
        catalog.len(),
        captioned,
        catalog.dimension()
    );
    Ok(())
}

/// Write a template configuration to `config_path` unless one already exists.
fn init(config_path: &Path) -> Result<(), Box<dyn Error>> {
    if config_path.exists() {
        info!("Config already present at {}", config_path.display());
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    info!("Creating config file: {}", config_path.display());
    let config = RetrievalConfig::new("https://<resource>.cognitiveservices.azure.com", "CHANGEME");
    let config_yaml = serde_yaml::to_string(&config)?;
    fs::write(config_path, config_yaml)?;
    println!("Wrote {}", config_path.display());
    Ok(())
}
