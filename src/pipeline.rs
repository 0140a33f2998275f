//! # Pipeline
//!
//! Drives ingestion (folder → vision service → catalog → disk) and queries
//! (text or image → vector → catalog search).
//!
//! ## Ingestion stages
//!
//! ```text
//! EMPTY → LISTING → PROCESSING → CONVERTED → PERSISTED
//! ```
//!
//! 1. **Listing**: image files of the folder, filtered by extension, sorted by file
//!    name and truncated to the configured limit.
//! 2. **Processing**: one image at a time, vectorize, caption, then append to the
//!    catalog. Images already in the catalog are skipped, which makes an interrupted
//!    run resumable. A failed caption only drops the caption, and a failed
//!    vectorization is recorded in the [`IngestReport`] before the loop moves on.
//!    With `abort_on_error` set, either failure ends the run instead.
//! 3. **Converted / Persisted**: the catalog is saved as an index/table pair.
//!
//! A fixed pause between images keeps the run under the service's rate limit.

use indicatif::{ProgressBar, ProgressStyle};
use std::{
    collections::HashSet,
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::catalog::{ImageCatalog, SearchHit};
use crate::config::IngestSettings;
use crate::error::Result;
use crate::vision::{Captioner, Embedder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Empty,
    Listing,
    Processing,
    Converted,
    Persisted,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Empty => "EMPTY",
            IngestStage::Listing => "LISTING",
            IngestStage::Processing => "PROCESSING",
            IngestStage::Converted => "CONVERTED",
            IngestStage::Persisted => "PERSISTED",
        };
        f.write_str(name)
    }
}

/// Per-run knobs, usually taken from [`IngestSettings`].
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub delay: Duration,
    pub limit: Option<usize>,
    pub extensions: Vec<String>,
    pub abort_on_error: bool,
    pub show_progress: bool,
}

impl From<&IngestSettings> for IngestOptions {
    fn from(settings: &IngestSettings) -> Self {
        Self {
            delay: settings.delay(),
            limit: settings.number_process_images,
            extensions: settings.extensions.clone(),
            abort_on_error: settings.abort_on_error,
            show_progress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFailure {
    pub filename: String,
    pub error: String,
}

/// What an ingestion run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Images appended to the catalog.
    pub succeeded: usize,
    /// Images already present in the catalog.
    pub skipped: usize,
    /// Images whose vectorization failed.
    pub failed: usize,
    /// Appended images that ended up without a caption.
    pub uncaptioned: usize,
    pub failures: Vec<ImageFailure>,
}

/// List image files in `dir`, sorted by file name.
///
/// Files whose extension is not in `extensions` (case-insensitive) are ignored, as are
/// subdirectories. At most `limit` paths are returned.
pub fn list_images(dir: &Path, extensions: &[String], limit: Option<usize>) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let recognised = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        if recognised {
            images.push(path);
        }
    }
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    if let Some(limit) = limit {
        images.truncate(limit);
    }
    Ok(images)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub struct Pipeline<E, C> {
    embedder: E,
    captioner: C,
    options: IngestOptions,
}

impl<E: Embedder, C: Captioner> Pipeline<E, C> {
    pub fn new(embedder: E, captioner: C, options: IngestOptions) -> Self {
        Self {
            embedder,
            captioner,
            options,
        }
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}") {
            bar.set_style(style);
        }
        bar
    }

    /// Run the listing and processing stages against `catalog`.
    ///
    /// The catalog is not written to disk; see [`ingest_and_save`](Self::ingest_and_save).
    ///
    /// # Errors
    /// Listing failures always abort. Per-image failures abort only with
    /// `abort_on_error`, leaving the already appended images in `catalog`.
    pub async fn ingest(&self, catalog: &mut ImageCatalog, dir: &Path) -> Result<IngestReport> {
        info!("Ingest stage {} -> {}", IngestStage::Empty, IngestStage::Listing);
        let images = list_images(dir, &self.options.extensions, self.options.limit)?;
        info!("Found {} images in {}", images.len(), dir.display());

        info!("Ingest stage {} -> {}", IngestStage::Listing, IngestStage::Processing);
        let mut report = IngestReport::default();
        let bar = self.progress_bar(images.len());
        let mut sent_any = false;
        let mut indexed: HashSet<String> = catalog
            .table()
            .rows()
            .iter()
            .map(|row| row.filename.clone())
            .collect();

        for path in &images {
            let filename = file_name_of(path);
            bar.set_message(filename.clone());

            if indexed.contains(&filename) {
                debug!("{filename} already indexed, skipping");
                report.skipped += 1;
                bar.inc(1);
                continue;
            }

            if sent_any && !self.options.delay.is_zero() {
                tokio::time::sleep(self.options.delay).await;
            }
            sent_any = true;

            let appended = self.process_image(catalog, path, &filename).await;
            bar.inc(1);
            match appended {
                Ok(captioned) => {
                    indexed.insert(filename);
                    report.succeeded += 1;
                    if !captioned {
                        report.uncaptioned += 1;
                    }
                }
                Err(e) if self.options.abort_on_error => {
                    bar.abandon();
                    warn!("Aborting ingestion at {filename}: {e}");
                    return Err(e);
                }
                Err(e) => {
                    warn!("Failed to ingest {filename}: {e}");
                    report.failed += 1;
                    report.failures.push(ImageFailure {
                        filename,
                        error: e.to_string(),
                    });
                }
            }
        }
        bar.finish_and_clear();

        info!(
            "Ingest stage {} -> {}: {} succeeded, {} skipped, {} failed",
            IngestStage::Processing,
            IngestStage::Converted,
            report.succeeded,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    /// Vectorize and caption one image, then append it. Returns whether a caption was
    /// obtained.
    async fn process_image(
        &self,
        catalog: &mut ImageCatalog,
        path: &Path,
        filename: &str,
    ) -> Result<bool> {
        let vector = self.embedder.vectorize_image(path).await?;
        let caption = match self.captioner.describe_image(path).await {
            Ok(result) => {
                if result.caption_text.is_none() {
                    warn!("No caption returned for {filename}");
                }
                result.caption_text
            }
            Err(e) if self.options.abort_on_error => return Err(e),
            Err(e) => {
                warn!("Captioning {filename} failed, storing it without caption: {e}");
                None
            }
        };
        let captioned = caption.is_some();
        let position = catalog.append(filename, vector, caption)?;
        debug!("{filename} stored at position {position}");
        Ok(captioned)
    }

    /// [`ingest`](Self::ingest) followed by saving the catalog.
    pub async fn ingest_and_save(
        &self,
        catalog: &mut ImageCatalog,
        dir: &Path,
        index_path: &Path,
        metadata_path: &Path,
    ) -> Result<IngestReport> {
        let report = self.ingest(catalog, dir).await?;
        catalog.save(index_path, metadata_path)?;
        info!("Ingest stage {} -> {}", IngestStage::Converted, IngestStage::Persisted);
        Ok(report)
    }

    /// Top `k` images for a free-text query.
    pub async fn query_by_text(
        &self,
        catalog: &ImageCatalog,
        text: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let vector = self.embedder.vectorize_text(text).await?;
        debug!("Searching {} images for {text:?}", catalog.len());
        catalog.search(&vector, k)
    }

    /// Top `k` images visually closest to the image at `path`.
    pub async fn query_by_image(
        &self,
        catalog: &ImageCatalog,
        path: &Path,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let vector = self.embedder.vectorize_image(path).await?;
        debug!("Searching {} images for {}", catalog.len(), path.display());
        catalog.search(&vector, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetrievalError;
    use crate::vision::CaptionResult;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeEmbedder {
        images: HashMap<String, Vec<f32>>,
        texts: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
    }

    impl Embedder for FakeEmbedder {
        async fn vectorize_image(&self, path: &Path) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.images
                .get(&file_name_of(path))
                .cloned()
                .ok_or_else(|| RetrievalError::remote("vectorizeImage", "HTTP 429"))
        }

        async fn vectorize_text(&self, text: &str) -> Result<Vec<f32>> {
            self.texts
                .get(text)
                .cloned()
                .ok_or_else(|| RetrievalError::remote("vectorizeText", "HTTP 503"))
        }
    }

    #[derive(Default)]
    struct FakeCaptioner {
        failing: HashSet<String>,
    }

    impl Captioner for FakeCaptioner {
        async fn describe_image(&self, path: &Path) -> Result<CaptionResult> {
            let name = file_name_of(path);
            if self.failing.contains(&name) {
                return Err(RetrievalError::remote("analyze", "HTTP 500"));
            }
            let stem = name.trim_end_matches(".jpg").to_string();
            Ok(CaptionResult::from_analysis(
                serde_json::json!({ "captionResult": { "text": stem, "confidence": 0.9 } }),
            ))
        }
    }

    fn options() -> IngestOptions {
        IngestOptions {
            delay: Duration::ZERO,
            limit: None,
            extensions: vec!["jpg".into(), "png".into()],
            abort_on_error: false,
            show_progress: false,
        }
    }

    fn folder(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            fs::write(dir.path().join(name), b"img").unwrap();
        }
        dir
    }

    fn embedder() -> FakeEmbedder {
        FakeEmbedder {
            images: HashMap::from([
                ("a.jpg".to_string(), vec![1.0, 0.0]),
                ("b.jpg".to_string(), vec![0.0, 1.0]),
                ("c.jpg".to_string(), vec![1.0, 1.0]),
            ]),
            texts: HashMap::from([("east".to_string(), vec![1.0, 0.0])]),
            calls: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_list_images_filters_sorts_and_limits() {
        let dir = folder(&["c.jpg", "a.JPG", "notes.txt", "b.png", "d.jpg"]);
        fs::create_dir(dir.path().join("sub.jpg")).unwrap();

        let all = list_images(dir.path(), &options().extensions, None).unwrap();
        let names: Vec<String> = all.iter().map(|p| file_name_of(p)).collect();
        assert_eq!(names, vec!["a.JPG", "b.png", "c.jpg", "d.jpg"]);

        let first_two = list_images(dir.path(), &options().extensions, Some(2)).unwrap();
        assert_eq!(first_two.len(), 2);
    }

    #[tokio::test]
    async fn test_ingest_then_query_by_text() {
        let dir = folder(&["c.jpg", "a.jpg", "b.jpg", "readme.md"]);
        let pipeline = Pipeline::new(embedder(), FakeCaptioner::default(), options());
        let mut catalog = ImageCatalog::new(2).unwrap();

        let report = pipeline.ingest(&mut catalog, dir.path()).await.unwrap();
        assert_eq!((report.succeeded, report.skipped, report.failed), (3, 0, 0));
        assert_eq!(catalog.index().len(), 3);
        assert_eq!(catalog.table().len(), 3);

        let hits = pipeline.query_by_text(&catalog, "east", 2).await.unwrap();
        let summary: Vec<(usize, &str, Option<&str>, f32)> = hits
            .iter()
            .map(|h| (h.position, h.filename.as_str(), h.caption.as_deref(), h.distance))
            .collect();
        assert_eq!(
            summary,
            vec![(0, "a.jpg", Some("a"), 0.0), (2, "c.jpg", Some("c"), 1.0)]
        );
    }

    #[tokio::test]
    async fn test_caption_failure_stores_row_without_caption() {
        let dir = folder(&["a.jpg", "b.jpg", "c.jpg"]);
        let captioner = FakeCaptioner {
            failing: HashSet::from(["b.jpg".to_string()]),
        };
        let pipeline = Pipeline::new(embedder(), captioner, options());
        let mut catalog = ImageCatalog::new(2).unwrap();

        let report = pipeline.ingest(&mut catalog, dir.path()).await.unwrap();
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.uncaptioned, 1);
        assert_eq!(catalog.row_at(1).unwrap().caption, None);
        assert_eq!(catalog.row_at(2).unwrap().caption.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_embedding_failure_is_recorded_and_skipped() {
        let dir = folder(&["a.jpg", "broken.jpg", "c.jpg"]);
        let pipeline = Pipeline::new(embedder(), FakeCaptioner::default(), options());
        let mut catalog = ImageCatalog::new(2).unwrap();

        let report = pipeline.ingest(&mut catalog, dir.path()).await.unwrap();
        assert_eq!((report.succeeded, report.skipped, report.failed), (2, 0, 1));
        assert_eq!(report.failures[0].filename, "broken.jpg");
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.row_at(1).unwrap().filename, "c.jpg");
    }

    #[tokio::test]
    async fn test_abort_on_error_stops_the_run() {
        let dir = folder(&["a.jpg", "broken.jpg", "c.jpg"]);
        let pipeline = Pipeline::new(
            embedder(),
            FakeCaptioner::default(),
            IngestOptions {
                abort_on_error: true,
                ..options()
            },
        );
        let mut catalog = ImageCatalog::new(2).unwrap();

        let err = pipeline.ingest(&mut catalog, dir.path()).await.unwrap_err();
        assert!(err.is_remote());
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn test_caption_failure_aborts_with_abort_on_error() {
        let dir = folder(&["a.jpg", "b.jpg", "c.jpg"]);
        let captioner = FakeCaptioner {
            failing: HashSet::from(["b.jpg".to_string()]),
        };
        let pipeline = Pipeline::new(
            embedder(),
            captioner,
            IngestOptions {
                abort_on_error: true,
                ..options()
            },
        );
        let mut catalog = ImageCatalog::new(2).unwrap();

        let err = pipeline.ingest(&mut catalog, dir.path()).await.unwrap_err();
        assert!(err.is_remote());
        assert_eq!(catalog.len(), 1);
        assert!(!catalog.contains("b.jpg"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_only_between_sent_images() {
        let dir = folder(&["a.jpg", "b.jpg", "c.jpg", "d.jpg"]);
        let mut embedder = embedder();
        embedder.images.insert("d.jpg".to_string(), vec![2.0, 2.0]);
        let delay = Duration::from_millis(100);
        let pipeline = Pipeline::new(
            embedder,
            FakeCaptioner::default(),
            IngestOptions {
                delay,
                ..options()
            },
        );
        let mut catalog = ImageCatalog::new(2).unwrap();
        catalog.append("b.jpg", vec![0.0, 1.0], None).unwrap();

        let started = tokio::time::Instant::now();
        let report = pipeline.ingest(&mut catalog, dir.path()).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!((report.succeeded, report.skipped, report.failed), (3, 1, 0));
        assert_eq!(pipeline.embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(elapsed, delay * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_image_waits_nothing() {
        let dir = folder(&["a.jpg"]);
        let pipeline = Pipeline::new(
            embedder(),
            FakeCaptioner::default(),
            IngestOptions {
                delay: Duration::from_secs(3),
                ..options()
            },
        );
        let mut catalog = ImageCatalog::new(2).unwrap();

        let started = tokio::time::Instant::now();
        pipeline.ingest(&mut catalog, dir.path()).await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_preloaded_catalog_entries_are_skipped() {
        let dir = folder(&["a.jpg", "b.jpg", "c.jpg"]);
        let pipeline = Pipeline::new(embedder(), FakeCaptioner::default(), options());
        let mut catalog = ImageCatalog::new(2).unwrap();
        catalog.append("a.jpg", vec![1.0, 0.0], Some("a".into())).unwrap();
        catalog.append("c.jpg", vec![1.0, 1.0], Some("c".into())).unwrap();

        let report = pipeline.ingest(&mut catalog, dir.path()).await.unwrap();
        assert_eq!((report.succeeded, report.skipped), (1, 2));
        assert_eq!(pipeline.embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.row_at(2).unwrap().filename, "b.jpg");
    }

    #[tokio::test]
    async fn test_second_run_skips_indexed_images() {
        let dir = folder(&["a.jpg", "b.jpg", "c.jpg"]);
        let pipeline = Pipeline::new(embedder(), FakeCaptioner::default(), options());
        let mut catalog = ImageCatalog::new(2).unwrap();

        pipeline.ingest(&mut catalog, dir.path()).await.unwrap();
        let report = pipeline.ingest(&mut catalog, dir.path()).await.unwrap();
        assert_eq!((report.succeeded, report.skipped, report.failed), (0, 3, 0));
        assert_eq!(pipeline.embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(catalog.len(), 3);
    }

    #[tokio::test]
    async fn test_ingest_and_save_persists_aligned_pair() {
        let dir = folder(&["a.jpg", "b.jpg", "c.jpg"]);
        let out = tempfile::tempdir().unwrap();
        let (ip, mp) = (out.path().join("i.bin"), out.path().join("m.bin"));
        let pipeline = Pipeline::new(embedder(), FakeCaptioner::default(), options());
        let mut catalog = ImageCatalog::new(2).unwrap();

        pipeline
            .ingest_and_save(&mut catalog, dir.path(), &ip, &mp)
            .await
            .unwrap();

        let loaded = ImageCatalog::load(&ip, &mp).unwrap();
        assert_eq!(loaded.index().len(), 3);
        assert_eq!(loaded.table().len(), 3);
        assert_eq!(loaded, catalog);
    }

    #[tokio::test]
    async fn test_query_on_empty_catalog_is_empty() {
        let pipeline = Pipeline::new(embedder(), FakeCaptioner::default(), options());
        let hits = pipeline
            .query_by_text(&ImageCatalog::new(2).unwrap(), "east", 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_query_vectorization_failure_is_remote_error() {
        let pipeline = Pipeline::new(embedder(), FakeCaptioner::default(), options());
        let err = pipeline
            .query_by_text(&ImageCatalog::new(2).unwrap(), "unknown words", 5)
            .await
            .unwrap_err();
        assert!(err.is_remote());
    }

    #[tokio::test]
    async fn test_query_by_image() {
        let dir = folder(&["a.jpg", "b.jpg", "c.jpg"]);
        let pipeline = Pipeline::new(embedder(), FakeCaptioner::default(), options());
        let mut catalog = ImageCatalog::new(2).unwrap();
        pipeline.ingest(&mut catalog, dir.path()).await.unwrap();

        let hits = pipeline
            .query_by_image(&catalog, &dir.path().join("b.jpg"), 1)
            .await
            .unwrap();
        assert_eq!(hits[0].filename, "b.jpg");
        assert_eq!(hits[0].distance, 0.0);
    }
}
