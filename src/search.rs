//! Photo lookup: find catalog items that look like an uploaded photo.
//!
//! A search tries image embeddings first and falls back to perceptual hashes
//! when the model is unavailable, the upload cannot be embedded, or nothing
//! clears the similarity threshold. The two passes never interleave. The
//! uploaded file is deleted when the search ends, however it ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::Instrument;

use crate::cache::EmbeddingCache;
use crate::config::Config;
use crate::corpus::{CatalogEntry, ImageId, ImageRef};
use crate::errors::SearchError;
use crate::extractor::{EmbeddingExtractor, ExtractorState};
use crate::matcher::{cached_embedding, ranked_ids, HashMatcher, SemanticMatcher};

/// Which matcher produced a search answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    Semantic,
    Hash,
    /// Semantic pass found nothing and hashing is switched off.
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchOutcome {
    /// Catalog ids, best match first
    pub ids: Vec<ImageId>,
    pub strategy: Strategy,
}

pub struct SearchService {
    extractor: Arc<EmbeddingExtractor>,
    cache: Arc<EmbeddingCache>,
    semantic: SemanticMatcher,
    hash: Option<HashMatcher>,
    max_results: Option<usize>,
}

impl SearchService {
    pub fn new(config: &Config, extractor: Arc<EmbeddingExtractor>) -> Self {
        let hash = config
            .hash
            .enabled
            .then(|| HashMatcher::new(config.hash.hash_size, config.hash.max_distance));

        Self {
            extractor,
            cache: Arc::new(EmbeddingCache::new()),
            semantic: SemanticMatcher::new(config.semantic.threshold),
            hash,
            max_results: config.max_results,
        }
    }

    /// Service backed by the process-wide extractor, with models cached under
    /// the config's base directory.
    pub fn from_config(config: &Config) -> Self {
        let extractor =
            EmbeddingExtractor::shared(&config.semantic, config.base_path().to_path_buf());
        Self::new(config, extractor)
    }

    /// Share an embedding cache between services.
    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    pub fn extractor(&self) -> &EmbeddingExtractor {
        &self.extractor
    }

    /// Load the model now and embed the corpus into the cache, so the first
    /// real search does not pay for it. Returns how many corpus images have a
    /// cached vector afterwards.
    pub async fn warm_up(&self, corpus: &[CatalogEntry]) -> usize {
        let ExtractorState::Available(embedder) = self.extractor.state().await else {
            return 0;
        };

        let mut cached = 0;
        for image in ImageRef::from_catalog(corpus) {
            if cached_embedding(embedder, &self.cache, image.path()).await.is_some() {
                cached += 1;
            }
        }
        log::info!("Warmed embedding cache with {cached} images");
        cached
    }

    /// Ids of catalog items resembling the photo at `uploaded`, best first.
    /// The upload is deleted before this returns.
    pub async fn search_by_photo(
        &self,
        uploaded: impl AsRef<Path>,
        corpus: &[CatalogEntry],
    ) -> Result<Vec<ImageId>, SearchError> {
        self.search_by_photo_detailed(uploaded, corpus)
            .await
            .map(|outcome| outcome.ids)
    }

    /// Same as `search_by_photo()` but also reports which strategy answered.
    pub async fn search_by_photo_detailed(
        &self,
        uploaded: impl AsRef<Path>,
        corpus: &[CatalogEntry],
    ) -> Result<SearchOutcome, SearchError> {
        let upload = UploadGuard::new(uploaded.as_ref());
        let span = tracing::info_span!("search_by_photo", upload = %upload.path().display());

        let result = self.run(upload.path(), corpus).instrument(span).await;
        upload.cleanup().await;

        result.map(|mut outcome| {
            if let Some(limit) = self.max_results {
                outcome.ids.truncate(limit);
            }
            outcome
        })
    }

    async fn run(&self, query: &Path, corpus: &[CatalogEntry]) -> Result<SearchOutcome, SearchError> {
        let images = ImageRef::from_catalog(corpus);

        match self.extractor.state().await {
            ExtractorState::Available(embedder) => {
                match cached_embedding(embedder, &self.cache, query).await {
                    Some(vector) => {
                        let ranked = self.semantic.rank(&vector, &images, embedder, &self.cache).await;
                        if !ranked.is_empty() {
                            log::info!("Semantic match: {} of {} images", ranked.len(), images.len());
                            return Ok(SearchOutcome {
                                ids: ranked_ids(&ranked),
                                strategy: Strategy::Semantic,
                            });
                        }
                        log::info!(
                            "No image reached similarity {}, falling back to perceptual hash",
                            self.semantic.threshold()
                        );
                    }
                    None => log::info!("Upload could not be embedded, falling back to perceptual hash"),
                }
            }
            ExtractorState::Unavailable => {
                log::debug!("Embeddings unavailable, matching by perceptual hash");
            }
        }

        let Some(hash) = &self.hash else {
            return Ok(SearchOutcome {
                ids: Vec::new(),
                strategy: Strategy::None,
            });
        };

        let query_hash = hash
            .hash(query)
            .await
            .map_err(|source| SearchError::QueryUnprocessable {
                path: query.to_path_buf(),
                source,
            })?;

        let ranked = hash.rank(&query_hash, &images).await;
        log::info!("Hash match: {} of {} images", ranked.len(), images.len());

        Ok(SearchOutcome {
            ids: ranked_ids(&ranked),
            strategy: Strategy::Hash,
        })
    }
}

/// Owns the uploaded file for the duration of a search.
///
/// `cleanup()` deletes it asynchronously on the normal path. If the search
/// future is dropped early or a panic unwinds, `Drop` deletes it instead.
struct UploadGuard {
    path: PathBuf,
    armed: bool,
}

impl UploadGuard {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            armed: true,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn cleanup(mut self) {
        self.armed = false;
        report_removal(&self.path, tokio::fs::remove_file(&self.path).await);
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        if self.armed {
            report_removal(&self.path, std::fs::remove_file(&self.path));
        }
    }
}

/// Delete an upload whose search never ran, logging the outcome the same way
/// a finished search does.
pub fn discard_upload(path: &Path) {
    report_removal(path, std::fs::remove_file(path));
}

/// Cleanup failures are logged only, they never replace the search result.
fn report_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => log::debug!("Removed upload {path:?}"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("Upload {path:?} already gone")
        }
        Err(e) => log::warn!("Failed to remove upload {path:?}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_cleanup_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.png");
        std::fs::write(&path, b"x").unwrap();

        UploadGuard::new(&path).cleanup().await;
        assert!(!path.exists());
    }

    #[test]
    fn test_guard_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.png");
        std::fs::write(&path, b"x").unwrap();

        drop(UploadGuard::new(&path));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_guard_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        UploadGuard::new(&dir.path().join("never-existed.png")).cleanup().await;
    }

    #[test]
    fn test_discard_upload_removes_file_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.png");
        std::fs::write(&path, b"x").unwrap();

        discard_upload(&path);
        assert!(!path.exists());
        discard_upload(&path);
    }

    #[tokio::test]
    async fn test_dropped_search_still_removes_upload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.png");
        image::RgbImage::new(8, 8).save(&path).unwrap();

        // a model load that never finishes in time keeps the search pending
        let extractor = EmbeddingExtractor::with_loader(
            || {
                std::thread::sleep(std::time::Duration::from_millis(500));
                Err(crate::embeddings::EmbeddingError::InitFailed("slow".to_string()))
            },
            std::time::Duration::from_secs(30),
        );
        let service = SearchService::new(&Config::default(), Arc::new(extractor));

        let search = service.search_by_photo(&path, &[]);
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), search).await;

        assert!(timed_out.is_err());
        assert!(!path.exists());
    }
}
