use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use rayon::prelude::*;

use super::MatchResult;
use crate::corpus::{ImageId, ImageRef};
use crate::errors::ExtractionError;
use crate::phash::{self, PerceptualHash};

/// Ranks corpus images by Hamming distance between perceptual hashes.
#[derive(Clone, Debug)]
pub struct HashMatcher {
    hash_size: u32,
    max_distance: u32,
}

impl HashMatcher {
    /// Accepts matches whose distance is strictly below `max_distance`.
    pub fn new(hash_size: u32, max_distance: u32) -> Self {
        Self {
            hash_size,
            max_distance,
        }
    }

    pub fn max_distance(&self) -> u32 {
        self.max_distance
    }

    /// Hash one image off the async executor.
    pub async fn hash(&self, path: &Path) -> Result<PerceptualHash, ExtractionError> {
        let owned = path.to_path_buf();
        let hash_size = self.hash_size;

        tokio::task::spawn_blocking(move || phash::hash_file(&owned, hash_size))
            .await
            .map_err(|e| ExtractionError::Task(e.to_string()))?
    }

    /// Hash every corpus image and rank it against `query`. Images that
    /// cannot be hashed are logged and left out.
    pub async fn rank(&self, query: &PerceptualHash, corpus: &[ImageRef]) -> Vec<MatchResult<u32>> {
        self.rank_with(query, corpus, phash::hash_file).await
    }

    async fn rank_with<F>(
        &self,
        query: &PerceptualHash,
        corpus: &[ImageRef],
        hasher: F,
    ) -> Vec<MatchResult<u32>>
    where
        F: Fn(&Path, u32) -> Result<PerceptualHash, ExtractionError> + Send + Sync + 'static,
    {
        let images = corpus.to_vec();
        let hash_size = self.hash_size;

        let task = tokio::task::spawn_blocking(move || {
            images
                .par_iter()
                .map(|image| (image.id, hash_isolated(&hasher, image.path(), hash_size)))
                .collect::<Vec<_>>()
        });

        let hashed = match task.await {
            Ok(hashed) => hashed,
            Err(e) => {
                log::error!("Corpus hashing task failed: {e}");
                return Vec::new();
            }
        };

        let hashes: Vec<(ImageId, PerceptualHash)> = hashed
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(hash) => Some((id, hash)),
                Err(e) => {
                    log::warn!("Skipping image {id}: {e}");
                    None
                }
            })
            .collect();

        self.rank_hashes(query, hashes.iter().map(|(id, hash)| (*id, hash)))
    }

    /// Keep candidates closer than the limit, nearest first. Equal distances
    /// keep their candidate order.
    pub fn rank_hashes<'a, I>(&self, query: &PerceptualHash, candidates: I) -> Vec<MatchResult<u32>>
    where
        I: IntoIterator<Item = (ImageId, &'a PerceptualHash)>,
    {
        let mut results: Vec<MatchResult<u32>> = candidates
            .into_iter()
            .filter_map(|(id, hash)| {
                let score = query.distance(hash)?;
                (score < self.max_distance).then_some(MatchResult { id, score })
            })
            .collect();

        results.sort_by_key(|r| r.score);
        results
    }
}

/// A decoder panic on one image becomes that image's error instead of
/// unwinding through the whole corpus pass.
fn hash_isolated<F>(hasher: &F, path: &Path, hash_size: u32) -> Result<PerceptualHash, ExtractionError>
where
    F: Fn(&Path, u32) -> Result<PerceptualHash, ExtractionError>,
{
    panic::catch_unwind(AssertUnwindSafe(|| hasher(path, hash_size))).unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(ExtractionError::Task(format!("hashing {path:?} panicked: {reason}")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn hash(hex: &str) -> PerceptualHash {
        PerceptualHash::from_hex(hex).unwrap()
    }

    fn save_gradient(path: &Path, rising: bool) {
        RgbImage::from_fn(64, 64, |x, _| {
            let v = (x * 4) as u8;
            let v = if rising { v } else { 255 - v };
            Rgb([v, v, v])
        })
        .save(path)
        .unwrap();
    }

    #[test]
    fn test_rank_hashes_sorts_ascending_below_limit() {
        let matcher = HashMatcher::new(2, 3);
        let query = hash("0000");
        let far = hash("ffff"); // 4
        let near = hash("0001"); // 1
        let exact = hash("0000"); // 0
        let edge = hash("0fff"); // 3, not < 3

        let candidates = vec![(1, &far), (2, &near), (3, &exact), (4, &edge)];
        let results = matcher.rank_hashes(&query, candidates);

        assert_eq!(crate::matcher::ranked_ids(&results), vec![3, 2]);
        assert!(results.iter().all(|r| r.score < 3));
    }

    #[test]
    fn test_rank_hashes_ignores_incomparable_lengths() {
        let matcher = HashMatcher::new(16, 25);
        let short = hash("00");
        let results = matcher.rank_hashes(&hash("0000"), vec![(1, &short)]);
        assert!(results.is_empty());
    }

    #[test]
    fn test_rank_hashes_ties_keep_order() {
        let matcher = HashMatcher::new(2, 5);
        let a = hash("0001");
        let b = hash("0010");
        let results = matcher.rank_hashes(&hash("0000"), vec![(7, &a), (3, &b)]);
        assert_eq!(crate::matcher::ranked_ids(&results), vec![7, 3]);
    }

    #[tokio::test]
    async fn test_rank_skips_broken_corpus_images() {
        let dir = tempfile::tempdir().unwrap();
        let rising = dir.path().join("rising.png");
        let falling = dir.path().join("falling.png");
        let broken = dir.path().join("broken.png");
        save_gradient(&rising, true);
        save_gradient(&falling, false);
        std::fs::write(&broken, b"nope").unwrap();

        let corpus = vec![
            ImageRef::new(1, &broken),
            ImageRef::new(2, &falling),
            ImageRef::new(3, dir.path().join("gone.png")),
            ImageRef::new(4, &rising),
        ];
        let matcher = HashMatcher::new(16, 25);
        let query = matcher.hash(&rising).await.unwrap();

        let results = matcher.rank(&query, &corpus).await;
        assert_eq!(results, vec![MatchResult { id: 4, score: 0 }]);
    }

    #[tokio::test]
    async fn test_rank_survives_panicking_image() {
        let dir = tempfile::tempdir().unwrap();
        let rising = dir.path().join("rising.png");
        let poisoned = dir.path().join("poisoned.png");
        save_gradient(&rising, true);
        save_gradient(&poisoned, true);

        let corpus = vec![
            ImageRef::new(1, &poisoned),
            ImageRef::new(2, &rising),
        ];
        let matcher = HashMatcher::new(16, 25);
        let query = matcher.hash(&rising).await.unwrap();

        let results = matcher
            .rank_with(&query, &corpus, |path, size| {
                if path.ends_with("poisoned.png") {
                    panic!("decoder blew up");
                }
                phash::hash_file(path, size)
            })
            .await;

        assert_eq!(results, vec![MatchResult { id: 2, score: 0 }]);
    }

    #[test]
    fn test_hash_isolated_reports_panic_as_task_error() {
        let result = hash_isolated(
            &|_: &Path, _: u32| -> Result<PerceptualHash, ExtractionError> { panic!("bad header") },
            Path::new("x.png"),
            16,
        );
        match result {
            Err(ExtractionError::Task(msg)) => assert!(msg.contains("bad header")),
            other => panic!("expected task error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hash_of_missing_file_fails() {
        let matcher = HashMatcher::new(16, 25);
        let result = matcher.hash(Path::new("/nonexistent/upload.png")).await;
        assert!(result.is_err());
    }
}
