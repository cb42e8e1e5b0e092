use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use super::MatchResult;
use crate::cache::EmbeddingCache;
use crate::corpus::{ImageId, ImageRef};
use crate::embeddings::ImageEmbedder;
use crate::extractor::embed_blocking;
use crate::similarity::cosine_similarity;

/// Ranks corpus images by cosine similarity to a query embedding.
#[derive(Clone, Debug)]
pub struct SemanticMatcher {
    threshold: f32,
}

impl SemanticMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Embed every corpus image (cache first) and rank it against `query`.
    /// Images without an embedding are left out.
    pub async fn rank(
        &self,
        query: &[f32],
        corpus: &[ImageRef],
        embedder: &Arc<dyn ImageEmbedder>,
        cache: &EmbeddingCache,
    ) -> Vec<MatchResult<f32>> {
        let mut vectors = Vec::with_capacity(corpus.len());
        for image in corpus {
            if let Some(vector) = cached_embedding(embedder, cache, image.path()).await {
                vectors.push((image.id, vector));
            }
        }

        self.rank_vectors(query, vectors.iter().map(|(id, v)| (*id, &v[..])))
    }

    /// Keep candidates scoring at least the threshold, best first. Equal
    /// scores keep their candidate order.
    pub fn rank_vectors<'a, I>(&self, query: &[f32], candidates: I) -> Vec<MatchResult<f32>>
    where
        I: IntoIterator<Item = (ImageId, &'a [f32])>,
    {
        let mut results: Vec<MatchResult<f32>> = candidates
            .into_iter()
            .filter_map(|(id, vector)| {
                let score = cosine_similarity(query, vector);
                if score >= self.threshold {
                    Some(MatchResult { id, score })
                } else {
                    None
                }
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        results
    }
}

/// Vector for `path`, from the cache or freshly extracted (and then cached).
pub async fn cached_embedding(
    embedder: &Arc<dyn ImageEmbedder>,
    cache: &EmbeddingCache,
    path: &Path,
) -> Option<Arc<[f32]>> {
    if let Some(vector) = cache.get(path) {
        return Some(vector);
    }

    let vector = embed_blocking(embedder, path).await.ok()?;
    Some(cache.insert(path, vector))
}
