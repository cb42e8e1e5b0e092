//! Ranking a corpus against one query.
//!
//! - `semantic`: cosine similarity of image embeddings, higher is better
//! - `hash`: Hamming distance of perceptual hashes, lower is better
//!
//! The two score scales are never mixed in one result list.

mod hash;
mod semantic;

pub use hash::HashMatcher;
pub use semantic::{cached_embedding, SemanticMatcher};

use crate::corpus::ImageId;

/// A corpus entry that passed a matcher's threshold, with the score it got.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchResult<S> {
    pub id: ImageId,
    pub score: S,
}

/// Drop the scores, keeping the ranking.
pub fn ranked_ids<S>(results: &[MatchResult<S>]) -> Vec<ImageId> {
    results.iter().map(|r| r.id).collect()
}
