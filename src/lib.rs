//! Image-based product lookup for the stock catalog.
//!
//! Given a photo uploaded by a user, find the catalog items whose stored
//! images resemble it.
//!
//! # Architecture
//!
//! - `phash`: perceptual (difference) hash of one image
//! - `embeddings`: fastembed image model wrapper
//! - `extractor`: lazy, load-once embedding extractor
//! - `cache`: path-keyed embedding cache
//! - `matcher`: semantic and hash ranking
//! - `search`: the photo search entry point

pub mod cache;
pub mod config;
pub mod corpus;
pub mod embeddings;
pub mod errors;
pub mod extractor;
pub mod matcher;
pub mod phash;
pub mod search;
pub mod similarity;
#[cfg(test)]
mod tests;

pub use config::Config;
pub use corpus::{CatalogEntry, ImageId, ImageRef};
pub use errors::{ExtractionError, SearchError};
pub use extractor::{EmbeddingExtractor, ExtractorState};
pub use search::{SearchOutcome, SearchService, Strategy};
