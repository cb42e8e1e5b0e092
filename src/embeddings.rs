//! Embedding model wrapper for fastembed image models.
//!
//! Provides a high-level interface for generating image embeddings:
//! - Model download into a configurable cache directory
//! - One fixed output contract: exactly one vector of the model's dimension
//!   per image, L2-normalized before it leaves this module

use fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::similarity;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Model output changed shape: {0}")]
    UnexpectedOutput(String),

    #[error("Model download timed out after {0} seconds")]
    DownloadTimeout(u64),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Anything that turns an image file into a normalized vector.
///
/// Calls may block on inference; callers run them off the async executor.
pub trait ImageEmbedder: Send + Sync {
    /// Dimension of every vector this embedder returns.
    fn dimensions(&self) -> usize;

    fn embed(&self, path: &Path) -> Result<Vec<f32>, EmbeddingError>;
}

/// Wrapper around fastembed's ImageEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Mutex<ImageEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl EmbeddingModel {
    /// Load the named image model, downloading it on first use.
    ///
    /// Models are cached in the `models/` subdirectory of `cache_dir`.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let (model_enum, dimensions) = Self::parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = ImageInitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(false);

        let model = ImageEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Get the model name
    pub fn name(&self) -> &str {
        &self.model_name
    }

    /// Parse model name string to the fastembed enum and its output dimension.
    fn parse_model_name(name: &str) -> Result<(ImageEmbeddingModel, usize), EmbeddingError> {
        match name.to_lowercase().as_str() {
            "clip-vit-b-32" | "clipvitb32" => Ok((ImageEmbeddingModel::ClipVitB32, 512)),
            "resnet50" | "resnet-50" => Ok((ImageEmbeddingModel::Resnet50, 2048)),
            "unicom-vit-b-16" | "unicomvitb16" => Ok((ImageEmbeddingModel::UnicomVitB16, 768)),
            "unicom-vit-b-32" | "unicomvitb32" => Ok((ImageEmbeddingModel::UnicomVitB32, 512)),
            "nomic-embed-vision-v1.5" | "nomicembedvisionv15" => {
                Ok((ImageEmbeddingModel::NomicEmbedVisionV15, 768))
            }
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: clip-vit-b-32, resnet50, unicom-vit-b-16, unicom-vit-b-32, nomic-embed-vision-v1.5",
                name
            ))),
        }
    }
}

impl ImageEmbedder for EmbeddingModel {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, path: &Path) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = lock_model(&self.model);

        let embeddings = model
            .embed(vec![path], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        check_output(embeddings, self.dimensions)
    }
}

/// A panic during one inference poisons the lock; the session itself holds
/// no per-call state, so later images keep using it.
fn lock_model<T>(model: &Mutex<T>) -> MutexGuard<'_, T> {
    model.lock().unwrap_or_else(|poisoned| {
        log::warn!("Embedding model lock was poisoned by an earlier panic, recovering");
        model.clear_poison();
        poisoned.into_inner()
    })
}

/// Enforce the output contract: one vector, expected dimension, non-zero norm.
/// The returned vector is unit length.
fn check_output(embeddings: Vec<Vec<f32>>, dimensions: usize) -> Result<Vec<f32>, EmbeddingError> {
    let count = embeddings.len();
    let mut vector = match <[Vec<f32>; 1]>::try_from(embeddings) {
        Ok([vector]) => vector,
        Err(_) => {
            return Err(EmbeddingError::UnexpectedOutput(format!(
                "expected 1 embedding, got {count}"
            )))
        }
    };

    if vector.len() != dimensions {
        return Err(EmbeddingError::UnexpectedOutput(format!(
            "expected {} dimensions, got {}",
            dimensions,
            vector.len()
        )));
    }

    if !similarity::normalize(&mut vector) {
        return Err(EmbeddingError::EmbeddingFailed(
            "model returned a zero vector".to_string(),
        ));
    }

    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_model_name() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = EmbeddingModel::new("nonexistent-model", temp_dir.path().to_path_buf());
        assert!(matches!(result, Err(EmbeddingError::InvalidModel(_))));
    }

    #[test]
    fn test_model_names_are_case_insensitive() {
        let (_, dims) = EmbeddingModel::parse_model_name("CLIP-ViT-B-32").unwrap();
        assert_eq!(dims, 512);
    }

    #[test]
    fn test_poisoned_model_lock_recovers() {
        let model = Mutex::new(7u32);
        let _ = std::panic::catch_unwind(|| {
            let _guard = model.lock().unwrap();
            panic!("inference crashed");
        });
        assert!(model.is_poisoned());

        assert_eq!(*lock_model(&model), 7);
        assert!(!model.is_poisoned());
    }

    #[test]
    fn test_output_is_normalized() {
        let vector = check_output(vec![vec![3.0, 4.0]], 2).unwrap();
        assert!((similarity::l2_norm(&vector) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_output_dimension_change_fails_loudly() {
        let result = check_output(vec![vec![1.0, 0.0, 0.0]], 2);
        assert!(matches!(result, Err(EmbeddingError::UnexpectedOutput(_))));
    }

    #[test]
    fn test_output_must_hold_one_vector() {
        assert!(matches!(
            check_output(vec![], 2),
            Err(EmbeddingError::UnexpectedOutput(_))
        ));
        assert!(matches!(
            check_output(vec![vec![1.0, 0.0], vec![0.0, 1.0]], 2),
            Err(EmbeddingError::UnexpectedOutput(_))
        ));
    }

    #[test]
    fn test_zero_output_is_rejected() {
        let result = check_output(vec![vec![0.0, 0.0]], 2);
        assert!(matches!(result, Err(EmbeddingError::EmbeddingFailed(_))));
    }

    // Integration tests require model download - run with --ignored
    #[test]
    #[ignore = "requires model download"]
    fn test_image_embedding_generation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let image_path = temp_dir.path().join("red.png");
        image::RgbImage::from_pixel(64, 64, image::Rgb([200, 20, 20]))
            .save(&image_path)
            .unwrap();

        let model = EmbeddingModel::new("clip-vit-b-32", temp_dir.path().to_path_buf()).unwrap();
        assert_eq!(model.name(), "clip-vit-b-32");

        let embedding = model.embed(&image_path).unwrap();
        assert_eq!(embedding.len(), 512);

        let norm = similarity::l2_norm(&embedding);
        assert!((norm - 1.0).abs() < 0.01);
    }
}
