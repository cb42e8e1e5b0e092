
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};

use crate::embeddings::{EmbeddingError, ImageEmbedder};

/// Embeds an image as its mean colour. Images with no colour signal (every
/// channel equal, e.g. grayscale) are refused, as are undecodable files.
pub struct MeanColorEmbedder;

impl ImageEmbedder for MeanColorEmbedder {
    fn dimensions(&self) -> usize {
        3
    }

    fn embed(&self, path: &Path) -> Result<Vec<f32>, EmbeddingError> {
        let img = image::open(path)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
            .to_rgb8();

        let pixels = (img.width() * img.height()) as f32;
        let mut sums = [0f32; 3];
        for pixel in img.pixels() {
            for (sum, channel) in sums.iter_mut().zip(pixel.0) {
                *sum += channel as f32;
            }
        }
        let mean: Vec<f32> = sums.iter().map(|s| s / pixels).collect();

        if mean.iter().all(|c| (c - mean[0]).abs() < f32::EPSILON) {
            return Err(EmbeddingError::EmbeddingFailed("no colour signal".to_string()));
        }

        let mut vector = mean;
        crate::similarity::normalize(&mut vector);
        Ok(vector)
    }
}

pub fn solid(dir: &Path, name: &str, rgb: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(32, 32, Rgb(rgb)).save(&path).unwrap();
    path
}

pub fn gradient(dir: &Path, name: &str, rising: bool) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_fn(64, 64, |x, _| {
        let v = (x * 4) as u8;
        let v = if rising { v } else { 255 - v };
        Rgb([v, v, v])
    })
    .save(&path)
    .unwrap();
    path
}

/// Copy `source` to a fresh upload path the search is free to delete.
pub fn upload_copy(dir: &Path, source: &Path) -> PathBuf {
    let path = dir.join(format!(
        "upload-{}",
        source.file_name().unwrap().to_string_lossy()
    ));
    std::fs::copy(source, &path).unwrap();
    path
}
