//! Perceptual (difference) hash of an image file.
//!
//! The image is reduced to a `(size + 1) x size` grayscale thumbnail and every
//! pixel is compared with its right-hand neighbour, giving `size * size` bits.
//! Bits are rendered four at a time as lowercase hex, so the default size of 16
//! yields a 64 symbol hash. Visually close images produce hashes that differ
//! in few symbols.

use std::fmt;
use std::path::Path;

use image::imageops::FilterType;
use image::DynamicImage;

use crate::errors::ExtractionError;

/// Bits per axis.
pub const DEFAULT_HASH_SIZE: u32 = 16;

const HEX: &[u8; 16] = b"0123456789abcdef";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PerceptualHash(String);

impl PerceptualHash {
    /// Wrap an already rendered hash. Returns `None` unless `hex` is made of
    /// hex digits only.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(hex.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Symbol-wise Hamming distance, `None` when the lengths differ.
    pub fn distance(&self, other: &PerceptualHash) -> Option<u32> {
        hamming_distance(&self.0, &other.0)
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Count positions at which `a` and `b` hold different symbols. Strings of
/// different length are not comparable.
pub fn hamming_distance(a: &str, b: &str) -> Option<u32> {
    if a.chars().count() != b.chars().count() {
        return None;
    }
    Some(a.chars().zip(b.chars()).filter(|(x, y)| x != y).count() as u32)
}

/// Hash a decoded image.
pub fn d_hash(img: &DynamicImage, hash_size: u32) -> PerceptualHash {
    let gray = img
        .resize_exact(hash_size + 1, hash_size, FilterType::Triangle)
        .to_luma8();

    let total_bits = (hash_size * hash_size) as usize;
    let mut hex = String::with_capacity(total_bits.div_ceil(4));
    let mut nibble = 0u8;
    let mut bits = 0;

    for y in 0..hash_size {
        for x in 0..hash_size {
            let left = gray.get_pixel(x, y)[0];
            let right = gray.get_pixel(x + 1, y)[0];
            nibble = (nibble << 1) | u8::from(left < right);
            bits += 1;
            if bits == 4 {
                hex.push(HEX[nibble as usize] as char);
                nibble = 0;
                bits = 0;
            }
        }
    }

    if bits > 0 {
        nibble <<= 4 - bits;
        hex.push(HEX[nibble as usize] as char);
    }

    PerceptualHash(hex)
}

/// Decode the file at `path` and hash it. Blocking.
pub fn hash_file(path: &Path, hash_size: u32) -> Result<PerceptualHash, ExtractionError> {
    let img = image::open(path).map_err(|e| ExtractionError::from_image(path.to_path_buf(), e))?;
    Ok(d_hash(&img, hash_size))
}
