//! Catalog entries handed in by the stock service and the image references
//! that actually take part in a search.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identifier of a catalog item (a stock id).
pub type ImageId = u64;

/// One catalog item as the stock service knows it. Items without a stored
/// image are allowed and simply never match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: ImageId,
    #[serde(default)]
    pub image_path: Option<String>,
}

impl CatalogEntry {
    pub fn new(id: ImageId, image_path: impl Into<String>) -> Self {
        Self {
            id,
            image_path: Some(image_path.into()),
        }
    }

    pub fn without_image(id: ImageId) -> Self {
        Self {
            id,
            image_path: None,
        }
    }
}

/// A catalog id paired with the path of its stored image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    pub id: ImageId,
    pub path: PathBuf,
}

impl ImageRef {
    pub fn new(id: ImageId, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep only the entries with a non-empty image path, in catalog order.
    pub fn from_catalog(entries: &[CatalogEntry]) -> Vec<ImageRef> {
        entries
            .iter()
            .filter_map(|entry| {
                let path = entry.image_path.as_deref()?.trim();
                if path.is_empty() {
                    None
                } else {
                    Some(ImageRef::new(entry.id, path))
                }
            })
            .collect()
    }
}

/// Read a corpus file: a JSON array of `{"id": .., "imagePath": ..}`.
pub fn load_catalog(path: &Path) -> anyhow::Result<Vec<CatalogEntry>> {
    use anyhow::Context;

    let data = std::fs::read(path).with_context(|| format!("failed to read {path:?}"))?;
    let entries = serde_json::from_slice(&data)
        .with_context(|| format!("{path:?} is not a valid corpus file"))?;
    Ok(entries)
}
