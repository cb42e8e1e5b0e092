//! Process-lifetime cache of image embeddings keyed by file path.
//!
//! Entries are never evicted or invalidated. A file that changes on disk
//! after its vector was cached keeps the old vector. Uploaded photos are
//! cached under their upload path too, so besides one entry per catalog
//! image the cache gains one entry per embedded upload and only shrinks when
//! the process exits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

#[derive(Default)]
pub struct EmbeddingCache {
    entries: RwLock<HashMap<PathBuf, Arc<[f32]>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<Arc<[f32]>> {
        let entries = self.entries.read().ok()?;
        entries.get(path).cloned()
    }

    /// Store `vector` for `path` unless another caller got there first.
    /// Returns the vector that is cached afterwards.
    pub fn insert(&self, path: &Path, vector: Vec<f32>) -> Arc<[f32]> {
        let vector: Arc<[f32]> = vector.into();
        match self.entries.write() {
            Ok(mut entries) => entries
                .entry(path.to_path_buf())
                .or_insert(vector)
                .clone(),
            Err(e) => {
                log::warn!("Embedding cache lock poisoned, not caching {path:?}: {e}");
                vector
            }
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(path))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_missing() {
        let cache = EmbeddingCache::new();
        assert!(cache.get(Path::new("a.jpg")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_then_get() {
        let cache = EmbeddingCache::new();
        cache.insert(Path::new("a.jpg"), vec![1.0, 0.0]);

        assert_eq!(cache.get(Path::new("a.jpg")).as_deref(), Some(&[1.0, 0.0][..]));
        assert!(cache.contains(Path::new("a.jpg")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_first_insert_wins() {
        let cache = EmbeddingCache::new();
        cache.insert(Path::new("a.jpg"), vec![1.0, 0.0]);
        let kept = cache.insert(Path::new("a.jpg"), vec![0.0, 1.0]);

        assert_eq!(&kept[..], &[1.0, 0.0]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_inserts() {
        let cache = Arc::new(EmbeddingCache::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let path = PathBuf::from(format!("{}.jpg", i % 4));
                    cache.insert(&path, vec![i as f32, 1.0]);
                    cache.get(&path).is_some()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(cache.len(), 4);
    }
}
