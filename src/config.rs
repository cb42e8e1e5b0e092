use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::phash::DEFAULT_HASH_SIZE;

/// Default image embedding model
const DEFAULT_SEMANTIC_MODEL: &str = "clip-vit-b-32";
/// Minimum cosine similarity for a semantic match (inclusive)
const DEFAULT_SEMANTIC_THRESHOLD: f32 = 0.75;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
/// Hamming distance a hash match must stay below
const DEFAULT_MAX_HASH_DISTANCE: u32 = 25;

const CONFIG_FILE: &str = "config.yaml";

/// Configuration for embedding-based matching
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Enable or disable semantic matching
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// fastembed image model (e.g., "clip-vit-b-32")
    #[serde(default = "default_semantic_model")]
    pub model: String,

    /// Minimum similarity score [-1.0, 1.0]
    #[serde(default = "default_semantic_threshold")]
    pub threshold: f32,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: DEFAULT_SEMANTIC_MODEL.to_string(),
            threshold: DEFAULT_SEMANTIC_THRESHOLD,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

/// Configuration for the perceptual hash fallback
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HashConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bits per axis
    #[serde(default = "default_hash_size")]
    pub hash_size: u32,

    /// Exclusive upper bound on the distance of an accepted match
    #[serde(default = "default_max_distance")]
    pub max_distance: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hash_size: DEFAULT_HASH_SIZE,
            max_distance: DEFAULT_MAX_HASH_DISTANCE,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_semantic_model() -> String {
    DEFAULT_SEMANTIC_MODEL.to_string()
}

fn default_semantic_threshold() -> f32 {
    DEFAULT_SEMANTIC_THRESHOLD
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_hash_size() -> u32 {
    DEFAULT_HASH_SIZE
}

fn default_max_distance() -> u32 {
    DEFAULT_MAX_HASH_DISTANCE
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub semantic: SemanticConfig,
    #[serde(default)]
    pub hash: HashConfig,
    /// Cap on returned ids, uncapped when absent
    #[serde(default)]
    pub max_results: Option<usize>,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sem = &self.semantic;
        if !(-1.0..=1.0).contains(&sem.threshold) {
            return Err(ConfigError::Invalid(format!(
                "semantic.threshold must be between -1.0 and 1.0, got {}",
                sem.threshold
            )));
        }

        if sem.download_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "semantic.download_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if !(2..=64).contains(&self.hash.hash_size) {
            return Err(ConfigError::Invalid(format!(
                "hash.hash_size must be between 2 and 64, got {}",
                self.hash.hash_size
            )));
        }

        if self.hash.max_distance == 0 {
            return Err(ConfigError::Invalid(
                "hash.max_distance must be greater than 0".to_string(),
            ));
        }

        if self.max_results == Some(0) {
            return Err(ConfigError::Invalid(
                "max_results must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing the defaults if it does
    /// not exist yet.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        std::fs::create_dir_all(base_path)?;
        let file = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !file.exists() {
            let mut config = Self::default();
            config.base_path = base_path.to_path_buf();
            config.save()?;
        }

        let config_str = std::fs::read_to_string(&file)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let config_str = serde_yml::to_string(&self)?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.base_path)?;
        std::io::Write::write_all(&mut temp, config_str.as_bytes())?;
        temp.persist(self.base_path.join(CONFIG_FILE))
            .map_err(|e| ConfigError::IO(e.error))?;

        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}
