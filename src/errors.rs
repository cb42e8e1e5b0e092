use std::path::PathBuf;

/// Failure to turn one image file into a fingerprint.
#[derive(thiserror::Error, Debug)]
pub enum ExtractionError {
    #[error("cannot read image {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode image {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("image task failed: {0}")]
    Task(String),
}

impl ExtractionError {
    pub(crate) fn from_image(path: PathBuf, err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(source) => ExtractionError::Io { path, source },
            source => ExtractionError::Decode { path, source },
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SearchError {
    /// Neither strategy could build a representation of the uploaded photo.
    #[error("uploaded image {path:?} could not be processed: {source}")]
    QueryUnprocessable {
        path: PathBuf,
        #[source]
        source: ExtractionError,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
