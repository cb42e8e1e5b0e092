//! Lazily loaded, process-wide embedding extractor.
//!
//! The model is constructed at most once, on first use. Concurrent first
//! callers all await the same in-flight load. A failed load is recorded as
//! [`ExtractorState::Unavailable`] and never retried.
//!
//! The load runs in its own task, detached from whoever triggered it, so a
//! caller that gives up waiting does not cancel it and the next caller joins
//! the same load instead of starting another. A load that overruns
//! `load_timeout` is reported as unavailable; the blocking loader thread
//! cannot be interrupted and runs to completion, its result discarded.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, OnceCell};

use crate::config::SemanticConfig;
use crate::embeddings::{EmbeddingError, EmbeddingModel, ImageEmbedder};

type Loader = Arc<dyn Fn() -> Result<Arc<dyn ImageEmbedder>, EmbeddingError> + Send + Sync>;

static SHARED: once_cell::sync::OnceCell<Arc<EmbeddingExtractor>> =
    once_cell::sync::OnceCell::new();

/// Outcome of the one-time model load.
#[derive(Clone)]
pub enum ExtractorState {
    Available(Arc<dyn ImageEmbedder>),
    Unavailable,
}

impl ExtractorState {
    pub fn is_available(&self) -> bool {
        matches!(self, ExtractorState::Available(_))
    }
}

impl std::fmt::Debug for ExtractorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractorState::Available(embedder) => f
                .debug_struct("Available")
                .field("dimensions", &embedder.dimensions())
                .finish(),
            ExtractorState::Unavailable => f.write_str("Unavailable"),
        }
    }
}

pub struct EmbeddingExtractor {
    state: OnceCell<ExtractorState>,
    /// Result channel of the one load task, set when that task is spawned.
    loading: once_cell::sync::OnceCell<watch::Receiver<Option<ExtractorState>>>,
    /// `None` when semantic matching is switched off.
    loader: Option<Loader>,
    load_timeout: Duration,
}

impl EmbeddingExtractor {
    /// Extractor backed by the fastembed model named in `config`, cached under
    /// `base_path`.
    pub fn new(config: &SemanticConfig, base_path: PathBuf) -> Self {
        if !config.enabled {
            return Self::unavailable();
        }

        let model_name = config.model.clone();
        let loader = move || -> Result<Arc<dyn ImageEmbedder>, EmbeddingError> {
            let model = EmbeddingModel::new(&model_name, base_path.clone())?;
            Ok(Arc::new(model))
        };

        Self::with_loader(loader, Duration::from_secs(config.download_timeout_secs))
    }

    /// Extractor that builds its embedder with `loader` on first use.
    pub fn with_loader<F>(loader: F, load_timeout: Duration) -> Self
    where
        F: Fn() -> Result<Arc<dyn ImageEmbedder>, EmbeddingError> + Send + Sync + 'static,
    {
        Self {
            state: OnceCell::new(),
            loading: once_cell::sync::OnceCell::new(),
            loader: Some(Arc::new(loader)),
            load_timeout,
        }
    }

    /// Extractor that never loads anything.
    pub fn unavailable() -> Self {
        Self {
            state: OnceCell::new_with(Some(ExtractorState::Unavailable)),
            loading: once_cell::sync::OnceCell::new(),
            loader: None,
            load_timeout: Duration::ZERO,
        }
    }

    /// The process-wide extractor. The first call decides the configuration;
    /// later calls get the same instance whatever they pass.
    pub fn shared(config: &SemanticConfig, base_path: PathBuf) -> Arc<Self> {
        SHARED
            .get_or_init(|| Arc::new(Self::new(config, base_path)))
            .clone()
    }

    /// Whether the one-time load has already finished (either way).
    pub fn is_initialized(&self) -> bool {
        self.state.initialized()
    }

    /// Load the model if nobody has yet, and report the outcome.
    pub async fn state(&self) -> &ExtractorState {
        self.state.get_or_init(|| self.load()).await
    }

    /// Embed one image. `None` means no vector for this image, either because
    /// the extractor is unavailable or because inference failed.
    pub async fn embed(&self, path: &Path) -> Option<Vec<f32>> {
        match self.state().await {
            ExtractorState::Available(embedder) => embed_blocking(embedder, path).await.ok(),
            ExtractorState::Unavailable => None,
        }
    }

    async fn load(&self) -> ExtractorState {
        let Some(loader) = self.loader.clone() else {
            return ExtractorState::Unavailable;
        };

        let mut done = self
            .loading
            .get_or_init(|| spawn_load(loader, self.load_timeout))
            .clone();

        let state = match done.wait_for(Option::is_some).await {
            Ok(state) => (*state).clone(),
            Err(_) => {
                log::warn!("Image embedding model load task ended without a result");
                None
            }
        };
        state.unwrap_or(ExtractorState::Unavailable)
    }
}

/// Start the model load on the runtime and hand back where its outcome lands.
fn spawn_load(loader: Loader, load_timeout: Duration) -> watch::Receiver<Option<ExtractorState>> {
    let (tx, rx) = watch::channel(None);

    tokio::spawn(async move {
        let state = run_load(loader, load_timeout).await;
        tx.send_replace(Some(state));
    });

    rx
}

async fn run_load(loader: Loader, load_timeout: Duration) -> ExtractorState {
    log::info!("Loading image embedding model");
    let task = tokio::task::spawn_blocking(move || loader());

    match tokio::time::timeout(load_timeout, task).await {
        Ok(Ok(Ok(embedder))) => {
            log::info!(
                "Image embedding model ready ({} dimensions)",
                embedder.dimensions()
            );
            ExtractorState::Available(embedder)
        }
        Ok(Ok(Err(e))) => {
            log::warn!("Image embeddings unavailable, using perceptual hashes only: {e}");
            ExtractorState::Unavailable
        }
        Ok(Err(e)) => {
            log::warn!("Image embedding model load panicked: {e}");
            ExtractorState::Unavailable
        }
        Err(_) => {
            let e = EmbeddingError::DownloadTimeout(load_timeout.as_secs());
            log::warn!("Image embeddings unavailable, using perceptual hashes only: {e}");
            ExtractorState::Unavailable
        }
    }
}

/// Run one inference off the async executor.
pub(crate) async fn embed_blocking(
    embedder: &Arc<dyn ImageEmbedder>,
    path: &Path,
) -> Result<Vec<f32>, EmbeddingError> {
    let embedder = embedder.clone();
    let owned = path.to_path_buf();

    let result = tokio::task::spawn_blocking(move || embedder.embed(&owned))
        .await
        .map_err(|e| EmbeddingError::EmbeddingFailed(format!("embedding task failed: {e}")))
        .and_then(|r| r);

    if let Err(e) = &result {
        log::warn!("No embedding for {path:?}: {e}");
    }
    result
}
