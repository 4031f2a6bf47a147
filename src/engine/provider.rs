//! Embedding provider contract
//!
//! A provider turns a decoded image into an embedding for one model using one detector
//! backend. Calls are blocking; async callers run them through `spawn_blocking`.

use image::DynamicImage;
use thiserror::Error;

use super::models::{DetectorBackend, ModelId};

/// Failures a provider can report
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The detector ran but found no face (with detection enforced)
    #[error("no face detected by {backend}")]
    NoFace { backend: String },

    /// The detector backend itself failed
    #[error("detector {backend} failed: {reason}")]
    Backend { backend: String, reason: String },

    /// The shared inference session is in a bad state; another detector will not help
    #[error("inference session fault: {reason}")]
    Session { reason: String },

    /// Model weights could not be read or compiled
    #[error("failed to load model {model}: {reason}")]
    ModelLoad { model: ModelId, reason: String },
}

impl ProviderError {
    /// Detector-level failures are expected and handled by trying the next backend.
    pub fn is_detector_failure(&self) -> bool {
        matches!(self, ProviderError::NoFace { .. } | ProviderError::Backend { .. })
    }
}

/// Options for a single `represent` call
#[derive(Debug, Clone, Copy)]
pub struct RepresentOptions {
    pub align: bool,
    pub enforce_detection: bool,
}

impl Default for RepresentOptions {
    fn default() -> Self {
        Self {
            align: true,
            enforce_detection: true,
        }
    }
}

/// Face embedding capability backed by some inference runtime
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// Loaded model handle, owned by the model pool
    type Model: Send + Sync + 'static;

    /// Builds a model. Expensive; the pool calls it once per model between resets.
    fn load_model(&self, model: ModelId) -> Result<Self::Model, ProviderError>;

    /// Detects the face with `backend` and returns its embedding.
    fn represent(
        &self,
        model: &Self::Model,
        image: &DynamicImage,
        backend: &DetectorBackend,
        options: RepresentOptions,
    ) -> Result<Vec<f32>, ProviderError>;

    /// Drops any runtime state shared across models.
    fn clear_session(&self);
}
