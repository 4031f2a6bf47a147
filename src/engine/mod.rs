//! Inference engine module
//!
//! Provides:
//! - The closed set of supported embedding models
//! - The embedding provider contract and its OpenVINO implementation
//! - The model pool (lazy loading, full reset)

pub mod models;
pub mod provider;
pub mod pool;
pub mod inference;
pub mod detector;
pub mod embedder;
pub mod preprocess;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use models::{DetectorBackend, ModelId};
pub use pool::{CacheError, ModelPool};
pub use provider::{EmbeddingProvider, ProviderError, RepresentOptions};
pub use inference::OpenVinoProvider;
