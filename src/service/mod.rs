//! Service layer module

pub mod comparator;
pub mod error;
pub mod extractor;
pub mod face_service;
pub mod types;
pub mod watchdog;

pub use error::{CompareError, ExtractError, VerifyError};
pub use extractor::EmbeddingExtractor;
pub use face_service::FaceService;
pub use types::*;
pub use watchdog::Watchdog;
