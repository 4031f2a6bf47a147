//! Service layer errors

use thiserror::Error;

/// Which of the two verification inputs an error refers to
pub type ImageSlot = u8;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// Every backend in the cascade failed for this image
    #[error("no face detected in image {slot}")]
    FaceNotDetected { slot: ImageSlot },

    /// The inference session failed; not a detection problem
    #[error("internal error during extraction: {reason}")]
    Internal { reason: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum CompareError {
    #[error("embedding lengths differ ({left} vs {right})")]
    LengthMismatch { left: usize, right: usize },

    #[error("embedding has zero norm")]
    ZeroNorm,
}

/// Failures of a whole `verify` call, as opposed to per-model result entries
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("threshold {value} is outside [0, 1]")]
    InvalidThreshold { value: f32 },

    /// The recovery reset between passes did not complete
    #[error("model cache recovery failed: {reason}")]
    Recovery { reason: String },
}
