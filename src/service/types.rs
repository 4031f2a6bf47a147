//! Service layer types

use serde::Serialize;

use crate::engine::ModelId;

use super::error::ImageSlot;

/// Why a single model's comparison failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    FaceNotDetected { slot: ImageSlot },
    ModelUnavailable,
    /// Unexpected failure; the only kind that triggers the batch reset and retry
    Internal,
}

impl FailureKind {
    /// User-facing message for a failed entry
    pub fn message(&self, model: ModelId) -> String {
        match self {
            FailureKind::FaceNotDetected { slot } => format!(
                "No face detected in image {}. Try a frontal, well-lit photo without strong shadows or head rotation.",
                slot
            ),
            FailureKind::ModelUnavailable => {
                format!("Model '{}' is unavailable. Check that its weights are present.", model)
            }
            FailureKind::Internal => "Internal error while processing the images.".to_string(),
        }
    }
}

/// Outcome of one model's comparison; exactly one shape is populated
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ComparisonResult {
    Success {
        model: ModelId,
        percent: u8,
        same_person: bool,
    },
    Failure {
        model: ModelId,
        kind: FailureKind,
        error: String,
    },
}

impl ComparisonResult {
    pub fn failure(model: ModelId, kind: FailureKind) -> Self {
        ComparisonResult::Failure {
            model,
            kind,
            error: kind.message(model),
        }
    }

    pub fn model(&self) -> ModelId {
        match self {
            ComparisonResult::Success { model, .. } | ComparisonResult::Failure { model, .. } => *model,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ComparisonResult::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ComparisonResult::Failure { kind, .. } => Some(*kind),
            ComparisonResult::Success { .. } => None,
        }
    }

    pub fn is_internal_error(&self) -> bool {
        self.failure_kind() == Some(FailureKind::Internal)
    }
}

/// Result of a verify call: one entry per requested model, in request order
#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub detector_backend: String,
    pub threshold: f32,
    pub results: Vec<ComparisonResult>,
}

impl VerificationOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(ComparisonResult::is_success)
    }

    pub fn has_internal_error(&self) -> bool {
        self.results.iter().any(ComparisonResult::is_internal_error)
    }

    pub fn failed_models(&self) -> Vec<ModelId> {
        self.results
            .iter()
            .filter(|r| !r.is_success())
            .map(ComparisonResult::model)
            .collect()
    }
}

/// Result of an operator-triggered reload
#[derive(Debug, Clone, Serialize)]
pub struct ReloadReport {
    pub loaded: Vec<ModelId>,
    pub failed: Vec<ReloadFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReloadFailure {
    pub model: ModelId,
    pub error: String,
}

/// Health check result
#[derive(Debug, Clone, Serialize)]
pub struct HealthResult {
    pub healthy: bool,
    pub version: String,
    pub models_loaded: Vec<(ModelId, bool)>,
}
