//! REST API request/response data transfer objects

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::service::{ComparisonResult, HealthResult, VerificationOutcome};

/// Base64 verify request
#[derive(Debug, Deserialize)]
pub struct VerifyB64Request {
    pub image1_b64: String,
    pub image2_b64: String,
    pub threshold: Option<f32>,
}

/// Verify response, shared by the multipart and base64 endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub detector_backend: String,
    pub threshold: f32,
    pub results: Vec<ResultItem>,
}

/// One model's entry; failed entries carry only `error`
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultItem {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookalike_percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_person: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ComparisonResult> for ResultItem {
    fn from(result: ComparisonResult) -> Self {
        match result {
            ComparisonResult::Success {
                model,
                percent,
                same_person,
            } => Self {
                model: model.to_string(),
                lookalike_percent: Some(percent),
                same_person: Some(same_person),
                error: None,
            },
            ComparisonResult::Failure { model, error, .. } => Self {
                model: model.to_string(),
                lookalike_percent: None,
                same_person: None,
                error: Some(error),
            },
        }
    }
}

impl From<VerificationOutcome> for VerifyResponse {
    fn from(outcome: VerificationOutcome) -> Self {
        Self {
            detector_backend: outcome.detector_backend,
            threshold: outcome.threshold,
            results: outcome.results.into_iter().map(ResultItem::from).collect(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub app: &'static str,
    pub version: String,
    pub models_loaded: HashMap<String, bool>,
}

impl From<HealthResult> for HealthResponse {
    fn from(health: HealthResult) -> Self {
        Self {
            status: if health.healthy { "ok" } else { "unhealthy" },
            app: env!("CARGO_PKG_NAME"),
            version: health.version,
            models_loaded: health
                .models_loaded
                .into_iter()
                .map(|(model, loaded)| (model.to_string(), loaded))
                .collect(),
        }
    }
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            code: code.to_string(),
        }
    }
}
