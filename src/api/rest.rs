//! Axum REST API handlers

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
    extract::{State, Multipart, DefaultBodyLimit},
    http::{Method, StatusCode},
    response::Json,
};
use image::DynamicImage;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::engine::{EmbeddingProvider, ModelId};
use crate::service::{FaceService, ReloadReport, VerifyError};
use crate::utils::image::{decode_base64, decode_upload, ImageError};

use super::dto::*;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Application state shared across handlers
pub struct AppState<P: EmbeddingProvider> {
    pub service: Arc<FaceService<P>>,
    pub max_image_bytes: usize,
}

/// Create the REST API router
pub fn create_rest_router<P: EmbeddingProvider>(state: Arc<AppState<P>>) -> Router {
    // Two images, base64 inflated, plus form overhead.
    let body_limit = state.max_image_bytes * 3 + 64 * 1024;

    Router::new()
        .route("/models", get(models_handler::<P>))
        .route("/verify", post(verify_handler::<P>))
        .route("/verify-b64", post(verify_b64_handler::<P>))
        .route("/admin/reload", post(reload_handler::<P>))
        // System endpoints
        .route("/healthz", get(health_handler::<P>))
        .route("/health", get(health_handler::<P>))
        // Middleware
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn image_error(slot: u8, e: ImageError) -> ApiError {
    let (status, code) = match e {
        ImageError::UnsupportedType { .. } => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MEDIA_TYPE"),
        ImageError::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "IMAGE_TOO_LARGE"),
        _ => (StatusCode::BAD_REQUEST, "INVALID_IMAGE"),
    };
    (status, Json(ErrorResponse::new(&format!("image{}: {}", slot, e), code)))
}

fn verify_error(e: VerifyError) -> ApiError {
    match e {
        VerifyError::InvalidThreshold { .. } => {
            (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(&e.to_string(), "INVALID_THRESHOLD")))
        }
        VerifyError::Recovery { .. } => {
            error!("Verification failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(&e.to_string(), "RECOVERY_FAILED")))
        }
    }
}

async fn run_verify<P: EmbeddingProvider>(
    state: &AppState<P>,
    image1: DynamicImage,
    image2: DynamicImage,
    threshold: Option<f32>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let service = &state.service;
    let outcome = service
        .verify(Arc::new(image1), Arc::new(image2), service.list_models(), threshold)
        .await
        .map_err(verify_error)?;
    Ok(Json(outcome.into()))
}

/// Enabled models
async fn models_handler<P: EmbeddingProvider>(
    State(state): State<Arc<AppState<P>>>,
) -> Json<Vec<ModelId>> {
    Json(state.service.list_models().to_vec())
}

/// Verify two uploaded images (multipart fields `image1`, `image2`, optional `threshold`)
async fn verify_handler<P: EmbeddingProvider>(
    State(state): State<Arc<AppState<P>>>,
    mut multipart: Multipart,
) -> Result<Json<VerifyResponse>, ApiError> {
    let mut image1: Option<DynamicImage> = None;
    let mut image2: Option<DynamicImage> = None;
    let mut threshold: Option<f32> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(&e.to_string(), "MULTIPART_ERROR")))
    })? {
        let name = field.name().unwrap_or("").to_string();
        let content_type = field.content_type().map(str::to_string);

        match name.as_str() {
            "image1" | "image2" => {
                let data = field.bytes().await.map_err(|e| {
                    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(&e.to_string(), "READ_ERROR")))
                })?;
                let slot = if name == "image1" { 1 } else { 2 };
                let image = decode_upload(&data, content_type.as_deref(), state.max_image_bytes)
                    .map_err(|e| image_error(slot, e))?;
                if slot == 1 {
                    image1 = Some(image);
                } else {
                    image2 = Some(image);
                }
            }
            "threshold" => {
                let text = field.text().await.map_err(|e| {
                    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(&e.to_string(), "READ_ERROR")))
                })?;
                let value = text.trim().parse::<f32>().map_err(|_| {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(ErrorResponse::new(&format!("Invalid threshold: {}", text), "INVALID_THRESHOLD")),
                    )
                })?;
                threshold = Some(value);
            }
            _ => {}
        }
    }

    let image1 = image1.ok_or_else(|| {
        (StatusCode::BAD_REQUEST, Json(ErrorResponse::new("Missing image1 field", "MISSING_IMAGE1")))
    })?;

    let image2 = image2.ok_or_else(|| {
        (StatusCode::BAD_REQUEST, Json(ErrorResponse::new("Missing image2 field", "MISSING_IMAGE2")))
    })?;

    run_verify(&state, image1, image2, threshold).await
}

/// Verify two base64 images (raw or data URLs)
async fn verify_b64_handler<P: EmbeddingProvider>(
    State(state): State<Arc<AppState<P>>>,
    Json(request): Json<VerifyB64Request>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let image1 = decode_base64(&request.image1_b64, state.max_image_bytes).map_err(|e| image_error(1, e))?;
    let image2 = decode_base64(&request.image2_b64, state.max_image_bytes).map_err(|e| image_error(2, e))?;

    run_verify(&state, image1, image2, request.threshold).await
}

/// Reset the model cache and reload the enabled models
async fn reload_handler<P: EmbeddingProvider>(
    State(state): State<Arc<AppState<P>>>,
) -> Result<Json<ReloadReport>, ApiError> {
    let report = state.service.force_reload().await.map_err(verify_error)?;
    info!(loaded = report.loaded.len(), failed = report.failed.len(), "Reload finished");
    Ok(Json(report))
}

/// Health check
async fn health_handler<P: EmbeddingProvider>(
    State(state): State<Arc<AppState<P>>>,
) -> Json<HealthResponse> {
    Json(state.service.health().into())
}
