//! REST handler tests driven through the router with a scripted provider

use std::io::Cursor;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::prelude::*;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat};
use serde_json::{json, Value};
use tower::ServiceExt;

use lookalike::api::{create_rest_router, AppState};
use lookalike::engine::mock::ScriptedProvider;
use lookalike::engine::{DetectorBackend, ModelId, ModelPool};
use lookalike::service::FaceService;
use lookalike::Config;

const BOUNDARY: &str = "lookalike-test-boundary";

fn setup(max_image_bytes: usize) -> (Arc<ScriptedProvider>, Router) {
    let mut config = Config::default();
    config.models.enabled = vec![ModelId::ArcFace, ModelId::Facenet];
    config.detection.cascade = vec![
        DetectorBackend::new("scrfd_500m"),
        DetectorBackend::new(DetectorBackend::PASSTHROUGH),
    ];

    let provider = Arc::new(ScriptedProvider::new());
    let pool = Arc::new(ModelPool::new(provider.clone()));
    let service = Arc::new(FaceService::new(pool, &config));
    let state = Arc::new(AppState {
        service,
        max_image_bytes,
    });
    (provider, create_rest_router(state))
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::new_rgb8(width, height)
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

fn file_part(name: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut part = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}.png\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    part.extend_from_slice(data);
    part.extend_from_slice(b"\r\n");
    part
}

fn text_part(name: &str, value: &str) -> Vec<u8> {
    format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").into_bytes()
}

fn multipart_request(parts: Vec<Vec<u8>>) -> Request<Body> {
    let mut body: Vec<u8> = parts.concat();
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/verify")
        .header("Content-Type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_models_lists_enabled_set() {
    let (_provider, router) = setup(1 << 20);
    let request = Request::builder().uri("/models").body(Body::empty()).unwrap();

    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["ArcFace", "Facenet"]));
}

#[tokio::test]
async fn test_verify_multipart() {
    let (_provider, router) = setup(1 << 20);
    let image = png(64, 64);
    let request = multipart_request(vec![
        file_part("image1", "image/png", &image),
        file_part("image2", "image/png", &image),
    ]);

    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["detector_backend"], "scrfd_500m,passthrough");
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["model"], "ArcFace");
    assert_eq!(results[0]["lookalike_percent"], 100);
    assert_eq!(results[0]["same_person"], true);
    assert!(results[0].get("error").is_none());
}

#[tokio::test]
async fn test_verify_multipart_threshold_field() {
    let (_provider, router) = setup(1 << 20);
    let image = png(64, 64);
    let request = multipart_request(vec![
        file_part("image1", "image/png", &image),
        file_part("image2", "image/png", &image),
        text_part("threshold", "0.25"),
    ]);

    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!((body["threshold"].as_f64().unwrap() - 0.25).abs() < 1e-6);
}

#[tokio::test]
async fn test_verify_missing_image() {
    let (provider, router) = setup(1 << 20);
    let request = multipart_request(vec![file_part("image1", "image/png", &png(32, 32))]);

    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MISSING_IMAGE2");
    assert_eq!(provider.total_calls(), 0);
}

#[tokio::test]
async fn test_verify_rejects_unsupported_type() {
    let (_provider, router) = setup(1 << 20);
    let image = png(32, 32);
    let request = multipart_request(vec![
        file_part("image1", "image/gif", &image),
        file_part("image2", "image/png", &image),
    ]);

    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["code"], "UNSUPPORTED_MEDIA_TYPE");
}

#[tokio::test]
async fn test_verify_b64_with_data_url() {
    let (_provider, router) = setup(1 << 20);
    let encoded = BASE64_STANDARD.encode(png(48, 48));
    let request = json_request(
        "/verify-b64",
        json!({
            "image1_b64": format!("data:image/png;base64,{}", encoded),
            "image2_b64": encoded,
        }),
    );

    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_verify_b64_failed_model_has_only_error() {
    let (provider, router) = setup(1 << 20);
    provider.no_face(ModelId::Facenet, 48);
    let encoded = BASE64_STANDARD.encode(png(48, 48));
    let request = json_request("/verify-b64", json!({"image1_b64": encoded, "image2_b64": encoded}));

    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    let failed = &body["results"][1];
    assert_eq!(failed["model"], "Facenet");
    assert!(failed["error"].as_str().unwrap().starts_with("No face detected in image 1."));
    assert!(failed.get("lookalike_percent").is_none());
    assert!(failed.get("same_person").is_none());
    assert_eq!(body["results"][0]["lookalike_percent"], 100);
}

#[tokio::test]
async fn test_verify_b64_invalid_threshold() {
    let (provider, router) = setup(1 << 20);
    let encoded = BASE64_STANDARD.encode(png(48, 48));
    let request = json_request(
        "/verify-b64",
        json!({"image1_b64": encoded, "image2_b64": encoded, "threshold": 1.5}),
    );

    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_THRESHOLD");
    assert_eq!(provider.total_calls(), 0);
}

#[tokio::test]
async fn test_verify_b64_too_large() {
    // Smaller than any valid PNG.
    let (_provider, router) = setup(16);
    let encoded = BASE64_STANDARD.encode(png(48, 48));
    let request = json_request("/verify-b64", json!({"image1_b64": encoded, "image2_b64": encoded}));

    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "IMAGE_TOO_LARGE");
}

#[tokio::test]
async fn test_verify_b64_invalid_base64() {
    let (_provider, router) = setup(1 << 20);
    let request = json_request("/verify-b64", json!({"image1_b64": "@@@", "image2_b64": "@@@"}));

    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_IMAGE");
}

#[tokio::test]
async fn test_admin_reload() {
    let (provider, router) = setup(1 << 20);
    provider.fail_load(ModelId::Facenet);
    let request = Request::builder()
        .method("POST")
        .uri("/admin/reload")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["loaded"], json!(["ArcFace"]));
    assert_eq!(body["failed"][0]["model"], "Facenet");
    assert_eq!(provider.session_clears(), 1);
}

#[tokio::test]
async fn test_healthz() {
    let (provider, router) = setup(1 << 20);
    provider.fail_load(ModelId::ArcFace);

    for uri in ["/healthz", "/health"] {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["app"], "lookalike");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["models_loaded"]["ArcFace"], false);
    }
}
