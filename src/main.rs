//! Face Verification Service
//!
//! Per-model lookalike scores for two face images, served over REST with OpenVINO
//! inference and a self-test watchdog.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lookalike::api::{create_rest_router, AppState};
use lookalike::config::Config;
use lookalike::engine::{ModelPool, OpenVinoProvider};
use lookalike::service::{FaceService, Watchdog};

#[tokio::main]
async fn main() -> Result<()> {
    let (config, notices) = Config::from_sources(Config::default_path())?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting Face Verification Service v{}", env!("CARGO_PKG_VERSION"));
    for notice in &notices {
        notice.log();
    }

    info!("Configuration loaded:");
    info!("  Listen: {}", config.socket_addr());
    info!("  Device: {}", config.inference.device);
    info!("  Models: {:?}", config.models.enabled);
    info!("  Detector cascade: {:?}", config.detection.cascade);
    info!("  Threshold: {}", config.recognition.threshold);

    // Initialize model pool
    let provider = Arc::new(OpenVinoProvider::new(&config)?);
    let pool = Arc::new(ModelPool::new(provider));

    // Create face service
    let service = Arc::new(FaceService::new(pool.clone(), &config));

    // Warm up enabled models; failures surface again per request
    let report = service.preload().await?;
    for failure in &report.failed {
        warn!("Model {} not loaded at startup: {}", failure.model, failure.error);
    }
    info!("Preloaded models: {:?}", report.loaded);

    // Start watchdog
    let watchdog = config.watchdog.enabled.then(|| {
        let watchdog = Arc::new(Watchdog::from_config(service.clone(), &config));
        let handle = tokio::spawn(watchdog.clone().run());
        (watchdog, handle)
    });
    if watchdog.is_none() {
        info!("Watchdog disabled");
    }

    // Create REST router
    let app_state = Arc::new(AppState {
        service: service.clone(),
        max_image_bytes: config.server.max_image_bytes,
    });
    let rest_router = create_rest_router(app_state);

    let addr = config.socket_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("REST API listening on http://{}", addr);
    info!("Face Verification Service is ready!");

    axum::serve(listener, rest_router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received, cleaning up...");

    if let Some((watchdog, handle)) = watchdog {
        watchdog.shutdown();
        if let Err(e) = handle.await {
            warn!("Watchdog task ended abnormally: {}", e);
        }
    }

    info!("Goodbye!");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
