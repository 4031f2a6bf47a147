//! Face Service - verification orchestration
//!
//! Runs the per-model pipeline (pool lookup, extraction of both images, comparison) with
//! failures isolated per model. If any entry of the first pass is an internal error the
//! pool is reset once and the whole batch is run again; the second pass is final.

use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::models::cascade_label;
use crate::engine::{EmbeddingProvider, ModelId, ModelPool};

use super::comparator;
use super::error::{ExtractError, VerifyError};
use super::extractor::EmbeddingExtractor;
use super::types::*;

/// Face verification service
pub struct FaceService<P: EmbeddingProvider> {
    pool: Arc<ModelPool<P>>,
    extractor: Arc<EmbeddingExtractor<P>>,
    enabled_models: Vec<ModelId>,
    default_threshold: f32,
    detector_label: String,
}

impl<P: EmbeddingProvider> FaceService<P> {
    /// Create a new face service
    pub fn new(pool: Arc<ModelPool<P>>, config: &Config) -> Self {
        let extractor = EmbeddingExtractor::new(pool.provider().clone(), config.detection.cascade.clone());
        let detector_label = cascade_label(extractor.cascade());

        Self {
            pool,
            extractor: Arc::new(extractor),
            enabled_models: config.models.enabled.clone(),
            default_threshold: config.recognition.threshold,
            detector_label,
        }
    }

    pub fn pool(&self) -> &Arc<ModelPool<P>> {
        &self.pool
    }

    /// Enabled models, in configured order
    pub fn list_models(&self) -> &[ModelId] {
        &self.enabled_models
    }

    /// Compare two images with each of `models`
    ///
    /// `threshold` defaults to the configured value. Per-model failures are reported as
    /// result entries; an `Err` means the call itself could not run.
    pub async fn verify(
        &self,
        image1: Arc<DynamicImage>,
        image2: Arc<DynamicImage>,
        models: &[ModelId],
        threshold: Option<f32>,
    ) -> Result<VerificationOutcome, VerifyError> {
        let threshold = threshold.unwrap_or(self.default_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(VerifyError::InvalidThreshold { value: threshold });
        }

        let start = Instant::now();
        let first = self.run_pass(&image1, &image2, models, threshold, 1).await;

        let results = if first.iter().any(ComparisonResult::is_internal_error) {
            warn!(
                generation = self.pool.generation(),
                "Internal error during verification, resetting model cache and retrying"
            );
            self.reset_pool().await?;
            self.run_pass(&image1, &image2, models, threshold, 2).await
        } else {
            first
        };

        info!(
            models = models.len(),
            failed = results.iter().filter(|r| !r.is_success()).count(),
            "Verification finished in {:?}",
            start.elapsed()
        );

        Ok(VerificationOutcome {
            detector_backend: self.detector_label.clone(),
            threshold,
            results,
        })
    }

    /// Reset the pool and load every enabled model again
    pub async fn force_reload(&self) -> Result<ReloadReport, VerifyError> {
        info!("Forced reload requested");
        self.reset_pool().await?;
        self.preload().await
    }

    /// Load every enabled model without resetting; failures are reported, not raised
    pub async fn preload(&self) -> Result<ReloadReport, VerifyError> {
        let pool = self.pool.clone();
        let models = self.enabled_models.clone();

        tokio::task::spawn_blocking(move || {
            let mut report = ReloadReport {
                loaded: Vec::new(),
                failed: Vec::new(),
            };
            for model in models {
                match pool.get(model) {
                    Ok(_) => report.loaded.push(model),
                    Err(e) => report.failed.push(ReloadFailure {
                        model,
                        error: e.to_string(),
                    }),
                }
            }
            report
        })
        .await
        .map_err(|e| VerifyError::Recovery {
            reason: e.to_string(),
        })
    }

    /// Process liveness; independent of model state
    pub fn health(&self) -> HealthResult {
        HealthResult {
            healthy: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
            models_loaded: self.pool.get_status(),
        }
    }

    async fn reset_pool(&self) -> Result<(), VerifyError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || pool.reset())
            .await
            .map_err(|e| {
                error!("Model cache reset failed: {}", e);
                VerifyError::Recovery {
                    reason: e.to_string(),
                }
            })
    }

    async fn run_pass(
        &self,
        image1: &Arc<DynamicImage>,
        image2: &Arc<DynamicImage>,
        models: &[ModelId],
        threshold: f32,
        pass: u8,
    ) -> Vec<ComparisonResult> {
        let mut results = Vec::with_capacity(models.len());

        for &model in models {
            let pool = self.pool.clone();
            let extractor = self.extractor.clone();
            let (image1, image2) = (image1.clone(), image2.clone());

            let joined = tokio::task::spawn_blocking(move || {
                compare_model(&pool, &extractor, &image1, &image2, model, threshold)
            })
            .await;

            let result = joined.unwrap_or_else(|e| {
                error!(model = %model, pass, "Comparison task failed: {}", e);
                ComparisonResult::failure(model, FailureKind::Internal)
            });
            results.push(result);
        }

        results
    }
}

/// One model's pipeline; never fails, failures become result entries
fn compare_model<P: EmbeddingProvider>(
    pool: &ModelPool<P>,
    extractor: &EmbeddingExtractor<P>,
    image1: &DynamicImage,
    image2: &DynamicImage,
    model: ModelId,
    threshold: f32,
) -> ComparisonResult {
    let handle = match pool.get(model) {
        Ok(handle) => handle,
        Err(e) => {
            warn!(model = %model, "{}", e);
            return ComparisonResult::failure(model, FailureKind::ModelUnavailable);
        }
    };

    let embeddings = extractor
        .extract(image1, model, &handle, 1)
        .and_then(|e1| Ok((e1, extractor.extract(image2, model, &handle, 2)?)));
    let (e1, e2) = match embeddings {
        Ok(pair) => pair,
        Err(ExtractError::FaceNotDetected { slot }) => {
            info!(model = %model, slot, "No face detected");
            return ComparisonResult::failure(model, FailureKind::FaceNotDetected { slot });
        }
        Err(e @ ExtractError::Internal { .. }) => {
            error!(model = %model, "{}", e);
            return ComparisonResult::failure(model, FailureKind::Internal);
        }
    };

    match comparator::compare(&e1, &e2, threshold) {
        Ok(c) => ComparisonResult::Success {
            model,
            percent: c.percent,
            same_person: c.same_person,
        },
        Err(e) => {
            error!(model = %model, "Comparison failed: {}", e);
            ComparisonResult::failure(model, FailureKind::Internal)
        }
    }
}
