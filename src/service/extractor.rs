//! Embedding extraction over a detector cascade
//!
//! Backends are tried in configured order with alignment and strict detection. A detector
//! failure moves on to the next backend; a session fault stops the cascade immediately.

use std::sync::Arc;

use image::DynamicImage;
use tracing::{debug, warn};

use crate::engine::{DetectorBackend, EmbeddingProvider, ModelId, RepresentOptions};

use super::error::{ExtractError, ImageSlot};

pub struct EmbeddingExtractor<P: EmbeddingProvider> {
    provider: Arc<P>,
    cascade: Vec<DetectorBackend>,
}

impl<P: EmbeddingProvider> EmbeddingExtractor<P> {
    pub fn new(provider: Arc<P>, cascade: Vec<DetectorBackend>) -> Self {
        Self { provider, cascade }
    }

    pub fn cascade(&self) -> &[DetectorBackend] {
        &self.cascade
    }

    /// Embedding from the first backend that succeeds
    pub fn extract(
        &self,
        image: &DynamicImage,
        model_id: ModelId,
        model: &P::Model,
        slot: ImageSlot,
    ) -> Result<Vec<f32>, ExtractError> {
        let options = RepresentOptions {
            align: true,
            enforce_detection: true,
        };

        for backend in &self.cascade {
            match self.provider.represent(model, image, backend, options) {
                Ok(embedding) => {
                    debug!(model = %model_id, backend = %backend, slot, "Embedding extracted");
                    return Ok(embedding);
                }
                Err(e) if e.is_detector_failure() => {
                    debug!(model = %model_id, backend = %backend, slot, "Backend failed: {}", e);
                }
                Err(e) => {
                    warn!(model = %model_id, backend = %backend, slot, "Extraction aborted: {}", e);
                    return Err(ExtractError::Internal {
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(ExtractError::FaceNotDetected { slot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::ScriptedProvider;
    use crate::engine::ModelPool;

    fn cascade() -> Vec<DetectorBackend> {
        ["scrfd_500m", "scrfd_10g", "passthrough"]
            .into_iter()
            .map(DetectorBackend::new)
            .collect()
    }

    fn setup() -> (Arc<ScriptedProvider>, ModelPool<ScriptedProvider>, EmbeddingExtractor<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new());
        let pool = ModelPool::new(provider.clone());
        let extractor = EmbeddingExtractor::new(provider.clone(), cascade());
        (provider, pool, extractor)
    }

    #[test]
    fn test_first_backend_wins() {
        let (provider, pool, extractor) = setup();
        let model = pool.get(ModelId::ArcFace).unwrap();
        let image = DynamicImage::new_rgb8(100, 120);

        let embedding = extractor.extract(&image, ModelId::ArcFace, &model, 1).unwrap();
        assert_eq!(embedding, vec![1.0, 100.0, 120.0]);
        assert_eq!(provider.backend_calls(), vec!["scrfd_500m"]);
    }

    #[test]
    fn test_falls_through_failing_backends_in_order() {
        let (provider, pool, extractor) = setup();
        provider.fail_backend("scrfd_500m");
        provider.fail_backend("scrfd_10g");
        let model = pool.get(ModelId::ArcFace).unwrap();

        let result = extractor.extract(&DynamicImage::new_rgb8(64, 64), ModelId::ArcFace, &model, 1);
        assert!(result.is_ok());
        assert_eq!(provider.backend_calls(), vec!["scrfd_500m", "scrfd_10g", "passthrough"]);
    }

    #[test]
    fn test_exhausted_cascade_reports_slot() {
        let (provider, pool, extractor) = setup();
        provider.no_face(ModelId::Facenet, 77);
        let model = pool.get(ModelId::Facenet).unwrap();

        let err = extractor
            .extract(&DynamicImage::new_rgb8(77, 90), ModelId::Facenet, &model, 2)
            .unwrap_err();
        assert!(matches!(err, ExtractError::FaceNotDetected { slot: 2 }));
        assert_eq!(provider.calls(ModelId::Facenet), 3);
    }

    #[test]
    fn test_session_fault_stops_cascade() {
        let (provider, pool, extractor) = setup();
        let model = pool.get(ModelId::Facenet).unwrap();
        provider.poison_session();

        let err = extractor
            .extract(&DynamicImage::new_rgb8(50, 50), ModelId::Facenet, &model, 1)
            .unwrap_err();
        assert!(matches!(err, ExtractError::Internal { .. }));
        assert_eq!(provider.backend_calls(), vec!["scrfd_500m"]);
    }
}
