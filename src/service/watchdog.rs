//! Pipeline watchdog
//!
//! Periodically verifies the self-test image against itself with the enabled models. A
//! failed entry is only logged, since `verify` already tried its own reset and retry. If
//! the call itself fails or panics, the model pool is reset here as a last resort.
//! Without a self-test image the loop stays alive but does no work.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use image::DynamicImage;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::EmbeddingProvider;
use crate::utils::image::decode_file;

use super::face_service::FaceService;

pub struct Watchdog<P: EmbeddingProvider> {
    service: Arc<FaceService<P>>,
    image: Option<Arc<DynamicImage>>,
    interval: Duration,
    shutdown: Notify,
    cycles: AtomicU64,
    escalations: AtomicU64,
}

impl<P: EmbeddingProvider> Watchdog<P> {
    pub fn new(service: Arc<FaceService<P>>, image: Option<DynamicImage>, interval: Duration) -> Self {
        Self {
            service,
            image: image.map(Arc::new),
            interval,
            shutdown: Notify::new(),
            cycles: AtomicU64::new(0),
            escalations: AtomicU64::new(0),
        }
    }

    /// Build from the `[watchdog]` section; an unreadable image disables the self-test
    pub fn from_config(service: Arc<FaceService<P>>, config: &Config) -> Self {
        let image = config.watchdog.smoketest_image.as_deref().and_then(|path| {
            decode_file(path)
                .map_err(|e| warn!("Cannot read self-test image {}: {}", path.display(), e))
                .ok()
        });
        Self::new(service, image, config.watchdog_interval())
    }

    pub fn has_self_test(&self) -> bool {
        self.image.is_some()
    }

    /// Completed cycles, including no-op ones
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    /// Resets forced by the watchdog itself
    pub fn escalations(&self) -> u64 {
        self.escalations.load(Ordering::Acquire)
    }

    /// Run until [`Watchdog::shutdown`] is called
    pub async fn run(self: Arc<Self>) {
        match &self.image {
            Some(_) => info!("Watchdog started, interval {:?}", self.interval),
            None => info!("Watchdog started without a self-test image, checks disabled"),
        }

        loop {
            if let Some(image) = self.image.clone() {
                tokio::select! {
                    _ = self.check_once(image) => {}
                    _ = self.shutdown.notified() => break,
                }
            }
            self.cycles.fetch_add(1, Ordering::AcqRel);

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.notified() => break,
            }
        }

        info!("Watchdog shutting down");
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// One self-test: verify the image against itself, escalate if the call fails
    pub async fn check_once(&self, image: Arc<DynamicImage>) {
        let models = self.service.list_models();
        let verify = self.service.verify(image.clone(), image, models, None);

        match AssertUnwindSafe(verify).catch_unwind().await {
            Ok(Ok(outcome)) if outcome.all_succeeded() => {
                debug!("Watchdog self-test ok");
            }
            Ok(Ok(outcome)) => {
                warn!(failed = ?outcome.failed_models(), "Watchdog self-test reported errors");
            }
            Ok(Err(e)) => {
                error!("Watchdog self-test failed: {}", e);
                self.escalate().await;
            }
            Err(_) => {
                error!("Watchdog self-test panicked");
                self.escalate().await;
            }
        }
    }

    async fn escalate(&self) {
        self.escalations.fetch_add(1, Ordering::AcqRel);
        let pool = self.service.pool().clone();
        match tokio::task::spawn_blocking(move || pool.reset()).await {
            Ok(()) => warn!("Watchdog forced a model cache reset"),
            Err(e) => error!("Watchdog reset failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::ScriptedProvider;
    use crate::engine::{ModelId, ModelPool};

    fn service() -> (Arc<ScriptedProvider>, Arc<FaceService<ScriptedProvider>>) {
        let provider = Arc::new(ScriptedProvider::new());
        let pool = Arc::new(ModelPool::new(provider.clone()));
        let mut config = Config::default();
        config.models.enabled = vec![ModelId::Facenet];
        (provider, Arc::new(FaceService::new(pool, &config)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_image_only_sleeps() {
        let (provider, service) = service();
        let interval = Duration::from_secs(600);
        let watchdog = Arc::new(Watchdog::new(service, None, interval));
        assert!(!watchdog.has_self_test());

        let handle = tokio::spawn(watchdog.clone().run());
        tokio::time::sleep(interval * 20 + Duration::from_secs(1)).await;

        assert!(watchdog.cycles() >= 20);
        assert_eq!(provider.total_calls(), 0);
        assert_eq!(provider.load_count(ModelId::Facenet), 0);

        watchdog.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_sleep() {
        let (_provider, service) = service();
        let watchdog = Arc::new(Watchdog::new(service, None, Duration::from_secs(86_400)));

        let handle = tokio::spawn(watchdog.clone().run());
        tokio::task::yield_now().await;
        watchdog.shutdown();

        let joined = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(joined.is_ok(), "watchdog did not stop");
        assert_eq!(watchdog.cycles(), 1);
    }

    #[tokio::test]
    async fn test_healthy_check_does_not_escalate() {
        let (provider, service) = service();
        let watchdog = Watchdog::new(service, Some(DynamicImage::new_rgb8(80, 80)), Duration::from_secs(1));

        watchdog.check_once(Arc::new(DynamicImage::new_rgb8(80, 80))).await;
        assert_eq!(provider.calls(ModelId::Facenet), 2);
        assert_eq!(watchdog.escalations(), 0);
        assert_eq!(provider.session_clears(), 0);
    }

    #[tokio::test]
    async fn test_failed_entries_are_only_logged() {
        let (provider, service) = service();
        provider.no_face(ModelId::Facenet, 80);
        let watchdog = Watchdog::new(service, None, Duration::from_secs(1));

        watchdog.check_once(Arc::new(DynamicImage::new_rgb8(80, 80))).await;
        assert_eq!(watchdog.escalations(), 0);
        assert_eq!(provider.session_clears(), 0);
    }

    #[tokio::test]
    async fn test_failed_call_forces_reset() {
        let (provider, service) = service();
        provider.poison_session();
        provider.panic_on_next_clear();
        let watchdog = Watchdog::new(service.clone(), None, Duration::from_secs(1));

        watchdog.check_once(Arc::new(DynamicImage::new_rgb8(80, 80))).await;
        assert_eq!(watchdog.escalations(), 1);
        // The recovery inside verify panicked; the watchdog's own reset went through.
        assert_eq!(provider.session_clears(), 1);
        assert_eq!(service.pool().generation(), 1);
    }
}
