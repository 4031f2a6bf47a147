//! Model Pool
//!
//! Lazily builds one model handle per [`ModelId`] and keeps it until an explicit
//! [`ModelPool::reset`]. A reset evicts every handle at once and clears the provider's
//! shared session; callers that already hold a handle keep a valid `Arc` to it.
//!
//! Each model has its own slot. A load holds only that slot's load mutex, so readers of
//! other models (and of the same model once installed) never wait on it. A handle built
//! across a reset is returned to its caller but not installed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, error, info};

use super::models::ModelId;
use super::provider::EmbeddingProvider;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("model '{model}' is unavailable: {reason}")]
    ModelUnavailable { model: ModelId, reason: String },
}

struct Slot<M> {
    handle: RwLock<Option<Arc<M>>>,
    loading: Mutex<()>,
}

impl<M> Slot<M> {
    fn new() -> Self {
        Self {
            handle: RwLock::new(None),
            loading: Mutex::new(()),
        }
    }
}

/// Model cache shared by request handlers and the watchdog
pub struct ModelPool<P: EmbeddingProvider> {
    provider: Arc<P>,
    slots: HashMap<ModelId, Slot<P::Model>>,
    generation: AtomicU64,
}

impl<P: EmbeddingProvider> ModelPool<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            slots: ModelId::ALL.into_iter().map(|m| (m, Slot::new())).collect(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Get or load a model handle
    pub fn get(&self, model: ModelId) -> Result<Arc<P::Model>, CacheError> {
        let slot = self.slots.get(&model).ok_or_else(|| CacheError::ModelUnavailable {
            model,
            reason: "model has no cache slot".to_string(),
        })?;

        if let Some(handle) = slot.handle.read().as_ref() {
            return Ok(handle.clone());
        }

        // One load per model at a time; the handle lock is not held while loading.
        let _loading = slot.loading.lock();
        if let Some(handle) = slot.handle.read().as_ref() {
            return Ok(handle.clone());
        }

        let generation = self.generation();
        info!("Loading model: {}", model);
        let start = Instant::now();
        let handle = self.provider.load_model(model).map_err(|e| {
            error!("Failed to load model {}: {}", model, e);
            CacheError::ModelUnavailable {
                model,
                reason: e.to_string(),
            }
        })?;
        let handle = Arc::new(handle);

        // Reset bumps the generation while holding every handle lock.
        let mut installed = slot.handle.write();
        if self.generation() == generation {
            *installed = Some(handle.clone());
            info!("Model {} loaded in {:?}", model, start.elapsed());
        } else {
            debug!("Model {} finished loading after a reset; not cached", model);
        }

        Ok(handle)
    }

    /// Evict every handle and release the provider session
    pub fn reset(&self) {
        // The session may wait on an in-flight load, so it is cleared before any handle lock
        // is taken. Handles installed in between are evicted below.
        self.provider.clear_session();

        let mut handles: Vec<RwLockWriteGuard<'_, Option<Arc<P::Model>>>> = ModelId::ALL
            .iter()
            .filter_map(|m| self.slots.get(m))
            .map(|slot| slot.handle.write())
            .collect();
        let evicted = handles.iter().filter(|h| h.is_some()).count();
        for handle in handles.iter_mut() {
            **handle = None;
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        drop(handles);
        info!(evicted, generation, "Model cache reset");
    }

    pub fn is_loaded(&self, model: ModelId) -> bool {
        self.slots
            .get(&model)
            .is_some_and(|slot| slot.handle.read().is_some())
    }

    /// Load state of every supported model
    pub fn get_status(&self) -> Vec<(ModelId, bool)> {
        ModelId::ALL
            .into_iter()
            .map(|m| (m, self.is_loaded(m)))
            .collect()
    }

    /// Number of resets since the pool was created
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
