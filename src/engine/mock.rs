//! Scripted in-memory provider for tests
//!
//! Images are told apart by their width. Embeddings default to a vector derived from the
//! image size and can be pinned per width; detection and session failures are scripted.

use std::collections::{HashMap, HashSet};

use image::{DynamicImage, GenericImageView};
use parking_lot::Mutex;

use super::models::{DetectorBackend, ModelId};
use super::provider::{EmbeddingProvider, ProviderError, RepresentOptions};

/// Handle produced by [`ScriptedProvider::load_model`]
#[derive(Debug)]
pub struct ScriptedModel {
    model: ModelId,
}

impl ScriptedModel {
    pub fn model(&self) -> ModelId {
        self.model
    }
}

#[derive(Default)]
struct Script {
    failing_loads: HashSet<ModelId>,
    failing_backends: HashSet<String>,
    faceless: HashSet<(ModelId, u32)>,
    embeddings: HashMap<u32, Vec<f32>>,
    poisoned: bool,
    panic_on_represent: bool,
    panic_on_next_clear: bool,
    loads: HashMap<ModelId, usize>,
    calls: HashMap<ModelId, usize>,
    backend_calls: Vec<String>,
    clears: usize,
}

#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// `load_model` fails for `model`
    pub fn fail_load(&self, model: ModelId) {
        self.script.lock().failing_loads.insert(model);
    }

    /// Every call through `backend` fails with a backend error
    pub fn fail_backend(&self, backend: &str) {
        self.script.lock().failing_backends.insert(backend.to_string());
    }

    /// No backend finds a face in images of `width` for `model`
    pub fn no_face(&self, model: ModelId, width: u32) {
        self.script.lock().faceless.insert((model, width));
    }

    pub fn set_embedding(&self, width: u32, embedding: Vec<f32>) {
        self.script.lock().embeddings.insert(width, embedding);
    }

    /// Session faults on every `represent` until the next `clear_session`
    pub fn poison_session(&self) {
        self.script.lock().poisoned = true;
    }

    pub fn panic_on_represent(&self, enabled: bool) {
        self.script.lock().panic_on_represent = enabled;
    }

    /// The next `clear_session` panics instead of clearing
    pub fn panic_on_next_clear(&self) {
        self.script.lock().panic_on_next_clear = true;
    }

    pub fn load_count(&self, model: ModelId) -> usize {
        self.script.lock().loads.get(&model).copied().unwrap_or(0)
    }

    /// Number of `represent` calls made for `model`
    pub fn calls(&self, model: ModelId) -> usize {
        self.script.lock().calls.get(&model).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.script.lock().calls.values().sum()
    }

    /// Detector backends in the order they were tried
    pub fn backend_calls(&self) -> Vec<String> {
        self.script.lock().backend_calls.clone()
    }

    pub fn session_clears(&self) -> usize {
        self.script.lock().clears
    }
}

impl EmbeddingProvider for ScriptedProvider {
    type Model = ScriptedModel;

    fn load_model(&self, model: ModelId) -> Result<ScriptedModel, ProviderError> {
        let mut script = self.script.lock();
        *script.loads.entry(model).or_default() += 1;
        if script.failing_loads.contains(&model) {
            return Err(ProviderError::ModelLoad {
                model,
                reason: "weights not found".to_string(),
            });
        }
        Ok(ScriptedModel { model })
    }

    fn represent(
        &self,
        model: &ScriptedModel,
        image: &DynamicImage,
        backend: &DetectorBackend,
        _options: RepresentOptions,
    ) -> Result<Vec<f32>, ProviderError> {
        let mut script = self.script.lock();
        *script.calls.entry(model.model).or_default() += 1;
        script.backend_calls.push(backend.to_string());

        if script.panic_on_represent {
            drop(script);
            panic!("scripted provider panic");
        }
        if script.poisoned {
            return Err(ProviderError::Session {
                reason: "session poisoned".to_string(),
            });
        }
        if script.failing_backends.contains(backend.as_str()) {
            return Err(ProviderError::Backend {
                backend: backend.to_string(),
                reason: "scripted failure".to_string(),
            });
        }

        let (width, height) = image.dimensions();
        if script.faceless.contains(&(model.model, width)) {
            return Err(ProviderError::NoFace {
                backend: backend.to_string(),
            });
        }

        Ok(script
            .embeddings
            .get(&width)
            .cloned()
            .unwrap_or_else(|| vec![1.0, width as f32, height as f32]))
    }

    fn clear_session(&self) {
        let mut script = self.script.lock();
        if script.panic_on_next_clear {
            script.panic_on_next_clear = false;
            drop(script);
            panic!("scripted session clear panic");
        }
        script.poisoned = false;
        script.clears += 1;
    }
}
