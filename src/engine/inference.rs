//! OpenVINO-backed embedding provider
//!
//! One `Core` is shared by every compiled model. Resetting the session replaces the core
//! and drops the lazily compiled detectors; embedding models are owned by the pool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use image::{DynamicImage, GenericImageView};
use ndarray::Array4;
use openvino::{CompiledModel, Core, ElementType, InferRequest, Shape, Tensor};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::detector::FaceDetector;
use super::embedder::FaceEmbedder;
use super::models::{DetectorBackend, ModelId};
use super::preprocess::{align_face, clamp_box, crop_face};
use super::provider::{EmbeddingProvider, ProviderError, RepresentOptions};
use crate::config::Config;

/// Side lengths accepted as an already-cropped face by the passthrough backend
const PASSTHROUGH_SIDE: std::ops::Range<u32> = 20..600;

/// Margin added around a detected box when alignment is off
const CROP_MARGIN: f32 = 0.1;

/// Wrapper for OpenVINO Core that implements Send + Sync
pub struct SafeCore(Core);
// SAFETY: the core is only touched through the provider's RwLock.
unsafe impl Send for SafeCore {}
unsafe impl Sync for SafeCore {}

/// Compiled model shareable across blocking tasks
#[derive(Clone)]
pub struct SafeCompiledModel(Arc<Mutex<CompiledModel>>);
// SAFETY: every access to the compiled model goes through the mutex.
unsafe impl Send for SafeCompiledModel {}
unsafe impl Sync for SafeCompiledModel {}

impl SafeCompiledModel {
    fn new(compiled: CompiledModel) -> Self {
        Self(Arc::new(Mutex::new(compiled)))
    }

    pub fn create_infer_request(&self) -> Result<InferRequest> {
        Ok(self.0.lock().create_infer_request()?)
    }
}

/// Run a model with one f32 NCHW input and return the finished request
pub fn run_single_input(model: &SafeCompiledModel, input: &Array4<f32>) -> Result<InferRequest> {
    let mut request = model.create_infer_request()?;

    let dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
    let shape = Shape::new(&dims)?;
    let mut tensor = Tensor::new(ElementType::F32, &shape)?;

    let data = input.as_slice().context("input tensor is not contiguous")?;
    let raw = tensor.get_raw_data_mut()?;
    if raw.len() != data.len() * 4 {
        bail!("tensor holds {} bytes, input has {} floats", raw.len(), data.len());
    }
    for (chunk, value) in raw.chunks_exact_mut(4).zip(data) {
        chunk.copy_from_slice(&value.to_ne_bytes());
    }

    request.set_input_tensor(&tensor)?;
    request.infer()?;
    Ok(request)
}

/// Copy a tensor's contents out as f32 values
pub fn read_tensor_f32(tensor: &Tensor) -> Result<Vec<f32>> {
    let raw = tensor.get_raw_data()?;
    Ok(raw
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Embedding model handle held by the model pool
pub struct OpenVinoModel {
    id: ModelId,
    compiled: SafeCompiledModel,
}

pub struct OpenVinoProvider {
    core: RwLock<SafeCore>,
    device: String,
    weights_dir: PathBuf,
    detector_paths: HashMap<String, PathBuf>,
    detectors: RwLock<HashMap<String, SafeCompiledModel>>,
    confidence_threshold: f32,
}

impl OpenVinoProvider {
    pub fn new(config: &Config) -> Result<Self> {
        let core = Core::new().context("failed to initialize OpenVINO")?;
        let detector_paths = config
            .detection
            .backends
            .iter()
            .map(|(name, backend)| (name.clone(), backend.path.clone()))
            .collect();

        Ok(Self {
            core: RwLock::new(SafeCore(core)),
            device: config.inference.device.clone(),
            weights_dir: config.inference.weights_dir.clone(),
            detector_paths,
            detectors: RwLock::new(HashMap::new()),
            confidence_threshold: config.detection.confidence_threshold,
        })
    }

    fn compile(&self, path: &Path) -> Result<SafeCompiledModel> {
        if !path.exists() {
            bail!("weights file {} not found", path.display());
        }
        let path_str = path.to_str().context("weights path is not valid UTF-8")?;

        // Core methods take &mut self in the Rust bindings.
        let mut core = self.core.write();
        let model = core.0.read_model_from_file(path_str, "")?;
        let compiled = core.0.compile_model(&model, self.device.as_str().into())?;
        Ok(SafeCompiledModel::new(compiled))
    }

    fn detector(&self, backend: &DetectorBackend) -> Result<SafeCompiledModel, ProviderError> {
        if let Some(model) = self.detectors.read().get(backend.as_str()) {
            return Ok(model.clone());
        }

        let mut detectors = self.detectors.write();
        if let Some(model) = detectors.get(backend.as_str()) {
            return Ok(model.clone());
        }
        let backend_error = |reason: String| ProviderError::Backend {
            backend: backend.to_string(),
            reason,
        };
        let path = self
            .detector_paths
            .get(backend.as_str())
            .ok_or_else(|| backend_error("no model path configured".to_string()))?;

        info!("Loading detector {} from {}", backend, path.display());
        let model = self.compile(path).map_err(|e| backend_error(e.to_string()))?;
        detectors.insert(backend.to_string(), model.clone());
        Ok(model)
    }

    /// Locate the face and return the crop fed to the embedding model
    fn locate_face(
        &self,
        image: &DynamicImage,
        backend: &DetectorBackend,
        input_size: (u32, u32),
        options: RepresentOptions,
    ) -> Result<DynamicImage, ProviderError> {
        let no_face = || ProviderError::NoFace {
            backend: backend.to_string(),
        };

        if backend.is_passthrough() {
            let (w, h) = image.dimensions();
            let looks_cropped = PASSTHROUGH_SIDE.contains(&w) && PASSTHROUGH_SIDE.contains(&h);
            return if looks_cropped || !options.enforce_detection {
                Ok(image.clone())
            } else {
                Err(no_face())
            };
        }

        let model = self.detector(backend)?;
        let faces = FaceDetector::new(&model, self.confidence_threshold)
            .detect(image)
            .map_err(|e| ProviderError::Backend {
                backend: backend.to_string(),
                reason: e.to_string(),
            })?;

        let Some(face) = faces.first() else {
            return if options.enforce_detection {
                Err(no_face())
            } else {
                Ok(image.clone())
            };
        };

        // A box clamped to nothing is not a face.
        let bbox = (face.x1, face.y1, face.x2, face.y2);
        if clamp_box(bbox, image.dimensions()).is_none() {
            debug!(backend = %backend, ?bbox, "Detection lies outside the image");
            return Err(no_face());
        }

        let has_landmarks = face.landmarks.iter().any(|&(x, y)| x != 0.0 || y != 0.0);
        if options.align && has_landmarks {
            Ok(align_face(image, &face.landmarks, input_size))
        } else {
            crop_face(image, bbox, CROP_MARGIN).ok_or_else(no_face)
        }
    }
}

impl EmbeddingProvider for OpenVinoProvider {
    type Model = OpenVinoModel;

    fn load_model(&self, model: ModelId) -> Result<OpenVinoModel, ProviderError> {
        let path = self.weights_dir.join(model.spec().weights_file);
        let compiled = self.compile(&path).map_err(|e| ProviderError::ModelLoad {
            model,
            reason: e.to_string(),
        })?;
        Ok(OpenVinoModel {
            id: model,
            compiled,
        })
    }

    fn represent(
        &self,
        model: &OpenVinoModel,
        image: &DynamicImage,
        backend: &DetectorBackend,
        options: RepresentOptions,
    ) -> Result<Vec<f32>, ProviderError> {
        let spec = model.id.spec();
        let face = self.locate_face(image, backend, spec.input_size, options)?;
        debug!(model = %model.id, backend = %backend, "Face located");

        FaceEmbedder::new(&model.compiled, spec)
            .embed(&face)
            .map_err(|e| ProviderError::Session {
                reason: format!("{} inference failed: {}", model.id, e),
            })
    }

    fn clear_session(&self) {
        self.detectors.write().clear();
        match Core::new() {
            Ok(core) => {
                *self.core.write() = SafeCore(core);
                info!("OpenVINO core recreated");
            }
            Err(e) => warn!("Failed to recreate OpenVINO core: {}", e),
        }
    }
}
