//! Face verification service configuration
//!
//! Values come from `config.toml` (every section optional), then `LOOKALIKE_*`
//! environment overrides, then an optional `models.txt` that switches models on and off.
//! [`Config::validate`] runs once at startup; nothing is re-checked per request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::models::{DetectorBackend, ModelId};

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported model '{name}' (supported: ArcFace, Facenet, Facenet512, VGG-Face)")]
    UnsupportedModel { name: String },

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("threshold {value} is outside [0, 1]")]
    InvalidThreshold { value: f32 },

    #[error("detector cascade is empty")]
    EmptyCascade,

    #[error("detector backend '{backend}' has no model path configured")]
    MissingDetectorPath { backend: String },

    #[error("no verification models enabled")]
    NoModelsEnabled,

    #[error("watchdog interval must be greater than zero")]
    InvalidInterval,
}

/// Something worth reporting about where configuration came from
///
/// Loading runs before the log subscriber exists, so these are collected and logged once
/// logging is up.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigNotice {
    DefaultsUsed { path: PathBuf },
    ModelsFileUnreadable { path: PathBuf, reason: String },
    ModelsFileEmpty { path: PathBuf, kept: Vec<ModelId> },
}

impl ConfigNotice {
    pub fn log(&self) {
        match self {
            ConfigNotice::DefaultsUsed { path } => {
                warn!("Config file {} not found, using defaults", path.display())
            }
            ConfigNotice::ModelsFileUnreadable { path, reason } => {
                warn!("Cannot read models file {}: {}", path.display(), reason)
            }
            ConfigNotice::ModelsFileEmpty { path, kept } => {
                info!("{} enables no models, keeping {:?}", path.display(), kept)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub inference: InferenceConfig,
    pub models: ModelsConfig,
    pub detection: DetectionConfig,
    pub recognition: RecognitionConfig,
    pub watchdog: WatchdogConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_image_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub device: String,
    pub weights_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub enabled: Vec<ModelId>,
    pub models_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub cascade: Vec<DetectorBackend>,
    pub confidence_threshold: f32,
    pub backends: HashMap<String, DetectorBackendConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorBackendConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub smoketest_image: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_image_bytes: 5 * 1024 * 1024,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: "CPU".to_string(),
            weights_dir: PathBuf::from("weights"),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            enabled: vec![ModelId::Facenet],
            models_file: Some(PathBuf::from("models.txt")),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let backends = [
            ("scrfd_500m", "weights/scrfd_500m_kps.onnx"),
            ("scrfd_10g", "weights/scrfd_10g_kps.onnx"),
        ]
        .into_iter()
        .map(|(name, path)| {
            (
                name.to_string(),
                DetectorBackendConfig {
                    path: PathBuf::from(path),
                },
            )
        })
        .collect();

        Self {
            cascade: vec![
                DetectorBackend::new("scrfd_500m"),
                DetectorBackend::new("scrfd_10g"),
                DetectorBackend::new(DetectorBackend::PASSTHROUGH),
            ],
            confidence_threshold: 0.5,
            backends,
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self { threshold: 0.70 }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 600,
            smoketest_image: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            inference: InferenceConfig::default(),
            models: ModelsConfig::default(),
            detection: DetectionConfig::default(),
            recognition: RecognitionConfig::default(),
            watchdog: WatchdogConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    const ENV_HOST: &'static str = "LOOKALIKE_HOST";
    const ENV_PORT: &'static str = "LOOKALIKE_PORT";
    const ENV_THRESHOLD: &'static str = "LOOKALIKE_THRESHOLD";
    const ENV_MODELS: &'static str = "LOOKALIKE_MODELS";
    const ENV_WATCHDOG_ENABLED: &'static str = "LOOKALIKE_WATCHDOG_ENABLED";
    const ENV_WATCHDOG_INTERVAL: &'static str = "LOOKALIKE_WATCHDOG_INTERVAL_SEC";
    const ENV_SMOKETEST_IMAGE: &'static str = "LOOKALIKE_SMOKETEST_IMAGE";
    const ENV_LOG_LEVEL: &'static str = "LOOKALIKE_LOG_LEVEL";

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_path() -> String {
        std::env::var("LOOKALIKE_CONFIG").unwrap_or_else(|_| "config.toml".to_string())
    }

    /// Full startup pipeline: file (or defaults), environment, `models.txt`, validation.
    pub fn from_sources(path: impl AsRef<Path>) -> anyhow::Result<(Self, Vec<ConfigNotice>)> {
        let path = path.as_ref();
        let mut notices = Vec::new();
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            notices.push(ConfigNotice::DefaultsUsed {
                path: path.to_path_buf(),
            });
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        notices.extend(config.apply_models_file());
        config.validate()?;
        Ok((config, notices))
    }

    /// Applies `LOOKALIKE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(Self::ENV_HOST) {
            self.server.host = host;
        }
        if let Some(port) = lookup(Self::ENV_PORT) {
            self.server.port = parse_value(Self::ENV_PORT, &port)?;
        }
        if let Some(threshold) = lookup(Self::ENV_THRESHOLD) {
            self.recognition.threshold = parse_value(Self::ENV_THRESHOLD, &threshold)?;
        }
        if let Some(models) = lookup(Self::ENV_MODELS) {
            self.models.enabled = models
                .split(',')
                .filter(|name| !name.trim().is_empty())
                .map(str::parse)
                .collect::<Result<_, _>>()?;
        }
        if let Some(enabled) = lookup(Self::ENV_WATCHDOG_ENABLED) {
            self.watchdog.enabled = parse_bool(Self::ENV_WATCHDOG_ENABLED, &enabled)?;
        }
        if let Some(interval) = lookup(Self::ENV_WATCHDOG_INTERVAL) {
            self.watchdog.interval_secs = parse_value(Self::ENV_WATCHDOG_INTERVAL, &interval)?;
        }
        if let Some(image) = lookup(Self::ENV_SMOKETEST_IMAGE) {
            self.watchdog.smoketest_image = (!image.trim().is_empty()).then(|| PathBuf::from(image));
        }
        if let Some(level) = lookup(Self::ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Replaces the enabled set with the models switched on in `models.txt`, if any.
    pub fn apply_models_file(&mut self) -> Option<ConfigNotice> {
        let path = self.models.models_file.clone()?;
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                return Some(ConfigNotice::ModelsFileUnreadable {
                    path,
                    reason: e.to_string(),
                });
            }
        };

        let enabled = parse_models_file(&text);
        if enabled.is_empty() {
            return Some(ConfigNotice::ModelsFileEmpty {
                path,
                kept: self.models.enabled.clone(),
            });
        }
        self.models.enabled = enabled;
        None
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.recognition.threshold) {
            return Err(ConfigError::InvalidThreshold {
                value: self.recognition.threshold,
            });
        }
        if self.models.enabled.is_empty() {
            return Err(ConfigError::NoModelsEnabled);
        }
        if self.detection.cascade.is_empty() {
            return Err(ConfigError::EmptyCascade);
        }
        for backend in &self.detection.cascade {
            if !backend.is_passthrough() && !self.detection.backends.contains_key(backend.as_str()) {
                return Err(ConfigError::MissingDetectorPath {
                    backend: backend.to_string(),
                });
            }
        }
        if self.watchdog.interval_secs == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        Ok(())
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog.interval_secs)
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Parses `models.txt` lines of the form `Facenet = true`.
///
/// Blank lines and `#` comments are ignored; malformed lines and unknown model names are
/// skipped. Returned in file order without duplicates.
pub fn parse_models_file(text: &str) -> Vec<ModelId> {
    let mut enabled = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name, flag)) = line.split_once('=') else {
            continue;
        };
        let Ok(model) = name.trim().parse::<ModelId>() else {
            continue;
        };
        if flag.trim().eq_ignore_ascii_case("true") && !enabled.contains(&model) {
            enabled.push(model);
        }
    }
    enabled
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
