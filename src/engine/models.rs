//! Supported embedding models
//!
//! The set is closed: configuration that names anything else is rejected when it is
//! parsed, so request handling only ever sees valid identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Pixel normalization applied before an embedding model sees the face crop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// BGR order, `(x - 127.5) / 128`
    InsightFace,
    /// RGB order, per-image standardization (zero mean, unit variance)
    Standardize,
    /// BGR order, per-channel mean subtraction
    VggMean,
}

/// Static description of a supported model
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub weights_file: &'static str,
    pub input_size: (u32, u32),
    pub embedding_dim: usize,
    pub normalization: Normalization,
}

/// Embedding model identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelId {
    ArcFace,
    Facenet,
    Facenet512,
    VggFace,
}

impl ModelId {
    pub const ALL: [ModelId; 4] = [
        ModelId::ArcFace,
        ModelId::Facenet,
        ModelId::Facenet512,
        ModelId::VggFace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::ArcFace => "ArcFace",
            ModelId::Facenet => "Facenet",
            ModelId::Facenet512 => "Facenet512",
            ModelId::VggFace => "VGG-Face",
        }
    }

    pub fn spec(&self) -> ModelSpec {
        match self {
            ModelId::ArcFace => ModelSpec {
                weights_file: "arcface_r100.onnx",
                input_size: (112, 112),
                embedding_dim: 512,
                normalization: Normalization::InsightFace,
            },
            ModelId::Facenet => ModelSpec {
                weights_file: "facenet128.onnx",
                input_size: (160, 160),
                embedding_dim: 128,
                normalization: Normalization::Standardize,
            },
            ModelId::Facenet512 => ModelSpec {
                weights_file: "facenet512.onnx",
                input_size: (160, 160),
                embedding_dim: 512,
                normalization: Normalization::Standardize,
            },
            ModelId::VggFace => ModelSpec {
                weights_file: "vgg_face.onnx",
                input_size: (224, 224),
                embedding_dim: 4096,
                normalization: Normalization::VggMean,
            },
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelId::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| ConfigError::UnsupportedModel {
                name: s.to_string(),
            })
    }
}

impl TryFrom<String> for ModelId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelId> for String {
    fn from(value: ModelId) -> Self {
        value.as_str().to_string()
    }
}

/// Face detector backend name, one step of a fallback cascade
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectorBackend(String);

impl DetectorBackend {
    /// Treats the whole image as an already-cropped face
    pub const PASSTHROUGH: &'static str = "passthrough";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_passthrough(&self) -> bool {
        self.0 == Self::PASSTHROUGH
    }
}

impl fmt::Display for DetectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Comma-joined cascade, as reported in verification outcomes
pub fn cascade_label(cascade: &[DetectorBackend]) -> String {
    cascade
        .iter()
        .map(DetectorBackend::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_round_trips_through_name() {
        for model in ModelId::ALL {
            assert_eq!(model.as_str().parse::<ModelId>().unwrap(), model);
        }
    }

    #[test]
    fn test_unknown_model_rejected() {
        let err = "DeepID".parse::<ModelId>().unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedModel { ref name } if name == "DeepID"));
    }

    #[test]
    fn test_model_id_deserializes_from_string() {
        let models: Vec<ModelId> = serde_json::from_str(r#"["VGG-Face","ArcFace"]"#).unwrap();
        assert_eq!(models, vec![ModelId::VggFace, ModelId::ArcFace]);
        assert!(serde_json::from_str::<Vec<ModelId>>(r#"["Dlib"]"#).is_err());
    }

    #[test]
    fn test_cascade_label() {
        let cascade = vec![
            DetectorBackend::new("scrfd_500m"),
            DetectorBackend::new(DetectorBackend::PASSTHROUGH),
        ];
        assert_eq!(cascade_label(&cascade), "scrfd_500m,passthrough");
        assert!(cascade[1].is_passthrough());
    }
}
