//! Face embedder
//!
//! Runs a compiled embedding model on an aligned (or cropped) face and returns the raw
//! output vector. Normalization for comparison happens in the comparator.

use anyhow::{bail, Result};
use image::DynamicImage;

use super::models::ModelSpec;
use super::inference::{read_tensor_f32, run_single_input, SafeCompiledModel};
use super::preprocess::preprocess_for_embedding;

pub struct FaceEmbedder<'a> {
    model: &'a SafeCompiledModel,
    spec: ModelSpec,
}

impl<'a> FaceEmbedder<'a> {
    pub fn new(model: &'a SafeCompiledModel, spec: ModelSpec) -> Self {
        Self { model, spec }
    }

    /// Extract the embedding of a single face crop
    pub fn embed(&self, face: &DynamicImage) -> Result<Vec<f32>> {
        let input = preprocess_for_embedding(face, self.spec.input_size, self.spec.normalization);
        let request = run_single_input(self.model, &input)?;
        let output = read_tensor_f32(&request.get_output_tensor()?)?;

        if output.len() != self.spec.embedding_dim {
            bail!(
                "embedding has {} values, model declares {}",
                output.len(),
                self.spec.embedding_dim
            );
        }
        if output.iter().any(|v| !v.is_finite()) {
            bail!("embedding contains non-finite values");
        }
        Ok(output)
    }
}
