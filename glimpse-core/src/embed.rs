use crate::detect::DetectedFace;
use image::RgbImage;
use ndarray::Array1;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Invalid embedding dimension, expected {expected} but got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// Embedding dimension produced by the face embedding model
pub const EMBEDDING_DIM: usize = 512;

/// Raw (not normalized) embedding vector for one face
pub type Embedding = Array1<f32>;

/// Lighting probe scores reported alongside an embedding.
///
/// The model's response to a synthetic bright and a synthetic dark crop,
/// compared against the face. Only used for [`crate::recognize::BrightnessHint`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrightnessProbe {
    pub bright: f32,
    pub dark: f32,
}

/// Produces an embedding for a detected face.
///
/// Implementations own cropping and alignment of the face region.
pub trait FaceEmbedder {
    fn embed(&mut self, frame: &RgbImage, face: &DetectedFace) -> Result<Embedding, EmbedError>;

    /// Lighting probe scores for an embedding this embedder produced, if supported
    fn brightness(&mut self, _embedding: &Embedding) -> Option<BrightnessProbe> {
        None
    }
}

/// Reject embeddings whose dimension does not match the model
pub fn check_dimension(embedding: &Embedding) -> Result<(), EmbedError> {
    if embedding.len() != EMBEDDING_DIM {
        return Err(EmbedError::InvalidDimension {
            expected: EMBEDDING_DIM,
            actual: embedding.len(),
        });
    }
    Ok(())
}
