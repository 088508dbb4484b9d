use image::RgbImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    /// Detection confidence in [0, 1]
    pub confidence: f32,
}

/// Locates faces in a frame.
pub trait FaceDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectionError>;
}

/// Keep detections at or above `min_confidence`, best first
pub fn filter_confident(mut faces: Vec<DetectedFace>, min_confidence: f32) -> Vec<DetectedFace> {
    faces.retain(|face| face.confidence >= min_confidence);
    faces.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    faces
}
