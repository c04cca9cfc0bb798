//! Object detection collaborators.

pub mod detector;
pub mod labels;

use anyhow::Result;
use std::path::Path;

use crate::db::DetectionEvent;

pub use detector::YoloDetector;

/// Detects objects in an image file.
pub trait ObjectDetector {
    /// Recorded with each photo as the model that produced its detections
    fn model_name(&self) -> &str;

    /// Detections with confidence at or above `confidence_threshold`
    fn detect(&self, path: &Path, confidence_threshold: f32) -> Result<Vec<DetectionEvent>>;
}
