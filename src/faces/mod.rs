pub mod detector;
pub mod gallery;
pub mod matcher;
pub mod reference;

use anyhow::Result;
use std::path::Path;

use crate::db::FaceLocation;

pub use detector::OnnxFaceEncoder;
pub use gallery::{Gallery, GalleryEntry};
pub use matcher::{cosine_distance, euclidean_distance, DistanceFn, FaceMatch, FaceMatcher};
pub use reference::{discover_reference_images, ReferenceImage};

/// A face located in an image together with its encoding
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFace {
    pub location: FaceLocation,
    pub confidence: f32,
    pub encoding: Vec<f32>,
}

/// Finds faces in an image file and encodes each one.
pub trait FaceEncoder {
    fn detect_faces(&self, path: &Path) -> Result<Vec<EncodedFace>>;
}
