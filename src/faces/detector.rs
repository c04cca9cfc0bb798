use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;

use super::{EncodedFace, FaceEncoder};
use crate::config::Config;
use crate::db::FaceLocation;
use crate::models::{ensure_model, open_session};

const ULTRAFACE_FILE: &str = "ultraface-320.onnx";
const ULTRAFACE_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx";
const ARCFACE_FILE: &str = "arcface-resnet100.onnx";
const ARCFACE_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx";

const NMS_THRESHOLD: f32 = 0.3;

/// Download location for the stock face models
fn known_model_url(file: &str) -> Option<&'static str> {
    match file {
        ULTRAFACE_FILE => Some(ULTRAFACE_URL),
        ARCFACE_FILE => Some(ARCFACE_URL),
        _ => None,
    }
}

/// Face detection with UltraFace and 512-d ArcFace encodings
pub struct OnnxFaceEncoder {
    detection: Mutex<Session>,
    embedding: Mutex<Session>,
    detection_threshold: f32,
}

impl OnnxFaceEncoder {
    /// Resolve, download if needed, and load both face models.
    pub fn load(config: &Config) -> Result<Self> {
        let detection_path = config.model_path(&config.faces.detection_model);
        ensure_model(&detection_path, known_model_url(&config.faces.detection_model))?;

        let embedding_path = config.model_path(&config.faces.embedding_model);
        ensure_model(&embedding_path, known_model_url(&config.faces.embedding_model))?;

        let encoder = Self {
            detection: Mutex::new(open_session(&detection_path)?),
            embedding: Mutex::new(open_session(&embedding_path)?),
            detection_threshold: config.faces.detection_threshold,
        };

        tracing::info!(
            detection = %detection_path.display(),
            embedding = %embedding_path.display(),
            "Face models loaded"
        );
        Ok(encoder)
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn detect_faces(&self, path: &Path) -> Result<Vec<EncodedFace>> {
        let img = image::open(path).with_context(|| format!("Failed to load image {}", path.display()))?;
        let (orig_width, orig_height) = img.dimensions();

        let face_boxes = {
            let mut session = self
                .detection
                .lock()
                .map_err(|e| anyhow!("Failed to lock detection model: {}", e))?;
            run_ultraface_detection(&mut session, &img, self.detection_threshold)?
        };

        if face_boxes.is_empty() {
            return Ok(Vec::new());
        }

        let mut session = self
            .embedding
            .lock()
            .map_err(|e| anyhow!("Failed to lock embedding model: {}", e))?;

        let mut faces = Vec::with_capacity(face_boxes.len());
        for (location, confidence) in face_boxes {
            if location.width() <= 0 || location.height() <= 0 {
                continue;
            }

            let face_crop = crop_face(&img, &location, orig_width, orig_height);
            let encoding = run_arcface_embedding(&mut session, &face_crop)
                .with_context(|| format!("Failed to encode face in {}", path.display()))?;

            faces.push(EncodedFace {
                location,
                confidence,
                encoding,
            });
        }

        tracing::debug!(path = %path.display(), faces = faces.len(), "Faces detected");
        Ok(faces)
    }
}

/// Run UltraFace detection model
fn run_ultraface_detection(
    session: &mut Session,
    img: &DynamicImage,
    threshold: f32,
) -> Result<Vec<(FaceLocation, f32)>> {
    const INPUT_WIDTH: u32 = 320;
    const INPUT_HEIGHT: u32 = 240;

    let (orig_width, orig_height) = img.dimensions();

    let resized = img.resize_exact(INPUT_WIDTH, INPUT_HEIGHT, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    // NCHW, normalized to roughly [-1, 1]
    let plane = (INPUT_HEIGHT * INPUT_WIDTH) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];

    for y in 0..INPUT_HEIGHT as usize {
        for x in 0..INPUT_WIDTH as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * INPUT_WIDTH as usize + x;
            input_data[idx] = (pixel[0] as f32 - 127.0) / 128.0;
            input_data[plane + idx] = (pixel[1] as f32 - 127.0) / 128.0;
            input_data[2 * plane + idx] = (pixel[2] as f32 - 127.0) / 128.0;
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize],
        input_data.into_boxed_slice(),
    ))?;

    let outputs = session.run(ort::inputs!["input" => input_tensor])?;

    let scores_value = outputs.get("scores").ok_or_else(|| anyhow!("No scores output"))?;
    let boxes_value = outputs.get("boxes").ok_or_else(|| anyhow!("No boxes output"))?;

    let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>()?;
    let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>()?;

    // scores: [1, anchors, 2] (background, face); boxes: [1, anchors, 4] normalized x1,y1,x2,y2
    let num_anchors = scores_shape[1] as usize;
    let mut face_boxes = Vec::new();

    for i in 0..num_anchors {
        let confidence = scores_data[i * 2 + 1];
        if confidence <= threshold {
            continue;
        }

        let x1 = ((boxes_data[i * 4] * orig_width as f32) as i32).max(0);
        let y1 = ((boxes_data[i * 4 + 1] * orig_height as f32) as i32).max(0);
        let x2 = ((boxes_data[i * 4 + 2] * orig_width as f32) as i32).min(orig_width as i32);
        let y2 = ((boxes_data[i * 4 + 3] * orig_height as f32) as i32).min(orig_height as i32);

        let location = FaceLocation {
            top: y1,
            right: x2.max(x1 + 1),
            bottom: y2.max(y1 + 1),
            left: x1,
        };
        face_boxes.push((location, confidence));
    }

    Ok(nms(face_boxes, NMS_THRESHOLD))
}

/// Non-maximum suppression to remove overlapping detections
fn nms(mut boxes: Vec<(FaceLocation, f32)>, threshold: f32) -> Vec<(FaceLocation, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }

        keep.push(boxes[i]);

        for j in (i + 1)..boxes.len() {
            if !suppressed[j] && compute_iou(&boxes[i].0, &boxes[j].0) > threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection over Union between two face boxes
fn compute_iou(a: &FaceLocation, b: &FaceLocation) -> f32 {
    let left = a.left.max(b.left);
    let top = a.top.max(b.top);
    let right = a.right.min(b.right);
    let bottom = a.bottom.min(b.bottom);

    let intersection = ((right - left).max(0) * (bottom - top).max(0)) as f32;
    let area_a = (a.width() * a.height()) as f32;
    let area_b = (b.width() * b.height()) as f32;
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Crop face region from image with 20% padding
fn crop_face(img: &DynamicImage, location: &FaceLocation, img_width: u32, img_height: u32) -> DynamicImage {
    let padding_x = (location.width() as f32 * 0.2) as i32;
    let padding_y = (location.height() as f32 * 0.2) as i32;

    let x = ((location.left - padding_x).max(0) as u32).min(img_width.saturating_sub(1));
    let y = ((location.top - padding_y).max(0) as u32).min(img_height.saturating_sub(1));
    let w = ((location.width() + padding_x * 2) as u32).min(img_width - x);
    let h = ((location.height() + padding_y * 2) as u32).min(img_height - y);

    img.crop_imm(x, y, w.max(1), h.max(1))
}

/// Run ArcFace and return an L2-normalized embedding
fn run_arcface_embedding(session: &mut Session, face_img: &DynamicImage) -> Result<Vec<f32>> {
    const INPUT_SIZE: u32 = 112;

    let resized = face_img.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];

    for y in 0..INPUT_SIZE as usize {
        for x in 0..INPUT_SIZE as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * INPUT_SIZE as usize + x;
            input_data[idx] = (pixel[0] as f32 - 127.5) / 127.5;
            input_data[plane + idx] = (pixel[1] as f32 - 127.5) / 127.5;
            input_data[2 * plane + idx] = (pixel[2] as f32 - 127.5) / 127.5;
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input_data.into_boxed_slice(),
    ))?;

    // The ArcFace ONNX export names its input "data"
    let outputs = session.run(ort::inputs!["data" => input_tensor])?;

    let embedding_output = outputs
        .iter()
        .next()
        .ok_or_else(|| anyhow!("No embedding output"))?;

    let (_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

    let embedding: Vec<f32> = embedding_data.to_vec();
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm > 0.0 {
        Ok(embedding.iter().map(|x| x / norm).collect())
    } else {
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(left: i32, top: i32, size: i32) -> FaceLocation {
        FaceLocation {
            top,
            right: left + size,
            bottom: top + size,
            left,
        }
    }

    #[test]
    fn test_iou() {
        let a = loc(0, 0, 10);
        assert!((compute_iou(&a, &loc(0, 0, 10)) - 1.0).abs() < 0.001);
        assert!(compute_iou(&a, &loc(20, 20, 10)).abs() < 0.001);
        assert!((compute_iou(&a, &loc(5, 0, 10)) - 50.0 / 150.0).abs() < 0.001);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let boxes = vec![(loc(0, 0, 10), 0.8), (loc(1, 1, 10), 0.95), (loc(50, 50, 10), 0.75)];
        let kept = nms(boxes, NMS_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].0, loc(1, 1, 10));
        assert_eq!(kept[1].0, loc(50, 50, 10));
    }

    #[test]
    fn test_crop_face_stays_inside_image() {
        let img = DynamicImage::new_rgb8(40, 30);
        let crop = crop_face(&img, &loc(30, 20, 20), 40, 30);
        let (w, h) = crop.dimensions();
        assert!(w >= 1 && w <= 40);
        assert!(h >= 1 && h <= 30);
    }

    #[test]
    fn test_known_model_urls() {
        assert_eq!(known_model_url("ultraface-320.onnx"), Some(ULTRAFACE_URL));
        assert_eq!(known_model_url("custom.onnx"), None);
    }
}
