use anyhow::{anyhow, bail, Context, Result};
use image::{DynamicImage, GenericImageView};
use ndarray::ArrayView2;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;

use super::labels::load_labels;
use super::ObjectDetector;
use crate::config::Config;
use crate::db::DetectionEvent;
use crate::models::{ensure_model, open_session};

const INPUT_SIZE: u32 = 640;
/// Grey used by YOLOv8 for letterbox borders
const PAD_VALUE: f32 = 114.0 / 255.0;

/// Scale and offsets mapping model input coordinates back to the image
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    class_id: usize,
    confidence: f32,
    /// x1, y1, x2, y2 in original image pixels
    bbox: [f32; 4],
}

/// YOLOv8-format ONNX object detector
pub struct YoloDetector {
    session: Mutex<Session>,
    labels: Vec<String>,
    model_name: String,
    iou_threshold: f32,
}

impl YoloDetector {
    pub fn load(config: &Config) -> Result<Self> {
        let model_path = config.model_path(&config.detector.model);
        ensure_model(&model_path, config.detector.model_url.as_deref())?;

        let labels = load_labels(config.detector.labels_path.as_deref())?;
        let session = open_session(&model_path)?;

        tracing::info!(
            model = %model_path.display(),
            classes = labels.len(),
            "Object detection model loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            labels,
            model_name: config.detector.model.clone(),
            iou_threshold: config.detector.iou_threshold,
        })
    }

    fn label(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

impl ObjectDetector for YoloDetector {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn detect(&self, path: &Path, confidence_threshold: f32) -> Result<Vec<DetectionEvent>> {
        let img = image::open(path).with_context(|| format!("Failed to load image {}", path.display()))?;
        let (orig_width, orig_height) = img.dimensions();

        let (input_data, letterbox) = preprocess(&img);
        let input_tensor = Tensor::from_array((
            [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
            input_data.into_boxed_slice(),
        ))?;

        let candidates = {
            let mut session = self
                .session
                .lock()
                .map_err(|e| anyhow!("Failed to lock detection model: {}", e))?;
            let outputs = session.run(ort::inputs!["images" => input_tensor])?;

            let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
            // [1, 4 + classes, anchors]
            if shape.len() != 3 || shape[1] < 5 {
                bail!("Unexpected detector output shape {:?}", shape);
            }
            let rows = shape[1] as usize;
            let anchors = shape[2] as usize;
            let view = ArrayView2::from_shape((rows, anchors), data)?;

            decode_output(view, letterbox, orig_width as f32, orig_height as f32, confidence_threshold)
        };

        let kept = nms_per_class(candidates, self.iou_threshold);

        tracing::debug!(path = %path.display(), objects = kept.len(), "Objects detected");

        Ok(kept
            .into_iter()
            .map(|c| DetectionEvent::new(self.label(c.class_id), c.class_id as i64, c.confidence))
            .collect())
    }
}

/// Letterbox the image into a normalized NCHW buffer
fn preprocess(img: &DynamicImage) -> (Vec<f32>, Letterbox) {
    let (width, height) = img.dimensions();
    let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);

    let new_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let pad_x = (INPUT_SIZE - new_w) / 2;
    let pad_y = (INPUT_SIZE - new_h) / 2;

    let resized = img
        .resize_exact(new_w, new_h, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut data = vec![PAD_VALUE; 3 * plane];

    for (x, y, pixel) in resized.enumerate_pixels() {
        let idx = ((y + pad_y) * INPUT_SIZE + (x + pad_x)) as usize;
        data[idx] = pixel[0] as f32 / 255.0;
        data[plane + idx] = pixel[1] as f32 / 255.0;
        data[2 * plane + idx] = pixel[2] as f32 / 255.0;
    }

    let letterbox = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (data, letterbox)
}

/// Turn the raw `[4 + classes, anchors]` output into scored boxes.
///
/// Rows 0..4 hold cx, cy, w, h in input pixels; the rest are class scores.
fn decode_output(
    output: ArrayView2<'_, f32>,
    letterbox: Letterbox,
    image_width: f32,
    image_height: f32,
    threshold: f32,
) -> Vec<Candidate> {
    let (rows, anchors) = output.dim();
    let mut candidates = Vec::new();

    for j in 0..anchors {
        let mut best_class = 0;
        let mut best_score = f32::MIN;
        for class in 0..rows - 4 {
            let score = output[[4 + class, j]];
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }

        if best_score < threshold {
            continue;
        }

        let (cx, cy, w, h) = (output[[0, j]], output[[1, j]], output[[2, j]], output[[3, j]]);
        let unmap_x = |v: f32| ((v - letterbox.pad_x) / letterbox.scale).clamp(0.0, image_width);
        let unmap_y = |v: f32| ((v - letterbox.pad_y) / letterbox.scale).clamp(0.0, image_height);

        candidates.push(Candidate {
            class_id: best_class,
            confidence: best_score.clamp(0.0, 1.0),
            bbox: [
                unmap_x(cx - w / 2.0),
                unmap_y(cy - h / 2.0),
                unmap_x(cx + w / 2.0),
                unmap_y(cy + h / 2.0),
            ],
        });
    }

    candidates
}

/// Non-maximum suppression applied within each class
fn nms_per_class(mut candidates: Vec<Candidate>, threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let overlaps = keep
            .iter()
            .any(|k| k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > threshold);
        if !overlaps {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
