use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::db::{DetectionEvent, FaceDetection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Processed,
    Skipped,
    Error,
}

/// Outcome of ingesting one file
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub photo_id: Option<i64>,
    pub file_path: String,
    pub status: FileStatus,
    pub detections_count: usize,
    pub face_detections_count: usize,
    pub detections: Vec<DetectionEvent>,
    pub face_detections: Vec<FaceDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileResult {
    pub fn processed(
        photo_id: i64,
        path: &Path,
        detections: Vec<DetectionEvent>,
        face_detections: Vec<FaceDetection>,
    ) -> Self {
        Self {
            photo_id: Some(photo_id),
            file_path: path.to_string_lossy().to_string(),
            status: FileStatus::Processed,
            detections_count: detections.len(),
            face_detections_count: face_detections.len(),
            detections,
            face_detections,
            error: None,
        }
    }

    pub fn skipped(photo_id: i64, path: &Path) -> Self {
        Self {
            photo_id: Some(photo_id),
            file_path: path.to_string_lossy().to_string(),
            status: FileStatus::Skipped,
            detections_count: 0,
            face_detections_count: 0,
            detections: Vec::new(),
            face_detections: Vec::new(),
            error: None,
        }
    }

    pub fn failed(path: &Path, message: String) -> Self {
        Self {
            photo_id: None,
            file_path: path.to_string_lossy().to_string(),
            status: FileStatus::Error,
            detections_count: 0,
            face_detections_count: 0,
            detections: Vec::new(),
            face_detections: Vec::new(),
            error: Some(message),
        }
    }
}

/// Per-file results of a directory run, in processing order
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub results: Vec<FileResult>,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub total_objects: usize,
}

impl BatchReport {
    pub fn push(&mut self, result: FileResult) {
        match result.status {
            FileStatus::Processed => {
                self.processed += 1;
                self.total_objects += result.detections_count;
            }
            FileStatus::Skipped => self.skipped += 1,
            FileStatus::Error => self.errors += 1,
        }
        self.results.push(result);
    }
}

/// Reference faces stored by a gallery load
#[derive(Debug, Clone, Default, Serialize)]
pub struct GalleryLoadReport {
    pub images: usize,
    pub stored: usize,
    pub skipped: usize,
    pub gallery_size: usize,
}

#[derive(Debug, Clone)]
pub enum IngestProgress {
    Started { total_files: usize },
    Processing { current: usize, total: usize, path: PathBuf },
    Failed { path: PathBuf, message: String },
    Completed { processed: usize, skipped: usize, errors: usize },
}
