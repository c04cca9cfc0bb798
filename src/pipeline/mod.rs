//! Ingestion: metadata, objects and faces for each image, committed per file.

pub mod report;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::mpsc;

use crate::db::{Database, FaceDetection, FileMeta};
use crate::error::PipelineError;
use crate::faces::{discover_reference_images, FaceEncoder, FaceMatcher, Gallery};
use crate::objects::ObjectDetector;
use crate::scanner::{discover_images, extract_exif, MetadataReader};

pub use report::{BatchReport, FileResult, FileStatus, GalleryLoadReport, IngestProgress};

/// Settings for a directory run
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub extensions: Vec<String>,
    /// Reprocess photos that already have detections
    pub force: bool,
    pub confidence_threshold: f32,
}

pub struct Pipeline<'a> {
    db: &'a Database,
    detector: &'a dyn ObjectDetector,
    encoder: &'a dyn FaceEncoder,
    reader: &'a dyn MetadataReader,
    matcher: FaceMatcher,
    gallery: Gallery,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        db: &'a Database,
        detector: &'a dyn ObjectDetector,
        encoder: &'a dyn FaceEncoder,
        reader: &'a dyn MetadataReader,
        matcher: FaceMatcher,
    ) -> Self {
        Self {
            db,
            detector,
            encoder,
            reader,
            matcher,
            gallery: Gallery::new(),
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    /// Replace the in-memory gallery with every known face in the catalog.
    pub fn reload_gallery(&mut self) -> Result<usize> {
        let faces = self.db.get_known_faces()?;
        self.gallery.replace_from_known_faces(faces);
        tracing::debug!(entries = self.gallery.len(), "Gallery reloaded");
        Ok(self.gallery.len())
    }

    /// Encode a reference directory into the catalog, then reload the gallery.
    pub fn load_gallery(&mut self, dir: &Path, extensions: &[String]) -> Result<GalleryLoadReport> {
        let mut report = store_reference_faces(self.db, self.encoder, dir, extensions)?;
        report.gallery_size = self.reload_gallery()?;
        Ok(report)
    }

    /// Ingest a single image. Any failure is returned to the caller.
    pub fn process_one(&self, path: &Path, confidence_threshold: f32) -> Result<FileResult> {
        let path = path
            .canonicalize()
            .with_context(|| format!("Cannot access {}", path.display()))?;
        self.ingest(&path, confidence_threshold)
    }

    /// Ingest every image under `root`, isolating per-file failures.
    pub fn process_directory(
        &self,
        root: &Path,
        options: &BatchOptions,
        progress: Option<&mpsc::Sender<IngestProgress>>,
    ) -> Result<BatchReport> {
        if !root.is_dir() {
            return Err(PipelineError::DirectoryNotFound {
                path: root.to_path_buf(),
            }
            .into());
        }

        let paths = discover_images(root, &options.extensions)?;
        let total = paths.len();
        tracing::info!(total, root = %root.display(), "Processing directory");

        if let Some(tx) = progress {
            let _ = tx.send(IngestProgress::Started { total_files: total });
        }

        let mut report = BatchReport::default();

        for (index, path) in paths.iter().enumerate() {
            if let Some(tx) = progress {
                let _ = tx.send(IngestProgress::Processing {
                    current: index + 1,
                    total,
                    path: path.clone(),
                });
            }

            if !options.force {
                match self.db.find_photo_by_path(path) {
                    Ok(Some(photo)) if photo.processed_at.is_some() => {
                        tracing::debug!(path = %path.display(), "Already processed, skipping");
                        report.push(FileResult::skipped(photo.id, path));
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Cannot check processing state");
                    }
                }
            }

            let result = match self.ingest(path, options.confidence_threshold) {
                Ok(result) => result,
                Err(e) => {
                    let message = format!("{:#}", e);
                    tracing::warn!(path = %path.display(), error = %message, "Failed to process image");
                    if let Some(tx) = progress {
                        let _ = tx.send(IngestProgress::Failed {
                            path: path.clone(),
                            message: message.clone(),
                        });
                    }
                    FileResult::failed(path, message)
                }
            };
            report.push(result);
        }

        if let Some(tx) = progress {
            let _ = tx.send(IngestProgress::Completed {
                processed: report.processed,
                skipped: report.skipped,
                errors: report.errors,
            });
        }

        tracing::info!(
            processed = report.processed,
            skipped = report.skipped,
            errors = report.errors,
            objects = report.total_objects,
            "Directory processed"
        );
        Ok(report)
    }

    /// `path` must already be canonical
    fn ingest(&self, path: &Path, confidence_threshold: f32) -> Result<FileResult> {
        let info = self.reader.read_image(path)?;

        let meta = FileMeta {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            file_size: info.file_size,
            width: info.width,
            height: info.height,
            format: info.format,
            model_used: Some(self.detector.model_name().to_string()),
        };

        let photo_id = self.db.upsert_photo(path, &meta)?;
        self.db.replace_exif(photo_id, extract_exif(&info.tags).as_ref())?;

        let detections = self
            .detector
            .detect(path, confidence_threshold)
            .context("Object detection failed")?;

        let encoded = self
            .encoder
            .detect_faces(path)
            .context("Face detection failed")?;

        let faces: Vec<FaceDetection> = encoded
            .into_iter()
            .map(|face| {
                let matched = self.matcher.find_match(&self.gallery, &face.encoding);
                FaceDetection {
                    location: face.location,
                    confidence: Some(face.confidence),
                    encoding: Some(face.encoding),
                    recognized_name: matched.name,
                    recognized_confidence: matched.confidence,
                }
            })
            .collect();

        self.db.replace_results(photo_id, &detections, &faces)?;

        tracing::debug!(
            photo_id,
            path = %path.display(),
            objects = detections.len(),
            faces = faces.len(),
            "Image processed"
        );

        Ok(FileResult::processed(photo_id, path, detections, faces))
    }
}

/// Encode every reference image under `dir` and upsert it as a known face.
///
/// Each image contributes the first face the encoder returns. Images that
/// fail to encode or contain no face are logged and skipped; catalog
/// failures abort the load.
pub fn store_reference_faces(
    db: &Database,
    encoder: &dyn FaceEncoder,
    dir: &Path,
    extensions: &[String],
) -> Result<GalleryLoadReport> {
    let references = discover_reference_images(dir, extensions)?;
    let mut report = GalleryLoadReport {
        images: references.len(),
        ..Default::default()
    };

    for reference in &references {
        let faces = match encoder.detect_faces(&reference.path) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(path = %reference.path.display(), error = %e, "Cannot encode reference image");
                report.skipped += 1;
                continue;
            }
        };

        match faces.first() {
            Some(face) => {
                if faces.len() > 1 {
                    tracing::debug!(
                        path = %reference.path.display(),
                        faces = faces.len(),
                        "Reference image has several faces, using the first"
                    );
                }
                db.upsert_known_face(&reference.name, &reference.path, &face.encoding)?;
                report.stored += 1;
            }
            None => {
                tracing::warn!(path = %reference.path.display(), name = %reference.name, "No face in reference image");
                report.skipped += 1;
            }
        }
    }

    report.gallery_size = db.count_known_faces()? as usize;
    tracing::info!(
        stored = report.stored,
        skipped = report.skipped,
        "Known faces loaded from {}",
        dir.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DetectionEvent, FaceLocation};
    use crate::faces::{euclidean_distance, EncodedFace};
    use crate::scanner::metadata::tags;
    use crate::scanner::{ImageInfo, TagMap, TagValue};
    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, HashSet};
    use std::fs::{self, File};
    use std::path::PathBuf;

    fn file_name(path: &Path) -> String {
        path.file_name().unwrap().to_string_lossy().to_string()
    }

    #[derive(Default)]
    struct StubReader {
        fail: HashSet<String>,
    }

    impl MetadataReader for StubReader {
        fn read_image(&self, path: &Path) -> Result<ImageInfo> {
            if self.fail.contains(&file_name(path)) {
                anyhow::bail!("corrupt image");
            }
            let mut tag_map = TagMap::new();
            tag_map.insert(tags::MAKE.to_string(), TagValue::from("Canon"));
            Ok(ImageInfo {
                width: Some(64),
                height: Some(48),
                format: Some("JPEG".to_string()),
                file_size: 1234,
                tags: tag_map,
            })
        }
    }

    #[derive(Default)]
    struct StubDetector {
        events: RefCell<Vec<DetectionEvent>>,
        calls: Cell<usize>,
    }

    impl ObjectDetector for StubDetector {
        fn model_name(&self) -> &str {
            "stub-yolo"
        }

        fn detect(&self, _path: &Path, _confidence_threshold: f32) -> Result<Vec<DetectionEvent>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.events.borrow().clone())
        }
    }

    #[derive(Default)]
    struct StubEncoder {
        faces: HashMap<String, Vec<Vec<f32>>>,
        fail: HashSet<String>,
        calls: Cell<usize>,
    }

    impl FaceEncoder for StubEncoder {
        fn detect_faces(&self, path: &Path) -> Result<Vec<EncodedFace>> {
            self.calls.set(self.calls.get() + 1);
            let name = file_name(path);
            if self.fail.contains(&name) {
                anyhow::bail!("encoder exploded");
            }
            Ok(self
                .faces
                .get(&name)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|encoding| EncodedFace {
                    location: FaceLocation { top: 1, right: 20, bottom: 21, left: 2 },
                    confidence: 0.99,
                    encoding,
                })
                .collect())
        }
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        File::create(&path).unwrap();
        path
    }

    fn options(force: bool) -> BatchOptions {
        BatchOptions {
            extensions: vec!["jpg".to_string()],
            force,
            confidence_threshold: 0.25,
        }
    }

    fn matcher() -> FaceMatcher {
        FaceMatcher::new(0.6, euclidean_distance)
    }

    #[test]
    fn test_process_one_records_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), "party.jpg");

        let db = Database::open_in_memory().unwrap();
        db.upsert_known_face("alice", Path::new("/refs/alice/1.jpg"), &[0.0, 0.3]).unwrap();

        let detector = StubDetector::default();
        *detector.events.borrow_mut() = vec![
            DetectionEvent::new("person", 0, 0.9),
            DetectionEvent::new("person", 0, 0.7),
            DetectionEvent::new("dog", 16, 0.5),
        ];
        let mut encoder = StubEncoder::default();
        encoder
            .faces
            .insert("party.jpg".to_string(), vec![vec![0.0, 0.0], vec![5.0, 5.0]]);
        let reader = StubReader::default();

        let mut pipeline = Pipeline::new(&db, &detector, &encoder, &reader, matcher());
        assert_eq!(pipeline.reload_gallery().unwrap(), 1);

        let result = pipeline.process_one(&path, 0.25).unwrap();
        assert_eq!(result.status, FileStatus::Processed);
        assert_eq!(result.detections_count, 3);
        assert_eq!(result.face_detections_count, 2);
        assert_eq!(result.face_detections[0].recognized_name.as_deref(), Some("alice"));
        assert!((result.face_detections[0].recognized_confidence.unwrap() - 0.7).abs() < 1e-6);
        assert!(result.face_detections[1].recognized_name.is_none());

        let info = db.get_photo_info(result.photo_id.unwrap()).unwrap().unwrap();
        assert_eq!(info.photo.file_name, "party.jpg");
        assert_eq!(info.photo.model_used.as_deref(), Some("stub-yolo"));
        assert!(info.photo.processed_at.is_some());
        assert_eq!(info.exif.unwrap().camera_make.as_deref(), Some("Canon"));
        assert_eq!(info.objects.len(), 2);
        let faces = info.faces.unwrap();
        assert_eq!(faces.total_faces, 2);
        assert_eq!(faces.recognized_faces, 1);
    }

    #[test]
    fn test_reprocess_replaces_detections() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), "a.jpg");

        let db = Database::open_in_memory().unwrap();
        let detector = StubDetector::default();
        let encoder = StubEncoder::default();
        let reader = StubReader::default();
        let pipeline = Pipeline::new(&db, &detector, &encoder, &reader, matcher());

        *detector.events.borrow_mut() = vec![DetectionEvent::new("cat", 15, 0.8)];
        let first = pipeline.process_one(&path, 0.25).unwrap();

        let second_events = vec![DetectionEvent::new("car", 2, 0.6), DetectionEvent::new("car", 2, 0.4)];
        *detector.events.borrow_mut() = second_events.clone();
        let second = pipeline.process_one(&path, 0.25).unwrap();

        assert_eq!(first.photo_id, second.photo_id);
        let id = second.photo_id.unwrap();
        assert_eq!(db.get_detection_events(id).unwrap(), second_events);
        let summaries = db.get_object_summaries(id).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].class_name, "car");
        assert_eq!(summaries[0].total_count, 2);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let detector = StubDetector::default();
        let encoder = StubEncoder::default();
        let reader = StubReader::default();
        let pipeline = Pipeline::new(&db, &detector, &encoder, &reader, matcher());

        assert!(pipeline.process_one(&dir.path().join("gone.jpg"), 0.25).is_err());
        assert_eq!(db.get_statistics().unwrap().total_photos, 0);
    }

    #[test]
    fn test_directory_skips_processed_photos() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.jpg");
        touch(dir.path(), "sub/b.JPG");
        touch(dir.path(), "notes.txt");

        let db = Database::open_in_memory().unwrap();
        let detector = StubDetector::default();
        *detector.events.borrow_mut() = vec![DetectionEvent::new("tree", 58, 0.5)];
        let encoder = StubEncoder::default();
        let reader = StubReader::default();
        let pipeline = Pipeline::new(&db, &detector, &encoder, &reader, matcher());

        let first = pipeline.process_directory(dir.path(), &options(false), None).unwrap();
        assert_eq!(first.processed, 2);
        assert_eq!(first.total_objects, 2);
        assert_eq!(detector.calls.get(), 2);

        let second = pipeline.process_directory(dir.path(), &options(false), None).unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(detector.calls.get(), 2);
        assert_eq!(encoder.calls.get(), 2);
        assert!(second.results.iter().all(|r| r.photo_id.is_some()));

        let forced = pipeline.process_directory(dir.path(), &options(true), None).unwrap();
        assert_eq!(forced.processed, 2);
        assert_eq!(detector.calls.get(), 4);
        assert_eq!(db.get_statistics().unwrap().total_photos, 2);
    }

    #[test]
    fn test_directory_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.jpg");
        touch(dir.path(), "b.jpg");
        touch(dir.path(), "c.jpg");

        let db = Database::open_in_memory().unwrap();
        let detector = StubDetector::default();
        let mut encoder = StubEncoder::default();
        encoder.fail.insert("c.jpg".to_string());
        let mut reader = StubReader::default();
        reader.fail.insert("b.jpg".to_string());
        let pipeline = Pipeline::new(&db, &detector, &encoder, &reader, matcher());

        let report = pipeline.process_directory(dir.path(), &options(false), None).unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.errors, 2);

        let statuses: Vec<(String, FileStatus)> = report
            .results
            .iter()
            .map(|r| (file_name(Path::new(&r.file_path)), r.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("a.jpg".to_string(), FileStatus::Processed),
                ("b.jpg".to_string(), FileStatus::Error),
                ("c.jpg".to_string(), FileStatus::Error),
            ]
        );
        assert!(report.results[1].error.as_deref().unwrap().contains("corrupt image"));
        assert!(report.results[2].error.as_deref().unwrap().contains("encoder exploded"));

        // b.jpg never reached the catalog and c.jpg has no committed detections
        let encoder = StubEncoder::default();
        let reader = StubReader::default();
        let retry = Pipeline::new(&db, &detector, &encoder, &reader, matcher());
        let report = retry.process_directory(dir.path(), &options(false), None).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.processed, 2);
    }

    #[test]
    fn test_failed_face_write_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), "a.jpg").canonicalize().unwrap();

        let db = Database::open_in_memory().unwrap();
        let detector = StubDetector::default();
        *detector.events.borrow_mut() = vec![DetectionEvent::new("person", 0, 0.9)];
        let mut encoder = StubEncoder::default();
        encoder.faces.insert("a.jpg".to_string(), vec![vec![0.1, 0.2]]);
        let reader = StubReader::default();
        let pipeline = Pipeline::new(&db, &detector, &encoder, &reader, matcher());

        db.conn()
            .execute_batch(
                "CREATE TRIGGER reject_faces BEFORE INSERT ON face_detections
                 BEGIN SELECT RAISE(ABORT, 'face rows rejected'); END;",
            )
            .unwrap();

        let first = pipeline.process_directory(dir.path(), &options(false), None).unwrap();
        assert_eq!(first.errors, 1);
        assert_eq!(first.processed, 0);

        let photo = db.find_photo_by_path(&path).unwrap().unwrap();
        assert!(photo.processed_at.is_none());
        assert!(db.get_detection_events(photo.id).unwrap().is_empty());
        assert!(db.get_face_summary(photo.id).unwrap().is_none());

        db.conn().execute_batch("DROP TRIGGER reject_faces;").unwrap();

        let second = pipeline.process_directory(dir.path(), &options(false), None).unwrap();
        assert_eq!(second.skipped, 0);
        assert_eq!(second.processed, 1);
        assert_eq!(db.get_face_summary(photo.id).unwrap().unwrap().total_faces, 1);
        assert_eq!(db.get_detection_events(photo.id).unwrap().len(), 1);
    }

    #[test]
    fn test_forced_rerun_replaces_faces() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), "a.jpg").canonicalize().unwrap();

        let db = Database::open_in_memory().unwrap();
        db.upsert_known_face("alice", Path::new("/refs/alice/1.jpg"), &[0.0, 0.3]).unwrap();
        let detector = StubDetector::default();
        let reader = StubReader::default();

        let mut first_encoder = StubEncoder::default();
        first_encoder.faces.insert("a.jpg".to_string(), vec![vec![0.0, 0.0]]);
        let mut first = Pipeline::new(&db, &detector, &first_encoder, &reader, matcher());
        first.reload_gallery().unwrap();
        first.process_directory(dir.path(), &options(true), None).unwrap();

        let id = db.find_photo_by_path(&path).unwrap().unwrap().id;
        assert_eq!(db.get_face_summary(id).unwrap().unwrap().recognized_faces, 1);

        let mut second_encoder = StubEncoder::default();
        second_encoder
            .faces
            .insert("a.jpg".to_string(), vec![vec![5.0, 5.0], vec![-5.0, 5.0]]);
        let mut second = Pipeline::new(&db, &detector, &second_encoder, &reader, matcher());
        second.reload_gallery().unwrap();
        let report = second.process_directory(dir.path(), &options(true), None).unwrap();
        assert_eq!(report.processed, 1);

        let stored = db.get_face_detections(id).unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|f| f.recognized_name.is_none()));

        let summary = db.get_face_summary(id).unwrap().unwrap();
        assert_eq!(summary.total_faces, 2);
        assert_eq!(summary.recognized_faces, 0);
        assert_eq!(summary.unrecognized_faces, 2);
        assert!(db.search_by_face_names(&["alice".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let detector = StubDetector::default();
        let encoder = StubEncoder::default();
        let reader = StubReader::default();
        let pipeline = Pipeline::new(&db, &detector, &encoder, &reader, matcher());

        let err = pipeline
            .process_directory(&dir.path().join("missing"), &options(false), None)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::DirectoryNotFound { .. })
        ));
    }

    #[test]
    fn test_progress_events() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.jpg");

        let db = Database::open_in_memory().unwrap();
        let detector = StubDetector::default();
        let encoder = StubEncoder::default();
        let reader = StubReader::default();
        let pipeline = Pipeline::new(&db, &detector, &encoder, &reader, matcher());

        let (tx, rx) = mpsc::channel();
        pipeline.process_directory(dir.path(), &options(false), Some(&tx)).unwrap();
        drop(tx);

        let events: Vec<IngestProgress> = rx.iter().collect();
        assert!(matches!(events[0], IngestProgress::Started { total_files: 1 }));
        assert!(matches!(events[1], IngestProgress::Processing { current: 1, total: 1, .. }));
        assert!(matches!(
            events.last(),
            Some(IngestProgress::Completed { processed: 1, skipped: 0, errors: 0 })
        ));
    }

    #[test]
    fn test_load_gallery_is_idempotent() {
        let refs = tempfile::tempdir().unwrap();
        touch(refs.path(), "alice/1.jpg");
        touch(refs.path(), "bob/1.jpg");
        touch(refs.path(), "bob/2.jpg");
        touch(refs.path(), "carol/broken.jpg");

        let db = Database::open_in_memory().unwrap();
        let detector = StubDetector::default();
        let mut encoder = StubEncoder::default();
        // File names are shared across folders, so both 1.jpg images get two faces
        encoder
            .faces
            .insert("1.jpg".to_string(), vec![vec![0.1, 0.2], vec![0.9, 0.9]]);
        encoder.fail.insert("broken.jpg".to_string());
        let reader = StubReader::default();
        let mut pipeline = Pipeline::new(&db, &detector, &encoder, &reader, matcher());

        let report = pipeline.load_gallery(refs.path(), &["jpg".to_string()]).unwrap();
        assert_eq!(report.images, 4);
        assert_eq!(report.stored, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.gallery_size, 2);

        pipeline.load_gallery(refs.path(), &["jpg".to_string()]).unwrap();
        assert_eq!(db.count_known_faces().unwrap(), 2);
        assert_eq!(pipeline.gallery().len(), 2);
        assert_eq!(pipeline.gallery().names(), vec!["alice", "bob"]);
        assert_eq!(pipeline.gallery().entries()[0].encoding, vec![0.1, 0.2]);
    }

    #[test]
    fn test_load_gallery_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let detector = StubDetector::default();
        let encoder = StubEncoder::default();
        let reader = StubReader::default();
        let mut pipeline = Pipeline::new(&db, &detector, &encoder, &reader, matcher());

        assert!(pipeline.load_gallery(&dir.path().join("nope"), &["jpg".to_string()]).is_err());
    }
}
