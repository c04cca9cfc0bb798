use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;

use photo_vision::config::Config;
use photo_vision::db::{Database, PhotoInfo, StatisticsReport};
use photo_vision::faces::{FaceMatcher, OnnxFaceEncoder};
use photo_vision::logging;
use photo_vision::objects::YoloDetector;
use photo_vision::pipeline::{
    store_reference_faces, BatchOptions, BatchReport, FileResult, IngestProgress, Pipeline,
};
use photo_vision::scanner::ExifMetadataReader;

/// Catalog photos with EXIF metadata, detected objects and recognized faces
#[derive(Parser, Debug)]
#[command(name = "photo-vision", version, about)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Catalog database location (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process a single image
    ProcessImage {
        image: PathBuf,

        /// Minimum detection confidence (defaults to the configured value)
        #[arg(long)]
        confidence: Option<f32>,

        /// Object detection model file (overrides config)
        #[arg(long)]
        model: Option<String>,

        /// Reference directory to load known faces from before processing
        #[arg(long)]
        known_faces: Option<PathBuf>,
    },

    /// Process every image under a directory
    ProcessDir {
        directory: PathBuf,

        /// Reprocess images that already have detections
        #[arg(long, alias = "force-reprocess")]
        force: bool,

        /// Image extensions, space or comma separated (defaults to the configured list)
        #[arg(long, num_args = 1.., value_delimiter = ',')]
        extensions: Option<Vec<String>>,

        #[arg(long)]
        confidence: Option<f32>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        known_faces: Option<PathBuf>,
    },

    /// Find photos containing objects of the given classes
    Search {
        #[arg(long, required = true, num_args = 1..)]
        objects: Vec<String>,

        /// Minimum number of objects of a class
        #[arg(long, default_value_t = 1)]
        min_count: i64,
    },

    /// Find photos where the given people were recognized
    SearchFaces {
        #[arg(long, required = true, num_args = 1..)]
        names: Vec<String>,
    },

    /// Show catalog statistics
    Stats,

    /// Show everything stored for one photo
    Info {
        #[arg(long)]
        photo_id: i64,
    },

    /// List recently added photos
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Encode a reference directory (one subfolder per person) into known faces
    LoadFaces { directory: PathBuf },

    /// List the stored known faces
    KnownFaces,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db_path) = cli.db {
        config.db_path = db_path;
    }

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    logging::init(&config.logging, default_level)?;

    let db = Database::open(&config.db_path)?;
    let json = cli.json;

    match cli.command {
        Commands::ProcessImage {
            image,
            confidence,
            model,
            known_faces,
        } => {
            if let Some(model) = model {
                config.detector.model = model;
            }
            let detector = YoloDetector::load(&config)?;
            let encoder = OnnxFaceEncoder::load(&config)?;
            let reader = ExifMetadataReader;
            let mut pipeline = Pipeline::new(
                &db,
                &detector,
                &encoder,
                &reader,
                FaceMatcher::from_config(&config.faces),
            );
            prepare_gallery(&mut pipeline, &config, known_faces.as_deref())?;

            let confidence = confidence.unwrap_or(config.detector.confidence_threshold);
            let result = pipeline.process_one(&image, confidence)?;
            if json {
                print_json(&result)?;
            } else {
                print_file_result(&result);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::ProcessDir {
            directory,
            force,
            extensions,
            confidence,
            model,
            known_faces,
        } => {
            if let Some(model) = model {
                config.detector.model = model;
            }
            let detector = YoloDetector::load(&config)?;
            let encoder = OnnxFaceEncoder::load(&config)?;
            let reader = ExifMetadataReader;
            let mut pipeline = Pipeline::new(
                &db,
                &detector,
                &encoder,
                &reader,
                FaceMatcher::from_config(&config.faces),
            );
            prepare_gallery(&mut pipeline, &config, known_faces.as_deref())?;

            let options = BatchOptions {
                extensions: extensions.unwrap_or_else(|| config.scanner.image_extensions.clone()),
                force,
                confidence_threshold: confidence.unwrap_or(config.detector.confidence_threshold),
            };

            let report = if json {
                pipeline.process_directory(&directory, &options, None)?
            } else {
                let (tx, rx) = mpsc::channel();
                let printer = std::thread::spawn(move || print_progress(rx));
                let report = pipeline.process_directory(&directory, &options, Some(&tx));
                drop(tx);
                let _ = printer.join();
                report?
            };

            if json {
                print_json(&report)?;
            } else {
                print_batch_report(&report);
            }

            Ok(if report.errors > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }

        Commands::Search { objects, min_count } => {
            let hits = db.search_by_object_classes(&objects, min_count)?;
            if json {
                print_json(&hits)?;
            } else if hits.is_empty() {
                println!("No photos found with {}", objects.join(", "));
            } else {
                let photos: std::collections::BTreeSet<i64> = hits.iter().map(|h| h.photo_id).collect();
                println!("Found {} matches in {} photos:", hits.len(), photos.len());
                for hit in &hits {
                    println!(
                        "  [{}] {}  {} x{} (max {:.2})",
                        hit.photo_id, hit.file_path, hit.class_name, hit.total_count, hit.max_confidence
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::SearchFaces { names } => {
            let hits = db.search_by_face_names(&names)?;
            if json {
                print_json(&hits)?;
            } else if hits.is_empty() {
                println!("No photos found with {}", names.join(", "));
            } else {
                println!("Found {} matches:", hits.len());
                for hit in &hits {
                    let confidence = hit
                        .best_confidence
                        .map(|c| format!("{:.2}", c))
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "  [{}] {}  {} ({})",
                        hit.photo_id, hit.file_path, hit.recognized_name, confidence
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Stats => {
            let stats = db.get_statistics()?;
            if json {
                print_json(&stats)?;
            } else {
                print_statistics(&stats);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Info { photo_id } => match db.get_photo_info(photo_id)? {
            Some(info) => {
                if json {
                    print_json(&info)?;
                } else {
                    print_photo_info(&info);
                }
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("Photo {} not found", photo_id);
                Ok(ExitCode::FAILURE)
            }
        },

        Commands::List { limit } => {
            let photos = db.list_recent(limit)?;
            if json {
                print_json(&photos)?;
            } else if photos.is_empty() {
                println!("Catalog is empty");
            } else {
                for recent in &photos {
                    let status = if recent.photo.processed_at.is_some() {
                        "processed"
                    } else {
                        "pending"
                    };
                    println!(
                        "  [{}] {}  {}  {} classes  {}",
                        recent.photo.id,
                        recent.photo.created_at,
                        recent.photo.file_path,
                        recent.object_classes,
                        status
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::LoadFaces { directory } => {
            let encoder = OnnxFaceEncoder::load(&config)?;
            let report =
                store_reference_faces(&db, &encoder, &directory, &config.scanner.image_extensions)?;
            if json {
                print_json(&report)?;
            } else {
                println!(
                    "Reference images: {}  stored: {}  skipped: {}  known faces: {}",
                    report.images, report.stored, report.skipped, report.gallery_size
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::KnownFaces => {
            let faces = db.get_known_faces()?;
            if json {
                #[derive(Serialize)]
                struct Row<'a> {
                    id: i64,
                    name: &'a str,
                    image_path: &'a str,
                    dimensions: usize,
                    updated_at: &'a str,
                }
                let rows: Vec<Row> = faces
                    .iter()
                    .map(|f| Row {
                        id: f.id,
                        name: &f.name,
                        image_path: &f.image_path,
                        dimensions: f.encoding.len(),
                        updated_at: &f.updated_at,
                    })
                    .collect();
                print_json(&rows)?;
            } else if faces.is_empty() {
                println!("No known faces");
            } else {
                for face in &faces {
                    println!("  [{}] {:<20} {}", face.id, face.name, face.image_path);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load the gallery from a reference directory when one is given, else from the catalog
fn prepare_gallery(pipeline: &mut Pipeline<'_>, config: &Config, known_faces: Option<&Path>) -> Result<()> {
    let dir = known_faces.or(config.faces.known_faces_dir.as_deref());
    match dir {
        Some(dir) => {
            pipeline.load_gallery(dir, &config.scanner.image_extensions)?;
        }
        None => {
            pipeline.reload_gallery()?;
        }
    }
    tracing::info!(entries = pipeline.gallery().len(), "Face gallery ready");
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_progress(rx: mpsc::Receiver<IngestProgress>) {
    for event in rx {
        match event {
            IngestProgress::Started { total_files } => eprintln!("Found {} images", total_files),
            IngestProgress::Processing { current, total, path } => {
                eprintln!("[{}/{}] {}", current, total, path.display())
            }
            IngestProgress::Failed { path, message } => {
                eprintln!("  failed {}: {}", path.display(), message)
            }
            IngestProgress::Completed { .. } => {}
        }
    }
}

fn print_file_result(result: &FileResult) {
    println!("{}", result.file_path);
    if let Some(id) = result.photo_id {
        println!("  Photo ID: {}", id);
    }
    println!("  Objects: {}", result.detections_count);
    for detection in &result.detections {
        println!("    {} ({:.2})", detection.class_name, detection.confidence);
    }
    println!("  Faces: {}", result.face_detections_count);
    for face in &result.face_detections {
        match (&face.recognized_name, face.recognized_confidence) {
            (Some(name), Some(confidence)) => println!("    {} ({:.2})", name, confidence),
            _ => println!("    unknown"),
        }
    }
}

fn print_batch_report(report: &BatchReport) {
    for result in report.results.iter().filter(|r| r.error.is_some()) {
        if let Some(error) = &result.error {
            println!("  error: {}: {}", result.file_path, error);
        }
    }
    println!(
        "Processed: {}  Skipped: {}  Errors: {}  Objects detected: {}",
        report.processed, report.skipped, report.errors, report.total_objects
    );
}

fn print_statistics(stats: &StatisticsReport) {
    println!("Photos:            {}", stats.total_photos);
    println!("Processed:         {}", stats.processed_photos);
    println!("Objects detected:  {}", stats.total_objects);
    println!("Known faces:       {}", stats.known_faces);
    println!("Faces detected:    {}", stats.face_detections);
    println!("Faces recognized:  {}", stats.recognized_faces);
    if !stats.top_classes.is_empty() {
        println!("Top classes:");
        for class in &stats.top_classes {
            println!("  {:<20} {}", class.class_name, class.total_count);
        }
    }
}

fn print_photo_info(info: &PhotoInfo) {
    let photo = &info.photo;
    println!("[{}] {}", photo.id, photo.file_path);
    println!("  Size: {} bytes", photo.file_size);
    if let (Some(w), Some(h)) = (photo.width, photo.height) {
        println!("  Dimensions: {}x{}", w, h);
    }
    if let Some(format) = &photo.format {
        println!("  Format: {}", format);
    }
    println!("  Added: {}", photo.created_at);
    println!(
        "  Processed: {}",
        photo.processed_at.as_deref().unwrap_or("never")
    );
    if let Some(model) = &photo.model_used {
        println!("  Model used: {}", model);
    }

    if let Some(exif) = &info.exif {
        println!("  EXIF:");
        if let Some(make) = &exif.camera_make {
            println!("    Camera: {} {}", make, exif.camera_model.as_deref().unwrap_or(""));
        }
        if let Some(taken) = &exif.date_time_original {
            println!("    Taken: {}", taken);
        }
        if let Some(iso) = exif.iso_speed {
            println!("    ISO: {}", iso);
        }
        if let (Some(lat), Some(lon)) = (exif.gps_latitude, exif.gps_longitude) {
            println!("    GPS: {:.6}, {:.6}", lat, lon);
        }
    }

    if !info.objects.is_empty() {
        println!("  Objects:");
        for summary in &info.objects {
            println!(
                "    {:<20} x{}  avg {:.2}  max {:.2}",
                summary.class_name, summary.total_count, summary.avg_confidence, summary.max_confidence
            );
        }
    }

    if let Some(faces) = &info.faces {
        println!(
            "  Faces: {} ({} recognized, {} unknown)",
            faces.total_faces, faces.recognized_faces, faces.unrecognized_faces
        );
        for face in &info.face_detections {
            if let Some(name) = &face.recognized_name {
                println!("    {} ({:.2})", name, face.recognized_confidence.unwrap_or(0.0));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(args).unwrap().command
    }

    #[test]
    fn test_process_dir_accepts_both_flag_spellings() {
        let forced = parse(&["photo-vision", "process-dir", "/photos", "--force-reprocess"]);
        assert!(matches!(forced, Commands::ProcessDir { force: true, .. }));

        let forced = parse(&["photo-vision", "process-dir", "/photos", "--force"]);
        assert!(matches!(forced, Commands::ProcessDir { force: true, .. }));
    }

    #[test]
    fn test_extensions_space_or_comma_separated() {
        let expected = vec!["jpg".to_string(), "png".to_string(), "tiff".to_string()];

        match parse(&["photo-vision", "process-dir", "/photos", "--extensions", "jpg", "png", "tiff"]) {
            Commands::ProcessDir { extensions, .. } => assert_eq!(extensions, Some(expected.clone())),
            other => panic!("unexpected command {:?}", other),
        }

        match parse(&["photo-vision", "process-dir", "/photos", "--extensions", "jpg,png,tiff"]) {
            Commands::ProcessDir { extensions, .. } => assert_eq!(extensions, Some(expected)),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_model_override_and_list_default() {
        match parse(&["photo-vision", "process-image", "a.jpg", "--model", "yolov8s.onnx"]) {
            Commands::ProcessImage { model, .. } => assert_eq!(model.as_deref(), Some("yolov8s.onnx")),
            other => panic!("unexpected command {:?}", other),
        }

        assert!(matches!(parse(&["photo-vision", "list"]), Commands::List { limit: 20 }));
    }
}
