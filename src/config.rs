use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides the default config file location.
pub const CONFIG_ENV: &str = "PHOTO_VISION_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Directory holding ONNX model files (downloaded on demand)
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub faces: FacesConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Model file name inside `models_dir`, or an absolute path
    #[serde(default = "default_detector_model")]
    pub model: String,

    /// Where to fetch the model from when it is missing
    #[serde(default)]
    pub model_url: Option<String>,

    /// One class label per line; COCO labels are used when unset
    #[serde(default)]
    pub labels_path: Option<PathBuf>,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
}

fn default_detector_model() -> String {
    "yolov8n.onnx".to_string()
}

fn default_confidence_threshold() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.45
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: default_detector_model(),
            model_url: None,
            labels_path: None,
            confidence_threshold: default_confidence_threshold(),
            iou_threshold: default_iou_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Cosine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacesConfig {
    /// Maximum distance for a face to count as a match (lower = stricter)
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,

    #[serde(default)]
    pub distance: DistanceMetric,

    /// Reference directory with one subfolder per known person
    #[serde(default)]
    pub known_faces_dir: Option<PathBuf>,

    #[serde(default = "default_face_detection_model")]
    pub detection_model: String,

    #[serde(default = "default_face_embedding_model")]
    pub embedding_model: String,

    /// Minimum UltraFace score for a face box to be kept
    #[serde(default = "default_face_detection_threshold")]
    pub detection_threshold: f32,
}

fn default_tolerance() -> f32 {
    0.6
}

fn default_face_detection_model() -> String {
    "ultraface-320.onnx".to_string()
}

fn default_face_embedding_model() -> String {
    "arcface-resnet100.onnx".to_string()
}

fn default_face_detection_threshold() -> f32 {
    0.7
}

impl Default for FacesConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            distance: DistanceMetric::default(),
            known_faces_dir: None,
            detection_model: default_face_detection_model(),
            embedding_model: default_face_embedding_model(),
            detection_threshold: default_face_detection_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

fn default_image_extensions() -> Vec<String> {
    vec![
        "jpg".to_string(),
        "jpeg".to_string(),
        "png".to_string(),
        "bmp".to_string(),
        "tiff".to_string(),
    ]
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log to stderr instead of journald / log files
    #[serde(default = "default_log_to_stderr")]
    pub stderr: bool,

    /// Directory for rolling log files when journald is unavailable
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_log_to_stderr() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stderr: default_log_to_stderr(),
            log_dir: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photo-vision")
        .join("catalog.db")
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photo-vision")
        .join("models")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            models_dir: default_models_dir(),
            detector: DetectorConfig::default(),
            faces: FacesConfig::default(),
            scanner: ScannerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load the config from `path`, `$PHOTO_VISION_CONFIG`, or the platform
    /// config directory. A default file is written when none exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config {}", config_path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Invalid config {}", config_path.display()))
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            Ok(config)
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            anyhow::bail!(
                "detector.confidence_threshold must be within [0, 1], got {}",
                self.detector.confidence_threshold
            );
        }
        if !self.faces.tolerance.is_finite() || self.faces.tolerance < 0.0 {
            anyhow::bail!("faces.tolerance must be a non-negative number, got {}", self.faces.tolerance);
        }
        if self.scanner.image_extensions.is_empty() {
            anyhow::bail!("scanner.image_extensions must not be empty");
        }
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("photo-vision")
            .join("config.toml")
    }

    /// Resolve a model file name against `models_dir`; absolute paths pass through.
    pub fn model_path(&self, model: &str) -> PathBuf {
        let path = Path::new(model);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.models_dir.join(model)
        }
    }
}
