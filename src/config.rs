use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::analytics::Sensitivity;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "WATCHPOST_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_http_port() -> u16 {
    8001
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
        }
    }
}

fn default_camera_input() -> String {
    "/dev/video0".to_string()
}

fn default_camera_format() -> Option<String> {
    Some("v4l2".to_string())
}

fn default_frame_width() -> u32 {
    640
}

fn default_frame_height() -> u32 {
    480
}

/// Input handed to ffmpeg. `format` maps to `-f` (e.g. `v4l2`, `rtsp`);
/// leave it unset for files and URLs ffmpeg can open on its own.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_input")]
    pub input: String,
    #[serde(default = "default_camera_format")]
    pub format: Option<String>,
    #[serde(default = "default_frame_width")]
    pub width: u32,
    #[serde(default = "default_frame_height")]
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            input: default_camera_input(),
            format: default_camera_format(),
            width: default_frame_width(),
            height: default_frame_height(),
        }
    }
}

fn default_frame_interval_ms() -> u64 {
    50
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_cooldown_secs() -> u64 {
    5
}

fn default_max_disappeared() -> u32 {
    50
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct SurveillanceConfig {
    #[serde(default)]
    pub sensitivity: Sensitivity,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_max_disappeared")]
    pub max_disappeared: u32,
    /// Unset keeps centroid matching unbounded.
    #[serde(default)]
    pub max_match_distance: Option<f64>,
    #[serde(default = "default_true")]
    pub stop_on_disconnect: bool,
    #[serde(default = "default_true")]
    pub record: bool,
}

impl SurveillanceConfig {
    pub fn target_fps(&self) -> u32 {
        (1000 / self.frame_interval_ms.max(1)).max(1) as u32
    }
}

impl Default for SurveillanceConfig {
    fn default() -> Self {
        Self {
            sensitivity: Sensitivity::default(),
            frame_interval_ms: default_frame_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            cooldown_secs: default_cooldown_secs(),
            max_disappeared: default_max_disappeared(),
            max_match_distance: None,
            stop_on_disconnect: true,
            record: true,
        }
    }
}

fn default_analysis_width() -> u32 {
    320
}

fn default_history() -> u32 {
    500
}

fn default_var_threshold() -> f32 {
    16.0
}

fn default_dilate_iterations() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    #[serde(default = "default_analysis_width")]
    pub analysis_width: u32,
    #[serde(default = "default_history")]
    pub history: u32,
    #[serde(default = "default_var_threshold")]
    pub var_threshold: f32,
    #[serde(default = "default_true")]
    pub detect_shadows: bool,
    #[serde(default = "default_dilate_iterations")]
    pub dilate_iterations: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            analysis_width: default_analysis_width(),
            history: default_history(),
            var_threshold: default_var_threshold(),
            detect_shadows: true,
            dilate_iterations: default_dilate_iterations(),
        }
    }
}

fn default_working_width() -> u32 {
    640
}

fn default_min_weight() -> f32 {
    0.3
}

fn default_confidence() -> f32 {
    0.75
}

fn default_model_confidence() -> f32 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_working_width")]
    pub working_width: u32,
    #[serde(default = "default_min_weight")]
    pub min_weight: f32,
    #[serde(default = "default_confidence")]
    pub default_confidence: f32,
    #[serde(default = "default_true")]
    pub hog: bool,
    #[serde(default)]
    pub person_model: Option<PathBuf>,
    #[serde(default)]
    pub face_model: Option<PathBuf>,
    #[serde(default)]
    pub face_cascade: Option<PathBuf>,
    #[serde(default = "default_model_confidence")]
    pub model_confidence: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            working_width: default_working_width(),
            min_weight: default_min_weight(),
            default_confidence: default_confidence(),
            hog: true,
            person_model: None,
            face_model: None,
            face_cascade: None,
            model_confidence: default_model_confidence(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_list_limit() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

impl StorageConfig {
    pub fn incidents_dir(&self) -> PathBuf {
        self.data_dir.join("incidents")
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.data_dir.join("recordings")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            list_limit: default_list_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub surveillance: SurveillanceConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Loads `config.toml` (or `$WATCHPOST_CONFIG`). A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        match Self::load_from(&path) {
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path, "no config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid("camera size must be non-zero".into()));
        }
        if self.motion.analysis_width == 0 || self.detection.working_width == 0 {
            return Err(ConfigError::Invalid("working widths must be non-zero".into()));
        }
        if let Some(cap) = self.surveillance.max_match_distance {
            if !cap.is_finite() || cap <= 0.0 {
                return Err(ConfigError::Invalid(
                    "max_match_distance must be a positive number".into(),
                ));
            }
        }
        Ok(())
    }
}
