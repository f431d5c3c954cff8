use crate::surface::CanvasSize;
use mimic_core::{ThresholdError, ThresholdTable};
use mimic_vision::ModelPaths;
use std::path::PathBuf;

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Optional TOML file overriding expression thresholds.
    pub thresholds_path: Option<PathBuf>,
    /// Requested capture resolution. The driver may pick a nearby size.
    pub capture_width: u32,
    pub capture_height: u32,
    /// Canvas size in CSS pixels.
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Device pixel ratio applied to the canvas buffer.
    pub pixel_ratio: f32,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
}

impl Config {
    /// Load configuration from `MIMIC_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let dimension = |key: &str, default: u32| {
            var(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        Self {
            camera_device: var("MIMIC_CAMERA_DEVICE")
                .unwrap_or_else(|| "/dev/video0".to_string()),
            model_dir: var("MIMIC_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(mimic_vision::default_model_dir),
            thresholds_path: var("MIMIC_THRESHOLDS")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            capture_width: dimension("MIMIC_CAPTURE_WIDTH", 640),
            capture_height: dimension("MIMIC_CAPTURE_HEIGHT", 360),
            canvas_width: dimension("MIMIC_CANVAS_WIDTH", 1280),
            canvas_height: dimension("MIMIC_CANVAS_HEIGHT", 720),
            pixel_ratio: var("MIMIC_PIXEL_RATIO")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),
            warmup_frames: var("MIMIC_WARMUP_FRAMES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
        }
    }

    /// Paths to the detector, face mesh and blendshape models.
    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }

    /// Threshold table from `MIMIC_THRESHOLDS`, or the built-in one.
    pub fn thresholds(&self) -> Result<ThresholdTable, ThresholdError> {
        match &self.thresholds_path {
            Some(path) => ThresholdTable::load(path),
            None => Ok(ThresholdTable::DEFAULT),
        }
    }

    pub fn canvas_size(&self) -> CanvasSize {
        CanvasSize::new(self.canvas_width, self.canvas_height, self.pixel_ratio)
    }
}
