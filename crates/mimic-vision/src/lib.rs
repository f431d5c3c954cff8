//! mimic-vision — Face landmarker with blendshape output.
//!
//! SCRFD finds the face, the 478-point face mesh model locates landmarks,
//! and the blendshape model scores the 52 expression categories. All three
//! run via ONNX Runtime on the CPU.

pub mod blendshapes;
pub mod crop;
pub mod detector;
pub mod face_landmarker;
pub mod landmarker;

pub use face_landmarker::{
    FaceLandmarker, LandmarkerOptions, ModelPaths, VisionError, BLENDSHAPE_MODEL_FILE,
    DETECTOR_MODEL_FILE, LANDMARK_MODEL_FILE,
};

use std::path::PathBuf;

/// `$XDG_DATA_HOME/mimic/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    let data_home = std::env::var_os("XDG_DATA_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share"))
        })
        .unwrap_or_else(std::env::temp_dir);
    data_home.join("mimic").join("models")
}
