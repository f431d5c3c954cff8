//! Single-face landmarker: detector → face mesh → blendshapes.
//!
//! Runs in video mode. Once a face is found, the next frame's crop is taken
//! from the previous landmarks and the detector only runs again when the
//! tracked face is lost.

use crate::blendshapes::{BlendshapeError, BlendshapeModel};
use crate::crop::CropRegion;
use crate::detector::{DetectorError, FaceDetector};
use crate::landmarker::{FaceMeshModel, LandmarkerError};
use mimic_core::{Classifications, DetectionResult};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const LANDMARK_MODEL_FILE: &str = "face_landmarks_detector.onnx";
pub const BLENDSHAPE_MODEL_FILE: &str = "face_blendshapes.onnx";

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmarker: {0}")]
    Landmarker(#[from] LandmarkerError),
    #[error("blendshapes: {0}")]
    Blendshape(#[from] BlendshapeError),
    #[error("model file not found: {0}")]
    MissingModel(PathBuf),
}

/// Locations of the three model files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub landmarks: PathBuf,
    pub blendshapes: PathBuf,
}

impl ModelPaths {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            landmarks: dir.join(LANDMARK_MODEL_FILE),
            blendshapes: dir.join(BLENDSHAPE_MODEL_FILE),
        }
    }

    /// Fail on the first model file that does not exist.
    pub fn check(&self) -> Result<(), VisionError> {
        for path in [&self.detector, &self.landmarks, &self.blendshapes] {
            if !path.exists() {
                return Err(VisionError::MissingModel(path.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkerOptions {
    /// Minimum face presence for a landmark result to count.
    pub min_presence: f32,
    /// Side of the square crop relative to the face extent.
    pub crop_expand: f32,
    /// Reuse the previous frame's landmarks as the next crop.
    pub track: bool,
}

impl Default for LandmarkerOptions {
    fn default() -> Self {
        Self {
            min_presence: 0.5,
            crop_expand: 1.5,
            track: true,
        }
    }
}

/// Face landmarker configured for exactly one face with blendshape output.
pub struct FaceLandmarker {
    detector: FaceDetector,
    mesh: FaceMeshModel,
    blendshapes: BlendshapeModel,
    options: LandmarkerOptions,
    tracked: Option<CropRegion>,
    last_timestamp_ms: Option<u64>,
}

impl FaceLandmarker {
    /// Load all three models. Paths are checked before any model is loaded.
    pub fn load(paths: &ModelPaths, options: LandmarkerOptions) -> Result<Self, VisionError> {
        paths.check()?;
        let detector = FaceDetector::load(&paths.detector)?;
        let mesh = FaceMeshModel::load(&paths.landmarks)?;
        let blendshapes = BlendshapeModel::load(&paths.blendshapes)?;
        tracing::info!(?options, "face landmarker ready");

        Ok(Self {
            detector,
            mesh,
            blendshapes,
            options,
            tracked: None,
            last_timestamp_ms: None,
        })
    }

    /// Blendshapes for the face in a grayscale frame, if one is found.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        timestamp_ms: u64,
    ) -> Result<DetectionResult, VisionError> {
        if self.last_timestamp_ms.is_some_and(|last| timestamp_ms < last) {
            tracing::debug!(timestamp_ms, "timestamp went backwards; dropping tracked face");
            self.tracked = None;
        }
        self.last_timestamp_ms = Some(timestamp_ms);

        if let Some(region) = self.tracked.take() {
            if let Some(face) = self.analyze(frame, width, height, &region)? {
                return Ok(DetectionResult::single(face));
            }
            tracing::trace!("tracked face lost; re-detecting");
        }

        let Some(face) = self.detector.detect_primary(frame, width, height)? else {
            return Ok(DetectionResult::default());
        };
        tracing::trace!(confidence = face.confidence, "face detected");

        let region = CropRegion::around(
            face.x,
            face.y,
            face.width,
            face.height,
            self.options.crop_expand,
        );
        Ok(match self.analyze(frame, width, height, &region)? {
            Some(face) => DetectionResult::single(face),
            None => DetectionResult::default(),
        })
    }

    fn analyze(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        region: &CropRegion,
    ) -> Result<Option<Classifications>, VisionError> {
        let landmarks = self.mesh.landmarks(frame, width, height, region)?;
        if landmarks.presence < self.options.min_presence {
            tracing::trace!(presence = landmarks.presence, "face presence below minimum");
            return Ok(None);
        }
        if self.options.track {
            self.tracked = CropRegion::enclosing(&landmarks.xy(), self.options.crop_expand);
        }
        Ok(Some(self.blendshapes.infer(&landmarks)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths_in_dir() {
        let paths = ModelPaths::in_dir(Path::new("/opt/models"));
        assert_eq!(paths.detector, PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(paths.landmarks, PathBuf::from("/opt/models/face_landmarks_detector.onnx"));
        assert_eq!(paths.blendshapes, PathBuf::from("/opt/models/face_blendshapes.onnx"));
    }

    #[test]
    fn test_check_reports_first_missing_model() {
        let paths = ModelPaths::in_dir(Path::new("/nonexistent/mimic-models"));
        match paths.check() {
            Err(VisionError::MissingModel(path)) => assert_eq!(path, paths.detector),
            other => panic!("expected MissingModel, got {other:?}"),
        }
    }

    #[test]
    fn test_load_fails_fast_without_models() {
        let paths = ModelPaths::in_dir(Path::new("/nonexistent/mimic-models"));
        let err = FaceLandmarker::load(&paths, LandmarkerOptions::default()).err().unwrap();
        assert!(err.to_string().contains("det_10g.onnx"), "{err}");
    }

    #[test]
    fn test_default_options() {
        let opts = LandmarkerOptions::default();
        assert_eq!(opts.min_presence, 0.5);
        assert_eq!(opts.crop_expand, 1.5);
        assert!(opts.track);
    }
}
