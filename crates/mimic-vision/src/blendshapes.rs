//! Face blendshape model via ONNX Runtime.
//!
//! Maps a fixed subset of 146 face landmarks (source-frame pixel x, y) to the
//! 52 blendshape scores, in model category order.

use crate::landmarker::{FaceLandmarks, LANDMARK_COUNT};
use mimic_core::{Blendshape, BlendshapeScore, Classifications};
use ndarray::Array3;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Landmark indices consumed by the blendshape model, in input order.
const LANDMARK_SUBSET: [usize; 146] = [
    0, 1, 4, 5, 6, 7, 8, 10, 13, 14, 17, 21, 33, 37, 39, 40, 46, 52, 53, 54, 55, 58, 61, 63, 65,
    66, 67, 70, 78, 80, 81, 82, 84, 87, 88, 91, 93, 95, 103, 105, 107, 109, 127, 132, 133, 136,
    144, 145, 146, 148, 149, 150, 152, 153, 154, 155, 157, 158, 159, 160, 161, 162, 163, 168, 172,
    173, 176, 178, 181, 185, 191, 195, 197, 234, 246, 249, 251, 263, 267, 269, 270, 276, 282, 283,
    284, 285, 288, 291, 293, 295, 296, 297, 300, 308, 310, 311, 312, 314, 317, 318, 321, 323, 324,
    332, 334, 336, 338, 356, 361, 362, 365, 373, 374, 375, 377, 378, 379, 380, 381, 382, 384, 385,
    386, 387, 388, 389, 390, 397, 398, 400, 402, 405, 409, 415, 454, 466, 468, 469, 470, 471, 472,
    473, 474, 475, 476, 477,
];

#[derive(Error, Debug)]
pub enum BlendshapeError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("expected 478 landmarks, got {0}")]
    LandmarkCount(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Blendshape regression model.
pub struct BlendshapeModel {
    session: Session,
}

impl BlendshapeModel {
    pub fn load(model_path: &Path) -> Result<Self, BlendshapeError> {
        if !model_path.exists() {
            return Err(BlendshapeError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded blendshape model"
        );

        Ok(Self { session })
    }

    /// Score blendshapes for one face.
    pub fn infer(&mut self, landmarks: &FaceLandmarks) -> Result<Classifications, BlendshapeError> {
        let input = subset_tensor(landmarks)?;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| BlendshapeError::InferenceFailed(format!("blendshape scores: {e}")))?;

        if raw.len() != Blendshape::MODEL_OUTPUTS {
            return Err(BlendshapeError::InferenceFailed(format!(
                "expected {} scores, got {}",
                Blendshape::MODEL_OUTPUTS,
                raw.len()
            )));
        }

        Ok(to_classifications(raw))
    }
}

/// Gather the landmark subset into a `[1, 146, 2]` tensor.
fn subset_tensor(landmarks: &FaceLandmarks) -> Result<Array3<f32>, BlendshapeError> {
    if landmarks.points.len() != LANDMARK_COUNT {
        return Err(BlendshapeError::LandmarkCount(landmarks.points.len()));
    }
    let mut tensor = Array3::<f32>::zeros((1, LANDMARK_SUBSET.len(), 2));
    for (row, &idx) in LANDMARK_SUBSET.iter().enumerate() {
        let p = landmarks.points[idx];
        tensor[[0, row, 0]] = p[0];
        tensor[[0, row, 1]] = p[1];
    }
    Ok(tensor)
}

/// Name raw scores by their output position.
fn to_classifications(raw: &[f32]) -> Classifications {
    Classifications {
        categories: raw
            .iter()
            .enumerate()
            .filter_map(|(i, &score)| {
                Blendshape::from_model_index(i).map(|key| BlendshapeScore::new(key.name(), score))
            })
            .collect(),
    }
}
