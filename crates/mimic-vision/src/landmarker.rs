//! Face mesh landmark model via ONNX Runtime.
//!
//! Runs the 478-point face landmark model (468 mesh points plus 10 iris
//! points) on a square crop around the face and maps the points back to
//! source-frame pixels.

use crate::crop::{self, CropRegion, TensorLayout};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

pub const LANDMARK_COUNT: usize = 478;
const LANDMARK_VALUES: usize = LANDMARK_COUNT * 3;
const DEFAULT_INPUT_SIZE: usize = 256;
const LANDMARK_MEAN: f32 = 0.0;
const LANDMARK_STD: f32 = 255.0;

#[derive(Error, Debug)]
pub enum LandmarkerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Landmarks for one face in source-frame pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    /// (x, y, z); z is relative depth in crop-pixel units.
    pub points: Vec<[f32; 3]>,
    /// Face presence probability in [0, 1].
    pub presence: f32,
}

impl FaceLandmarks {
    pub fn xy(&self) -> Vec<(f32, f32)> {
        self.points.iter().map(|p| (p[0], p[1])).collect()
    }
}

/// Face mesh landmark model.
pub struct FaceMeshModel {
    session: Session,
    input_size: usize,
    layout: TensorLayout,
    output_count: usize,
}

impl FaceMeshModel {
    pub fn load(model_path: &Path) -> Result<Self, LandmarkerError> {
        if !model_path.exists() {
            return Err(LandmarkerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let input_shape: Vec<i64> = session
            .inputs()
            .first()
            .and_then(|i| i.dtype().tensor_shape())
            .map(|shape| shape.to_vec())
            .unwrap_or_default();
        let (layout, input_size) = input_geometry(&input_shape);
        let output_count = session.outputs().len();

        tracing::info!(
            path = %model_path.display(),
            ?input_shape,
            ?layout,
            input_size,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face landmark model"
        );

        Ok(Self {
            session,
            input_size,
            layout,
            output_count,
        })
    }

    /// Run the model on `region` of a grayscale frame.
    pub fn landmarks(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        region: &CropRegion,
    ) -> Result<FaceLandmarks, LandmarkerError> {
        let size = self.input_size;
        let crop = crop::crop_resize(frame, width as usize, height as usize, region, size);
        let input = crop::gray_to_tensor(&crop, size, LANDMARK_MEAN, LANDMARK_STD, self.layout);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut raw_points: Option<Vec<f32>> = None;
        let mut presence_logit: Option<f32> = None;
        for idx in 0..self.output_count {
            let Ok((_, data)) = outputs[idx].try_extract_tensor::<f32>() else {
                continue;
            };
            match data.len() {
                LANDMARK_VALUES if raw_points.is_none() => raw_points = Some(data.to_vec()),
                1 if presence_logit.is_none() => presence_logit = Some(data[0]),
                _ => {}
            }
        }

        let raw_points = raw_points.ok_or_else(|| {
            LandmarkerError::InferenceFailed(format!(
                "no output with {LANDMARK_VALUES} values ({LANDMARK_COUNT} landmarks)"
            ))
        })?;
        let presence = presence_logit.map(sigmoid).unwrap_or(1.0);

        Ok(FaceLandmarks {
            points: decode_points(&raw_points, region, size),
            presence,
        })
    }
}

/// Infer tensor layout and square input size from a model input shape.
/// Dynamic or missing dimensions fall back to NHWC 256×256.
fn input_geometry(shape: &[i64]) -> (TensorLayout, usize) {
    let dim = |v: i64| usize::try_from(v).ok().filter(|&d| d > 0);
    match shape {
        [_, 3, h, _] => (TensorLayout::Nchw, dim(*h).unwrap_or(DEFAULT_INPUT_SIZE)),
        [_, h, _, 3] => (TensorLayout::Nhwc, dim(*h).unwrap_or(DEFAULT_INPUT_SIZE)),
        _ => (TensorLayout::Nhwc, DEFAULT_INPUT_SIZE),
    }
}

/// Map raw (x, y, z) triples from crop space to source-frame pixels.
fn decode_points(raw: &[f32], region: &CropRegion, input_size: usize) -> Vec<[f32; 3]> {
    let z_scale = region.size / input_size as f32;
    raw.chunks_exact(3)
        .map(|p| {
            let (x, y) = region.to_source(p[0], p[1], input_size);
            [x, y, p[2] * z_scale]
        })
        .collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_geometry() {
        assert_eq!(input_geometry(&[1, 256, 256, 3]), (TensorLayout::Nhwc, 256));
        assert_eq!(input_geometry(&[1, 3, 192, 192]), (TensorLayout::Nchw, 192));
        assert_eq!(input_geometry(&[-1, -1, -1, 3]), (TensorLayout::Nhwc, 256));
        assert_eq!(input_geometry(&[]), (TensorLayout::Nhwc, 256));
    }

    #[test]
    fn test_decode_points_maps_crop_to_source() {
        let region = CropRegion { x: 100.0, y: 50.0, size: 128.0 };
        let raw = [0.0, 0.0, 2.0, 256.0, 128.0, -4.0];
        let pts = decode_points(&raw, &region, 256);
        assert_eq!(pts, vec![[100.0, 50.0, 1.0], [228.0, 114.0, -2.0]]);
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }

    #[test]
    fn test_xy_drops_depth() {
        let lm = FaceLandmarks { points: vec![[1.0, 2.0, 3.0]], presence: 1.0 };
        assert_eq!(lm.xy(), vec![(1.0, 2.0)]);
    }
}
