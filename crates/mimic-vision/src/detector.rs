//! SCRFD face detector via ONNX Runtime.
//!
//! Finds the face the landmark model should look at. Three-stride anchor-free
//! decoding with NMS post-processing; faces are returned best-first.

use crate::crop::{self, Letterbox, TensorLayout};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detected face in source-frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBox {
    fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputs = (usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    stride_outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        // score + bbox per stride; keypoint outputs are present but unused
        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires score/bbox outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        let stride_outputs = discover_output_indices(&output_names);
        tracing::debug!(?stride_outputs, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_outputs,
        })
    }

    /// Detect faces in a grayscale frame, best first.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceBox>, DetectorError> {
        let (width, height) = (width as usize, height as usize);
        let letterbox = Letterbox::fit(width, height, SCRFD_INPUT_SIZE);
        let input = preprocess(frame, width, height, &letterbox);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_outputs[pos];
            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
            })?;

            candidates.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::trace!(count = faces.len(), "SCRFD detections");
        Ok(faces)
    }

    /// Most confident face, if any.
    pub fn detect_primary(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<FaceBox>, DetectorError> {
        Ok(self.detect(frame, width, height)?.into_iter().next())
    }
}

/// Letterbox the frame into the 640×640 SCRFD input. Padding carries the mean
/// so it normalizes to 0.
fn preprocess(
    frame: &[u8],
    width: usize,
    height: usize,
    letterbox: &Letterbox,
) -> ndarray::Array4<f32> {
    let resized = crop::resize_bilinear(
        frame,
        width,
        height,
        letterbox.scaled_width,
        letterbox.scaled_height,
    );

    let mut canvas = vec![SCRFD_MEAN.round() as u8; SCRFD_INPUT_SIZE * SCRFD_INPUT_SIZE];
    let x0 = letterbox.pad_x.floor() as usize;
    let y0 = letterbox.pad_y.floor() as usize;
    for (row, line) in resized.chunks_exact(letterbox.scaled_width.max(1)).enumerate() {
        let start = (y0 + row) * SCRFD_INPUT_SIZE + x0;
        canvas[start..start + line.len()].copy_from_slice(line);
    }

    crop::gray_to_tensor(
        &canvas,
        SCRFD_INPUT_SIZE,
        SCRFD_MEAN,
        SCRFD_STD,
        TensorLayout::Nchw,
    )
}

/// Map stride slots to output tensors by name ("score_8", "bbox_8", ...),
/// falling back to the standard positional order [scores 8/16/32, bboxes 8/16/32].
fn discover_output_indices(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(slots) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [slots[0], slots[1], slots[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping"
            );
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode detections for a single stride level into source coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<FaceBox> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..num_anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= threshold {
                return None;
            }
            let offsets = bboxes.get(idx * 4..idx * 4 + 4)?;

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * s;
            let ay = (cell / grid_w) as f32 * s;

            let (x1, y1) = letterbox.to_source(ax - offsets[0] * s, ay - offsets[1] * s);
            let (x2, y2) = letterbox.to_source(ax + offsets[2] * s, ay + offsets[3] * s);

            Some(FaceBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
            })
        })
        .collect()
}

/// Non-Maximum Suppression. Output is sorted by descending confidence.
fn nms(mut detections: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| k.iou(&det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(x: f32, y: f32, w: f32, h: f32, conf: f32) -> FaceBox {
        FaceBox { x, y, width: w, height: h, confidence: conf }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_box(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_box(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_box(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_box(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_box(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping_and_sorts() {
        let detections = vec![
            make_box(200.0, 200.0, 50.0, 50.0, 0.7),
            make_box(5.0, 5.0, 100.0, 100.0, 0.8),
            make_box(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32",
            "bbox_8", "bbox_16", "bbox_32",
            "kps_8", "kps_16", "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_output_indices(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_discover_output_indices_shuffled_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_output_indices(&names), [(2, 0), (5, 3), (8, 6)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_decode_stride_maps_to_source() {
        // Frame 320x320 letterboxed to 640: scale 2, no padding.
        let letterbox = Letterbox::fit(320, 320, SCRFD_INPUT_SIZE);
        let stride = 32;
        let cells = (SCRFD_INPUT_SIZE / stride) * (SCRFD_INPUT_SIZE / stride);
        let mut scores = vec![0.0f32; cells * SCRFD_ANCHORS_PER_CELL];
        let mut bboxes = vec![0.0f32; cells * SCRFD_ANCHORS_PER_CELL * 4];

        // anchor 2 → cell 1 → grid (x=1, y=0) → centre (32, 0) in input space
        scores[2] = 0.9;
        bboxes[8..12].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);

        let faces = decode_stride(&scores, &bboxes, stride, &letterbox, 0.5);
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        // input box (16, 0)-(48, 32) → source (8, 0)-(24, 16)
        assert!((f.x - 8.0).abs() < 1e-4, "{f:?}");
        assert!((f.y - 0.0).abs() < 1e-4, "{f:?}");
        assert!((f.width - 16.0).abs() < 1e-4, "{f:?}");
        assert!((f.height - 16.0).abs() < 1e-4, "{f:?}");
    }

    #[test]
    fn test_decode_stride_skips_low_scores_and_short_tensors() {
        let letterbox = Letterbox::fit(640, 640, SCRFD_INPUT_SIZE);
        let scores = vec![0.5f32, 0.9];
        let bboxes = vec![0.0f32; 4]; // only enough for anchor 0
        assert!(decode_stride(&scores, &bboxes, 32, &letterbox, 0.5).is_empty());
    }

    #[test]
    fn test_preprocess_padding_normalizes_near_zero() {
        let frame = vec![255u8; 64 * 32];
        let letterbox = Letterbox::fit(64, 32, SCRFD_INPUT_SIZE);
        let tensor = preprocess(&frame, 64, 32, &letterbox);
        assert_eq!(tensor.shape(), &[1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE]);
        // top rows are padding
        assert!(tensor[[0, 0, 0, 0]].abs() < 0.01);
        // centre row is image content
        let centre = tensor[[0, 1, SCRFD_INPUT_SIZE / 2, SCRFD_INPUT_SIZE / 2]];
        assert!((centre - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-6);
    }
}
