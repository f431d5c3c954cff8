//! mimic-core — Facial expression to emoji mapping.
//!
//! Turns per-face blendshape scores from a face-landmark model into one of
//! five emoji, and defines the render loop contract that ties a capture
//! session to a presentation surface.

pub mod blendshape;
pub mod expression;
pub mod render;

pub use blendshape::{
    normalize, Blendshape, BlendshapeMap, BlendshapeScore, Classifications, DetectionResult,
};
pub use expression::{
    classify, classify_label, classify_with, ExpressionLabel, ExpressionScores, Glyph,
    ThresholdError, ThresholdTable, BASELINE_SCORE,
};
pub use render::{
    tick, CaptureSession, LoopSummary, RenderLoop, RunFlag, Surface, TickReport, EMPTY_POLL_BACKOFF,
};
