//! Per-frame render loop: session → normalize → classify → surface.
//!
//! The loop owns no error state. Failures from the capture session propagate
//! out of [`tick`] and [`RenderLoop::run`] unchanged, so the caller decides how
//! to report them and the loop simply stops.

use crate::blendshape::{normalize, DetectionResult};
use crate::expression::{classify_with, ExpressionLabel, ExpressionScores, Glyph, ThresholdTable};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pause after a poll that produced no frame.
pub const EMPTY_POLL_BACKOFF: Duration = Duration::from_millis(2);

/// Source of frames and per-frame model output (camera + model session).
pub trait CaptureSession {
    type Frame;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Latest frame, or `None` when nothing is available yet.
    ///
    /// Implementations should block until a frame arrives. [`RenderLoop`]
    /// backs off for [`EMPTY_POLL_BACKOFF`] after each `None`.
    fn current_frame(&mut self) -> Result<Option<Self::Frame>, Self::Error>;

    /// Run the model on `frame`. `timestamp_ms` is monotonic per session.
    fn detect(
        &mut self,
        frame: &Self::Frame,
        timestamp_ms: u64,
    ) -> Result<Option<DetectionResult>, Self::Error>;
}

/// Presentation shell that draws a frame together with its emoji.
pub trait Surface<F> {
    fn present(&mut self, frame: &F, glyph: Glyph);

    /// Per-frame classification detail, delivered just before [`Surface::present`].
    fn inspect(&mut self, _report: &TickReport) {}

    /// Called instead of `present` when no session is active.
    fn idle(&mut self) {}
}

impl<F, P: Surface<F> + ?Sized> Surface<F> for Box<P> {
    fn present(&mut self, frame: &F, glyph: Glyph) {
        (**self).present(frame, glyph)
    }

    fn inspect(&mut self, report: &TickReport) {
        (**self).inspect(report)
    }

    fn idle(&mut self) {
        (**self).idle()
    }
}

/// What one tick observed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickReport {
    pub timestamp_ms: u64,
    pub face_detected: bool,
    pub label: ExpressionLabel,
    pub glyph: Glyph,
    pub scores: ExpressionScores,
}

/// Run one classification-and-draw cycle.
///
/// Returns `Ok(None)` when there was no session or no frame to draw.
pub fn tick<S, P>(
    session: Option<&mut S>,
    surface: &mut P,
    thresholds: &ThresholdTable,
    timestamp_ms: u64,
) -> Result<Option<TickReport>, S::Error>
where
    S: CaptureSession,
    P: Surface<S::Frame>,
{
    let Some(session) = session else {
        surface.idle();
        return Ok(None);
    };
    let Some(frame) = session.current_frame()? else {
        return Ok(None);
    };

    let detection = session.detect(&frame, timestamp_ms)?;
    let face = detection.as_ref().and_then(DetectionResult::first_face);
    let map = normalize(face);
    let scores = ExpressionScores::from_map(&map);
    let label = classify_with(&map, thresholds);

    let report = TickReport {
        timestamp_ms,
        face_detected: face.is_some(),
        label,
        glyph: label.glyph(),
        scores,
    };
    tracing::trace!(timestamp_ms, %label, face = report.face_detected, "tick");

    surface.inspect(&report);
    surface.present(&frame, report.glyph);
    Ok(Some(report))
}

/// Shared run-state flag. Clearing it makes the next cycle the last.
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    /// A flag in the running state.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters returned when the loop stops cleanly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames: u64,
    pub frames_with_face: u64,
}

/// Cooperative loop driving [`tick`] until its [`RunFlag`] is cleared.
///
/// Pacing comes from the session: each cycle waits as long as
/// `current_frame` blocks.
pub struct RenderLoop {
    flag: RunFlag,
    thresholds: ThresholdTable,
}

impl RenderLoop {
    pub fn new(thresholds: ThresholdTable) -> Self {
        Self {
            flag: RunFlag::new(),
            thresholds,
        }
    }

    /// Handle for stopping the loop from another thread.
    pub fn run_flag(&self) -> RunFlag {
        self.flag.clone()
    }

    pub fn run<S, P>(&self, session: &mut S, surface: &mut P) -> Result<LoopSummary, S::Error>
    where
        S: CaptureSession,
        P: Surface<S::Frame>,
    {
        let started = Instant::now();
        let mut summary = LoopSummary::default();
        let mut last_label = None;

        while self.flag.is_running() {
            let timestamp_ms = started.elapsed().as_millis() as u64;
            let Some(report) = tick(Some(&mut *session), surface, &self.thresholds, timestamp_ms)?
            else {
                std::thread::sleep(EMPTY_POLL_BACKOFF);
                continue;
            };

            summary.frames += 1;
            if report.face_detected {
                summary.frames_with_face += 1;
            }
            if last_label != Some(report.label) {
                tracing::debug!(label = %report.label, glyph = %report.glyph, "expression changed");
                last_label = Some(report.label);
            }
        }

        tracing::info!(
            frames = summary.frames,
            with_face = summary.frames_with_face,
            "render loop stopped"
        );
        Ok(summary)
    }
}
