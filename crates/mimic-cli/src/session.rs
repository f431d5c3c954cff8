use mimic_core::{CaptureSession, DetectionResult};
use mimic_hw::{Camera, CameraError, Frame, FrameStream};
use mimic_vision::{FaceLandmarker, VisionError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("vision error: {0}")]
    Vision(#[from] VisionError),
}

/// Live camera stream paired with the face landmarker.
///
/// Lives on the render thread for as long as the loop runs; dropping it stops
/// streaming.
pub struct CameraSession<'a> {
    stream: FrameStream<'a>,
    landmarker: FaceLandmarker,
}

impl<'a> CameraSession<'a> {
    /// Start streaming from `camera` and discard `warmup_frames`.
    pub fn start(
        camera: &'a Camera,
        landmarker: FaceLandmarker,
        warmup_frames: usize,
    ) -> Result<Self, SessionError> {
        let mut stream = camera.stream()?;
        if warmup_frames > 0 {
            tracing::info!(count = warmup_frames, "discarding warmup frames");
            stream.skip(warmup_frames)?;
        }
        Ok(Self { stream, landmarker })
    }
}

impl CaptureSession for CameraSession<'_> {
    type Frame = Frame;
    type Error = SessionError;

    fn current_frame(&mut self) -> Result<Option<Frame>, SessionError> {
        let frame = self.stream.next_frame()?;
        if frame.is_dark {
            tracing::debug!(seq = frame.sequence, "dark frame");
        }
        Ok(Some(frame))
    }

    fn detect(
        &mut self,
        frame: &Frame,
        timestamp_ms: u64,
    ) -> Result<Option<DetectionResult>, SessionError> {
        let result = self
            .landmarker
            .detect(&frame.data, frame.width, frame.height, timestamp_ms)?;
        Ok(Some(result))
    }
}
