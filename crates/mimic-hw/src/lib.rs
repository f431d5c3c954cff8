//! mimic-hw — Hardware abstraction for camera capture.
//!
//! Provides V4L2-based streaming capture with conversion of the negotiated
//! pixel format to 8-bit grayscale frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, PixelFormat};
pub use frame::{Frame, FrameError};
