//! Presentation shells. All of them consume the same classification output;
//! they differ only in where the frame and glyph end up.

mod canvas;
mod json;
mod panel;

pub use canvas::{CanvasSize, CanvasSurface, Fit, Snapshots};
pub use json::JsonSurface;
pub use panel::PanelSurface;

use clap::ValueEnum;
use mimic_core::Surface;
use mimic_hw::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SurfaceKind {
    /// Full canvas, frame letterboxed, glyph overlaid
    Overlay,
    /// Canvas with the frame stretched to fill it
    Basic,
    /// Terminal status line with scores
    Panel,
    /// JSON Lines on stdout
    Json,
}

/// Build the shell for `kind`.
pub fn build(
    kind: SurfaceKind,
    size: CanvasSize,
    snapshots: Option<Snapshots>,
) -> Box<dyn Surface<Frame>> {
    match kind {
        SurfaceKind::Overlay => Box::new(CanvasSurface::new(Fit::Contain, size, snapshots)),
        SurfaceKind::Basic => Box::new(CanvasSurface::new(Fit::Stretch, size, snapshots)),
        SurfaceKind::Panel => Box::new(PanelSurface::new(std::io::stderr())),
        SurfaceKind::Json => Box::new(JsonSurface::new(std::io::stdout())),
    }
}
