//! Terminal side panel: one status line per frame, redrawn in place.

use mimic_core::{Glyph, Surface, TickReport};
use mimic_hw::Frame;
use std::io::Write;

pub struct PanelSurface<W: Write> {
    out: W,
    report: Option<TickReport>,
}

impl<W: Write> PanelSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out, report: None }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, line: &str) {
        let written = write!(self.out, "\r\x1b[2K{line}").and_then(|()| self.out.flush());
        if let Err(e) = written {
            tracing::warn!(error = %e, "panel write failed");
        }
    }
}

/// Status line for one frame.
fn status_line(frame: &Frame, glyph: Glyph, report: Option<&TickReport>) -> String {
    let mut line = format!("{glyph}  {}x{} #{}", frame.width, frame.height, frame.sequence);
    if let Some(r) = report {
        let face = if r.face_detected { "face" } else { "no face" };
        line.push_str(&format!(
            "  {:<8} smile {:.2}  surprise {:.2}  frown {:.2}  cheeky {:.2}  {face}",
            r.label.as_str(),
            r.scores.smile,
            r.scores.surprise,
            r.scores.frown,
            r.scores.cheeky
        ));
    }
    if frame.is_dark {
        line.push_str("  (dark)");
    }
    line
}

impl<W: Write> Surface<Frame> for PanelSurface<W> {
    fn present(&mut self, frame: &Frame, glyph: Glyph) {
        let line = status_line(frame, glyph, self.report.take().as_ref());
        self.write_line(&line);
    }

    fn inspect(&mut self, report: &TickReport) {
        self.report = Some(*report);
    }

    fn idle(&mut self) {
        self.write_line("waiting for camera…");
    }
}
