//! JSON Lines shell: one object per presented frame.

use mimic_core::{Glyph, Surface, TickReport};
use mimic_hw::Frame;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct Line<'a> {
    sequence: u32,
    width: u32,
    height: u32,
    dark: bool,
    /// Only set when no report arrived; the report carries its own glyph.
    #[serde(skip_serializing_if = "Option::is_none")]
    glyph: Option<Glyph>,
    #[serde(flatten)]
    report: Option<&'a TickReport>,
}

pub struct JsonSurface<W: Write> {
    out: W,
    report: Option<TickReport>,
}

impl<W: Write> JsonSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out, report: None }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Surface<Frame> for JsonSurface<W> {
    fn present(&mut self, frame: &Frame, glyph: Glyph) {
        let report = self.report.take();
        let line = Line {
            sequence: frame.sequence,
            width: frame.width,
            height: frame.height,
            dark: frame.is_dark,
            glyph: report.is_none().then_some(glyph),
            report: report.as_ref(),
        };
        let written = serde_json::to_writer(&mut self.out, &line)
            .map_err(std::io::Error::from)
            .and_then(|()| writeln!(self.out))
            .and_then(|()| self.out.flush());
        if let Err(e) = written {
            tracing::warn!(error = %e, "json write failed");
        }
    }

    fn inspect(&mut self, report: &TickReport) {
        self.report = Some(*report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_core::{ExpressionLabel, ExpressionScores};
    use std::time::Instant;

    fn frame(sequence: u32) -> Frame {
        Frame {
            data: vec![0; 6],
            width: 3,
            height: 2,
            timestamp: Instant::now(),
            sequence,
            is_dark: false,
        }
    }

    #[test]
    fn test_line_carries_report_fields() {
        let mut surface = JsonSurface::new(Vec::new());
        surface.inspect(&TickReport {
            timestamp_ms: 120,
            face_detected: true,
            label: ExpressionLabel::Surprise,
            glyph: Glyph::SURPRISE,
            scores: ExpressionScores { smile: 0.0, surprise: 0.5, frown: 0.0, cheeky: 0.0 },
        });
        surface.present(&frame(9), Glyph::SURPRISE);

        let out = String::from_utf8(surface.into_inner()).unwrap();
        assert!(out.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(value["sequence"], 9);
        assert_eq!(value["width"], 3);
        assert_eq!(value["glyph"], "\u{1F62E}");
        assert_eq!(value["label"], "surprise");
        assert_eq!(value["timestamp_ms"], 120);
        assert_eq!(value["face_detected"], true);
        assert_eq!(value["scores"]["surprise"], 0.5);
    }

    #[test]
    fn test_one_line_per_frame() {
        let mut surface = JsonSurface::new(Vec::new());
        surface.present(&frame(1), Glyph::NEUTRAL);
        surface.present(&frame(2), Glyph::NEUTRAL);

        let out = String::from_utf8(surface.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["sequence"], 2);
        assert_eq!(second["glyph"], "\u{1F610}");
        assert!(second.get("label").is_none());
    }
}
