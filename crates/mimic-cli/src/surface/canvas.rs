//! Raster canvas shell: draws the frame into an RGB buffer and paints the
//! expression glyph over it. Optionally writes the buffer out as PNG.

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_ellipse_mut, draw_filled_rect_mut};
use imageproc::rect::Rect as PixelRect;
use mimic_core::{ExpressionLabel, Glyph, Surface, TickReport};
use mimic_hw::Frame;
use std::path::PathBuf;

/// Glyph side relative to the shorter canvas side.
const GLYPH_SCALE: f32 = 0.3;
/// Downward nudge of the glyph centre, relative to its size.
const GLYPH_NUDGE: f32 = 0.05;

const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const IDLE_BACKGROUND: Rgb<u8> = Rgb([24, 24, 24]);

/// Canvas size in CSS pixels plus the device pixel ratio of its buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasSize {
    pub css_width: u32,
    pub css_height: u32,
    pub pixel_ratio: f32,
}

impl CanvasSize {
    pub fn new(css_width: u32, css_height: u32, pixel_ratio: f32) -> Self {
        let pixel_ratio = if pixel_ratio.is_finite() && pixel_ratio > 0.0 {
            pixel_ratio
        } else {
            1.0
        };
        Self {
            css_width: css_width.max(1),
            css_height: css_height.max(1),
            pixel_ratio,
        }
    }

    /// Backing buffer size: CSS size × pixel ratio, at least 1×1.
    pub fn buffer_size(&self) -> (u32, u32) {
        let scale = |css: u32| ((css as f32 * self.pixel_ratio).round() as u32).max(1);
        (scale(self.css_width), scale(self.css_height))
    }
}

/// Axis-aligned rectangle in canvas CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// How the frame is fitted into the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    /// Preserve aspect ratio, centre, letterbox the rest.
    Contain,
    /// Fill the whole canvas.
    Stretch,
}

impl Fit {
    /// Where a frame with the given aspect ratio lands on a `width × height` canvas.
    pub fn place(self, width: f32, height: f32, aspect: f32) -> Rect {
        match self {
            Fit::Stretch => Rect { x: 0.0, y: 0.0, width, height },
            Fit::Contain => {
                let mut w = width;
                let mut h = w / aspect;
                if h > height {
                    h = height;
                    w = h * aspect;
                }
                Rect {
                    x: (width - w) / 2.0,
                    y: (height - h) / 2.0,
                    width: w,
                    height: h,
                }
            }
        }
    }
}

/// Centre and side length of the glyph on the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphPlacement {
    pub cx: f32,
    pub cy: f32,
    pub size: f32,
}

impl GlyphPlacement {
    pub fn centred(width: f32, height: f32) -> Self {
        let size = width.min(height) * GLYPH_SCALE;
        Self {
            cx: width / 2.0,
            cy: height / 2.0 + size * GLYPH_NUDGE,
            size,
        }
    }
}

/// Where and how often the canvas is written to disk.
#[derive(Debug, Clone)]
pub struct Snapshots {
    pub dir: PathBuf,
    pub every: u64,
}

pub struct CanvasSurface {
    fit: Fit,
    size: CanvasSize,
    buffer: RgbImage,
    snapshots: Option<Snapshots>,
    presented: u64,
    label: ExpressionLabel,
}

impl CanvasSurface {
    pub fn new(fit: Fit, size: CanvasSize, snapshots: Option<Snapshots>) -> Self {
        let (w, h) = size.buffer_size();
        tracing::info!(
            ?fit,
            css_width = size.css_width,
            css_height = size.css_height,
            buffer_width = w,
            buffer_height = h,
            "canvas ready"
        );
        Self {
            fit,
            size,
            buffer: RgbImage::from_pixel(w, h, BACKGROUND),
            snapshots,
            presented: 0,
            label: ExpressionLabel::Neutral,
        }
    }

    pub fn buffer(&self) -> &RgbImage {
        &self.buffer
    }

    fn fill(&mut self, color: Rgb<u8>) {
        for pixel in self.buffer.pixels_mut() {
            *pixel = color;
        }
    }

    fn draw_frame(&mut self, frame: &Frame) {
        self.fill(BACKGROUND);
        if frame.width == 0 || frame.height == 0 {
            return;
        }
        let Some(gray) = ImageBuffer::<Luma<u8>, &[u8]>::from_raw(
            frame.width,
            frame.height,
            frame.data.as_slice(),
        ) else {
            tracing::warn!(
                width = frame.width,
                height = frame.height,
                len = frame.data.len(),
                "frame buffer too short"
            );
            return;
        };

        let ratio = self.size.pixel_ratio;
        let rect = self.fit.place(
            self.size.css_width as f32,
            self.size.css_height as f32,
            frame.aspect_ratio(),
        );
        let (bw, bh) = self.buffer.dimensions();
        let w = ((rect.width * ratio).round() as u32).clamp(1, bw);
        let h = ((rect.height * ratio).round() as u32).clamp(1, bh);

        let scaled = imageops::resize(&gray, w, h, FilterType::Triangle);
        let rgb = DynamicImage::ImageLuma8(scaled).into_rgb8();
        imageops::replace(
            &mut self.buffer,
            &rgb,
            (rect.x * ratio).round() as i64,
            (rect.y * ratio).round() as i64,
        );
    }

    fn draw_glyph(&mut self, glyph: Glyph) {
        let ratio = self.size.pixel_ratio;
        let place = GlyphPlacement::centred(self.size.css_width as f32, self.size.css_height as f32);
        let radius = place.size * ratio / 2.0;
        if radius < 1.0 {
            return;
        }
        let pen = Pen {
            cx: place.cx * ratio,
            cy: place.cy * ratio,
            radius,
        };
        GlyphStyle::of(glyph).draw(&mut self.buffer, pen);
    }

    fn snapshot(&self) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        if snapshots.every == 0 || self.presented % snapshots.every != 0 {
            return;
        }
        let path = snapshots
            .dir
            .join(format!("{:06}-{}.png", self.presented, self.label));
        match self.buffer.save(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "snapshot written"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "snapshot failed"),
        }
    }
}

impl Surface<Frame> for CanvasSurface {
    fn present(&mut self, frame: &Frame, glyph: Glyph) {
        self.draw_frame(frame);
        self.draw_glyph(glyph);
        self.presented += 1;
        self.snapshot();
    }

    fn inspect(&mut self, report: &TickReport) {
        self.label = report.label;
    }

    fn idle(&mut self) {
        self.fill(IDLE_BACKGROUND);
    }
}

/// Maps unit-circle glyph coordinates onto buffer pixels.
#[derive(Debug, Clone, Copy)]
struct Pen {
    cx: f32,
    cy: f32,
    radius: f32,
}

impl Pen {
    fn at(&self, u: f32, v: f32) -> (i32, i32) {
        (
            (self.cx + u * self.radius).round() as i32,
            (self.cy + v * self.radius).round() as i32,
        )
    }

    fn len(&self, k: f32) -> i32 {
        ((k * self.radius).round() as i32).max(1)
    }

    fn rect(&self, u: f32, v: f32, w: f32, h: f32) -> PixelRect {
        let (x, y) = self.at(u, v);
        PixelRect::at(x, y).of_size(self.len(w) as u32, self.len(h) as u32)
    }
}

/// Mouth shape drawn for each expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mouth {
    Flat,
    Smile,
    Open,
    Frown,
    Tongue,
}

/// Flat-colour face drawn in place of the emoji font glyph.
#[derive(Debug, Clone, Copy)]
struct GlyphStyle {
    face: Rgb<u8>,
    mouth: Mouth,
    wink: bool,
}

const INK: Rgb<u8> = Rgb([60, 40, 20]);
const TONGUE: Rgb<u8> = Rgb([220, 70, 90]);

impl GlyphStyle {
    fn of(glyph: Glyph) -> Self {
        let yellow = Rgb([255, 204, 77]);
        match glyph {
            Glyph::SMILE => Self { face: yellow, mouth: Mouth::Smile, wink: false },
            Glyph::SURPRISE => Self { face: yellow, mouth: Mouth::Open, wink: false },
            Glyph::FROWN => Self { face: Rgb([230, 80, 50]), mouth: Mouth::Frown, wink: false },
            Glyph::CHEEKY => Self { face: yellow, mouth: Mouth::Tongue, wink: true },
            _ => Self { face: yellow, mouth: Mouth::Flat, wink: false },
        }
    }

    fn draw(&self, img: &mut RgbImage, pen: Pen) {
        draw_filled_circle_mut(img, pen.at(0.0, 0.0), pen.len(1.0), INK);
        draw_filled_circle_mut(img, pen.at(0.0, 0.0), pen.len(0.92), self.face);

        // eyes
        draw_filled_circle_mut(img, pen.at(0.35, -0.3), pen.len(0.12), INK);
        if self.wink {
            draw_filled_rect_mut(img, pen.rect(-0.5, -0.35, 0.3, 0.1), INK);
        } else {
            draw_filled_circle_mut(img, pen.at(-0.35, -0.3), pen.len(0.12), INK);
        }

        match self.mouth {
            Mouth::Flat => draw_filled_rect_mut(img, pen.rect(-0.4, 0.34, 0.8, 0.12), INK),
            Mouth::Open => {
                draw_filled_ellipse_mut(img, pen.at(0.0, 0.45), pen.len(0.18), pen.len(0.22), INK)
            }
            Mouth::Smile => self.crescent(img, pen, 0.35, -0.1),
            Mouth::Frown => self.crescent(img, pen, 0.55, 0.1),
            Mouth::Tongue => {
                self.crescent(img, pen, 0.35, -0.1);
                draw_filled_circle_mut(img, pen.at(0.15, 0.62), pen.len(0.16), TONGUE);
            }
        }
    }

    /// Ink ellipse at `v` with a face-coloured one `shift` away cut out of it:
    /// a negative shift leaves the lower rim (smile), a positive one the upper.
    fn crescent(&self, img: &mut RgbImage, pen: Pen, v: f32, shift: f32) {
        let (rx, ry) = (pen.len(0.45), pen.len(0.22));
        draw_filled_ellipse_mut(img, pen.at(0.0, v), rx, ry, INK);
        draw_filled_ellipse_mut(img, pen.at(0.0, v + shift), rx, ry, self.face);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn frame(width: u32, height: u32, value: u8) -> Frame {
        Frame {
            data: vec![value; (width * height) as usize],
            width,
            height,
            timestamp: Instant::now(),
            sequence: 0,
            is_dark: false,
        }
    }

    #[test]
    fn test_buffer_size_scales_with_pixel_ratio() {
        assert_eq!(CanvasSize::new(1280, 720, 1.0).buffer_size(), (1280, 720));
        assert_eq!(CanvasSize::new(1280, 720, 1.5).buffer_size(), (1920, 1080));
        assert_eq!(CanvasSize::new(101, 51, 1.25).buffer_size(), (126, 64));
    }

    #[test]
    fn test_buffer_size_is_at_least_one_pixel() {
        assert_eq!(CanvasSize::new(0, 0, 1.0).buffer_size(), (1, 1));
        assert_eq!(CanvasSize::new(1, 1, 0.1).buffer_size(), (1, 1));
        assert_eq!(CanvasSize::new(10, 10, f32::NAN).pixel_ratio, 1.0);
    }

    fn assert_rect(actual: Rect, expected: [f32; 4]) {
        let got = [actual.x, actual.y, actual.width, actual.height];
        for (g, e) in got.iter().zip(expected) {
            assert!((g - e).abs() < 1e-2, "{actual:?} vs {expected:?}");
        }
    }

    #[test]
    fn test_contain_letterboxes_wide_frame() {
        let rect = Fit::Contain.place(800.0, 800.0, 16.0 / 9.0);
        assert_rect(rect, [0.0, 175.0, 800.0, 450.0]);
    }

    #[test]
    fn test_contain_pillarboxes_tall_frame() {
        let rect = Fit::Contain.place(1280.0, 720.0, 4.0 / 3.0);
        assert_rect(rect, [160.0, 0.0, 960.0, 720.0]);
    }

    #[test]
    fn test_stretch_fills_canvas() {
        let rect = Fit::Stretch.place(1280.0, 720.0, 4.0 / 3.0);
        assert_eq!(rect, Rect { x: 0.0, y: 0.0, width: 1280.0, height: 720.0 });
    }

    #[test]
    fn test_glyph_placement() {
        let place = GlyphPlacement::centred(1000.0, 600.0);
        assert!((place.size - 180.0).abs() < 1e-3);
        assert_eq!(place.cx, 500.0);
        assert!((place.cy - 309.0).abs() < 1e-3);
    }

    #[test]
    fn test_present_letterboxes_and_draws_glyph() {
        let mut canvas = CanvasSurface::new(Fit::Contain, CanvasSize::new(200, 200, 1.0), None);
        canvas.present(&frame(160, 90, 200), Glyph::SMILE);

        let buf = canvas.buffer();
        assert_eq!(buf.dimensions(), (200, 200));
        // letterbox bars above and below the 200×112.5 picture
        assert_eq!(*buf.get_pixel(5, 5), BACKGROUND);
        assert_eq!(*buf.get_pixel(5, 195), BACKGROUND);
        assert_eq!(*buf.get_pixel(5, 100), Rgb([200, 200, 200]));
        // glyph centre (100, 103), radius 30: cheek area is face-coloured
        assert_eq!(*buf.get_pixel(85, 100), Rgb([255, 204, 77]));
    }

    #[test]
    fn test_stretch_covers_whole_canvas() {
        let mut canvas = CanvasSurface::new(Fit::Stretch, CanvasSize::new(64, 64, 2.0), None);
        canvas.present(&frame(16, 9, 90), Glyph::NEUTRAL);
        let buf = canvas.buffer();
        assert_eq!(buf.dimensions(), (128, 128));
        assert_eq!(*buf.get_pixel(0, 0), Rgb([90, 90, 90]));
        assert_eq!(*buf.get_pixel(127, 127), Rgb([90, 90, 90]));
    }

    #[test]
    fn test_zero_sized_frame_uses_default_aspect() {
        let mut canvas = CanvasSurface::new(Fit::Contain, CanvasSize::new(160, 160, 1.0), None);
        canvas.present(&frame(0, 0, 0), Glyph::NEUTRAL);
        // 16:9 picture of height 90 centred vertically; outside it stays background
        assert_eq!(*canvas.buffer().get_pixel(2, 2), BACKGROUND);
    }

    /// Glyph of radius 100 centred on a 200×200 black image.
    fn glyph_image(glyph: Glyph) -> RgbImage {
        let mut img = RgbImage::from_pixel(200, 200, BACKGROUND);
        let pen = Pen { cx: 100.0, cy: 100.0, radius: 100.0 };
        GlyphStyle::of(glyph).draw(&mut img, pen);
        img
    }

    #[test]
    fn test_frown_face_is_red() {
        let img = glyph_image(Glyph::FROWN);
        assert_eq!(*img.get_pixel(40, 110), Rgb([230, 80, 50]));
        assert_eq!(*img.get_pixel(100, 197), INK);
        assert_eq!(*img.get_pixel(2, 2), BACKGROUND);
        // upper rim of the frown
        assert_eq!(*img.get_pixel(100, 140), INK);
        assert_eq!(*img.get_pixel(100, 170), Rgb([230, 80, 50]));
    }

    #[test]
    fn test_smile_mouth_keeps_lower_rim() {
        let img = glyph_image(Glyph::SMILE);
        assert_eq!(*img.get_pixel(100, 155), INK);
        assert_eq!(*img.get_pixel(100, 125), Rgb([255, 204, 77]));
    }

    #[test]
    fn test_cheeky_winks() {
        let cheeky = glyph_image(Glyph::CHEEKY);
        let smile = glyph_image(Glyph::SMILE);
        // a little above the left-eye centre: ink on a plain smile, face when winking
        assert_eq!(*smile.get_pixel(65, 62), INK);
        assert_eq!(*cheeky.get_pixel(65, 62), Rgb([255, 204, 77]));
        assert_eq!(*cheeky.get_pixel(60, 68), INK);
        assert_eq!(*cheeky.get_pixel(115, 170), TONGUE);
    }

    #[test]
    fn test_short_frame_buffer_leaves_background() {
        let mut canvas = CanvasSurface::new(Fit::Stretch, CanvasSize::new(40, 40, 1.0), None);
        let mut short = frame(16, 9, 200);
        short.data.truncate(10);
        canvas.present(&short, Glyph::NEUTRAL);
        assert_eq!(*canvas.buffer().get_pixel(0, 0), BACKGROUND);
    }

    #[test]
    fn test_snapshots_written_every_n_frames() {
        let dir = std::env::temp_dir().join(format!("mimic-canvas-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let snapshots = Snapshots { dir: dir.clone(), every: 2 };
        let mut canvas = CanvasSurface::new(Fit::Contain, CanvasSize::new(32, 18, 1.0), Some(snapshots));

        let report = TickReport {
            timestamp_ms: 0,
            face_detected: true,
            label: ExpressionLabel::Surprise,
            glyph: Glyph::SURPRISE,
            scores: Default::default(),
        };
        for _ in 0..4 {
            canvas.inspect(&report);
            canvas.present(&frame(32, 18, 10), Glyph::SURPRISE);
        }

        assert!(!dir.join("000001-surprise.png").exists());
        assert!(dir.join("000002-surprise.png").exists());
        assert!(dir.join("000004-surprise.png").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_idle_clears_to_placeholder() {
        let mut canvas = CanvasSurface::new(Fit::Contain, CanvasSize::new(8, 8, 1.0), None);
        canvas.idle();
        assert!(canvas.buffer().pixels().all(|p| *p == IDLE_BACKGROUND));
    }
}
