//! Image geometry shared by the models: letterbox fitting, square face
//! regions, bilinear resampling, and tensor packing.

use ndarray::Array4;

/// Letterbox placement of a source image inside a square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub scaled_width: usize,
    pub scaled_height: usize,
}

impl Letterbox {
    /// Fit `width × height` inside `target × target`, preserving aspect ratio.
    pub fn fit(width: usize, height: usize, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let scaled_width = ((width as f32 * scale).round() as usize).min(target);
        let scaled_height = ((height as f32 * scale).round() as usize).min(target);
        Self {
            scale,
            pad_x: (target - scaled_width) as f32 / 2.0,
            pad_y: (target - scaled_height) as f32 / 2.0,
            scaled_width,
            scaled_height,
        }
    }

    /// Map a point in model-input space back to source image space.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Square region of the source image fed to the landmark model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRegion {
    /// Top-left corner in source pixels (may lie outside the image).
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

impl CropRegion {
    /// Square of side `max(w, h) * expand` centred on the given box.
    pub fn around(x: f32, y: f32, w: f32, h: f32, expand: f32) -> Self {
        let size = w.max(h) * expand;
        let cx = x + w / 2.0;
        let cy = y + h / 2.0;
        Self {
            x: cx - size / 2.0,
            y: cy - size / 2.0,
            size,
        }
    }

    /// Square enclosing the given points, expanded by `expand`.
    pub fn enclosing(points: &[(f32, f32)], expand: f32) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let (mut min_x, mut min_y) = *first;
        let (mut max_x, mut max_y) = *first;
        for &(px, py) in rest {
            min_x = min_x.min(px);
            min_y = min_y.min(py);
            max_x = max_x.max(px);
            max_y = max_y.max(py);
        }
        let region = Self::around(min_x, min_y, max_x - min_x, max_y - min_y, expand);
        (region.size > 1.0).then_some(region)
    }

    /// Map a point in `out_size × out_size` crop space back to source space.
    pub fn to_source(&self, x: f32, y: f32, out_size: usize) -> (f32, f32) {
        let k = self.size / out_size as f32;
        (self.x + x * k, self.y + y * k)
    }
}

/// Bilinear sample at fractional source coordinates, clamped to the edges.
fn sample_bilinear(src: &[u8], width: usize, height: usize, sx: f32, sy: f32) -> f32 {
    let x0f = sx.floor();
    let y0f = sy.floor();
    let fx = sx - x0f;
    let fy = sy - y0f;

    let clamp_x = |v: f32| (v as i64).clamp(0, width as i64 - 1) as usize;
    let clamp_y = |v: f32| (v as i64).clamp(0, height as i64 - 1) as usize;
    let (x0, x1) = (clamp_x(x0f), clamp_x(x0f + 1.0));
    let (y0, y1) = (clamp_y(y0f), clamp_y(y0f + 1.0));

    let tl = src[y0 * width + x0] as f32;
    let tr = src[y0 * width + x1] as f32;
    let bl = src[y1 * width + x0] as f32;
    let br = src[y1 * width + x1] as f32;

    tl * (1.0 - fx) * (1.0 - fy) + tr * fx * (1.0 - fy) + bl * (1.0 - fx) * fy + br * fx * fy
}

/// Resize a grayscale image with bilinear interpolation (pixel-centre aligned).
pub fn resize_bilinear(
    src: &[u8],
    width: usize,
    height: usize,
    out_width: usize,
    out_height: usize,
) -> Vec<u8> {
    let mut out = vec![0u8; out_width * out_height];
    if width == 0 || height == 0 || src.len() < width * height {
        return out;
    }
    let kx = width as f32 / out_width as f32;
    let ky = height as f32 / out_height as f32;

    for y in 0..out_height {
        let sy = (y as f32 + 0.5) * ky - 0.5;
        for x in 0..out_width {
            let sx = (x as f32 + 0.5) * kx - 0.5;
            let val = sample_bilinear(src, width, height, sx, sy);
            out[y * out_width + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Cut `region` out of the source and resample it to `out_size × out_size`.
/// Parts of the region outside the image read as black.
pub fn crop_resize(
    src: &[u8],
    width: usize,
    height: usize,
    region: &CropRegion,
    out_size: usize,
) -> Vec<u8> {
    let mut out = vec![0u8; out_size * out_size];
    if width == 0 || height == 0 || src.len() < width * height {
        return out;
    }
    let k = region.size / out_size as f32;

    for y in 0..out_size {
        let sy = region.y + (y as f32 + 0.5) * k - 0.5;
        for x in 0..out_size {
            let sx = region.x + (x as f32 + 0.5) * k - 0.5;
            if sx < -0.5 || sy < -0.5 || sx > width as f32 - 0.5 || sy > height as f32 - 0.5 {
                continue;
            }
            let val = sample_bilinear(src, width, height, sx, sy);
            out[y * out_size + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Memory layout expected by a model's image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    Nchw,
    Nhwc,
}

/// Pack a grayscale square image into a 3-channel float tensor,
/// `(pixel - mean) / std`, replicating Y into R, G and B.
pub fn gray_to_tensor(
    pixels: &[u8],
    size: usize,
    mean: f32,
    std: f32,
    layout: TensorLayout,
) -> Array4<f32> {
    let mut tensor = match layout {
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, size, size)),
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, size, size, 3)),
    };

    for y in 0..size {
        for x in 0..size {
            let pixel = pixels.get(y * size + x).copied().unwrap_or(0) as f32;
            let normalized = (pixel - mean) / std;
            for c in 0..3 {
                match layout {
                    TensorLayout::Nchw => tensor[[0, c, y, x]] = normalized,
                    TensorLayout::Nhwc => tensor[[0, y, x, c]] = normalized,
                }
            }
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_wide_frame() {
        let lb = Letterbox::fit(640, 360, 640);
        assert_eq!(lb.scale, 1.0);
        assert_eq!((lb.scaled_width, lb.scaled_height), (640, 360));
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 140.0);
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let lb = Letterbox::fit(320, 240, 640);
        let (ox, oy) = (100.0f32, 50.0f32);
        let (lx, ly) = (ox * lb.scale + lb.pad_x, oy * lb.scale + lb.pad_y);
        let (rx, ry) = lb.to_source(lx, ly);
        assert!((rx - ox).abs() < 0.1, "x: {rx} vs {ox}");
        assert!((ry - oy).abs() < 0.1, "y: {ry} vs {oy}");
    }

    #[test]
    fn test_region_around_is_square_and_centred() {
        let r = CropRegion::around(100.0, 50.0, 40.0, 80.0, 1.5);
        assert_eq!(r.size, 120.0);
        assert_eq!(r.x + r.size / 2.0, 120.0);
        assert_eq!(r.y + r.size / 2.0, 90.0);
    }

    #[test]
    fn test_region_enclosing_points() {
        let r = CropRegion::enclosing(&[(10.0, 10.0), (30.0, 20.0), (20.0, 50.0)], 1.0).unwrap();
        assert_eq!(r.size, 40.0);
        assert_eq!((r.x, r.y), (0.0, 10.0));
        assert!(CropRegion::enclosing(&[], 1.5).is_none());
        assert!(CropRegion::enclosing(&[(5.0, 5.0)], 1.5).is_none());
    }

    #[test]
    fn test_region_to_source() {
        let r = CropRegion { x: 10.0, y: 20.0, size: 128.0 };
        assert_eq!(r.to_source(0.0, 0.0, 256), (10.0, 20.0));
        assert_eq!(r.to_source(256.0, 128.0, 256), (138.0, 84.0));
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let src = vec![128u8; 100 * 100];
        let out = resize_bilinear(&src, 100, 100, 200, 150);
        assert_eq!(out.len(), 200 * 150);
        assert!(out.iter().all(|&p| p == 128));
    }

    #[test]
    fn test_crop_outside_image_is_black() {
        let src = vec![200u8; 10 * 10];
        let region = CropRegion { x: -10.0, y: 0.0, size: 20.0 };
        let out = crop_resize(&src, 10, 10, &region, 4);
        // left half of the crop lies left of the image
        assert_eq!(out[0], 0);
        assert_eq!(out[3], 200);
    }

    #[test]
    fn test_crop_identity_region() {
        let src: Vec<u8> = (0..16).map(|v| v * 10).collect();
        let region = CropRegion { x: 0.0, y: 0.0, size: 4.0 };
        assert_eq!(crop_resize(&src, 4, 4, &region, 4), src);
    }

    #[test]
    fn test_gray_to_tensor_layouts() {
        let pixels = vec![255u8, 0, 0, 0];
        let nchw = gray_to_tensor(&pixels, 2, 0.0, 255.0, TensorLayout::Nchw);
        assert_eq!(nchw.shape(), &[1, 3, 2, 2]);
        assert_eq!(nchw[[0, 2, 0, 0]], 1.0);

        let nhwc = gray_to_tensor(&pixels, 2, 0.0, 255.0, TensorLayout::Nhwc);
        assert_eq!(nhwc.shape(), &[1, 2, 2, 3]);
        assert_eq!(nhwc[[0, 0, 0, 1]], 1.0);
        assert_eq!(nhwc[[0, 1, 1, 0]], 0.0);
    }
}
