//! Pixel-level operations used by the blob detector.
//!
//! Frames are `image::RgbImage`. Morphology uses a 3x3 rectangular element and
//! ignores pixels outside the image. HSV follows the 8-bit convention where hue
//! is halved into `0..180`.

use image::{GrayImage, Luma, Rgb, RgbImage};

use super::roi::Roi;

/// HSV image stored in an RGB buffer: channel 0 is H (0..180), 1 is S, 2 is V.
pub type HsvImage = RgbImage;

/// BT.601 luma with 14-bit fixed point weights.
pub fn to_gray(frame: &RgbImage) -> GrayImage {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;

    let (w, h) = frame.dimensions();
    let data = frame
        .as_raw()
        .chunks_exact(3)
        .map(|px| ((px[0] as u32 * R + px[1] as u32 * G + px[2] as u32 * B + (1 << 13)) >> 14) as u8)
        .collect();
    GrayImage::from_raw(w, h, data).unwrap_or_else(|| GrayImage::new(w, h))
}

#[derive(Clone, Copy)]
enum MorphOp {
    Erode,
    Dilate,
}

impl MorphOp {
    fn combine(self, a: u8, b: u8) -> u8 {
        match self {
            MorphOp::Erode => a.min(b),
            MorphOp::Dilate => a.max(b),
        }
    }
}

/// One 3x3 pass, done separably (rows then columns).
fn morph_once(src: &GrayImage, op: MorphOp) -> GrayImage {
    let (w, h) = (src.width() as usize, src.height() as usize);
    if w == 0 || h == 0 {
        return src.clone();
    }
    let data = src.as_raw();

    let mut rows = vec![0u8; w * h];
    for y in 0..h {
        let line = &data[y * w..(y + 1) * w];
        for x in 0..w {
            let mut v = line[x];
            if x > 0 {
                v = op.combine(v, line[x - 1]);
            }
            if x + 1 < w {
                v = op.combine(v, line[x + 1]);
            }
            rows[y * w + x] = v;
        }
    }

    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut v = rows[y * w + x];
            if y > 0 {
                v = op.combine(v, rows[(y - 1) * w + x]);
            }
            if y + 1 < h {
                v = op.combine(v, rows[(y + 1) * w + x]);
            }
            out[y * w + x] = v;
        }
    }

    GrayImage::from_raw(w as u32, h as u32, out).unwrap_or_else(|| src.clone())
}

pub fn erode(src: &GrayImage, iterations: u32) -> GrayImage {
    (0..iterations).fold(src.clone(), |img, _| morph_once(&img, MorphOp::Erode))
}

pub fn dilate(src: &GrayImage, iterations: u32) -> GrayImage {
    (0..iterations).fold(src.clone(), |img, _| morph_once(&img, MorphOp::Dilate))
}

/// Binary threshold: `255` where the value is strictly above `thresh`.
pub fn threshold(src: &GrayImage, thresh: u8) -> GrayImage {
    let mut dst = src.clone();
    for px in dst.iter_mut() {
        *px = if *px > thresh { 255 } else { 0 };
    }
    dst
}

/// Result of brightness masking: the mask and the frame with dark pixels zeroed.
pub struct BrightMask {
    pub mask: GrayImage,
    pub masked: RgbImage,
}

/// Suppress noise with an opening, keep pixels brighter than `thresh`, and
/// zero everything else in a copy of the frame.
pub fn mask_bright_blobs(frame: &RgbImage, thresh: u8, morph_iterations: u32) -> BrightMask {
    let gray = to_gray(frame);
    let opened = dilate(&erode(&gray, morph_iterations), morph_iterations);
    let mask = threshold(&opened, thresh);

    let mut masked = frame.clone();
    for (px, m) in masked.pixels_mut().zip(mask.pixels()) {
        if m[0] == 0 {
            *px = Rgb([0, 0, 0]);
        }
    }
    BrightMask { mask, masked }
}

/// 8-bit RGB to HSV for a single pixel.
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(|c| c as f32);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = v - min;

    let s = if v > 0.0 { delta * 255.0 / v } else { 0.0 };
    let mut h = if delta <= 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / delta
    } else if v == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    [
        ((h / 2.0).round() as u32 % 180) as u8,
        s.round().min(255.0) as u8,
        v as u8,
    ]
}

pub fn to_hsv(frame: &RgbImage) -> HsvImage {
    let mut out = frame.clone();
    for px in out.pixels_mut() {
        px.0 = rgb_to_hsv(px.0);
    }
    out
}

/// Inclusive per-channel range test over `roi`, producing a binary image the
/// size of the ROI. An empty or out-of-frame ROI yields an empty image.
pub fn in_range(hsv: &HsvImage, roi: &Roi, lower: [u8; 3], upper: [u8; 3]) -> GrayImage {
    let mut clamped = *roi;
    clamped.clamp_to(hsv.width(), hsv.height());
    if clamped != *roi || roi.is_empty() {
        return GrayImage::new(0, 0);
    }

    GrayImage::from_fn(roi.width as u32, roi.height as u32, |x, y| {
        let px = hsv.get_pixel(x + roi.x as u32, y + roi.y as u32).0;
        let inside = (0..3).all(|c| px[c] >= lower[c] && px[c] <= upper[c]);
        Luma([if inside { 255 } else { 0 }])
    })
}

pub fn any_foreground(mask: &GrayImage) -> bool {
    mask.as_raw().iter().any(|&v| v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gray_weights() {
        let img = RgbImage::from_pixel(1, 1, Rgb([255, 0, 255]));
        assert_eq!(to_gray(&img).get_pixel(0, 0)[0], 105);
        let white = RgbImage::from_pixel(1, 1, Rgb([255, 255, 255]));
        assert_eq!(to_gray(&white).get_pixel(0, 0)[0], 255);
    }

    #[test]
    fn test_opening_removes_specks() {
        let mut img = GrayImage::new(20, 20);
        img.put_pixel(3, 3, Luma([255]));
        for y in 8..16 {
            for x in 8..16 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        let opened = dilate(&erode(&img, 2), 2);
        assert_eq!(opened.get_pixel(3, 3)[0], 0);
        assert_eq!(opened.get_pixel(8, 8)[0], 255);
        assert_eq!(opened.get_pixel(15, 15)[0], 255);
        assert_eq!(opened.get_pixel(16, 16)[0], 0);
    }

    #[test]
    fn test_erode_ignores_border() {
        let img = GrayImage::from_pixel(4, 4, Luma([200]));
        assert!(erode(&img, 2).pixels().all(|p| p[0] == 200));
    }

    #[test]
    fn test_hsv_primaries() {
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
        assert_eq!(rgb_to_hsv([255, 0, 255]), [150, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
        assert_eq!(rgb_to_hsv([128, 128, 128]), [0, 0, 128]);
    }

    #[test]
    fn test_mask_zeroes_dark_pixels() {
        let mut frame = RgbImage::from_pixel(16, 16, Rgb([10, 10, 10]));
        for y in 4..12 {
            for x in 4..12 {
                frame.put_pixel(x, y, Rgb([0, 255, 255]));
            }
        }
        let out = mask_bright_blobs(&frame, 30, 2);
        assert_eq!(out.masked.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(out.masked.get_pixel(7, 7).0, [0, 255, 255]);
        assert_eq!(out.mask.get_pixel(7, 7)[0], 255);
    }

    #[test]
    fn test_in_range_respects_roi() {
        let mut hsv = HsvImage::new(10, 10);
        hsv.put_pixel(6, 6, Rgb([150, 255, 255]));
        let roi = Roi::new(5, 5, 3, 3);
        let out = in_range(&hsv, &roi, [140, 100, 100], [160, 255, 255]);
        assert_eq!(out.dimensions(), (3, 3));
        assert_eq!(out.get_pixel(1, 1)[0], 255);
        assert_eq!(out.get_pixel(0, 0)[0], 0);
    }
}
