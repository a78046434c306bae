//! Per-camera and per-controller calibration data.
//!
//! Calibration is loaded once at startup and shared read-only with the
//! tracking loops. Every part is optional: a camera without a colour table
//! cannot detect blobs, one without intrinsics or extrinsics cannot be used for
//! triangulation, and the rest of the pipeline keeps running.

pub mod storage;

use std::collections::HashMap;

use image::RgbImage;
use nalgebra::{Matrix3x4, Matrix4};

use crate::geometry::Intrinsics;
use crate::tracking::contours::{bounding_rect, find_contours};
use crate::tracking::image_ops::{mask_bright_blobs, rgb_to_hsv};
use crate::tracking::tracked_object::HsvColorRange;

pub use storage::{CalibrationError, CalibrationStore};

/// Camera pose relative to the calibration pattern and to the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrinsics {
    /// `[R | t]` used to build the projection matrix.
    pub t: Matrix3x4<f64>,
    /// Maps camera-0 triangulated points into the world frame (cm).
    pub world: Matrix4<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct CameraCalibration {
    pub camera_id: usize,
    pub colors: HashMap<String, HsvColorRange>,
    pub intrinsics: Option<Intrinsics>,
    pub extrinsics: Option<Extrinsics>,
}

impl CameraCalibration {
    pub fn new(camera_id: usize) -> Self {
        Self {
            camera_id,
            ..Default::default()
        }
    }

    pub fn has_color(&self) -> bool {
        !self.colors.is_empty()
    }

    pub fn has_intrinsic(&self) -> bool {
        self.intrinsics.is_some()
    }

    pub fn has_extrinsic(&self) -> bool {
        self.extrinsics.is_some()
    }

    pub fn color_range(&self, name: &str) -> Option<HsvColorRange> {
        self.colors.get(name).copied()
    }

    /// `P = K * [R | t]`, available once both halves are calibrated.
    pub fn projection(&self) -> Option<Matrix3x4<f64>> {
        let intrinsics = self.intrinsics.as_ref()?;
        let extrinsics = self.extrinsics.as_ref()?;
        Some(intrinsics.k * extrinsics.t)
    }
}

/// Half-widths of the HSV window sampled around a lit sphere.
pub const COLOR_SAMPLE_MARGIN: [i32; 3] = [30, 40, 45];

/// Sample the colour of the largest bright blob in a dark-exposure frame.
///
/// The mean HSV value of a square half the blob's width, centred on it, is
/// widened by [`COLOR_SAMPLE_MARGIN`] into a detection range.
pub fn sample_color_range(frame: &RgbImage, brightness_threshold: u8) -> Option<HsvColorRange> {
    let bright = mask_bright_blobs(frame, brightness_threshold, 2);
    let blob = find_contours(&bright.mask)
        .iter()
        .map(bounding_rect)
        .max_by_key(|r| r.area())?;

    let side = (blob.width / 2).max(1);
    let half = side / 2;
    let (cx, cy) = (blob.x + blob.width / 2, blob.y + blob.height / 2);

    let mut sum = [0u64; 3];
    let mut count = 0u64;
    for y in (cy - half)..(cy - half + side) {
        for x in (cx - half)..(cx - half + side) {
            if x < 0 || y < 0 || x >= frame.width() as i32 || y >= frame.height() as i32 {
                continue;
            }
            let hsv = rgb_to_hsv(frame.get_pixel(x as u32, y as u32).0);
            for c in 0..3 {
                sum[c] += hsv[c] as u64;
            }
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }

    let mean = sum.map(|s| (s as f64 / count as f64).round() as i32);
    let bound = |c: usize, sign: i32| (mean[c] + sign * COLOR_SAMPLE_MARGIN[c]).clamp(0, 255) as u8;
    Some(HsvColorRange::new(
        [bound(0, -1), bound(1, -1), bound(2, -1)],
        [bound(0, 1), bound(1, 1), bound(2, 1)],
    ))
}
