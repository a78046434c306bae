//! Coloured blob detection with per-camera ROI tracking.
//!
//! Per frame:
//! 1. Grayscale, open (erode + dilate) and threshold into a brightness mask
//! 2. Zero dark pixels and convert to HSV
//! 3. For each tracked object: range-filter its ROI, trace contours, drop tiny
//!    or non-round ones, fit a circle to the largest survivor
//! 4. Move the ROI onto the detection
//!
//! Failing to find a blob only clears `acquired_tracking`; widening the ROI is
//! left to the caller via [`BlobDetector::widen_search`].

use image::{GrayImage, RgbImage};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::contours::{bounding_rect, contour_area, find_contours, min_enclosing_circle};
use super::image_ops::{HsvImage, any_foreground, in_range, mask_bright_blobs, to_hsv};
use super::roi::Roi;
use super::tracked_object::{PerCameraData, TrackedObject};

/// Blob detector tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Side of the square search window placed on a detection (px).
    pub roi_size: i32,
    /// Growth per lost cycle (px, split evenly between both sides).
    pub roi_growth: i32,
    /// Gray level a pixel must exceed to count as lit.
    pub brightness_threshold: u8,
    /// Erode and dilate iterations of the 3x3 opening.
    pub morph_iterations: u32,
    /// Contours with a smaller polygon area (px^2) are ignored.
    pub min_contour_area: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            roi_size: 240,
            roi_growth: 100,
            brightness_threshold: 30,
            morph_iterations: 2,
            min_contour_area: 8.0,
        }
    }
}

/// Frame data shared by every object searched in the same frame.
pub struct PreparedFrame {
    pub hsv: HsvImage,
    pub mask: GrayImage,
    pub has_bright_pixels: bool,
}

impl PreparedFrame {
    pub fn cols(&self) -> u32 {
        self.hsv.width()
    }

    pub fn rows(&self) -> u32 {
        self.hsv.height()
    }
}

/// A circle fitted to a blob, in ROI-local and frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlobDetection {
    pub local_center: Point2<f32>,
    pub radius: f32,
    pub local_bounds: Roi,
}

#[derive(Debug, Clone, Default)]
pub struct BlobDetector {
    config: DetectorConfig,
}

impl BlobDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn prepare_frame(&self, frame: &RgbImage) -> PreparedFrame {
        let bright = mask_bright_blobs(frame, self.config.brightness_threshold, self.config.morph_iterations);
        let has_bright_pixels = any_foreground(&bright.mask);
        PreparedFrame {
            hsv: to_hsv(&bright.masked),
            mask: bright.mask,
            has_bright_pixels,
        }
    }

    /// Largest round blob of the camera's colour inside its ROI.
    pub fn locate_blob(&self, frame: &PreparedFrame, cam: &PerCameraData) -> Option<BlobDetection> {
        let filtered = in_range(&frame.hsv, &cam.roi, cam.color.lower, cam.color.upper);

        find_contours(&filtered)
            .into_iter()
            .filter_map(|contour| {
                let bounds = bounding_rect(&contour);
                let area = contour_area(&contour);
                if area < self.config.min_contour_area {
                    return None;
                }
                if (bounds.width - bounds.height).abs() > bounds.height / 2 {
                    return None;
                }
                Some((area, bounds, contour))
            })
            .fold(None, |best: Option<(f64, _, _)>, cand| match best {
                Some(b) if b.0 >= cand.0 => Some(b),
                _ => Some(cand),
            })
            .map(|(_, bounds, contour)| {
                let circle = min_enclosing_circle(&contour);
                BlobDetection {
                    local_center: Point2::new(circle.center.x as f32, circle.center.y as f32),
                    radius: circle.radius as f32,
                    local_bounds: bounds,
                }
            })
    }

    /// Update one camera's detection state from a prepared frame.
    pub fn track_in_camera(&self, frame: &PreparedFrame, cam: &mut PerCameraData) -> bool {
        if !cam.has_color || !frame.has_bright_pixels {
            cam.acquired_tracking = false;
            return false;
        }

        let Some(blob) = self.locate_blob(frame, cam) else {
            cam.acquired_tracking = false;
            return false;
        };

        cam.in_roi_circle_center = blob.local_center;
        cam.circle_radius = blob.radius;
        cam.in_roi_bounds = blob.local_bounds;
        cam.global_circle_center = cam.roi.point_to_global(&blob.local_center);
        cam.global_bounds = cam.roi.rect_to_global(&blob.local_bounds);

        cam.roi = Roi::centered_on(&cam.global_circle_center, self.config.roi_size);
        cam.roi.clamp_to(frame.cols(), frame.rows());
        cam.acquired_tracking = true;

        trace!(
            x = cam.global_circle_center.x,
            y = cam.global_circle_center.y,
            r = cam.circle_radius,
            "blob acquired"
        );
        true
    }

    /// Search one object in one camera's frame.
    pub fn find_single_ball(&self, frame: &RgbImage, obj: &mut TrackedObject, camera_index: usize) -> bool {
        let prepared = self.prepare_frame(frame);
        match obj.per_camera_data.get_mut(camera_index) {
            Some(cam) => self.track_in_camera(&prepared, cam),
            None => false,
        }
    }

    /// Search every object in one camera's frame, sharing the masking work.
    pub fn find_multi_balls(&self, frame: &RgbImage, objects: &mut [TrackedObject], camera_index: usize) {
        let prepared = self.prepare_frame(frame);
        for obj in objects.iter_mut() {
            if let Some(cam) = obj.per_camera_data.get_mut(camera_index) {
                self.track_in_camera(&prepared, cam);
            }
        }
    }

    /// Grow a lost camera's ROI so the next frame searches a wider area.
    pub fn widen_search(&self, cam: &mut PerCameraData, cols: u32, rows: u32) {
        cam.roi.grow(self.config.roi_growth);
        cam.roi.clamp_to(cols, rows);
    }
}
