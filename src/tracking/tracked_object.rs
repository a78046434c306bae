//! Optical tracking state for one physical controller.
//!
//! A `TrackedObject` is owned by the optical loop. The filter loop never touches
//! it directly; it receives `OpticalFix` messages built from it instead.

use std::time::{Duration, Instant};

use nalgebra::{Point2, Vector3};
use serde::{Deserialize, Serialize};

use super::roi::Roi;

/// Fixes further apart than this do not produce a velocity estimate.
pub const MAX_VELOCITY_GAP: Duration = Duration::from_millis(100);

/// Inclusive HSV bounds (8-bit, hue in `0..180`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HsvColorRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvColorRange {
    pub fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| hsv[c] >= self.lower[c] && hsv[c] <= self.upper[c])
    }
}

/// Detection state of one controller as seen by one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct PerCameraData {
    /// Search window in frame coordinates, always clamped to the frame.
    pub roi: Roi,
    pub color: HsvColorRange,
    /// False when the colour range is unknown for this camera, which disables
    /// detection for it.
    pub has_color: bool,

    pub acquired_tracking: bool,

    pub in_roi_circle_center: Point2<f32>,
    pub in_roi_bounds: Roi,
    pub circle_radius: f32,

    pub global_circle_center: Point2<f32>,
    pub global_bounds: Roi,
}

impl PerCameraData {
    pub fn new(color: Option<HsvColorRange>, cols: u32, rows: u32) -> Self {
        Self {
            roi: Roi::full_frame(cols, rows),
            color: color.unwrap_or_default(),
            has_color: color.is_some(),
            acquired_tracking: false,
            in_roi_circle_center: Point2::origin(),
            in_roi_bounds: Roi::default(),
            circle_radius: 0.0,
            global_circle_center: Point2::origin(),
            global_bounds: Roi::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub per_camera_data: Vec<PerCameraData>,

    /// Camera-0 relative position (cm).
    pub triangulated_position: Vector3<f32>,
    /// True iff every camera acquired the blob in the same cycle and the
    /// triangulation was well conditioned.
    pub acquired_3d_position: bool,

    pub world_position: Vector3<f32>,
    pub previous_world_position: Vector3<f32>,
    /// cm/s, derived from consecutive world fixes.
    pub optical_velocity: Vector3<f32>,

    last_fix_at: Option<Instant>,
}

impl TrackedObject {
    /// One entry per camera; `colors[i]` is this controller's range in camera `i`.
    pub fn new(colors: &[Option<HsvColorRange>], cols: u32, rows: u32) -> Self {
        Self {
            per_camera_data: colors.iter().map(|c| PerCameraData::new(*c, cols, rows)).collect(),
            triangulated_position: Vector3::zeros(),
            acquired_3d_position: false,
            world_position: Vector3::zeros(),
            previous_world_position: Vector3::zeros(),
            optical_velocity: Vector3::zeros(),
            last_fix_at: None,
        }
    }

    pub fn camera_count(&self) -> usize {
        self.per_camera_data.len()
    }

    /// True when every camera found the blob this cycle.
    pub fn all_cameras_acquired(&self) -> bool {
        !self.per_camera_data.is_empty() && self.per_camera_data.iter().all(|c| c.acquired_tracking)
    }

    /// Store a new world-space fix and return the optical velocity estimate.
    pub fn apply_world_fix(&mut self, world: Vector3<f32>, now: Instant) -> Vector3<f32> {
        self.previous_world_position = self.world_position;
        self.world_position = world;

        self.optical_velocity = match self.last_fix_at {
            Some(prev) => {
                let gap = now.saturating_duration_since(prev);
                if gap.is_zero() || gap > MAX_VELOCITY_GAP {
                    Vector3::zeros()
                } else {
                    (self.world_position - self.previous_world_position) / gap.as_secs_f32()
                }
            }
            None => Vector3::zeros(),
        };
        self.last_fix_at = Some(now);
        self.optical_velocity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn object() -> TrackedObject {
        let color = Some(HsvColorRange::new([140, 100, 100], [160, 255, 255]));
        TrackedObject::new(&[color, color], 640, 480)
    }

    #[test]
    fn test_one_entry_per_camera() {
        let obj = object();
        assert_eq!(obj.camera_count(), 2);
        assert_eq!(obj.per_camera_data[1].roi, Roi::new(0, 0, 640, 480));
        assert!(!obj.all_cameras_acquired());
    }

    #[test]
    fn test_velocity_from_consecutive_fixes() {
        let mut obj = object();
        let t0 = Instant::now();
        let v = obj.apply_world_fix(Vector3::new(10.0, 0.0, 0.0), t0);
        assert_eq!(v, Vector3::zeros());

        let v = obj.apply_world_fix(Vector3::new(11.0, 0.5, 0.0), t0 + Duration::from_millis(20));
        assert_relative_eq!(v, Vector3::new(50.0, 25.0, 0.0), epsilon = 1e-3);
        assert_eq!(obj.previous_world_position, Vector3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn test_velocity_zero_after_long_gap() {
        let mut obj = object();
        let t0 = Instant::now();
        obj.apply_world_fix(Vector3::zeros(), t0);
        let v = obj.apply_world_fix(Vector3::new(5.0, 0.0, 0.0), t0 + Duration::from_millis(250));
        assert_eq!(v, Vector3::zeros());
    }

    #[test]
    fn test_hsv_range_inclusive() {
        let range = HsvColorRange::new([10, 20, 30], [20, 255, 255]);
        assert!(range.contains([10, 20, 30]));
        assert!(range.contains([20, 255, 255]));
        assert!(!range.contains([21, 100, 100]));
    }
}
