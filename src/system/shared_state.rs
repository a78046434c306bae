//! State shared between the optical, filter and comms threads.
//!
//! Each loop owns its working data; this struct only carries the published
//! results and the run flags that gate each loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use nalgebra::{Point2, Vector3};
use parking_lot::RwLock;

use crate::tracking::{Roi, TrackedObject, TrackingState};

/// Latest filter output for one controller.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoseSnapshot {
    pub state: TrackingState,
    /// Filtered, re-centred position in metres.
    pub position: Vector3<f32>,
    /// Pre-filter position in centimetres, used for re-centring.
    pub pre_filtered: Vector3<f32>,
}

/// What one camera saw of one controller in the last optical cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CameraDetection {
    pub roi: Roi,
    pub acquired: bool,
    pub center: Point2<f32>,
    pub radius: f32,
}

/// Per-controller optical result, published for previews.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectView {
    pub cameras: Vec<CameraDetection>,
    pub acquired_3d: bool,
    /// World position (cm), meaningful when `acquired_3d`.
    pub world: Vector3<f32>,
}

impl ObjectView {
    pub fn from_tracked(obj: &TrackedObject) -> Self {
        Self {
            cameras: obj
                .per_camera_data
                .iter()
                .map(|c| CameraDetection {
                    roi: c.roi,
                    acquired: c.acquired_tracking,
                    center: c.global_circle_center,
                    radius: c.circle_radius,
                })
                .collect(),
            acquired_3d: obj.acquired_3d_position,
            world: obj.world_position,
        }
    }
}

pub struct SharedState {
    /// Written by the filter loop, read by comms.
    pub poses: RwLock<Vec<PoseSnapshot>>,

    /// Written by the optical loop, read by previews.
    pub optical_view: RwLock<Vec<ObjectView>>,

    optical_fps: AtomicU32,

    optical_active: AtomicBool,
    filter_active: AtomicBool,
    comms_active: AtomicBool,
}

impl SharedState {
    /// Shared state with one default pose per controller. Every loop flag starts cleared.
    pub fn new(controller_count: usize) -> Arc<Self> {
        Arc::new(Self {
            poses: RwLock::new(vec![PoseSnapshot::default(); controller_count]),
            optical_view: RwLock::new(vec![ObjectView::default(); controller_count]),
            optical_fps: AtomicU32::new(0),
            optical_active: AtomicBool::new(false),
            filter_active: AtomicBool::new(false),
            comms_active: AtomicBool::new(false),
        })
    }

    /// Number of published pose slots.
    pub fn controller_count(&self) -> usize {
        self.poses.read().len()
    }

    /// Latest pose of controller `index`, if it exists.
    pub fn pose(&self, index: usize) -> Option<PoseSnapshot> {
        self.poses.read().get(index).copied()
    }

    /// Replace all poses with the filter loop's latest output.
    pub fn publish_poses(&self, poses: &[PoseSnapshot]) {
        let mut guard = self.poses.write();
        guard.clear();
        guard.extend_from_slice(poses);
    }

    /// Replace the optical view with the current tracked objects.
    pub fn publish_optical_view(&self, objects: &[TrackedObject]) {
        let mut guard = self.optical_view.write();
        guard.clear();
        guard.extend(objects.iter().map(ObjectView::from_tracked));
    }

    /// Optical loop rate from the last frame interval.
    pub fn optical_fps(&self) -> u32 {
        self.optical_fps.load(Ordering::Relaxed)
    }

    /// Set the optical loop rate.
    pub fn set_optical_fps(&self, fps: u32) {
        self.optical_fps.store(fps, Ordering::Relaxed);
    }

    /// Whether the optical loop should keep running.
    pub fn is_optical_active(&self) -> bool {
        self.optical_active.load(Ordering::SeqCst)
    }

    /// Start or stop the optical loop.
    pub fn set_optical_active(&self, value: bool) {
        self.optical_active.store(value, Ordering::SeqCst);
    }

    /// Whether the filter loop should keep running.
    pub fn is_filter_active(&self) -> bool {
        self.filter_active.load(Ordering::SeqCst)
    }

    /// Start or stop the filter loop.
    pub fn set_filter_active(&self, value: bool) {
        self.filter_active.store(value, Ordering::SeqCst);
    }

    /// Whether the pose server should keep running.
    pub fn is_comms_active(&self) -> bool {
        self.comms_active.load(Ordering::SeqCst)
    }

    /// Start or stop the pose server.
    pub fn set_comms_active(&self, value: bool) {
        self.comms_active.store(value, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::HsvColorRange;

    #[test]
    fn test_publish_and_read_poses() {
        let shared = SharedState::new(2);
        assert_eq!(shared.controller_count(), 2);
        assert_eq!(shared.pose(0), Some(PoseSnapshot::default()));
        assert_eq!(shared.pose(2), None);

        let fused = PoseSnapshot {
            state: TrackingState::Fused,
            position: Vector3::new(0.1, 1.5, -1.5),
            pre_filtered: Vector3::new(10.0, 150.0, -150.0),
        };
        shared.publish_poses(&[fused, PoseSnapshot::default()]);
        assert_eq!(shared.pose(0), Some(fused));
    }

    #[test]
    fn test_optical_view_mirrors_tracked_objects() {
        let shared = SharedState::new(1);
        let color = Some(HsvColorRange::new([140, 100, 100], [160, 255, 255]));
        let mut obj = TrackedObject::new(&[color, color], 640, 480);
        obj.per_camera_data[1].acquired_tracking = true;
        obj.per_camera_data[1].global_circle_center = Point2::new(160.0, 240.0);

        shared.publish_optical_view(std::slice::from_ref(&obj));
        let view = shared.optical_view.read();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].cameras.len(), 2);
        assert!(!view[0].cameras[0].acquired);
        assert!(view[0].cameras[1].acquired);
        assert_eq!(view[0].cameras[1].center, Point2::new(160.0, 240.0));
        assert_eq!(view[0].cameras[0].roi, Roi::full_frame(640, 480));
    }

    #[test]
    fn test_loop_flags_are_independent() {
        let shared = SharedState::new(0);
        shared.set_filter_active(true);
        assert!(shared.is_filter_active());
        assert!(!shared.is_optical_active());
        assert!(!shared.is_comms_active());
        shared.set_filter_active(false);
        assert!(!shared.is_filter_active());
    }
}
