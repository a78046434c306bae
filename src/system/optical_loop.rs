//! Optical tracking thread: grab, detect, triangulate, publish fixes.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};
use image::RgbImage;
use nalgebra::Point2;
use tracing::{debug, info, warn};

use super::messages::OpticalFix;
use super::shared_state::SharedState;
use crate::calibration::CameraCalibration;
use crate::hardware::{CameraRig, ExposureMode, FrameSource};
use crate::tracking::{BlobDetector, DetectorConfig, HsvColorRange, StereoGeometry, TrackedObject};

/// Back-off after a failed grab.
const GRAB_RETRY_DELAY: Duration = Duration::from_millis(10);

pub struct OpticalLoop {
    sources: Vec<Box<dyn FrameSource>>,
    detector: BlobDetector,
    /// `None` when the rig is not fully calibrated; 2D tracking still runs.
    stereo: Option<StereoGeometry>,
    objects: Vec<TrackedObject>,
    cols: u32,
    rows: u32,
    fix_sender: Sender<OpticalFix>,
}

impl OpticalLoop {
    /// `colors[i]` is the LED colour name of connected controller `i`.
    pub fn new(rig: CameraRig, colors: &[String], detector: DetectorConfig, fix_sender: Sender<OpticalFix>) -> Self {
        let (cols, rows) = rig.frame_size();
        let (mut sources, calibrations) = rig.into_parts();

        for source in &mut sources {
            source.set_exposure(ExposureMode::Dark);
        }

        let stereo = match calibrations.as_slice() {
            [cam0, cam1, ..] => match StereoGeometry::from_calibrations(cam0, cam1) {
                Ok(stereo) => Some(stereo),
                Err(e) => {
                    warn!(error = %e, "stereo geometry unavailable, 3D tracking disabled");
                    None
                }
            },
            _ => {
                warn!(cameras = calibrations.len(), "need two cameras for 3D tracking");
                None
            }
        };

        let objects = colors
            .iter()
            .map(|name| TrackedObject::new(&color_ranges(&calibrations, name), cols, rows))
            .collect();

        Self {
            sources,
            detector: BlobDetector::new(detector),
            stereo,
            objects,
            cols,
            rows,
            fix_sender,
        }
    }

    pub fn objects(&self) -> &[TrackedObject] {
        &self.objects
    }

    pub fn has_stereo(&self) -> bool {
        self.stereo.is_some()
    }

    /// Run one tracking cycle over a set of frames, camera 0 first.
    ///
    /// Returns the number of controllers triangulated this cycle.
    pub fn process_frames(&mut self, frames: &[RgbImage], now: Instant) -> usize {
        for (camera_index, frame) in frames.iter().enumerate() {
            self.detector.find_multi_balls(frame, &mut self.objects, camera_index);
            for obj in &mut self.objects {
                if let Some(cam) = obj.per_camera_data.get_mut(camera_index) {
                    if !cam.acquired_tracking {
                        self.detector.widen_search(cam, self.cols, self.rows);
                    }
                }
            }
        }

        let mut triangulated = 0;
        for (index, obj) in self.objects.iter_mut().enumerate() {
            obj.acquired_3d_position = false;
            let Some(stereo) = &self.stereo else {
                continue;
            };
            if !obj.all_cameras_acquired() {
                continue;
            }

            let px0 = to_pixel(&obj.per_camera_data[0].global_circle_center);
            let px1 = to_pixel(&obj.per_camera_data[1].global_circle_center);
            let fix = match stereo.locate(&px0, &px1) {
                Ok(fix) => fix,
                Err(e) => {
                    debug!(controller = index, error = %e, "triangulation rejected");
                    continue;
                }
            };

            obj.triangulated_position = fix.triangulated.cast::<f32>();
            obj.acquired_3d_position = true;
            let world = fix.world.cast::<f32>();
            let velocity = obj.apply_world_fix(world, now);
            triangulated += 1;

            let msg = OpticalFix {
                controller: index,
                world,
                velocity,
            };
            match self.fix_sender.try_send(msg) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!(controller = index, "fix channel full, dropping fix"),
                Err(TrySendError::Disconnected(_)) => debug!("filter loop gone, dropping fix"),
            }
        }
        triangulated
    }

    fn grab_all(&mut self) -> anyhow::Result<Vec<RgbImage>> {
        self.sources.iter_mut().map(|s| s.grab()).collect()
    }

    /// Thread body; returns when the optical flag is cleared.
    pub fn run(mut self, shared: Arc<SharedState>) {
        info!(
            cameras = self.sources.len(),
            controllers = self.objects.len(),
            "optical loop started"
        );
        let mut last_tick = Instant::now();
        while shared.is_optical_active() {
            let frames = match self.grab_all() {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(error = %e, "frame grab failed");
                    thread::sleep(GRAB_RETRY_DELAY);
                    continue;
                }
            };

            let now = Instant::now();
            let elapsed = now.duration_since(last_tick);
            last_tick = now;
            if !elapsed.is_zero() {
                shared.set_optical_fps((1.0 / elapsed.as_secs_f32()).round() as u32);
            }

            self.process_frames(&frames, now);
            shared.publish_optical_view(&self.objects);
        }
        info!("optical loop stopped");
    }
}

/// Per-camera HSV ranges for one colour name. A camera without that colour
/// calibrated gets `None`, which disables detection in it.
fn color_ranges(calibrations: &[CameraCalibration], name: &str) -> Vec<Option<HsvColorRange>> {
    calibrations
        .iter()
        .map(|calib| {
            let range = calib.color_range(name);
            if range.is_none() {
                warn!(camera = calib.camera_id, color = name, "colour not calibrated for camera");
            }
            range
        })
        .collect()
}

fn to_pixel(p: &Point2<f32>) -> Point2<f64> {
    Point2::new(p.x as f64, p.y as f64)
}
