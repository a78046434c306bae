//! Simulated hardware: lit spheres rendered through calibrated pinhole cameras
//! and controllers that report a fixed orientation.
//!
//! Used by `--simulate` and by the scenario tests, so the whole pipeline runs
//! without cameras or Bluetooth.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2, UnitQuaternion, Vector3, Vector4};
use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use super::{BatteryLevel, Buttons, CameraRig, ConnectionType, ExposureMode, FrameSource, ImuDevice, ImuReading};
use crate::calibration::{CameraCalibration, Extrinsics};
use crate::controller::RgbColor;
use crate::geometry::Intrinsics;
use crate::geometry::transform::make_4x4;
use crate::imu::{AhrsEstimator, GRAVITY_DIR, ImuSample};
use crate::tracking::HsvColorRange;

pub const SYNTHETIC_COLS: u32 = 640;
pub const SYNTHETIC_ROWS: u32 = 480;

const DARK_BACKGROUND: [u8; 3] = [4, 4, 6];
const AUTO_BACKGROUND: [u8; 3] = [70, 70, 70];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticSphere {
    /// World position (cm).
    pub center: Vector3<f64>,
    pub radius: f64,
    pub color: RgbColor,
}

pub type SharedScene = Arc<RwLock<Vec<SyntheticSphere>>>;

/// Two spheres about 1.5 m in front of the rig, purple left and cyan right.
pub fn default_scene() -> SharedScene {
    Arc::new(RwLock::new(vec![
        SyntheticSphere {
            center: Vector3::new(-10.0, 150.0, -150.0),
            radius: 2.5,
            color: RgbColor::from_name("purple"),
        },
        SyntheticSphere {
            center: Vector3::new(10.0, 150.0, -150.0),
            radius: 2.5,
            color: RgbColor::from_name("cyan"),
        },
    ]))
}

/// Calibration of the simulated rig.
///
/// Both cameras are parallel with a 60 cm baseline. Camera 0 sits 1.5 m above
/// the world origin looking down -z.
pub fn synthetic_calibrations() -> Vec<CameraCalibration> {
    let intrinsics = Intrinsics::from_focal(600.0, 600.0, 320.0, 240.0);

    let mut world = Matrix3x4::zeros();
    world
        .fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0)));
    world.set_column(3, &Vector3::new(-30.0, 150.0, 0.0));
    let world = make_4x4(&world);

    (0..2)
        .map(|camera_id| {
            let mut t = Matrix3x4::zeros();
            t.fixed_view_mut::<3, 3>(0, 0).copy_from(&Matrix3::identity());
            t[(0, 3)] = -60.0 * camera_id as f64;

            let mut calib = CameraCalibration::new(camera_id);
            calib.intrinsics = Some(intrinsics);
            calib.extrinsics = Some(Extrinsics {
                t,
                world: if camera_id == 0 { world } else { Matrix4::identity() },
            });
            calib
                .colors
                .insert("purple".into(), HsvColorRange::new([140, 100, 100], [160, 255, 255]));
            calib
                .colors
                .insert("cyan".into(), HsvColorRange::new([80, 100, 100], [100, 255, 255]));
            calib
        })
        .collect()
}

/// Renders the shared scene as seen by one calibrated camera.
pub struct SyntheticCamera {
    intrinsics: Intrinsics,
    extrinsic: Matrix3x4<f64>,
    /// World to camera-0 frame.
    world_to_rig: Matrix4<f64>,
    scene: SharedScene,
    exposure: ExposureMode,
    pixel_noise: Option<Normal<f64>>,
    rng: StdRng,
    frame_interval: Option<Duration>,
    last_frame: Option<Instant>,
}

impl SyntheticCamera {
    pub fn new(calib: &CameraCalibration, rig_world: &Matrix4<f64>, scene: SharedScene) -> anyhow::Result<Self> {
        let intrinsics = calib
            .intrinsics
            .ok_or_else(|| anyhow::anyhow!("camera {} has no intrinsics", calib.camera_id))?;
        let extrinsic = calib
            .extrinsics
            .map(|e| e.t)
            .ok_or_else(|| anyhow::anyhow!("camera {} has no extrinsics", calib.camera_id))?;
        let world_to_rig = rig_world
            .try_inverse()
            .ok_or_else(|| anyhow::anyhow!("rig world transform is singular"))?;

        Ok(Self {
            intrinsics,
            extrinsic,
            world_to_rig,
            scene,
            exposure: ExposureMode::Dark,
            pixel_noise: None,
            rng: StdRng::seed_from_u64(calib.camera_id as u64),
            frame_interval: None,
            last_frame: None,
        })
    }

    /// Gaussian jitter (px) added to every rendered sphere centre.
    pub fn with_pixel_noise(mut self, sigma: f64, seed: u64) -> Self {
        self.pixel_noise = Normal::new(0.0, sigma).ok();
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Throttle `grab` to a camera-like frame rate.
    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_interval = (fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps));
        self
    }

    /// Pixel position and depth of a world point, `None` behind the camera.
    pub fn project_world(&self, world: &Vector3<f64>) -> Option<(Point2<f64>, f64)> {
        let rig = self.world_to_rig * Vector4::new(world.x, world.y, world.z, 1.0);
        let cam = self.extrinsic * rig;
        if cam.z <= 1e-6 {
            return None;
        }
        let ideal = self.intrinsics.k * cam / cam.z;
        let px = self.intrinsics.distort_pixel(&Point2::new(ideal.x, ideal.y));
        Some((px, cam.z))
    }

    fn render(&mut self) -> RgbImage {
        let background = match self.exposure {
            ExposureMode::Dark => DARK_BACKGROUND,
            ExposureMode::Auto => AUTO_BACKGROUND,
        };
        let mut frame = RgbImage::from_pixel(SYNTHETIC_COLS, SYNTHETIC_ROWS, Rgb(background));

        let spheres = self.scene.read().clone();
        let mut visible: Vec<_> = spheres
            .iter()
            .filter_map(|s| self.project_world(&s.center).map(|(px, depth)| (px, depth, s)))
            .collect();
        // far to near so closer spheres occlude
        visible.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (mut center, depth, sphere) in visible {
            if let Some(noise) = &self.pixel_noise {
                center.x += noise.sample(&mut self.rng);
                center.y += noise.sample(&mut self.rng);
            }
            let radius = self.intrinsics.fx() * sphere.radius / depth;
            draw_disk(&mut frame, &center, radius, sphere.color.to_array());
        }
        frame
    }
}

fn draw_disk(frame: &mut RgbImage, center: &Point2<f64>, radius: f64, color: [u8; 3]) {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    let x0 = ((center.x - radius).floor() as i64).max(0);
    let x1 = ((center.x + radius).ceil() as i64).min(w - 1);
    let y0 = ((center.y - radius).floor() as i64).max(0);
    let y1 = ((center.y + radius).ceil() as i64).min(h - 1);
    let r2 = radius * radius;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let (dx, dy) = (x as f64 - center.x, y as f64 - center.y);
            if dx * dx + dy * dy <= r2 {
                frame.put_pixel(x as u32, y as u32, Rgb(color));
            }
        }
    }
}

impl FrameSource for SyntheticCamera {
    fn frame_size(&self) -> (u32, u32) {
        (SYNTHETIC_COLS, SYNTHETIC_ROWS)
    }

    fn grab(&mut self) -> anyhow::Result<RgbImage> {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
        Ok(self.render())
    }

    fn set_exposure(&mut self, mode: ExposureMode) {
        self.exposure = mode;
    }
}

/// Simulated two-camera rig over a shared scene.
pub fn synthetic_rig(scene: &SharedScene, pixel_noise: f64, fps: Option<f64>) -> anyhow::Result<CameraRig> {
    let calibrations = synthetic_calibrations();
    let rig_world = calibrations[0]
        .extrinsics
        .map(|e| e.world)
        .ok_or_else(|| anyhow::anyhow!("camera 0 has no world transform"))?;

    let mut sources: Vec<Box<dyn FrameSource>> = Vec::with_capacity(calibrations.len());
    for calib in &calibrations {
        let mut camera = SyntheticCamera::new(calib, &rig_world, Arc::clone(scene))?;
        if pixel_noise > 0.0 {
            camera = camera.with_pixel_noise(pixel_noise, 0x7a0 + calib.camera_id as u64);
        }
        if let Some(fps) = fps {
            camera = camera.with_frame_rate(fps);
        }
        sources.push(Box::new(camera));
    }
    CameraRig::new(sources, calibrations)
}

/// What the host last wrote to a simulated controller.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceOutputs {
    pub leds: RgbColor,
    pub rumble: u8,
    pub flushes: usize,
}

/// Shared handle to a simulated controller's inputs and outputs.
#[derive(Debug, Clone, Default)]
pub struct SyntheticImuHandle {
    pub outputs: Arc<Mutex<DeviceOutputs>>,
    pub buttons: Arc<Mutex<Buttons>>,
    /// Linear acceleration in the sensor frame (g).
    pub linear_accel: Arc<Mutex<Vector3<f32>>>,
}

/// A controller resting at a fixed orientation.
pub struct SyntheticImu {
    serial: String,
    orientation: UnitQuaternion<f32>,
    gyro_bias: Vector3<f32>,
    connection: ConnectionType,
    battery: BatteryLevel,
    period: Duration,
    started: Instant,
    last_emit: Option<Instant>,
    handle: SyntheticImuHandle,
}

impl SyntheticImu {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            orientation: AhrsEstimator::controller_rest_orientation(),
            gyro_bias: Vector3::zeros(),
            connection: ConnectionType::Bluetooth,
            battery: BatteryLevel::Percent80,
            period: Duration::from_millis(5),
            started: Instant::now(),
            last_emit: None,
            handle: SyntheticImuHandle::default(),
        }
    }

    pub fn with_orientation(mut self, orientation: UnitQuaternion<f32>) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_gyro_bias(mut self, bias: Vector3<f32>) -> Self {
        self.gyro_bias = bias;
        self
    }

    pub fn with_connection(mut self, connection: ConnectionType) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn handle(&self) -> SyntheticImuHandle {
        self.handle.clone()
    }

    fn sample(&self) -> ImuSample {
        let gravity = self.orientation.inverse_transform_vector(&GRAVITY_DIR);
        ImuSample::new(self.gyro_bias, gravity + *self.handle.linear_accel.lock())
    }
}

impl ImuDevice for SyntheticImu {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn connection(&self) -> ConnectionType {
        self.connection
    }

    fn poll(&mut self) -> Option<ImuReading> {
        let now = Instant::now();
        if self.last_emit.is_some_and(|last| now.duration_since(last) < self.period) {
            return None;
        }
        self.last_emit = Some(now);

        let sample = self.sample();
        Some(ImuReading {
            timestamp_ms: now.duration_since(self.started).as_millis() as u64,
            samples: [sample, sample],
            buttons: *self.handle.buttons.lock(),
            trigger: 0,
            battery: self.battery,
        })
    }

    fn set_leds(&mut self, color: RgbColor) {
        self.handle.outputs.lock().leds = color;
    }

    fn set_rumble(&mut self, strength: u8) {
        self.handle.outputs.lock().rumble = strength;
    }

    fn flush_outputs(&mut self) -> anyhow::Result<()> {
        self.handle.outputs.lock().flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::BlobDetector;
    use crate::tracking::TrackedObject;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_scene_projects_into_both_cameras() {
        let scene = default_scene();
        let mut rig = synthetic_rig(&scene, 0.0, None).unwrap();
        let frames = rig.grab_all().unwrap();
        assert_eq!(frames.len(), 2);

        // purple sphere: rig frame (20, 0, 150) => (400, 240) and (160, 240)
        assert_eq!(frames[0].get_pixel(400, 240).0, [255, 0, 255]);
        assert_eq!(frames[1].get_pixel(160, 240).0, [255, 0, 255]);
        assert_eq!(frames[0].get_pixel(5, 5).0, DARK_BACKGROUND);
    }

    #[test]
    fn test_detector_finds_rendered_sphere() {
        let scene = default_scene();
        let mut rig = synthetic_rig(&scene, 0.0, None).unwrap();
        let frames = rig.grab_all().unwrap();
        let purple = rig.calibrations()[0].color_range("purple");
        let mut obj = TrackedObject::new(&[purple, purple], SYNTHETIC_COLS, SYNTHETIC_ROWS);

        let detector = BlobDetector::default();
        assert!(detector.find_single_ball(&frames[0], &mut obj, 0));
        assert!(detector.find_single_ball(&frames[1], &mut obj, 1));
        assert_relative_eq!(obj.per_camera_data[0].global_circle_center.x, 400.0, epsilon = 1.0);
        assert_relative_eq!(obj.per_camera_data[1].global_circle_center.x, 160.0, epsilon = 1.0);
    }

    #[test]
    fn test_resting_imu_reads_gravity() {
        let mut imu = SyntheticImu::new("00:11:22:33:44:55");
        let reading = imu.poll().unwrap();
        let accel = reading.samples[0].accel;
        assert_relative_eq!(accel.norm(), 1.0, epsilon = 1e-5);
        // rest pose is 90 degrees about x, so gravity lands on sensor +y
        assert_relative_eq!(accel, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-5);
        // second poll inside the period has nothing new
        assert!(imu.poll().is_none());
    }

    #[test]
    fn test_outputs_are_visible_through_handle() {
        let mut imu = SyntheticImu::new("a");
        let handle = imu.handle();
        imu.set_leds(RgbColor::from_name("red"));
        imu.set_rumble(128);
        imu.flush_outputs().unwrap();
        let out = *handle.outputs.lock();
        assert_eq!(out.leds, RgbColor::new(255, 0, 0));
        assert_eq!(out.rumble, 128);
        assert_eq!(out.flushes, 1);
    }
}
