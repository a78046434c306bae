//! One motion controller: IMU polling, orientation, LEDs and rumble.
//!
//! A [`Controller`] is owned by its update thread. Every other thread talks to
//! it through the [`ControllerShared`] half: they read the latest
//! [`ControllerSnapshot`] and queue commands (colour, rumble, relevel) that the
//! update thread applies on its next pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::led::RgbColor;
use crate::hardware::{Buttons, ConnectionType, ImuDevice, ImuReading};
use crate::imu::{AhrsEstimator, ImuCalibration};

/// Minimum spacing of LED/rumble writes unless a write is urgent.
pub const OUTPUT_WRITE_INTERVAL: Duration = Duration::from_millis(100);

/// Controller state as published by the update thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSnapshot {
    pub connected: bool,
    pub buttons: Buttons,
    /// `0..=1`
    pub trigger: f32,
    /// `0..=1`
    pub battery: f32,
    pub charging: bool,
    pub gyro: Vector3<f32>,
    pub accel: Vector3<f32>,
    pub orientation: UnitQuaternion<f32>,
    /// Orientation with axes swizzled into VR space.
    pub vr_orientation: UnitQuaternion<f32>,
    pub freq_estimate: f32,
}

impl ControllerSnapshot {
    pub fn disconnected(orientation: UnitQuaternion<f32>) -> Self {
        Self {
            connected: false,
            buttons: Buttons::empty(),
            trigger: 0.0,
            battery: 0.0,
            charging: false,
            gyro: Vector3::zeros(),
            accel: Vector3::zeros(),
            orientation,
            vr_orientation: to_vr_space(&orientation),
            freq_estimate: 0.0,
        }
    }

    pub fn is_pressed(&self, button: Buttons) -> bool {
        self.buttons.contains(button)
    }
}

/// `(w, x, y, z) -> (w, x, z, -y)`: sensor frame to the runtime's y-up frame.
pub fn to_vr_space(q: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
    let q = q.quaternion();
    UnitQuaternion::new_normalize(Quaternion::new(q.w, q.i, q.k, -q.j))
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RumbleRequest {
    duration: Duration,
    strength: f32,
}

#[derive(Debug, Default)]
struct PendingCommands {
    color: Option<RgbColor>,
    rumble: Option<RumbleRequest>,
    relevel: bool,
}

/// The thread-safe face of a controller.
#[derive(Debug)]
pub struct ControllerShared {
    serial: String,
    color_name: RwLock<String>,
    snapshot: RwLock<ControllerSnapshot>,
    commands: Mutex<PendingCommands>,
    recenter_requested: AtomicBool,
}

impl ControllerShared {
    pub fn new(serial: impl Into<String>, rest: UnitQuaternion<f32>) -> Self {
        Self {
            serial: serial.into(),
            color_name: RwLock::new("off".into()),
            snapshot: RwLock::new(ControllerSnapshot::disconnected(rest)),
            commands: Mutex::new(PendingCommands::default()),
            recenter_requested: AtomicBool::new(false),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        *self.snapshot.read()
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot.read().connected
    }

    pub fn color_name(&self) -> String {
        self.color_name.read().clone()
    }

    /// Queue an LED colour change by name.
    pub fn set_color(&self, name: &str) {
        *self.color_name.write() = name.to_string();
        self.commands.lock().color = Some(RgbColor::from_name(name));
    }

    pub fn do_rumble(&self, duration: Duration, strength: f32) {
        self.commands.lock().rumble = Some(RumbleRequest {
            duration,
            strength: strength.clamp(0.0, 1.0),
        });
    }

    pub fn request_relevel(&self) {
        self.commands.lock().relevel = true;
    }

    /// Ask the filter to make this controller's position the origin.
    pub fn request_recenter(&self) {
        self.recenter_requested.store(true, Ordering::SeqCst);
    }

    /// Consume a pending re-centre request.
    pub fn take_recenter_request(&self) -> bool {
        self.recenter_requested.swap(false, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
struct RumbleState {
    started: Instant,
    duration: Duration,
    strength: f32,
}

/// Device-side controller state, driven by [`Controller::update`].
pub struct Controller {
    shared: Arc<ControllerShared>,
    device: Option<Box<dyn ImuDevice>>,
    connection: ConnectionType,

    ahrs: AhrsEstimator,

    color: RgbColor,
    color_dirty: bool,
    rumble: Option<RumbleState>,
    last_write: Option<Instant>,
    write_urgent: bool,
}

impl Controller {
    pub fn new(shared: Arc<ControllerShared>, calibration: ImuCalibration, beta: f32) -> Self {
        if !calibration.has_gyro() {
            warn!(serial = shared.serial(), "no gyro calibration, orientation may drift");
        }
        Self {
            shared,
            device: None,
            connection: ConnectionType::default(),
            ahrs: AhrsEstimator::new(AhrsEstimator::controller_rest_orientation(), beta, calibration),
            color: RgbColor::OFF,
            color_dirty: false,
            rumble: None,
            last_write: None,
            write_urgent: false,
        }
    }

    pub fn shared(&self) -> &Arc<ControllerShared> {
        &self.shared
    }

    pub fn connect(&mut self, device: Box<dyn ImuDevice>) {
        self.connection = device.connection();
        self.device = Some(device);
        // replay the colour chosen before the device showed up
        self.color_dirty = true;
        self.shared.snapshot.write().connected = true;
        debug!(serial = self.shared.serial(), connection = ?self.connection, "controller connected");
    }

    pub fn disconnect(&mut self) -> Option<Box<dyn ImuDevice>> {
        self.shared.snapshot.write().connected = false;
        self.device.take()
    }

    pub fn is_connected(&self) -> bool {
        self.device.is_some()
    }

    pub fn ahrs(&self) -> &AhrsEstimator {
        &self.ahrs
    }

    /// One pass of the update thread. Returns whether new sensor data arrived.
    pub fn update(&mut self, now: Instant) -> bool {
        self.apply_commands(now);

        let Some(device) = self.device.as_mut() else {
            return false;
        };

        // USB-attached controllers only charge, they do not stream sensor data
        let mut had_new_data = false;
        if self.connection != ConnectionType::Usb {
            while let Some(reading) = device.poll() {
                Self::handle_reading(&self.shared, &mut self.ahrs, &reading);
                had_new_data = true;
            }
        }

        if self.color_dirty {
            device.set_leds(self.color);
            self.color_dirty = false;
            self.write_urgent = true;
        }

        match self.rumble {
            Some(rumble) => {
                if now.saturating_duration_since(rumble.started) >= rumble.duration {
                    self.rumble = None;
                    device.set_rumble(0);
                } else {
                    device.set_rumble((rumble.strength * 255.0) as u8);
                }
                self.write_urgent = true;
            }
            None => device.set_rumble(0),
        }

        let due = self
            .last_write
            .map_or(true, |last| now.saturating_duration_since(last) >= OUTPUT_WRITE_INTERVAL);
        if due || self.write_urgent {
            if let Err(e) = device.flush_outputs() {
                warn!(serial = self.shared.serial(), "failed to write outputs: {e:#}");
            }
            self.write_urgent = false;
            self.last_write = Some(now);
        }

        had_new_data
    }

    fn apply_commands(&mut self, now: Instant) {
        let commands = std::mem::take(&mut *self.shared.commands.lock());
        if let Some(color) = commands.color {
            self.color = color;
            self.color_dirty = true;
        }
        if let Some(rumble) = commands.rumble {
            self.rumble = Some(RumbleState {
                started: now,
                duration: rumble.duration,
                strength: rumble.strength,
            });
        }
        if commands.relevel {
            self.ahrs.reset();
        }
    }

    fn handle_reading(shared: &ControllerShared, ahrs: &mut AhrsEstimator, reading: &ImuReading) {
        // SELECT relevels, SELECT+START also re-centres the position output
        if reading.buttons.contains(Buttons::SELECT) {
            ahrs.reset();
            if reading.buttons.contains(Buttons::START) {
                shared.request_recenter();
            }
        }

        let applied = ahrs.update(reading.timestamp_ms, &reading.samples);
        let orientation = ahrs.orientation();

        let mut snap = shared.snapshot.write();
        snap.buttons = reading.buttons;
        snap.trigger = reading.trigger as f32 / 255.0;
        snap.battery = reading.battery.fraction();
        snap.charging = reading.battery.is_charging();
        if let Some(last) = applied.last() {
            snap.gyro = last.gyro;
            snap.accel = last.accel;
        }
        snap.orientation = orientation;
        snap.vr_orientation = to_vr_space(&orientation);
        snap.freq_estimate = ahrs.state().freq_estimate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::synthetic::SyntheticImu;
    use crate::hardware::{BatteryLevel, ImuReading};
    use crate::imu::{DEFAULT_BETA, ImuSample};
    use approx::assert_relative_eq;


    fn controller() -> Controller {
        let shared = Arc::new(ControllerShared::new("00:06:f7:aa:bb:cc", AhrsEstimator::controller_rest_orientation()));
        Controller::new(shared, ImuCalibration::default(), DEFAULT_BETA)
    }

    #[test]
    fn test_vr_swizzle() {
        let q = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.4);
        let vr = to_vr_space(&q);
        // a rotation about sensor y becomes one about -z
        let expected = UnitQuaternion::from_axis_angle(&-Vector3::z_axis(), 0.4);
        assert_relative_eq!(vr, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_update_publishes_snapshot() {
        let mut c = controller();
        c.connect(Box::new(SyntheticImu::new("00:06:f7:aa:bb:cc")));
        assert!(c.update(Instant::now()));

        let snap = c.shared().snapshot();
        assert!(snap.connected);
        assert_relative_eq!(snap.battery, BatteryLevel::Percent80.fraction());
        assert_relative_eq!(snap.orientation, AhrsEstimator::controller_rest_orientation(), epsilon = 1e-6);
    }

    #[test]
    fn test_usb_controller_is_not_polled() {
        let mut c = controller();
        c.connect(Box::new(SyntheticImu::new("x").with_connection(ConnectionType::Usb)));
        assert!(!c.update(Instant::now()));
    }

    #[test]
    fn test_color_before_connect_is_replayed() {
        let mut c = controller();
        c.shared().set_color("cyan");
        let imu = SyntheticImu::new("x");
        let handle = imu.handle();
        c.update(Instant::now());
        c.connect(Box::new(imu));
        c.update(Instant::now());
        assert_eq!(handle.outputs.lock().leds, RgbColor::new(0, 255, 255));
        assert_eq!(c.shared().color_name(), "cyan");
    }

    #[test]
    fn test_output_writes_are_throttled() {
        let mut c = controller();
        let imu = SyntheticImu::new("x");
        let handle = imu.handle();
        c.connect(Box::new(imu));

        let t0 = Instant::now();
        c.update(t0);
        c.update(t0 + Duration::from_millis(10));
        c.update(t0 + Duration::from_millis(50));
        assert_eq!(handle.outputs.lock().flushes, 1);
        c.update(t0 + Duration::from_millis(120));
        assert_eq!(handle.outputs.lock().flushes, 2);
    }

    #[test]
    fn test_rumble_runs_for_duration() {
        let mut c = controller();
        let imu = SyntheticImu::new("x");
        let handle = imu.handle();
        c.connect(Box::new(imu));

        let t0 = Instant::now();
        c.shared().do_rumble(Duration::from_millis(30), 0.5);
        c.update(t0);
        assert_eq!(handle.outputs.lock().rumble, 127);
        // rumble is urgent, so it bypasses the write throttle
        c.update(t0 + Duration::from_millis(10));
        assert_eq!(handle.outputs.lock().flushes, 2);
        c.update(t0 + Duration::from_millis(40));
        assert_eq!(handle.outputs.lock().rumble, 0);
    }

    #[test]
    fn test_select_start_requests_recenter() {
        let shared = ControllerShared::new("x", UnitQuaternion::identity());
        let mut ahrs = AhrsEstimator::new(UnitQuaternion::identity(), DEFAULT_BETA, ImuCalibration::default());
        let reading = ImuReading {
            timestamp_ms: 10,
            samples: [ImuSample::at_rest(); 2],
            buttons: Buttons::SELECT | Buttons::START,
            trigger: 255,
            battery: BatteryLevel::Charging,
        };
        Controller::handle_reading(&shared, &mut ahrs, &reading);
        assert!(shared.take_recenter_request());
        assert!(!shared.take_recenter_request());

        let snap = shared.snapshot();
        assert_relative_eq!(snap.trigger, 1.0);
        assert!(snap.charging);
        assert!(snap.is_pressed(Buttons::START));
    }
}
