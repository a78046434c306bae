//! Messages exchanged with the VR driver.
//!
//! The tracker sends [`TaurusMessage`]s (pose, input, status, tracker list)
//! and receives [`DriverMessage`]s (haptics, tracker list request). Both are
//! keyed by controller serial; tracker-wide messages use an empty serial.

use std::time::Duration;

use nalgebra::{UnitQuaternion, Vector3};

/// Shortest rumble pulse the driver can ask for.
pub const MIN_HAPTIC_DURATION: Duration = Duration::from_millis(3);
/// Weaker rumble is not felt through the controller shell.
pub const MIN_HAPTIC_AMPLITUDE: f32 = 0.35;

/// Position in metres and orientation in the runtime's frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vector3<f32>,
    pub orientation: UnitQuaternion<f32>,
}

impl Pose {
    pub fn new(position: Vector3<f32>, orientation: UnitQuaternion<f32>) -> Self {
        Self { position, orientation }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InputComponent {
    System = 0,
    Move = 1,
    Square = 2,
    Cross = 3,
    Triangle = 4,
    Circle = 5,
    Start = 6,
    Select = 7,
    Trigger = 8,
}

impl InputComponent {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::System,
            1 => Self::Move,
            2 => Self::Square,
            3 => Self::Cross,
            4 => Self::Triangle,
            5 => Self::Circle,
            6 => Self::Start,
            7 => Self::Select,
            8 => Self::Trigger,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEvent {
    pub component: InputComponent,
    /// Buttons are 0 or 1, the trigger is `0..=1`.
    pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerStatus {
    pub battery_percent: u8,
    pub is_charging: bool,
    pub is_connected: bool,
    pub is_tracking: bool,
}

/// Camera pose reported to the driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerInfo {
    pub id: u32,
    pub pose: Pose,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaurusPayload {
    Pose(Pose),
    Input(Vec<InputEvent>),
    Status(ControllerStatus),
    TrackersAnswer(Vec<TrackerInfo>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaurusMessage {
    pub serial: String,
    pub payload: TaurusPayload,
}

impl TaurusMessage {
    pub fn new(serial: impl Into<String>, payload: TaurusPayload) -> Self {
        Self {
            serial: serial.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HapticEvent {
    /// Seconds; zero asks for a single short pulse.
    pub duration: f32,
    pub frequency: f32,
    pub amplitude: f32,
}

impl HapticEvent {
    /// Rumble duration and strength after applying the pulse and amplitude
    /// floors.
    pub fn to_rumble(&self) -> (Duration, f32) {
        let amplitude = self.amplitude.clamp(MIN_HAPTIC_AMPLITUDE, 1.0);
        let duration = if self.duration <= 0.0 || !self.duration.is_finite() {
            MIN_HAPTIC_DURATION
        } else {
            Duration::from_secs_f32(self.duration)
        };
        (duration, amplitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriverPayload {
    Haptic(HapticEvent),
    TrackersRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverMessage {
    pub serial: String,
    pub payload: DriverPayload,
}

impl DriverMessage {
    pub fn new(serial: impl Into<String>, payload: DriverPayload) -> Self {
        Self {
            serial: serial.into(),
            payload,
        }
    }
}
