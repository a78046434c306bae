//! Hardware boundary: cameras and IMU controllers.
//!
//! The tracking core only sees the [`FrameSource`] and [`ImuDevice`] traits.
//! Backends convert their native buffers into `image` and `nalgebra` types
//! here and nowhere else.

#[cfg(feature = "opencv-capture")]
pub mod opencv_capture;
pub mod synthetic;

use std::fmt;

use image::RgbImage;

use crate::calibration::CameraCalibration;
use crate::controller::RgbColor;
use crate::imu::ImuSample;

/// Exposure presets. Tracking runs dark so only the lit spheres survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExposureMode {
    #[default]
    Auto,
    Dark,
}

/// A synchronous camera: `grab` blocks until the next frame is ready.
pub trait FrameSource: Send {
    /// `(cols, rows)`
    fn frame_size(&self) -> (u32, u32);

    fn grab(&mut self) -> anyhow::Result<RgbImage>;

    fn set_exposure(&mut self, mode: ExposureMode);
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn frame_size(&self) -> (u32, u32) {
        (**self).frame_size()
    }

    fn grab(&mut self) -> anyhow::Result<RgbImage> {
        (**self).grab()
    }

    fn set_exposure(&mut self, mode: ExposureMode) {
        (**self).set_exposure(mode)
    }
}

/// Cameras in index order plus their calibration.
pub struct CameraRig {
    sources: Vec<Box<dyn FrameSource>>,
    calibrations: Vec<CameraCalibration>,
}

impl CameraRig {
    pub fn new(sources: Vec<Box<dyn FrameSource>>, calibrations: Vec<CameraCalibration>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            sources.len() == calibrations.len(),
            "{} cameras but {} calibrations",
            sources.len(),
            calibrations.len()
        );
        Ok(Self { sources, calibrations })
    }

    pub fn camera_count(&self) -> usize {
        self.sources.len()
    }

    pub fn calibrations(&self) -> &[CameraCalibration] {
        &self.calibrations
    }

    /// Frame size of the first camera; all cameras are expected to match.
    pub fn frame_size(&self) -> (u32, u32) {
        self.sources.first().map(|s| s.frame_size()).unwrap_or((0, 0))
    }

    pub fn set_exposure(&mut self, mode: ExposureMode) {
        for source in &mut self.sources {
            source.set_exposure(mode);
        }
    }

    /// Grab one frame from every camera, camera 0 first.
    pub fn grab_all(&mut self) -> anyhow::Result<Vec<RgbImage>> {
        self.sources.iter_mut().map(|s| s.grab()).collect()
    }

    pub fn into_parts(self) -> (Vec<Box<dyn FrameSource>>, Vec<CameraCalibration>) {
        (self.sources, self.calibrations)
    }
}

/// Controller button bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Buttons(pub u32);

impl Buttons {
    pub const TRIANGLE: Self = Self(1 << 4);
    pub const CIRCLE: Self = Self(1 << 5);
    pub const CROSS: Self = Self(1 << 6);
    pub const SQUARE: Self = Self(1 << 7);
    pub const SELECT: Self = Self(1 << 8);
    pub const START: Self = Self(1 << 11);
    pub const PS: Self = Self(1 << 16);
    pub const MOVE: Self = Self(1 << 19);
    pub const T: Self = Self(1 << 20);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Buttons {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Buttons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#07x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatteryLevel {
    #[default]
    Unknown,
    Min,
    Percent20,
    Percent40,
    Percent60,
    Percent80,
    Max,
    Charging,
    ChargingDone,
}

impl BatteryLevel {
    /// Charge in `0..=1`.
    pub fn fraction(self) -> f32 {
        let percent = match self {
            Self::Unknown => 0.0,
            Self::Min => 1.0,
            Self::Percent20 => 20.0,
            Self::Percent40 => 40.0,
            Self::Percent60 => 60.0,
            Self::Percent80 => 80.0,
            Self::Max => 100.0,
            Self::Charging => 90.0,
            Self::ChargingDone => 100.0,
        };
        percent / 100.0
    }

    pub fn is_charging(self) -> bool {
        matches!(self, Self::Charging | Self::ChargingDone)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    #[default]
    Bluetooth,
    Usb,
}

/// One poll result from a controller. The sensor reports two half-frames per
/// message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuReading {
    pub timestamp_ms: u64,
    pub samples: [ImuSample; 2],
    pub buttons: Buttons,
    pub trigger: u8,
    pub battery: BatteryLevel,
}

pub trait ImuDevice: Send {
    fn serial(&self) -> &str;

    fn connection(&self) -> ConnectionType;

    /// Next pending reading, `None` when the device has nothing new.
    fn poll(&mut self) -> Option<ImuReading>;

    fn set_leds(&mut self, color: RgbColor);

    /// `0..=255`
    fn set_rumble(&mut self, strength: u8);

    /// Push the staged LED and rumble values to the device.
    fn flush_outputs(&mut self) -> anyhow::Result<()>;
}

impl<T: ImuDevice + ?Sized> ImuDevice for Box<T> {
    fn serial(&self) -> &str {
        (**self).serial()
    }

    fn connection(&self) -> ConnectionType {
        (**self).connection()
    }

    fn poll(&mut self) -> Option<ImuReading> {
        (**self).poll()
    }

    fn set_leds(&mut self, color: RgbColor) {
        (**self).set_leds(color)
    }

    fn set_rumble(&mut self, strength: u8) {
        (**self).set_rumble(strength)
    }

    fn flush_outputs(&mut self) -> anyhow::Result<()> {
        (**self).flush_outputs()
    }
}
