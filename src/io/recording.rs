//! Session recordings: IMU readings as CSV and camera frames as PNG files.
//!
//! Layout of a recording directory:
//!     cam0/000000.png, cam0/000001.png, ...
//!     cam1/...
//!     imu/<serial with ':' -> '-'>.csv
//!
//! Recording wraps a live [`FrameSource`] / [`ImuDevice`]; replay implements
//! the same traits so the tracker runs unchanged on recorded data.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use csv::{ReaderBuilder, Writer};
use image::RgbImage;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calibration::storage::serial_to_dirname;
use crate::controller::RgbColor;
use crate::hardware::{BatteryLevel, Buttons, ConnectionType, ExposureMode, FrameSource, ImuDevice, ImuReading};
use crate::imu::ImuSample;

pub const IMU_DIR: &str = "imu";

pub fn camera_dir(root: &Path, camera_id: usize) -> PathBuf {
    root.join(format!("cam{camera_id}"))
}

/// One CSV row: a reading with both half-frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct ImuRow {
    timestamp_ms: u64,
    gx0: f32,
    gy0: f32,
    gz0: f32,
    ax0: f32,
    ay0: f32,
    az0: f32,
    gx1: f32,
    gy1: f32,
    gz1: f32,
    ax1: f32,
    ay1: f32,
    az1: f32,
    buttons: u32,
    trigger: u8,
}

impl From<&ImuReading> for ImuRow {
    fn from(r: &ImuReading) -> Self {
        let [s0, s1] = r.samples;
        Self {
            timestamp_ms: r.timestamp_ms,
            gx0: s0.gyro.x,
            gy0: s0.gyro.y,
            gz0: s0.gyro.z,
            ax0: s0.accel.x,
            ay0: s0.accel.y,
            az0: s0.accel.z,
            gx1: s1.gyro.x,
            gy1: s1.gyro.y,
            gz1: s1.gyro.z,
            ax1: s1.accel.x,
            ay1: s1.accel.y,
            az1: s1.accel.z,
            buttons: r.buttons.0,
            trigger: r.trigger,
        }
    }
}

impl ImuRow {
    fn to_reading(self) -> ImuReading {
        ImuReading {
            timestamp_ms: self.timestamp_ms,
            samples: [
                ImuSample::new(
                    Vector3::new(self.gx0, self.gy0, self.gz0),
                    Vector3::new(self.ax0, self.ay0, self.az0),
                ),
                ImuSample::new(
                    Vector3::new(self.gx1, self.gy1, self.gz1),
                    Vector3::new(self.ax1, self.ay1, self.az1),
                ),
            ],
            buttons: Buttons(self.buttons),
            trigger: self.trigger,
            battery: BatteryLevel::Unknown,
        }
    }
}

pub fn imu_recording_path(root: &Path, serial: &str) -> PathBuf {
    root.join(IMU_DIR).join(format!("{}.csv", serial_to_dirname(serial)))
}

pub fn load_imu_readings(path: &Path) -> Result<Vec<ImuReading>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut readings = Vec::new();
    for row in rdr.deserialize::<ImuRow>() {
        let row = row.with_context(|| format!("Bad IMU row in {}", path.display()))?;
        readings.push(row.to_reading());
    }
    Ok(readings)
}

/// Wraps a device and appends every polled reading to a CSV file.
pub struct RecordingImu<D> {
    inner: D,
    writer: Writer<File>,
}

impl<D: ImuDevice> RecordingImu<D> {
    pub fn create(inner: D, root: &Path) -> Result<Self> {
        let path = imu_recording_path(root, inner.serial());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let writer = Writer::from_path(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        info!(path = %path.display(), "recording IMU");
        Ok(Self { inner, writer })
    }
}

impl<D: ImuDevice> ImuDevice for RecordingImu<D> {
    fn serial(&self) -> &str {
        self.inner.serial()
    }

    fn connection(&self) -> ConnectionType {
        self.inner.connection()
    }

    fn poll(&mut self) -> Option<ImuReading> {
        let reading = self.inner.poll()?;
        if let Err(e) = self.writer.serialize(ImuRow::from(&reading)) {
            warn!(serial = self.inner.serial(), error = %e, "failed to record IMU reading");
        }
        Some(reading)
    }

    fn set_leds(&mut self, color: RgbColor) {
        self.inner.set_leds(color);
    }

    fn set_rumble(&mut self, strength: u8) {
        self.inner.set_rumble(strength);
    }

    fn flush_outputs(&mut self) -> anyhow::Result<()> {
        self.writer.flush()?;
        self.inner.flush_outputs()
    }
}

/// Plays back a recorded IMU stream.
pub struct ReplayImu {
    serial: String,
    readings: Vec<ImuReading>,
    next: usize,
    /// Pace readings by their timestamps; otherwise one reading per poll.
    paced: bool,
    started: Option<Instant>,
}

impl ReplayImu {
    pub fn new(serial: impl Into<String>, readings: Vec<ImuReading>) -> Self {
        Self {
            serial: serial.into(),
            readings,
            next: 0,
            paced: true,
            started: None,
        }
    }

    pub fn open(root: &Path, serial: &str) -> Result<Self> {
        let readings = load_imu_readings(&imu_recording_path(root, serial))?;
        Ok(Self::new(serial, readings))
    }

    /// Every recording under `<root>/imu`, serials restored from file names.
    pub fn open_all(root: &Path) -> Result<Vec<Self>> {
        let dir = root.join(IMU_DIR);
        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        paths.sort();

        paths
            .iter()
            .map(|path| {
                let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
                let serial = stem.replace('-', ":");
                Ok(Self::new(serial, load_imu_readings(path)?))
            })
            .collect()
    }

    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    pub fn remaining(&self) -> usize {
        self.readings.len() - self.next
    }
}

impl ImuDevice for ReplayImu {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn connection(&self) -> ConnectionType {
        ConnectionType::Bluetooth
    }

    fn poll(&mut self) -> Option<ImuReading> {
        let reading = *self.readings.get(self.next)?;
        if self.paced {
            let first_ts = self.readings[0].timestamp_ms;
            let started = *self.started.get_or_insert_with(Instant::now);
            let due = Duration::from_millis(reading.timestamp_ms.saturating_sub(first_ts));
            if started.elapsed() < due {
                return None;
            }
        }
        self.next += 1;
        Some(reading)
    }

    fn set_leds(&mut self, _color: RgbColor) {}

    fn set_rumble(&mut self, _strength: u8) {}

    fn flush_outputs(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Wraps a camera and writes every grabbed frame as a numbered PNG.
pub struct RecordingCamera<S> {
    inner: S,
    dir: PathBuf,
    index: usize,
}

impl<S: FrameSource> RecordingCamera<S> {
    pub fn create(inner: S, root: &Path, camera_id: usize) -> Result<Self> {
        let dir = camera_dir(root, camera_id);
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        info!(path = %dir.display(), "recording frames");
        Ok(Self { inner, dir, index: 0 })
    }
}

impl<S: FrameSource> FrameSource for RecordingCamera<S> {
    fn frame_size(&self) -> (u32, u32) {
        self.inner.frame_size()
    }

    fn grab(&mut self) -> Result<RgbImage> {
        let frame = self.inner.grab()?;
        let path = self.dir.join(format!("{:06}.png", self.index));
        frame
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        self.index += 1;
        Ok(frame)
    }

    fn set_exposure(&mut self, mode: ExposureMode) {
        self.inner.set_exposure(mode);
    }
}

/// Plays back a directory of PNG frames in file-name order, looping at the end.
pub struct PngSequence {
    frames: Vec<PathBuf>,
    size: (u32, u32),
    next: usize,
    frame_interval: Option<Duration>,
    last_frame: Option<Instant>,
}

impl PngSequence {
    pub fn open(root: &Path, camera_id: usize) -> Result<Self> {
        let dir = camera_dir(root, camera_id);
        let mut frames: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        frames.sort();

        let Some(first) = frames.first() else {
            bail!("no frames in {}", dir.display());
        };
        let size = image::image_dimensions(first).with_context(|| format!("Failed to read {}", first.display()))?;
        debug!(camera = camera_id, frames = frames.len(), "opened frame sequence");

        Ok(Self {
            frames,
            size,
            next: 0,
            frame_interval: None,
            last_frame: None,
        })
    }

    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_interval = (fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps));
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for PngSequence {
    fn frame_size(&self) -> (u32, u32) {
        self.size
    }

    fn grab(&mut self) -> Result<RgbImage> {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());

        let path = &self.frames[self.next];
        self.next = (self.next + 1) % self.frames.len();
        let frame = image::open(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
            .to_rgb8();
        Ok(frame)
    }

    // recorded exposure is fixed
    fn set_exposure(&mut self, _mode: ExposureMode) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::synthetic::{SyntheticImu, default_scene, synthetic_rig};
    use approx::assert_relative_eq;

    #[test]
    fn test_imu_record_then_replay() {
        let dir = tempfile::tempdir().unwrap();
        let imu = SyntheticImu::new("00:06:f7:c9:a1:0b").with_period(Duration::ZERO);
        *imu.handle().buttons.lock() = Buttons::SELECT;
        let mut recording = RecordingImu::create(imu, dir.path()).unwrap();

        let recorded: Vec<ImuReading> = (0..5).filter_map(|_| recording.poll()).collect();
        assert_eq!(recorded.len(), 5);
        recording.flush_outputs().unwrap();
        drop(recording);

        let mut replay = ReplayImu::open_all(dir.path()).unwrap().remove(0).unpaced();
        assert_eq!(replay.serial(), "00:06:f7:c9:a1:0b");
        assert_eq!(replay.remaining(), 5);

        let first = replay.poll().unwrap();
        assert_eq!(first.timestamp_ms, recorded[0].timestamp_ms);
        assert_eq!(first.buttons, Buttons::SELECT);
        assert_relative_eq!(first.samples[1].accel, recorded[0].samples[1].accel, epsilon = 1e-6);

        let rest: Vec<_> = std::iter::from_fn(|| replay.poll()).collect();
        assert_eq!(rest.len(), 4);
        assert!(replay.poll().is_none());
    }

    #[test]
    fn test_png_sequence_loops() {
        let dir = tempfile::tempdir().unwrap();
        let scene = default_scene();
        let mut rig = synthetic_rig(&scene, 0.0, None).unwrap();
        rig.set_exposure(ExposureMode::Dark);
        let (sources, _) = rig.into_parts();

        let mut recorded = Vec::new();
        for (camera_id, source) in sources.into_iter().enumerate() {
            let mut camera = RecordingCamera::create(source, dir.path(), camera_id).unwrap();
            recorded.push(camera.grab().unwrap());
            camera.grab().unwrap();
        }

        let mut replay = PngSequence::open(dir.path(), 0).unwrap();
        assert_eq!(replay.len(), 2);
        assert_eq!(replay.frame_size(), (640, 480));
        let first = replay.grab().unwrap();
        assert_eq!(first, recorded[0]);
        replay.grab().unwrap();
        // wraps around
        assert_eq!(replay.grab().unwrap(), recorded[0]);
    }

    #[test]
    fn test_missing_sequence_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PngSequence::open(dir.path(), 0).is_err());
        assert!(ReplayImu::open_all(dir.path()).is_err());
    }
}
