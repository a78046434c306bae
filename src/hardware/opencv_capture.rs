//! Camera capture through OpenCV's `VideoCapture`.
//!
//! Frames arrive as BGR `Mat`s and are converted to `RgbImage` here; nothing
//! past this module sees an OpenCV type.

use anyhow::{Context, Result, bail};
use image::RgbImage;
use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};
use tracing::{info, warn};

use super::{ExposureMode, FrameSource};

/// V4L encodes manual/auto exposure as these magic values.
const V4L_MANUAL_EXPOSURE: f64 = 0.25;
const V4L_AUTO_EXPOSURE: f64 = 0.75;

/// Exposure used in dark mode so that only the lit spheres remain.
const DARK_EXPOSURE: f64 = 10.0;
const AUTO_EXPOSURE: f64 = 120.0;

pub struct OpencvCamera {
    index: i32,
    capture: VideoCapture,
    frame: Mat,
    cols: u32,
    rows: u32,
}

impl OpencvCamera {
    pub fn open(index: i32, cols: u32, rows: u32, fps: f64) -> Result<Self> {
        let mut capture =
            VideoCapture::new(index, videoio::CAP_ANY).with_context(|| format!("failed to open camera {index}"))?;
        if !capture.is_opened()? {
            bail!("camera {index} is not available");
        }
        capture.set(videoio::CAP_PROP_FRAME_WIDTH, cols as f64)?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, rows as f64)?;
        capture.set(videoio::CAP_PROP_FPS, fps)?;

        let cols = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let rows = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        info!(camera = index, cols, rows, "opened camera");

        Ok(Self {
            index,
            capture,
            frame: Mat::default(),
            cols,
            rows,
        })
    }

    /// Open cameras `0..count`.
    pub fn open_all(count: i32, cols: u32, rows: u32, fps: f64) -> Result<Vec<Self>> {
        (0..count).map(|i| Self::open(i, cols, rows, fps)).collect()
    }

    fn apply_exposure(&mut self, mode: ExposureMode) -> opencv::Result<()> {
        match mode {
            ExposureMode::Auto => {
                self.capture.set(videoio::CAP_PROP_AUTO_EXPOSURE, V4L_AUTO_EXPOSURE)?;
                self.capture.set(videoio::CAP_PROP_EXPOSURE, AUTO_EXPOSURE)?;
            }
            ExposureMode::Dark => {
                self.capture.set(videoio::CAP_PROP_AUTO_EXPOSURE, V4L_MANUAL_EXPOSURE)?;
                self.capture.set(videoio::CAP_PROP_GAIN, 0.0)?;
                self.capture.set(videoio::CAP_PROP_EXPOSURE, DARK_EXPOSURE)?;
            }
        }
        Ok(())
    }
}

impl FrameSource for OpencvCamera {
    fn frame_size(&self) -> (u32, u32) {
        (self.cols, self.rows)
    }

    fn grab(&mut self) -> Result<RgbImage> {
        if !self.capture.read(&mut self.frame)? {
            bail!("camera {} returned no frame", self.index);
        }
        bgr_mat_to_rgb(&self.frame)
    }

    fn set_exposure(&mut self, mode: ExposureMode) {
        if let Err(e) = self.apply_exposure(mode) {
            warn!(camera = self.index, ?mode, error = %e, "failed to set exposure");
        }
    }
}

fn bgr_mat_to_rgb(mat: &Mat) -> Result<RgbImage> {
    if mat.channels() != 3 {
        bail!("expected a 3-channel frame, got {}", mat.channels());
    }
    let (cols, rows) = (mat.cols() as u32, mat.rows() as u32);
    let data = if mat.is_continuous() {
        mat.data_bytes()?.to_vec()
    } else {
        mat.try_clone()?.data_bytes()?.to_vec()
    };

    let mut rgb = data;
    for px in rgb.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    RgbImage::from_raw(cols, rows, rgb).context("frame buffer has the wrong size")
}
