//! Rerun-based live preview of the tracker.
//!
//! Entity hierarchy:
//!     status                 - Optical rate and per-controller tracking state
//!     camera_{i}/
//!         roi                - Search window per controller
//!         blobs              - Detected blob circles
//!     world/
//!         optical            - Last triangulated positions (cm)
//!         fused              - Filter output (m)
//!     plots/
//!         optical_fps        - Temporal plot

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use rerun::RecordingStream;
use tracing::{info, warn};

use crate::system::{ObjectView, PoseSnapshot, SharedState};
use crate::tracking::TrackingState;

/// Preview refresh period.
const PREVIEW_INTERVAL: Duration = Duration::from_millis(33);

/// One colour per controller slot.
const PALETTE: [[u8; 3]; 4] = [[200, 60, 255], [0, 220, 255], [255, 140, 0], [80, 255, 80]];

pub struct RerunPreview {
    rec: RecordingStream,
    annotate: bool,
    started: Instant,
}

impl RerunPreview {
    pub fn new(app_name: &str, annotate: bool) -> anyhow::Result<Self> {
        // Runs rerun viewer in a separate process
        let rec = rerun::RecordingStreamBuilder::new(app_name)
            .spawn()
            .context("failed to spawn rerun viewer")?;

        // Poses are reported y-up
        rec.log_static("world", &rerun::ViewCoordinates::RUB()).ok();

        Ok(Self {
            rec,
            annotate,
            started: Instant::now(),
        })
    }

    pub fn set_time(&self) {
        self.rec.set_duration_secs("time", self.started.elapsed().as_secs_f64());
    }

    pub fn log_status(&self, poses: &[PoseSnapshot], optical_fps: u32) {
        let states: Vec<String> = poses
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let state = match p.state {
                    TrackingState::AwaitingOptical => "**WAITING**",
                    TrackingState::DeadReckoning => "**IMU**",
                    TrackingState::Fused => "**OK**",
                };
                format!("#{i}: {state}")
            })
            .collect();
        let text = format!("Optical: {optical_fps} fps | {}", states.join(" | "));
        self.rec
            .log(
                "status",
                &rerun::TextDocument::new(text).with_media_type(rerun::MediaType::markdown()),
            )
            .ok();
        self.rec
            .log("plots/optical_fps", &rerun::Scalars::new([optical_fps as f64]))
            .ok();
    }

    /// ROIs and blob circles per camera.
    pub fn log_detections(&self, views: &[ObjectView]) {
        let camera_count = views.iter().map(|v| v.cameras.len()).max().unwrap_or(0);
        for camera in 0..camera_count {
            let mut mins = Vec::new();
            let mut sizes = Vec::new();
            let mut roi_colors = Vec::new();
            let mut centers = Vec::new();
            let mut radii = Vec::new();
            let mut blob_colors = Vec::new();

            for (index, view) in views.iter().enumerate() {
                let Some(det) = view.cameras.get(camera) else {
                    continue;
                };
                let [r, g, b] = PALETTE[index % PALETTE.len()];
                let color = rerun::Color::from_rgb(r, g, b);

                mins.push([det.roi.x as f32, det.roi.y as f32]);
                sizes.push([det.roi.width as f32, det.roi.height as f32]);
                roi_colors.push(color);

                if det.acquired {
                    centers.push([det.center.x, det.center.y]);
                    radii.push(det.radius);
                    blob_colors.push(color);
                }
            }

            if self.annotate {
                self.rec
                    .log(
                        format!("camera_{camera}/roi"),
                        &rerun::Boxes2D::from_mins_and_sizes(mins, sizes).with_colors(roi_colors),
                    )
                    .ok();
            }
            self.rec
                .log(
                    format!("camera_{camera}/blobs"),
                    &rerun::Points2D::new(centers)
                        .with_radii(radii)
                        .with_colors(blob_colors),
                )
                .ok();
        }
    }

    pub fn log_positions(&self, views: &[ObjectView], poses: &[PoseSnapshot]) {
        let optical: Vec<[f32; 3]> = views
            .iter()
            .filter(|v| v.acquired_3d)
            .map(|v| [v.world.x * 0.01, v.world.y * 0.01, v.world.z * 0.01])
            .collect();
        self.rec
            .log(
                "world/optical",
                &rerun::Points3D::new(optical)
                    .with_radii([0.01])
                    .with_colors([rerun::Color::from_rgb(160, 160, 160)]),
            )
            .ok();

        let (fused, colors): (Vec<[f32; 3]>, Vec<rerun::Color>) = poses
            .iter()
            .enumerate()
            .filter(|(_, p)| p.state.has_position())
            .map(|(i, p)| {
                let [r, g, b] = PALETTE[i % PALETTE.len()];
                ([p.position.x, p.position.y, p.position.z], rerun::Color::from_rgb(r, g, b))
            })
            .unzip();
        self.rec
            .log(
                "world/fused",
                &rerun::Points3D::new(fused).with_radii([0.02]).with_colors(colors),
            )
            .ok();
    }

    /// Log everything currently published in `shared`.
    pub fn log_shared(&self, shared: &SharedState) {
        self.set_time();
        let views = shared.optical_view.read().clone();
        let poses = shared.poses.read().clone();
        self.log_status(&poses, shared.optical_fps());
        self.log_detections(&views);
        self.log_positions(&views, &poses);
    }
}

/// Preview thread polling the shared state.
pub struct PreviewHandle {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PreviewHandle {
    pub fn spawn(shared: Arc<SharedState>, annotate: bool) -> anyhow::Result<Self> {
        let preview = RerunPreview::new("taurus", annotate)?;
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new().name("preview".into()).spawn(move || {
            while flag.load(Ordering::SeqCst) {
                preview.log_shared(&shared);
                thread::sleep(PREVIEW_INTERVAL);
            }
        })?;
        info!("preview started");
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("preview thread panicked");
            }
        }
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
