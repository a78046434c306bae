use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use taurus_tracker::calibration::CalibrationStore;
use taurus_tracker::config::{CONFIG_FILENAME, TaurusConfig};
use taurus_tracker::controller::{ControllerSet, RgbColor};
use taurus_tracker::hardware::synthetic::{SyntheticImu, default_scene, synthetic_rig};
use taurus_tracker::hardware::{CameraRig, FrameSource, ImuDevice};
use taurus_tracker::io::{PngSequence, RecordingCamera, RecordingImu, ReplayImu};
use taurus_tracker::system::TrackingSystem;

/// Cameras expected by the live and replay rigs.
const CAMERA_COUNT: usize = 2;
const CAMERA_FPS: f64 = 60.0;
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Dual-camera optical + inertial controller tracker.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (defaults to `<data-dir>/config.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Calibration data directory, overrides the config file.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run against a simulated rig and controllers.
    #[arg(long, conflicts_with = "replay")]
    simulate: bool,

    /// Replay a recorded session directory.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Record frames and IMU readings into this directory.
    #[arg(long)]
    record: Option<PathBuf>,

    /// Stop after this many seconds instead of running until killed.
    #[arg(long)]
    duration_secs: Option<f64>,

    /// Log filter, e.g. `debug` or `taurus_tracker=trace`. Overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(cli: Cli) -> Result<()> {
    let data_dir = cli.data_dir.clone().unwrap_or_else(|| TaurusConfig::default().data_dir);
    let config_path = cli.config.clone().unwrap_or_else(|| data_dir.join(CONFIG_FILENAME));
    let mut config = TaurusConfig::load(&config_path)?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    let store = CalibrationStore::new(&config.data_dir);

    let (mut rig, mut devices) = if cli.simulate {
        simulated(&config)?
    } else if let Some(dir) = &cli.replay {
        replayed(dir, &store)?
    } else {
        live(&config, &store)?
    };

    if let Some(dir) = &cli.record {
        (rig, devices) = recording(rig, devices, dir)?;
    }

    let controllers = connect_controllers(&config, &store, devices)?;
    let mut system = TrackingSystem::start(rig, controllers, &config)?;

    let started = Instant::now();
    let deadline = cli.duration_secs.map(Duration::from_secs_f64);
    while deadline.map_or(true, |d| started.elapsed() < d) {
        thread::sleep(STATUS_LOG_INTERVAL);
        log_status(&system);
    }

    system.shutdown();
    Ok(())
}

fn log_status(system: &TrackingSystem) {
    let shared = system.shared_state();
    let poses = shared.poses.read().clone();
    for (index, pose) in poses.iter().enumerate() {
        info!(
            controller = index,
            state = ?pose.state,
            x = pose.position.x,
            y = pose.position.y,
            z = pose.position.z,
            "pose"
        );
    }
    info!(optical_fps = shared.optical_fps(), "status");
}

type Hardware = (CameraRig, Vec<Box<dyn ImuDevice>>);

/// Expected serials, or two placeholder serials when none are configured.
fn controller_serials(config: &TaurusConfig) -> Vec<String> {
    let expected: Vec<String> = config.expected_controllers().into_iter().map(|(s, _)| s).collect();
    if expected.is_empty() {
        vec!["00:00:00:00:00:01".into(), "00:00:00:00:00:02".into()]
    } else {
        expected
    }
}

fn simulated(config: &TaurusConfig) -> Result<Hardware> {
    info!("running against the simulated rig");
    let scene = default_scene();
    let rig = synthetic_rig(&scene, 0.5, Some(CAMERA_FPS))?;
    let devices = controller_serials(config)
        .into_iter()
        .map(|serial| Box::new(SyntheticImu::new(serial)) as Box<dyn ImuDevice>)
        .collect();
    Ok((rig, devices))
}

fn replayed(dir: &Path, store: &CalibrationStore) -> Result<Hardware> {
    info!(path = %dir.display(), "replaying recording");
    let mut sources: Vec<Box<dyn FrameSource>> = Vec::with_capacity(CAMERA_COUNT);
    let mut calibrations = Vec::with_capacity(CAMERA_COUNT);
    for camera_id in 0..CAMERA_COUNT {
        sources.push(Box::new(PngSequence::open(dir, camera_id)?.with_frame_rate(CAMERA_FPS)));
        calibrations.push(store.load_camera(camera_id));
    }
    let devices = ReplayImu::open_all(dir)?
        .into_iter()
        .map(|d| Box::new(d) as Box<dyn ImuDevice>)
        .collect();
    Ok((CameraRig::new(sources, calibrations)?, devices))
}

#[cfg(feature = "opencv-capture")]
fn live(config: &TaurusConfig, store: &CalibrationStore) -> Result<Hardware> {
    use taurus_tracker::hardware::opencv_capture::OpencvCamera;

    let cameras = OpencvCamera::open_all(CAMERA_COUNT as i32, 640, 480, CAMERA_FPS)?;
    let sources = cameras.into_iter().map(|c| Box::new(c) as Box<dyn FrameSource>).collect();
    let calibrations = (0..CAMERA_COUNT).map(|i| store.load_camera(i)).collect();

    tracing::warn!("no controller IMU backend available, positions hold still between optical fixes");
    let devices = controller_serials(config)
        .into_iter()
        .map(|serial| Box::new(SyntheticImu::new(serial)) as Box<dyn ImuDevice>)
        .collect();
    Ok((CameraRig::new(sources, calibrations)?, devices))
}

#[cfg(not(feature = "opencv-capture"))]
fn live(_config: &TaurusConfig, _store: &CalibrationStore) -> Result<Hardware> {
    anyhow::bail!("built without camera support, use --simulate or --replay (or enable `opencv-capture`)")
}

fn recording(rig: CameraRig, devices: Vec<Box<dyn ImuDevice>>, dir: &Path) -> Result<Hardware> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let (sources, calibrations) = rig.into_parts();
    let sources = sources
        .into_iter()
        .enumerate()
        .map(|(i, s)| Ok(Box::new(RecordingCamera::create(s, dir, i)?) as Box<dyn FrameSource>))
        .collect::<Result<Vec<_>>>()?;
    let devices = devices
        .into_iter()
        .map(|d| Ok(Box::new(RecordingImu::create(d, dir)?) as Box<dyn ImuDevice>))
        .collect::<Result<Vec<_>>>()?;
    Ok((CameraRig::new(sources, calibrations)?, devices))
}

/// Allocate expected controllers, connect devices and assign LED colours.
fn connect_controllers(
    config: &TaurusConfig,
    store: &CalibrationStore,
    devices: Vec<Box<dyn ImuDevice>>,
) -> Result<ControllerSet> {
    let mut controllers = ControllerSet::new(config.ahrs_beta);
    let mut colors: Vec<String> = Vec::new();
    for (serial, color) in config.expected_controllers() {
        controllers.allocate(&serial, store.load_controller(&serial));
        colors.push(color);
    }

    for device in devices {
        let serial = device.serial().to_string();
        let index = controllers.connect(device)?;
        let color = colors
            .get(index)
            .cloned()
            .unwrap_or_else(|| fallback_color(config, index));
        if let Some(shared) = controllers.get(&serial) {
            shared.set_color(&color);
        }
        info!(%serial, index, %color, "controller ready");
    }
    Ok(controllers)
}

/// Left/right colours first, then the remaining named colours.
fn fallback_color(config: &TaurusConfig, index: usize) -> String {
    let mut names = vec![config.left_controller_color.clone(), config.right_controller_color.clone()];
    let rest: Vec<String> = RgbColor::names()
        .filter(|n| *n != "off" && !names.iter().any(|c| c.as_str() == *n))
        .map(String::from)
        .collect();
    names.extend(rest);
    names[index % names.len()].clone()
}
