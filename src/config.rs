//! Runtime configuration loaded from `config.json` in the data directory.
//!
//! Every field has a default, so a missing file or a partial file still yields
//! a usable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::filter::{FusionConfig, LowpassStrategy};
use crate::imu::DEFAULT_BETA;
use crate::tracking::DetectorConfig;

pub const CONFIG_FILENAME: &str = "config.json";

/// Distance from the sphere centre to the controller's grip centre (m).
pub const HALF_CONTROLLER_LENGTH: f32 = 0.08782;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaurusConfig {
    pub left_controller_serial: Option<String>,
    pub right_controller_serial: Option<String>,
    pub left_controller_color: String,
    pub right_controller_color: String,

    pub comms_enabled: bool,
    pub udp_recv_port: u16,
    pub udp_send_port: u16,

    pub show_preview: bool,
    pub annotate_preview: bool,

    pub lowpass: LowpassStrategy,
    pub detector: DetectorConfig,

    pub ahrs_beta: f32,
    pub half_controller_length: f32,

    pub filter_tick_ms: u64,
    pub send_tick_ms: u64,
    pub status_interval_ms: u64,

    /// Root of `Cameras/` and `Controllers/` calibration records.
    pub data_dir: PathBuf,
}

impl Default for TaurusConfig {
    fn default() -> Self {
        Self {
            left_controller_serial: None,
            right_controller_serial: None,
            left_controller_color: "purple".into(),
            right_controller_color: "cyan".into(),
            comms_enabled: true,
            udp_recv_port: 6969,
            udp_send_port: 6970,
            show_preview: false,
            annotate_preview: true,
            lowpass: LowpassStrategy::default(),
            detector: DetectorConfig::default(),
            ahrs_beta: DEFAULT_BETA,
            half_controller_length: HALF_CONTROLLER_LENGTH,
            filter_tick_ms: 1,
            send_tick_ms: 1,
            status_interval_ms: 1000,
            data_dir: PathBuf::from("Taurus_Data"),
        }
    }
}

impl TaurusConfig {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).context("invalid config json")
    }

    /// Load a config file. A missing file is not an error: defaults are used.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::from_json(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// `(serial, colour)` for each configured controller, left first.
    pub fn expected_controllers(&self) -> Vec<(String, String)> {
        [
            (&self.left_controller_serial, &self.left_controller_color),
            (&self.right_controller_serial, &self.right_controller_color),
        ]
        .into_iter()
        .filter_map(|(serial, color)| serial.clone().map(|s| (s, color.clone())))
        .collect()
    }

    pub fn fusion(&self) -> FusionConfig {
        FusionConfig { lowpass: self.lowpass }
    }

    pub fn filter_tick(&self) -> Duration {
        Duration::from_millis(self.filter_tick_ms.max(1))
    }

    pub fn send_tick(&self) -> Duration {
        Duration::from_millis(self.send_tick_ms.max(1))
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = TaurusConfig::from_json(
            r#"{
                "left_controller_serial": "00:06:f7:c9:a1:0b",
                "udp_recv_port": 7000,
                "lowpass": {"kind": "constant", "alpha": [0.4, 0.4, 0.3]},
                "detector": {"roi_size": 200}
            }"#,
        )
        .unwrap();
        assert_eq!(config.udp_recv_port, 7000);
        assert_eq!(config.udp_send_port, 6970);
        assert_eq!(config.detector.roi_size, 200);
        assert_eq!(config.detector.roi_growth, 100);
        assert_eq!(config.lowpass, LowpassStrategy::constant_default());
        assert_eq!(
            config.expected_controllers(),
            vec![("00:06:f7:c9:a1:0b".to_string(), "purple".to_string())]
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TaurusConfig::load(dir.path().join(CONFIG_FILENAME)).unwrap();
        assert_eq!(config, TaurusConfig::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(TaurusConfig::load(&path).is_err());
    }
}
