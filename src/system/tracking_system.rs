//! Tracking system - thread orchestration.
//!
//! `TrackingSystem` owns the controller set and spawns the optical, filter and
//! comms threads. Each loop runs while its flag in [`SharedState`] is set;
//! shutdown clears the flags and joins the threads.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Result;
use crossbeam_channel::bounded;
use tracing::{info, warn};

use super::comms::{Comms, CommsConfig, CommsContext, CommsHandle, tracker_infos};
use super::filter_loop::FilterLoop;
use super::optical_loop::OpticalLoop;
use super::shared_state::SharedState;
use crate::config::TaurusConfig;
use crate::controller::ControllerSet;
use crate::hardware::CameraRig;

/// Capacity of the fix channel between the optical and filter loops.
/// When it is full the optical loop drops fixes instead of blocking.
pub const OPTICAL_CHANNEL_CAPACITY: usize = 16;

pub struct TrackingSystem {
    shared: Arc<SharedState>,
    controllers: ControllerSet,
    optical_handle: Option<JoinHandle<()>>,
    filter_handle: Option<JoinHandle<()>>,
    comms: Option<CommsHandle>,
    #[cfg(feature = "viz")]
    preview: Option<crate::viz::PreviewHandle>,
}

impl TrackingSystem {
    /// Start tracking every connected controller in `controllers`.
    ///
    /// Controllers must already be connected and coloured; their update
    /// threads are started here.
    pub fn start(rig: CameraRig, controllers: ControllerSet, config: &TaurusConfig) -> Result<Self> {
        let connected = controllers.connected_in_order();
        let colors: Vec<String> = connected.iter().map(|c| c.color_name()).collect();
        let shared = SharedState::new(connected.len());

        let comms_context = CommsContext {
            connected: connected.clone(),
            allocated: controllers.shared_in_order(),
            trackers: tracker_infos(rig.calibrations()),
        };

        let mut system = Self {
            shared: Arc::clone(&shared),
            controllers,
            optical_handle: None,
            filter_handle: None,
            comms: None,
            #[cfg(feature = "viz")]
            preview: None,
        };
        system.controllers.start_update_threads()?;

        let (fix_sender, fix_receiver) = bounded(OPTICAL_CHANNEL_CAPACITY);

        let optical = OpticalLoop::new(rig, &colors, config.detector, fix_sender);
        shared.set_optical_active(true);
        system.optical_handle = Some({
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("optical".into())
                .spawn(move || optical.run(shared))?
        });

        let filter = FilterLoop::new(&config.fusion(), connected, fix_receiver, config.filter_tick());
        shared.set_filter_active(true);
        system.filter_handle = Some({
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("filter".into())
                .spawn(move || filter.run(shared))?
        });

        if config.comms_enabled {
            let comms = Comms::bind(CommsConfig::from_config(config), comms_context)?;
            system.comms = Some(comms.spawn(Arc::clone(&shared))?);
        }

        #[cfg(feature = "viz")]
        if config.show_preview {
            match crate::viz::PreviewHandle::spawn(Arc::clone(&shared), config.annotate_preview) {
                Ok(preview) => system.preview = Some(preview),
                Err(e) => warn!("preview unavailable: {e:#}"),
            }
        }

        info!(controllers = colors.len(), "tracking system started");
        Ok(system)
    }

    /// Shared state for readers such as previews and tests.
    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn controllers(&self) -> &ControllerSet {
        &self.controllers
    }

    /// Stop every thread in reverse start order.
    pub fn shutdown(&mut self) {
        if let Some(mut comms) = self.comms.take() {
            comms.stop();
        }

        #[cfg(feature = "viz")]
        if let Some(mut preview) = self.preview.take() {
            preview.stop();
        }

        self.shared.set_filter_active(false);
        if let Some(handle) = self.filter_handle.take() {
            if handle.join().is_err() {
                warn!("filter thread panicked");
            }
        }

        self.shared.set_optical_active(false);
        if let Some(handle) = self.optical_handle.take() {
            if handle.join().is_err() {
                warn!("optical thread panicked");
            }
        }

        if self.controllers.is_running() {
            self.controllers.stop_update_threads();
            info!("tracking system stopped");
        }
    }
}

impl Drop for TrackingSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
