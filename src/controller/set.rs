//! The set of controllers the tracker knows about.
//!
//! Controllers are *allocated* when their serial is expected (from the
//! config) or when an unknown one connects, and *connected* once a device is
//! attached. Allocation order is the tracking index used everywhere else.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::controller::{Controller, ControllerShared};
use crate::hardware::ImuDevice;
use crate::imu::{AhrsEstimator, ImuCalibration};

/// Pause between update passes of a controller thread.
const UPDATE_SLEEP: Duration = Duration::from_millis(1);

struct UpdateWorker {
    serial: String,
    running: Arc<AtomicBool>,
    handle: JoinHandle<Controller>,
}

pub struct ControllerSet {
    beta: f32,
    allocated: Vec<String>,
    connected: Vec<String>,
    shared: HashMap<String, Arc<ControllerShared>>,
    /// Controllers not currently owned by an update thread.
    idle: HashMap<String, Controller>,
    workers: Vec<UpdateWorker>,
}

impl ControllerSet {
    pub fn new(beta: f32) -> Self {
        Self {
            beta,
            allocated: Vec::new(),
            connected: Vec::new(),
            shared: HashMap::new(),
            idle: HashMap::new(),
            workers: Vec::new(),
        }
    }

    /// Reserve a tracking slot for `serial`. Returns its index.
    pub fn allocate(&mut self, serial: &str, calibration: ImuCalibration) -> usize {
        if let Some(index) = self.index_of(serial) {
            return index;
        }
        let shared = Arc::new(ControllerShared::new(serial, AhrsEstimator::controller_rest_orientation()));
        let controller = Controller::new(Arc::clone(&shared), calibration, self.beta);
        self.shared.insert(serial.to_string(), shared);
        self.idle.insert(serial.to_string(), controller);
        self.allocated.push(serial.to_string());
        self.allocated.len() - 1
    }

    /// Attach a device, allocating a slot if its serial was not expected.
    pub fn connect(&mut self, device: Box<dyn ImuDevice>) -> anyhow::Result<usize> {
        let serial = device.serial().to_string();
        let index = match self.index_of(&serial) {
            Some(index) => index,
            None => {
                warn!(%serial, "unexpected controller connected, allocating a new slot");
                self.allocate(&serial, ImuCalibration::default())
            }
        };
        let controller = self
            .idle
            .get_mut(&serial)
            .ok_or_else(|| anyhow::anyhow!("controller {serial} is busy on its update thread"))?;
        controller.connect(device);
        if !self.connected.contains(&serial) {
            self.connected.push(serial.clone());
        }
        info!(%serial, index, "connected controller");
        Ok(index)
    }

    pub fn allocated_serials(&self) -> &[String] {
        &self.allocated
    }

    pub fn connected_serials(&self) -> &[String] {
        &self.connected
    }

    pub fn index_of(&self, serial: &str) -> Option<usize> {
        self.allocated.iter().position(|s| s == serial)
    }

    pub fn get(&self, serial: &str) -> Option<&Arc<ControllerShared>> {
        self.shared.get(serial)
    }

    /// Shared handles in tracking-index order.
    pub fn shared_in_order(&self) -> Vec<Arc<ControllerShared>> {
        self.allocated
            .iter()
            .filter_map(|s| self.shared.get(s).cloned())
            .collect()
    }

    /// Shared handles of connected controllers, in connection order.
    pub fn connected_in_order(&self) -> Vec<Arc<ControllerShared>> {
        self.connected
            .iter()
            .filter_map(|s| self.shared.get(s).cloned())
            .collect()
    }

    /// Run one update pass on every idle controller from the calling thread.
    pub fn update_idle(&mut self, now: Instant) {
        for controller in self.idle.values_mut() {
            controller.update(now);
        }
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// One update thread per connected controller.
    pub fn start_update_threads(&mut self) -> anyhow::Result<()> {
        for serial in &self.connected {
            let Some(mut controller) = self.idle.remove(serial) else {
                continue;
            };
            let running = Arc::new(AtomicBool::new(true));
            let flag = Arc::clone(&running);
            let handle = thread::Builder::new()
                .name(format!("controller-{serial}"))
                .spawn(move || {
                    while flag.load(Ordering::SeqCst) {
                        controller.update(Instant::now());
                        thread::sleep(UPDATE_SLEEP);
                    }
                    controller
                })?;
            self.workers.push(UpdateWorker {
                serial: serial.clone(),
                running,
                handle,
            });
        }
        info!(threads = self.workers.len(), "started controller update threads");
        Ok(())
    }

    pub fn stop_update_threads(&mut self) {
        for worker in &self.workers {
            worker.running.store(false, Ordering::SeqCst);
        }
        for worker in self.workers.drain(..) {
            match worker.handle.join() {
                Ok(controller) => {
                    self.idle.insert(worker.serial, controller);
                }
                Err(_) => warn!(serial = %worker.serial, "controller update thread panicked"),
            }
        }
    }

    pub fn disconnect_all(&mut self) {
        self.stop_update_threads();
        info!("disconnecting controllers");
        for serial in self.connected.drain(..) {
            if let Some(controller) = self.idle.get_mut(&serial) {
                controller.disconnect();
            }
        }
    }
}

impl Drop for ControllerSet {
    fn drop(&mut self) {
        self.stop_update_threads();
    }
}
