//! UDP link to the VR driver.
//!
//! Two threads share the link: the send loop streams pose and input for every
//! connected controller each tick (plus status at a slower interval), the
//! receive loop handles haptic pulses and tracker-list requests. The receive
//! loop blocks in `recv_from`; stopping it sends [`INTERRUPT_DATAGRAM`] to our
//! own port.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, info, trace, warn};

use super::shared_state::{PoseSnapshot, SharedState};
use crate::calibration::CameraCalibration;
use crate::config::TaurusConfig;
use crate::controller::{ControllerShared, battery_percent, input_events};
use crate::filter::CM_TO_M;
use crate::geometry::{decompose_transform, offset_position};
use crate::protocol::{
    ControllerStatus, DriverMessage, DriverPayload, MAX_DATAGRAM_LEN, Pose, TaurusMessage, TaurusPayload, TrackerInfo,
    decode_driver, encode_taurus,
};

/// Wakes the receive loop so it can observe the stop flag.
pub const INTERRUPT_DATAGRAM: &[u8] = b"equit";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommsConfig {
    pub recv_addr: SocketAddr,
    pub send_addr: SocketAddr,
    pub send_tick: Duration,
    pub status_interval: Duration,
    /// Sphere to grip offset (m).
    pub half_controller_length: f32,
}

impl CommsConfig {
    /// Both ends live on the loopback interface.
    pub fn from_config(config: &TaurusConfig) -> Self {
        Self {
            recv_addr: SocketAddr::from(([127, 0, 0, 1], config.udp_recv_port)),
            send_addr: SocketAddr::from(([127, 0, 0, 1], config.udp_send_port)),
            send_tick: config.send_tick(),
            status_interval: config.status_interval(),
            half_controller_length: config.half_controller_length,
        }
    }
}

/// Controllers and rig data the comms threads report on.
#[derive(Clone)]
pub struct CommsContext {
    /// Connected controllers, index-aligned with the published poses.
    pub connected: Vec<Arc<ControllerShared>>,
    /// Every allocated controller; status goes to all of them.
    pub allocated: Vec<Arc<ControllerShared>>,
    pub trackers: Vec<TrackerInfo>,
}

impl CommsContext {
    fn find(&self, serial: &str) -> Option<&Arc<ControllerShared>> {
        self.allocated.iter().find(|c| c.serial() == serial)
    }
}

/// Camera poses in metres, as reported to the driver.
pub fn tracker_infos(calibrations: &[CameraCalibration]) -> Vec<TrackerInfo> {
    calibrations
        .iter()
        .enumerate()
        .filter_map(|(i, calib)| {
            let Some(extrinsics) = calib.extrinsics else {
                warn!(camera = calib.camera_id, "camera has no world transform, not reported as tracker");
                return None;
            };
            let (rotation, t) = decompose_transform(&extrinsics.world);
            Some(TrackerInfo {
                id: i as u32,
                pose: Pose::new(t.cast::<f32>() * CM_TO_M, rotation.cast::<f32>()),
            })
        })
        .collect()
}

/// Grip pose in VR space for one controller.
pub fn pose_message(controller: &ControllerShared, pose: &PoseSnapshot, half_controller_length: f32) -> TaurusMessage {
    let vr = controller.snapshot().vr_orientation;
    let position = offset_position(&pose.position, &vr, half_controller_length);
    TaurusMessage::new(controller.serial(), TaurusPayload::Pose(Pose::new(position, vr)))
}

pub fn input_message(controller: &ControllerShared) -> TaurusMessage {
    let snapshot = controller.snapshot();
    TaurusMessage::new(controller.serial(), TaurusPayload::Input(input_events(&snapshot)))
}

pub fn status_message(controller: &ControllerShared) -> TaurusMessage {
    let snapshot = controller.snapshot();
    TaurusMessage::new(
        controller.serial(),
        TaurusPayload::Status(ControllerStatus {
            battery_percent: battery_percent(&snapshot),
            is_charging: snapshot.charging,
            is_connected: snapshot.connected,
            is_tracking: snapshot.connected,
        }),
    )
}

/// Act on one driver message and return the reply, if any.
pub fn handle_driver_message(context: &CommsContext, msg: &DriverMessage) -> Option<TaurusMessage> {
    match msg.payload {
        DriverPayload::Haptic(event) => {
            let (duration, amplitude) = event.to_rumble();
            match context.find(&msg.serial) {
                Some(controller) => {
                    debug!(serial = %msg.serial, ?duration, amplitude, "haptic pulse");
                    controller.do_rumble(duration, amplitude);
                }
                None => warn!(serial = %msg.serial, "haptic event for unknown controller"),
            }
            None
        }
        DriverPayload::TrackersRequest => {
            info!(trackers = context.trackers.len(), "tracker list requested");
            Some(TaurusMessage::new(
                "",
                TaurusPayload::TrackersAnswer(context.trackers.clone()),
            ))
        }
    }
}

struct Outbox {
    socket: UdpSocket,
    target: SocketAddr,
}

impl Outbox {
    fn send(&self, msg: &TaurusMessage) {
        let bytes = match encode_taurus(msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(serial = %msg.serial, error = %e, "failed to encode message");
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&bytes, self.target) {
            trace!(error = %e, "send failed");
        }
    }
}

/// Bound sockets, ready to spawn the comms threads.
pub struct Comms {
    recv_socket: UdpSocket,
    send_socket: UdpSocket,
    config: CommsConfig,
    context: CommsContext,
}

impl Comms {
    pub fn bind(config: CommsConfig, context: CommsContext) -> anyhow::Result<Self> {
        let recv_socket =
            UdpSocket::bind(config.recv_addr).with_context(|| format!("failed to bind {}", config.recv_addr))?;
        let send_socket = UdpSocket::bind(SocketAddr::from(([127, 0, 0, 1], 0))).context("failed to bind send socket")?;
        Ok(Self {
            recv_socket,
            send_socket,
            config,
            context,
        })
    }

    /// Actual receive address (resolves port 0).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.recv_socket.local_addr()?)
    }

    pub fn spawn(self, shared: Arc<SharedState>) -> anyhow::Result<CommsHandle> {
        let recv_addr = self.local_addr()?;
        let send_outbox = Outbox {
            socket: self.send_socket.try_clone()?,
            target: self.config.send_addr,
        };
        let reply_outbox = Outbox {
            socket: self.send_socket.try_clone()?,
            target: self.config.send_addr,
        };

        shared.set_comms_active(true);

        let send_thread = {
            let shared = Arc::clone(&shared);
            let context = self.context.clone();
            let config = self.config;
            thread::Builder::new()
                .name("comms-send".into())
                .spawn(move || send_loop(&send_outbox, &context, &config, &shared))?
        };
        let recv_thread = {
            let shared = Arc::clone(&shared);
            let context = self.context;
            let socket = self.recv_socket;
            thread::Builder::new()
                .name("comms-recv".into())
                .spawn(move || recv_loop(&socket, &reply_outbox, &context, &shared))?
        };

        info!(recv = %recv_addr, send = %self.config.send_addr, "comms started");
        Ok(CommsHandle {
            shared,
            recv_addr,
            interrupt_socket: self.send_socket,
            send_thread: Some(send_thread),
            recv_thread: Some(recv_thread),
        })
    }
}

fn send_loop(outbox: &Outbox, context: &CommsContext, config: &CommsConfig, shared: &SharedState) {
    let mut last_status: Option<Instant> = None;
    while shared.is_comms_active() {
        for (index, controller) in context.connected.iter().enumerate() {
            if !controller.is_connected() {
                continue;
            }
            let pose = shared.pose(index).unwrap_or_default();
            outbox.send(&pose_message(controller, &pose, config.half_controller_length));
            outbox.send(&input_message(controller));
        }

        let now = Instant::now();
        if last_status.map_or(true, |last| now.duration_since(last) >= config.status_interval) {
            for controller in &context.allocated {
                outbox.send(&status_message(controller));
            }
            last_status = Some(now);
        }

        thread::sleep(config.send_tick);
    }
    debug!("comms send loop stopped");
}

fn recv_loop(socket: &UdpSocket, outbox: &Outbox, context: &CommsContext, shared: &SharedState) {
    let mut buf = [0u8; MAX_DATAGRAM_LEN];
    while shared.is_comms_active() {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _)) => len,
            Err(e) => {
                if shared.is_comms_active() {
                    warn!(error = %e, "receive failed");
                }
                continue;
            }
        };

        let datagram = &buf[..len];
        if datagram == INTERRUPT_DATAGRAM {
            info!("received interrupt datagram");
            break;
        }

        match decode_driver(datagram) {
            Ok(msg) => {
                if let Some(reply) = handle_driver_message(context, &msg) {
                    outbox.send(&reply);
                }
            }
            Err(e) => warn!(len, error = %e, "invalid driver message"),
        }
    }
    debug!("comms recv loop stopped");
}

/// Running comms threads. Dropping the handle stops them.
pub struct CommsHandle {
    shared: Arc<SharedState>,
    recv_addr: SocketAddr,
    interrupt_socket: UdpSocket,
    send_thread: Option<JoinHandle<()>>,
    recv_thread: Option<JoinHandle<()>>,
}

impl CommsHandle {
    pub fn recv_addr(&self) -> SocketAddr {
        self.recv_addr
    }

    pub fn stop(&mut self) {
        if self.send_thread.is_none() && self.recv_thread.is_none() {
            return;
        }
        self.shared.set_comms_active(false);

        if let Err(e) = self.interrupt_socket.send_to(INTERRUPT_DATAGRAM, self.recv_addr) {
            warn!(error = %e, "failed to interrupt receive loop");
        }

        for handle in [self.send_thread.take(), self.recv_thread.take()].into_iter().flatten() {
            if handle.join().is_err() {
                warn!("comms thread panicked");
            }
        }
        info!("comms stopped");
    }
}

impl Drop for CommsHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
