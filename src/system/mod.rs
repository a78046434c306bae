//! Tracking system orchestration and thread management.
//!
//! This module contains the top-level `TrackingSystem` that spawns and
//! coordinates the optical, filter and comms threads, along with shared state
//! and inter-thread messaging types.

pub mod comms;
pub mod filter_loop;
pub mod messages;
pub mod optical_loop;
pub mod shared_state;
mod tracking_system;

pub use comms::{Comms, CommsConfig, CommsContext, CommsHandle};
pub use filter_loop::FilterLoop;
pub use messages::OpticalFix;
pub use optical_loop::OpticalLoop;
pub use shared_state::{CameraDetection, ObjectView, PoseSnapshot, SharedState};
pub use tracking_system::{OPTICAL_CHANNEL_CAPACITY, TrackingSystem};
