pub mod calibration;
pub mod config;
pub mod controller;
pub mod filter;
pub mod geometry;
pub mod hardware;
pub mod imu;
pub mod io;
pub mod protocol;
pub mod system;
pub mod tracking;
#[cfg(feature = "viz")]
pub mod viz;
