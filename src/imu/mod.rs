//! Inertial processing: orientation estimation and dead reckoning.

pub mod kinematic;
pub mod madgwick;
pub mod sample;

pub use kinematic::{KinematicObject, remove_gravity};
pub use madgwick::{AhrsEstimator, DEFAULT_BETA, MadgwickState, madgwick_update};
pub use sample::{EARTH_GRAVITY_CM, GRAVITY_DIR, GyroCalibrator, ImuCalibration, ImuSample};
