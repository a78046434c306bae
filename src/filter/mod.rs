//! Fusion of optical fixes with inertial dead reckoning.

pub mod fusion;
pub mod lowpass;

pub use fusion::{CM_TO_M, FusedTrack, FusionConfig, FusionStage};
pub use lowpass::{LowpassFilter, LowpassStrategy, adaptive_lowpass_filter, adaptive_weight, lowpass_filter};
