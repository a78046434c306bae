//! Optical + inertial position fusion, one `FusedTrack` per controller.
//!
//! Each tick takes one of two branches:
//! - a new optical fix arrived: it becomes the pre-filter input, the kinematic
//!   integrator restarts from zero with the optically derived velocity
//! - otherwise: the integrator advances by `dt` and `world + kinematic offset`
//!   is the pre-filter input (dead reckoning)
//!
//! The result is low-pass filtered, shifted by the shared post-offset and
//! scaled from centimetres to metres.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use super::lowpass::{LowpassFilter, LowpassStrategy};
use crate::imu::KinematicObject;
use crate::tracking::TrackingState;

/// Internal positions are centimetres; outputs are metres.
pub const CM_TO_M: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub lowpass: LowpassStrategy,
}

#[derive(Debug, Clone)]
pub struct FusedTrack {
    lowpass: LowpassFilter,
    kinematic: KinematicObject,
    state: TrackingState,

    /// Last optical world position (cm).
    world_position: Vector3<f32>,
    optical_velocity: Vector3<f32>,
    new_optical_data_ready: bool,

    pre_filtered_position: Vector3<f32>,
    previous_filtered_position: Vector3<f32>,
    /// Filtered and re-centred (cm).
    filtered_position: Vector3<f32>,
    filtered_position_m: Vector3<f32>,
}

impl FusedTrack {
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            lowpass: LowpassFilter::new(config.lowpass),
            kinematic: KinematicObject::new(),
            state: TrackingState::AwaitingOptical,
            world_position: Vector3::zeros(),
            optical_velocity: Vector3::zeros(),
            new_optical_data_ready: false,
            pre_filtered_position: Vector3::zeros(),
            previous_filtered_position: Vector3::zeros(),
            filtered_position: Vector3::zeros(),
            filtered_position_m: Vector3::zeros(),
        }
    }

    /// Queue an optical fix for the next tick. A newer fix replaces an
    /// unconsumed one.
    pub fn accept_fix(&mut self, world: Vector3<f32>, velocity: Vector3<f32>) {
        self.world_position = world;
        self.optical_velocity = velocity;
        self.new_optical_data_ready = true;
    }

    /// Feed the latest IMU reading into the dead-reckoning integrator.
    pub fn update_imu(&mut self, accel: &Vector3<f32>, orientation: &UnitQuaternion<f32>) {
        self.kinematic.update_imu(accel, orientation);
    }

    /// Run one fusion tick and return the branch taken.
    pub fn step(&mut self, dt: f32, post_offset: &Vector3<f32>) -> TrackingState {
        let first_fix = self.state == TrackingState::AwaitingOptical && self.new_optical_data_ready;
        self.state = self.state.advance(self.new_optical_data_ready);

        match self.state {
            TrackingState::AwaitingOptical => return self.state,
            TrackingState::Fused => {
                self.pre_filtered_position = self.world_position;
                self.kinematic.reset_state();
                self.kinematic.set_velocity(self.optical_velocity);
                self.new_optical_data_ready = false;
            }
            TrackingState::DeadReckoning => {
                self.kinematic.integrate(dt);
                self.pre_filtered_position = self.world_position + self.kinematic.position();
            }
        }

        // Start the filter on the first fix instead of sliding in from the origin
        if first_fix {
            self.previous_filtered_position = self.pre_filtered_position;
        }

        let filtered = self.lowpass.apply(&self.previous_filtered_position, &self.pre_filtered_position);
        self.previous_filtered_position = filtered;

        self.filtered_position = filtered - post_offset;
        self.filtered_position_m = self.filtered_position * CM_TO_M;
        self.state
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn world_position(&self) -> &Vector3<f32> {
        &self.world_position
    }

    pub fn pre_filtered_position(&self) -> &Vector3<f32> {
        &self.pre_filtered_position
    }

    pub fn filtered_position(&self) -> &Vector3<f32> {
        &self.filtered_position
    }

    pub fn filtered_position_m(&self) -> &Vector3<f32> {
        &self.filtered_position_m
    }

    pub fn kinematic(&self) -> &KinematicObject {
        &self.kinematic
    }
}

/// All controllers' tracks plus the shared re-centring offset.
#[derive(Debug, Clone)]
pub struct FusionStage {
    tracks: Vec<FusedTrack>,
    post_offset: Vector3<f32>,
}

impl FusionStage {
    pub fn new(config: &FusionConfig, controller_count: usize) -> Self {
        Self {
            tracks: (0..controller_count).map(|_| FusedTrack::new(config)).collect(),
            post_offset: Vector3::zeros(),
        }
    }

    pub fn tracks(&self) -> &[FusedTrack] {
        &self.tracks
    }

    pub fn track_mut(&mut self, index: usize) -> Option<&mut FusedTrack> {
        self.tracks.get_mut(index)
    }

    pub fn post_offset(&self) -> &Vector3<f32> {
        &self.post_offset
    }

    pub fn set_post_offset(&mut self, offset: Vector3<f32>) {
        self.post_offset = offset;
    }

    /// Make controller `index`'s current pre-filtered position the origin.
    pub fn recenter_on(&mut self, index: usize) -> bool {
        match self.tracks.get(index) {
            Some(track) if track.state.has_position() => {
                self.post_offset = track.pre_filtered_position;
                true
            }
            _ => false,
        }
    }

    pub fn step(&mut self, dt: f32) {
        let offset = self.post_offset;
        for track in &mut self.tracks {
            track.step(dt, &offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn constant() -> FusionConfig {
        FusionConfig {
            lowpass: LowpassStrategy::Constant { alpha: [0.5, 0.5, 0.5] },
        }
    }

    #[test]
    fn test_waits_for_first_fix() {
        let mut track = FusedTrack::new(&FusionConfig::default());
        track.update_imu(&Vector3::new(1.0, 0.0, 1.0), &UnitQuaternion::identity());
        assert_eq!(track.step(0.01, &Vector3::zeros()), TrackingState::AwaitingOptical);
        assert_eq!(*track.filtered_position(), Vector3::zeros());
        assert_eq!(*track.kinematic().position(), Vector3::zeros());
    }

    #[test]
    fn test_first_fix_is_adopted_directly() {
        let mut track = FusedTrack::new(&constant());
        track.accept_fix(Vector3::new(10.0, 20.0, 30.0), Vector3::zeros());
        assert_eq!(track.step(0.001, &Vector3::zeros()), TrackingState::Fused);
        assert_relative_eq!(*track.filtered_position(), Vector3::new(10.0, 20.0, 30.0));
        assert_relative_eq!(*track.filtered_position_m(), Vector3::new(0.1, 0.2, 0.3), epsilon = 1e-6);
    }

    #[test]
    fn test_second_fix_is_blended() {
        let mut track = FusedTrack::new(&constant());
        track.accept_fix(Vector3::zeros(), Vector3::zeros());
        track.step(0.001, &Vector3::zeros());
        track.accept_fix(Vector3::new(10.0, 0.0, 0.0), Vector3::zeros());
        track.step(0.001, &Vector3::zeros());
        assert_relative_eq!(track.filtered_position().x, 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_dead_reckons_from_optical_velocity() {
        let mut track = FusedTrack::new(&constant());
        track.accept_fix(Vector3::new(1.0, 0.0, 0.0), Vector3::new(100.0, 0.0, 0.0));
        track.step(0.001, &Vector3::zeros());

        assert_eq!(track.step(0.01, &Vector3::zeros()), TrackingState::DeadReckoning);
        // gravity-free IMU: velocity carries on at 100 cm/s
        assert_relative_eq!(*track.pre_filtered_position(), Vector3::new(2.0, 0.0, 0.0), epsilon = 1e-5);
    }

    #[test]
    fn test_fix_resets_integrator() {
        let mut track = FusedTrack::new(&constant());
        track.update_imu(&Vector3::new(0.1, 0.0, 1.0), &UnitQuaternion::identity());
        track.accept_fix(Vector3::zeros(), Vector3::zeros());
        track.step(0.001, &Vector3::zeros());
        for _ in 0..10 {
            track.step(0.01, &Vector3::zeros());
        }
        assert!(track.kinematic().position().x > 0.0);

        track.accept_fix(Vector3::new(3.0, 0.0, 0.0), Vector3::zeros());
        track.step(0.001, &Vector3::zeros());
        assert_eq!(*track.kinematic().position(), Vector3::zeros());
        assert_eq!(*track.kinematic().velocity(), Vector3::zeros());
        assert_eq!(*track.pre_filtered_position(), Vector3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn test_recenter_applies_post_offset() {
        let mut stage = FusionStage::new(&constant(), 2);
        assert!(!stage.recenter_on(0));

        stage.track_mut(0).unwrap().accept_fix(Vector3::new(4.0, 5.0, 6.0), Vector3::zeros());
        stage.step(0.001);
        assert!(stage.recenter_on(0));
        assert!(!stage.recenter_on(5));

        stage.step(0.001);
        assert_relative_eq!(*stage.tracks()[0].filtered_position(), Vector3::zeros(), epsilon = 1e-6);
        assert_eq!(stage.tracks()[1].state(), TrackingState::AwaitingOptical);
    }
}
