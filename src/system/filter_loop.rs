//! Filter thread: fuse optical fixes with IMU dead reckoning.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tracing::{debug, info};

use super::messages::OpticalFix;
use super::shared_state::{PoseSnapshot, SharedState};
use crate::controller::ControllerShared;
use crate::filter::{FusionConfig, FusionStage};

pub struct FilterLoop {
    fusion: FusionStage,
    /// Connected controllers, in the same order as the fusion tracks.
    controllers: Vec<Arc<ControllerShared>>,
    fix_receiver: Receiver<OpticalFix>,
    tick: Duration,
    poses: Vec<PoseSnapshot>,
}

impl FilterLoop {
    pub fn new(
        config: &FusionConfig,
        controllers: Vec<Arc<ControllerShared>>,
        fix_receiver: Receiver<OpticalFix>,
        tick: Duration,
    ) -> Self {
        let count = controllers.len();
        Self {
            fusion: FusionStage::new(config, count),
            controllers,
            fix_receiver,
            tick,
            poses: vec![PoseSnapshot::default(); count],
        }
    }

    pub fn fusion(&self) -> &FusionStage {
        &self.fusion
    }

    /// One filter step of `dt` seconds.
    pub fn step(&mut self, dt: f32) -> &[PoseSnapshot] {
        for fix in self.fix_receiver.try_iter() {
            match self.fusion.track_mut(fix.controller) {
                Some(track) => track.accept_fix(fix.world, fix.velocity),
                None => debug!(controller = fix.controller, "fix for unknown controller"),
            }
        }

        for (index, controller) in self.controllers.iter().enumerate() {
            let snapshot = controller.snapshot();
            if !snapshot.connected {
                continue;
            }
            if let Some(track) = self.fusion.track_mut(index) {
                track.update_imu(&snapshot.accel, &snapshot.orientation);
            }
        }

        self.fusion.step(dt);

        // re-centre after stepping so the offset uses this tick's input
        for (index, controller) in self.controllers.iter().enumerate() {
            if controller.take_recenter_request() && self.fusion.recenter_on(index) {
                info!(serial = controller.serial(), offset = ?self.fusion.post_offset(), "re-centred");
            }
        }

        self.poses.clear();
        self.poses.extend(self.fusion.tracks().iter().map(|track| PoseSnapshot {
            state: track.state(),
            position: *track.filtered_position_m(),
            pre_filtered: *track.pre_filtered_position(),
        }));
        &self.poses
    }

    /// Thread body; returns when the filter flag is cleared.
    pub fn run(mut self, shared: Arc<SharedState>) {
        info!(controllers = self.controllers.len(), "filter loop started");
        let mut last_tick = Instant::now();
        while shared.is_filter_active() {
            let now = Instant::now();
            let dt = now.duration_since(last_tick).as_secs_f32();
            last_tick = now;

            let poses = self.step(dt);
            shared.publish_poses(poses);

            thread::sleep(self.tick);
        }
        info!("filter loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imu::AhrsEstimator;
    use crate::tracking::TrackingState;
    use approx::assert_relative_eq;
    use crossbeam_channel::bounded;
    use nalgebra::Vector3;

    fn filter(count: usize) -> (FilterLoop, crossbeam_channel::Sender<OpticalFix>, Vec<Arc<ControllerShared>>) {
        let controllers: Vec<_> = (0..count)
            .map(|i| {
                Arc::new(ControllerShared::new(
                    format!("00:00:00:00:00:0{i}"),
                    AhrsEstimator::controller_rest_orientation(),
                ))
            })
            .collect();
        let (tx, rx) = bounded(8);
        let filter = FilterLoop::new(&FusionConfig::default(), controllers.clone(), rx, Duration::from_millis(1));
        (filter, tx, controllers)
    }

    fn fix(controller: usize, world: Vector3<f32>) -> OpticalFix {
        OpticalFix {
            controller,
            world,
            velocity: Vector3::zeros(),
        }
    }

    #[test]
    fn test_waits_for_first_fix() {
        let (mut filter, _tx, _) = filter(1);
        let poses = filter.step(0.001);
        assert_eq!(poses[0].state, TrackingState::AwaitingOptical);
        assert_eq!(poses[0].position, Vector3::zeros());
    }

    #[test]
    fn test_fix_routed_to_its_controller() {
        let (mut filter, tx, _) = filter(2);
        tx.send(fix(1, Vector3::new(10.0, 150.0, -150.0))).unwrap();

        let poses = filter.step(0.001).to_vec();
        assert_eq!(poses[0].state, TrackingState::AwaitingOptical);
        assert_eq!(poses[1].state, TrackingState::Fused);
        assert_relative_eq!(poses[1].position, Vector3::new(0.1, 1.5, -1.5), epsilon = 1e-5);
        assert_relative_eq!(poses[1].pre_filtered, Vector3::new(10.0, 150.0, -150.0));

        // at rest, the next tick dead-reckons in place
        let poses = filter.step(0.001);
        assert_eq!(poses[1].state, TrackingState::DeadReckoning);
        assert_relative_eq!(poses[1].position, Vector3::new(0.1, 1.5, -1.5), epsilon = 1e-4);
    }

    #[test]
    fn test_recenter_request_moves_origin() {
        let (mut filter, tx, controllers) = filter(1);
        tx.send(fix(0, Vector3::new(10.0, 150.0, -150.0))).unwrap();
        filter.step(0.001);

        controllers[0].request_recenter();
        let poses = filter.step(0.001).to_vec();
        assert_relative_eq!(*filter.fusion().post_offset(), Vector3::new(10.0, 150.0, -150.0), epsilon = 1e-3);
        // the offset applies from the next tick
        assert_relative_eq!(poses[0].position, Vector3::new(0.1, 1.5, -1.5), epsilon = 1e-4);

        let poses = filter.step(0.001);
        assert_relative_eq!(poses[0].position, Vector3::zeros(), epsilon = 1e-4);
        assert!(!controllers[0].take_recenter_request());
    }
}
