//! Gradient-descent AHRS (Madgwick) for accelerometer + gyroscope fusion.
//!
//! The orientation `q` rotates sensor-frame vectors into the world frame, so the
//! gravity direction seen by the sensor is `q⁻¹ · (0, 0, 1)`. Each update
//! integrates the gyro-driven quaternion rate and subtracts a `beta`-weighted
//! step along the normalized gradient of the gravity alignment error.

use std::f32::consts::FRAC_PI_2;

use nalgebra::{Matrix3x4, Quaternion, UnitQuaternion, Vector3};

use super::sample::{ImuCalibration, ImuSample};

/// Default gradient step weight.
pub const DEFAULT_BETA: f32 = 0.035;

/// Orientation filter state for one controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MadgwickState {
    pub orientation: UnitQuaternion<f32>,
    /// Timestamp (ms) of the last accepted reading, `None` right after a reset.
    pub last_sample_ms: Option<u64>,
    /// Reading rate derived from the last timestep, for diagnostics.
    pub freq_estimate: f32,
}

impl MadgwickState {
    pub fn new(orientation: UnitQuaternion<f32>) -> Self {
        Self {
            orientation,
            last_sample_ms: None,
            freq_estimate: 0.0,
        }
    }
}

impl Default for MadgwickState {
    fn default() -> Self {
        Self::new(UnitQuaternion::identity())
    }
}

/// One Madgwick step over `dt` seconds.
///
/// A zero accelerometer vector carries no direction, so only the gyro rate is
/// integrated in that case.
pub fn madgwick_update(
    orientation: &UnitQuaternion<f32>,
    gyro: &Vector3<f32>,
    accel: &Vector3<f32>,
    dt: f32,
    beta: f32,
) -> UnitQuaternion<f32> {
    let q = *orientation.quaternion();
    let mut q_dot = q * Quaternion::from_imag(*gyro) * 0.5;

    let accel_norm = accel.norm();
    if accel_norm > 0.0 {
        let a = accel / accel_norm;
        let (q1, q2, q3, q4) = (q.w, q.i, q.j, q.k);

        // Predicted gravity minus measured gravity
        let f = Vector3::new(
            2.0 * (q2 * q4 - q1 * q3) - a.x,
            2.0 * (q1 * q2 + q3 * q4) - a.y,
            2.0 * (0.5 - q2 * q2 - q3 * q3) - a.z,
        );
        #[rustfmt::skip]
        let jacobian = Matrix3x4::new(
            -2.0 * q3, 2.0 * q4, -2.0 * q1, 2.0 * q2,
             2.0 * q2, 2.0 * q1,  2.0 * q4, 2.0 * q3,
             0.0,     -4.0 * q2, -4.0 * q3, 0.0,
        );
        let step = jacobian.transpose() * f;
        let step_norm = step.norm();
        if step_norm > f32::EPSILON {
            let step = step / step_norm;
            q_dot -= Quaternion::new(step[0], step[1], step[2], step[3]) * beta;
        }
    }

    UnitQuaternion::from_quaternion(q + q_dot * dt)
}

/// Per-controller orientation estimator driven by timestamped IMU readings.
#[derive(Debug, Clone)]
pub struct AhrsEstimator {
    state: MadgwickState,
    initial: UnitQuaternion<f32>,
    beta: f32,
    calibration: ImuCalibration,
}

impl AhrsEstimator {
    /// Controllers are held pointing forward, which is 90 degrees about X from
    /// the sensor's rest frame.
    pub fn controller_rest_orientation() -> UnitQuaternion<f32> {
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), FRAC_PI_2)
    }

    pub fn new(initial: UnitQuaternion<f32>, beta: f32, calibration: ImuCalibration) -> Self {
        Self {
            state: MadgwickState::new(initial),
            initial,
            beta,
            calibration,
        }
    }

    pub fn state(&self) -> &MadgwickState {
        &self.state
    }

    pub fn orientation(&self) -> UnitQuaternion<f32> {
        self.state.orientation
    }

    pub fn set_calibration(&mut self, calibration: ImuCalibration) {
        self.calibration = calibration;
    }

    /// Relevel: return to the initial orientation and forget the last timestamp.
    pub fn reset(&mut self) {
        self.state = MadgwickState::new(self.initial);
    }

    /// Feed one reading made of consecutive half-frames.
    ///
    /// The elapsed time since the previous reading is split evenly across the
    /// half-frames. Returns the gyro-corrected samples that were applied, or an
    /// empty vec when the reading only established the time base or had a
    /// non-positive timestep.
    pub fn update(&mut self, timestamp_ms: u64, samples: &[ImuSample]) -> Vec<ImuSample> {
        let Some(last) = self.state.last_sample_ms else {
            self.state.last_sample_ms = Some(timestamp_ms);
            return Vec::new();
        };

        let elapsed_ms = timestamp_ms.saturating_sub(last);
        if elapsed_ms < 1 || samples.is_empty() {
            return Vec::new();
        }

        let dt = elapsed_ms as f32 / 1000.0;
        let sub_dt = dt / samples.len() as f32;
        self.state.freq_estimate = 1.0 / dt;

        let corrected: Vec<ImuSample> = samples.iter().map(|s| self.calibration.correct(s)).collect();
        for s in &corrected {
            self.state.orientation =
                madgwick_update(&self.state.orientation, &s.gyro, &s.accel, sub_dt, self.beta);
        }
        self.state.last_sample_ms = Some(timestamp_ms);
        corrected
    }
}
