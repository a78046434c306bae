//! Dead-reckoning integrator for a single tracked object.
//!
//! Position and velocity are relative quantities: they are zeroed every time an
//! optical fix arrives and only carry the motion accumulated since then.
//! Linear acceleration keeps following the IMU and is never reset.

use nalgebra::{UnitQuaternion, Vector3};

use super::sample::{EARTH_GRAVITY_CM, GRAVITY_DIR};

/// Subtract the gravity direction, rotated into the sensor frame, from a raw
/// accelerometer reading (units of g).
pub fn remove_gravity(accel: &Vector3<f32>, orientation: &UnitQuaternion<f32>) -> Vector3<f32> {
    accel - orientation.inverse_transform_vector(&GRAVITY_DIR)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KinematicObject {
    position: Vector3<f32>,
    velocity: Vector3<f32>,
    /// cm/s^2
    linear_acceleration: Vector3<f32>,
}

impl KinematicObject {
    /// At rest at the origin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive linear acceleration from an accelerometer reading and the AHRS
    /// orientation.
    pub fn update_imu(&mut self, accel: &Vector3<f32>, orientation: &UnitQuaternion<f32>) {
        self.linear_acceleration = remove_gravity(accel, orientation) * EARTH_GRAVITY_CM;
    }

    /// Semi-implicit Euler step.
    pub fn integrate(&mut self, dt: f32) {
        self.velocity += self.linear_acceleration * dt;
        self.position += self.velocity * dt;
    }

    /// Zero position and velocity. Acceleration stays IMU-driven.
    pub fn reset_state(&mut self) {
        self.position = Vector3::zeros();
        self.velocity = Vector3::zeros();
    }

    /// Displacement since the last reset (cm).
    pub fn position(&self) -> &Vector3<f32> {
        &self.position
    }

    /// Velocity since the last reset (cm/s).
    pub fn velocity(&self) -> &Vector3<f32> {
        &self.velocity
    }

    /// Gravity-free acceleration (cm/s^2).
    pub fn linear_acceleration(&self) -> &Vector3<f32> {
        &self.linear_acceleration
    }

    /// Seed the velocity, e.g. from optical tracking (cm/s).
    pub fn set_velocity(&mut self, velocity: Vector3<f32>) {
        self.velocity = velocity;
    }

    /// Override the linear acceleration (cm/s^2).
    pub fn set_acceleration(&mut self, acceleration: Vector3<f32>) {
        self.linear_acceleration = acceleration;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_remove_gravity_identity() {
        let accel = Vector3::new(0.2, -0.1, 1.3);
        let lin = remove_gravity(&accel, &UnitQuaternion::identity());
        assert_relative_eq!(lin, Vector3::new(0.2, -0.1, 0.3), epsilon = 1e-6);
    }

    #[test]
    fn test_remove_gravity_rotated_at_rest() {
        // Sensor tipped 90 degrees about X sees gravity along +Y
        let q = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f32::consts::FRAC_PI_2);
        let lin = remove_gravity(&Vector3::new(0.0, 1.0, 0.0), &q);
        assert_relative_eq!(lin, Vector3::zeros(), epsilon = 1e-6);
    }

    #[test]
    fn test_update_imu_scales_to_cm() {
        let mut k = KinematicObject::new();
        k.update_imu(&Vector3::new(0.1, 0.0, 1.0), &UnitQuaternion::identity());
        assert_relative_eq!(*k.linear_acceleration(), Vector3::new(98.1, 0.0, 0.0), epsilon = 1e-3);
    }

    #[test]
    fn test_constant_acceleration_matches_closed_form() {
        let a = Vector3::new(50.0_f32, -20.0, 10.0);
        let v0 = Vector3::new(3.0_f32, 0.0, -1.0);
        let dt = 0.001_f32;
        let n = 500;

        let mut k = KinematicObject::new();
        k.set_acceleration(a);
        k.set_velocity(v0);
        for _ in 0..n {
            k.integrate(dt);
        }

        let t = n as f32 * dt;
        // Semi-implicit Euler: x_n = v0*n*dt + a*dt^2*n(n+1)/2
        let discrete = v0 * t + a * (dt * dt * (n * (n + 1)) as f32 * 0.5);
        assert_relative_eq!(*k.position(), discrete, epsilon = 1e-3);

        // and within O(dt/T) of the continuous solution
        let continuous = a * (0.5 * t * t) + v0 * t;
        for i in 0..3 {
            let err = (k.position()[i] - continuous[i]).abs();
            assert!(err <= 2.0 * dt / t * continuous[i].abs() + 1e-3, "axis {i}: {err}");
        }
        assert_relative_eq!(*k.velocity(), v0 + a * t, epsilon = 1e-3);
    }

    #[test]
    fn test_reset_keeps_acceleration() {
        let mut k = KinematicObject::new();
        k.set_acceleration(Vector3::new(1.0, 2.0, 3.0));
        k.integrate(0.1);
        k.reset_state();
        assert_eq!(*k.position(), Vector3::zeros());
        assert_eq!(*k.velocity(), Vector3::zeros());
        assert_eq!(*k.linear_acceleration(), Vector3::new(1.0, 2.0, 3.0));
    }
}
