use nalgebra::Vector3;

/// Earth gravity in cm/s^2. Positions are tracked in centimetres.
pub const EARTH_GRAVITY_CM: f32 = 981.0;

/// Direction of gravity in the world frame, as the accelerometer sees it at rest.
pub const GRAVITY_DIR: Vector3<f32> = Vector3::new(0.0, 0.0, 1.0);

/// Single IMU measurement (one sensor half-frame).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    /// Angular rate in rad/s.
    pub gyro: Vector3<f32>,
    /// Specific force in units of g.
    pub accel: Vector3<f32>,
}

impl ImuSample {
    pub fn new(gyro: Vector3<f32>, accel: Vector3<f32>) -> Self {
        Self { gyro, accel }
    }

    /// A controller lying still with the sensor Z axis pointing up.
    pub fn at_rest() -> Self {
        Self {
            gyro: Vector3::zeros(),
            accel: GRAVITY_DIR,
        }
    }
}

/// Per-controller IMU calibration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuCalibration {
    /// Gyroscope bias in rad/s, subtracted from every sample.
    pub gyro_offsets: Option<Vector3<f32>>,
}

impl ImuCalibration {
    pub fn has_gyro(&self) -> bool {
        self.gyro_offsets.is_some()
    }

    /// Apply the stored offsets to a raw sample.
    pub fn correct(&self, sample: &ImuSample) -> ImuSample {
        match self.gyro_offsets {
            Some(offsets) => ImuSample {
                gyro: sample.gyro - offsets,
                accel: sample.accel,
            },
            None => *sample,
        }
    }
}

/// Accumulates stationary gyro readings and averages them into a bias estimate.
#[derive(Debug, Clone)]
pub struct GyroCalibrator {
    required: usize,
    sum: Vector3<f64>,
    count: usize,
}

impl GyroCalibrator {
    pub fn new(required: usize) -> Self {
        Self {
            required: required.max(1),
            sum: Vector3::zeros(),
            count: 0,
        }
    }

    pub fn add(&mut self, gyro: &Vector3<f32>) {
        self.sum += gyro.cast::<f64>();
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_complete(&self) -> bool {
        self.count >= self.required
    }

    /// Average of the collected samples, once enough have been collected.
    pub fn finish(&self) -> Option<ImuCalibration> {
        if !self.is_complete() {
            return None;
        }
        let mean = self.sum / self.count as f64;
        Some(ImuCalibration {
            gyro_offsets: Some(mean.cast::<f32>()),
        })
    }
}
