//! Low-pass smoothing of the fused position stream.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Per-axis exponential blend: `last + (current - last) * alpha`.
pub fn lowpass_filter(last: &Vector3<f32>, current: &Vector3<f32>, alpha: &Vector3<f32>) -> Vector3<f32> {
    last + (current - last).component_mul(alpha)
}

/// Blend weight for a target that moved `moved` cm since the last sample.
///
/// Motion below `noise_floor` counts as none. Above it the weight climbs from
/// `alpha` and reaches 1 once the excess equals `distance`.
pub fn adaptive_weight(moved: f32, alpha: f32, distance: f32, noise_floor: f32) -> f32 {
    let excess = (moved - noise_floor).max(0.0);
    let t = if distance > 0.0 { excess / distance } else { 1.0 };
    (alpha + (1.0 - alpha) * t).clamp(0.0, 1.0)
}

/// Speed-adaptive blend.
///
/// The weight starts at `alpha` for a stationary target and reaches 1 once the
/// displacement between samples equals `distance` (cm), so fast motion is
/// smoothed less.
pub fn adaptive_lowpass_filter(last: &Vector3<f32>, current: &Vector3<f32>, alpha: f32, distance: f32) -> Vector3<f32> {
    let moved = (last - current).norm();
    last.lerp(current, adaptive_weight(moved, alpha, distance, 0.0))
}

fn no_motion_smoothing() -> f32 {
    1.0
}

/// Which low-pass variant the fusion stage applies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LowpassStrategy {
    Constant {
        alpha: [f32; 3],
    },
    /// Adaptive blend driven by a smoothed displacement.
    ///
    /// The per-sample displacement is averaged with weight `motion_smoothing`
    /// before it sets the blend weight, so zero-mean optical jitter cancels
    /// while sustained motion still opens the filter. `noise_floor = 0` with
    /// `motion_smoothing = 1` is the plain [`adaptive_lowpass_filter`].
    Adaptive {
        alpha: f32,
        distance: f32,
        #[serde(default)]
        noise_floor: f32,
        #[serde(default = "no_motion_smoothing")]
        motion_smoothing: f32,
    },
}

impl Default for LowpassStrategy {
    /// Holds a resting controller within 1 cm under 2 px detection noise at
    /// 1.5 m, lagging about 2 cm at 50 cm/s.
    fn default() -> Self {
        Self::Adaptive {
            alpha: 0.03,
            distance: 6.0,
            noise_floor: 1.5,
            motion_smoothing: 0.1,
        }
    }
}

impl LowpassStrategy {
    /// Constant blend with the optical axis (z) trusted less.
    pub fn constant_default() -> Self {
        Self::Constant { alpha: [0.4, 0.4, 0.3] }
    }
}

/// Low-pass stage of one track.
///
/// The first samples after a reset are averaged (weight at least `1/n`), so
/// a noisy first fix does not linger under a small `alpha`.
#[derive(Debug, Clone)]
pub struct LowpassFilter {
    strategy: LowpassStrategy,
    /// Smoothed per-sample displacement (cm).
    motion: Vector3<f32>,
    samples: u32,
}

impl LowpassFilter {
    pub fn new(strategy: LowpassStrategy) -> Self {
        Self {
            strategy,
            motion: Vector3::zeros(),
            samples: 0,
        }
    }

    /// Configured variant.
    pub fn strategy(&self) -> &LowpassStrategy {
        &self.strategy
    }

    /// Smoothed displacement driving the adaptive weight.
    pub fn motion(&self) -> &Vector3<f32> {
        &self.motion
    }

    /// Forget the motion estimate and restart the warm-up average.
    pub fn reset(&mut self) {
        self.motion = Vector3::zeros();
        self.samples = 0;
    }

    /// Blend `current` into `last`.
    pub fn apply(&mut self, last: &Vector3<f32>, current: &Vector3<f32>) -> Vector3<f32> {
        self.samples = self.samples.saturating_add(1);
        let warmup = 1.0 / self.samples as f32;

        match self.strategy {
            LowpassStrategy::Constant { alpha } => {
                let alpha = Vector3::from(alpha).map(|a| a.max(warmup));
                lowpass_filter(last, current, &alpha)
            }
            LowpassStrategy::Adaptive {
                alpha,
                distance,
                noise_floor,
                motion_smoothing,
            } => {
                self.motion = self.motion.lerp(&(current - last), motion_smoothing);
                let weight = adaptive_weight(self.motion.norm(), alpha, distance, noise_floor).max(warmup);
                last.lerp(current, weight)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_same_input_is_fixed_point() {
        let x = Vector3::new(3.0, -2.0, 40.0);
        for strategy in [LowpassStrategy::default(), LowpassStrategy::constant_default()] {
            let mut filter = LowpassFilter::new(strategy);
            for _ in 0..5 {
                assert_relative_eq!(filter.apply(&x, &x), x);
            }
        }
        for alpha in [0.0, 0.3, 1.0] {
            assert_relative_eq!(lowpass_filter(&x, &x, &Vector3::repeat(alpha)), x);
        }
    }

    #[test]
    fn test_constant_blend_per_axis() {
        let out = lowpass_filter(&Vector3::zeros(), &Vector3::new(10.0, 10.0, 10.0), &Vector3::new(0.4, 0.4, 0.3));
        assert_relative_eq!(out, Vector3::new(4.0, 4.0, 3.0), epsilon = 1e-6);
    }

    #[test]
    fn test_adaptive_weight_grows_with_speed() {
        let last = Vector3::zeros();
        // slow: 1 cm step, weight 0.4 + 0.6 * 0.1 = 0.46
        let slow = adaptive_lowpass_filter(&last, &Vector3::new(1.0, 0.0, 0.0), 0.4, 10.0);
        assert_relative_eq!(slow.x, 0.46, epsilon = 1e-6);
        // fast: beyond the distance the new sample is taken as-is
        let fast = adaptive_lowpass_filter(&last, &Vector3::new(0.0, 25.0, 0.0), 0.4, 10.0);
        assert_relative_eq!(fast, Vector3::new(0.0, 25.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_noise_floor_ignores_small_motion() {
        assert_relative_eq!(adaptive_weight(1.0, 0.1, 6.0, 1.5), 0.1);
        assert_relative_eq!(adaptive_weight(4.5, 0.1, 6.0, 1.5), 0.1 + 0.9 * 0.5, epsilon = 1e-6);
        assert_relative_eq!(adaptive_weight(20.0, 0.1, 6.0, 1.5), 1.0);
    }

    #[test]
    fn test_first_samples_are_averaged() {
        let mut filter = LowpassFilter::new(LowpassStrategy::Constant { alpha: [0.1; 3] });
        let mut out = Vector3::zeros();
        for (i, z) in [3.0, 6.0, 9.0].into_iter().enumerate() {
            out = filter.apply(&out, &Vector3::new(0.0, 0.0, z));
            // running mean of 3, 6, 9
            assert_relative_eq!(out.z, 3.0 * (i as f32 + 2.0) / 2.0, epsilon = 1e-5);
        }
        assert_relative_eq!(out.z, 6.0, epsilon = 1e-5);

        filter.reset();
        assert_relative_eq!(filter.apply(&out, &Vector3::zeros()), Vector3::zeros());
    }

    #[test]
    fn test_default_rejects_jitter() {
        let mut filter = LowpassFilter::new(LowpassStrategy::default());
        let mut out = Vector3::zeros();
        for i in 0..200 {
            let z = if i % 2 == 0 { 2.0 } else { -2.0 };
            out = filter.apply(&out, &Vector3::new(0.0, 0.0, z));
        }
        assert!(out.norm() < 0.1, "{out:?}");
        assert!(filter.motion().norm() < 0.5);
    }

    #[test]
    fn test_default_follows_sustained_motion() {
        let mut filter = LowpassFilter::new(LowpassStrategy::default());
        let mut out = Vector3::zeros();
        let mut current = Vector3::zeros();
        for i in 1..=100 {
            current = Vector3::new(5.0 * i as f32, 0.0, 0.0);
            out = filter.apply(&out, &current);
        }
        assert!(current.x - out.x < 2.0, "lag {}", current.x - out.x);
    }

    #[test]
    fn test_strategy_from_json() {
        let s: LowpassStrategy = serde_json::from_str(r#"{"kind":"constant","alpha":[0.5,0.5,0.2]}"#).unwrap();
        assert_eq!(s, LowpassStrategy::Constant { alpha: [0.5, 0.5, 0.2] });
        let s: LowpassStrategy = serde_json::from_str(r#"{"kind":"adaptive","alpha":0.3,"distance":5.0}"#).unwrap();
        assert_eq!(
            s,
            LowpassStrategy::Adaptive {
                alpha: 0.3,
                distance: 5.0,
                noise_floor: 0.0,
                motion_smoothing: 1.0,
            }
        );
    }
}
