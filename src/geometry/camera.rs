//! Pinhole camera intrinsics with Brown-Conrady lens distortion.
//!
//! Pixel coordinates follow the usual image convention (x right, y down).
//! Distortion coefficients are stored in `k1, k2, p1, p2, k3` order, which is
//! the layout produced by common calibration tools.

use nalgebra::{Matrix3, Point2};

/// Number of fixed-point iterations used when removing distortion.
const UNDISTORT_ITERATIONS: usize = 10;

/// Radial + tangential lens distortion.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    pub fn none() -> Self {
        Self::default()
    }

    /// Build from a coefficient list. Missing trailing entries are zero,
    /// extra entries (rational / thin-prism terms) are ignored.
    pub fn from_coefficients(coeffs: &[f64]) -> Self {
        let at = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
        Self {
            k1: at(0),
            k2: at(1),
            p1: at(2),
            p2: at(3),
            k3: at(4),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Apply distortion to a normalized image point.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2 + self.k3 * r2 * r2 * r2;
        let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        (x * radial + dx, y * radial + dy)
    }

    /// Invert [`Distortion::apply`] by fixed-point iteration.
    pub fn remove(&self, xd: f64, yd: f64) -> (f64, f64) {
        if self.is_zero() {
            return (xd, yd);
        }

        let (mut x, mut y) = (xd, yd);
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2 + self.k3 * r2 * r2 * r2;
            if radial.abs() < f64::EPSILON {
                break;
            }
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            x = (xd - dx) / radial;
            y = (yd - dy) / radial;
        }
        (x, y)
    }
}

/// Camera matrix `K` plus distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub k: Matrix3<f64>,
    pub distortion: Distortion,
}

impl Intrinsics {
    pub fn new(k: Matrix3<f64>, distortion: Distortion) -> Self {
        Self { k, distortion }
    }

    pub fn from_focal(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            k: Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0),
            distortion: Distortion::none(),
        }
    }

    pub fn fx(&self) -> f64 {
        self.k[(0, 0)]
    }

    pub fn fy(&self) -> f64 {
        self.k[(1, 1)]
    }

    pub fn cx(&self) -> f64 {
        self.k[(0, 2)]
    }

    pub fn cy(&self) -> f64 {
        self.k[(1, 2)]
    }

    /// Remove lens distortion from a pixel, returning the ideal pinhole pixel.
    ///
    /// The result stays in pixel units so it can be fed directly to a
    /// projection matrix built as `K * [R | t]`.
    pub fn undistort_pixel(&self, p: &Point2<f64>) -> Point2<f64> {
        let (fx, fy, cx, cy) = (self.fx(), self.fy(), self.cx(), self.cy());
        if fx.abs() <= 1e-12 || fy.abs() <= 1e-12 {
            return *p;
        }
        let xd = (p.x - cx) / fx;
        let yd = (p.y - cy) / fy;
        let (xu, yu) = self.distortion.remove(xd, yd);
        Point2::new(fx * xu + cx, fy * yu + cy)
    }

    /// Distort an ideal pinhole pixel (inverse of [`Intrinsics::undistort_pixel`]).
    pub fn distort_pixel(&self, p: &Point2<f64>) -> Point2<f64> {
        let (fx, fy, cx, cy) = (self.fx(), self.fy(), self.cx(), self.cy());
        if fx.abs() <= 1e-12 || fy.abs() <= 1e-12 {
            return *p;
        }
        let (xd, yd) = self.distortion.apply((p.x - cx) / fx, (p.y - cy) / fy);
        Point2::new(fx * xd + cx, fy * yd + cy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_undistort_is_identity_without_distortion() {
        let intr = Intrinsics::from_focal(600.0, 600.0, 320.0, 240.0);
        let p = Point2::new(100.5, 37.25);
        assert_eq!(intr.undistort_pixel(&p), p);
    }

    #[test]
    fn test_undistort_inverts_distort() {
        let mut intr = Intrinsics::from_focal(550.0, 545.0, 318.0, 242.0);
        intr.distortion = Distortion::from_coefficients(&[-0.12, 0.05, 0.001, -0.0015, 0.0]);

        for &(x, y) in &[(10.0, 20.0), (320.0, 240.0), (600.0, 450.0), (150.0, 400.0)] {
            let ideal = Point2::new(x, y);
            let distorted = intr.distort_pixel(&ideal);
            let recovered = intr.undistort_pixel(&distorted);
            assert_relative_eq!(recovered.x, ideal.x, epsilon = 1e-3);
            assert_relative_eq!(recovered.y, ideal.y, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_short_coefficient_list() {
        let d = Distortion::from_coefficients(&[0.1, 0.2]);
        assert_eq!(d.k1, 0.1);
        assert_eq!(d.k2, 0.2);
        assert_eq!(d.p1, 0.0);
        assert_eq!(d.k3, 0.0);
    }
}
