//! Two-view triangulation of blob centres into the world frame.
//!
//! Pixels are undistorted first, then intersected with the linear DLT method
//! using `P_i = K_i [R_i | t_i]`. The result is relative to camera 0 and is
//! mapped into the world by camera 0's `world` transform. All math is `f64`.

use nalgebra::{Matrix3x4, Matrix4, Point2, Vector3, Vector4};

use crate::calibration::CameraCalibration;
use crate::geometry::Intrinsics;
use crate::geometry::transform::{dehomogenize, transform_point};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TriangulationError {
    #[error("camera {camera_id} lacks {part} calibration")]
    MissingCalibration {
        camera_id: usize,
        part: &'static str,
    },
    #[error("rays are parallel or the point lies at infinity")]
    Degenerate,
    #[error("triangulated point is not finite")]
    NonFinite,
}

/// Everything needed to triangulate from one camera.
#[derive(Debug, Clone, Copy)]
pub struct ViewGeometry {
    pub intrinsics: Intrinsics,
    pub projection: Matrix3x4<f64>,
}

impl ViewGeometry {
    pub fn from_calibration(calib: &CameraCalibration) -> Result<Self, TriangulationError> {
        let missing = |part| TriangulationError::MissingCalibration {
            camera_id: calib.camera_id,
            part,
        };
        let intrinsics = calib.intrinsics.ok_or_else(|| missing("intrinsic"))?;
        let projection = calib.projection().ok_or_else(|| missing("extrinsic"))?;
        Ok(Self {
            intrinsics,
            projection,
        })
    }

    /// Project a camera-0 frame point to (distorted) pixel coordinates.
    pub fn project(&self, p: &Vector3<f64>) -> Option<Point2<f64>> {
        let h = self.projection * Vector4::new(p.x, p.y, p.z, 1.0);
        if h.z.abs() < 1e-12 {
            return None;
        }
        let ideal = Point2::new(h.x / h.z, h.y / h.z);
        Some(self.intrinsics.distort_pixel(&ideal))
    }
}

/// Output of a successful triangulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoFix {
    /// Camera-0 relative position.
    pub triangulated: Vector3<f64>,
    pub world: Vector3<f64>,
}

/// Calibrated camera pair.
#[derive(Debug, Clone, Copy)]
pub struct StereoGeometry {
    pub views: [ViewGeometry; 2],
    /// Camera 0 to world.
    pub world: Matrix4<f64>,
}

impl StereoGeometry {
    pub fn from_calibrations(
        cam0: &CameraCalibration,
        cam1: &CameraCalibration,
    ) -> Result<Self, TriangulationError> {
        let view0 = ViewGeometry::from_calibration(cam0)?;
        let view1 = ViewGeometry::from_calibration(cam1)?;
        let world = cam0
            .extrinsics
            .map(|e| e.world)
            .ok_or(TriangulationError::MissingCalibration {
                camera_id: cam0.camera_id,
                part: "extrinsic",
            })?;
        Ok(Self {
            views: [view0, view1],
            world,
        })
    }

    /// Undistort, triangulate and move into the world frame.
    pub fn locate(&self, px0: &Point2<f64>, px1: &Point2<f64>) -> Result<StereoFix, TriangulationError> {
        let u0 = self.views[0].intrinsics.undistort_pixel(px0);
        let u1 = self.views[1].intrinsics.undistort_pixel(px1);

        let triangulated = triangulate(&self.views[0].projection, &self.views[1].projection, &u0, &u1)?;
        let world = transform_point(&self.world, &triangulated).ok_or(TriangulationError::Degenerate)?;
        Ok(StereoFix { triangulated, world })
    }
}

/// Linear (DLT) triangulation of one correspondence.
pub fn triangulate(
    p0: &Matrix3x4<f64>,
    p1: &Matrix3x4<f64>,
    x0: &Point2<f64>,
    x1: &Point2<f64>,
) -> Result<Vector3<f64>, TriangulationError> {
    let mut a = Matrix4::<f64>::zeros();
    for (row, (p, x)) in [(p0, x0), (p1, x1)].into_iter().enumerate() {
        a.set_row(2 * row, &(p.row(2) * x.x - p.row(0)));
        a.set_row(2 * row + 1, &(p.row(2) * x.y - p.row(1)));
    }
    if !a.iter().all(|v| v.is_finite()) {
        return Err(TriangulationError::NonFinite);
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or(TriangulationError::Degenerate)?;
    // nalgebra does not sort singular values
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, &s)| if s < best.1 { (i, s) } else { best });
    let h: Vector4<f64> = v_t.row(min_idx).transpose();

    let point = dehomogenize(&h).ok_or(TriangulationError::Degenerate)?;
    if point.iter().all(|v| v.is_finite()) {
        Ok(point)
    } else {
        Err(TriangulationError::NonFinite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Extrinsics;
    use crate::geometry::Distortion;
    use crate::geometry::transform::make_4x4;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, UnitQuaternion};

    fn extrinsic(rotation: Rotation3<f64>, t: Vector3<f64>) -> Matrix3x4<f64> {
        let mut m = Matrix3x4::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation.matrix());
        m.set_column(3, &t);
        m
    }

    fn calibrations(distortion: Distortion) -> (CameraCalibration, CameraCalibration) {
        let mut intr = Intrinsics::from_focal(600.0, 600.0, 320.0, 240.0);
        intr.distortion = distortion;

        let world_rot = UnitQuaternion::from_euler_angles(0.2, -0.1, 0.3).to_rotation_matrix();
        let world = make_4x4(&extrinsic(world_rot, Vector3::new(5.0, -40.0, 120.0)));

        let mut c0 = CameraCalibration::new(0);
        c0.intrinsics = Some(intr);
        c0.extrinsics = Some(Extrinsics {
            t: extrinsic(Rotation3::identity(), Vector3::zeros()),
            world,
        });

        let mut c1 = CameraCalibration::new(1);
        c1.intrinsics = Some(intr);
        c1.extrinsics = Some(Extrinsics {
            t: extrinsic(Rotation3::from_euler_angles(0.0, 0.15, 0.0), Vector3::new(-60.0, 0.0, 2.0)),
            world: Matrix4::identity(),
        });
        (c0, c1)
    }

    #[test]
    fn test_round_trip_recovers_point() {
        let (c0, c1) = calibrations(Distortion::none());
        let stereo = StereoGeometry::from_calibrations(&c0, &c1).unwrap();

        for truth in [
            Vector3::new(0.0, 0.0, 80.0),
            Vector3::new(12.0, -7.5, 95.0),
            Vector3::new(-20.0, 15.0, 150.0),
        ] {
            let px0 = stereo.views[0].project(&truth).unwrap();
            let px1 = stereo.views[1].project(&truth).unwrap();
            let fix = stereo.locate(&px0, &px1).unwrap();
            assert_relative_eq!(fix.triangulated, truth, epsilon = 1e-6);
            let expected_world = transform_point(&stereo.world, &truth).unwrap();
            assert_relative_eq!(fix.world, expected_world, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_round_trip_with_lens_distortion() {
        let (c0, c1) = calibrations(Distortion::from_coefficients(&[-0.15, 0.04, 0.0005, -0.0008, 0.0]));
        let stereo = StereoGeometry::from_calibrations(&c0, &c1).unwrap();

        let truth = Vector3::new(18.0, 10.0, 90.0);
        let px0 = stereo.views[0].project(&truth).unwrap();
        let px1 = stereo.views[1].project(&truth).unwrap();
        let fix = stereo.locate(&px0, &px1).unwrap();
        assert_relative_eq!(fix.triangulated, truth, epsilon = 1e-2);
    }

    #[test]
    fn test_parallel_rays_are_degenerate() {
        let k = Intrinsics::from_focal(600.0, 600.0, 320.0, 240.0).k;
        let p0 = k * extrinsic(Rotation3::identity(), Vector3::zeros());
        let p1 = k * extrinsic(Rotation3::identity(), Vector3::new(-60.0, 0.0, 0.0));
        let centre = Point2::new(320.0, 240.0);
        assert_eq!(triangulate(&p0, &p1, &centre, &centre), Err(TriangulationError::Degenerate));
    }

    #[test]
    fn test_missing_calibration() {
        let (c0, mut c1) = calibrations(Distortion::none());
        c1.extrinsics = None;
        let err = StereoGeometry::from_calibrations(&c0, &c1).unwrap_err();
        assert_eq!(
            err,
            TriangulationError::MissingCalibration {
                camera_id: 1,
                part: "extrinsic"
            }
        );
    }
}
