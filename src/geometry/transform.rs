//! Homogeneous transform helpers.

use nalgebra::{
    DMatrix, Matrix3, Matrix3x4, Matrix4, Rotation3, UnitQuaternion, Vector3, Vector4,
};

/// Threshold below which a homogeneous `w` is treated as a point at infinity.
pub const MIN_HOMOGENEOUS_W: f64 = 1e-9;

/// Promote a 3x4 `[R | t]` matrix to a 4x4 homogeneous transform.
pub fn make_4x4(m: &Matrix3x4<f64>) -> Matrix4<f64> {
    let mut out = Matrix4::identity();
    out.fixed_view_mut::<3, 4>(0, 0).copy_from(m);
    out
}

/// Accept either a 3x4 or 4x4 dynamic matrix and return a 4x4 transform.
pub fn homogeneous_from_dynamic(m: &DMatrix<f64>) -> Option<Matrix4<f64>> {
    match (m.nrows(), m.ncols()) {
        (4, 4) => Some(Matrix4::from_iterator(m.iter().copied())),
        (3, 4) => Some(make_4x4(&Matrix3x4::from_iterator(m.iter().copied()))),
        _ => None,
    }
}

/// Apply a 4x4 transform to a 3D point and dehomogenize.
///
/// Returns `None` when the resulting `w` is (nearly) zero or the output is
/// not finite.
pub fn transform_point(m: &Matrix4<f64>, p: &Vector3<f64>) -> Option<Vector3<f64>> {
    let out = m * Vector4::new(p.x, p.y, p.z, 1.0);
    dehomogenize(&out)
}

/// Divide a homogeneous 4-vector by its `w` component.
pub fn dehomogenize(h: &Vector4<f64>) -> Option<Vector3<f64>> {
    let w = h.w;
    if w.abs() < MIN_HOMOGENEOUS_W * h.norm().max(1.0) {
        return None;
    }
    let p = Vector3::new(h.x / w, h.y / w, h.z / w);
    p.iter().all(|v| v.is_finite()).then_some(p)
}

/// Split a rigid 4x4 transform into rotation and translation.
///
/// The rotation block is re-orthonormalized, so slightly noisy calibration
/// matrices still produce a valid unit quaternion.
pub fn decompose_transform(m: &Matrix4<f64>) -> (UnitQuaternion<f64>, Vector3<f64>) {
    let r: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
    let t = Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
    let rotation = Rotation3::from_matrix(&r);
    (UnitQuaternion::from_rotation_matrix(&rotation), t)
}

/// Move `position` by `length` along the rotated forward (+Z) axis.
pub fn offset_position(
    position: &Vector3<f32>,
    rotation: &UnitQuaternion<f32>,
    length: f32,
) -> Vector3<f32> {
    position + rotation * Vector3::z() * length
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_make_4x4_keeps_block() {
        let m = Matrix3x4::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0);
        let h = make_4x4(&m);
        assert_eq!(h[(0, 3)], 4.0);
        assert_eq!(h[(2, 2)], 11.0);
        assert_eq!(h[(3, 3)], 1.0);
        assert_eq!(h[(3, 0)], 0.0);
    }

    #[test]
    fn test_dynamic_is_row_major_consistent() {
        let d = DMatrix::from_row_slice(3, 4, &[1.0, 0.0, 0.0, 5.0, 0.0, 1.0, 0.0, 6.0, 0.0, 0.0, 1.0, 7.0]);
        let h = homogeneous_from_dynamic(&d).unwrap();
        let p = transform_point(&h, &Vector3::new(1.0, 1.0, 1.0)).unwrap();
        assert_relative_eq!(p, Vector3::new(6.0, 7.0, 8.0), epsilon = 1e-12);
        assert!(homogeneous_from_dynamic(&DMatrix::zeros(2, 2)).is_none());
    }

    #[test]
    fn test_transform_rejects_zero_w() {
        let mut m = Matrix4::identity();
        m[(3, 3)] = 0.0;
        assert!(transform_point(&m, &Vector3::new(1.0, 2.0, 3.0)).is_none());
    }

    #[test]
    fn test_decompose_roundtrip() {
        let rot = UnitQuaternion::from_euler_angles(0.1, -0.4, 0.7);
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(rot.to_rotation_matrix().matrix());
        m[(0, 3)] = 10.0;
        m[(1, 3)] = -20.0;
        m[(2, 3)] = 30.0;

        let (q, t) = decompose_transform(&m);
        assert_relative_eq!(q.angle_to(&rot), 0.0, epsilon = 1e-9);
        assert_relative_eq!(t, Vector3::new(10.0, -20.0, 30.0));
    }

    #[test]
    fn test_offset_position_forward() {
        let p = offset_position(&Vector3::zeros(), &UnitQuaternion::identity(), 0.5);
        assert_relative_eq!(p, Vector3::new(0.0, 0.0, 0.5));
    }
}
