//! Camera models and homogeneous transform helpers.

pub mod camera;
pub mod transform;

pub use camera::{Distortion, Intrinsics};
pub use transform::{decompose_transform, make_4x4, offset_position, transform_point};
