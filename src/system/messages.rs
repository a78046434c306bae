//! Inter-thread message types.

use nalgebra::Vector3;

/// Sent from the optical loop to the filter loop whenever a controller was
/// triangulated in the current cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpticalFix {
    /// Index into the connected controller list.
    pub controller: usize,

    /// World position (cm).
    pub world: Vector3<f32>,

    /// Velocity from consecutive fixes (cm/s), zero after a gap.
    pub velocity: Vector3<f32>,
}
