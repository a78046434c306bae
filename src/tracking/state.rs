//! Per-controller fusion state machine.

/// Which branch the fusion stage took on its last tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    /// No optical fix has ever been accepted.
    #[default]
    AwaitingOptical,
    /// Extrapolating from the last fix with the kinematic integrator.
    DeadReckoning,
    /// A fresh optical fix was consumed this tick.
    Fused,
}

impl TrackingState {
    /// Next state given whether a new optical fix arrived this tick.
    pub fn advance(self, new_optical_fix: bool) -> Self {
        match (self, new_optical_fix) {
            (_, true) => Self::Fused,
            (Self::AwaitingOptical, false) => Self::AwaitingOptical,
            (_, false) => Self::DeadReckoning,
        }
    }

    pub fn has_position(self) -> bool {
        self != Self::AwaitingOptical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let s = TrackingState::default();
        assert_eq!(s.advance(false), TrackingState::AwaitingOptical);
        let s = s.advance(true);
        assert_eq!(s, TrackingState::Fused);
        assert_eq!(s.advance(false), TrackingState::DeadReckoning);
        assert_eq!(TrackingState::DeadReckoning.advance(false), TrackingState::DeadReckoning);
        assert_eq!(TrackingState::DeadReckoning.advance(true), TrackingState::Fused);
        assert!(!TrackingState::AwaitingOptical.has_position());
    }
}
