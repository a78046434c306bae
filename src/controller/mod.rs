//! Motion controllers: device polling, orientation and user input.

#[allow(clippy::module_inception)]
pub mod controller;
pub mod input;
pub mod led;
pub mod set;

pub use controller::{Controller, ControllerShared, ControllerSnapshot, to_vr_space};
pub use input::{INPUT_TABLE, battery_percent, input_events};
pub use led::RgbColor;
pub use set::ControllerSet;
