//! Mapping from controller state to driver input events.

use super::controller::ControllerSnapshot;
use crate::hardware::Buttons;
use crate::protocol::{InputComponent, InputEvent};

type Accessor = fn(&ControllerSnapshot) -> f32;

fn button(snap: &ControllerSnapshot, b: Buttons) -> f32 {
    if snap.is_pressed(b) { 1.0 } else { 0.0 }
}

/// Every component reported to the driver, in wire order.
pub const INPUT_TABLE: [(InputComponent, Accessor); 9] = [
    (InputComponent::System, |s| button(s, Buttons::PS)),
    (InputComponent::Move, |s| button(s, Buttons::MOVE)),
    (InputComponent::Square, |s| button(s, Buttons::SQUARE)),
    (InputComponent::Cross, |s| button(s, Buttons::CROSS)),
    (InputComponent::Triangle, |s| button(s, Buttons::TRIANGLE)),
    (InputComponent::Circle, |s| button(s, Buttons::CIRCLE)),
    (InputComponent::Start, |s| button(s, Buttons::START)),
    (InputComponent::Select, |s| button(s, Buttons::SELECT)),
    (InputComponent::Trigger, |s| s.trigger),
];

pub fn input_events(snap: &ControllerSnapshot) -> Vec<InputEvent> {
    INPUT_TABLE
        .iter()
        .map(|(component, value)| InputEvent {
            component: *component,
            value: value(snap),
        })
        .collect()
}

/// Battery charge rounded to a whole percent.
pub fn battery_percent(snap: &ControllerSnapshot) -> u8 {
    (snap.battery * 100.0).round().clamp(0.0, 100.0) as u8
}
