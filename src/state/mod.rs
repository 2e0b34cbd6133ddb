//! Event-to-state aggregation.
//!
//! A reader owns one [`ManagedDevice`](crate::device::ManagedDevice), a slot
//! index built at open, and a snapshot it mutates in place on every `read`.
//!
//! - [`layout`] - component to slot assignment
//! - [`joystick`] - axes, buttons, hats and force feedback
//! - [`keyboard`] - key table and modifier fields

pub mod joystick;
pub mod keyboard;
pub mod layout;

use serde::Serialize;

pub use joystick::{JoystickReader, JoystickState};
pub use keyboard::{KeyboardReader, KeyboardState, KEY_SLOTS};
pub use layout::{Slot, SlotIndex};

/// Slot counts fixed when a reader opens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub axes: usize,
    pub buttons: usize,
    pub hats: usize,
    pub actuators: usize,
}

/// Relative components add the event to the current value; absolute ones
/// replace it.
fn fold(current: &mut f32, value: f32, relative: bool) {
    if relative {
        *current += value;
    } else {
        *current = value;
    }
}
