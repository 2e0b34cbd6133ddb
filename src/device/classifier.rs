//! Component classification and hat switch quantization.

use super::{pov, Identifier, Key};

/// The kind of snapshot state a component feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentClass {
    Axis,
    Button,
    HatSwitch,
    Key,
    Unknown,
}

pub fn classify(identifier: &Identifier) -> ComponentClass {
    match identifier {
        Identifier::Pov => ComponentClass::HatSwitch,
        Identifier::Axis(_) => ComponentClass::Axis,
        Identifier::Button(_) => ComponentClass::Button,
        Identifier::Key(_) => ComponentClass::Key,
        Identifier::Other(_) => ComponentClass::Unknown,
    }
}

/// Character printed by a key, if it has one.
pub fn printable_char(key: &Key) -> Option<char> {
    match key {
        Key::Char(c) => Some(*c),
        Key::Space => Some(' '),
        Key::Tab => Some('\t'),
        _ => None,
    }
}

// Index 0 is up; entries step clockwise by 45 degrees.
const DIRECTIONS: [f32; 8] = [
    pov::UP,
    pov::UP_RIGHT,
    pov::RIGHT,
    pov::DOWN_RIGHT,
    pov::DOWN,
    pov::DOWN_LEFT,
    pov::LEFT,
    pov::UP_LEFT,
];

/// Converts a raw hat value into degrees clockwise from up, or -1 for
/// centered and for any value that is not one of the eight directions.
pub fn hat_angle(raw: f32) -> f64 {
    DIRECTIONS
        .iter()
        .position(|&direction| direction == raw)
        .map(|i| i as f64 * 45.0)
        .unwrap_or(-1.0)
}

/// Raw hat value for an angle produced by [`hat_angle`].
pub fn hat_raw_value(angle: f64) -> Option<f32> {
    if angle == -1.0 {
        return Some(pov::CENTER);
    }
    if angle < 0.0 || angle % 45.0 != 0.0 {
        return None;
    }
    DIRECTIONS.get((angle / 45.0) as usize).copied()
}
