//! Native device boundary
//!
//! Everything a native input backend has to provide, and the pieces that sit
//! directly on top of it:
//!
//! 1. [`classifier`] - maps component identities to the kind of state they feed
//! 2. [`native`] - releases native handles of every known backend shape
//! 3. [`managed`] - owns one native device plus the exit hooks captured for it
//!
//! # Architecture
//!
//! ```text
//! ControllerEnvironment ──► Controller ──► ManagedDevice ──► Joystick/Keyboard reader
//!   (enumeration)          (components,    (open/closed,
//!                           event queue)    hooks + release)
//! ```
//!
//! Backends are not expected to offer a way to free their resources through the
//! [`Controller`] trait. Instead each controller hands out a [`NativeHandle`]
//! describing its backend shape, and [`native::release`] knows how to close
//! each shape.

pub mod classifier;
pub mod managed;
pub mod native;

use crate::error::BackendError;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

pub use classifier::{classify, hat_angle, hat_raw_value, printable_char, ComponentClass};
pub use managed::{DeviceCloser, ManagedDevice};
pub use native::{release, DirectInputDevice, LinuxDevice, NativeHandle, OsxQueue, ReleaseReport};

/// Raw hat switch positions as reported by native backends.
///
/// Directions are fractions of a full turn starting at up-left, which is why
/// `UP` is 0.25 and `LEFT` is 1.0. Centered and off share the value 0.
pub mod pov {
    pub const OFF: f32 = 0.0;
    pub const CENTER: f32 = 0.0;
    pub const UP_LEFT: f32 = 0.125;
    pub const UP: f32 = 0.25;
    pub const UP_RIGHT: f32 = 0.375;
    pub const RIGHT: f32 = 0.5;
    pub const DOWN_RIGHT: f32 = 0.625;
    pub const DOWN: f32 = 0.75;
    pub const DOWN_LEFT: f32 = 0.875;
    pub const LEFT: f32 = 1.0;
}

/// Stable identity token of a component, assigned by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub u32);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Named keys the keyboard reader tracks individually, plus printable keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// Key labelled with a single printable character (`"A"`, `"7"`, `";"`).
    Char(char),
    LShift,
    RShift,
    LAlt,
    RAlt,
    LControl,
    RControl,
    CapsLock,
    Tab,
    Space,
    Escape,
    Up,
    Down,
    Left,
    Right,
    /// Any other key, by native name.
    Other(String),
}

/// What a component is, as far as the backend can tell.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// Continuous axis, by native name (`"x"`, `"rz"`, `"slider"`).
    Axis(String),
    /// Point-of-view hat switch.
    Pov,
    /// Button, by native name (`"0"`, `"Trigger"`, `"South"`).
    Button(String),
    Key(Key),
    /// Anything else the backend exposes (e.g. LEDs).
    Other(String),
}

/// A single input component of a device.
#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    pub id: ComponentId,
    pub identifier: Identifier,
    pub name: String,
    /// Delta semantics: events are added to the previous value instead of replacing it.
    pub relative: bool,
}

impl Component {
    pub fn new(id: u32, identifier: Identifier, name: impl Into<String>) -> Self {
        Self {
            id: ComponentId(id),
            identifier,
            name: name.into(),
            relative: false,
        }
    }

    pub fn relative(mut self) -> Self {
        self.relative = true;
        self
    }
}

/// Device type as reported by the native environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ControllerKind {
    Unknown,
    Mouse,
    Keyboard,
    Fingerstick,
    Gamepad,
    Headtracker,
    Rudder,
    Stick,
    Trackball,
    Trackpad,
    Wheel,
}

impl ControllerKind {
    pub fn is_joystick(&self) -> bool {
        matches!(self, ControllerKind::Gamepad | ControllerKind::Stick)
    }

    pub fn is_keyboard(&self) -> bool {
        matches!(self, ControllerKind::Keyboard)
    }
}

/// A timestamped change of one component.
#[derive(Clone, Debug)]
pub struct Event {
    pub component: ComponentId,
    pub value: f32,
    pub timestamp: DateTime<Local>,
}

impl Event {
    pub fn new(component: ComponentId, value: f32) -> Self {
        Self {
            component,
            value,
            timestamp: Local::now(),
        }
    }
}

/// A device exposed by a native environment.
///
/// Implementations are driven from a single thread at a time; [`ManagedDevice`]
/// provides the locking.
pub trait Controller: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> ControllerKind;

    /// Components in the backend's stable order.
    fn components(&self) -> Vec<Component>;

    /// Number of force feedback actuators.
    fn actuator_count(&self) -> usize;

    /// Drives one actuator (0-indexed).
    fn rumble(&mut self, actuator: usize, magnitude: f32) -> Result<(), BackendError>;

    /// Pulls pending input from the OS into the event queue. Returns `false`
    /// when the device is no longer reachable.
    fn poll(&mut self) -> bool;

    /// Pops the oldest queued event.
    fn next_event(&mut self) -> Option<Event>;

    fn set_event_queue_size(&mut self, size: usize);

    /// Hands out the native resources backing this controller. Returns `None`
    /// once they have been taken.
    fn take_native(&mut self) -> Option<NativeHandle>;
}

/// One enumeration of the devices currently attached.
pub trait ControllerEnvironment: Send {
    /// Devices in native enumeration order.
    fn controllers(&mut self) -> Result<Vec<Box<dyn Controller>>, BackendError>;
}

/// Creates a fresh environment for every lookup, so devices connected after
/// start-up are found as well.
pub type EnvironmentFactory =
    Arc<dyn Fn() -> Result<Box<dyn ControllerEnvironment>, BackendError> + Send + Sync>;
