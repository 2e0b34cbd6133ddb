//! Error types shared by discovery, device access and the readers.
//!
//! Every failure that reaches a caller is an [`InputError`]. Messages are written
//! for the end user of the host application, so they carry no type names or
//! backtraces; the [`ErrorKind`] tag is what code should match on.

use crate::device::ControllerKind;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which reader a device is being opened for. Used to pick the device filter
/// during discovery and to phrase error messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Joystick,
    Keyboard,
    /// Any attached device, used when listing.
    Any,
}

impl DeviceClass {
    /// Whether a device of `kind` counts towards this class's ordinals.
    pub fn matches(&self, kind: ControllerKind) -> bool {
        match self {
            DeviceClass::Joystick => kind.is_joystick(),
            DeviceClass::Keyboard => kind.is_keyboard(),
            DeviceClass::Any => true,
        }
    }

    /// Capitalised noun used at the start of messages.
    pub fn label(&self) -> &'static str {
        match self {
            DeviceClass::Joystick => "Joystick",
            DeviceClass::Keyboard => "Keyboard",
            DeviceClass::Any => "Device",
        }
    }

    fn lower(&self) -> &'static str {
        match self {
            DeviceClass::Joystick => "joystick",
            DeviceClass::Keyboard => "keyboard",
            DeviceClass::Any => "device",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tag identifying the category of an [`InputError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    NotFound,
    Driver,
    Io,
    Closed,
    InvalidArgs,
    IndexOutOfRange,
    NoActuators,
    UnsupportedBackend,
    Release,
    Layout,
}

/// Errors surfaced by the input subsystem.
#[derive(Debug, Error)]
pub enum InputError {
    /// Device enumeration did not finish before the deadline.
    #[error("Controller search timed out. Limit may have been reached. (waited {after:?})")]
    Timeout { class: DeviceClass, after: Duration },

    /// Enumeration finished but the requested device does not exist.
    #[error("{} is not connected.", .class.label())]
    NotFound { class: DeviceClass, ordinal: usize },

    /// The native environment failed while enumerating or driving a device.
    #[error("Could not get {}. Message: {message}", .class.lower())]
    Driver { class: DeviceClass, message: String },

    /// Polling reported that the device is gone.
    #[error("{} device error: Failed to read {} status.", .class.label(), .class.lower())]
    Io { class: DeviceClass },

    /// The device was used after it had been closed.
    #[error("{} device error: Closed or invalid {} device", .class.label(), .class.lower())]
    Closed { class: DeviceClass },

    /// Malformed force-feedback request.
    #[error("{0}")]
    InvalidArgs(String),

    /// A force-feedback slot beyond the number of actuators.
    #[error("Index out of range: {index} (device has {count} actuators)")]
    IndexOutOfRange { index: usize, count: usize },

    /// Force feedback requested on a device without actuators.
    #[error("This device does not support force feedback.")]
    NoActuators,

    /// Release attempted on a native handle shape nobody knows how to close.
    #[error("Close not implemented for: {0}")]
    UnsupportedBackend(String),

    /// A known native shape failed to release.
    #[error("Failed to close {shape} device. Message: {message}")]
    Release { shape: String, message: String },

    /// The device does not expose any component kind the reader needs.
    #[error("{} device error: {message}", .class.label())]
    Layout { class: DeviceClass, message: String },
}

impl InputError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InputError::Timeout { .. } => ErrorKind::Timeout,
            InputError::NotFound { .. } => ErrorKind::NotFound,
            InputError::Driver { .. } => ErrorKind::Driver,
            InputError::Io { .. } => ErrorKind::Io,
            InputError::Closed { .. } => ErrorKind::Closed,
            InputError::InvalidArgs(_) => ErrorKind::InvalidArgs,
            InputError::IndexOutOfRange { .. } => ErrorKind::IndexOutOfRange,
            InputError::NoActuators => ErrorKind::NoActuators,
            InputError::UnsupportedBackend(_) => ErrorKind::UnsupportedBackend,
            InputError::Release { .. } => ErrorKind::Release,
            InputError::Layout { .. } => ErrorKind::Layout,
        }
    }

    pub(crate) fn driver(class: DeviceClass, err: impl fmt::Display) -> Self {
        InputError::Driver {
            class,
            message: err.to_string(),
        }
    }
}

/// Failure reported by a native backend. Backends have no notion of which
/// reader is asking, so this carries only a message; discovery and the readers
/// turn it into [`InputError::Driver`].
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type Result<T, E = InputError> = std::result::Result<T, E>;
