//! Releasing native device resources.
//!
//! Native backends do not share a release contract: a DirectInput device is
//! released, an IOKit queue is released, and a Linux event device is closed.
//! [`NativeHandle`] lists every shape we know how to free, each carrying only
//! what its release path needs, and [`release`] dispatches on it.
//!
//! Release runs during cleanup. Nothing in here returns an error to the caller;
//! faults are logged and collected into a [`ReleaseReport`].

use crate::error::{BackendError, InputError};
use std::fmt;
use tracing::{debug, warn};

/// Device object of a DirectInput style backend.
pub trait DirectInputDevice: Send {
    fn release(&mut self) -> Result<(), BackendError>;
}

/// Event queue of a macOS HID backend.
pub trait OsxQueue: Send {
    fn release(&mut self) -> Result<(), BackendError>;
}

/// File-backed event or joystick device on Linux.
pub trait LinuxDevice: Send {
    fn close(&mut self) -> Result<(), BackendError>;
}

/// Native resources of one controller, by backend shape.
pub enum NativeHandle {
    DirectInput(Box<dyn DirectInputDevice>),
    Osx(Box<dyn OsxQueue>),
    Linux(Box<dyn LinuxDevice>),
    /// Linux device assembled from an event device and a joystick device.
    Combined {
        event: Box<NativeHandle>,
        joystick: Box<NativeHandle>,
    },
    /// A backend we have no release path for.
    Unrecognized { backend: String },
}

impl NativeHandle {
    pub fn shape(&self) -> &str {
        match self {
            NativeHandle::DirectInput(_) => "DirectInput",
            NativeHandle::Osx(_) => "OSX",
            NativeHandle::Linux(_) => "Linux",
            NativeHandle::Combined { .. } => "LinuxCombined",
            NativeHandle::Unrecognized { backend } => backend,
        }
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeHandle::Combined { event, joystick } => f
                .debug_struct("Combined")
                .field("event", event)
                .field("joystick", joystick)
                .finish(),
            other => f.debug_tuple("NativeHandle").field(&other.shape()).finish(),
        }
    }
}

/// Outcome of a [`release`] call.
#[derive(Debug, Default)]
pub struct ReleaseReport {
    /// Native objects that were freed.
    pub released: usize,
    /// Everything that went wrong, including unsupported shapes.
    pub faults: Vec<InputError>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }

    fn merge(&mut self, other: ReleaseReport) {
        self.released += other.released;
        self.faults.extend(other.faults);
    }
}

/// Frees the native resources behind `handle`.
///
/// A combined handle releases both halves independently, so a failure on one
/// side still lets the other side close.
pub fn release(handle: NativeHandle) -> ReleaseReport {
    let mut report = ReleaseReport::default();
    let shape = handle.shape().to_string();

    let outcome = match handle {
        NativeHandle::DirectInput(mut device) => device.release(),
        NativeHandle::Osx(mut queue) => queue.release(),
        NativeHandle::Linux(mut device) => device.close(),
        NativeHandle::Combined { event, joystick } => {
            report.merge(release(*event));
            report.merge(release(*joystick));
            return report;
        }
        NativeHandle::Unrecognized { backend } => {
            warn!("Close not implemented for: {}", backend);
            report.faults.push(InputError::UnsupportedBackend(backend));
            return report;
        }
    };

    match outcome {
        Ok(()) => {
            debug!("Released native {} device", shape);
            report.released += 1;
        }
        Err(e) => {
            warn!("Failed to close {} device. Message: {}", shape, e);
            report.faults.push(InputError::Release {
                shape,
                message: e.message().to_string(),
            });
        }
    }
    report
}
