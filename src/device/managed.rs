//! A native device with an explicit, idempotent close.
//!
//! [`ManagedDevice`] owns exactly one controller and the exit hooks captured
//! while it was discovered. It is `Open` until the first [`ManagedDevice::close`]
//! and `Closed` for good afterwards. Every pass-through operation takes the same
//! lock as `close`, so a read racing a close either finishes on a live handle or
//! fails with [`InputError::Closed`]; it never touches a released one.

use super::native::{self, ReleaseReport};
use super::{Component, Controller, ControllerKind, Event};
use crate::discovery::hooks::{CapturedHooks, HookRunReport};
use crate::error::{DeviceClass, InputError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

enum Lifecycle {
    Open {
        controller: Box<dyn Controller>,
        hooks: CapturedHooks,
    },
    Closed,
}

/// What the effective `close` call did.
#[derive(Debug)]
pub struct CloseReport {
    pub hooks: HookRunReport,
    pub release: ReleaseReport,
}

pub struct ManagedDevice {
    class: DeviceClass,
    name: String,
    kind: ControllerKind,
    hook_timeout: Duration,
    lifecycle: Mutex<Lifecycle>,
}

impl ManagedDevice {
    pub fn new(
        class: DeviceClass,
        controller: Box<dyn Controller>,
        hooks: CapturedHooks,
        hook_timeout: Duration,
    ) -> Self {
        Self {
            class,
            name: controller.name().to_string(),
            kind: controller.kind(),
            hook_timeout,
            lifecycle: Mutex::new(Lifecycle::Open { controller, hooks }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ControllerKind {
        self.kind
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Closed)
    }

    /// Runs `f` on the open controller while holding the device lock.
    pub fn with_controller<R>(&self, f: impl FnOnce(&mut dyn Controller) -> R) -> Result<R> {
        match &mut *self.lifecycle.lock() {
            Lifecycle::Open { controller, .. } => Ok(f(controller.as_mut())),
            Lifecycle::Closed => Err(InputError::Closed { class: self.class }),
        }
    }

    pub fn poll(&self) -> Result<bool> {
        self.with_controller(|controller| controller.poll())
    }

    pub fn components(&self) -> Result<Vec<Component>> {
        self.with_controller(|controller| controller.components())
    }

    pub fn actuator_count(&self) -> Result<usize> {
        self.with_controller(|controller| controller.actuator_count())
    }

    pub fn set_event_queue_size(&self, size: usize) -> Result<()> {
        self.with_controller(|controller| controller.set_event_queue_size(size))
    }

    /// Empties the event queue, oldest event first.
    pub fn drain_events(&self) -> Result<Vec<Event>> {
        self.with_controller(|controller| std::iter::from_fn(|| controller.next_event()).collect())
    }

    pub fn rumble(&self, actuator: usize, magnitude: f32) -> Result<()> {
        let class = self.class;
        self.with_controller(|controller| controller.rumble(actuator, magnitude))?
            .map_err(|e| InputError::driver(class, e))
    }

    /// Runs the captured hooks, then releases the native handle. Only the first
    /// call does anything; later calls return `None`. Never fails: problems are
    /// logged and collected in the report.
    pub fn close(&self) -> Option<CloseReport> {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Closed);
        let Lifecycle::Open {
            mut controller,
            hooks,
        } = previous
        else {
            debug!("{} '{}' already closed", self.class, self.name);
            return None;
        };

        info!("Closing {} '{}'", self.class, self.name);
        let hooks = hooks.run(self.hook_timeout);

        let release = match controller.take_native() {
            Some(handle) => native::release(handle),
            None => {
                warn!("{} '{}' has no native handle to release", self.class, self.name);
                ReleaseReport::default()
            }
        };
        drop(controller);

        Some(CloseReport { hooks, release })
    }
}

impl Drop for ManagedDevice {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ManagedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedDevice")
            .field("class", &self.class)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Cloneable handle that can close a device from another thread, e.g. while
/// the polling thread is blocked in a read.
#[derive(Clone, Debug)]
pub struct DeviceCloser {
    device: Arc<ManagedDevice>,
}

impl DeviceCloser {
    pub(crate) fn new(device: Arc<ManagedDevice>) -> Self {
        Self { device }
    }

    pub fn close(&self) {
        self.device.close();
    }

    pub fn is_closed(&self) -> bool {
        self.device.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::simulated::{SimulatedDevice, Shape};
    use crate::discovery::hooks::{ExitHooks, HookScavenger, ShutdownHook};
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn open(device: SimulatedDevice, hooks: CapturedHooks) -> ManagedDevice {
        ManagedDevice::new(
            DeviceClass::Joystick,
            Box::new(device.build()),
            hooks,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn second_close_is_a_no_op() {
        let device = SimulatedDevice::gamepad("Pad").with_axes(2);
        let probe = device.probe();
        let managed = open(device, CapturedHooks::default());

        let report = managed.close().expect("first close is effective");
        assert_eq!(report.release.released, 1);
        assert!(managed.close().is_none());
        assert_eq!(probe.release_count(), 1);
    }

    #[test]
    fn operations_after_close_fail_fast() {
        let managed = open(
            SimulatedDevice::gamepad("Pad").with_buttons(1),
            CapturedHooks::default(),
        );
        managed.close();

        assert_eq!(managed.poll().unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(managed.drain_events().unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(managed.components().unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(
            managed.set_event_queue_size(8).unwrap_err().kind(),
            ErrorKind::Closed
        );
    }

    #[test]
    fn close_runs_hooks_before_release() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let table = Arc::new(ExitHooks::new());
        let scavenger = HookScavenger::new(table.clone());
        let ((), hooks) = scavenger.capture(|| {
            let order = order.clone();
            table.register(ShutdownHook::new("env-cleanup", move || {
                order.lock().push("hook")
            }));
        });

        let device = SimulatedDevice::gamepad("Pad")
            .with_axes(1)
            .on_release({
                let order = order.clone();
                move || order.lock().push("release")
            });
        let managed = open(device, hooks);

        let report = managed.close().unwrap();
        assert_eq!(report.hooks.completed, 1);
        assert_eq!(*order.lock(), vec!["hook", "release"]);
    }

    #[test]
    fn dropping_closes_once() {
        let device = SimulatedDevice::gamepad("Pad").with_axes(1);
        let probe = device.probe();
        let managed = open(device, CapturedHooks::default());
        managed.close();
        drop(managed);
        assert_eq!(probe.release_count(), 1);
    }

    #[test]
    fn unsupported_backend_does_not_fail_close() {
        let device = SimulatedDevice::gamepad("Pad")
            .with_axes(1)
            .with_shape(Shape::Unrecognized);
        let managed = open(device, CapturedHooks::default());

        let report = managed.close().unwrap();
        assert_eq!(report.release.released, 0);
        assert_eq!(report.release.faults[0].kind(), ErrorKind::UnsupportedBackend);
    }

    #[test]
    fn failed_release_is_reported_and_close_still_completes() {
        let device = SimulatedDevice::gamepad("Pad").with_axes(1).failing_release();
        let probe = device.probe();
        let managed = open(device, CapturedHooks::default());

        let report = managed.close().unwrap();
        assert_eq!(report.release.released, 0);
        assert_eq!(report.release.faults.len(), 1);
        assert_eq!(report.release.faults[0].kind(), ErrorKind::Release);
        assert!(managed.is_closed());
        assert!(managed.close().is_none());
        assert_eq!(managed.poll().unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(probe.release_count(), 0);
    }

    #[test]
    fn combined_handle_releases_both_parts() {
        let device = SimulatedDevice::gamepad("Pad")
            .with_axes(1)
            .with_shape(Shape::Combined);
        let probe = device.probe();
        let managed = open(device, CapturedHooks::default());

        let report = managed.close().unwrap();
        assert_eq!(report.release.released, 2);
        assert!(report.release.is_clean());
        assert!(managed.close().is_none());
        assert_eq!(probe.release_count(), 2);
    }

    #[test]
    fn every_platform_shape_releases_once() {
        for shape in [Shape::DirectInput, Shape::Osx, Shape::Linux] {
            let device = SimulatedDevice::gamepad("Pad").with_axes(1).with_shape(shape);
            let probe = device.probe();
            let report = open(device, CapturedHooks::default()).close().unwrap();

            assert_eq!(report.release.released, 1, "{shape:?}");
            assert!(report.release.is_clean(), "{shape:?}");
            assert_eq!(probe.release_count(), 1, "{shape:?}");
        }
    }

    #[test]
    fn closer_closes_from_another_thread() {
        let managed = Arc::new(open(
            SimulatedDevice::gamepad("Pad").with_axes(1),
            CapturedHooks::default(),
        ));
        let closer = DeviceCloser::new(managed.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = {
            let calls = calls.clone();
            std::thread::spawn(move || {
                closer.close();
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        handle.join().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(managed.is_closed());
    }
}
