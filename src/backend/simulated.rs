//! In-process environment with scripted devices.
//!
//! Useful for tests and for hosts that want to exercise their polling loop
//! without hardware. A [`SimulatedDevice`] describes a controller; its
//! [`DeviceProbe`] feeds events into it and observes what the library did to it
//! (rumble calls, releases). A [`SimulatedEnvironment`] lists devices in order
//! and can misbehave the way native environments do: register exit hooks,
//! stall, or fail outright.

use crate::device::{
    Component, ComponentId, Controller, ControllerEnvironment, ControllerKind, DirectInputDevice,
    EnvironmentFactory, Event, Identifier, Key, LinuxDevice, NativeHandle, OsxQueue,
};
use crate::discovery::hooks::{ExitHooks, ShutdownHook};
use crate::error::BackendError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const AXIS_NAMES: [&str; 8] = ["x", "y", "z", "rx", "ry", "rz", "slider", "dial"];

/// Which native shape a simulated controller reports on release.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Shape {
    DirectInput,
    Osx,
    #[default]
    Linux,
    Combined,
    Unrecognized,
}

type ReleaseCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct SharedState {
    queue: VecDeque<Event>,
    queue_limit: Option<usize>,
    disconnected: bool,
    releases: usize,
    rumbles: Vec<(usize, f32)>,
    fail_release: bool,
}

/// Description of a simulated controller.
#[derive(Clone)]
pub struct SimulatedDevice {
    name: String,
    kind: ControllerKind,
    components: Vec<Component>,
    actuators: usize,
    shape: Shape,
    on_release: Option<ReleaseCallback>,
    state: Arc<Mutex<SharedState>>,
}

impl SimulatedDevice {
    pub fn new(name: impl Into<String>, kind: ControllerKind) -> Self {
        Self {
            name: name.into(),
            kind,
            components: Vec::new(),
            actuators: 0,
            shape: Shape::default(),
            on_release: None,
            state: Arc::new(Mutex::new(SharedState::default())),
        }
    }

    pub fn gamepad(name: impl Into<String>) -> Self {
        Self::new(name, ControllerKind::Gamepad)
    }

    pub fn keyboard(name: impl Into<String>) -> Self {
        Self::new(name, ControllerKind::Keyboard)
    }

    fn next_id(&self) -> u32 {
        self.components.len() as u32
    }

    pub fn with_component(mut self, identifier: Identifier, name: &str, relative: bool) -> Self {
        let mut component = Component::new(self.next_id(), identifier, name);
        component.relative = relative;
        self.components.push(component);
        self
    }

    /// Adds absolute axes named `x`, `y`, `z`, `rx`, ... in that order.
    pub fn with_axes(mut self, count: usize) -> Self {
        for _ in 0..count {
            let n = self.axis_count();
            let name = AXIS_NAMES
                .get(n)
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("axis{n}"));
            self = self.with_component(Identifier::Axis(name.clone()), &name, false);
        }
        self
    }

    /// Adds a relative axis (mouse-style deltas).
    pub fn with_relative_axis(self, name: &str) -> Self {
        self.with_component(Identifier::Axis(name.to_string()), name, true)
    }

    /// Adds buttons named `0`, `1`, `2`, ...
    pub fn with_buttons(mut self, count: usize) -> Self {
        for _ in 0..count {
            let n = self
                .components
                .iter()
                .filter(|c| matches!(c.identifier, Identifier::Button(_)))
                .count();
            let name = n.to_string();
            self = self.with_component(Identifier::Button(name.clone()), &name, false);
        }
        self
    }

    /// Adds hat switches named `pov`, `pov2`, `pov3`, ...
    pub fn with_hats(mut self, count: usize) -> Self {
        for _ in 0..count {
            let n = self
                .components
                .iter()
                .filter(|c| c.identifier == Identifier::Pov)
                .count();
            let name = if n == 0 {
                "pov".to_string()
            } else {
                format!("pov{}", n + 1)
            };
            self = self.with_component(Identifier::Pov, &name, false);
        }
        self
    }

    /// Adds keys, each named after [`key_name`].
    pub fn with_keys(mut self, keys: impl IntoIterator<Item = Key>) -> Self {
        for key in keys {
            let name = key_name(&key);
            self = self.with_component(Identifier::Key(key), &name, false);
        }
        self
    }

    pub fn with_actuators(mut self, count: usize) -> Self {
        self.actuators = count;
        self
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = shape;
        self
    }

    /// Makes every native release of this device fail.
    pub fn failing_release(self) -> Self {
        self.state.lock().fail_release = true;
        self
    }

    /// Called for every native object released.
    pub fn on_release(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_release = Some(Arc::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn probe(&self) -> DeviceProbe {
        DeviceProbe {
            components: self.components.clone(),
            state: self.state.clone(),
        }
    }

    /// Creates a controller sharing this device's event queue.
    pub fn build(&self) -> SimulatedController {
        SimulatedController {
            device: self.clone(),
            native_taken: false,
        }
    }

    fn axis_count(&self) -> usize {
        self.components
            .iter()
            .filter(|c| matches!(c.identifier, Identifier::Axis(_)))
            .count()
    }
}

/// Native name of a key as the simulated backend reports it.
pub fn key_name(key: &Key) -> String {
    match key {
        Key::Char(c) => c.to_string(),
        Key::LShift => "Left Shift".into(),
        Key::RShift => "Right Shift".into(),
        Key::LAlt => "Left Alt".into(),
        Key::RAlt => "Right Alt".into(),
        Key::LControl => "Left Control".into(),
        Key::RControl => "Right Control".into(),
        Key::CapsLock => "Caps Lock".into(),
        Key::Tab => "Tab".into(),
        Key::Space => "Space".into(),
        Key::Escape => "Escape".into(),
        Key::Up => "Up".into(),
        Key::Down => "Down".into(),
        Key::Left => "Left".into(),
        Key::Right => "Right".into(),
        Key::Other(name) => name.clone(),
    }
}

/// Test-side handle of a simulated device.
#[derive(Clone)]
pub struct DeviceProbe {
    components: Vec<Component>,
    state: Arc<Mutex<SharedState>>,
}

impl DeviceProbe {
    pub fn id(&self, name: &str) -> Option<ComponentId> {
        self.components
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.id)
    }

    /// Queues an event for the component called `name`.
    ///
    /// # Panics
    ///
    /// If the device has no such component.
    pub fn send(&self, name: &str, value: f32) {
        let id = self
            .id(name)
            .unwrap_or_else(|| panic!("simulated device has no component {name:?}"));
        self.send_raw(id, value);
    }

    /// Queues an event for an arbitrary component id, known or not.
    pub fn send_raw(&self, component: ComponentId, value: f32) {
        let mut state = self.state.lock();
        if state.queue_limit.is_some_and(|limit| state.queue.len() >= limit) {
            debug!("Simulated event queue full, dropping event for {}", component);
            return;
        }
        state.queue.push_back(Event::new(component, value));
    }

    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    pub fn reconnect(&self) {
        self.state.lock().disconnected = false;
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().releases
    }

    pub fn rumbles(&self) -> Vec<(usize, f32)> {
        self.state.lock().rumbles.clone()
    }

    pub fn queue_limit(&self) -> Option<usize> {
        self.state.lock().queue_limit
    }

    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }
}

/// Controller produced by [`SimulatedDevice::build`].
pub struct SimulatedController {
    device: SimulatedDevice,
    native_taken: bool,
}

impl Controller for SimulatedController {
    fn name(&self) -> &str {
        &self.device.name
    }

    fn kind(&self) -> ControllerKind {
        self.device.kind
    }

    fn components(&self) -> Vec<Component> {
        self.device.components.clone()
    }

    fn actuator_count(&self) -> usize {
        self.device.actuators
    }

    fn rumble(&mut self, actuator: usize, magnitude: f32) -> Result<(), BackendError> {
        if actuator >= self.device.actuators {
            return Err(BackendError::new(format!("no actuator {actuator}")));
        }
        self.device.state.lock().rumbles.push((actuator, magnitude));
        Ok(())
    }

    fn poll(&mut self) -> bool {
        !self.device.state.lock().disconnected
    }

    fn next_event(&mut self) -> Option<Event> {
        self.device.state.lock().queue.pop_front()
    }

    fn set_event_queue_size(&mut self, size: usize) {
        self.device.state.lock().queue_limit = Some(size);
    }

    fn take_native(&mut self) -> Option<NativeHandle> {
        if self.native_taken {
            return None;
        }
        self.native_taken = true;

        let part = || SimulatedNative {
            state: self.device.state.clone(),
            on_release: self.device.on_release.clone(),
        };
        Some(match self.device.shape {
            Shape::DirectInput => NativeHandle::DirectInput(Box::new(part())),
            Shape::Osx => NativeHandle::Osx(Box::new(part())),
            Shape::Linux => NativeHandle::Linux(Box::new(part())),
            Shape::Combined => NativeHandle::Combined {
                event: Box::new(NativeHandle::Linux(Box::new(part()))),
                joystick: Box::new(NativeHandle::Linux(Box::new(part()))),
            },
            Shape::Unrecognized => NativeHandle::Unrecognized {
                backend: "SimulatedUnknown".to_string(),
            },
        })
    }
}

struct SimulatedNative {
    state: Arc<Mutex<SharedState>>,
    on_release: Option<ReleaseCallback>,
}

impl SimulatedNative {
    fn free(&mut self) -> Result<(), BackendError> {
        {
            let mut state = self.state.lock();
            if state.fail_release {
                return Err(BackendError::new("simulated release failure"));
            }
            state.releases += 1;
        }
        if let Some(callback) = &self.on_release {
            callback();
        }
        Ok(())
    }
}

impl DirectInputDevice for SimulatedNative {
    fn release(&mut self) -> Result<(), BackendError> {
        self.free()
    }
}

impl OsxQueue for SimulatedNative {
    fn release(&mut self) -> Result<(), BackendError> {
        self.free()
    }
}

impl LinuxDevice for SimulatedNative {
    fn close(&mut self) -> Result<(), BackendError> {
        self.free()
    }
}

#[derive(Default)]
struct EnvironmentScript {
    devices: Vec<SimulatedDevice>,
    hook_table: Option<Arc<ExitHooks>>,
    hooks_per_enumeration: usize,
    hook_delay: Option<Duration>,
    stall: Option<Duration>,
    failure: Option<String>,
    enumerations: AtomicUsize,
    hook_runs: Arc<AtomicUsize>,
}

/// Ordered list of simulated devices plus misbehaviour knobs.
#[derive(Clone, Default)]
pub struct SimulatedEnvironment {
    script: Arc<EnvironmentScript>,
}

impl SimulatedEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    fn edit(mut self, f: impl FnOnce(&mut EnvironmentScript)) -> Self {
        match Arc::get_mut(&mut self.script) {
            Some(script) => f(script),
            None => {
                let mut script = EnvironmentScript {
                    devices: self.script.devices.clone(),
                    hook_table: self.script.hook_table.clone(),
                    hooks_per_enumeration: self.script.hooks_per_enumeration,
                    hook_delay: self.script.hook_delay,
                    stall: self.script.stall,
                    failure: self.script.failure.clone(),
                    hook_runs: self.script.hook_runs.clone(),
                    ..Default::default()
                };
                f(&mut script);
                self.script = Arc::new(script);
            }
        }
        self
    }

    pub fn with_device(self, device: SimulatedDevice) -> Self {
        self.edit(|script| script.devices.push(device))
    }

    /// Registers `count` exit hooks into `table` on every enumeration, the way
    /// native plugins install their own cleanup.
    pub fn registering_hooks(self, table: Arc<ExitHooks>, count: usize) -> Self {
        self.edit(|script| {
            script.hook_table = Some(table);
            script.hooks_per_enumeration = count;
        })
    }

    /// Makes every registered hook sleep this long before it counts as run.
    pub fn with_slow_hooks(self, delay: Duration) -> Self {
        self.edit(|script| script.hook_delay = Some(delay))
    }

    /// Sleeps this long inside enumeration, after hooks were registered.
    pub fn stalling(self, stall: Duration) -> Self {
        self.edit(|script| script.stall = Some(stall))
    }

    pub fn failing(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.edit(|script| script.failure = Some(message))
    }

    pub fn enumerations(&self) -> usize {
        self.script.enumerations.load(Ordering::SeqCst)
    }

    /// How many hooks registered by this environment have run.
    pub fn hook_runs(&self) -> usize {
        self.script.hook_runs.load(Ordering::SeqCst)
    }

    pub fn factory(&self) -> EnvironmentFactory {
        let script = self.script.clone();
        Arc::new(move || {
            Ok(Box::new(SimulatedEnumeration {
                script: script.clone(),
            }) as Box<dyn ControllerEnvironment>)
        })
    }
}

struct SimulatedEnumeration {
    script: Arc<EnvironmentScript>,
}

impl ControllerEnvironment for SimulatedEnumeration {
    fn controllers(&mut self) -> Result<Vec<Box<dyn Controller>>, BackendError> {
        let script = &self.script;
        let round = script.enumerations.fetch_add(1, Ordering::SeqCst);

        if let Some(table) = &script.hook_table {
            for n in 0..script.hooks_per_enumeration {
                let runs = script.hook_runs.clone();
                let delay = script.hook_delay;
                table.register(ShutdownHook::new(
                    format!("simulated-env-{round}-hook-{n}"),
                    move || {
                        if let Some(delay) = delay {
                            std::thread::sleep(delay);
                        }
                        runs.fetch_add(1, Ordering::SeqCst);
                    },
                ));
            }
        }

        if let Some(stall) = script.stall {
            std::thread::sleep(stall);
        }

        if let Some(message) = &script.failure {
            return Err(BackendError::new(message.clone()));
        }

        Ok(script
            .devices
            .iter()
            .map(|device| Box::new(device.build()) as Box<dyn Controller>)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_get_sequential_ids_and_names() {
        let device = SimulatedDevice::gamepad("Pad")
            .with_axes(2)
            .with_buttons(2)
            .with_hats(2);
        let names: Vec<_> = device.components().iter().map(|c| c.name.as_str()).collect();

        assert_eq!(names, vec!["x", "y", "0", "1", "pov", "pov2"]);
        assert_eq!(device.probe().id("pov"), Some(ComponentId(4)));
    }

    #[test]
    fn queue_limit_drops_overflow() {
        let device = SimulatedDevice::gamepad("Pad").with_axes(1);
        let probe = device.probe();
        let mut controller = device.build();
        controller.set_event_queue_size(2);

        for value in [0.1, 0.2, 0.3] {
            probe.send("x", value);
        }

        assert_eq!(probe.pending(), 2);
        assert_eq!(controller.next_event().map(|e| e.value), Some(0.1));
    }

    #[test]
    fn enumeration_registers_hooks_and_can_fail() {
        let table = Arc::new(ExitHooks::new());
        let env = SimulatedEnvironment::new()
            .with_device(SimulatedDevice::keyboard("Keys"))
            .registering_hooks(table.clone(), 2)
            .failing("driver missing");

        let factory = env.factory();
        let mut enumeration = factory().unwrap();
        let err = enumeration.controllers().err().unwrap();

        assert_eq!(err.message(), "driver missing");
        assert_eq!(table.len(), 2);
        assert_eq!(env.enumerations(), 1);
    }
}
