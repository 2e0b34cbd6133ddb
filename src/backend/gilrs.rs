//! Native environment backed by gilrs.
//!
//! Every enumeration opens a fresh [`Gilrs`] context shared by the gamepads it
//! returns. gilrs reports events for all gamepads through one queue, so each
//! poll pumps that queue into per-gamepad queues. The context is dropped once
//! the last of its gamepads has been released.
//!
//! gilrs exposes no keyboards and no hat switches (d-pads are buttons or axes),
//! so everything enumerated here is a [`ControllerKind::Gamepad`].

use crate::device::{
    Component, ComponentId, Controller, ControllerEnvironment, ControllerKind, EnvironmentFactory,
    Event, Identifier, NativeHandle,
};
use crate::error::BackendError;
use gilrs::ff::{BaseEffect, BaseEffectType, Effect, EffectBuilder, Repeat};
use gilrs::{Axis, Button, EventType, GamepadId, Gilrs};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

const AXES: [Axis; 8] = [
    Axis::LeftStickX,
    Axis::LeftStickY,
    Axis::LeftZ,
    Axis::RightStickX,
    Axis::RightStickY,
    Axis::RightZ,
    Axis::DPadX,
    Axis::DPadY,
];

const BUTTONS: [Button; 19] = [
    Button::South,
    Button::East,
    Button::North,
    Button::West,
    Button::C,
    Button::Z,
    Button::LeftTrigger,
    Button::LeftTrigger2,
    Button::RightTrigger,
    Button::RightTrigger2,
    Button::Select,
    Button::Start,
    Button::Mode,
    Button::LeftThumb,
    Button::RightThumb,
    Button::DPadUp,
    Button::DPadDown,
    Button::DPadLeft,
    Button::DPadRight,
];

// Strong and weak rumble motors.
const ACTUATORS: usize = 2;

#[derive(Default)]
struct GamepadQueue {
    events: VecDeque<Event>,
    limit: Option<usize>,
}

/// One gilrs context and the queues of the gamepads enumerated from it.
struct Hub {
    gilrs: Option<Gilrs>,
    queues: HashMap<GamepadId, GamepadQueue>,
}

impl Hub {
    fn pump(&mut self) {
        let Some(gilrs) = self.gilrs.as_mut() else {
            return;
        };
        while let Some(gilrs::Event { id, event, .. }) = gilrs.next_event() {
            let (value, code) = match event {
                EventType::AxisChanged(_, value, code) => (value, code),
                EventType::ButtonChanged(_, value, code) => (value, code),
                other => {
                    debug!("Skipping gilrs event {:?} from {}", other, id);
                    continue;
                }
            };
            if let Some(queue) = self.queues.get_mut(&id) {
                if queue.limit.is_some_and(|limit| queue.events.len() >= limit) {
                    debug!("Event queue of {} full, dropping event", id);
                    continue;
                }
                queue
                    .events
                    .push_back(Event::new(ComponentId(code.into_u32()), value));
            }
        }
    }

    fn connected(&self, id: GamepadId) -> bool {
        self.gilrs
            .as_ref()
            .is_some_and(|gilrs| gilrs.connected_gamepad(id).is_some())
    }

    fn detach(&mut self, id: GamepadId) {
        self.queues.remove(&id);
        if self.queues.is_empty() && self.gilrs.take().is_some() {
            info!("Last gamepad released, closing gilrs context");
        }
    }
}

/// Environment that enumerates gamepads through gilrs.
#[derive(Clone, Copy, Debug, Default)]
pub struct GilrsEnvironment;

impl GilrsEnvironment {
    pub fn factory() -> EnvironmentFactory {
        Arc::new(|| Ok(Box::new(GilrsEnvironment) as Box<dyn ControllerEnvironment>))
    }
}

impl ControllerEnvironment for GilrsEnvironment {
    fn controllers(&mut self) -> Result<Vec<Box<dyn Controller>>, BackendError> {
        let gilrs = Gilrs::new().map_err(|e| BackendError::new(e.to_string()))?;

        let mut found = Vec::new();
        for (id, gamepad) in gilrs.gamepads() {
            let mut components = Vec::new();
            for axis in AXES {
                if let Some(code) = gamepad.axis_code(axis) {
                    let name = format!("{:?}", axis);
                    let identifier = Identifier::Axis(name.clone());
                    components.push(Component::new(code.into_u32(), identifier, name));
                }
            }
            for button in BUTTONS {
                if let Some(code) = gamepad.button_code(button) {
                    let name = format!("{:?}", button);
                    let identifier = Identifier::Button(name.clone());
                    components.push(Component::new(code.into_u32(), identifier, name));
                }
            }
            let actuators = if gamepad.is_ff_supported() { ACTUATORS } else { 0 };
            info!(
                "  [{}] {} with {} components, force feedback: {}",
                id,
                gamepad.name(),
                components.len(),
                actuators > 0
            );
            found.push((id, gamepad.name().to_string(), components, actuators));
        }

        let hub = Arc::new(Mutex::new(Hub {
            gilrs: Some(gilrs),
            queues: found
                .iter()
                .map(|(id, ..)| (*id, GamepadQueue::default()))
                .collect(),
        }));

        Ok(found
            .into_iter()
            .map(|(id, name, components, actuators)| {
                Box::new(GilrsGamepad {
                    id,
                    name,
                    components,
                    actuators,
                    effects: Default::default(),
                    hub: Some(hub.clone()),
                }) as Box<dyn Controller>
            })
            .collect())
    }
}

struct GilrsGamepad {
    id: GamepadId,
    name: String,
    components: Vec<Component>,
    actuators: usize,
    effects: [Option<Effect>; ACTUATORS],
    hub: Option<Arc<Mutex<Hub>>>,
}

impl Controller for GilrsGamepad {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ControllerKind {
        ControllerKind::Gamepad
    }

    fn components(&self) -> Vec<Component> {
        self.components.clone()
    }

    fn actuator_count(&self) -> usize {
        self.actuators
    }

    fn rumble(&mut self, actuator: usize, magnitude: f32) -> Result<(), BackendError> {
        if actuator >= self.actuators {
            return Err(BackendError::new(format!("no actuator {actuator}")));
        }
        let hub = self
            .hub
            .as_ref()
            .ok_or_else(|| BackendError::new("gamepad already released"))?;

        // Dropping the old effect stops it.
        self.effects[actuator] = None;
        if magnitude <= 0.0 {
            return Ok(());
        }

        let magnitude = (magnitude.min(1.0) * u16::MAX as f32) as u16;
        let kind = if actuator == 0 {
            BaseEffectType::Strong { magnitude }
        } else {
            BaseEffectType::Weak { magnitude }
        };

        let mut hub = hub.lock();
        let gilrs = hub
            .gilrs
            .as_mut()
            .ok_or_else(|| BackendError::new("gilrs context closed"))?;
        let effect = EffectBuilder::new()
            .add_effect(BaseEffect {
                kind,
                ..Default::default()
            })
            .gamepads(&[self.id])
            .repeat(Repeat::Infinitely)
            .finish(gilrs)
            .map_err(|e| BackendError::new(e.to_string()))?;
        effect.play().map_err(|e| BackendError::new(e.to_string()))?;
        self.effects[actuator] = Some(effect);
        Ok(())
    }

    fn poll(&mut self) -> bool {
        match &self.hub {
            Some(hub) => {
                let mut hub = hub.lock();
                hub.pump();
                hub.connected(self.id)
            }
            None => false,
        }
    }

    fn next_event(&mut self) -> Option<Event> {
        self.hub
            .as_ref()?
            .lock()
            .queues
            .get_mut(&self.id)?
            .events
            .pop_front()
    }

    fn set_event_queue_size(&mut self, size: usize) {
        if let Some(hub) = &self.hub {
            if let Some(queue) = hub.lock().queues.get_mut(&self.id) {
                queue.limit = Some(size);
            }
        }
    }

    fn take_native(&mut self) -> Option<NativeHandle> {
        let native = GilrsNative {
            id: self.id,
            hub: self.hub.take()?,
            effects: std::mem::take(&mut self.effects),
        };
        Some(native.into_handle())
    }
}

/// Native resources of one gilrs gamepad: its queue, its effects and a share
/// of the context.
struct GilrsNative {
    id: GamepadId,
    hub: Arc<Mutex<Hub>>,
    effects: [Option<Effect>; ACTUATORS],
}

impl GilrsNative {
    fn free(&mut self) -> Result<(), BackendError> {
        for effect in self.effects.iter_mut().filter_map(Option::take) {
            if let Err(e) = effect.stop() {
                warn!("Failed to stop rumble on {}: {}", self.id, e);
            }
        }
        self.hub.lock().detach(self.id);
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn into_handle(self) -> NativeHandle {
        NativeHandle::Linux(Box::new(self))
    }

    #[cfg(target_os = "macos")]
    fn into_handle(self) -> NativeHandle {
        NativeHandle::Osx(Box::new(self))
    }

    #[cfg(target_os = "windows")]
    fn into_handle(self) -> NativeHandle {
        NativeHandle::DirectInput(Box::new(self))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    fn into_handle(self) -> NativeHandle {
        NativeHandle::Unrecognized {
            backend: "gilrs".to_string(),
        }
    }
}

#[cfg(target_os = "linux")]
impl crate::device::LinuxDevice for GilrsNative {
    fn close(&mut self) -> Result<(), BackendError> {
        self.free()
    }
}

#[cfg(target_os = "macos")]
impl crate::device::OsxQueue for GilrsNative {
    fn release(&mut self) -> Result<(), BackendError> {
        self.free()
    }
}

#[cfg(target_os = "windows")]
impl crate::device::DirectInputDevice for GilrsNative {
    fn release(&mut self) -> Result<(), BackendError> {
        self.free()
    }
}
