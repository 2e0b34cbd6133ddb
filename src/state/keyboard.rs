//! Keyboard reader.
//!
//! Printable keys land in a table indexed by ASCII code point. Only digits and
//! Latin letters are stored, and an uppercase letter also writes its lowercase
//! slot so callers can ask for either case. Modifiers and navigation keys get
//! their own fields; shift, alt and control combine both sides of the keyboard.

use super::layout::{Sealed, Slot, SlotIndex};
use crate::config::InputConfig;
use crate::device::{printable_char, ComponentId, DeviceCloser, Key, ManagedDevice};
use crate::discovery::BoundedLookup;
use crate::error::{DeviceClass, InputError, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, trace};

const CLASS: DeviceClass = DeviceClass::Keyboard;

/// Size of [`KeyboardState::keys`].
pub const KEY_SLOTS: usize = 128;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KeyboardState {
    /// Indexed by ASCII code point: `keys['a' as usize]`.
    pub keys: Vec<f32>,
    pub ctrl: f32,
    pub alt: f32,
    pub shift: f32,
    pub caps_lock: f32,
    pub tab: f32,
    pub space: f32,
    pub esc: f32,
    pub up: f32,
    pub down: f32,
    pub left: f32,
    pub right: f32,

    #[serde(skip)]
    left_ctrl: f32,
    #[serde(skip)]
    right_ctrl: f32,
    #[serde(skip)]
    left_alt: f32,
    #[serde(skip)]
    right_alt: f32,
    #[serde(skip)]
    left_shift: f32,
    #[serde(skip)]
    right_shift: f32,
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self {
            keys: vec![0.0; KEY_SLOTS],
            ctrl: 0.0,
            alt: 0.0,
            shift: 0.0,
            caps_lock: 0.0,
            tab: 0.0,
            space: 0.0,
            esc: 0.0,
            up: 0.0,
            down: 0.0,
            left: 0.0,
            right: 0.0,
            left_ctrl: 0.0,
            right_ctrl: 0.0,
            left_alt: 0.0,
            right_alt: 0.0,
            left_shift: 0.0,
            right_shift: 0.0,
        }
    }
}

impl KeyboardState {
    /// Value of a digit or letter key; 0 for anything else.
    pub fn key(&self, c: char) -> f32 {
        if c.is_ascii_alphanumeric() {
            self.keys[c as usize]
        } else {
            0.0
        }
    }

    fn apply(&mut self, key: &Key, value: f32) {
        if let Some(c) = printable_char(key).filter(char::is_ascii_alphanumeric) {
            self.keys[c as usize] = value;
            if c.is_ascii_uppercase() {
                self.keys[c.to_ascii_lowercase() as usize] = value;
            }
            return;
        }

        match key {
            Key::LShift => self.left_shift = value,
            Key::RShift => self.right_shift = value,
            Key::LAlt => self.left_alt = value,
            Key::RAlt => self.right_alt = value,
            Key::LControl => self.left_ctrl = value,
            Key::RControl => self.right_ctrl = value,
            Key::CapsLock => self.caps_lock = value,
            Key::Tab => self.tab = value,
            Key::Space => self.space = value,
            Key::Escape => self.esc = value,
            Key::Up => self.up = value,
            Key::Down => self.down = value,
            Key::Left => self.left = value,
            Key::Right => self.right = value,
            Key::Char(_) | Key::Other(_) => trace!("Untracked key {:?}", key),
        }
    }

    fn combine_sides(&mut self) {
        self.shift = self.left_shift.max(self.right_shift);
        self.alt = self.left_alt.max(self.right_alt);
        self.ctrl = self.left_ctrl.max(self.right_ctrl);
    }
}

/// Folds a keyboard's event queue into a [`KeyboardState`] on every read.
pub struct KeyboardReader {
    device: Arc<ManagedDevice>,
    index: SlotIndex<Sealed>,
    state: KeyboardState,
}

impl KeyboardReader {
    /// Opens the `ordinal`-th (1-based) keyboard and applies `config`.
    pub async fn open(
        lookup: &BoundedLookup,
        ordinal: usize,
        config: &InputConfig,
    ) -> Result<Self> {
        let device = lookup
            .find(CLASS, ordinal, config.lookup_timeout())
            .await?;
        let reader = Self::from_device(device)?;
        if let Some(size) = config.event_queue_size {
            reader.set_event_queue_size(size)?;
        }
        Ok(reader)
    }

    pub fn from_device(device: ManagedDevice) -> Result<Self> {
        let index = SlotIndex::<Sealed>::from_components(&device.components()?);
        if index.keys() == 0 {
            return Err(InputError::Layout {
                class: CLASS,
                message: format!("'{}' has no keys", device.name()),
            });
        }
        info!("Opened keyboard '{}' with {} keys", device.name(), index.keys());

        Ok(Self {
            device: Arc::new(device),
            index,
            state: KeyboardState::default(),
        })
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }

    /// Number of keys the device exposes.
    pub fn key_count(&self) -> usize {
        self.index.keys()
    }

    pub fn slot_of(&self, id: ComponentId) -> Option<&Slot> {
        self.index.slot(id)
    }

    pub fn read(&mut self) -> Result<&KeyboardState> {
        if !self.device.poll()? {
            return Err(InputError::Io { class: CLASS });
        }

        for event in self.device.drain_events()? {
            match self.index.slot(event.component) {
                Some(Slot::Key(key)) => self.state.apply(key, event.value),
                _ => trace!("Ignoring event for component {}", event.component),
            }
        }
        self.state.combine_sides();

        Ok(&self.state)
    }

    pub fn set_event_queue_size(&self, size: usize) -> Result<()> {
        self.device.set_event_queue_size(size)
    }

    pub fn closer(&self) -> DeviceCloser {
        DeviceCloser::new(self.device.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.device.is_closed()
    }

    pub fn close(&self) {
        self.device.close();
    }
}

impl std::fmt::Debug for KeyboardReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyboardReader")
            .field("device", &self.device)
            .field("keys", &self.index.keys())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::simulated::{DeviceProbe, SimulatedDevice};
    use crate::discovery::CapturedHooks;
    use crate::error::ErrorKind;
    use std::time::Duration;

    fn reader() -> (KeyboardReader, DeviceProbe) {
        let device = SimulatedDevice::keyboard("Keys").with_keys([
            Key::Char('A'),
            Key::Char('7'),
            Key::Char(';'),
            Key::LShift,
            Key::RShift,
            Key::LControl,
            Key::RAlt,
            Key::Space,
            Key::Escape,
            Key::Left,
            Key::Other("F13".into()),
        ]);
        let probe = device.probe();
        let managed = ManagedDevice::new(
            CLASS,
            Box::new(device.build()),
            CapturedHooks::default(),
            Duration::from_secs(1),
        );
        (KeyboardReader::from_device(managed).unwrap(), probe)
    }

    #[test]
    fn uppercase_letters_write_both_cases() {
        let (mut reader, probe) = reader();
        probe.send("A", 1.0);

        let state = reader.read().unwrap();
        assert_eq!(state.key('A'), 1.0);
        assert_eq!(state.key('a'), 1.0);
        assert_eq!(state.keys['a' as usize], 1.0);
    }

    #[test]
    fn digits_are_stored_and_punctuation_is_not() {
        let (mut reader, probe) = reader();
        probe.send("7", 1.0);
        probe.send(";", 1.0);

        let state = reader.read().unwrap();
        assert_eq!(state.key('7'), 1.0);
        assert_eq!(state.key(';'), 0.0);
        assert_eq!(state.keys[';' as usize], 0.0);
        assert_eq!(state.keys.len(), KEY_SLOTS);
    }

    #[test]
    fn modifier_sides_combine_by_maximum() {
        let (mut reader, probe) = reader();
        probe.send("Left Shift", 1.0);
        probe.send("Right Shift", 0.0);
        assert_eq!(reader.read().unwrap().shift, 1.0);

        probe.send("Right Shift", 1.0);
        probe.send("Left Shift", 0.0);
        assert_eq!(reader.read().unwrap().shift, 1.0);

        probe.send("Right Shift", 0.0);
        assert_eq!(reader.read().unwrap().shift, 0.0);

        probe.send("Left Control", 1.0);
        probe.send("Right Alt", 1.0);
        let state = reader.read().unwrap();
        assert_eq!((state.ctrl, state.alt), (1.0, 1.0));
    }

    #[test]
    fn named_keys_have_their_own_fields() {
        let (mut reader, probe) = reader();
        probe.send("Space", 1.0);
        probe.send("Escape", 1.0);
        probe.send("Left", 1.0);
        probe.send("F13", 1.0);

        let state = reader.read().unwrap();
        assert_eq!((state.space, state.esc, state.left), (1.0, 1.0, 1.0));
        assert_eq!(state.right, 0.0);
    }

    #[test]
    fn every_key_component_is_counted() {
        let (reader, probe) = reader();
        assert_eq!(reader.key_count(), 11);
        assert!(matches!(
            reader.slot_of(probe.id("7").unwrap()),
            Some(Slot::Key(Key::Char('7')))
        ));
    }

    #[test]
    fn keyless_device_is_refused() {
        let managed = ManagedDevice::new(
            CLASS,
            Box::new(SimulatedDevice::keyboard("Blank").build()),
            CapturedHooks::default(),
            Duration::from_secs(1),
        );
        let err = KeyboardReader::from_device(managed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Layout);
    }

    #[test]
    fn read_after_close_fails() {
        let (mut reader, _) = reader();
        reader.close();
        reader.close();
        assert_eq!(reader.read().unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(
            reader.read().unwrap_err().to_string(),
            "Keyboard device error: Closed or invalid keyboard device"
        );
    }

    #[test]
    fn snapshot_serializes_without_side_fields() {
        let (mut reader, probe) = reader();
        probe.send("Left Shift", 1.0);
        let state = reader.read().unwrap();

        let rendered = toml::to_string(state).unwrap();
        assert!(rendered.contains("shift = 1.0"));
        assert!(!rendered.contains("left_shift"));
    }
}
