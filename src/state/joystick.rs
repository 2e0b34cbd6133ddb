//! Joystick and gamepad reader.

use super::layout::{Sealed, Slot, SlotIndex};
use super::{fold, Capabilities};
use crate::config::InputConfig;
use crate::device::{hat_angle, DeviceCloser, ManagedDevice};
use crate::discovery::BoundedLookup;
use crate::error::{DeviceClass, InputError, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, trace};

const CLASS: DeviceClass = DeviceClass::Joystick;

/// Latest known values, one entry per slot.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct JoystickState {
    pub axes: Vec<f32>,
    pub buttons: Vec<f32>,
    /// Degrees clockwise from up, -1 when centered.
    pub hats: Vec<f64>,
}

impl JoystickState {
    fn sized(capabilities: &Capabilities) -> Self {
        Self {
            axes: vec![0.0; capabilities.axes],
            buttons: vec![0.0; capabilities.buttons],
            hats: vec![-1.0; capabilities.hats],
        }
    }
}

/// Folds a joystick's event queue into a [`JoystickState`] on every read.
///
/// A reader is driven by one polling thread. To close it from elsewhere, hand
/// out a [`DeviceCloser`] with [`JoystickReader::closer`].
pub struct JoystickReader {
    device: Arc<ManagedDevice>,
    index: SlotIndex<Sealed>,
    capabilities: Capabilities,
    state: JoystickState,
}

impl JoystickReader {
    /// Opens the `ordinal`-th (1-based) joystick and applies `config`.
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

    /// Builds the slot index from the device's components. The device is
    /// closed if it has no axes, buttons or hats at all.
    pub fn from_device(device: ManagedDevice) -> Result<Self> {
        let index = SlotIndex::<Sealed>::from_components(&device.components()?);
        if index.axes() + index.buttons() + index.hats() == 0 {
            return Err(InputError::Layout {
                class: CLASS,
                message: format!("'{}' has no axes, buttons or hats", device.name()),
            });
        }

        let capabilities = Capabilities {
            axes: index.axes(),
            buttons: index.buttons(),
            hats: index.hats(),
            actuators: device.actuator_count()?,
        };
        info!("Opened joystick '{}': {:?}", device.name(), capabilities);

        Ok(Self {
            state: JoystickState::sized(&capabilities),
            device: Arc::new(device),
            index,
            capabilities,
        })
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Slot the component with `id` was assigned at open.
    pub fn slot_of(&self, id: crate::device::ComponentId) -> Option<&Slot> {
        self.index.slot(id)
    }

    /// Polls the device and applies every queued event in delivery order.
    pub fn read(&mut self) -> Result<&JoystickState> {
        if !self.device.poll()? {
            return Err(InputError::Io { class: CLASS });
        }

        for event in self.device.drain_events()? {
            match self.index.slot(event.component) {
                Some(Slot::Axis { index, relative }) => {
                    fold(&mut self.state.axes[*index], event.value, *relative)
                }
                Some(Slot::Button { index, relative }) => {
                    fold(&mut self.state.buttons[*index], event.value, *relative)
                }
                Some(Slot::Hat(index)) => self.state.hats[*index] = hat_angle(event.value),
                Some(Slot::Key(_)) | None => {
                    trace!("Ignoring event for component {}", event.component)
                }
            }
        }

        Ok(&self.state)
    }

    /// Drives force feedback actuators. `slots` are 1-based; `magnitudes` holds
    /// either one value for every slot or one value per slot. Nothing is driven
    /// unless the whole request is valid.
    pub fn apply_force(&self, slots: &[usize], magnitudes: &[f32]) -> Result<()> {
        if self.device.is_closed() {
            return Err(InputError::Closed { class: CLASS });
        }

        let count = self.capabilities.actuators;
        if count == 0 {
            return Err(InputError::NoActuators);
        }
        if slots.is_empty() || magnitudes.is_empty() {
            return Err(InputError::InvalidArgs(
                "Indices and values can't be empty".into(),
            ));
        }
        if magnitudes.len() != 1 && magnitudes.len() != slots.len() {
            return Err(InputError::InvalidArgs(
                "Values must be a scalar or a vector of the same length as indices".into(),
            ));
        }
        if let Some(&index) = slots.iter().find(|&&slot| slot == 0 || slot - 1 >= count) {
            return Err(InputError::IndexOutOfRange { index, count });
        }

        for (n, &slot) in slots.iter().enumerate() {
            let magnitude = if magnitudes.len() == 1 {
                magnitudes[0]
            } else {
                magnitudes[n]
            };
            debug!("Rumble actuator {} at {}", slot, magnitude);
            self.device.rumble(slot - 1, magnitude)?;
        }
        Ok(())
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

impl std::fmt::Debug for JoystickReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoystickReader")
            .field("device", &self.device)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::simulated::{DeviceProbe, SimulatedDevice};
    use crate::device::pov;
    use crate::discovery::CapturedHooks;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn reader(device: SimulatedDevice) -> (JoystickReader, DeviceProbe) {
        let probe = device.probe();
        let managed = ManagedDevice::new(
            CLASS,
            Box::new(device.build()),
            CapturedHooks::default(),
            Duration::from_secs(1),
        );
        (JoystickReader::from_device(managed).unwrap(), probe)
    }

    fn pad() -> SimulatedDevice {
        SimulatedDevice::gamepad("Pad")
            .with_axes(3)
            .with_buttons(4)
            .with_hats(1)
            .with_relative_axis("wheel")
            .with_actuators(2)
    }

    #[test]
    fn fresh_state_is_zeroed_with_centered_hats() {
        let (mut reader, _) = reader(pad());
        let state = reader.read().unwrap();

        assert_eq!(state.axes, vec![0.0; 4]);
        assert_eq!(state.buttons, vec![0.0; 4]);
        assert_eq!(state.hats, vec![-1.0]);
        assert_eq!(
            reader.capabilities(),
            Capabilities {
                axes: 4,
                buttons: 4,
                hats: 1,
                actuators: 2
            }
        );
    }

    #[test]
    fn absolute_events_overwrite() {
        let (mut reader, probe) = reader(pad());
        probe.send("z", 0.3);
        probe.send("z", 0.7);
        probe.send("2", 1.0);

        let state = reader.read().unwrap();
        assert_eq!(state.axes[2], 0.7);
        assert_eq!(state.buttons[2], 1.0);
    }

    #[test]
    fn relative_axes_accumulate_across_reads() {
        let (mut reader, probe) = reader(pad());
        probe.send("wheel", 1.5);
        reader.read().unwrap();
        probe.send("wheel", -0.5);
        probe.send("wheel", 2.0);

        assert_eq!(reader.read().unwrap().axes[3], 3.0);
    }

    #[test]
    fn hats_are_quantized() {
        let (mut reader, probe) = reader(pad());
        probe.send("pov", pov::DOWN_LEFT);
        assert_eq!(reader.read().unwrap().hats[0], 225.0);

        probe.send("pov", 0.3);
        assert_eq!(reader.read().unwrap().hats[0], -1.0);
    }

    #[test]
    fn slots_do_not_move_between_reads() {
        let (mut reader, probe) = reader(pad());
        let id = probe.id("y").unwrap();
        let before = reader.slot_of(id).cloned();

        probe.send("y", 0.4);
        reader.read().unwrap();
        reader.read().unwrap();

        assert_eq!(reader.slot_of(id).cloned(), before);
        assert_eq!(reader.read().unwrap().axes[1], 0.4);
    }

    #[test]
    fn unknown_components_are_ignored() {
        let (mut reader, probe) = reader(pad());
        probe.send_raw(crate::device::ComponentId(999), 1.0);
        probe.send("x", 0.2);

        let state = reader.read().unwrap();
        assert_eq!(state.axes[0], 0.2);
    }

    #[test]
    fn disconnected_device_fails_read_but_stays_open() {
        let (mut reader, probe) = reader(pad());
        probe.disconnect();

        assert_eq!(reader.read().unwrap_err().kind(), ErrorKind::Io);
        assert!(!reader.is_closed());

        probe.reconnect();
        assert!(reader.read().is_ok());
    }

    #[test]
    fn force_validation_happens_before_any_rumble() {
        let (reader, probe) = reader(pad());

        let err = reader.apply_force(&[1, 3], &[0.5]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
        assert!(probe.rumbles().is_empty());

        let err = reader.apply_force(&[0], &[0.5]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);

        let err = reader.apply_force(&[1, 2], &[0.1, 0.2, 0.3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgs);

        let err = reader.apply_force(&[], &[0.1]).unwrap_err();
        assert_eq!(err.to_string(), "Indices and values can't be empty");
        assert!(probe.rumbles().is_empty());
    }

    #[test]
    fn force_uses_zero_based_actuators() {
        let (reader, probe) = reader(pad());

        reader.apply_force(&[1, 2], &[0.25]).unwrap();
        reader.apply_force(&[2], &[0.9]).unwrap();

        assert_eq!(probe.rumbles(), vec![(0, 0.25), (1, 0.25), (1, 0.9)]);
    }

    #[test]
    fn force_without_actuators_is_rejected() {
        let (reader, _) = reader(SimulatedDevice::gamepad("Plain").with_axes(2));
        let err = reader.apply_force(&[1], &[1.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoActuators);
    }

    #[test]
    fn device_without_inputs_is_refused() {
        let device = SimulatedDevice::gamepad("Empty");
        let probe = device.probe();
        let managed = ManagedDevice::new(
            CLASS,
            Box::new(device.build()),
            CapturedHooks::default(),
            Duration::from_secs(1),
        );

        let err = JoystickReader::from_device(managed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Layout);
        assert_eq!(probe.release_count(), 1);
    }

    #[test]
    fn closer_closes_the_reader() {
        let (mut reader, probe) = reader(pad());
        let closer = reader.closer();

        std::thread::spawn(move || closer.close()).join().unwrap();

        assert_eq!(reader.read().unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(reader.apply_force(&[1], &[1.0]).unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(reader.set_event_queue_size(4).unwrap_err().kind(), ErrorKind::Closed);
        reader.close();
        assert_eq!(probe.release_count(), 1);
    }

    #[test]
    fn closing_while_another_thread_polls_is_safe() {
        let (mut reader, probe) = reader(pad());
        let closer = reader.closer();
        let closed = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = std::sync::mpsc::channel();

        let poller = {
            let closed = closed.clone();
            let probe = probe.clone();
            std::thread::spawn(move || {
                let mut calls = 0;
                let mut saw_closed = false;
                while !saw_closed {
                    let after_close = closed.load(Ordering::SeqCst);
                    probe.send("x", 0.5);
                    let results = [
                        reader.read().map(|_| ()),
                        reader.apply_force(&[1], &[0.2]),
                    ];
                    for result in results {
                        match result {
                            Ok(()) => assert!(!after_close, "call succeeded after close"),
                            Err(e) => {
                                assert_eq!(e.kind(), ErrorKind::Closed);
                                saw_closed = true;
                            }
                        }
                    }
                    if calls == 0 {
                        started_tx.send(()).unwrap();
                    }
                    calls += 1;
                }
                for _ in 0..10 {
                    assert_eq!(reader.read().unwrap_err().kind(), ErrorKind::Closed);
                    assert_eq!(
                        reader.apply_force(&[1], &[0.2]).unwrap_err().kind(),
                        ErrorKind::Closed
                    );
                }
                calls
            })
        };

        started_rx.recv().unwrap();
        closer.close();
        closed.store(true, Ordering::SeqCst);
        closer.close();

        assert!(poller.join().unwrap() >= 1);
        assert!(closer.is_closed());
        assert_eq!(probe.release_count(), 1);
    }

    #[test]
    fn queue_size_reaches_the_device() {
        let (reader, probe) = reader(pad());
        reader.set_event_queue_size(16).unwrap();
        assert_eq!(probe.queue_limit(), Some(16));
    }
}
