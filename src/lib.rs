//! Polled access to gamepads, joysticks and keyboards.
//!
//! Devices are found with a deadline ([`discovery::BoundedLookup`]), owned with
//! an explicit close ([`device::ManagedDevice`]) and read as snapshots
//! ([`state::JoystickReader`], [`state::KeyboardReader`]).
//!
//! ```rust
//! use stickpoll::backend::{SimulatedDevice, SimulatedEnvironment};
//! use stickpoll::{BoundedLookup, InputConfig, JoystickReader};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> stickpoll::Result<()> {
//! let pad = SimulatedDevice::gamepad("Pad").with_axes(2).with_buttons(4);
//! let probe = pad.probe();
//! let lookup = BoundedLookup::new(SimulatedEnvironment::new().with_device(pad).factory());
//!
//! let mut reader = JoystickReader::open(&lookup, 1, &InputConfig::default()).await?;
//! probe.send("x", 0.5);
//! assert_eq!(reader.read()?.axes, vec![0.5, 0.0]);
//! reader.close();
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod state;

pub use config::InputConfig;
pub use discovery::{BoundedLookup, DeviceSummary, ExitHooks};
pub use error::{DeviceClass, ErrorKind, InputError, Result};
pub use state::{Capabilities, JoystickReader, JoystickState, KeyboardReader, KeyboardState};
