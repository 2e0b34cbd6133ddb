//! Environments that can be handed to [`BoundedLookup`](crate::discovery::BoundedLookup).

#[cfg(feature = "gilrs")]
pub mod gilrs;
pub mod simulated;

#[cfg(feature = "gilrs")]
pub use self::gilrs::GilrsEnvironment;
pub use simulated::{DeviceProbe, SimulatedDevice, SimulatedEnvironment};
