//! Finding devices and owning what finding them left behind.
//!
//! - [`lookup`] enumerates on a worker thread with a deadline
//! - [`hooks`] captures exit hooks registered during enumeration

pub mod hooks;
pub mod lookup;

pub use hooks::{CapturedHooks, ExitHooks, HookId, HookRunReport, HookScavenger, ShutdownHook};
pub use lookup::{BoundedLookup, DeviceSummary};
