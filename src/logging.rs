//! Host-side logging setup.
//!
//! The library only emits `tracing` events. Hosts that do not bring their own
//! subscriber can call [`init`] once at start-up.

use color_eyre::{eyre::eyre, Result};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Installs `color_eyre` and a pretty fmt subscriber at INFO.
///
/// The process environment is left untouched. Hosts that want to change
/// `RUST_LIB_BACKTRACE` should do so at the top of `main`, before any threads
/// exist. Fails if either hook or subscriber was already installed.
pub fn init() -> Result<()> {
    color_eyre::install()?;
    setup_subscriber()
}

fn setup_subscriber() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .try_init()
        .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_installs_once_and_leaves_the_environment_alone() {
        let log = std::env::var_os("RUST_LOG");
        let backtrace = std::env::var_os("RUST_LIB_BACKTRACE");

        let _ = init();
        assert!(init().is_err());

        assert_eq!(std::env::var_os("RUST_LOG"), log);
        assert_eq!(std::env::var_os("RUST_LIB_BACKTRACE"), backtrace);
    }
}
