//! Input subsystem settings.
//!
//! Settings live in `<config dir>/stickpoll/config.toml`. A missing file is not
//! an error: every field has a default that works for ordinary hardware, and
//! the library keeps running on defaults rather than refusing to open devices.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "stickpoll";
const CONFIG_FILE: &str = "config.toml";

/// Timeouts and queue sizing for discovery and device access.
///
/// # Examples
///
/// ```rust
/// use stickpoll::config::InputConfig;
///
/// // Slow USB hubs: give enumeration more room
/// let config = InputConfig {
///     lookup_timeout_ms: 10_000,
///     ..InputConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    /// Deadline for one device enumeration in milliseconds
    ///
    /// Native enumeration can hang inside drivers. After this long the lookup
    /// gives up and reports a timeout.
    pub lookup_timeout_ms: u64,

    /// How long to wait for each captured exit hook when a device closes
    pub hook_join_timeout_ms: u64,

    /// Native event queue size applied right after a device opens
    ///
    /// `None` keeps whatever the backend uses by default.
    pub event_queue_size: Option<usize>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: 5000,
            hook_join_timeout_ms: 1000,
            event_queue_size: None,
        }
    }
}

impl InputConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn hook_join_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_join_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lookup_timeout_ms == 0 {
            return Err(eyre!("lookup_timeout_ms must be greater than zero"));
        }
        if self.hook_join_timeout_ms == 0 {
            return Err(eyre!("hook_join_timeout_ms must be greater than zero"));
        }
        if self.event_queue_size == Some(0) {
            return Err(eyre!("event_queue_size must be greater than zero"));
        }
        Ok(())
    }

    /// Default location of the settings file, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push(CONFIG_DIR);
            path.push(CONFIG_FILE);
            path
        })
    }

    /// Loads settings from the default location, falling back to defaults when
    /// there is no file.
    pub async fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).await,
            None => {
                warn!("No config directory available, using default input settings");
                Ok(Self::default())
            }
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            debug!("No input config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read input config {}: {}", path.display(), e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse input config {}: {}", path.display(), e))?;
        config.validate()?;

        info!("Loaded input config from {}", path.display());
        Ok(config)
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize input config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write input config file: {}", e))?;

        info!("Input config saved to {}", path.display());
        Ok(())
    }
}
