//! Runtime configuration
//!
//! Stored as TOML under the user's config directory. Every field has a
//! default, so a partial file is valid.

use crate::adapter::{GilrsSettings, MAX_DEADZONE};
use crate::driver::DriverSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const CONFIG_DIR: &str = "inputfeatures";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Could not determine config directory")]
    NoConfigDir,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    pub driver: DriverConfig,
    pub gamepad: GamepadConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    pub poll_interval_ms: u64,
    pub stats_interval_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        let settings = DriverSettings::default();
        Self {
            poll_interval_ms: settings.poll_interval_ms,
            stats_interval_secs: settings.stats_interval_secs,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GamepadConfig {
    /// Position in the list of connected gamepads
    pub index: usize,
    pub stick_deadzone: f32,
    pub signed_triggers: bool,
    pub rumble: bool,
}

impl Default for GamepadConfig {
    fn default() -> Self {
        let settings = GilrsSettings::default();
        Self {
            index: 0,
            stick_deadzone: settings.stick_deadzone,
            signed_triggers: settings.signed_triggers,
            rumble: settings.rumble,
        }
    }
}

impl InputConfig {
    /// `<config dir>/inputfeatures/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.driver_settings()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("[driver] {}", e)))?;
        let deadzone = self.gamepad.stick_deadzone;
        if !(0.0..=MAX_DEADZONE).contains(&deadzone) {
            return Err(ConfigError::Invalid(format!(
                "gamepad.stick_deadzone must be in [0, {}], got {}",
                MAX_DEADZONE, deadzone
            )));
        }
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading configuration from {}", path.display());
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&content)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_toml()?).await?;
        debug!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Loads `path`, writing the default configuration there first if it does not exist.
    pub async fn ensure_default_config(path: &Path) -> Result<Self, ConfigError> {
        if !tokio::fs::try_exists(path).await? {
            info!("Creating default configuration at {}", path.display());
            let config = Self::default();
            config.save(path).await?;
            return Ok(config);
        }
        Self::load(path).await
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            poll_interval_ms: self.driver.poll_interval_ms,
            stats_interval_secs: self.driver.stats_interval_secs,
        }
    }

    pub fn gilrs_settings(&self) -> GilrsSettings {
        GilrsSettings {
            stick_deadzone: self.gamepad.stick_deadzone,
            signed_triggers: self.gamepad.signed_triggers,
            rumble: self.gamepad.rumble,
        }
    }
}
