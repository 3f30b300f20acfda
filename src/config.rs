//! Settings file
//!
//! Read once at startup from `$PADLINK_CONFIG` or
//! `~/.config/padlink/config.toml`. Every field has a default, so a missing
//! file or a partial file is fine; a file that does not parse is not.

use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::usb::DeviceFilter;

const CONFIG_ENV: &str = "PADLINK_CONFIG";
const CONFIG_DIR: &str = ".config/padlink";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub device: DeviceSettings,
    pub rumble: RumbleSettings,
    pub usb: UsbSettings,
}

/// Which device to talk to and where its endpoints are
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeviceSettings {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
    /// Endpoint number of the interrupt-IN endpoint (direction bit is added)
    pub in_endpoint: u8,
    /// Endpoint number of the interrupt-OUT endpoint
    pub out_endpoint: u8,
    /// Size of the buffer each interrupt-IN read fills
    pub read_buffer_len: usize,
}

impl DeviceSettings {
    pub fn filter(&self) -> DeviceFilter {
        DeviceFilter::new(self.vendor_id, self.product_id)
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: 0x045e,
            product_id: 0x02ea,
            interface: 0,
            in_endpoint: 2,
            out_endpoint: 2,
            read_buffer_len: 64,
        }
    }
}

/// Motor intensities used when button A is pressed
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RumbleSettings {
    pub left: u8,
    pub right: u8,
}

impl Default for RumbleSettings {
    fn default() -> Self {
        Self {
            left: 0x20,
            right: 0x20,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct UsbSettings {
    /// How often blocked libusb calls wake up to look for cancellation
    pub poll_interval_ms: u64,
    pub write_timeout_ms: u64,
    /// Report devices that are already attached at startup as arrivals
    pub enumerate_attached: bool,
    /// libusb log level: none, error, warning, info or debug
    pub log_level: String,
}

impl UsbSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            write_timeout_ms: 1000,
            enumerate_attached: true,
            log_level: "warning".to_string(),
        }
    }
}

impl Settings {
    /// Loads settings from the default location, falling back to defaults
    pub async fn load() -> Result<Self> {
        let path = config_path();
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if {} exists: {}", path.display(), e))?
        {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let settings = Self::parse(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

        info!("Loaded config from {}", path.display());
        debug!("Settings: {:?}", settings);
        Ok(settings)
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let mut path = get_home_dir();
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}
