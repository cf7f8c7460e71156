//! Receiver configuration management

use anyhow::{Context, Result, anyhow};
use driver::ReceiverOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub receiver: ReceiverSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Which transceiver to use
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// USB vendor id, hex with `0x` prefix
    #[serde(default = "DeviceSettings::default_vendor_id")]
    pub vendor_id: String,
    /// USB product id, hex with `0x` prefix
    #[serde(default = "DeviceSettings::default_product_id")]
    pub product_id: String,
    /// Logical device name (e.g. "USB-UIRT-2"); first match if unset
    #[serde(default)]
    pub name: Option<String>,
    /// Extra enumeration attempts when the USB subsystem reports an error
    #[serde(default = "DeviceSettings::default_locate_retries")]
    pub locate_retries: u32,
    #[serde(default = "DeviceSettings::default_locate_retry_delay_ms")]
    pub locate_retry_delay_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
            name: None,
            locate_retries: Self::default_locate_retries(),
            locate_retry_delay_ms: Self::default_locate_retry_delay_ms(),
        }
    }
}

impl DeviceSettings {
    fn default_vendor_id() -> String {
        format!("{:#06x}", protocol::UIRT_VENDOR_ID)
    }

    fn default_product_id() -> String {
        format!("{:#06x}", protocol::UIRT_PRODUCT_ID)
    }

    fn default_locate_retries() -> u32 {
        2
    }

    fn default_locate_retry_delay_ms() -> u64 {
        500
    }

    pub fn vendor_id(&self) -> Result<u16> {
        parse_hex_id(&self.vendor_id, "vendor_id")
    }

    pub fn product_id(&self) -> Result<u16> {
        parse_hex_id(&self.product_id, "product_id")
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.locate_retry_delay_ms)
    }
}

/// Transceiver options and event delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverSettings {
    /// Blink the LED on receive
    #[serde(default = "default_true")]
    pub led_rx: bool,
    /// Blink the LED on transmit
    #[serde(default = "default_true")]
    pub led_tx: bool,
    /// Legacy UIR receive format
    #[serde(default = "default_true")]
    pub legacy_rx: bool,
    /// Decoded codes buffered for the consumer before new ones are dropped
    #[serde(default = "ReceiverSettings::default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ReceiverSettings {
    fn default() -> Self {
        Self {
            led_rx: true,
            led_tx: true,
            legacy_rx: true,
            queue_capacity: Self::default_queue_capacity(),
        }
    }
}

impl ReceiverSettings {
    fn default_queue_capacity() -> usize {
        common::DEFAULT_EVENT_CAPACITY
    }

    pub fn options(&self) -> ReceiverOptions {
        ReceiverOptions {
            led_rx: self.led_rx,
            led_tx: self.led_tx,
            legacy_rx: self.legacy_rx,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "LoggingSettings::default_log_level")]
    pub log_level: String,
    /// Diagnostic log file, truncated at startup; `~` is expanded
    #[serde(default = "LoggingSettings::default_diagnostic_log")]
    pub diagnostic_log: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            diagnostic_log: Self::default_diagnostic_log(),
        }
    }
}

impl LoggingSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_diagnostic_log() -> String {
        "uuirtlog.txt".to_string()
    }

    pub fn diagnostic_log_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.diagnostic_log).as_ref())
    }
}

fn default_true() -> bool {
    true
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            device: DeviceSettings::default(),
            receiver: ReceiverSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ReceiverConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref()),
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    return Err(anyhow!("No configuration file found, using defaults"));
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ReceiverConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("{}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("uirt-receiver").join("receiver.toml")
        } else {
            PathBuf::from(".config/uirt-receiver/receiver.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.device.vendor_id()? == 0 || self.device.product_id()? == 0 {
            return Err(anyhow!("vendor_id and product_id must be non-zero"));
        }

        if let Some(name) = &self.device.name
            && name.trim().is_empty()
        {
            return Err(anyhow!("Device name must not be empty"));
        }

        if self.receiver.queue_capacity == 0 {
            return Err(anyhow!("queue_capacity must be at least 1"));
        }

        if self.logging.diagnostic_log.trim().is_empty() {
            return Err(anyhow!("diagnostic_log path must not be empty"));
        }

        Ok(())
    }
}

/// Parse a `0x`-prefixed 16-bit hex id
fn parse_hex_id(id: &str, name: &str) -> Result<u16> {
    let hex_part = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .ok_or_else(|| {
            anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x0403')",
                name,
                id
            )
        })?;

    if hex_part.is_empty() || hex_part.len() > 4 {
        return Err(anyhow!(
            "Invalid {} '{}', hex part must be 1-4 digits",
            name,
            id
        ));
    }

    u16::from_str_radix(hex_part, 16)
        .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))
}
