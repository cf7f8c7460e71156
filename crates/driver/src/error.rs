//! Driver error types
//!
//! Setup-phase failures ([`SetupError`]) abort initialization and reach the
//! operator. Backend failures ([`DriverError`]) are wrapped into the setup
//! phase they occurred in. [`DecodeError`] never leaves the event decoder.

use crate::backend::DriverHandle;
use protocol::ProtocolError;
use thiserror::Error;

/// Errors reported by a driver backend
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend returned a null or invalid-handle sentinel
    #[error("Invalid driver handle {0}")]
    InvalidHandle(DriverHandle),

    /// The handle was never opened or is already closed
    #[error("Unknown driver handle {0}")]
    UnknownHandle(DriverHandle),

    #[error("Device busy: {0}")]
    Busy(String),

    #[error("Rejected by driver: {0}")]
    Rejected(String),
}

/// Initialization failures, one variant per setup phase
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Device {vendor_id:04x}:{product_id:04x} not found")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("Failed to load driver: {0}")]
    DriverLoad(String),

    #[error("Failed to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: DriverError,
    },

    #[error("Failed to apply configuration {flags:#06x}: {source}")]
    Config {
        flags: u32,
        #[source]
        source: DriverError,
    },

    #[error("Failed to set receive callback: {0}")]
    Callback(#[source] DriverError),

    /// Another session is already listening on this device
    #[error("Device {0} already has an active session")]
    DeviceBusy(String),
}

impl SetupError {
    /// Setup phase that failed, for operator-facing messages
    pub fn phase(&self) -> &'static str {
        match self {
            SetupError::DeviceNotFound { .. } => "device search",
            SetupError::DriverLoad(_) => "driver load",
            SetupError::Open { .. } | SetupError::DeviceBusy(_) => "device open",
            SetupError::Config { .. } => "configuration",
            SetupError::Callback(_) => "callback registration",
        }
    }
}

/// Malformed receive payloads
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("malformed code: {0}")]
    Malformed(#[from] ProtocolError),
}

/// Device lookup failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocateError {
    #[error("No device {vendor_id:04x}:{product_id:04x}{}", .name.as_ref().map(|n| format!(" named {}", n)).unwrap_or_default())]
    NotFound {
        vendor_id: u16,
        product_id: u16,
        name: Option<String>,
    },
}

impl From<LocateError> for SetupError {
    fn from(err: LocateError) -> Self {
        match err {
            LocateError::NotFound {
                vendor_id,
                product_id,
                ..
            } => SetupError::DeviceNotFound {
                vendor_id,
                product_id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_display_names_device() {
        let err = SetupError::DeviceNotFound {
            vendor_id: 0x0403,
            product_id: 0xf850,
        };
        assert_eq!(err.to_string(), "Device 0403:f850 not found");
        assert_eq!(err.phase(), "device search");
    }

    #[test]
    fn test_config_error_display() {
        let err = SetupError::Config {
            flags: 0x5,
            source: DriverError::Rejected("nak".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Failed to apply configuration 0x0005: Rejected by driver: nak"
        );
    }

    #[test]
    fn test_locate_error_converts() {
        let err = LocateError::NotFound {
            vendor_id: 1,
            product_id: 2,
            name: Some("USB-UIRT-2".to_string()),
        };
        assert!(err.to_string().contains("named USB-UIRT-2"));
        assert!(matches!(
            SetupError::from(err),
            SetupError::DeviceNotFound {
                vendor_id: 1,
                product_id: 2
            }
        ));
    }
}
