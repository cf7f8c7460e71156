//! Wire protocol for USB-UIRT infrared transceivers
//!
//! This crate holds everything that can be expressed without touching USB:
//! command framing and checksums, FTDI bridge programming values, receive
//! framing, firmware metadata and the canonical [`IrCode`] representation.
//!
//! # Example
//!
//! ```
//! use protocol::{Command, IrCode, UirFramer};
//! use std::time::Instant;
//!
//! // Frame a configuration command
//! let frame = Command::SetConfig(0x05).encode();
//! assert_eq!(frame.len(), 3);
//!
//! // Reassemble a received code
//! let mut framer = UirFramer::new();
//! let codes = framer.push(&[0x1a, 0x2b, 0x3c, 0x4d, 0x5e, 0x6f], Instant::now());
//! assert_eq!(codes, vec![IrCode::parse("1A2B3C4D5E6F").unwrap()]);
//! ```

pub mod code;
pub mod command;
pub mod error;
pub mod framing;
pub mod ftdi;
pub mod info;

pub use code::{IrCode, MAX_CODE_DIGITS};
pub use command::{Command, STATUS_ACK, check_ack, checksum, verify_response};
pub use error::{ProtocolError, Result};
pub use framing::{UIR_CODE_LEN, UirFramer};
pub use info::{FIRMWARE_INFO_LEN, FirmwareDate, FirmwareInfo};

/// FTDI vendor id used by the transceiver
pub const UIRT_VENDOR_ID: u16 = 0x0403;
/// Product id assigned to the transceiver
pub const UIRT_PRODUCT_ID: u16 = 0xF850;
/// Human-readable base name for enumerated transceivers
pub const UIRT_DEVICE_NAME: &str = "USB-UIRT";

/// Interface carrying the serial bridge
pub const UIRT_INTERFACE: u8 = 0;
/// Bulk IN endpoint (device to host)
pub const UIRT_EP_IN: u8 = 0x81;
/// Bulk OUT endpoint (host to device)
pub const UIRT_EP_OUT: u8 = 0x02;
