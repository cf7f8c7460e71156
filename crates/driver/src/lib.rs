//! USB-UIRT infrared receiver driver
//!
//! Locates transceivers on the USB bus, opens and configures a session
//! against a driver backend, and decodes received signals into [`IrCode`]s
//! that are forwarded to the application through the notification bridge in
//! `common`.
//!
//! # Example
//!
//! ```
//! use common::{DiagnosticLog, create_event_bridge};
//! use driver::simulated::{SimulatedBus, SimulatedDriver};
//! use driver::{DeviceLocator, ReceiverOptions, SessionManager};
//! use std::sync::Arc;
//!
//! let bus = SimulatedBus::with_transceivers(1);
//! let device = DeviceLocator::uirt().find(&bus).unwrap();
//!
//! let backend = Arc::new(SimulatedDriver::new());
//! let manager = SessionManager::new(backend.clone(), DiagnosticLog::disabled());
//! let (publisher, stream) = create_event_bridge(16);
//!
//! let mut session = manager
//!     .open(&device, ReceiverOptions::default(), publisher)
//!     .unwrap();
//! backend.deliver_text("1A2B3C4D5E6F");
//! assert_eq!(stream.try_recv().unwrap().code.as_str(), "1A2B3C4D5E6F");
//!
//! session.close();
//! ```
//!
//! [`IrCode`]: protocol::IrCode

pub mod backend;
pub mod decoder;
pub mod error;
pub mod locator;
pub mod session;
pub mod simulated;
pub mod usb;

pub use backend::{ConfigFlags, DriverHandle, EventSink, IrDriver, ReceiverOptions};
pub use decoder::{DecodeStatus, DecoderStats, DedupState, EventDecoder};
pub use error::{DecodeError, DriverError, LocateError, SetupError};
pub use locator::{DeviceDescriptor, DeviceKey, DeviceLocator, DeviceSource, UsbDeviceEntry};
pub use session::{DeviceClaim, DriverSession, SessionManager, SessionRegistry, SessionState};
pub use usb::UsbIrDriver;
