//! Common utilities for the IR receiver
//!
//! This crate provides functionality shared between the driver library and the
//! receiver binary: error handling, tracing setup, the notification bridge that
//! carries decoded codes off the driver thread, and the diagnostic log file.

pub mod channel;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{
    DEFAULT_EVENT_CAPACITY, EventPublisher, EventStream, IrEvent, create_event_bridge,
};
pub use diagnostics::{DiagnosticKind, DiagnosticLog, Severity, format_timestamp};
pub use error::{Error, Result};
pub use logging::setup_logging;
