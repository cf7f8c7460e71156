//! Driver backend seam
//!
//! A backend owns the low-level conversation with the transceiver: acquiring
//! a handle, reading firmware metadata, writing the configuration byte and
//! running whatever thread delivers received signals. The session layer only
//! talks to backends through [`IrDriver`], so the USB backend and the
//! simulated backend are interchangeable.

use crate::error::DriverError;
use crate::locator::DeviceDescriptor;
use crate::session::SessionRegistry;
use bitflags::bitflags;
use protocol::FirmwareInfo;
use std::fmt;
use std::sync::Arc;

/// Opaque handle issued by a backend
///
/// Backends written against vendor libraries may hand back a null pointer or
/// the `INVALID_HANDLE_VALUE` sentinel in either its 32-bit or 64-bit width;
/// all three are rejected by [`DriverHandle::is_valid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriverHandle(u64);

impl DriverHandle {
    pub const NULL: Self = Self(0);
    pub const INVALID_32: Self = Self(0xFFFF_FFFF);
    pub const INVALID_64: Self = Self(u64::MAX);

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self.0, 0 | 0xFFFF_FFFF | u64::MAX)
    }
}

impl fmt::Display for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

bitflags! {
    /// Configuration bitmask written to the transceiver
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ConfigFlags: u32 {
        /// Blink the indicator LED on receive
        const LED_RX = 0x0001;
        /// Blink the indicator LED on transmit
        const LED_TX = 0x0002;
        /// Legacy UIR receive code format
        const LEGACY_RX = 0x0004;
    }
}

/// Independent receiver options, each contributing one configuration bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverOptions {
    pub led_rx: bool,
    pub led_tx: bool,
    pub legacy_rx: bool,
}

impl ReceiverOptions {
    /// Build the configuration bitmask
    ///
    /// # Example
    /// ```
    /// use driver::{ConfigFlags, ReceiverOptions};
    ///
    /// let options = ReceiverOptions { led_rx: true, led_tx: false, legacy_rx: true };
    /// assert_eq!(options.flags().bits(), 0x0005);
    /// ```
    pub fn flags(&self) -> ConfigFlags {
        let mut flags = ConfigFlags::empty();
        flags.set(ConfigFlags::LED_RX, self.led_rx);
        flags.set(ConfigFlags::LED_TX, self.led_tx);
        flags.set(ConfigFlags::LEGACY_RX, self.legacy_rx);
        flags
    }
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            led_rx: true,
            led_tx: true,
            legacy_rx: true,
        }
    }
}

impl From<ReceiverOptions> for ConfigFlags {
    fn from(options: ReceiverOptions) -> Self {
        options.flags()
    }
}

/// Receiver of raw signal payloads ("device event sink")
///
/// Called on a thread owned by the backend. Invocations for one handle never
/// overlap. Implementations must return promptly and must not panic across
/// this boundary.
pub trait EventSink: Send + Sync {
    /// `None` or an empty slice is an idle tick, not a signal
    fn on_receive(&self, payload: Option<&[u8]>);
}

/// Transceiver driver backend
pub trait IrDriver: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Acquire a handle to the device
    fn open(&self, device: &DeviceDescriptor) -> Result<DriverHandle, DriverError>;

    /// Read firmware and protocol version metadata
    fn firmware_info(&self, handle: DriverHandle) -> Result<FirmwareInfo, DriverError>;

    /// Write the configuration bitmask
    fn set_config(&self, handle: DriverHandle, flags: ConfigFlags) -> Result<(), DriverError>;

    /// Start delivering received signals to `sink`, replacing any previous sink
    fn set_receive_sink(
        &self,
        handle: DriverHandle,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), DriverError>;

    /// Stop delivering received signals
    ///
    /// Must not return while a callback for this handle is still running.
    /// Clearing a handle that has no sink is not an error.
    fn clear_receive_sink(&self, handle: DriverHandle) -> Result<(), DriverError>;

    /// Release the handle
    fn close(&self, handle: DriverHandle) -> Result<(), DriverError>;

    /// Device claims held by sessions over this backend
    fn sessions(&self) -> &SessionRegistry;
}
