//! Open USB-UIRT device
//!
//! Wraps a libusb handle to the transceiver's FTDI bridge. Opening detaches
//! the kernel serial driver, claims the bridge interface and programs the
//! line settings; closing releases the interface and hands the device back to
//! the kernel.

use crate::backend::ConfigFlags;
use crate::error::DriverError;
use crate::locator::DeviceDescriptor;
use protocol::command::{OP_SET_CONFIG, parse_version_response};
use protocol::ftdi::{
    self, DATA_8N1, FLOW_NONE, LATENCY_TIMER_MS, PURGE_RX, PURGE_TX, REQUEST_TYPE_OUT, RESET_SIO,
    SIO_RESET, SIO_SET_BAUD_RATE, SIO_SET_DATA, SIO_SET_FLOW_CTRL, SIO_SET_LATENCY_TIMER,
    UIRT_BAUD_RATE,
};
use protocol::{Command, FirmwareInfo, UIRT_EP_IN, UIRT_EP_OUT, UIRT_INTERFACE, check_ack};
use rusb::{Context, DeviceHandle, UsbContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Timeout for vendor control requests
const CONTROL_TIMEOUT: Duration = Duration::from_millis(500);

/// Timeout for writing a command frame
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// How long to wait for a complete command response
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Full-speed bulk packet size, used when the descriptor cannot be read
const DEFAULT_MAX_PACKET: usize = 64;

/// Bulk IN packets requested per read
const READ_PACKETS: usize = 8;

/// Transceiver with a claimed interface
pub struct UirtDevice {
    handle: DeviceHandle<Context>,
    name: String,
    max_packet_size: usize,
    kernel_driver_detached: bool,
    closed: AtomicBool,
}

impl UirtDevice {
    /// Open the device at the descriptor's bus position and program the bridge
    pub fn open(context: &Context, descriptor: &DeviceDescriptor) -> Result<Self, DriverError> {
        let device = context
            .devices()?
            .iter()
            .find(|d| d.bus_number() == descriptor.bus_number && d.address() == descriptor.address)
            .ok_or(DriverError::Usb(rusb::Error::NoDevice))?;

        let max_packet_size = device
            .active_config_descriptor()
            .ok()
            .and_then(|config| {
                config
                    .interfaces()
                    .flat_map(|interface| interface.descriptors())
                    .flat_map(|setting| setting.endpoint_descriptors())
                    .find(|endpoint| endpoint.address() == UIRT_EP_IN)
                    .map(|endpoint| endpoint.max_packet_size() as usize)
            })
            .filter(|size| *size > ftdi::STATUS_HEADER_LEN)
            .unwrap_or(DEFAULT_MAX_PACKET);

        let handle = device.open()?;
        debug!("Opened {}", descriptor);

        let kernel_driver_detached = match handle.kernel_driver_active(UIRT_INTERFACE) {
            Ok(true) => {
                handle.detach_kernel_driver(UIRT_INTERFACE)?;
                debug!("Detached kernel driver from {}", descriptor.name);
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!("Could not check kernel driver status: {}", e);
                false
            }
        };

        if let Err(e) = handle.claim_interface(UIRT_INTERFACE) {
            if kernel_driver_detached && let Err(e) = handle.attach_kernel_driver(UIRT_INTERFACE) {
                debug!("Could not reattach kernel driver: {}", e);
            }
            return Err(e.into());
        }

        let device = Self {
            handle,
            name: descriptor.name.clone(),
            max_packet_size,
            kernel_driver_detached,
            closed: AtomicBool::new(false),
        };
        // On failure the drop releases the interface again
        device.configure_bridge()?;
        Ok(device)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn configure_bridge(&self) -> Result<(), DriverError> {
        let (baud_value, baud_index) = ftdi::baud_divisor(UIRT_BAUD_RATE)?;

        self.vendor_request(SIO_RESET, RESET_SIO, 0)?;
        self.vendor_request(SIO_SET_BAUD_RATE, baud_value, baud_index)?;
        self.vendor_request(SIO_SET_DATA, DATA_8N1, 0)?;
        self.vendor_request(SIO_SET_FLOW_CTRL, 0, FLOW_NONE)?;
        self.vendor_request(SIO_SET_LATENCY_TIMER, LATENCY_TIMER_MS, 0)?;
        self.vendor_request(SIO_RESET, PURGE_RX, 0)?;
        self.vendor_request(SIO_RESET, PURGE_TX, 0)?;

        debug!(
            "{}: bridge set to {} baud 8N1, latency {} ms",
            self.name, UIRT_BAUD_RATE, LATENCY_TIMER_MS
        );
        Ok(())
    }

    fn vendor_request(&self, request: u8, value: u16, index: u16) -> Result<(), DriverError> {
        self.handle
            .write_control(REQUEST_TYPE_OUT, request, value, index, &[], CONTROL_TIMEOUT)?;
        Ok(())
    }

    /// Send a command and collect its response bytes
    pub fn command(&self, command: Command) -> Result<Vec<u8>, DriverError> {
        let frame = command.encode();
        self.handle.write_bulk(UIRT_EP_OUT, &frame, WRITE_TIMEOUT)?;

        let expected = command.response_len();
        let deadline = Instant::now() + RESPONSE_TIMEOUT;
        let mut response = Vec::with_capacity(expected);
        let mut buf = vec![0u8; self.max_packet_size];

        while response.len() < expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DriverError::Usb(rusb::Error::Timeout));
            }
            match self.read_raw(&mut buf, remaining) {
                Ok(n) => {
                    response.extend(ftdi::strip_status_headers(&buf[..n], self.max_packet_size))
                }
                Err(rusb::Error::Timeout) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(response)
    }

    pub fn firmware_info(&self) -> Result<FirmwareInfo, DriverError> {
        let response = self.command(Command::GetVersion)?;
        Ok(parse_version_response(&response)?)
    }

    pub fn set_config(&self, flags: ConfigFlags) -> Result<(), DriverError> {
        // The firmware config register is one byte wide
        let value = (flags.bits() & 0xff) as u8;
        let response = self.command(Command::SetConfig(value))?;
        check_ack(OP_SET_CONFIG, &response)?;
        Ok(())
    }

    /// Raw bulk IN read, FTDI status headers included
    pub fn read_raw(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, rusb::Error> {
        self.handle.read_bulk(UIRT_EP_IN, buf, timeout)
    }

    /// Read buffer sized for a polling reader
    pub fn read_buffer(&self) -> Vec<u8> {
        vec![0u8; self.max_packet_size * READ_PACKETS]
    }

    /// Release the interface and return the device to the kernel
    ///
    /// Only the first call has any effect.
    pub fn close(&self) -> Result<(), DriverError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let released = self.handle.release_interface(UIRT_INTERFACE);
        if self.kernel_driver_detached {
            match self.handle.attach_kernel_driver(UIRT_INTERFACE) {
                Ok(()) => debug!("Reattached kernel driver to {}", self.name),
                Err(e) => debug!("Could not reattach kernel driver to {}: {}", self.name, e),
            }
        }
        debug!("Closed {}", self.name);
        released.map_err(DriverError::from)
    }
}

impl Drop for UirtDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to release {}: {}", self.name, e);
        }
    }
}
