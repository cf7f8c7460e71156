//! Device locator
//!
//! Enumerates the USB bus and matches transceivers by vendor/product id.
//! Matching devices are named in enumeration order: the first is `USB-UIRT`,
//! later ones get a `-2`, `-3`, ... suffix.
//!
//! Enumeration failures never escape as errors. They are logged and, once the
//! configured retries are exhausted, reported as "not found".

use crate::error::LocateError;
use common::{DiagnosticKind, DiagnosticLog};
use rusb::UsbContext;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for reading the serial number string descriptor
const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Raw enumeration record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceEntry {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub address: u8,
    pub serial_number: Option<String>,
}

/// Anything that can list attached USB devices
pub trait DeviceSource {
    /// Backend reference kept alongside each entry for follow-up reads
    type Device;

    fn enumerate(&self) -> Result<Vec<(UsbDeviceEntry, Self::Device)>, rusb::Error>;

    /// Read the serial number of a matched device, if it can be opened
    fn read_serial(&self, _device: &Self::Device) -> Option<String> {
        None
    }
}

impl DeviceSource for rusb::Context {
    type Device = rusb::Device<rusb::Context>;

    fn enumerate(&self) -> Result<Vec<(UsbDeviceEntry, Self::Device)>, rusb::Error> {
        enumerate_context(self)
    }

    fn read_serial(&self, device: &Self::Device) -> Option<String> {
        read_device_serial(device)
    }
}

impl DeviceSource for rusb::GlobalContext {
    type Device = rusb::Device<rusb::GlobalContext>;

    fn enumerate(&self) -> Result<Vec<(UsbDeviceEntry, Self::Device)>, rusb::Error> {
        enumerate_context(self)
    }

    fn read_serial(&self, device: &Self::Device) -> Option<String> {
        read_device_serial(device)
    }
}

fn enumerate_context<T: UsbContext>(
    context: &T,
) -> Result<Vec<(UsbDeviceEntry, rusb::Device<T>)>, rusb::Error> {
    let devices = context.devices()?;
    let mut entries = Vec::with_capacity(devices.len());

    for device in devices.iter() {
        // A single unreadable descriptor should not hide the rest of the bus
        let descriptor = match device.device_descriptor() {
            Ok(d) => d,
            Err(e) => {
                debug!(
                    "Skipping device {}:{}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                continue;
            }
        };

        let entry = UsbDeviceEntry {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            bus_number: device.bus_number(),
            address: device.address(),
            serial_number: None,
        };
        entries.push((entry, device));
    }

    Ok(entries)
}

fn read_device_serial<T: UsbContext>(device: &rusb::Device<T>) -> Option<String> {
    let descriptor = device.device_descriptor().ok()?;
    let handle = device.open().ok()?;

    let language = handle
        .read_languages(SERIAL_READ_TIMEOUT)
        .ok()?
        .into_iter()
        .next()?;
    handle
        .read_serial_number_string(language, &descriptor, SERIAL_READ_TIMEOUT)
        .ok()
}

/// Physical position of a device on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    pub bus: u8,
    pub address: u8,
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}", self.bus, self.address)
    }
}

/// A matched transceiver
///
/// Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub address: u8,
    pub serial_number: Option<String>,
    /// Zero-based position among matching devices
    pub ordinal: usize,
    /// Logical name, unique among attached transceivers
    pub name: String,
}

impl DeviceDescriptor {
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            bus: self.bus_number,
            address: self.address,
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:04x}:{:04x} at {})",
            self.name,
            self.vendor_id,
            self.product_id,
            self.key()
        )
    }
}

/// Finds transceivers on a [`DeviceSource`]
pub struct DeviceLocator {
    vendor_id: u16,
    product_id: u16,
    base_name: String,
    retries: u32,
    retry_delay: Duration,
    diagnostics: DiagnosticLog,
}

impl DeviceLocator {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            base_name: protocol::UIRT_DEVICE_NAME.to_string(),
            retries: 0,
            retry_delay: Duration::from_millis(500),
            diagnostics: DiagnosticLog::disabled(),
        }
    }

    /// Locator for the USB-UIRT id pair
    pub fn uirt() -> Self {
        Self::new(protocol::UIRT_VENDOR_ID, protocol::UIRT_PRODUCT_ID)
    }

    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = base_name.into();
        self
    }

    /// Re-enumerate up to `retries` extra times when enumeration itself fails
    pub fn with_retries(mut self, retries: u32, retry_delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticLog) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Logical name for the n-th matching device
    pub fn device_name(&self, ordinal: usize) -> String {
        if ordinal == 0 {
            self.base_name.clone()
        } else {
            format!("{}-{}", self.base_name, ordinal + 1)
        }
    }

    /// Every matching device, in enumeration order
    ///
    /// Returns an empty list when enumeration fails. Every match is opened to
    /// read its serial number.
    pub fn find_all<S: DeviceSource + ?Sized>(&self, source: &S) -> Vec<DeviceDescriptor> {
        self.matching(source)
            .into_iter()
            .enumerate()
            .map(|(ordinal, (entry, device))| self.describe(source, ordinal, entry, &device))
            .collect()
    }

    /// First matching device
    pub fn find<S: DeviceSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<DeviceDescriptor, LocateError> {
        match self.matching(source).into_iter().next() {
            Some((entry, device)) => Ok(self.describe(source, 0, entry, &device)),
            None => Err(self.not_found(None)),
        }
    }

    /// Matching device with the given logical name
    pub fn find_named<S: DeviceSource + ?Sized>(
        &self,
        source: &S,
        name: &str,
    ) -> Result<DeviceDescriptor, LocateError> {
        let found = self
            .matching(source)
            .into_iter()
            .enumerate()
            .find(|(ordinal, _)| self.device_name(*ordinal) == name);
        match found {
            Some((ordinal, (entry, device))) => Ok(self.describe(source, ordinal, entry, &device)),
            None => Err(self.not_found(Some(name))),
        }
    }

    /// Entries matching the id pair, empty when enumeration fails
    fn matching<S: DeviceSource + ?Sized>(&self, source: &S) -> Vec<(UsbDeviceEntry, S::Device)> {
        let Some(entries) = self.enumerate_with_retry(source) else {
            return Vec::new();
        };
        entries
            .into_iter()
            .filter(|(e, _)| e.vendor_id == self.vendor_id && e.product_id == self.product_id)
            .collect()
    }

    fn describe<S: DeviceSource + ?Sized>(
        &self,
        source: &S,
        ordinal: usize,
        entry: UsbDeviceEntry,
        device: &S::Device,
    ) -> DeviceDescriptor {
        let serial_number = entry.serial_number.or_else(|| source.read_serial(device));
        let descriptor = DeviceDescriptor {
            vendor_id: entry.vendor_id,
            product_id: entry.product_id,
            bus_number: entry.bus_number,
            address: entry.address,
            serial_number,
            ordinal,
            name: self.device_name(ordinal),
        };
        self.diagnostics.info(
            DiagnosticKind::Device,
            format!(
                "Detected device: {} serial={}",
                descriptor,
                descriptor.serial_number.as_deref().unwrap_or("unknown")
            ),
        );
        descriptor
    }

    fn enumerate_with_retry<S: DeviceSource + ?Sized>(
        &self,
        source: &S,
    ) -> Option<Vec<(UsbDeviceEntry, S::Device)>> {
        let mut attempt = 0;
        loop {
            match source.enumerate() {
                Ok(entries) => return Some(entries),
                Err(e) => {
                    self.diagnostics.warn(
                        DiagnosticKind::Device,
                        format!("Device search error: {}", e),
                    );
                    if attempt >= self.retries {
                        return None;
                    }
                    attempt += 1;
                    warn!(
                        "Retrying device enumeration ({}/{}) in {:?}",
                        attempt, self.retries, self.retry_delay
                    );
                    std::thread::sleep(self.retry_delay);
                }
            }
        }
    }

    fn not_found(&self, name: Option<&str>) -> LocateError {
        let label = name.unwrap_or(&self.base_name);
        self.diagnostics.warn(
            DiagnosticKind::Device,
            format!(
                "{} device not found ({:04x}:{:04x})",
                label, self.vendor_id, self.product_id
            ),
        );
        LocateError::NotFound {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            name: name.map(str::to_string),
        }
    }
}
