//! Simulated transceiver backend
//!
//! An in-memory [`IrDriver`] and [`DeviceSource`] for tests and for running the
//! receiver without hardware. Failures can be injected at every step of the
//! open path, and all handle traffic is counted so tests can check that
//! nothing leaks.

use crate::backend::{ConfigFlags, DriverHandle, EventSink, IrDriver};
use crate::error::DriverError;
use crate::locator::{DeviceDescriptor, DeviceSource, UsbDeviceEntry};
use crate::session::SessionRegistry;
use protocol::{FirmwareDate, FirmwareInfo, ProtocolError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Simulated USB bus
#[derive(Debug, Default)]
pub struct SimulatedBus {
    entries: Vec<UsbDeviceEntry>,
    failures_remaining: AtomicU32,
    enumerations: AtomicU32,
}

impl SimulatedBus {
    pub fn new(entries: Vec<UsbDeviceEntry>) -> Self {
        Self {
            entries,
            ..Default::default()
        }
    }

    /// Bus with `count` transceivers at consecutive addresses
    pub fn with_transceivers(count: u8) -> Self {
        Self::new((0..count).map(|i| Self::transceiver_entry(2 + i)).collect())
    }

    /// Fail the next `count` enumerations
    pub fn with_enumeration_failures(self, count: u32) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Enumeration record for a transceiver on bus 1
    pub fn transceiver_entry(address: u8) -> UsbDeviceEntry {
        UsbDeviceEntry {
            vendor_id: protocol::UIRT_VENDOR_ID,
            product_id: protocol::UIRT_PRODUCT_ID,
            bus_number: 1,
            address,
            serial_number: Some(format!("SIM{:05}", address)),
        }
    }

    /// Number of enumeration attempts so far
    pub fn enumerations(&self) -> u32 {
        self.enumerations.load(Ordering::SeqCst)
    }
}

impl DeviceSource for SimulatedBus {
    type Device = ();

    fn enumerate(&self) -> Result<Vec<(UsbDeviceEntry, ())>, rusb::Error> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(rusb::Error::Io);
        }
        Ok(self.entries.iter().cloned().map(|e| (e, ())).collect())
    }
}

/// Step at which the simulated driver fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    /// `open` returns an error
    Open,
    /// `open` succeeds but returns the 32-bit invalid-handle sentinel
    InvalidHandle32,
    /// `open` succeeds but returns the 64-bit invalid-handle sentinel
    InvalidHandle64,
    FirmwareInfo,
    Config,
    SetCallback,
    ClearCallback,
    Close,
}

#[derive(Default)]
struct SimState {
    next_handle: u64,
    open: HashSet<DriverHandle>,
    open_calls: usize,
    last_handle: Option<DriverHandle>,
    closes: HashMap<DriverHandle, usize>,
    configs: HashMap<DriverHandle, ConfigFlags>,
    sinks: HashMap<DriverHandle, Arc<dyn EventSink>>,
}

/// In-memory driver backend
pub struct SimulatedDriver {
    failures: HashSet<FailurePoint>,
    firmware: FirmwareInfo,
    state: Mutex<SimState>,
    /// Held for the whole of a delivery, like the native callback thread
    delivery: Mutex<()>,
    sessions: SessionRegistry,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self {
            failures: HashSet::new(),
            firmware: FirmwareInfo {
                firmware_version: 0x0109,
                protocol_version: 0x0100,
                date: FirmwareDate {
                    day: 14,
                    month: 3,
                    year: 2008,
                },
            },
            state: Mutex::new(SimState {
                next_handle: 1,
                ..Default::default()
            }),
            delivery: Mutex::new(()),
            sessions: SessionRegistry::new(),
        }
    }

    /// Inject a failure
    pub fn fail_at(mut self, point: FailurePoint) -> Self {
        self.failures.insert(point);
        self
    }

    pub fn with_firmware(mut self, firmware: FirmwareInfo) -> Self {
        self.firmware = firmware;
        self
    }

    /// Deliver a payload to every registered sink
    ///
    /// Returns the number of sinks invoked.
    pub fn deliver(&self, payload: Option<&[u8]>) -> usize {
        let _delivering = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        let sinks: Vec<Arc<dyn EventSink>> = self.state().sinks.values().cloned().collect();
        for sink in &sinks {
            sink.on_receive(payload);
        }
        trace!("Delivered payload to {} sink(s)", sinks.len());
        sinks.len()
    }

    /// Convenience wrapper for text payloads
    pub fn deliver_text(&self, text: &str) -> usize {
        self.deliver(Some(text.as_bytes()))
    }

    pub fn open_handles(&self) -> Vec<DriverHandle> {
        let mut handles: Vec<_> = self.state().open.iter().copied().collect();
        handles.sort();
        handles
    }

    /// Number of `open` calls, successful or not
    pub fn open_count(&self) -> usize {
        self.state().open_calls
    }

    /// Number of `close` calls made for `handle`
    pub fn close_count(&self, handle: DriverHandle) -> usize {
        self.state().closes.get(&handle).copied().unwrap_or(0)
    }

    pub fn total_closes(&self) -> usize {
        self.state().closes.values().sum()
    }

    pub fn applied_config(&self, handle: DriverHandle) -> Option<ConfigFlags> {
        self.state().configs.get(&handle).copied()
    }

    pub fn has_sink(&self, handle: DriverHandle) -> bool {
        self.state().sinks.contains_key(&handle)
    }

    /// Handle returned by the most recent `open`
    pub fn last_handle(&self) -> Option<DriverHandle> {
        self.state().last_handle
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fails(&self, point: FailurePoint) -> bool {
        self.failures.contains(&point)
    }

    fn check_open(state: &SimState, handle: DriverHandle) -> Result<(), DriverError> {
        if state.open.contains(&handle) {
            Ok(())
        } else {
            Err(DriverError::UnknownHandle(handle))
        }
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl IrDriver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<DriverHandle, DriverError> {
        let mut state = self.state();
        state.open_calls += 1;

        if self.fails(FailurePoint::Open) {
            return Err(DriverError::Rejected(format!("cannot open {}", device.name)));
        }

        let handle = if self.fails(FailurePoint::InvalidHandle32) {
            DriverHandle::INVALID_32
        } else if self.fails(FailurePoint::InvalidHandle64) {
            DriverHandle::INVALID_64
        } else {
            let handle = DriverHandle::from_raw(state.next_handle);
            state.next_handle += 1;
            state.open.insert(handle);
            handle
        };
        state.last_handle = Some(handle);
        Ok(handle)
    }

    fn firmware_info(&self, handle: DriverHandle) -> Result<FirmwareInfo, DriverError> {
        Self::check_open(&self.state(), handle)?;
        if self.fails(FailurePoint::FirmwareInfo) {
            return Err(DriverError::Protocol(ProtocolError::ShortResponse {
                expected: protocol::FIRMWARE_INFO_LEN,
                actual: 0,
            }));
        }
        Ok(self.firmware)
    }

    fn set_config(&self, handle: DriverHandle, flags: ConfigFlags) -> Result<(), DriverError> {
        let mut state = self.state();
        Self::check_open(&state, handle)?;
        if self.fails(FailurePoint::Config) {
            return Err(DriverError::Rejected(format!(
                "configuration {:#06x} refused",
                flags.bits()
            )));
        }
        state.configs.insert(handle, flags);
        Ok(())
    }

    fn set_receive_sink(
        &self,
        handle: DriverHandle,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), DriverError> {
        let mut state = self.state();
        Self::check_open(&state, handle)?;
        if self.fails(FailurePoint::SetCallback) {
            return Err(DriverError::Rejected("callback refused".to_string()));
        }
        state.sinks.insert(handle, sink);
        Ok(())
    }

    fn clear_receive_sink(&self, handle: DriverHandle) -> Result<(), DriverError> {
        // Waits for any delivery in progress
        let _delivering = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        if self.fails(FailurePoint::ClearCallback) {
            return Err(DriverError::Rejected("callback removal refused".to_string()));
        }
        self.state().sinks.remove(&handle);
        Ok(())
    }

    fn close(&self, handle: DriverHandle) -> Result<(), DriverError> {
        let mut state = self.state();
        *state.closes.entry(handle).or_insert(0) += 1;
        if !state.open.remove(&handle) {
            return Err(DriverError::UnknownHandle(handle));
        }
        state.configs.remove(&handle);
        if self.fails(FailurePoint::Close) {
            return Err(DriverError::Rejected("close reported failure".to_string()));
        }
        Ok(())
    }

    fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::DeviceLocator;

    #[test]
    fn test_bus_injected_failures() {
        let bus = SimulatedBus::with_transceivers(1).with_enumeration_failures(2);
        assert!(bus.enumerate().is_err());
        assert!(bus.enumerate().is_err());
        assert_eq!(bus.enumerate().unwrap().len(), 1);
        assert_eq!(bus.enumerations(), 3);
    }

    #[test]
    fn test_handles_are_unique() {
        let bus = SimulatedBus::with_transceivers(2);
        let devices = DeviceLocator::uirt().find_all(&bus);
        let driver = SimulatedDriver::new();

        let a = driver.open(&devices[0]).unwrap();
        let b = driver.open(&devices[1]).unwrap();
        assert_ne!(a, b);
        assert_eq!(driver.open_handles(), vec![a, b]);

        driver.close(a).unwrap();
        assert!(matches!(driver.close(a), Err(DriverError::UnknownHandle(_))));
        assert_eq!(driver.close_count(a), 2);
        assert_eq!(driver.open_handles(), vec![b]);
    }

    #[test]
    fn test_sentinel_handles() {
        let bus = SimulatedBus::with_transceivers(1);
        let device = DeviceLocator::uirt().find(&bus).unwrap();

        let driver = SimulatedDriver::new().fail_at(FailurePoint::InvalidHandle64);
        assert_eq!(driver.open(&device).unwrap(), DriverHandle::INVALID_64);
        assert!(driver.open_handles().is_empty());
    }
}
