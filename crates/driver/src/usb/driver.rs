//! libusb-backed driver
//!
//! Talks to the transceiver directly through its FTDI bridge. Handles are
//! small integers allocated from 1 upwards and map to slots holding the open
//! device and, while a sink is registered, its receive reader.

use super::device::UirtDevice;
use super::reader::ReceiveReader;
use crate::backend::{ConfigFlags, DriverHandle, EventSink, IrDriver};
use crate::error::{DriverError, SetupError};
use crate::locator::DeviceDescriptor;
use crate::session::SessionRegistry;
use protocol::FirmwareInfo;
use rusb::Context;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

struct Slot {
    device: Arc<UirtDevice>,
    reader: Option<ReceiveReader>,
}

/// USB backend
pub struct UsbIrDriver {
    context: Context,
    slots: Mutex<HashMap<DriverHandle, Slot>>,
    next_handle: AtomicU64,
    sessions: SessionRegistry,
}

impl UsbIrDriver {
    /// Initialize libusb
    pub fn load() -> Result<Self, SetupError> {
        let context = Context::new().map_err(|e| SetupError::DriverLoad(e.to_string()))?;
        info!("libusb {} loaded", libusb_version());
        Ok(Self {
            context,
            slots: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            sessions: SessionRegistry::new(),
        })
    }

    /// Context for device enumeration
    pub fn context(&self) -> &Context {
        &self.context
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<DriverHandle, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Device for a handle that is not currently streaming
    ///
    /// Command responses and receive data share one endpoint, so commands are
    /// refused while a reader is running. A reader that exited after a
    /// disconnect no longer blocks them.
    fn idle_device(&self, handle: DriverHandle) -> Result<Arc<UirtDevice>, DriverError> {
        let slots = self.slots();
        let slot = slots.get(&handle).ok_or(DriverError::UnknownHandle(handle))?;
        if slot.reader.as_ref().is_some_and(ReceiveReader::is_running) {
            return Err(DriverError::Busy(format!(
                "{} is receiving",
                slot.device.name()
            )));
        }
        Ok(slot.device.clone())
    }
}

fn libusb_version() -> String {
    let version = rusb::version();
    format!(
        "{}.{}.{}",
        version.major(),
        version.minor(),
        version.micro()
    )
}

impl IrDriver for UsbIrDriver {
    fn name(&self) -> &str {
        "libusb"
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<DriverHandle, DriverError> {
        let opened = UirtDevice::open(&self.context, device)?;
        let handle = DriverHandle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.slots().insert(
            handle,
            Slot {
                device: Arc::new(opened),
                reader: None,
            },
        );
        debug!("Allocated handle {} for {}", handle, device.name);
        Ok(handle)
    }

    fn firmware_info(&self, handle: DriverHandle) -> Result<FirmwareInfo, DriverError> {
        self.idle_device(handle)?.firmware_info()
    }

    fn set_config(&self, handle: DriverHandle, flags: ConfigFlags) -> Result<(), DriverError> {
        self.idle_device(handle)?.set_config(flags)
    }

    fn set_receive_sink(
        &self,
        handle: DriverHandle,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), DriverError> {
        let (device, previous) = {
            let mut slots = self.slots();
            let slot = slots
                .get_mut(&handle)
                .ok_or(DriverError::UnknownHandle(handle))?;
            (slot.device.clone(), slot.reader.take())
        };
        // Joins the old thread outside the lock
        drop(previous);

        let reader = ReceiveReader::spawn(device, sink)?;
        let mut slots = self.slots();
        match slots.get_mut(&handle) {
            Some(slot) => {
                slot.reader = Some(reader);
                Ok(())
            }
            // Closed while the reader was starting; dropping it stops the thread
            None => Err(DriverError::UnknownHandle(handle)),
        }
    }

    fn clear_receive_sink(&self, handle: DriverHandle) -> Result<(), DriverError> {
        let reader = {
            let mut slots = self.slots();
            let slot = slots
                .get_mut(&handle)
                .ok_or(DriverError::UnknownHandle(handle))?;
            slot.reader.take()
        };
        if let Some(mut reader) = reader {
            reader.stop();
            debug!("Receive reader for handle {} stopped", handle);
        }
        Ok(())
    }

    fn close(&self, handle: DriverHandle) -> Result<(), DriverError> {
        let slot = self
            .slots()
            .remove(&handle)
            .ok_or(DriverError::UnknownHandle(handle))?;
        if let Some(mut reader) = slot.reader {
            reader.stop();
        }
        slot.device.close()
    }

    fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }
}
