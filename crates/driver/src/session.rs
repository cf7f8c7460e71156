//! Driver session lifecycle
//!
//! A [`DriverSession`] owns one open handle and walks it through
//! `Opening -> Configured -> Listening -> Closing -> Closed`. Only fully
//! initialized sessions are ever handed out; a failure part way through
//! opening releases everything acquired so far before the error is returned.
//!
//! At most one session per physical device exists at a time. Claims live in
//! the backend's [`SessionRegistry`], keyed by bus position, so every
//! [`SessionManager`] over the same backend sees the same claims.

use crate::backend::{ConfigFlags, DriverHandle, IrDriver, ReceiverOptions};
use crate::decoder::EventDecoder;
use crate::error::{DriverError, SetupError};
use crate::locator::{DeviceDescriptor, DeviceKey};
use common::{DiagnosticKind, DiagnosticLog, EventPublisher};
use protocol::FirmwareInfo;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Configured,
    Listening,
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Closed => "closed",
            SessionState::Opening => "opening",
            SessionState::Configured => "configured",
            SessionState::Listening => "listening",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Devices that currently have a session
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashSet<DeviceKey>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a device, or `None` if another session holds it
    pub fn claim(&self, key: DeviceKey) -> Option<DeviceClaim> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(key) {
            return None;
        }
        Some(DeviceClaim {
            key,
            registry: self.clone(),
        })
    }

    pub fn is_active(&self, key: DeviceKey) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
    }

    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, key: DeviceKey) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
    }
}

/// Exclusive claim on a device, released on drop
#[derive(Debug)]
pub struct DeviceClaim {
    key: DeviceKey,
    registry: SessionRegistry,
}

impl DeviceClaim {
    pub fn key(&self) -> DeviceKey {
        self.key
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        self.registry.release(self.key);
        debug!("Released claim on device {}", self.key);
    }
}

/// Closes a freshly opened handle unless the open path completes
struct HandleGuard<'a> {
    driver: &'a dyn IrDriver,
    handle: DriverHandle,
    diagnostics: &'a DiagnosticLog,
    armed: bool,
}

impl<'a> HandleGuard<'a> {
    fn new(
        driver: &'a dyn IrDriver,
        handle: DriverHandle,
        diagnostics: &'a DiagnosticLog,
    ) -> Self {
        Self {
            driver,
            handle,
            diagnostics,
            armed: true,
        }
    }

    /// Hand ownership of the handle to the session
    fn release(mut self) -> DriverHandle {
        self.armed = false;
        self.handle
    }
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // A sink may have been registered before the failing step
        if let Err(e) = self.driver.clear_receive_sink(self.handle) {
            debug!("Clearing receive sink during cleanup failed: {}", e);
        }
        match self.driver.close(self.handle) {
            Ok(()) => self.diagnostics.info(
                DiagnosticKind::Lifecycle,
                format!("Handle {} closed after failed open", self.handle),
            ),
            Err(e) => self.diagnostics.error(
                DiagnosticKind::Error,
                format!("Failed to close handle {}: {}", self.handle, e),
            ),
        }
    }
}

/// Opens sessions against a driver backend
pub struct SessionManager {
    driver: Arc<dyn IrDriver>,
    registry: SessionRegistry,
    diagnostics: DiagnosticLog,
}

impl SessionManager {
    pub fn new(driver: Arc<dyn IrDriver>, diagnostics: DiagnosticLog) -> Self {
        let registry = driver.sessions().clone();
        Self {
            driver,
            registry,
            diagnostics,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn driver(&self) -> &Arc<dyn IrDriver> {
        &self.driver
    }

    /// Open, configure and arm a session
    ///
    /// Decoded codes are published through `publisher`. On error nothing is
    /// left held: the handle is closed and the device claim released.
    pub fn open(
        &self,
        device: &DeviceDescriptor,
        options: ReceiverOptions,
        publisher: EventPublisher,
    ) -> Result<DriverSession, SetupError> {
        let claim = self
            .registry
            .claim(device.key())
            .ok_or_else(|| SetupError::DeviceBusy(device.name.clone()))?;

        let mut state = SessionState::Opening;
        debug!("Session for {} is {}", device.name, state);

        let handle = self
            .driver
            .open(device)
            .map_err(|source| self.open_failed(device, source))?;
        if !handle.is_valid() {
            return Err(self.open_failed(device, DriverError::InvalidHandle(handle)));
        }
        let guard = HandleGuard::new(self.driver.as_ref(), handle, &self.diagnostics);
        self.diagnostics.info(
            DiagnosticKind::Driver,
            format!(
                "Driver {} opened {} with handle {}",
                self.driver.name(),
                device.name,
                handle
            ),
        );

        // Informational only
        let firmware = match self.driver.firmware_info(handle) {
            Ok(firmware) => {
                self.diagnostics.info(
                    DiagnosticKind::Driver,
                    format!("Firmware version: {}", firmware.version_string()),
                );
                Some(firmware)
            }
            Err(e) => {
                self.diagnostics.warn(
                    DiagnosticKind::Driver,
                    format!("Could not read firmware info: {}", e),
                );
                None
            }
        };

        let flags = options.flags();
        if let Err(source) = self.driver.set_config(handle, flags) {
            self.diagnostics.error(
                DiagnosticKind::Error,
                format!("Failed to set configuration {:#06x}: {}", flags.bits(), source),
            );
            return Err(SetupError::Config {
                flags: flags.bits(),
                source,
            });
        }
        state = SessionState::Configured;
        self.diagnostics.info(
            DiagnosticKind::Config,
            format!("Configuration applied: {:#06x}", flags.bits()),
        );
        debug!("Session for {} is {}", device.name, state);

        let decoder = Arc::new(EventDecoder::new(publisher, self.diagnostics.clone()));
        if let Err(e) = self.driver.set_receive_sink(handle, decoder.clone()) {
            self.diagnostics.error(
                DiagnosticKind::Error,
                format!("Failed to set receive callback: {}", e),
            );
            return Err(SetupError::Callback(e));
        }
        self.diagnostics.info(DiagnosticKind::Callback, "Receive callback set");

        let handle = guard.release();
        state = SessionState::Listening;
        info!("Listening on {} (handle {})", device, handle);

        Ok(DriverSession {
            driver: self.driver.clone(),
            device: device.clone(),
            handle,
            flags,
            firmware,
            decoder,
            state,
            claim: Some(claim),
            diagnostics: self.diagnostics.clone(),
        })
    }

    fn open_failed(&self, device: &DeviceDescriptor, source: DriverError) -> SetupError {
        self.diagnostics.error(
            DiagnosticKind::Error,
            format!("Failed to open {}: {}", device.name, source),
        );
        SetupError::Open {
            device: device.name.clone(),
            source,
        }
    }
}

/// A listening session
///
/// Dropping the session closes it.
pub struct DriverSession {
    driver: Arc<dyn IrDriver>,
    device: DeviceDescriptor,
    handle: DriverHandle,
    flags: ConfigFlags,
    firmware: Option<FirmwareInfo>,
    decoder: Arc<EventDecoder>,
    state: SessionState,
    claim: Option<DeviceClaim>,
    diagnostics: DiagnosticLog,
}

impl DriverSession {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn handle(&self) -> DriverHandle {
        self.handle
    }

    pub fn flags(&self) -> ConfigFlags {
        self.flags
    }

    pub fn firmware(&self) -> Option<&FirmwareInfo> {
        self.firmware.as_ref()
    }

    pub fn decoder(&self) -> &EventDecoder {
        &self.decoder
    }

    pub fn is_listening(&self) -> bool {
        self.state == SessionState::Listening
    }

    /// Stop receiving and release the handle
    ///
    /// Calling this on a closed session does nothing. Errors along the way
    /// are logged and never stop the handle from being released.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        debug!("Session for {} is {}", self.device.name, self.state);

        // Late callbacks are ignored from here on
        self.decoder.disarm();

        match self.driver.clear_receive_sink(self.handle) {
            Ok(()) => self
                .diagnostics
                .info(DiagnosticKind::Callback, "Receive callback unset"),
            Err(e) => self.diagnostics.warn(
                DiagnosticKind::Callback,
                format!("Failed to unset receive callback: {}", e),
            ),
        }

        match self.driver.close(self.handle) {
            Ok(()) => self.diagnostics.info(
                DiagnosticKind::Lifecycle,
                format!("Handle {} closed", self.handle),
            ),
            Err(e) => self.diagnostics.error(
                DiagnosticKind::Error,
                format!("Failed to close handle {}: {}", self.handle, e),
            ),
        }

        self.claim.take();
        self.state = SessionState::Closed;
        info!("Session for {} closed", self.device.name);
    }
}

impl Drop for DriverSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for DriverSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverSession")
            .field("device", &self.device.name)
            .field("handle", &self.handle)
            .field("flags", &self.flags)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(address: u8) -> DeviceKey {
        DeviceKey { bus: 1, address }
    }

    #[test]
    fn test_registry_claim_is_exclusive() {
        let registry = SessionRegistry::new();
        let claim = registry.claim(key(4)).unwrap();

        assert!(registry.claim(key(4)).is_none());
        assert!(registry.claim(key(5)).is_some());
        assert!(registry.is_active(key(4)));

        drop(claim);
        assert!(!registry.is_active(key(4)));
        assert!(registry.claim(key(4)).is_some());
    }

    #[test]
    fn test_registry_clones_share_state() {
        let registry = SessionRegistry::new();
        let other = registry.clone();
        let _claim = registry.claim(key(9)).unwrap();

        assert_eq!(other.active_count(), 1);
        assert!(other.claim(key(9)).is_none());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Listening.to_string(), "listening");
        assert_eq!(SessionState::Closed.to_string(), "closed");
    }
}
