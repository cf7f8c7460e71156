//! Device locator scenarios on a simulated bus

use common::{DiagnosticLog, create_event_bridge};
use driver::simulated::{SimulatedBus, SimulatedDriver};
use driver::{
    DeviceLocator, LocateError, ReceiverOptions, SessionManager, SetupError, UsbDeviceEntry,
};
use std::sync::Arc;
use std::time::Duration;

fn other_device(address: u8) -> UsbDeviceEntry {
    UsbDeviceEntry {
        vendor_id: 0x046d,
        product_id: 0xc52b,
        bus_number: 1,
        address,
        serial_number: None,
    }
}

#[test]
fn test_missing_device_never_opens() {
    let bus = SimulatedBus::new(vec![other_device(2), other_device(3)]);
    let driver = Arc::new(SimulatedDriver::new());
    let manager = SessionManager::new(driver.clone(), DiagnosticLog::disabled());
    let (publisher, _stream) = create_event_bridge(4);

    let result: Result<_, SetupError> = DeviceLocator::uirt()
        .find(&bus)
        .map_err(SetupError::from)
        .and_then(|device| manager.open(&device, ReceiverOptions::default(), publisher));

    assert!(matches!(
        result,
        Err(SetupError::DeviceNotFound {
            vendor_id: 0x0403,
            product_id: 0xf850
        })
    ));
    assert_eq!(driver.open_count(), 0);
}

#[test]
fn test_identical_devices_get_distinct_names() {
    let bus = SimulatedBus::with_transceivers(2);
    let locator = DeviceLocator::uirt();

    let first = locator.find(&bus).unwrap();
    assert_eq!(first.name, "USB-UIRT");

    let devices = locator.find_all(&bus);
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0], first);
    assert_eq!(devices[1].name, "USB-UIRT-2");
    assert_ne!(devices[0].key(), devices[1].key());

    let second = locator.find_named(&bus, "USB-UIRT-2").unwrap();
    assert_eq!(second.address, devices[1].address);
    assert_eq!(second.serial_number.as_deref(), Some("SIM00003"));
}

#[test]
fn test_enumeration_failure_is_not_found() {
    let bus = SimulatedBus::with_transceivers(1).with_enumeration_failures(1);

    let err = DeviceLocator::uirt().find(&bus).unwrap_err();
    assert!(matches!(err, LocateError::NotFound { name: None, .. }));
    assert_eq!(bus.enumerations(), 1);
}

#[test]
fn test_enumeration_retry_recovers() {
    let bus = SimulatedBus::with_transceivers(1).with_enumeration_failures(2);
    let locator = DeviceLocator::uirt().with_retries(2, Duration::from_millis(1));

    let device = locator.find(&bus).unwrap();
    assert_eq!(device.name, "USB-UIRT");
    assert_eq!(bus.enumerations(), 3);
}

#[test]
fn test_retries_are_bounded() {
    let bus = SimulatedBus::with_transceivers(1).with_enumeration_failures(10);
    let locator = DeviceLocator::uirt().with_retries(3, Duration::from_millis(1));

    assert!(locator.find(&bus).is_err());
    assert_eq!(bus.enumerations(), 4);
}

#[test]
fn test_missing_device_is_not_retried() {
    // Retries only cover enumeration errors; an empty bus is an answer
    let bus = SimulatedBus::new(Vec::new());
    let locator = DeviceLocator::uirt().with_retries(5, Duration::from_millis(1));

    assert!(locator.find(&bus).is_err());
    assert_eq!(bus.enumerations(), 1);
}

#[test]
fn test_search_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("uuirtlog.txt");
    let log = DiagnosticLog::create(&path).unwrap();

    let locator = DeviceLocator::uirt().with_diagnostics(log.clone());
    locator.find(&SimulatedBus::with_transceivers(1)).unwrap();
    let _ = locator.find(&SimulatedBus::new(Vec::new()));
    let _ = locator.find(&SimulatedBus::with_transceivers(1).with_enumeration_failures(1));
    log.shutdown();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("[device] Detected device: USB-UIRT"));
    assert!(content.contains("serial=SIM00002"));
    assert!(content.contains("USB-UIRT device not found"));
    assert!(content.contains("Device search error:"));
}
