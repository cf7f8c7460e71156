//! USB backend
//!
//! Drives the transceiver through libusb (via rusb). Blocking USB calls are
//! confined to the caller's thread during setup and to one reader thread per
//! listening handle afterwards.

mod device;
mod driver;
mod reader;

pub use device::UirtDevice;
pub use driver::UsbIrDriver;
pub use reader::ReceiveReader;
