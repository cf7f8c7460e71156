//! FTDI USB-serial bridge helpers
//!
//! The transceiver sits behind an FT232BM bridge. The bridge is programmed with
//! vendor control requests, and every bulk IN packet it sends begins with two
//! modem status bytes that are not part of the serial data.

use crate::error::{ProtocolError, Result};

/// bmRequestType for host-to-device vendor requests
pub const REQUEST_TYPE_OUT: u8 = 0x40;

pub const SIO_RESET: u8 = 0x00;
pub const SIO_SET_FLOW_CTRL: u8 = 0x02;
pub const SIO_SET_BAUD_RATE: u8 = 0x03;
pub const SIO_SET_DATA: u8 = 0x04;
pub const SIO_SET_LATENCY_TIMER: u8 = 0x09;

/// wValue for SIO_RESET
pub const RESET_SIO: u16 = 0;
pub const PURGE_RX: u16 = 1;
pub const PURGE_TX: u16 = 2;

/// wValue for SIO_SET_DATA: 8 data bits, no parity, 1 stop bit
pub const DATA_8N1: u16 = 0x0008;

/// wIndex high byte for SIO_SET_FLOW_CTRL: no flow control
pub const FLOW_NONE: u16 = 0x0000;

/// Serial line rate of the transceiver
pub const UIRT_BAUD_RATE: u32 = 312_500;

/// Latency timer in milliseconds
pub const LATENCY_TIMER_MS: u16 = 2;

/// Bytes of modem status prefixed to every bulk IN packet
pub const STATUS_HEADER_LEN: usize = 2;

const BASE_CLOCK: u32 = 3_000_000;
const FRACTION_CODE: [u32; 8] = [0, 3, 2, 4, 1, 5, 6, 7];

/// Compute the (wValue, wIndex) pair for SIO_SET_BAUD_RATE
///
/// The divisor is expressed in eighths of the 3 MHz base clock. Its fractional
/// part is encoded with a non-linear 3-bit code whose top bit spills into
/// wIndex.
///
/// # Example
/// ```
/// use protocol::ftdi::{baud_divisor, UIRT_BAUD_RATE};
///
/// assert_eq!(baud_divisor(UIRT_BAUD_RATE).unwrap(), (0x4009, 0x0001));
/// ```
pub fn baud_divisor(baud: u32) -> Result<(u16, u16)> {
    if baud == 0 {
        return Err(ProtocolError::UnsupportedBaudRate(baud));
    }

    let eighths = ((BASE_CLOCK as u64 * 8 + baud as u64 / 2) / baud as u64) as u32;
    let encoded = match eighths {
        8 => 0,  // 3 Mbaud
        12 => 1, // 2 Mbaud
        e if e < 8 || (e >> 3) > 0x3fff => {
            return Err(ProtocolError::UnsupportedBaudRate(baud));
        }
        e => (e >> 3) | (FRACTION_CODE[(e & 7) as usize] << 14),
    };

    Ok(((encoded & 0xffff) as u16, (encoded >> 16) as u16))
}

/// Remove the modem status bytes from a buffer of bulk IN packets
pub fn strip_status_headers(data: &[u8], max_packet_size: usize) -> Vec<u8> {
    if max_packet_size <= STATUS_HEADER_LEN {
        return Vec::new();
    }

    data.chunks(max_packet_size)
        .filter(|packet| packet.len() > STATUS_HEADER_LEN)
        .flat_map(|packet| packet[STATUS_HEADER_LEN..].iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uirt_baud_divisor() {
        assert_eq!(baud_divisor(312_500).unwrap(), (0x4009, 0x0001));
    }

    #[test]
    fn test_common_baud_divisors() {
        assert_eq!(baud_divisor(9600).unwrap(), (0x4138, 0x0000));
        assert_eq!(baud_divisor(3_000_000).unwrap(), (0x0000, 0x0000));
        assert_eq!(baud_divisor(2_000_000).unwrap(), (0x0001, 0x0000));
    }

    #[test]
    fn test_unsupported_baud() {
        assert!(baud_divisor(0).is_err());
        assert!(baud_divisor(10_000_000).is_err());
        assert!(baud_divisor(10).is_err());
    }

    #[test]
    fn test_strip_status_headers() {
        let mut data = vec![0x31, 0x60];
        data.extend_from_slice(&[1, 2, 3]);
        assert_eq!(strip_status_headers(&data, 64), vec![1, 2, 3]);
    }

    #[test]
    fn test_strip_status_headers_multiple_packets() {
        // Two full 4-byte packets and a trailing status-only packet
        let data = [0x31, 0x60, 1, 2, 0x31, 0x60, 3, 4, 0x31, 0x60];
        assert_eq!(strip_status_headers(&data, 4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_strip_status_only() {
        assert!(strip_status_headers(&[0x31, 0x60], 64).is_empty());
    }
}
