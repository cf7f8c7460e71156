//! Firmware information reported by the transceiver
//!
//! The version response carries seven payload bytes followed by the checksum:
//!
//! ```text
//! [fw hi][fw lo][proto hi][proto lo][day][month][year - 2000][checksum]
//! ```

use crate::error::{ProtocolError, Result};
use byteorder::{BigEndian, ByteOrder};
use std::fmt;

/// Length of the version response frame, checksum included
pub const FIRMWARE_INFO_LEN: usize = 8;

/// Firmware build date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareDate {
    pub day: u8,
    pub month: u8,
    pub year: u16,
}

/// Firmware and protocol version metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareInfo {
    /// Firmware version, major in the high byte
    pub firmware_version: u16,
    /// Protocol version, major in the high byte
    pub protocol_version: u16,
    pub date: FirmwareDate,
}

impl FirmwareInfo {
    /// Parse the (already checksum-verified) version payload
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < FIRMWARE_INFO_LEN - 1 {
            return Err(ProtocolError::ShortResponse {
                expected: FIRMWARE_INFO_LEN - 1,
                actual: payload.len(),
            });
        }

        Ok(Self {
            firmware_version: BigEndian::read_u16(&payload[0..2]),
            protocol_version: BigEndian::read_u16(&payload[2..4]),
            date: FirmwareDate {
                day: payload[4],
                month: payload[5],
                year: 2000 + payload[6] as u16,
            },
        })
    }

    /// Encode back into a version payload (without checksum)
    pub fn to_payload(&self) -> [u8; FIRMWARE_INFO_LEN - 1] {
        let mut payload = [0u8; FIRMWARE_INFO_LEN - 1];
        BigEndian::write_u16(&mut payload[0..2], self.firmware_version);
        BigEndian::write_u16(&mut payload[2..4], self.protocol_version);
        payload[4] = self.date.day;
        payload[5] = self.date.month;
        payload[6] = self.date.year.saturating_sub(2000).min(u8::MAX as u16) as u8;
        payload
    }

    /// Firmware version as `major.minor`
    pub fn version_string(&self) -> String {
        format!(
            "{}.{}",
            self.firmware_version >> 8,
            self.firmware_version & 0xff
        )
    }
}

impl fmt::Display for FirmwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "firmware {} (protocol {}.{}, built {:04}-{:02}-{:02})",
            self.version_string(),
            self.protocol_version >> 8,
            self.protocol_version & 0xff,
            self.date.year,
            self.date.month,
            self.date.day
        )
    }
}
