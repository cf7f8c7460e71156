//! USB-UIRT command framing
//!
//! # Frame Format
//!
//! Commands and their responses share one framing rule: the last byte is a
//! checksum chosen so that the byte sum of the whole frame is zero (mod 256).
//!
//! ```text
//! command:  [opcode][data ...][checksum]
//! response: [payload ...][checksum]
//! ```

use crate::error::{ProtocolError, Result};
use crate::info::{FIRMWARE_INFO_LEN, FirmwareInfo};

/// Query firmware and protocol version
pub const OP_GET_VERSION: u8 = 0x23;
/// Write the configuration byte
pub const OP_SET_CONFIG: u8 = 0x37;
/// Read the configuration byte
pub const OP_GET_CONFIG: u8 = 0x38;

/// Status byte acknowledging a write command
pub const STATUS_ACK: u8 = 0x21;

/// Commands understood by the transceiver firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetVersion,
    GetConfig,
    SetConfig(u8),
}

impl Command {
    /// Command opcode
    pub fn opcode(&self) -> u8 {
        match self {
            Command::GetVersion => OP_GET_VERSION,
            Command::GetConfig => OP_GET_CONFIG,
            Command::SetConfig(_) => OP_SET_CONFIG,
        }
    }

    /// Encode into a checksummed frame
    ///
    /// # Example
    /// ```
    /// use protocol::Command;
    ///
    /// let frame = Command::SetConfig(0x05).encode();
    /// assert_eq!(frame, vec![0x37, 0x05, 0xc4]);
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = vec![self.opcode()];
        if let Command::SetConfig(value) = self {
            frame.push(*value);
        }
        frame.push(checksum(&frame));
        frame
    }

    /// Length of the response frame, checksum included
    pub fn response_len(&self) -> usize {
        match self {
            Command::GetVersion => FIRMWARE_INFO_LEN,
            Command::GetConfig => 2,
            Command::SetConfig(_) => 1,
        }
    }
}

/// Checksum byte that brings the frame sum to zero
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0u8.wrapping_sub(sum)
}

/// Verify a checksummed response frame and return its payload
pub fn verify_response(frame: &[u8], expected_len: usize) -> Result<&[u8]> {
    if frame.len() < expected_len || expected_len == 0 {
        return Err(ProtocolError::ShortResponse {
            expected: expected_len,
            actual: frame.len(),
        });
    }

    let frame = &frame[..expected_len];
    let (payload, trailer) = frame.split_at(expected_len - 1);
    let expected = checksum(payload);
    if trailer[0] != expected {
        return Err(ProtocolError::ChecksumMismatch {
            expected,
            actual: trailer[0],
        });
    }

    Ok(payload)
}

/// Parse the response to [`Command::GetVersion`]
pub fn parse_version_response(frame: &[u8]) -> Result<FirmwareInfo> {
    let payload = verify_response(frame, FIRMWARE_INFO_LEN)?;
    FirmwareInfo::from_payload(payload)
}

/// Parse the response to [`Command::GetConfig`]
pub fn parse_config_response(frame: &[u8]) -> Result<u8> {
    let payload = verify_response(frame, 2)?;
    Ok(payload[0])
}

/// Check the single status byte returned by [`Command::SetConfig`]
///
/// The status byte is not checksummed.
pub fn check_ack(opcode: u8, frame: &[u8]) -> Result<()> {
    match frame.first() {
        Some(&STATUS_ACK) => Ok(()),
        Some(&status) => Err(ProtocolError::CommandRejected { opcode, status }),
        None => Err(ProtocolError::ShortResponse {
            expected: 1,
            actual: 0,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_zeroes_frame_sum() {
        let frame = Command::GetVersion.encode();
        assert_eq!(frame, vec![0x23, 0xdd]);
        let sum = frame.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        assert_eq!(sum, 0);
    }

    #[test]
    fn test_encode_set_config() {
        let frame = Command::SetConfig(0x07).encode();
        assert_eq!(frame.len(), 3);
        assert_eq!(frame[0], OP_SET_CONFIG);
        assert_eq!(frame[1], 0x07);
        assert_eq!(frame[2], checksum(&[OP_SET_CONFIG, 0x07]));
    }

    #[test]
    fn test_verify_response_ok() {
        let frame = [0x05, 0xfb];
        assert_eq!(verify_response(&frame, 2).unwrap(), &[0x05]);
    }

    #[test]
    fn test_verify_response_ignores_trailing_bytes() {
        let frame = [0x05, 0xfb, 0xaa, 0xbb];
        assert_eq!(verify_response(&frame, 2).unwrap(), &[0x05]);
    }

    #[test]
    fn test_verify_response_bad_checksum() {
        let frame = [0x05, 0x00];
        assert_eq!(
            verify_response(&frame, 2),
            Err(ProtocolError::ChecksumMismatch {
                expected: 0xfb,
                actual: 0x00
            })
        );
    }

    #[test]
    fn test_verify_response_short() {
        assert_eq!(
            verify_response(&[0x01], 2),
            Err(ProtocolError::ShortResponse {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_check_ack() {
        assert!(check_ack(OP_SET_CONFIG, &[STATUS_ACK]).is_ok());
        assert_eq!(
            check_ack(OP_SET_CONFIG, &[0x20]),
            Err(ProtocolError::CommandRejected {
                opcode: OP_SET_CONFIG,
                status: 0x20
            })
        );
        assert!(check_ack(OP_SET_CONFIG, &[]).is_err());
    }

    #[test]
    fn test_parse_config_response() {
        let value = 0x05;
        let frame = [value, checksum(&[value])];
        assert_eq!(parse_config_response(&frame).unwrap(), 0x05);
    }
}
