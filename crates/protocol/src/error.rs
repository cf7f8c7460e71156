//! Protocol error types

use thiserror::Error;

/// Wire-level and code normalization errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Code text contained nothing but whitespace
    #[error("Empty IR code")]
    EmptyCode,

    /// Code text contained a character that is not a hex digit
    #[error("Invalid hex digit {found:?} at position {position}")]
    InvalidHexDigit { found: char, position: usize },

    /// Code text did not split into whole hex pairs
    #[error("Odd number of hex digits: {count}")]
    OddDigitCount { count: usize },

    /// Code text exceeds the maximum accepted length
    #[error("IR code too long: {digits} hex digits (max: {max})")]
    CodeTooLong { digits: usize, max: usize },

    /// Response checksum did not verify
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// Response shorter than the command requires
    #[error("Short response: expected {expected} bytes, got {actual}")]
    ShortResponse { expected: usize, actual: usize },

    /// Baud rate cannot be expressed by the FTDI divisor
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    /// Device answered a command with a non-acknowledge status
    #[error("Command {opcode:#04x} rejected with status {status:#04x}")]
    CommandRejected { opcode: u8, status: u8 },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::InvalidHexDigit {
            found: 'z',
            position: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("'z'"));
        assert!(msg.contains("position 3"));
    }

    #[test]
    fn test_checksum_mismatch_display() {
        let err = ProtocolError::ChecksumMismatch {
            expected: 0x0a,
            actual: 0xff,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: expected 0x0a, got 0xff"
        );
    }
}
