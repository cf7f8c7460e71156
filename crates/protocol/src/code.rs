//! Normalized IR code representation
//!
//! Decoded codes are exchanged as a sequence of hexadecimal pairs. Vendor
//! drivers and the receive framer produce this text with varying case and
//! spacing (Pronto strings group digits in words of four, UIR codes are
//! contiguous), so every code is normalized to one canonical form before it is
//! compared or delivered:
//!
//! ```text
//! "0000 006d 0022"  ->  "0000006D0022"
//! ```

use crate::error::{ProtocolError, Result};
use std::fmt;

/// Maximum accepted number of hex digits in a single code
pub const MAX_CODE_DIGITS: usize = 4096;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// A decoded IR code in canonical form: uppercase hex pairs, no separators
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IrCode(String);

impl IrCode {
    /// Normalize code text into its canonical form
    ///
    /// All ASCII whitespace is removed, digits are uppercased, and the result
    /// must be a non-empty, even-length run of hex digits.
    ///
    /// # Example
    /// ```
    /// use protocol::IrCode;
    ///
    /// let code = IrCode::parse(" 0000 006d\r\n").unwrap();
    /// assert_eq!(code.as_str(), "0000006D");
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let mut canonical = String::with_capacity(text.len());

        for (position, c) in text.chars().enumerate() {
            if c.is_ascii_whitespace() {
                continue;
            }
            if !c.is_ascii_hexdigit() {
                return Err(ProtocolError::InvalidHexDigit { found: c, position });
            }
            canonical.push(c.to_ascii_uppercase());
        }

        if canonical.is_empty() {
            return Err(ProtocolError::EmptyCode);
        }
        if canonical.len() > MAX_CODE_DIGITS {
            return Err(ProtocolError::CodeTooLong {
                digits: canonical.len(),
                max: MAX_CODE_DIGITS,
            });
        }
        if canonical.len() % 2 != 0 {
            return Err(ProtocolError::OddDigitCount {
                count: canonical.len(),
            });
        }

        Ok(Self(canonical))
    }

    /// Hex-encode raw code bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut canonical = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            canonical.push(HEX_DIGITS[(byte >> 4) as usize] as char);
            canonical.push(HEX_DIGITS[(byte & 0x0f) as usize] as char);
        }
        Self(canonical)
    }

    /// Canonical string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the hex pairs of the code
    pub fn pairs(&self) -> impl Iterator<Item = &str> {
        // Canonical form is ASCII with an even length, so every split is on a char boundary
        (0..self.0.len()).step_by(2).map(move |i| &self.0[i..i + 2])
    }

    /// Decode the hex pairs back into bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.pairs()
            .filter_map(|pair| u8::from_str_radix(pair, 16).ok())
            .collect()
    }

    /// Number of bytes the code represents
    pub fn byte_len(&self) -> usize {
        self.0.len() / 2
    }
}

impl fmt::Display for IrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for IrCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
