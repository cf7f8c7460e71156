//! Receive framing for UIR codes
//!
//! In receive mode the transceiver streams one 6-byte UIR code per decoded
//! signal. The serial stream has no delimiters, so frames are recovered by
//! length and resynchronized on idle gaps: bytes of one code arrive back to
//! back, and a pause longer than [`INTER_BYTE_GAP`] means any partial frame was
//! line noise.

use crate::code::IrCode;
use bytes::{Buf, BytesMut};
use std::time::{Duration, Instant};

/// Length of a UIR receive code
pub const UIR_CODE_LEN: usize = 6;

/// Idle time after which a partial frame is discarded
pub const INTER_BYTE_GAP: Duration = Duration::from_millis(20);

/// Reassembles UIR codes from serial data
#[derive(Debug)]
pub struct UirFramer {
    buffer: BytesMut,
    last_byte_at: Option<Instant>,
    gap: Duration,
    /// Partial frames discarded on gap timeout
    discarded: u64,
}

impl UirFramer {
    pub fn new() -> Self {
        Self::with_gap(INTER_BYTE_GAP)
    }

    pub fn with_gap(gap: Duration) -> Self {
        Self {
            buffer: BytesMut::with_capacity(UIR_CODE_LEN * 4),
            last_byte_at: None,
            gap,
            discarded: 0,
        }
    }

    /// Feed serial bytes received at `now`, returning every completed code
    pub fn push(&mut self, data: &[u8], now: Instant) -> Vec<IrCode> {
        if data.is_empty() {
            return Vec::new();
        }

        if let Some(last) = self.last_byte_at
            && now.saturating_duration_since(last) > self.gap
            && !self.buffer.is_empty()
        {
            self.discarded += 1;
            self.buffer.clear();
        }
        self.last_byte_at = Some(now);

        self.buffer.extend_from_slice(data);

        let mut codes = Vec::with_capacity(self.buffer.len() / UIR_CODE_LEN);
        while self.buffer.len() >= UIR_CODE_LEN {
            codes.push(IrCode::from_bytes(&self.buffer[..UIR_CODE_LEN]));
            self.buffer.advance(UIR_CODE_LEN);
        }
        codes
    }

    /// Bytes of the frame currently being assembled
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Number of partial frames dropped by resynchronization
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Drop any partial frame, e.g. after a read error
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_byte_at = None;
    }
}

impl Default for UirFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODE: [u8; 6] = [0x1a, 0x2b, 0x3c, 0x4d, 0x5e, 0x6f];

    #[test]
    fn test_single_code() {
        let mut framer = UirFramer::new();
        let codes = framer.push(&CODE, Instant::now());
        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].as_str(), "1A2B3C4D5E6F");
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_code_split_across_reads() {
        let mut framer = UirFramer::new();
        let t0 = Instant::now();

        assert!(framer.push(&CODE[..4], t0).is_empty());
        assert_eq!(framer.pending(), 4);

        let codes = framer.push(&CODE[4..], t0 + Duration::from_millis(1));
        assert_eq!(codes.len(), 1);
    }

    #[test]
    fn test_two_codes_in_one_read() {
        let mut framer = UirFramer::new();
        let mut data = CODE.to_vec();
        data.extend_from_slice(&CODE);
        assert_eq!(framer.push(&data, Instant::now()).len(), 2);
    }

    #[test]
    fn test_gap_discards_partial_frame() {
        let mut framer = UirFramer::new();
        let t0 = Instant::now();

        framer.push(&[0xff, 0xff], t0);
        let codes = framer.push(&CODE, t0 + Duration::from_millis(100));

        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].as_str(), "1A2B3C4D5E6F");
        assert_eq!(framer.discarded(), 1);
    }

    #[test]
    fn test_empty_push_is_ignored() {
        let mut framer = UirFramer::new();
        assert!(framer.push(&[], Instant::now()).is_empty());
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let mut framer = UirFramer::new();
        let t0 = Instant::now();

        assert!(framer.push(&CODE[..3], t0).is_empty());
        framer.reset();
        assert_eq!(framer.pending(), 0);

        // Within the gap, but the old bytes are gone
        let codes = framer.push(&CODE, t0 + Duration::from_millis(1));
        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].as_str(), "1A2B3C4D5E6F");
        assert_eq!(framer.discarded(), 0);
    }
}
