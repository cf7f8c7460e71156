//! Test utilities for the IR receiver crates
//!
//! Provides sample payloads and async helpers shared by unit and integration
//! tests across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{sample_payload, SAMPLE_UIR_CODES};
//!
//! let payload = sample_payload(0);
//! assert_eq!(payload, SAMPLE_UIR_CODES[0].as_bytes());
//! ```

use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// UIR codes as the driver hands them to the receive callback
pub const SAMPLE_UIR_CODES: [&str; 4] = [
    "1A2B3C4D5E6F",
    "0F0E0D0C0B0A",
    "2A2A2A2A2A2A",
    "A0B1C2D3E4F5",
];

/// A Pronto-format code with word spacing and a trailing line break
pub const SAMPLE_PRONTO_CODE: &str = "0000 006D 0022 0002 0157 00AC 0015 0016\r\n";

/// Payload bytes for one of the sample codes
pub fn sample_payload(index: usize) -> &'static [u8] {
    SAMPLE_UIR_CODES[index % SAMPLE_UIR_CODES.len()].as_bytes()
}

/// Run a future with a timeout
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let event = with_timeout(DEFAULT_TEST_TIMEOUT, stream.recv()).await.unwrap();
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::IrCode;

    #[test]
    fn test_sample_codes_are_canonical() {
        for text in SAMPLE_UIR_CODES {
            assert_eq!(IrCode::parse(text).unwrap().as_str(), text);
        }
        assert!(IrCode::parse(SAMPLE_PRONTO_CODE).is_ok());
    }

    #[test]
    fn test_sample_payload_wraps() {
        assert_eq!(sample_payload(4), sample_payload(0));
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert!(result.is_err());
    }
}
