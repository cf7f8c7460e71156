//! Event decoder
//!
//! Runs on the backend's receive thread. Each payload is decoded into an
//! [`IrCode`], compared against the last delivered code and, when it differs,
//! handed to the notification bridge. Decoding is total: every path returns a
//! [`DecodeStatus`] and nothing propagates back into the backend.

use crate::backend::EventSink;
use crate::error::DecodeError;
use common::{DiagnosticKind, DiagnosticLog, EventPublisher};
use protocol::IrCode;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, error, trace};

/// Outcome of decoding one payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Empty or missing payload
    Idle,
    /// Forwarded to the consumer
    Delivered,
    /// Same code as the previous delivery
    Duplicate,
    /// Payload could not be decoded
    Malformed,
    /// Consumer queue full or gone
    Dropped,
    /// Session is closing; payload ignored
    Disarmed,
}

/// Last delivered code
///
/// Written only from the receive thread, readable from anywhere.
#[derive(Debug, Default)]
pub struct DedupState {
    last: RwLock<Option<IrCode>>,
}

impl DedupState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<IrCode> {
        self.last
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run `deliver` unless `code` repeats the last delivery
    ///
    /// The cell only advances when `deliver` succeeds, so a dropped event does
    /// not suppress the next identical one.
    fn deliver_if_new<E>(
        &self,
        code: &IrCode,
        deliver: impl FnOnce() -> Result<(), E>,
    ) -> Option<Result<(), E>> {
        let mut last = self.last.write().unwrap_or_else(PoisonError::into_inner);
        if last.as_ref() == Some(code) {
            return None;
        }
        let result = deliver();
        if result.is_ok() {
            *last = Some(code.clone());
        }
        Some(result)
    }
}

/// Decoder counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub received: u64,
    pub delivered: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    delivered: AtomicU64,
    duplicates: AtomicU64,
    malformed: AtomicU64,
    dropped: AtomicU64,
}

/// Decodes payloads and forwards new codes to the bridge
pub struct EventDecoder {
    publisher: EventPublisher,
    diagnostics: DiagnosticLog,
    dedup: DedupState,
    armed: AtomicBool,
    counters: Counters,
}

impl EventDecoder {
    pub fn new(publisher: EventPublisher, diagnostics: DiagnosticLog) -> Self {
        Self {
            publisher,
            diagnostics,
            dedup: DedupState::new(),
            armed: AtomicBool::new(true),
            counters: Counters::default(),
        }
    }

    /// Decode one payload
    pub fn decode(&self, payload: Option<&[u8]>) -> DecodeStatus {
        let bytes = match payload {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return DecodeStatus::Idle,
        };

        if !self.is_armed() {
            trace!("Ignoring payload after disarm");
            return DecodeStatus::Disarmed;
        }

        let (code, raw) = match parse_payload(bytes) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return DecodeStatus::Idle,
            Err(e) => {
                self.counters.received.fetch_add(1, Ordering::Relaxed);
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                self.diagnostics.warn(
                    DiagnosticKind::Decode,
                    format!("Receive callback error: {}", e),
                );
                return DecodeStatus::Malformed;
            }
        };
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let outcome = self.dedup.deliver_if_new(&code, || {
            self.publisher.try_publish(code.clone(), raw).map(|_| ())
        });

        match outcome {
            None => {
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                trace!("Suppressed repeat of {}", code);
                DecodeStatus::Duplicate
            }
            Some(Ok(())) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!("Delivered IR code {}", code);
                DecodeStatus::Delivered
            }
            Some(Err(e)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Dropped IR code {}: {}", code, e);
                DecodeStatus::Dropped
            }
        }
    }

    /// Last code handed to the consumer
    pub fn last_code(&self) -> Option<IrCode> {
        self.dedup.last()
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            received: self.counters.received.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    /// Ignore every payload from now on
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }
}

impl EventSink for EventDecoder {
    fn on_receive(&self, payload: Option<&[u8]>) {
        let contained = contain_panic(|| {
            self.decode(payload);
        });
        if !contained {
            error!("IR event decoder panicked; payload discarded");
        }
    }
}

/// Run a callback so that a panic stops here instead of unwinding into the
/// backend thread. Returns `false` if it panicked.
fn contain_panic(callback: impl FnOnce()) -> bool {
    catch_unwind(AssertUnwindSafe(callback)).is_ok()
}

/// `Ok(None)` for whitespace-only text
fn parse_payload(bytes: &[u8]) -> Result<Option<(IrCode, String)>, DecodeError> {
    let text = std::str::from_utf8(bytes)?;
    let raw = text.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let code = IrCode::parse(raw)?;
    Ok(Some((code, raw.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::create_event_bridge;

    #[test]
    fn test_whitespace_payload_is_idle() {
        let (publisher, stream) = create_event_bridge(4);
        let decoder = EventDecoder::new(publisher, DiagnosticLog::disabled());

        assert_eq!(decoder.decode(Some(b" \r\n")), DecodeStatus::Idle);
        assert!(stream.is_empty());
        assert_eq!(decoder.stats(), DecoderStats::default());
    }

    #[test]
    fn test_normalization_before_dedup() {
        let (publisher, stream) = create_event_bridge(4);
        let decoder = EventDecoder::new(publisher, DiagnosticLog::disabled());

        assert_eq!(decoder.decode(Some(b"1a2b3c")), DecodeStatus::Delivered);
        assert_eq!(
            decoder.decode(Some(b"1A 2B 3C\r\n")),
            DecodeStatus::Duplicate
        );
        assert_eq!(stream.len(), 1);
        assert_eq!(decoder.last_code().unwrap().as_str(), "1A2B3C");
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let (publisher, _stream) = create_event_bridge(4);
        let decoder = EventDecoder::new(publisher, DiagnosticLog::disabled());

        assert_eq!(decoder.decode(Some(&[0xff, 0xfe])), DecodeStatus::Malformed);
        assert_eq!(decoder.stats().malformed, 1);
        assert!(decoder.last_code().is_none());
    }

    #[test]
    fn test_dropped_code_does_not_advance_dedup() {
        let (publisher, stream) = create_event_bridge(1);
        let decoder = EventDecoder::new(publisher, DiagnosticLog::disabled());

        assert_eq!(decoder.decode(Some(b"0101")), DecodeStatus::Delivered);
        assert_eq!(decoder.decode(Some(b"0202")), DecodeStatus::Dropped);
        stream.drain();

        // 0202 never reached the consumer, so it is not a repeat
        assert_eq!(decoder.decode(Some(b"0202")), DecodeStatus::Delivered);
    }

    #[test]
    fn test_disarmed_decoder_ignores_payloads() {
        let (publisher, stream) = create_event_bridge(4);
        let decoder = EventDecoder::new(publisher, DiagnosticLog::disabled());
        decoder.disarm();

        assert_eq!(decoder.decode(Some(b"0101")), DecodeStatus::Disarmed);
        assert!(stream.is_empty());

        decoder.arm();
        assert_eq!(decoder.decode(Some(b"0101")), DecodeStatus::Delivered);
    }

    #[test]
    fn test_sink_entry_point() {
        let (publisher, stream) = create_event_bridge(4);
        let decoder = EventDecoder::new(publisher, DiagnosticLog::disabled());
        let sink: &dyn EventSink = &decoder;

        sink.on_receive(None);
        sink.on_receive(Some(b"not hex"));
        sink.on_receive(Some(b"A0B1C2"));

        let events = stream.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].raw, "A0B1C2");
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let (publisher, stream) = create_event_bridge(4);
        let decoder = EventDecoder::new(publisher, DiagnosticLog::disabled());

        let completed = contain_panic(|| {
            decoder.decode(Some(b"0101"));
            panic!("sink failure after delivery");
        });
        assert!(!completed);

        // State written before the panic is still consistent
        assert_eq!(decoder.decode(Some(b"0101")), DecodeStatus::Duplicate);
        assert!(contain_panic(|| decoder.on_receive(Some(b"0202"))));
        assert_eq!(stream.len(), 2);
        assert_eq!(decoder.stats().delivered, 2);
    }
}
