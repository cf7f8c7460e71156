//! Notification bridge between the driver's receive thread and the consumer
//!
//! The driver invokes its receive callback on a thread it owns, and that thread
//! must never wait on the application. [`EventPublisher`] therefore only ever
//! attempts a non-blocking send into a bounded queue; [`EventStream`] is the
//! consumer end and can be awaited from Tokio or drained from a plain thread.
//!
//! Ordering is FIFO. When the queue is full the newest event is rejected and
//! counted; sequence numbers are assigned before the send, so a gap in the
//! sequence seen by the consumer marks dropped events.

use async_channel::{Receiver, Sender, TrySendError, bounded};
use protocol::IrCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Default queue capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// A decoded IR signal accepted for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrEvent {
    /// Monotonic per-bridge sequence number
    pub sequence: u64,
    /// Normalized code
    pub code: IrCode,
    /// Payload text as handed over by the driver
    pub raw: String,
    /// When the decoder accepted the signal
    pub received_at: SystemTime,
}

/// Producer side, used from the driver callback thread
#[derive(Clone)]
pub struct EventPublisher {
    tx: Sender<IrEvent>,
    next_sequence: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    capacity: usize,
}

impl EventPublisher {
    /// Try to enqueue an event without blocking
    ///
    /// Returns the sequence number assigned to the event.
    pub fn try_publish(&self, code: IrCode, raw: impl Into<String>) -> crate::Result<u64> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let event = IrEvent {
            sequence,
            code,
            raw: raw.into(),
            received_at: SystemTime::now(),
        };

        match self.tx.try_send(event) {
            Ok(()) => Ok(sequence),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(crate::Error::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(crate::Error::Channel("event stream closed".to_string()))
            }
        }
    }

    /// Whether the consumer side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Events rejected so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side
pub struct EventStream {
    rx: Receiver<IrEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventStream {
    /// Wait for the next event
    pub async fn recv(&self) -> crate::Result<IrEvent> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Wait for the next event from a non-async thread
    pub fn recv_blocking(&self) -> crate::Result<IrEvent> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Take the next event if one is queued
    pub fn try_recv(&self) -> Option<IrEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain every queued event
    pub fn drain(&self) -> Vec<IrEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Events the publisher had to reject
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create the bridge between the driver thread and the consumer
///
/// Returns (EventPublisher for the driver, EventStream for the consumer)
pub fn create_event_bridge(capacity: usize) -> (EventPublisher, EventStream) {
    let capacity = capacity.max(1);
    let (tx, rx) = bounded(capacity);
    let dropped = Arc::new(AtomicU64::new(0));

    (
        EventPublisher {
            tx,
            next_sequence: Arc::new(AtomicU64::new(0)),
            dropped: dropped.clone(),
            capacity,
        },
        EventStream { rx, dropped },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(text: &str) -> IrCode {
        IrCode::parse(text).unwrap()
    }

    #[tokio::test]
    async fn test_channel_bridge() {
        let (publisher, stream) = create_event_bridge(8);

        // Publish from a plain thread, the way the driver callback does
        let handle = std::thread::spawn(move || publisher.try_publish(code("A1B2"), "a1b2"));

        let seq = handle.join().unwrap().unwrap();
        let event = stream.recv().await.unwrap();
        assert_eq!(event.sequence, seq);
        assert_eq!(event.code.as_str(), "A1B2");
        assert_eq!(event.raw, "a1b2");
    }

    #[test]
    fn test_fifo_order() {
        let (publisher, stream) = create_event_bridge(8);
        for text in ["01", "02", "03"] {
            publisher.try_publish(code(text), text).unwrap();
        }

        let codes: Vec<String> = stream.drain().into_iter().map(|e| e.raw).collect();
        assert_eq!(codes, vec!["01", "02", "03"]);
    }

    #[test]
    fn test_full_queue_rejects_newest() {
        let (publisher, stream) = create_event_bridge(2);
        publisher.try_publish(code("01"), "01").unwrap();
        publisher.try_publish(code("02"), "02").unwrap();

        let err = publisher.try_publish(code("03"), "03").unwrap_err();
        assert!(matches!(err, crate::Error::QueueFull { capacity: 2 }));
        assert_eq!(stream.dropped(), 1);

        let events = stream.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].raw, "02");

        // The rejected event consumed a sequence number
        let next = publisher.try_publish(code("04"), "04").unwrap();
        assert_eq!(next, 3);
    }

    #[test]
    fn test_publish_after_stream_dropped() {
        let (publisher, stream) = create_event_bridge(2);
        drop(stream);

        assert!(publisher.is_closed());
        let err = publisher.try_publish(code("01"), "01").unwrap_err();
        assert!(matches!(err, crate::Error::Channel(_)));
        assert_eq!(publisher.dropped(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (publisher, stream) = create_event_bridge(0);
        publisher.try_publish(code("01"), "01").unwrap();
        assert_eq!(stream.len(), 1);
    }
}
