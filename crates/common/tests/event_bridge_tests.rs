//! Integration tests for the notification bridge
//!
//! Exercises the bridge the way the receiver uses it: a driver-owned thread
//! publishes without blocking while a Tokio task consumes.

use common::test_utils::{DEFAULT_TEST_TIMEOUT, SAMPLE_UIR_CODES, with_timeout};
use common::{Error, create_event_bridge};
use protocol::IrCode;
use std::time::Duration;

#[tokio::test]
async fn test_thread_to_async_delivery_in_order() {
    let (publisher, stream) = create_event_bridge(16);

    let producer = std::thread::spawn(move || {
        for text in SAMPLE_UIR_CODES {
            publisher
                .try_publish(IrCode::parse(text).unwrap(), text)
                .unwrap();
        }
    });
    producer.join().unwrap();

    for (expected_seq, text) in SAMPLE_UIR_CODES.iter().enumerate() {
        let event = with_timeout(DEFAULT_TEST_TIMEOUT, stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.sequence, expected_seq as u64);
        assert_eq!(event.code.as_str(), *text);
    }
}

#[test]
fn test_slow_consumer_never_blocks_publisher() {
    let (publisher, stream) = create_event_bridge(4);
    let code = IrCode::parse(SAMPLE_UIR_CODES[0]).unwrap();

    let started = std::time::Instant::now();
    let results: Vec<_> = (0..100)
        .map(|_| publisher.try_publish(code.clone(), SAMPLE_UIR_CODES[0]))
        .collect();

    // A blocking send would hang here forever; rejection must be immediate
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 4);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, Error::QueueFull { .. }))
    );
    assert_eq!(stream.dropped(), 96);
}

#[tokio::test]
async fn test_recv_fails_once_publishers_are_gone() {
    let (publisher, stream) = create_event_bridge(4);
    publisher
        .try_publish(IrCode::parse("0102").unwrap(), "0102")
        .unwrap();
    drop(publisher);

    // Queued events are still delivered before the stream reports closure
    assert!(stream.recv().await.is_ok());
    assert!(matches!(stream.recv().await, Err(Error::Channel(_))));
}
