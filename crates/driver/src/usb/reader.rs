//! Background receive reader
//!
//! Polls the bulk IN endpoint on a dedicated thread, reassembles UIR codes and
//! hands each one to the registered sink as hex text. The thread is the only
//! caller of the sink, so invocations never overlap. Stopping the reader joins
//! the thread, which means no callback is running once `stop` returns.

use super::device::UirtDevice;
use crate::backend::EventSink;
use crate::error::DriverError;
use protocol::UirFramer;
use protocol::ftdi::strip_status_headers;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Bulk IN poll timeout; bounds how long `stop` waits
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Back-off after an unexpected read error
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub struct ReceiveReader {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReceiveReader {
    pub fn spawn(device: Arc<UirtDevice>, sink: Arc<dyn EventSink>) -> Result<Self, DriverError> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let thread_name = format!("uirt-rx-{}", device.name());

        let thread = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || run(device, sink, thread_running))?;

        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    /// False once stopped or once the thread has exited on its own
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop polling and wait for the thread to exit
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Receive reader thread panicked");
        }
    }
}

impl Drop for ReceiveReader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(device: Arc<UirtDevice>, sink: Arc<dyn EventSink>, running: Arc<AtomicBool>) {
    info!("Receive reader for {} started", device.name());

    let mut framer = UirFramer::new();
    let mut buf = device.read_buffer();
    let max_packet = device.max_packet_size();

    while running.load(Ordering::Acquire) {
        match device.read_raw(&mut buf, POLL_TIMEOUT) {
            Ok(n) => {
                let data = strip_status_headers(&buf[..n], max_packet);
                if data.is_empty() {
                    continue;
                }
                trace!("Read {} byte(s) from {}", data.len(), device.name());
                for code in framer.push(&data, Instant::now()) {
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    sink.on_receive(Some(code.as_str().as_bytes()));
                }
            }
            Err(rusb::Error::Timeout) => {}
            Err(rusb::Error::Interrupted) => {
                debug!("Bulk read interrupted");
            }
            Err(rusb::Error::NoDevice) => {
                warn!("{} disconnected; receive reader exiting", device.name());
                break;
            }
            Err(e) => {
                warn!("Error reading from {}: {}", device.name(), e);
                // Bytes after a failed read cannot continue the partial frame
                framer.reset();
                std::thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    if framer.discarded() > 0 {
        debug!(
            "{}: {} partial frame(s) discarded on resync",
            device.name(),
            framer.discarded()
        );
    }
    info!("Receive reader for {} stopped", device.name());
}
