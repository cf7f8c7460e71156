//! Sample code feeder for `--simulate`
//!
//! Replays a fixed set of codes into a simulated transceiver the way a remote
//! produces them: each button press repeats its code a few times.

use driver::simulated::SimulatedDriver;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

const DEMO_CODES: [&str; 4] = [
    "110F3A6C59E0",
    "110F3A6C5A1F",
    "22B8C0047D33",
    "22B8C0047E0C",
];

/// Repeats per simulated button press
const REPEATS: usize = 3;
const REPEAT_INTERVAL: Duration = Duration::from_millis(110);
const PRESS_INTERVAL: Duration = Duration::from_millis(1500);

/// Granularity of the stop check while idle
const TICK: Duration = Duration::from_millis(50);

pub struct SampleFeeder {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SampleFeeder {
    pub fn start(driver: Arc<SimulatedDriver>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        let thread = std::thread::Builder::new()
            .name("ir-simulator".to_string())
            .spawn(move || feed(driver, thread_running));

        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(e) => {
                warn!("Failed to start IR simulator: {}", e);
                None
            }
        };

        Self { running, thread }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("IR simulator thread panicked");
        }
    }
}

impl Drop for SampleFeeder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn feed(driver: Arc<SimulatedDriver>, running: Arc<AtomicBool>) {
    for code in DEMO_CODES.iter().cycle() {
        if !pause(PRESS_INTERVAL, &running) {
            break;
        }
        debug!("Simulating button press {}", code);
        for _ in 0..REPEATS {
            driver.deliver_text(code);
            // Idle tick between repeats, as the hardware reader produces
            driver.deliver(None);
            if !pause(REPEAT_INTERVAL, &running) {
                return;
            }
        }
    }
}

/// Sleep for `duration` unless stopped; returns whether still running
fn pause(duration: Duration, running: &AtomicBool) -> bool {
    let mut slept = Duration::ZERO;
    while slept < duration {
        if !running.load(Ordering::Acquire) {
            return false;
        }
        std::thread::sleep(TICK);
        slept += TICK;
    }
    running.load(Ordering::Acquire)
}
