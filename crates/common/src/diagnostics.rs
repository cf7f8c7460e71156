//! Diagnostic log file
//!
//! An append-only, timestamped text record of lifecycle events (device search,
//! driver load, configuration, callback registration, shutdown, errors). The
//! file is truncated when the log is created, so it only ever describes the
//! current run.
//!
//! Entries are handed to a dedicated writer thread through an unbounded
//! channel. Code running on the driver's receive thread can record decode
//! failures without doing any file I/O itself.
//!
//! ```text
//! 2026-10-19T08:15:02.114Z: [device] Detected device USB-UIRT (serial=A6XQ1B0)
//! ```

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Category of a diagnostic entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lifecycle,
    Device,
    Driver,
    Config,
    Callback,
    Decode,
    Error,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::Lifecycle => "lifecycle",
            DiagnosticKind::Device => "device",
            DiagnosticKind::Driver => "driver",
            DiagnosticKind::Config => "config",
            DiagnosticKind::Callback => "callback",
            DiagnosticKind::Decode => "decode",
            DiagnosticKind::Error => "error",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity, used to mirror entries into tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// A single log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub timestamp: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl DiagnosticEntry {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: format_timestamp(SystemTime::now()),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for DiagnosticEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: [{}] {}", self.timestamp, self.kind, self.message)
    }
}

/// Message sent to the writer thread
enum DiagnosticMessage {
    Log(DiagnosticEntry),
    Shutdown,
}

/// Handle to the diagnostic log
///
/// Cheap to clone; every clone feeds the same writer thread.
#[derive(Clone)]
pub struct DiagnosticLog {
    sender: Option<mpsc::UnboundedSender<DiagnosticMessage>>,
    writer: Arc<Mutex<Option<JoinHandle<()>>>>,
    path: Option<PathBuf>,
}

impl DiagnosticLog {
    /// Create (or truncate) the log file and start the writer thread
    pub fn create(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        let mut writer = BufWriter::new(file);
        writeln!(
            writer,
            "{}",
            DiagnosticEntry::new(DiagnosticKind::Lifecycle, "Log file initialized")
        )?;
        writer.flush()?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = std::thread::Builder::new()
            .name("diagnostic-log".to_string())
            .spawn(move || run_writer(writer, receiver))?;

        debug!("Diagnostic log initialized at {}", path.display());

        Ok(Self {
            sender: Some(sender),
            writer: Arc::new(Mutex::new(Some(handle))),
            path: Some(path),
        })
    }

    /// A log that only mirrors entries into tracing
    pub fn disabled() -> Self {
        Self {
            sender: None,
            writer: Arc::new(Mutex::new(None)),
            path: None,
        }
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record an entry at the given severity
    pub fn record(&self, severity: Severity, kind: DiagnosticKind, message: impl Into<String>) {
        let entry = DiagnosticEntry::new(kind, message);

        match severity {
            Severity::Info => info!("[{}] {}", entry.kind, entry.message),
            Severity::Warn => warn!("[{}] {}", entry.kind, entry.message),
            Severity::Error => error!("[{}] {}", entry.kind, entry.message),
        }

        if let Some(sender) = &self.sender {
            // Send only fails after shutdown; late entries are still in tracing
            let _ = sender.send(DiagnosticMessage::Log(entry));
        }
    }

    pub fn info(&self, kind: DiagnosticKind, message: impl Into<String>) {
        self.record(Severity::Info, kind, message);
    }

    pub fn warn(&self, kind: DiagnosticKind, message: impl Into<String>) {
        self.record(Severity::Warn, kind, message);
    }

    pub fn error(&self, kind: DiagnosticKind, message: impl Into<String>) {
        self.record(Severity::Error, kind, message);
    }

    /// Flush pending entries and stop the writer thread
    ///
    /// Safe to call more than once and from any clone.
    pub fn shutdown(&self) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(DiagnosticMessage::Shutdown);
        }

        let handle = match self.writer.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!("Diagnostic log writer panicked");
        }
    }
}

fn run_writer(
    mut writer: BufWriter<File>,
    mut receiver: mpsc::UnboundedReceiver<DiagnosticMessage>,
) {
    while let Some(message) = receiver.blocking_recv() {
        match message {
            DiagnosticMessage::Log(entry) => {
                if let Err(e) = writeln!(writer, "{}", entry).and_then(|_| writer.flush()) {
                    warn!("Failed to write diagnostic entry: {}", e);
                }
            }
            DiagnosticMessage::Shutdown => break,
        }
    }

    if let Err(e) = writer.flush() {
        warn!("Failed to flush diagnostic log: {}", e);
    }
}

/// Format a timestamp as ISO 8601 UTC with millisecond precision
pub fn format_timestamp(time: SystemTime) -> String {
    let since_epoch = time
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = since_epoch.as_secs();
    let millis = since_epoch.subsec_millis();

    const SECONDS_PER_DAY: u64 = 86400;
    const SECONDS_PER_HOUR: u64 = 3600;
    const SECONDS_PER_MINUTE: u64 = 60;

    let days = secs / SECONDS_PER_DAY;
    let remaining = secs % SECONDS_PER_DAY;
    let hours = remaining / SECONDS_PER_HOUR;
    let remaining = remaining % SECONDS_PER_HOUR;
    let minutes = remaining / SECONDS_PER_MINUTE;
    let seconds = remaining % SECONDS_PER_MINUTE;

    let (year, month, day) = days_to_ymd(days);

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        year, month, day, hours, minutes, seconds, millis
    )
}

/// Convert days since Unix epoch to year, month, day
fn days_to_ymd(days: u64) -> (u32, u32, u32) {
    let mut remaining_days = days as i64;
    let mut year = 1970i32;

    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining_days < days_in_year {
            break;
        }
        remaining_days -= days_in_year;
        year += 1;
    }

    let days_in_months: [i64; 12] = if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 1u32;
    for &days_in_month in &days_in_months {
        if remaining_days < days_in_month {
            break;
        }
        remaining_days -= days_in_month;
        month += 1;
    }

    (year as u32, month, (remaining_days + 1) as u32)
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}
