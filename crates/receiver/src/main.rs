//! uirt-receiver
//!
//! Listens on a USB-UIRT infrared transceiver and prints every decoded IR
//! code. Setup runs in a fixed order (locate device, load driver, open and
//! configure the session, arm the receive callback) and every step is
//! recorded in a diagnostic log file that is reset at startup.

mod config;
mod simulate;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{
    DiagnosticKind, DiagnosticLog, EventStream, create_event_bridge, format_timestamp,
    setup_logging,
};
use config::ReceiverConfig;
use driver::simulated::{SimulatedBus, SimulatedDriver};
use driver::{
    DeviceDescriptor, DeviceLocator, DeviceSource, IrDriver, SessionManager, SetupError,
    UsbIrDriver,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long the consumer gets to print queued codes after shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "uirt-receiver")]
#[command(author, version, about = "Print IR codes received by a USB-UIRT transceiver")]
#[command(long_about = "
Listens on a USB-UIRT infrared transceiver and prints each decoded IR code
once. Repeats of the same code (a held remote button) are collapsed.

EXAMPLES:
    # Listen on the first transceiver found
    uirt-receiver

    # Listen on the second of two attached transceivers
    uirt-receiver --device USB-UIRT-2

    # List attached transceivers and exit
    uirt-receiver --list-devices

    # Run without hardware, replaying sample codes
    uirt-receiver --simulate --log-level debug

CONFIGURATION:
    The receiver reads its configuration from:
    1. Path specified with --config
    2. ~/.config/uirt-receiver/receiver.toml
    3. Built-in defaults

OUTPUT:
    Decoded codes go to stdout, logs go to stderr. A diagnostic log of the
    setup sequence is written to uuirtlog.txt unless configured otherwise.
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List matching transceivers and exit
    #[arg(long)]
    list_devices: bool,

    /// Use a simulated transceiver instead of USB hardware
    #[arg(long)]
    simulate: bool,

    /// Logical device name to open (e.g. USB-UIRT-2)
    #[arg(short, long, value_name = "NAME")]
    device: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ReceiverConfig::default();
        let path = ReceiverConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        ReceiverConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ReceiverConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("uirt-receiver v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let locator = DeviceLocator::new(config.device.vendor_id()?, config.device.product_id()?)
        .with_retries(config.device.locate_retries, config.device.retry_delay());

    if args.list_devices {
        return list_devices_mode(&locator, args.simulate);
    }

    let log_path = config.logging.diagnostic_log_path();
    let diagnostics = DiagnosticLog::create(&log_path)
        .with_context(|| format!("Failed to create diagnostic log {}", log_path.display()))?;

    let locator = locator.with_diagnostics(diagnostics.clone());
    let result = run_receiver(&args, &config, locator, &diagnostics).await;

    if let Err(e) = &result {
        diagnostics.error(DiagnosticKind::Error, format!("Error: {:#}", e));
    }
    diagnostics.info(DiagnosticKind::Lifecycle, "Shutdown complete");
    diagnostics.shutdown();

    result
}

/// List matching transceivers and exit
fn list_devices_mode(locator: &DeviceLocator, simulate: bool) -> Result<()> {
    let devices = if simulate {
        locator.find_all(&SimulatedBus::with_transceivers(2))
    } else {
        locator.find_all(&rusb::GlobalContext::default())
    };

    if devices.is_empty() {
        println!("No transceivers found.");
        return Ok(());
    }

    println!("Found {} transceiver(s):\n", devices.len());
    for device in devices {
        println!(
            "  {} {:04x}:{:04x}",
            device.name, device.vendor_id, device.product_id
        );
        println!(
            "      Bus {:03} Device {:03}",
            device.bus_number, device.address
        );
        if let Some(serial) = &device.serial_number {
            println!("      Serial: {}", serial);
        }
        println!();
    }
    Ok(())
}

fn locate<S: DeviceSource + ?Sized>(
    locator: &DeviceLocator,
    source: &S,
    name: Option<&str>,
) -> Result<DeviceDescriptor, SetupError> {
    let found = match name {
        Some(name) => locator.find_named(source, name),
        None => locator.find(source),
    };
    Ok(found?)
}

/// Attach the failing setup phase to the error
fn setup_failed(e: SetupError) -> anyhow::Error {
    let phase = e.phase();
    anyhow::Error::new(e).context(format!("Setup failed during {}", phase))
}

async fn run_receiver(
    args: &Args,
    config: &ReceiverConfig,
    locator: DeviceLocator,
    diagnostics: &DiagnosticLog,
) -> Result<()> {
    let name = args.device.as_deref().or(config.device.name.as_deref());

    let (device, driver, simulator): (_, Arc<dyn IrDriver>, _) = if args.simulate {
        let bus = SimulatedBus::with_transceivers(1);
        let device = locate(&locator, &bus, name).map_err(setup_failed)?;
        let backend = Arc::new(SimulatedDriver::new());
        diagnostics.info(DiagnosticKind::Driver, "Simulated driver loaded");
        (device, backend.clone() as Arc<dyn IrDriver>, Some(backend))
    } else {
        let device =
            locate(&locator, &rusb::GlobalContext::default(), name).map_err(setup_failed)?;
        let backend = UsbIrDriver::load().map_err(setup_failed)?;
        diagnostics.info(DiagnosticKind::Driver, "USB driver loaded");
        (device, Arc::new(backend) as Arc<dyn IrDriver>, None)
    };

    let (publisher, stream) = create_event_bridge(config.receiver.queue_capacity);
    let manager = SessionManager::new(driver, diagnostics.clone());
    let mut session = manager
        .open(&device, config.receiver.options(), publisher)
        .map_err(setup_failed)?;

    if let Some(firmware) = session.firmware() {
        info!("{}: {}", device.name, firmware);
    }

    let consumer = spawn_consumer(stream);
    let feeder = simulator.map(simulate::SampleFeeder::start);

    println!(
        "{}: Waiting for IR signals...",
        format_timestamp(SystemTime::now())
    );
    info!("Press Ctrl+C to stop");

    let waited = shutdown_signal().await;
    match &waited {
        Ok(name) => info!("Received {}, shutting down...", name),
        Err(e) => error!("Error waiting for shutdown signal: {}", e),
    }

    if let Some(mut feeder) = feeder {
        feeder.stop();
    }

    session.close();
    let stats = session.decoder().stats();
    // Dropping the session releases the last publisher, which ends the consumer
    drop(session);
    info!(
        "Received {} code(s): {} delivered, {} repeated, {} malformed, {} dropped",
        stats.received, stats.delivered, stats.duplicates, stats.malformed, stats.dropped
    );

    if tokio::time::timeout(DRAIN_TIMEOUT, consumer).await.is_err() {
        warn!("Consumer did not finish in time");
    }

    waited
        .map(|_| ())
        .map_err(|e| anyhow!("Signal handler failed: {}", e))
}

/// Wait for Ctrl+C or, on Unix, SIGTERM
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::SignalKind;

    let mut terminate = signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        result = signal::ctrl_c() => result.map(|()| "Ctrl+C"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    signal::ctrl_c().await.map(|()| "Ctrl+C")
}

/// Print codes off the driver thread
fn spawn_consumer(stream: EventStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_sequence = None;
        while let Ok(event) = stream.recv().await {
            if let Some(last) = last_sequence
                && event.sequence > last + 1
            {
                warn!("{} IR code(s) dropped", event.sequence - last - 1);
            }
            last_sequence = Some(event.sequence);
            println!(
                "{}: IR code: {}",
                format_timestamp(event.received_at),
                event.code
            );
        }
    })
}
