//! Telemetry Polling Example
//!
//! Connects to one reaction wheel controller, checks it answers, commands a
//! wheel speed and prints every telemetry block a few times.
//!
//! Usage:
//!   cargo run --example poll_telemetry                  # Interactive mode
//!   cargo run --example poll_telemetry -- /dev/ttyUSB0
//!   cargo run --example poll_telemetry -- /dev/ttyUSB0 /dev/ttyUSB1   # Redundant links
//!
//! Set RUST_LOG to control logging:
//!   RUST_LOG=nsp_host=debug cargo run --example poll_telemetry

use std::thread;
use std::time::Duration;

use inquire::Select;
use nsp_host::constants::fault;
use nsp_host::{ControlMode, Result, SerialTransport, Session, SessionConfig, TelemetryBlock};
use tracing::info;
use tracing_subscriber::EnvFilter;

const BLOCKS: [TelemetryBlock; 5] = [
    TelemetryBlock::Standard,
    TelemetryBlock::Temperatures,
    TelemetryBlock::Voltages,
    TelemetryBlock::Currents,
    TelemetryBlock::DiagnosticsGeneral,
];

/// Interactive serial port selection using inquire
fn select_port() -> Result<String> {
    let ports = SerialTransport::list_ports()?;

    if ports.is_empty() {
        eprintln!("No serial ports found!");
        std::process::exit(1);
    }

    let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

    let selection = Select::new("Select a serial port:", port_names)
        .prompt()
        .map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Selection cancelled: {}", e),
            )
        })?;

    Ok(selection)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let primary = args.next().map(Ok).unwrap_or_else(select_port)?;
    let alternate = args.next();

    let config = SessionConfig::default();
    let mut wheel = match &alternate {
        Some(alternate) => Session::open_redundant(&primary, alternate, config)?,
        None => Session::open(&primary, config)?,
    };

    info!("=== Connecting ===");
    wheel.ping()?;
    info!("serial number {:#010x}", wheel.serial_number()?);
    info!("overspeed fault threshold {} rpm", wheel.overspeed_fault_threshold()?);

    wheel.clear_fault(fault::ALL)?;
    wheel.app_command(ControlMode::Speed, 1000.0)?;

    info!("=== Polling Telemetry ===");
    for _ in 0..3 {
        for block in BLOCKS {
            let record = wheel.app_telemetry(block)?;
            let fields: Vec<String> = record
                .fields
                .iter()
                .map(|(name, value)| format!("{}={}", name, value.as_f64()))
                .collect();
            info!("{}: {}", record.name, fields.join(" "));
        }
        thread::sleep(Duration::from_millis(500));
    }

    wheel.app_command(ControlMode::Idle, 0.0)?;

    info!(
        "=== Done === {}",
        serde_json::to_string(wheel.stats()).unwrap_or_default()
    );
    Ok(())
}
