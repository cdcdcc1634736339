//! # NSP Host Library
//!
//! Host side of the NSP command/telemetry protocol spoken by reaction wheel
//! motor controllers over a SLIP-framed, half-duplex RS-485 bus.
//!
//! ## Features
//!
//! - SLIP framing with a restartable decoder for partial reads
//! - CRC-16/CCITT checked packets with POLL/SEQ/ACK control bits
//! - Signed and unsigned fixed-point (Q-format) setpoints and telemetry
//! - Telemetry block registry with named fields
//! - Request/reply transactions with retry, timeout and dual-link failover
//! - Per-session statistics and an optional frame log
//!
//! ## Example
//!
//! ```no_run
//! use nsp_host::{ControlMode, Session, SessionConfig, TelemetryBlock};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut wheel = Session::open("/dev/ttyUSB0", SessionConfig::default())?;
//!     wheel.ping()?;
//!     wheel.app_command(ControlMode::Speed, 1500.0)?;
//!     let standard = wheel.app_telemetry(TelemetryBlock::Standard)?;
//!     println!("speed: {:?} rpm", standard.real("speed"));
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod constants;
pub mod crc;
pub mod error;
pub mod fixed_point;
pub mod packet;
pub mod protocol;
pub mod slip;
pub mod telemetry;
pub mod transport;
pub mod types;

pub use config::SessionConfig;
pub use error::{NspError, Result};
pub use fixed_point::QFormat;
pub use packet::{Command, Control, Packet};
pub use protocol::Session;
pub use telemetry::{registry, TelemetryBlock, TelemetryRecord};
pub use transport::{SerialTransport, Transport};
pub use types::*;
