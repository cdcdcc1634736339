use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::packet::{Command, Packet};

/// Application control modes. The values are flags, not an ordinal scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ControlMode {
    Idle = 0x00,
    Current = 0x01,
    Speed = 0x02,
    Torque = 0x04,
    Pwm = 0x08,
}

impl ControlMode {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(ControlMode::Idle),
            0x01 => Some(ControlMode::Current),
            0x02 => Some(ControlMode::Speed),
            0x04 => Some(ControlMode::Torque),
            0x08 => Some(ControlMode::Pwm),
            _ => None,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "IDLE" => Some(ControlMode::Idle),
            "CURRENT" => Some(ControlMode::Current),
            "SPEED" => Some(ControlMode::Speed),
            "TORQUE" => Some(ControlMode::Torque),
            "PWM" => Some(ControlMode::Pwm),
            _ => None,
        }
    }
}

/// Decoded telemetry field value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Unsigned(u64),
    Signed(i64),
    Real(f64),
}

impl FieldValue {
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            FieldValue::Unsigned(v) => Some(v),
            FieldValue::Signed(v) => u64::try_from(v).ok(),
            FieldValue::Real(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            FieldValue::Unsigned(v) => i64::try_from(v).ok(),
            FieldValue::Signed(v) => Some(v),
            FieldValue::Real(_) => None,
        }
    }

    /// Numeric value in engineering units.
    pub fn as_f64(&self) -> f64 {
        match *self {
            FieldValue::Unsigned(v) => v as f64,
            FieldValue::Signed(v) => v as f64,
            FieldValue::Real(v) => v,
        }
    }
}

/// Per-session counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub frames_tx: u64,
    pub frames_rx: u64,
    pub crc_errors: u64,
    pub framing_errors: u64,
    pub parse_errors: u64,
    /// Valid packets on the bus that did not answer our request
    pub unmatched_replies: u64,
    pub seq_mismatches: u64,
    pub timeouts: u64,
    pub nacks: u64,
    pub retries: u64,
    pub transactions_ok: u64,
    pub transactions_failed: u64,
    pub failovers: u64,
    pub active_link: usize,
}

/// Outcome of one successful request/reply exchange
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub command: Command,
    pub destination: u8,
    /// Attempts made, including the first
    pub attempts: u32,
    pub retries: u32,
    pub elapsed: Duration,
    /// Link the accepted reply arrived on
    pub link: usize,
    /// `None` for broadcasts, which are never answered
    pub reply: Option<Packet>,
}

impl Transaction {
    pub fn payload(&self) -> &[u8] {
        self.reply.as_ref().map(|p| p.payload.as_slice()).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Tx,
    Rx,
}

/// One frame as seen on the wire, for external logging and replay
#[derive(Debug, Clone, Serialize)]
pub struct FrameRecord {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub link: usize,
    /// Unframed bytes, checksum included
    #[serde(with = "hex_bytes")]
    pub raw: Vec<u8>,
    /// `None` if the frame did not parse
    pub packet: Option<Packet>,
}

/// Sink for [`FrameRecord`]s; persistence is up to the implementor.
pub trait FrameLog: Send {
    fn record(&mut self, record: &FrameRecord);
}

impl<F> FrameLog for F
where
    F: FnMut(&FrameRecord) + Send,
{
    fn record(&mut self, record: &FrameRecord) {
        self(record)
    }
}

/// Shared flag aborting a transaction at its next suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm after a cancellation has been handled.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

mod hex_bytes {
    use serde::Serializer;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }
}
