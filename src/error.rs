//! Error types for NSP operations.

use thiserror::Error;

use crate::fixed_point::QFormat;
use crate::packet::{Command, ParseError};
use crate::slip::FramingError;

/// Result type alias for NSP operations.
pub type Result<T> = std::result::Result<T, NspError>;

/// Error types for NSP bus communication.
#[derive(Error, Debug)]
pub enum NspError {
    /// Serial port communication error
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed byte-stuffed sequence
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// Frame could not be parsed into a packet
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// No accepted reply within all attempts
    #[error("Timeout waiting for reply to {command:?} after {attempts} attempts")]
    Timeout {
        /// Command that went unanswered
        command: Command,
        /// Attempts made, including the first
        attempts: u32,
    },

    /// Device rejected the request on every attempt
    #[error("NACK for {command:?} after {attempts} attempts: {}", hex::encode(payload))]
    Nack {
        /// Rejected command
        command: Command,
        /// Payload of the last NACK reply
        payload: Vec<u8>,
        /// Attempts made, including the first
        attempts: u32,
    },

    /// Telemetry block identifier is not registered
    #[error("Unknown telemetry block: {0:#04x}")]
    UnknownBlock(u8),

    /// Telemetry buffer shorter than the block layout
    #[error("Telemetry block {block:#04x} requires {expected} bytes, got {actual}")]
    Length {
        /// Block identifier
        block: u8,
        /// Fixed block length
        expected: usize,
        /// Bytes supplied
        actual: usize,
    },

    /// Block identifier registered twice
    #[error("Telemetry block {0:#04x} already registered")]
    DuplicateBlock(u8),

    /// Field spec does not fit inside its block
    #[error("Field {name} at offset {offset} does not fit in a {length}-byte block")]
    InvalidField {
        /// Field name
        name: &'static str,
        /// Field offset
        offset: usize,
        /// Block length
        length: usize,
    },

    /// Fixed-point field wider than 32 bits or zero bits wide
    #[error("Field {name} uses unsupported fixed-point format {format}")]
    UnsupportedFormat {
        /// Field name
        name: &'static str,
        /// Offending format
        format: QFormat,
    },

    /// Destination is neither a device address nor broadcast
    #[error("Invalid destination address: {0:#04x}")]
    InvalidAddress(u8),

    /// Payload exceeds the protocol cap
    #[error("Payload too long: {length} bytes (max {max})")]
    PayloadTooLong {
        /// Length of the payload
        length: usize,
        /// Protocol maximum
        max: usize,
    },

    /// Payload length does not fit the command's request shape
    #[error("Payload of {length} bytes does not match {command:?} request shape")]
    PayloadShape {
        /// Command being built
        command: Command,
        /// Length of the payload
        length: usize,
    },

    /// Accepted reply carried a payload the operation cannot interpret
    #[error("Unexpected reply to {command:?}: {}", hex::encode(payload))]
    UnexpectedReply {
        /// Command that was answered
        command: Command,
        /// Reply payload
        payload: Vec<u8>,
    },

    /// Transaction aborted through its cancel token
    #[error("Transaction cancelled")]
    Cancelled,

    /// Caller deadline passed before a reply was accepted
    #[error("Caller deadline exceeded")]
    DeadlineExceeded,
}

impl NspError {
    /// Retryable link-level failure: the device was not heard from.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            NspError::Timeout { .. }
                | NspError::DeadlineExceeded
                | NspError::Io(_)
                | NspError::SerialPort(_)
        )
    }

    /// The device answered and refused the request, e.g. because of a latched fault.
    pub fn is_device_rejection(&self) -> bool {
        matches!(self, NspError::Nack { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinguishable() {
        let timeout = NspError::Timeout {
            command: Command::Ping,
            attempts: 3,
        };
        let nack = NspError::Nack {
            command: Command::ClearFault,
            payload: vec![0x01],
            attempts: 3,
        };

        assert!(timeout.is_link_failure());
        assert!(!timeout.is_device_rejection());
        assert!(nack.is_device_rejection());
        assert!(!nack.is_link_failure());
        assert_eq!(
            nack.to_string(),
            "NACK for ClearFault after 3 attempts: 01"
        );
    }
}
