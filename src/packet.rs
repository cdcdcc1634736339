//! NSP packet model.
//!
//! Wire layout (before SLIP framing):
//!
//! ```text
//! ┌──────┬──────┬─────────┬──────────────┬────────┬────────┐
//! │ dest │ src  │ control │ payload      │ crc_lo │ crc_hi │
//! │ 1B   │ 1B   │ 1B      │ 0..=32 B     │ 1B     │ 1B     │
//! └──────┴──────┴─────────┴──────────────┴────────┴────────┘
//!
//! control: bit 7 POLL │ bit 6 SEQ │ bit 5 ACK │ bits 4-0 command
//! ```
//!
//! Multi-byte payload fields are little-endian.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    ACK_BIT, BROADCAST, CMD_MASK, HEADER_LEN, MAX_DEVICE_ADDRESS, MAX_PACKET, MAX_PAYLOAD,
    MIN_PACKET, POLL_BIT, SEQ_BIT,
};
use crate::error::{NspError, Result};

/// Why a received frame is not a packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("frame too short: {length} bytes")]
    TooShort { length: usize },

    #[error("bad checksum: computed {computed:#06x}, received {received:#06x}")]
    BadChecksum { computed: u16, received: u16 },

    #[error("invalid command code {0:#04x}")]
    InvalidCommandCode(u8),

    #[error("{length}-byte payload does not fit {command:?}")]
    PayloadLengthMismatch { command: Command, length: usize },
}

/// Command codes (control byte bits 4-0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    Ping = 0x00,
    Peek = 0x02,
    Poke = 0x03,
    AppTelemetry = 0x07,
    AppCommand = 0x08,
    ClearFault = 0x09,
    ConfigureProtection = 0x0A,
    TripLcl = 0x0B,
}

/// Allowed payload lengths for one direction of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    Fixed(usize),
    UpTo(usize),
}

impl PayloadShape {
    pub fn accepts(&self, length: usize) -> bool {
        match *self {
            PayloadShape::Fixed(n) => length == n,
            PayloadShape::UpTo(max) => length <= max,
        }
    }
}

impl Command {
    pub const ALL: [Command; 8] = [
        Command::Ping,
        Command::Peek,
        Command::Poke,
        Command::AppTelemetry,
        Command::AppCommand,
        Command::ClearFault,
        Command::ConfigureProtection,
        Command::TripLcl,
    ];

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Request payload: PEEK address, POKE address + u32, APP_* id/mode + value, masks.
    pub fn request_shape(self) -> PayloadShape {
        match self {
            Command::Ping | Command::TripLcl => PayloadShape::Fixed(0),
            Command::Peek | Command::AppTelemetry => PayloadShape::Fixed(1),
            Command::ClearFault | Command::ConfigureProtection => PayloadShape::Fixed(4),
            Command::Poke | Command::AppCommand => PayloadShape::Fixed(5),
        }
    }

    /// Payload of an acknowledged reply.
    pub fn reply_shape(self) -> PayloadShape {
        match self {
            Command::Peek => PayloadShape::Fixed(4),
            Command::AppTelemetry => PayloadShape::UpTo(MAX_PAYLOAD),
            _ => PayloadShape::Fixed(0),
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = ParseError;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        Self::from_code(code).ok_or(ParseError::InvalidCommandCode(code))
    }
}

/// Decoded control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Control {
    /// Set on requests, clear on replies
    pub poll: bool,
    pub seq: bool,
    /// Set by the device when it accepted the request
    pub ack: bool,
    pub command: Command,
}

impl Control {
    pub fn request(command: Command, seq: bool) -> Self {
        Self {
            poll: true,
            seq,
            ack: false,
            command,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut byte = self.command.code() & CMD_MASK;
        if self.poll {
            byte |= POLL_BIT;
        }
        if self.seq {
            byte |= SEQ_BIT;
        }
        if self.ack {
            byte |= ACK_BIT;
        }
        byte
    }

    pub fn from_byte(byte: u8) -> std::result::Result<Self, ParseError> {
        Ok(Self {
            poll: byte & POLL_BIT != 0,
            seq: byte & SEQ_BIT != 0,
            ack: byte & ACK_BIT != 0,
            command: Command::try_from(byte & CMD_MASK)?,
        })
    }

    /// Reply with ACK clear.
    #[inline]
    pub fn is_nack(&self) -> bool {
        !self.poll && !self.ack
    }
}

/// One NSP packet. The checksum is derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub destination: u8,
    pub source: u8,
    pub control: Control,
    pub payload: Vec<u8>,
}

/// Device address or broadcast.
pub fn is_valid_destination(address: u8) -> bool {
    address <= MAX_DEVICE_ADDRESS || address == BROADCAST
}

impl Packet {
    /// Build a request (POLL=1, ACK=0) after checking address and payload shape.
    pub fn request(
        destination: u8,
        source: u8,
        command: Command,
        seq: bool,
        payload: &[u8],
    ) -> Result<Self> {
        if !is_valid_destination(destination) {
            return Err(NspError::InvalidAddress(destination));
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(NspError::PayloadTooLong {
                length: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        if !command.request_shape().accepts(payload.len()) {
            return Err(NspError::PayloadShape {
                command,
                length: payload.len(),
            });
        }

        Ok(Self {
            destination,
            source,
            control: Control::request(command, seq),
            payload: payload.to_vec(),
        })
    }

    /// The device-side answer to this request: addresses swapped, SEQ echoed.
    pub fn reply(&self, ack: bool, payload: &[u8]) -> Self {
        Self {
            destination: self.source,
            source: self.destination,
            control: Control {
                poll: false,
                seq: self.control.seq,
                ack,
                command: self.control.command,
            },
            payload: payload.to_vec(),
        }
    }

    #[inline]
    pub fn command(&self) -> Command {
        self.control.command
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST
    }

    fn header(&self) -> [u8; HEADER_LEN] {
        [self.destination, self.source, self.control.to_byte()]
    }

    /// CRC over destination, source, control and payload.
    pub fn checksum(&self) -> u16 {
        let mut body = Vec::with_capacity(HEADER_LEN + self.payload.len());
        body.extend_from_slice(&self.header());
        body.extend_from_slice(&self.payload);
        crate::crc::compute(&body)
    }

    /// Serialize with trailing checksum (LSB first), ready for SLIP framing.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(MAX_PACKET);
        body.extend_from_slice(&self.header());
        body.extend_from_slice(&self.payload);
        crate::crc::append(&body)
    }

    /// Parse an unframed packet, checking length, checksum, command and shape.
    pub fn parse(raw: &[u8]) -> std::result::Result<Self, ParseError> {
        if raw.len() < MIN_PACKET {
            return Err(ParseError::TooShort { length: raw.len() });
        }

        let (body, received) =
            crate::crc::split(raw).ok_or(ParseError::TooShort { length: raw.len() })?;
        let computed = crate::crc::compute(body);
        if computed != received {
            return Err(ParseError::BadChecksum { computed, received });
        }

        let control = Control::from_byte(body[2])?;
        let payload = &body[HEADER_LEN..];

        let shape = if control.poll {
            control.command.request_shape()
        } else if control.ack {
            control.command.reply_shape()
        } else {
            // NACK replies may carry a reason
            PayloadShape::UpTo(MAX_PAYLOAD)
        };
        if payload.len() > MAX_PAYLOAD || !shape.accepts(payload.len()) {
            return Err(ParseError::PayloadLengthMismatch {
                command: control.command,
                length: payload.len(),
            });
        }

        Ok(Self {
            destination: body[0],
            source: body[1],
            control,
            payload: payload.to_vec(),
        })
    }

    /// Whether `reply` answers this request.
    ///
    /// SEQ is deliberately not compared; callers may note a mismatch.
    pub fn accepts_reply(&self, reply: &Packet) -> bool {
        reply.source == self.destination
            && reply.destination == self.source
            && reply.control.command == self.control.command
            && !reply.control.poll
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let kind = match (self.control.poll, self.control.ack) {
            (true, _) => "REQ",
            (false, true) => "ACK",
            (false, false) => "NACK",
        };
        write!(
            f,
            "{:#04x}->{:#04x} {:?} {} seq={} [{}]",
            self.source,
            self.destination,
            self.control.command,
            kind,
            self.control.seq as u8,
            hex::encode(&self.payload)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes() {
        assert_eq!(Command::Ping.code(), 0x00);
        assert_eq!(Command::Peek.code(), 0x02);
        assert_eq!(Command::Poke.code(), 0x03);
        assert_eq!(Command::AppTelemetry.code(), 0x07);
        assert_eq!(Command::AppCommand.code(), 0x08);
        assert_eq!(Command::ClearFault.code(), 0x09);
        assert_eq!(Command::ConfigureProtection.code(), 0x0A);
        assert_eq!(Command::TripLcl.code(), 0x0B);
        assert_eq!(Command::from_code(0x01), None);
        assert_eq!(Command::try_from(0x1F), Err(ParseError::InvalidCommandCode(0x1F)));
    }

    #[test]
    fn control_byte_layout() {
        let control = Control::request(Command::Peek, true);
        assert_eq!(control.to_byte(), 0xC2);

        let ack = Control::from_byte(0x22).unwrap();
        assert!(!ack.poll && !ack.seq && ack.ack);
        assert_eq!(ack.command, Command::Peek);
        assert!(!ack.is_nack());

        let nack = Control::from_byte(0x49).unwrap();
        assert!(nack.seq && nack.is_nack());
        assert_eq!(nack.command, Command::ClearFault);
    }

    #[test]
    fn ping_request_wire_bytes() {
        let ping = Packet::request(0x07, 0x11, Command::Ping, false, &[]).unwrap();
        assert_eq!(ping.to_bytes(), vec![0x07, 0x11, 0x80, 0xC6, 0xE8]);
        assert_eq!(ping.checksum(), 0xE8C6);
    }

    #[test]
    fn request_validation() {
        assert!(matches!(
            Packet::request(0x08, 0x11, Command::Ping, false, &[]),
            Err(NspError::InvalidAddress(0x08))
        ));
        assert!(Packet::request(BROADCAST, 0x11, Command::Ping, false, &[]).is_ok());
        assert!(matches!(
            Packet::request(0x01, 0x11, Command::Peek, false, &[]),
            Err(NspError::PayloadShape { command: Command::Peek, length: 0 })
        ));
        assert!(matches!(
            Packet::request(0x01, 0x11, Command::Poke, false, &[0; 33]),
            Err(NspError::PayloadTooLong { length: 33, max: 32 })
        ));
    }

    #[test]
    fn parse_round_trips_request() {
        let poke = Packet::request(0x02, 0x11, Command::Poke, true, &[0x07, 0x78, 0x56, 0x34, 0x12]).unwrap();
        assert_eq!(Packet::parse(&poke.to_bytes()), Ok(poke));
    }

    #[test]
    fn parse_failures() {
        assert_eq!(
            Packet::parse(&[0x11, 0x07, 0x20, 0x00]),
            Err(ParseError::TooShort { length: 4 })
        );

        let mut corrupted = Packet::request(0x07, 0x11, Command::Ping, false, &[]).unwrap().to_bytes();
        corrupted[1] ^= 0x01;
        assert!(matches!(Packet::parse(&corrupted), Err(ParseError::BadChecksum { .. })));

        let bad_cmd = crate::crc::append(&[0x11, 0x07, 0x21]);
        assert_eq!(Packet::parse(&bad_cmd), Err(ParseError::InvalidCommandCode(0x01)));

        // PEEK acknowledgements carry exactly four bytes
        let short_peek = crate::crc::append(&[0x11, 0x07, 0x22, 0x01, 0x02]);
        assert_eq!(
            Packet::parse(&short_peek),
            Err(ParseError::PayloadLengthMismatch { command: Command::Peek, length: 2 })
        );
    }

    #[test]
    fn nack_payload_is_free_form() {
        let request = Packet::request(0x07, 0x11, Command::ClearFault, false, &[0xFF; 4]).unwrap();
        let nack = request.reply(false, &[0x05]);
        let parsed = Packet::parse(&nack.to_bytes()).unwrap();
        assert!(parsed.control.is_nack());
        assert_eq!(parsed.payload, vec![0x05]);
    }

    #[test]
    fn reply_acceptance() {
        let request = Packet::request(0x03, 0x11, Command::Peek, true, &[0x00]).unwrap();
        let reply = request.reply(true, &[1, 2, 3, 4]);
        assert!(request.accepts_reply(&reply));

        let mut other_device = reply.clone();
        other_device.source = 0x04;
        assert!(!request.accepts_reply(&other_device));

        let mut other_host = reply.clone();
        other_host.destination = 0x12;
        assert!(!request.accepts_reply(&other_host));

        let mut other_command = reply.clone();
        other_command.control.command = Command::Ping;
        assert!(!request.accepts_reply(&other_command));

        // another host's request on a shared bus
        let echo = request.clone();
        assert!(!request.accepts_reply(&echo));

        // sequence bit is advisory
        let mut stale_seq = reply;
        stale_seq.control.seq = false;
        assert!(request.accepts_reply(&stale_seq));
    }
}
