#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use tracing_subscriber::EnvFilter;

use nsp_host::packet::Command;
use nsp_host::slip::{self, SlipDecoder};
use nsp_host::{NspError, Packet, Result, SessionConfig, Transport};

pub const HOST: u8 = 0x11;
pub const DEVICE: u8 = 0x07;

pub fn trace_init() {
    let level_filter = EnvFilter::from_str("debug").unwrap();

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(level_filter)
        .try_init();
}

/// Short reply timeout keeps timeout-heavy tests fast.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        timeout_ms: 5,
        ..SessionConfig::default()
    }
}

/// SLIP-framed wire bytes of `packet`.
pub fn frame(packet: &Packet) -> Vec<u8> {
    slip::encode(&packet.to_bytes())
}

/// Reply the default device would send to the default host.
pub fn reply(command: Command, seq: bool, ack: bool, payload: &[u8]) -> Packet {
    let request = Packet {
        destination: DEVICE,
        source: HOST,
        control: nsp_host::Control::request(command, seq),
        payload: vec![],
    };
    request.reply(ack, payload)
}

fn sleep_until(deadline: Instant) {
    thread::sleep(deadline.saturating_duration_since(Instant::now()));
}

#[derive(Default)]
struct Script {
    attempts: VecDeque<VecDeque<Vec<u8>>>,
    current: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    fail_writes: usize,
}

/// Replays canned bytes: each write starts the next attempt's reads.
///
/// When an attempt's reads run out the transport stays silent, so the
/// session sees a timeout.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Silent transport that never answers
    pub fn silent() -> Self {
        Self::default()
    }

    /// Queue the reads served after the next unscripted write.
    pub fn attempt(self, reads: Vec<Vec<u8>>) -> Self {
        self.script
            .lock()
            .unwrap()
            .attempts
            .push_back(reads.into());
        self
    }

    /// Fail the next `count` writes with an I/O error.
    pub fn failing_writes(self, count: usize) -> Self {
        self.script.lock().unwrap().fail_writes = count;
        self
    }

    /// Everything written so far, one entry per write
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.script.lock().unwrap().writes.clone()
    }

    /// Written requests, decoded
    pub fn requests(&self) -> Vec<Packet> {
        self.writes()
            .iter()
            .flat_map(|w| slip::decode(w))
            .map(|raw| Packet::parse(&raw).unwrap())
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        if script.fail_writes > 0 {
            script.fail_writes -= 1;
            return Err(NspError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "link down",
            )));
        }

        script.writes.push(bytes.to_vec());
        script.current = script.attempts.pop_front().unwrap_or_default();
        Ok(())
    }

    fn read(&mut self, deadline: Instant) -> Result<Option<Vec<u8>>> {
        let next = self.script.lock().unwrap().current.pop_front();
        match next {
            Some(bytes) => Ok(Some(bytes)),
            None => {
                sleep_until(deadline);
                Ok(None)
            }
        }
    }
}

/// Simulated controller: answers requests addressed to it.
#[derive(Debug, Default)]
pub struct Device {
    pub address: u8,
    pub memory: HashMap<u8, u32>,
    pub telemetry: HashMap<u8, Vec<u8>>,
    /// Every request seen on the bus, addressed to this device or not
    pub received: Vec<Packet>,
    pub mode_payload: Option<Vec<u8>>,
    pub cleared_faults: Option<u32>,
    pub protection: Option<u32>,
    pub lcl_tripped: bool,
    /// Reject every request with this reason byte
    pub nack_with: Option<u8>,
}

impl Device {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    fn handle(&mut self, request: &Packet) -> Option<Packet> {
        self.received.push(request.clone());
        if request.destination != self.address {
            return None;
        }
        if let Some(reason) = self.nack_with {
            return Some(request.reply(false, &[reason]));
        }

        let payload = &request.payload;
        let word = |bytes: &[u8]| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let answer = match request.command() {
            Command::Ping => vec![],
            Command::Peek => {
                let value = self.memory.get(&payload[0]).copied().unwrap_or(0);
                value.to_le_bytes().to_vec()
            }
            Command::Poke => {
                self.memory.insert(payload[0], word(&payload[1..]));
                vec![]
            }
            Command::AppTelemetry => match self.telemetry.get(&payload[0]) {
                Some(block) => block.clone(),
                None => return Some(request.reply(false, &[0x02])),
            },
            Command::AppCommand => {
                self.mode_payload = Some(payload.clone());
                vec![]
            }
            Command::ClearFault => {
                self.cleared_faults = Some(word(payload));
                vec![]
            }
            Command::ConfigureProtection => {
                self.protection = Some(word(payload));
                vec![]
            }
            Command::TripLcl => {
                self.lcl_tripped = true;
                vec![]
            }
        };
        Some(request.reply(true, &answer))
    }
}

/// Transport wired straight to a [`Device`].
pub struct DeviceLink {
    device: Arc<Mutex<Device>>,
    decoder: SlipDecoder,
    outbox: VecDeque<Vec<u8>>,
}

impl DeviceLink {
    pub fn new(device: Arc<Mutex<Device>>) -> Self {
        Self {
            device,
            decoder: SlipDecoder::new(),
            outbox: VecDeque::new(),
        }
    }
}

impl Transport for DeviceLink {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let frames: Vec<_> = self.decoder.decode(bytes).collect();
        let mut device = self.device.lock().unwrap();
        for raw in frames.into_iter().flatten() {
            let request = Packet::parse(&raw)?;
            if let Some(reply) = device.handle(&request) {
                self.outbox.push_back(frame(&reply));
            }
        }
        Ok(())
    }

    fn read(&mut self, deadline: Instant) -> Result<Option<Vec<u8>>> {
        match self.outbox.pop_front() {
            Some(bytes) => Ok(Some(bytes)),
            None => {
                sleep_until(deadline);
                Ok(None)
            }
        }
    }

    fn discard_input(&mut self) -> Result<()> {
        self.outbox.clear();
        Ok(())
    }
}

pub fn device() -> Arc<Mutex<Device>> {
    Arc::new(Mutex::new(Device::new(DEVICE)))
}
