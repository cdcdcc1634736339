use std::fmt::{Display, Formatter};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;

use crate::config::SessionConfig;
use crate::constants::POLL_SLICE_MS;
use crate::error::{NspError, Result};
use crate::packet::{is_valid_destination, Command, Packet, ParseError};
use crate::slip::{self, SlipDecoder};
use crate::transport::{SerialTransport, Transport};
use crate::types::{CancelToken, Direction, FrameLog, FrameRecord, Stats, Transaction};

struct Link {
    transport: Box<dyn Transport>,
    decoder: SlipDecoder,
}

impl Link {
    fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            decoder: SlipDecoder::new(),
        }
    }
}

/// Why a single attempt did not produce an acknowledged reply.
#[derive(Debug)]
enum Failure {
    Timeout,
    Nack(Vec<u8>),
    Transport(NspError),
}

impl Failure {
    fn into_error(self, command: Command, attempts: u32) -> NspError {
        match self {
            Failure::Timeout => NspError::Timeout { command, attempts },
            Failure::Nack(payload) => NspError::Nack {
                command,
                payload,
                attempts,
            },
            Failure::Transport(e) => e,
        }
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Timeout => write!(f, "timeout"),
            Failure::Nack(payload) => write!(f, "nack [{}]", hex::encode(payload)),
            Failure::Transport(e) => write!(f, "transport: {}", e),
        }
    }
}

enum Attempt {
    Reply(Packet),
    Failed(Failure),
}

/// NSP session with one device bus, optionally over a redundant pair of links.
///
/// Every transaction takes `&mut self`, so a session carries at most one
/// exchange at a time. Share it between threads behind a `Mutex`.
pub struct Session {
    links: Vec<Link>,
    active: usize,
    consecutive_failures: u32,
    seq: bool,
    config: SessionConfig,
    stats: Stats,
    cancel: CancelToken,
    frame_log: Option<Box<dyn FrameLog>>,
}

impl Session {
    /// Session over a single transport
    pub fn new(transport: impl Transport + 'static, config: SessionConfig) -> Self {
        Self::from_links(vec![Link::new(Box::new(transport))], config)
    }

    /// Session over a primary link with an alternate to fail over to
    pub fn with_links(
        primary: impl Transport + 'static,
        alternate: impl Transport + 'static,
        config: SessionConfig,
    ) -> Self {
        Self::from_links(
            vec![Link::new(Box::new(primary)), Link::new(Box::new(alternate))],
            config,
        )
    }

    /// Open a session on a serial port
    pub fn open(port_name: &str, config: SessionConfig) -> Result<Self> {
        let transport = SerialTransport::open(port_name, &config)?;
        Ok(Self::new(transport, config))
    }

    /// Open a session on a redundant pair of serial ports
    pub fn open_redundant(primary: &str, alternate: &str, config: SessionConfig) -> Result<Self> {
        let primary = SerialTransport::open(primary, &config)?;
        let alternate = SerialTransport::open(alternate, &config)?;
        Ok(Self::with_links(primary, alternate, config))
    }

    fn from_links(links: Vec<Link>, config: SessionConfig) -> Self {
        Self {
            links,
            active: 0,
            consecutive_failures: 0,
            seq: false,
            config,
            stats: Stats::default(),
            cancel: CancelToken::new(),
            frame_log: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Point the command methods at another device on the bus
    pub fn set_device_address(&mut self, address: u8) -> Result<()> {
        if !is_valid_destination(address) {
            return Err(NspError::InvalidAddress(address));
        }
        self.config.device_address = address;
        Ok(())
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Zero the counters; the active link is kept.
    pub fn reset_stats(&mut self) {
        self.stats = Stats {
            active_link: self.active,
            ..Stats::default()
        };
    }

    /// Sequence bit the next request will carry
    pub fn seq(&self) -> bool {
        self.seq
    }

    pub fn active_link(&self) -> usize {
        self.active
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Token aborting the current (or next) transaction from another thread.
    ///
    /// A cancellation is consumed by the transaction it aborts.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Receive every frame sent or received from now on
    pub fn set_frame_log(&mut self, log: impl FrameLog + 'static) {
        self.frame_log = Some(Box::new(log));
    }

    /// Exchange `command` with the configured device
    pub fn transact(&mut self, command: Command, payload: &[u8]) -> Result<Transaction> {
        let destination = self.config.device_address;
        self.transact_until(destination, command, payload, None)
    }

    /// Exchange `command` with the device at `destination`
    pub fn transact_to(
        &mut self,
        destination: u8,
        command: Command,
        payload: &[u8],
    ) -> Result<Transaction> {
        self.transact_until(destination, command, payload, None)
    }

    /// Full transaction: send, await the reply, retry on timeout or NACK.
    ///
    /// `deadline` bounds the whole exchange including retry pauses. A request
    /// to the broadcast address is sent once and not answered.
    #[tracing::instrument(skip(self, payload), fields(seq = self.seq))]
    pub fn transact_until(
        &mut self,
        destination: u8,
        command: Command,
        payload: &[u8],
        deadline: Option<Instant>,
    ) -> Result<Transaction> {
        let request = Packet::request(
            destination,
            self.config.host_address,
            command,
            self.seq,
            payload,
        )?;
        let wire = slip::encode(&request.to_bytes());
        let started = Instant::now();

        let outcome = if request.is_broadcast() {
            self.broadcast(&request, &wire, deadline, started)
        } else {
            self.run(&request, &wire, deadline, started)
        };

        match outcome {
            Ok(transaction) => {
                self.stats.transactions_ok += 1;
                self.seq = !self.seq;
                tracing::debug!(
                    attempts = transaction.attempts,
                    elapsed_us = transaction.elapsed.as_micros() as u64,
                    "transaction complete"
                );
                Ok(transaction)
            }
            Err(e) => {
                self.stats.transactions_failed += 1;
                if matches!(e, NspError::Cancelled) {
                    self.cancel.reset();
                }
                tracing::warn!(error = %e, "transaction failed");
                Err(e)
            }
        }
    }

    /// Single unanswered send to every device.
    fn broadcast(
        &mut self,
        request: &Packet,
        wire: &[u8],
        deadline: Option<Instant>,
        started: Instant,
    ) -> Result<Transaction> {
        self.check_interrupt(deadline)?;

        let link = self.select_link();
        if let Err(e) = self.send(link, request, wire) {
            self.link_failed(link);
            return Err(e);
        }

        Ok(Transaction {
            command: request.command(),
            destination: request.destination,
            attempts: 1,
            retries: 0,
            elapsed: started.elapsed(),
            link,
            reply: None,
        })
    }

    fn run(
        &mut self,
        request: &Packet,
        wire: &[u8],
        deadline: Option<Instant>,
        started: Instant,
    ) -> Result<Transaction> {
        let command = request.command();
        let max_attempts = self.config.max_attempts();
        let mut failure = Failure::Timeout;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.stats.retries += 1;
                tracing::warn!(?command, attempt, reason = %failure, "retrying");
                self.pause_before_retry(deadline)?;
            }

            let link = self.select_link();
            match self.attempt(link, request, wire, deadline)? {
                Attempt::Reply(reply) if reply.control.ack => {
                    self.link_succeeded(link);
                    return Ok(Transaction {
                        command,
                        destination: request.destination,
                        attempts: attempt,
                        retries: attempt - 1,
                        elapsed: started.elapsed(),
                        link,
                        reply: Some(reply),
                    });
                }
                Attempt::Reply(reply) => {
                    // the device heard us, so the link itself is fine
                    self.link_succeeded(link);
                    self.stats.nacks += 1;
                    tracing::warn!(?command, payload = %hex::encode(&reply.payload), "device replied NACK");
                    failure = Failure::Nack(reply.payload);
                }
                Attempt::Failed(f) => {
                    self.link_failed(link);
                    failure = f;
                }
            }
        }

        Err(failure.into_error(command, max_attempts))
    }

    /// One SENDING + AWAITING_REPLY pass on `link`.
    fn attempt(
        &mut self,
        link: usize,
        request: &Packet,
        wire: &[u8],
        deadline: Option<Instant>,
    ) -> Result<Attempt> {
        self.check_interrupt(deadline)?;

        let Link { transport, decoder } = &mut self.links[link];
        decoder.reset();
        if let Err(e) = transport.discard_input() {
            return Ok(Attempt::Failed(Failure::Transport(e)));
        }
        if let Err(e) = self.send(link, request, wire) {
            return Ok(Attempt::Failed(Failure::Transport(e)));
        }

        let reply_deadline = Instant::now() + self.config.timeout();
        self.await_reply(link, request, reply_deadline, deadline)
    }

    fn send(&mut self, link: usize, request: &Packet, wire: &[u8]) -> Result<()> {
        self.links[link].transport.write(wire)?;
        self.stats.frames_tx += 1;

        tracing::debug!(link, packet = %request, "tx");
        tracing::trace!(link, wire = %hex::encode(wire), "tx bytes");
        self.log_frame(Direction::Tx, link, &request.to_bytes(), Some(request));
        Ok(())
    }

    fn await_reply(
        &mut self,
        link: usize,
        request: &Packet,
        reply_deadline: Instant,
        deadline: Option<Instant>,
    ) -> Result<Attempt> {
        let slice = Duration::from_millis(POLL_SLICE_MS);

        loop {
            self.check_interrupt(deadline)?;

            let now = Instant::now();
            if now >= reply_deadline {
                self.stats.timeouts += 1;
                tracing::debug!(link, "reply timeout");
                return Ok(Attempt::Failed(Failure::Timeout));
            }

            let mut until = reply_deadline.min(now + slice);
            if let Some(deadline) = deadline {
                until = until.min(deadline);
            }

            let bytes = match self.links[link].transport.read(until) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => return Ok(Attempt::Failed(Failure::Transport(e))),
            };
            tracing::trace!(link, bytes = %hex::encode(&bytes), "rx bytes");

            let frames: Vec<_> = self.links[link].decoder.decode(&bytes).collect();
            for frame in frames {
                match frame {
                    Ok(raw) => {
                        if let Some(reply) = self.inspect(link, request, &raw) {
                            return Ok(Attempt::Reply(reply));
                        }
                    }
                    Err(e) => {
                        self.stats.framing_errors += 1;
                        tracing::debug!(link, error = %e, "discarding malformed frame");
                    }
                }
            }
        }
    }

    /// Parse a candidate frame; `Some` only if it answers `request`.
    fn inspect(&mut self, link: usize, request: &Packet, raw: &[u8]) -> Option<Packet> {
        let packet = match Packet::parse(raw) {
            Ok(packet) => packet,
            Err(e) => {
                match e {
                    ParseError::BadChecksum { .. } => self.stats.crc_errors += 1,
                    _ => self.stats.parse_errors += 1,
                }
                tracing::debug!(link, error = %e, frame = %hex::encode(raw), "discarding frame");
                self.log_frame(Direction::Rx, link, raw, None);
                return None;
            }
        };

        self.stats.frames_rx += 1;
        tracing::debug!(link, %packet, "rx");
        self.log_frame(Direction::Rx, link, raw, Some(&packet));

        if !request.accepts_reply(&packet) {
            self.stats.unmatched_replies += 1;
            return None;
        }
        if packet.control.seq != request.control.seq {
            self.stats.seq_mismatches += 1;
            tracing::debug!(link, "reply sequence bit differs from request");
        }
        Some(packet)
    }

    fn pause_before_retry(&mut self, deadline: Option<Instant>) -> Result<()> {
        let mut pause = self.config.retry_delay();
        if self.config.retry_jitter_ms > 0 {
            let jitter = rand::thread_rng().gen_range(0..=self.config.retry_jitter_ms);
            pause += Duration::from_millis(jitter);
        }

        let until = Instant::now() + pause;
        let slice = Duration::from_millis(POLL_SLICE_MS);
        loop {
            self.check_interrupt(deadline)?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            thread::sleep((until - now).min(slice));
        }
    }

    fn check_interrupt(&self, deadline: Option<Instant>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(NspError::Cancelled);
        }
        match deadline {
            Some(deadline) if Instant::now() >= deadline => Err(NspError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Link for the next send: stay on the last good one unless it keeps failing.
    fn select_link(&mut self) -> usize {
        let threshold = self.config.failover_threshold.max(1);
        if self.links.len() > 1 && self.consecutive_failures >= threshold {
            let from = self.active;
            self.active = (self.active + 1) % self.links.len();
            self.consecutive_failures = 0;
            self.stats.failovers += 1;
            self.stats.active_link = self.active;
            tracing::warn!(from, to = self.active, "failing over to alternate link");
        }
        self.active
    }

    fn link_failed(&mut self, link: usize) {
        if link == self.active {
            self.consecutive_failures += 1;
        }
    }

    fn link_succeeded(&mut self, link: usize) {
        if link == self.active {
            self.consecutive_failures = 0;
        }
    }

    fn log_frame(&mut self, direction: Direction, link: usize, raw: &[u8], packet: Option<&Packet>) {
        if let Some(log) = self.frame_log.as_mut() {
            log.record(&FrameRecord {
                timestamp: Utc::now(),
                direction,
                link,
                raw: raw.to_vec(),
                packet: packet.cloned(),
            });
        }
    }
}
