//! Byte transport under the session.
//!
//! The session only needs to write a framed request and read whatever bytes
//! arrive before a deadline. Line-direction turnaround is the transport's
//! business.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;

use crate::config::SessionConfig;
use crate::error::Result;

pub trait Transport: Send {
    /// Write all of `bytes`; returns once they are on the wire.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Bytes received before `deadline`, or `None` if nothing arrived.
    fn read(&mut self, deadline: Instant) -> Result<Option<Vec<u8>>>;

    /// Drop anything buffered on the receive side.
    fn discard_input(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }

    fn read(&mut self, deadline: Instant) -> Result<Option<Vec<u8>>> {
        (**self).read(deadline)
    }

    fn discard_input(&mut self) -> Result<()> {
        (**self).discard_input()
    }
}

/// RS-485 port driven through the `serialport` crate.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    buf: Vec<u8>,
}

impl SerialTransport {
    /// Open `port_name` as 8N1 at the configured baud rate.
    pub fn open(port_name: &str, config: &SessionConfig) -> Result<Self> {
        let port = serialport::new(port_name, config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(config.timeout())
            .open()?;

        tracing::info!(port = port_name, baud = config.baud_rate, "serial link opened");
        Ok(Self::from_port(port))
    }

    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            buf: vec![0u8; 256],
        }
    }

    /// List available serial ports
    pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
        Ok(serialport::available_ports()?)
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read(&mut self, deadline: Instant) -> Result<Option<Vec<u8>>> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }

        // serialport treats a zero timeout as non-blocking
        self.port.set_timeout(remaining.max(Duration::from_millis(1)))?;
        match self.port.read(&mut self.buf) {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(self.buf[..n].to_vec())),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn discard_input(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}
