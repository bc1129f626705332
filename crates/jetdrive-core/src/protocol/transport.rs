//! Transport abstraction
//!
//! The protocol engine only needs a half-duplex byte pipe. [`SerialTransport`]
//! provides one over a serial port; tests and the simulator provide others.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::{
    serial::{clear_buffers, configure_port, open_port},
    ProtocolError,
};

/// Half-duplex byte channel to a JetDrive board
pub trait Transport {
    /// Write `bytes`, returning how many were actually accepted
    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError>;

    /// One blocking read attempt of at most `max_len` bytes.
    ///
    /// Returns whatever arrived within `timeout`, possibly nothing.
    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, ProtocolError>;

    /// Discard pending input
    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// Wait for the line or the board to settle
    fn pause(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }

    /// Release the underlying channel
    fn close(&mut self);

    /// Whether the channel can still be used
    fn is_open(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        (**self).write(bytes)
    }

    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        (**self).read(max_len, timeout)
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        (**self).clear_input()
    }

    fn pause(&mut self, duration: Duration) {
        (**self).pause(duration)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// Serial port wrapper implementing [`Transport`]
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Wrap an already opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port: Some(port) }
    }

    /// Open and configure `name` for JetDrive traffic (8N1, no flow control)
    pub fn open(name: &str, baud_rate: Option<u32>) -> Result<Self, ProtocolError> {
        let mut port = open_port(name, baud_rate)?;
        configure_port(port.as_mut())?;
        clear_buffers(port.as_mut())?;
        Ok(Self::new(port))
    }

    /// Name of the underlying port, if known
    pub fn name(&self) -> Option<String> {
        self.port.as_ref().and_then(|p| p.name())
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, ProtocolError> {
        self.port.as_mut().ok_or(ProtocolError::TransportClosed)
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        let port = self.port_mut()?;
        let written = Write::write(port, bytes)?;
        Write::flush(port)?;
        Ok(written)
    }

    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        let port = self.port_mut()?;
        port.set_timeout(timeout)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

        let mut buf = vec![0u8; max_len];
        match Read::read(port, &mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        let port = self.port_mut()?;
        port.clear(serialport::ClearBuffer::Input)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::debug!("serial transport closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

/// Read until `len` bytes have arrived or a read comes back empty
pub fn read_up_to<T: Transport + ?Sized>(
    transport: &mut T,
    len: usize,
    timeout: Duration,
) -> Result<Vec<u8>, ProtocolError> {
    let mut data = Vec::with_capacity(len);
    while data.len() < len {
        let chunk = transport.read(len - data.len(), timeout)?;
        if chunk.is_empty() {
            break;
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}
