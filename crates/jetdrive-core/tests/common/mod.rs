//! Scripted transport shared by the integration tests

#![allow(dead_code)]

use jetdrive_core::protocol::{ProtocolError, Transport};
use std::collections::VecDeque;
use std::time::Duration;

/// One scripted answer to a read attempt
#[derive(Debug, Clone)]
pub enum Chunk {
    Data(Vec<u8>),
    Error,
}

/// Mock transport: records writes and pauses, replays scripted reads
#[derive(Debug, Default)]
pub struct MockTransport {
    pub writes: Vec<Vec<u8>>,
    pub pauses: Vec<Duration>,
    pub reads: usize,
    pub fail_on_send: bool,
    /// Accept only this many bytes per write
    pub short_write: Option<usize>,
    pub closed: bool,
    script: VecDeque<Chunk>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads return `chunks` in order, then nothing
    pub fn with_chunks(chunks: Vec<Vec<u8>>) -> Self {
        let mut mock = Self::new();
        for chunk in chunks {
            mock.push(chunk);
        }
        mock
    }

    pub fn push(&mut self, bytes: impl Into<Vec<u8>>) {
        self.script.push_back(Chunk::Data(bytes.into()));
    }

    /// `count` read attempts that return nothing
    pub fn push_silence(&mut self, count: usize) {
        for _ in 0..count {
            self.script.push_back(Chunk::Data(Vec::new()));
        }
    }

    pub fn push_error(&mut self) {
        self.script.push_back(Chunk::Error);
    }

    /// Every byte written, concatenated
    pub fn written(&self) -> Vec<u8> {
        self.writes.concat()
    }

    pub fn total_paused(&self) -> Duration {
        self.pauses.iter().sum()
    }
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        if self.closed {
            return Err(ProtocolError::TransportClosed);
        }
        if self.fail_on_send {
            return Err(ProtocolError::SerialError("write failed".to_string()));
        }
        let accepted = self.short_write.map_or(bytes.len(), |n| n.min(bytes.len()));
        self.writes.push(bytes[..accepted].to_vec());
        Ok(accepted)
    }

    fn read(&mut self, max_len: usize, _timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        self.reads += 1;
        match self.script.pop_front() {
            None => Ok(Vec::new()),
            Some(Chunk::Error) => Err(ProtocolError::SerialError("read failed".to_string())),
            Some(Chunk::Data(mut data)) => {
                if data.len() > max_len {
                    let rest = data.split_off(max_len);
                    self.script.push_front(Chunk::Data(rest));
                }
                Ok(data)
            }
        }
    }

    fn pause(&mut self, duration: Duration) {
        self.pauses.push(duration);
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_open(&self) -> bool {
        !self.closed
    }
}

/// ACK status reply with a valid checksum
pub fn ack(status: u8) -> Vec<u8> {
    vec![0x06, 0x02, status, 0x02u8.wrapping_add(status)]
}

pub fn nak() -> Vec<u8> {
    vec![0x15, 0x02, 0x00, 0x02]
}
