//! Frame encoding
//!
//! Implements the JetDrive command frame.
//!
//! Frame format:
//! - 1 byte: header `'S'`
//! - 1 byte: length (length byte + opcode + payload)
//! - 1 byte: opcode
//! - N bytes: payload (0..=19)
//! - 1 byte: checksum (sum of length, opcode and payload, mod 256)

use byteorder::{BigEndian, ByteOrder};

use super::{Opcode, ProtocolError, FRAME_HEADER};

/// Largest payload any opcode produces (extended PULSE)
pub const MAX_PAYLOAD_LEN: usize = 19;

/// A complete command frame, ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    opcode: Opcode,
    bytes: Vec<u8>,
}

impl Frame {
    /// Build a frame for `opcode` around `payload`
    pub fn new(opcode: Opcode, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(payload.len() + 4);
        bytes.push(FRAME_HEADER);
        bytes.push((payload.len() + 2) as u8);
        bytes.push(opcode.code());
        bytes.extend_from_slice(payload);
        let checksum = checksum(&bytes[1..]);
        bytes.push(checksum);
        Self { opcode, bytes }
    }

    /// Decode a frame from raw bytes, verifying header, length and checksum
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 4 || data[0] != FRAME_HEADER {
            return Err(ProtocolError::InvalidResponse(format!(
                "not a command frame: {:02X?}",
                data
            )));
        }

        let length = data[1] as usize;
        if length + 2 != data.len() {
            return Err(ProtocolError::InvalidResponse(format!(
                "length byte {} does not match frame size {}",
                length,
                data.len()
            )));
        }

        let expected = checksum(&data[1..data.len() - 1]);
        let actual = data[data.len() - 1];
        if expected != actual {
            return Err(ProtocolError::InvalidResponse(format!(
                "checksum mismatch: expected {:#04x}, got {:#04x}",
                expected, actual
            )));
        }

        let opcode = Opcode::try_from(data[2])?;
        Ok(Self {
            opcode,
            bytes: data.to_vec(),
        })
    }

    /// Opcode carried on the wire
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Complete wire bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the frame into its wire bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Payload between opcode and checksum
    pub fn payload(&self) -> &[u8] {
        &self.bytes[3..self.bytes.len() - 1]
    }

    /// Value of the length byte
    pub fn length_byte(&self) -> u8 {
        self.bytes[1]
    }

    /// Trailing checksum byte
    pub fn checksum(&self) -> u8 {
        self.bytes[self.bytes.len() - 1]
    }

    /// Get the total encoded size
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Never true for a built frame
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Builder for frame payloads
pub struct FrameBuilder {
    opcode: Opcode,
    payload: Vec<u8>,
}

impl FrameBuilder {
    /// Create a new frame builder
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            payload: Vec::with_capacity(MAX_PAYLOAD_LEN),
        }
    }

    /// Add a single byte
    pub fn byte(mut self, b: u8) -> Self {
        self.payload.push(b);
        self
    }

    /// Add a boolean flag as `0x01`/`0x00`
    pub fn flag(self, on: bool) -> Self {
        self.byte(u8::from(on))
    }

    /// Add a 16-bit value (big-endian)
    pub fn u16_be(mut self, value: u16) -> Self {
        let mut bytes = [0u8; 2];
        BigEndian::write_u16(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Add a signed 16-bit value (big-endian, two's complement)
    pub fn i16_be(mut self, value: i16) -> Self {
        let mut bytes = [0u8; 2];
        BigEndian::write_i16(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Add raw bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.payload.extend_from_slice(data);
        self
    }

    /// Build the frame
    pub fn build(self) -> Frame {
        Frame::new(self.opcode, &self.payload)
    }
}

/// Additive checksum used by both frames and responses
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}
