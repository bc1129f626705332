//! Protocol errors

use thiserror::Error;

use super::{DumpError, Opcode};

/// Errors raised while turning a command into a frame.
///
/// These are always reported before any byte reaches the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The parameters do not fit the opcode's payload
    #[error("{opcode:?} cannot encode the current parameters: {reason}")]
    NotRepresentable {
        /// Opcode being encoded
        opcode: Opcode,
        /// What is out of range
        reason: &'static str,
    },

    /// Raw byte is not a JetDrive opcode
    #[error("Unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
}

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Port could not be opened or used
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No port with that name
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Operation on a closed transport
    #[error("Transport is closed")]
    TransportClosed,

    /// Command issued before connect
    #[error("Not connected to JetDrive")]
    NotConnected,

    /// Connect issued twice
    #[error("Already connected")]
    AlreadyConnected,

    /// Command could not be encoded
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The transport accepted only part of a frame
    #[error("Write incomplete: sent {written} of {expected} bytes")]
    WriteIncomplete {
        /// Bytes accepted
        written: usize,
        /// Frame length
        expected: usize,
    },

    /// No reply
    #[error("Response timeout")]
    Timeout,

    /// Reply shorter than expected
    #[error("Short read: got {received} of {expected} bytes")]
    ShortRead {
        /// Bytes received
        received: usize,
        /// Bytes expected
        expected: usize,
    },

    /// The board answered NAK
    #[error("JetDrive rejected {opcode:?} with code {code}")]
    DeviceRejected {
        /// Opcode that was rejected
        opcode: Opcode,
        /// Vendor error code
        code: i16,
    },

    /// The board answered without ACK or NAK
    #[error("JetDrive answered {opcode:?} without ACK/NAK (first byte {first_byte:#04x})")]
    DeviceMute {
        /// Opcode that was sent
        opcode: Opcode,
        /// First byte received
        first_byte: u8,
    },

    /// Cancelled through a token
    #[error("Transaction cancelled")]
    Cancelled,

    /// Operation has no meaning on this controller
    #[error("{0} is not available on multi-channel controllers")]
    Unsupported(&'static str),

    /// Reply was well formed but unusable
    #[error("Invalid response from JetDrive: {0}")]
    InvalidResponse(String),

    /// Register dump could not be decoded
    #[error(transparent)]
    Dump(#[from] DumpError),

    /// Configuration JSON did not parse
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
