//! JetDrive serial protocol
//!
//! Implements the MicroFab JetDrive ("Stortz") command protocol.
//!
//! Every command is a short checksummed frame; the board answers with a
//! fixed-length reply that starts with ACK or NAK.

mod connection;
/// Response classification
pub mod decoder;
/// DUMPINPUT readback
pub mod dump;
/// Opcode to frame encoding
pub mod encoder;
mod error;
mod frame;
/// Handshake and power-on sequence
pub mod init;
mod opcode;
mod params;
/// Serial port discovery
pub mod serial;
/// Write, poll and classify
pub mod transaction;
mod transport;

pub use connection::{ConnectionState, JetDrive, JetDriveConfig};
pub use decoder::{ChecksumMismatch, ResponseClass};
pub use dump::{DeviceDump, DumpError, DumpField};
pub use encoder::{encode, encode_raw, EncodeOutcome};
pub use error::{EncodeError, ProtocolError};
pub use frame::{checksum, Frame, FrameBuilder};
pub use init::{
    run_initialization, FirmwareFamily, HandshakeReply, InitError, InitOptions, InitReport,
    InitSequence, InitStep,
};
pub use opcode::Opcode;
pub use params::{Capabilities, DeviceParameters, TriggerMode, TriggerSource, Waveform};
pub use serial::{list_ports, PortInfo};
pub use transaction::{
    transact, CancelToken, PollPolicy, Transaction, TransactionOutcome, TransactionResult,
};
pub use transport::{read_up_to, SerialTransport, Transport};

/// First byte of every command frame
pub const FRAME_HEADER: u8 = b'S';

/// Positive acknowledgement
pub const ACK: u8 = 0x06;

/// Negative acknowledgement
pub const NAK: u8 = 0x15;

/// Base clock of the pulse timer (Hz)
pub const FREQUENCY_BASE_HZ: f64 = 625_000.0;

/// Largest divisor the 12-bit FREQUENCY field can carry
pub const MAX_DIVISOR: u32 = 4095;

/// First firmware version that understands LOWFREQ
pub const LOWFREQ_MIN_FIRMWARE: u8 = 40;

/// Output stage slew rate (V/µs)
pub const SLEW_RATE_LIMIT: f64 = 30.0;

/// Reply length of most opcodes: ACK/NAK, length, status, checksum
pub const STATUS_RESPONSE_LEN: usize = 4;
/// Reply length of GETVERSION
pub const VERSION_RESPONSE_LEN: usize = 5;
/// Reply length of DUMPINPUT
pub const DUMP_RESPONSE_LEN: usize = 29;

/// Default baud rate for JetDrive communication
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Delay between response polls in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Timeout of a single read attempt in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;
