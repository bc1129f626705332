//! Response decoding
//!
//! Classifies the bytes the board returned for a command.

use super::{frame::checksum, Opcode, ACK, NAK};

/// Classification of a raw response buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// ACK; carries the board's status byte
    Success {
        /// Third byte of the reply
        status: u8,
    },
    /// NAK; the board did not understand the command
    DeviceRejected {
        /// Always `-0x15`
        code: i16,
    },
    /// Nothing was received
    Timeout,
    /// Fewer bytes than the opcode's response length
    ShortRead {
        /// Bytes received
        received: usize,
        /// Response length of the opcode
        expected: usize,
    },
    /// Bytes arrived but did not start with ACK or NAK
    DeviceMute {
        /// First byte received
        first_byte: u8,
    },
}

/// Checksum disagreement in an otherwise successful response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumMismatch {
    /// Additive checksum over the reply
    pub computed: u8,
    /// Last byte of the reply
    pub received: u8,
}

/// Whether `byte` ends the poll loop
pub fn is_terminator(byte: u8) -> bool {
    byte == ACK || byte == NAK
}

/// Classify the response to `opcode`
pub fn classify(opcode: Opcode, response: &[u8]) -> ResponseClass {
    let expected = opcode.response_len();

    let Some(&first) = response.first() else {
        return ResponseClass::Timeout;
    };

    // Opcodes without a reply never carry a status byte
    if expected == 0 {
        return ResponseClass::DeviceMute { first_byte: first };
    }

    if response.len() < expected {
        ResponseClass::ShortRead {
            received: response.len(),
            expected,
        }
    } else if first == ACK {
        ResponseClass::Success {
            status: response[2],
        }
    } else if first == NAK {
        ResponseClass::DeviceRejected {
            code: -i16::from(first),
        }
    } else {
        ResponseClass::DeviceMute { first_byte: first }
    }
}

/// Verify the trailing checksum of a complete response.
///
/// The sum covers bytes `1..expected-1`; the final byte is compared against
/// it. Returns `None` when the sums agree or the response is too short to
/// carry a checksum.
pub fn verify_checksum(opcode: Opcode, response: &[u8]) -> Option<ChecksumMismatch> {
    let expected = opcode.response_len();
    if expected < 2 || response.len() < expected {
        return None;
    }

    let computed = checksum(&response[1..expected - 1]);
    let received = response[expected - 1];
    (computed != received).then_some(ChecksumMismatch { computed, received })
}

/// Firmware version carried in a GETVERSION response
pub fn firmware_version(response: &[u8]) -> Option<u8> {
    let expected = Opcode::GetVersion.response_len();
    (response.len() >= expected).then(|| response[expected - 1])
}
