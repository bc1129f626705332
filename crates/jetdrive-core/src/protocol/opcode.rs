//! Protocol opcodes
//!
//! Defines the commands understood by the JetDrive firmware.

use serde::{Deserialize, Serialize};

use super::{DUMP_RESPONSE_LEN, EncodeError, STATUS_RESPONSE_LEN, VERSION_RESPONSE_LEN};

/// JetDrive command opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    /// Placeholder that never reaches the wire
    NoCommand = 0x00,
    /// Soft reset of the pulser
    Reset = 0x01,
    /// Read the status byte
    PollStatus = 0x02,
    /// Drops per trigger
    Drops = 0x03,
    /// Continuous vs single-shot jetting
    ContMode = 0x04,
    /// Frequency as a divisor of the 625 kHz base clock
    Frequency = 0x05,
    /// Pulse waveform
    Pulse = 0x06,
    /// Strobe divider
    StrobeDiv = 0x07,
    /// Trigger source (channel enable on multi-channel boards)
    Source = 0x08,
    /// Trigger from the host
    SoftTrigger = 0x09,
    /// External trigger enable (multi-channel only)
    ExternEnable = 0x0C,
    /// Multi-channel trigger
    MultiTrigger = 0x0D,
    /// Select the channel edited by subsequent commands
    EditChannel = 0x0E,
    /// Strobe on/off
    StrobeEnable = 0x10,
    /// Frequency in whole Hz below 256 Hz (firmware 40+)
    LowFreq = 0x11,
    /// Frequency in whole Hz, 16-bit
    FullFreq = 0x12,
    /// Strobe delay
    StrobeDelay = 0x13,
    /// Register dump
    DumpInput = 0x60,
    /// Write a debug register
    Debug = 0x61,
    /// Fixed maintenance poke
    Poke = 0xEF,
    /// Firmware version query
    GetVersion = 0xF0,
}

impl Opcode {
    /// Every opcode, in wire-value order
    pub const ALL: [Opcode; 21] = [
        Opcode::NoCommand,
        Opcode::Reset,
        Opcode::PollStatus,
        Opcode::Drops,
        Opcode::ContMode,
        Opcode::Frequency,
        Opcode::Pulse,
        Opcode::StrobeDiv,
        Opcode::Source,
        Opcode::SoftTrigger,
        Opcode::ExternEnable,
        Opcode::MultiTrigger,
        Opcode::EditChannel,
        Opcode::StrobeEnable,
        Opcode::LowFreq,
        Opcode::FullFreq,
        Opcode::StrobeDelay,
        Opcode::DumpInput,
        Opcode::Debug,
        Opcode::Poke,
        Opcode::GetVersion,
    ];

    /// Get the opcode byte
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Number of bytes the board answers with
    pub fn response_len(self) -> usize {
        match self {
            Opcode::NoCommand => 0,
            Opcode::GetVersion => VERSION_RESPONSE_LEN,
            Opcode::DumpInput => DUMP_RESPONSE_LEN,
            _ => STATUS_RESPONSE_LEN,
        }
    }

    /// Check if this command expects a response
    pub fn expects_response(self) -> bool {
        self.response_len() > 0
    }
}

impl TryFrom<u8> for Opcode {
    type Error = EncodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| op.code() == code)
            .ok_or(EncodeError::UnknownOpcode(code))
    }
}
