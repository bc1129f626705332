//! Power-on initialization
//!
//! Brings a freshly opened board into a known state:
//! 1. the firmware program handshake (`Q`, then `X2000` echoed byte by byte),
//!    only on controllers that boot into the program loader
//! 2. a fixed list of commands that push every channel parameter to the board
//!
//! Any hard failure closes the transport so the caller starts over from a
//! clean port.

use std::time::Duration;
use thiserror::Error;

use super::{
    read_up_to, CancelToken, DeviceParameters, EncodeError, Opcode, PollPolicy, ProtocolError,
    Transaction, TransactionOutcome, TransactionResult, Transport,
};

/// Banner length of the first handshake reply
const BANNER_LEN: usize = 35;
/// Extra banner bytes sent by boards that answer with the 49-byte form
const BANNER_TAIL_LEN: usize = 14;
/// Marker in the banner of the newer firmware family
const MFJET32_MARKER: &[u8] = b"MFJET32";
/// Program start command
const PROGRAM_COMMAND: &[u8] = b"X2000";
const BANNER_TIMEOUT: Duration = Duration::from_secs(1);

/// Firmware family, told apart by the handshake banner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareFamily {
    /// 35 or 49 byte banner
    Legacy,
    /// Banner starting with `MFJET32`
    Mfjet32,
}

/// What the board said during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReply {
    /// Loader family
    pub family: FirmwareFamily,
    /// Raw banner bytes
    pub banner: Vec<u8>,
}

impl HandshakeReply {
    /// Banner as lossy UTF-8
    pub fn banner_text(&self) -> String {
        String::from_utf8_lossy(&self.banner).into_owned()
    }
}

/// Errors that abort initialization
#[derive(Error, Debug)]
pub enum InitError {
    /// The board sent nothing after `Q`
    #[error("No handshake banner from JetDrive")]
    NoBanner,

    /// A program command byte was not echoed back
    #[error("Handshake echo mismatch: sent {expected:#04x}, got {received:?}")]
    EchoMismatch {
        /// Byte sent
        expected: u8,
        /// Byte echoed, if any
        received: Option<u8>,
    },

    /// A sequence step ended with a fatal outcome
    #[error("Initialization step {opcode:?} failed: {outcome:?}")]
    Step {
        /// Opcode of the failing step
        opcode: Opcode,
        /// How its transaction ended
        outcome: TransactionOutcome,
    },

    /// Cancelled through the token in [`InitOptions`]
    #[error("Initialization cancelled")]
    Cancelled,

    /// A step could not be encoded
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] ProtocolError),
}

/// One command of the initialization sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitStep {
    /// Command to send
    pub opcode: Opcode,
    /// Wait after the write before polling for the reply
    pub settle: Duration,
}

impl InitStep {
    /// Step that waits `settle_ms` after the write
    pub const fn new(opcode: Opcode, settle_ms: u64) -> Self {
        Self {
            opcode,
            settle: Duration::from_millis(settle_ms),
        }
    }
}

/// Ordered list of initialization commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSequence {
    steps: Vec<InitStep>,
}

impl InitSequence {
    /// The power-on sequence used for every board
    pub fn standard() -> Self {
        Self {
            steps: vec![
                InitStep::new(Opcode::Reset, 3000),
                InitStep::new(Opcode::GetVersion, 100),
                InitStep::new(Opcode::Pulse, 550),
                InitStep::new(Opcode::ContMode, 100),
                InitStep::new(Opcode::Drops, 1000),
                InitStep::new(Opcode::FullFreq, 1000),
                InitStep::new(Opcode::StrobeDiv, 100),
                InitStep::new(Opcode::StrobeEnable, 100),
                InitStep::new(Opcode::StrobeDelay, 100),
                InitStep::new(Opcode::Source, 100),
            ],
        }
    }

    /// Custom sequence
    pub fn from_steps(steps: Vec<InitStep>) -> Self {
        Self { steps }
    }

    /// Steps in order
    pub fn steps(&self) -> &[InitStep] {
        &self.steps
    }

    /// Opcodes in order
    pub fn opcodes(&self) -> Vec<Opcode> {
        self.steps.iter().map(|s| s.opcode).collect()
    }
}

impl Default for InitSequence {
    fn default() -> Self {
        Self::standard()
    }
}

/// How to run the initialization
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Poll policy for every step
    pub policy: PollPolicy,
    /// Force the handshake on or off; `None` follows the capabilities
    pub handshake: Option<bool>,
    /// Commands to run
    pub sequence: InitSequence,
    /// Checked between steps and during polls
    pub cancel: Option<CancelToken>,
}

impl InitOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

/// Summary of a completed initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    /// Present when the handshake ran
    pub handshake: Option<HandshakeReply>,
    /// One result per step
    pub results: Vec<TransactionResult>,
    /// Version reported by GETVERSION
    pub firmware_version: u8,
}

impl InitReport {
    /// Steps the board answered with NAK
    pub fn rejected(&self) -> Vec<Opcode> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, TransactionOutcome::DeviceRejected { .. }))
            .map(|r| r.requested)
            .collect()
    }

    /// Steps whose reply carried a bad checksum
    pub fn checksum_mismatches(&self) -> Vec<Opcode> {
        self.results
            .iter()
            .filter(|r| r.checksum_mismatch.is_some())
            .map(|r| r.requested)
            .collect()
    }
}

/// Run the handshake (if needed) and the initialization sequence.
///
/// On error the transport has been closed.
pub fn run_initialization<T: Transport + ?Sized>(
    params: &mut DeviceParameters,
    transport: &mut T,
    options: &InitOptions,
) -> Result<InitReport, InitError> {
    let result = initialize(params, transport, options);
    if let Err(e) = &result {
        tracing::warn!(error = %e, "JetDrive initialization aborted");
        transport.close();
    }
    result
}

fn initialize<T: Transport + ?Sized>(
    params: &mut DeviceParameters,
    transport: &mut T,
    options: &InitOptions,
) -> Result<InitReport, InitError> {
    let wants_handshake = options
        .handshake
        .unwrap_or_else(|| params.capabilities.requires_handshake());
    let handshake = if wants_handshake {
        Some(handshake(transport, options)?)
    } else {
        None
    };

    let mut results = Vec::with_capacity(options.sequence.steps().len());
    for step in options.sequence.steps() {
        if options.is_cancelled() {
            return Err(InitError::Cancelled);
        }

        let mut transaction = Transaction::new(step.opcode).settle(step.settle);
        if let Some(token) = &options.cancel {
            transaction = transaction.cancel_token(token.clone());
        }
        let result = match transaction.run(params, transport, &options.policy) {
            Ok(result) => result,
            Err(ProtocolError::Encode(e)) => return Err(InitError::Encode(e)),
            Err(e) => return Err(InitError::Transport(e)),
        };

        match result.outcome {
            TransactionOutcome::Success { .. } | TransactionOutcome::NoOp => {
                if result.checksum_mismatch.is_some() {
                    tracing::warn!(opcode = ?step.opcode, "checksum mismatch tolerated");
                }
            }
            TransactionOutcome::DeviceRejected { code } => {
                tracing::warn!(opcode = ?step.opcode, code, "JetDrive rejected init step");
            }
            TransactionOutcome::Cancelled => return Err(InitError::Cancelled),
            outcome => {
                return Err(InitError::Step {
                    opcode: step.opcode,
                    outcome,
                })
            }
        }
        results.push(result);
    }

    tracing::info!(
        firmware = params.firmware_version,
        steps = results.len(),
        "JetDrive initialized"
    );
    Ok(InitReport {
        handshake,
        results,
        firmware_version: params.firmware_version,
    })
}

fn write_all<T: Transport + ?Sized>(transport: &mut T, bytes: &[u8]) -> Result<(), InitError> {
    let written = transport.write(bytes)?;
    if written < bytes.len() {
        return Err(ProtocolError::WriteIncomplete {
            written,
            expected: bytes.len(),
        }
        .into());
    }
    Ok(())
}

/// Start the firmware program: `Q`, banner, then `X2000` with per-byte echo
pub fn handshake<T: Transport + ?Sized>(
    transport: &mut T,
    options: &InitOptions,
) -> Result<HandshakeReply, InitError> {
    tracing::debug!("handshake: query");
    write_all(transport, b"Q")?;
    transport.pause(Duration::from_millis(500));

    let mut banner = read_up_to(transport, BANNER_LEN, BANNER_TIMEOUT)?;
    if banner.is_empty() {
        return Err(InitError::NoBanner);
    }

    let family = if banner
        .windows(MFJET32_MARKER.len())
        .any(|w| w == MFJET32_MARKER)
    {
        transport.pause(Duration::from_secs(2));
        transport.clear_input()?;
        FirmwareFamily::Mfjet32
    } else {
        if banner.len() == BANNER_LEN && banner[0] != b'Q' {
            let tail = read_up_to(transport, BANNER_TAIL_LEN, BANNER_TIMEOUT)?;
            banner.extend_from_slice(&tail);
            transport.pause(Duration::from_secs(3));
        }
        FirmwareFamily::Legacy
    };
    tracing::debug!(?family, banner = %String::from_utf8_lossy(&banner), "handshake banner");

    for &byte in PROGRAM_COMMAND {
        if options.is_cancelled() {
            return Err(InitError::Cancelled);
        }
        write_all(transport, &[byte])?;
        transport.pause(Duration::from_millis(100));
        let echo = read_up_to(transport, 1, options.policy.read_timeout())?;
        if echo.first() != Some(&byte) {
            return Err(InitError::EchoMismatch {
                expected: byte,
                received: echo.first().copied(),
            });
        }
    }

    if family == FirmwareFamily::Legacy {
        // Trailing CR LF; its absence is not fatal
        let trailer = read_up_to(transport, 2, options.policy.read_timeout())?;
        if trailer != b"\r\n" {
            tracing::debug!(?trailer, "handshake trailer missing");
        }
    }

    transport.pause(Duration::from_secs(1));
    tracing::info!(?family, "firmware program started");
    Ok(HandshakeReply { family, banner })
}
