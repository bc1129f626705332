//! Request/response transactions
//!
//! One transaction is: encode → write → settle → poll for ACK/NAK → classify.
//! The poll loop is bounded by a [`PollPolicy`] and can be cancelled from
//! another thread with a [`CancelToken`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{
    decoder::{self, ChecksumMismatch, ResponseClass},
    encode, DeviceParameters, EncodeOutcome, Opcode, ProtocolError, Transport,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_READ_TIMEOUT_MS,
};

/// Bounds and pacing of the response poll loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Sleep before every read attempt
    pub interval_ms: u64,
    /// Timeout handed to each read attempt
    pub read_timeout_ms: u64,
    /// Give up after this many read attempts
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed since polling started
    pub deadline_ms: Option<u64>,
    /// Guard delay before each frame is written
    pub pre_write_delay_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            max_attempts: Some(50),
            deadline_ms: Some(10_000),
            pre_write_delay_ms: 50,
        }
    }
}

impl PollPolicy {
    /// Poll until ACK/NAK with no bound at all.
    ///
    /// Only use this together with a [`CancelToken`].
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            deadline_ms: None,
            ..Self::default()
        }
    }

    /// Policy with no delays and `max_attempts` reads, for scripted transports
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            interval_ms: 0,
            read_timeout_ms: 0,
            max_attempts: Some(max_attempts),
            deadline_ms: None,
            pre_write_delay_ms: 0,
        }
    }

    /// Pause before each read attempt
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Timeout of one read attempt
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    fn exhausted(&self, attempts: u32, started: Instant) -> bool {
        let over_attempts = self.max_attempts.is_some_and(|max| attempts >= max);
        let over_deadline = self
            .deadline_ms
            .is_some_and(|ms| started.elapsed() >= Duration::from_millis(ms));
        over_attempts || over_deadline
    }
}

/// Shared flag that aborts an in-flight poll loop
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the poll loop of every holder
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether `cancel` was called
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm the token for the next transaction
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// How a transaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Nothing needed to be sent
    NoOp,
    /// ACK
    Success {
        /// Board status byte
        status: u8,
    },
    /// NAK
    DeviceRejected {
        /// Vendor error code, `-0x15`
        code: i16,
    },
    /// No reply at all
    Timeout,
    /// Reply shorter than the opcode's response length
    ShortRead {
        /// Bytes received
        received: usize,
        /// Bytes the opcode answers with
        expected: usize,
    },
    /// Reply without ACK or NAK
    DeviceMute {
        /// First byte received
        first_byte: u8,
    },
    /// The transport accepted only part of the frame
    WriteIncomplete {
        /// Bytes accepted
        written: usize,
        /// Frame length
        expected: usize,
    },
    /// Cancelled through the [`CancelToken`]
    Cancelled,
}

impl From<ResponseClass> for TransactionOutcome {
    fn from(class: ResponseClass) -> Self {
        match class {
            ResponseClass::Success { status } => TransactionOutcome::Success { status },
            ResponseClass::DeviceRejected { code } => TransactionOutcome::DeviceRejected { code },
            ResponseClass::Timeout => TransactionOutcome::Timeout,
            ResponseClass::ShortRead { received, expected } => {
                TransactionOutcome::ShortRead { received, expected }
            }
            ResponseClass::DeviceMute { first_byte } => {
                TransactionOutcome::DeviceMute { first_byte }
            }
        }
    }
}

/// Everything observed during one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    /// Opcode the caller asked for
    pub requested: Opcode,
    /// Opcode that went on the wire, if anything was sent
    pub sent: Option<Opcode>,
    /// How it ended
    pub outcome: TransactionOutcome,
    /// Raw response bytes
    pub response: Vec<u8>,
    /// Diagnostic only; never turns a success into a failure
    pub checksum_mismatch: Option<ChecksumMismatch>,
    /// Reported by a successful GETVERSION
    pub firmware_version: Option<u8>,
    /// Read attempts made by the poll loop
    pub attempts: u32,
}

impl TransactionResult {
    fn without_response(requested: Opcode, sent: Option<Opcode>, outcome: TransactionOutcome) -> Self {
        Self {
            requested,
            sent,
            outcome,
            response: Vec::new(),
            checksum_mismatch: None,
            firmware_version: None,
            attempts: 0,
        }
    }

    /// Success or nothing to do
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            TransactionOutcome::Success { .. } | TransactionOutcome::NoOp
        )
    }

    /// Whether the encoder substituted another opcode
    pub fn is_retargeted(&self) -> bool {
        self.sent.is_some_and(|sent| sent != self.requested)
    }

    /// Status byte on success, `None` for a no-op, error otherwise
    pub fn into_status(self) -> Result<Option<u8>, ProtocolError> {
        let opcode = self.sent.unwrap_or(self.requested);
        match self.outcome {
            TransactionOutcome::NoOp => Ok(None),
            TransactionOutcome::Success { status } => Ok(Some(status)),
            TransactionOutcome::DeviceRejected { code } => {
                Err(ProtocolError::DeviceRejected { opcode, code })
            }
            TransactionOutcome::Timeout => Err(ProtocolError::Timeout),
            TransactionOutcome::ShortRead { received, expected } => {
                Err(ProtocolError::ShortRead { received, expected })
            }
            TransactionOutcome::DeviceMute { first_byte } => {
                Err(ProtocolError::DeviceMute { opcode, first_byte })
            }
            TransactionOutcome::WriteIncomplete { written, expected } => {
                Err(ProtocolError::WriteIncomplete { written, expected })
            }
            TransactionOutcome::Cancelled => Err(ProtocolError::Cancelled),
        }
    }
}

/// One request/response exchange
#[derive(Debug, Clone)]
pub struct Transaction {
    opcode: Opcode,
    settle: Duration,
    cancel: Option<CancelToken>,
}

impl Transaction {
    /// Transaction for `opcode` with no settle delay
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            settle: Duration::ZERO,
            cancel: None,
        }
    }

    /// Wait this long after writing before polling for the reply
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Abort the poll when `token` is cancelled
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run the transaction against `channel` over `transport`.
    ///
    /// Encoding errors and transport write errors are returned as `Err`;
    /// every device-level result is a [`TransactionOutcome`].
    pub fn run<T: Transport + ?Sized>(
        &self,
        channel: &mut DeviceParameters,
        transport: &mut T,
        policy: &PollPolicy,
    ) -> Result<TransactionResult, ProtocolError> {
        let opcode = self.opcode;
        let frame = match encode(opcode, channel)? {
            EncodeOutcome::NoOp => {
                tracing::debug!(?opcode, "nothing to send");
                return Ok(TransactionResult::without_response(
                    opcode,
                    None,
                    TransactionOutcome::NoOp,
                ));
            }
            EncodeOutcome::Frame(frame) => frame,
            EncodeOutcome::Retargeted { requested, frame } => {
                tracing::info!(?requested, sent = ?frame.opcode(), "opcode re-targeted");
                frame
            }
        };
        let sent = Some(frame.opcode());

        transport.pause(Duration::from_millis(policy.pre_write_delay_ms));
        tracing::debug!(?opcode, bytes = ?frame.as_bytes(), "-> frame");
        let written = transport.write(frame.as_bytes())?;
        if written < frame.len() {
            tracing::warn!(?opcode, written, expected = frame.len(), "write incomplete");
            return Ok(TransactionResult::without_response(
                opcode,
                sent,
                TransactionOutcome::WriteIncomplete {
                    written,
                    expected: frame.len(),
                },
            ));
        }

        transport.pause(self.settle);

        let poll = self.poll(opcode, transport, policy);
        if poll.cancelled {
            tracing::warn!(?opcode, attempts = poll.attempts, "poll cancelled");
            let mut result =
                TransactionResult::without_response(opcode, sent, TransactionOutcome::Cancelled);
            result.response = poll.response;
            result.attempts = poll.attempts;
            return Ok(result);
        }

        let class = decoder::classify(opcode, &poll.response);
        tracing::debug!(?opcode, response = ?poll.response, ?class, "<- response");

        let mut result = TransactionResult {
            requested: opcode,
            sent,
            outcome: class.into(),
            response: Vec::new(),
            checksum_mismatch: None,
            firmware_version: None,
            attempts: poll.attempts,
        };

        if let ResponseClass::Success { .. } = class {
            result.checksum_mismatch = decoder::verify_checksum(opcode, &poll.response);
            if let Some(mismatch) = result.checksum_mismatch {
                tracing::debug!(
                    ?opcode,
                    computed = mismatch.computed,
                    received = mismatch.received,
                    "response checksum mismatch"
                );
            }

            if opcode == Opcode::GetVersion {
                if let Some(version) = decoder::firmware_version(&poll.response) {
                    tracing::info!(version, "JetDrive firmware version");
                    channel.firmware_version = version;
                    result.firmware_version = Some(version);
                }
            }
        }

        result.response = poll.response;
        Ok(result)
    }

    /// Poll until the reply starts with ACK/NAK, then top it up to full length
    fn poll<T: Transport + ?Sized>(
        &self,
        opcode: Opcode,
        transport: &mut T,
        policy: &PollPolicy,
    ) -> Poll {
        let expected = opcode.response_len();
        let started = Instant::now();
        let mut poll = Poll::default();
        let mut terminated = false;

        loop {
            if self.is_cancelled() {
                poll.cancelled = true;
                return poll;
            }
            if policy.exhausted(poll.attempts, started) {
                break;
            }

            transport.pause(policy.interval());
            poll.attempts += 1;

            let wanted = if terminated {
                expected - poll.response.len()
            } else {
                expected
            };
            let chunk = match transport.read(wanted, policy.read_timeout()) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(?opcode, error = %e, "read failed");
                    if !terminated {
                        poll.response.clear();
                    }
                    break;
                }
            };

            if terminated {
                if chunk.is_empty() {
                    break;
                }
                poll.response.extend_from_slice(&chunk);
            } else if let Some(&first) = chunk.first() {
                terminated = decoder::is_terminator(first);
                poll.response = chunk;
            }

            if terminated && poll.response.len() >= expected {
                break;
            }
        }

        poll
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

#[derive(Debug, Default)]
struct Poll {
    response: Vec<u8>,
    attempts: u32,
    cancelled: bool,
}

/// Run a single transaction with no settle delay
pub fn transact<T: Transport + ?Sized>(
    opcode: Opcode,
    channel: &mut DeviceParameters,
    transport: &mut T,
    policy: &PollPolicy,
) -> Result<TransactionResult, ProtocolError> {
    Transaction::new(opcode).run(channel, transport, policy)
}
