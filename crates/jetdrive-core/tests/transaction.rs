//! Transactions against a scripted transport

mod common;

use common::{ack, nak, MockTransport};
use jetdrive_core::protocol::{
    transact, CancelToken, DeviceParameters, Opcode, PollPolicy, ProtocolError, Transaction,
    TransactionOutcome,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn policy() -> PollPolicy {
    PollPolicy::immediate(5)
}

#[test]
fn test_nocommand_never_touches_transport() {
    let mut mock = MockTransport::new();
    let mut params = DeviceParameters::default();

    let result = transact(Opcode::NoCommand, &mut params, &mut mock, &policy()).expect("ok");

    assert_eq!(result.outcome, TransactionOutcome::NoOp);
    assert!(result.is_success());
    assert!(mock.writes.is_empty());
    assert!(mock.pauses.is_empty());
    assert_eq!(mock.reads, 0);
}

#[test]
fn test_ack_reply_is_success() {
    let mut mock = MockTransport::with_chunks(vec![vec![0x06, 0x02, 0x07, 0x00]]);
    let mut params = DeviceParameters::default();

    let result = transact(Opcode::Drops, &mut params, &mut mock, &policy()).expect("ok");

    assert_eq!(result.outcome, TransactionOutcome::Success { status: 0x07 });
    assert_eq!(result.sent, Some(Opcode::Drops));
    // Mismatched checksum is reported but does not fail the transaction
    assert!(result.checksum_mismatch.is_some());
    assert_eq!(mock.writes, vec![vec![b'S', 0x03, 0x03, 0x01, 0x07]]);
}

#[test]
fn test_nak_reply_is_rejected() {
    let mut mock = MockTransport::with_chunks(vec![nak()]);
    let mut params = DeviceParameters::default();

    let result = transact(Opcode::Reset, &mut params, &mut mock, &policy()).expect("ok");

    assert_eq!(result.outcome, TransactionOutcome::DeviceRejected { code: -0x15 });
    assert!(matches!(
        result.into_status(),
        Err(ProtocolError::DeviceRejected {
            opcode: Opcode::Reset,
            code: -0x15
        })
    ));
}

#[test]
fn test_silent_transport_times_out_after_bound() {
    let mut mock = MockTransport::new();
    let mut params = DeviceParameters::default();

    let result = transact(Opcode::PollStatus, &mut params, &mut mock, &policy()).expect("ok");

    assert_eq!(result.outcome, TransactionOutcome::Timeout);
    assert_eq!(result.attempts, 5);
    assert_eq!(mock.reads, 5);
}

#[test]
fn test_polls_until_terminator() {
    let mut mock = MockTransport::new();
    mock.push_silence(2);
    mock.push(ack(0));
    let mut params = DeviceParameters::default();

    let result = transact(Opcode::PollStatus, &mut params, &mut mock, &policy()).expect("ok");

    assert_eq!(result.outcome, TransactionOutcome::Success { status: 0 });
    assert_eq!(result.attempts, 3);
    assert_eq!(result.checksum_mismatch, None);
}

#[test]
fn test_split_reply_is_topped_up() {
    let mut mock = MockTransport::with_chunks(vec![vec![0x06, 0x02], vec![0x05, 0x07]]);
    let mut params = DeviceParameters::default();

    let result = transact(Opcode::SoftTrigger, &mut params, &mut mock, &policy()).expect("ok");

    assert_eq!(result.outcome, TransactionOutcome::Success { status: 0x05 });
    assert_eq!(result.response, vec![0x06, 0x02, 0x05, 0x07]);
}

#[test]
fn test_truncated_reply_is_short_read() {
    let mut mock = MockTransport::with_chunks(vec![vec![0x06, 0x02]]);
    let mut params = DeviceParameters::default();

    let result = transact(Opcode::SoftTrigger, &mut params, &mut mock, &policy()).expect("ok");

    assert_eq!(
        result.outcome,
        TransactionOutcome::ShortRead {
            received: 2,
            expected: 4
        }
    );
}

#[test]
fn test_garbage_reply_is_mute() {
    let mut mock = MockTransport::with_chunks(vec![vec![0x3E, 0x00, 0x00, 0x00]]);
    let mut params = DeviceParameters::default();

    let result = transact(Opcode::Source, &mut params, &mut mock, &policy()).expect("ok");

    assert_eq!(result.outcome, TransactionOutcome::DeviceMute { first_byte: 0x3E });
}

#[test]
fn test_read_failure_is_timeout() {
    let mut mock = MockTransport::new();
    mock.push_error();
    let mut params = DeviceParameters::default();

    let result = transact(Opcode::Source, &mut params, &mut mock, &policy()).expect("ok");

    assert_eq!(result.outcome, TransactionOutcome::Timeout);
    assert_eq!(mock.reads, 1);
}

#[test]
fn test_short_write_is_reported() {
    let mut mock = MockTransport::new();
    mock.short_write = Some(2);
    let mut params = DeviceParameters::default();

    let result = transact(Opcode::Drops, &mut params, &mut mock, &policy()).expect("ok");

    assert_eq!(
        result.outcome,
        TransactionOutcome::WriteIncomplete {
            written: 2,
            expected: 5
        }
    );
    assert_eq!(mock.reads, 0);
}

#[test]
fn test_write_error_is_returned() {
    let mut mock = MockTransport::new();
    mock.fail_on_send = true;
    let mut params = DeviceParameters::default();

    let err = transact(Opcode::Drops, &mut params, &mut mock, &policy()).expect_err("fails");
    assert!(matches!(err, ProtocolError::SerialError(_)));
}

#[test]
fn test_encode_error_precedes_io() {
    let mut mock = MockTransport::new();
    let mut params = DeviceParameters::default();
    params.set_frequency(70_000);

    let err = transact(Opcode::FullFreq, &mut params, &mut mock, &policy()).expect_err("fails");
    assert!(matches!(err, ProtocolError::Encode(_)));
    assert!(mock.writes.is_empty());
    assert!(mock.pauses.is_empty());
}

#[test]
fn test_getversion_updates_firmware_version() {
    let mut mock = MockTransport::with_chunks(vec![vec![0x06, 0x03, 0x00, 0x00, 52]]);
    let mut params = DeviceParameters::default();

    let result = transact(Opcode::GetVersion, &mut params, &mut mock, &policy()).expect("ok");

    assert_eq!(result.firmware_version, Some(52));
    assert_eq!(params.firmware_version, 52);
}

#[test]
fn test_retargeted_frequency_is_visible() {
    let mut mock = MockTransport::with_chunks(vec![ack(0)]);
    let mut params = DeviceParameters {
        firmware_version: 50,
        ..DeviceParameters::default()
    };
    params.set_frequency(100);

    let result = transact(Opcode::Frequency, &mut params, &mut mock, &policy()).expect("ok");

    assert!(result.is_retargeted());
    assert_eq!(result.requested, Opcode::Frequency);
    assert_eq!(result.sent, Some(Opcode::LowFreq));
}

#[test]
fn test_settle_and_guard_delays() {
    let mut mock = MockTransport::with_chunks(vec![ack(0)]);
    let mut params = DeviceParameters::default();
    let policy = PollPolicy {
        interval_ms: 100,
        pre_write_delay_ms: 50,
        ..PollPolicy::immediate(5)
    };

    Transaction::new(Opcode::Reset)
        .settle(Duration::from_secs(3))
        .run(&mut params, &mut mock, &policy)
        .expect("ok");

    assert_eq!(
        mock.pauses,
        vec![
            Duration::from_millis(50),
            Duration::from_secs(3),
            Duration::from_millis(100),
        ]
    );
}

#[test]
fn test_cancelled_poll() {
    let mut mock = MockTransport::new();
    let mut params = DeviceParameters::default();
    let token = CancelToken::new();
    token.cancel();

    let result = Transaction::new(Opcode::PollStatus)
        .cancel_token(token)
        .run(&mut params, &mut mock, &PollPolicy::unbounded())
        .expect("ok");

    assert_eq!(result.outcome, TransactionOutcome::Cancelled);
    assert_eq!(mock.reads, 0);
    assert_eq!(mock.writes.len(), 1);
}
