//! Frame encoding properties

use jetdrive_core::protocol::encoder::frequency_divisor;
use jetdrive_core::protocol::{
    encode, encode_raw, Capabilities, DeviceParameters, EncodeError, EncodeOutcome, Frame,
    Opcode, TriggerMode, TriggerSource, Waveform,
};
use pretty_assertions::assert_eq;

fn params_with_firmware(version: u8) -> DeviceParameters {
    DeviceParameters {
        firmware_version: version,
        ..DeviceParameters::default()
    }
}

fn frame_of(opcode: Opcode, params: &DeviceParameters) -> Frame {
    encode(opcode, params)
        .expect("encodes")
        .into_frame()
        .expect("has a frame")
}

#[test]
fn test_frequency_scenario_1000_hz() {
    let params = params_with_firmware(50);
    let frame = frame_of(Opcode::Frequency, &params);

    assert_eq!(frame.opcode(), Opcode::Frequency);
    assert_eq!(frame.payload(), &[0x02, 0x70]);
    assert_eq!(frame.as_bytes(), &[b'S', 0x04, 0x05, 0x02, 0x70, 0x7B]);
}

#[test]
fn test_frequency_divisor_or_lowfreq_over_range() {
    for frequency in 1..=4094u32 {
        let mut params = params_with_firmware(50);
        params.set_frequency(frequency);
        let divisor = frequency_divisor(frequency);
        let outcome = encode(Opcode::Frequency, &params).expect("encodes");

        if divisor <= 4095 {
            let frame = outcome.into_frame().expect("frame");
            assert_eq!(frame.opcode(), Opcode::Frequency, "frequency {}", frequency);
            assert_eq!(frame.payload(), &(divisor as u16).to_be_bytes());
        } else {
            match outcome {
                EncodeOutcome::Retargeted { requested, frame } => {
                    assert_eq!(requested, Opcode::Frequency);
                    assert_eq!(frame.opcode(), Opcode::LowFreq);
                    assert_eq!(frame.payload(), &[(frequency & 0xFF) as u8]);
                }
                other => panic!("frequency {} not re-targeted: {:?}", frequency, other),
            }
        }
    }
}

#[test]
fn test_lowfreq_boundary() {
    let mut params = params_with_firmware(50);
    params.set_frequency(153);
    assert_eq!(frame_of(Opcode::Frequency, &params).opcode(), Opcode::Frequency);

    params.set_frequency(152);
    assert_eq!(frame_of(Opcode::Frequency, &params).opcode(), Opcode::LowFreq);
}

#[test]
fn test_old_firmware_clamps_divisor() {
    let mut params = params_with_firmware(30);
    params.set_frequency(10);
    let frame = frame_of(Opcode::Frequency, &params);
    assert_eq!(frame.opcode(), Opcode::Frequency);
    assert_eq!(frame.payload(), &[0x0F, 0xFF]);
}

#[test]
fn test_zero_frequency_is_clamped() {
    let mut params = params_with_firmware(50);
    params.frequency = 0;
    let frame = frame_of(Opcode::FullFreq, &params);
    assert_eq!(frame.payload(), &[0x00, 0x01]);
}

#[test]
fn test_drops_lengths() {
    let mut params = DeviceParameters::default();
    for drops in 0..=255u16 {
        params.drops = drops;
        let frame = frame_of(Opcode::Drops, &params);
        assert_eq!(frame.payload(), &[drops as u8]);
        assert_eq!(frame.length_byte(), 3);
    }

    params.drops = 0x0102;
    let frame = frame_of(Opcode::Drops, &params);
    assert_eq!(frame.payload(), &[0x01, 0x02]);
    assert_eq!(frame.length_byte(), 4);
}

#[test]
fn test_extended_controller_always_sends_two_byte_drops() {
    let mut params = DeviceParameters::with_capabilities(Capabilities {
        extended_controller: true,
        ..Capabilities::default()
    });
    params.drops = 7;
    assert_eq!(frame_of(Opcode::Drops, &params).payload(), &[0x00, 0x07]);
}

#[test]
fn test_pulse_is_idempotent() {
    let mut params = DeviceParameters::default();
    params.waveform = Waveform {
        dwell_time: 17.3,
        echo_voltage: -45,
        ..Waveform::default()
    };
    assert_eq!(
        frame_of(Opcode::Pulse, &params),
        frame_of(Opcode::Pulse, &params)
    );
}

#[test]
fn test_default_pulse_uses_extended_layout() {
    let frame = frame_of(Opcode::Pulse, &DeviceParameters::default());
    assert_eq!(
        frame.payload(),
        &[
            0x00, 0x00, // unused
            0x00, 0xC8, // dwell 20.0 µs
            0x00, // unused
            0x01, 0x90, // echo 40.0 µs
            0x00, 0x00, // idle 0 V
            0x00, 0x14, // dwell 20 V
            0xFF, 0xEC, // echo -20 V
            0x00, 0x1E, // rise 3.0 µs
            0x00, 0x1E, // fall 3.0 µs
            0x00, 0x1E, // final 3.0 µs
        ]
    );
    assert_eq!(frame.length_byte(), 21);
}

#[test]
fn test_high_voltage_forces_extended_layout_with_slew_minimum() {
    let mut params = DeviceParameters::default();
    params.waveform = Waveform {
        rise_time: 0.1,
        fall_time: 0.1,
        final_time: 0.1,
        dwell_voltage: 150,
        ..Waveform::default()
    };
    let frame = frame_of(Opcode::Pulse, &params);
    assert_eq!(
        frame.payload(),
        &[
            0x00, 0x00, // unused
            0x00, 0xC8, // dwell 20.0 µs
            0x00, // unused
            0x01, 0x90, // echo 40.0 µs
            0x00, 0x00, // idle 0 V
            0x00, 0x96, // dwell 150 V
            0xFF, 0xEC, // echo -20 V
            0x00, 0x3C, // rise raised to 6.0 µs (0 → 150 V)
            0x00, 0x42, // fall raised to 6.6 µs (150 → -20 V)
            0x00, 0x10, // final raised to 1.6 µs (-20 → 0 V)
        ]
    );
}

#[test]
fn test_compact_pulse_with_reversed_echo() {
    let mut params = DeviceParameters::default();
    params.waveform = Waveform {
        rise_time: 0.1,
        fall_time: 0.1,
        final_time: 0.1,
        ..Waveform::default()
    };
    let frame = frame_of(Opcode::Pulse, &params);
    assert_eq!(frame.payload(), &[0x00, 0x14, 0x00, 0xC8, 0xEC, 0x01, 0x90]);

    params.waveform.echo_voltage = 10;
    let frame = frame_of(Opcode::Pulse, &params);
    assert_eq!(frame.payload(), &[0x00, 0x14, 0x00, 0xC8]);
}

#[test]
fn test_checksum_holds_for_every_frame() {
    let mut params = params_with_firmware(50);
    params.capabilities.multi_channel = true;
    params.set_frequency(100);

    for opcode in Opcode::ALL {
        let Ok(outcome) = encode(opcode, &params) else {
            continue;
        };
        let Some(frame) = outcome.frame() else {
            continue;
        };
        let bytes = frame.as_bytes();
        let last = bytes.len() - 1;
        let sum = bytes[1..last].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        assert_eq!(sum, bytes[last], "{:?}", opcode);
        assert_eq!(usize::from(frame.length_byte()), bytes.len() - 2, "{:?}", opcode);
    }
}

#[test]
fn test_nocommand_is_noop() {
    assert_eq!(
        encode(Opcode::NoCommand, &DeviceParameters::default()),
        Ok(EncodeOutcome::NoOp)
    );
}

#[test]
fn test_editchannel_needs_multi_channel() {
    let mut params = DeviceParameters::default();
    params.channel_group = 2;
    assert!(encode(Opcode::EditChannel, &params).expect("ok").is_noop());

    params.capabilities.multi_channel = true;
    assert_eq!(frame_of(Opcode::EditChannel, &params).payload(), &[2]);
}

#[test]
fn test_extern_enable_retargets_on_single_channel() {
    let mut params = DeviceParameters::default();
    params.extern_enable = true;

    match encode(Opcode::ExternEnable, &params).expect("ok") {
        EncodeOutcome::Retargeted { requested, frame } => {
            assert_eq!(requested, Opcode::ExternEnable);
            assert_eq!(frame.opcode(), Opcode::Source);
            assert_eq!(frame.payload(), &[1]);
        }
        other => panic!("expected re-target, got {:?}", other),
    }

    params.capabilities.multi_channel = true;
    assert_eq!(frame_of(Opcode::ExternEnable, &params).opcode(), Opcode::ExternEnable);
}

#[test]
fn test_not_representable() {
    let mut params = params_with_firmware(30);
    params.set_frequency(100);
    assert!(matches!(
        encode(Opcode::LowFreq, &params),
        Err(EncodeError::NotRepresentable {
            opcode: Opcode::LowFreq,
            ..
        })
    ));

    params.firmware_version = 50;
    params.set_frequency(300);
    assert!(encode(Opcode::LowFreq, &params).is_err());

    params.set_frequency(65_536);
    assert!(matches!(
        encode(Opcode::FullFreq, &params),
        Err(EncodeError::NotRepresentable {
            opcode: Opcode::FullFreq,
            ..
        })
    ));
}

#[test]
fn test_unknown_raw_opcode() {
    assert_eq!(
        encode_raw(0x0A, &DeviceParameters::default()),
        Err(EncodeError::UnknownOpcode(0x0A))
    );
    assert!(encode_raw(0x01, &DeviceParameters::default()).is_ok());
}

#[test]
fn test_strobe_delay_and_poke_payloads() {
    let mut params = DeviceParameters::default();
    params.strobe_delay = -2;
    assert_eq!(frame_of(Opcode::StrobeDelay, &params).payload(), &[0x01, 0xFF, 0xFE]);
    assert_eq!(frame_of(Opcode::Poke, &params).payload(), &[0x40, 0x07, 0x0D]);
}

#[test]
fn test_single_byte_payloads() {
    let mut params = DeviceParameters::default();
    params.mode = TriggerMode::Continuous;
    params.strobe_div = 0x0105;
    params.strobe_enable = false;
    params.debug_switch = 3;
    params.debug_value = 0x01FF;

    assert_eq!(frame_of(Opcode::ContMode, &params).payload(), &[0x01]);
    assert_eq!(frame_of(Opcode::StrobeDiv, &params).payload(), &[0x05]);
    assert_eq!(frame_of(Opcode::StrobeEnable, &params).payload(), &[0x00]);
    assert_eq!(frame_of(Opcode::Debug, &params).payload(), &[0x03, 0xFF]);

    params.mode = TriggerMode::Single;
    params.strobe_enable = true;
    assert_eq!(frame_of(Opcode::ContMode, &params).payload(), &[0x00]);
    assert_eq!(frame_of(Opcode::StrobeEnable, &params).payload(), &[0x01]);
}

#[test]
fn test_source_payload_depends_on_channel_mode() {
    let mut params = DeviceParameters::default();
    params.source = TriggerSource::Internal;
    params.channel_on = true;
    assert_eq!(frame_of(Opcode::Source, &params).payload(), &[0x00]);

    params.capabilities.multi_channel = true;
    assert_eq!(frame_of(Opcode::Source, &params).payload(), &[0x01]);

    params.channel_on = false;
    params.source = TriggerSource::External;
    assert_eq!(frame_of(Opcode::Source, &params).payload(), &[0x00]);
}
