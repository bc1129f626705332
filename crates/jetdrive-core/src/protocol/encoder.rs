//! Frame encoder
//!
//! Turns an opcode plus the parameter state of one channel into a command
//! frame. Encoding is pure: no I/O, no mutation of the parameters.
//!
//! Two opcodes can leave the wire under a different opcode than requested:
//! - `FREQUENCY` falls back to `LOWFREQ` when the divisor no longer fits
//!   12 bits
//! - `EXTERNENABLE` is sent as `SOURCE` on single-channel drives
//!
//! Both are reported as [`EncodeOutcome::Retargeted`].

use super::{
    DeviceParameters, EncodeError, Frame, FrameBuilder, Opcode, FREQUENCY_BASE_HZ,
    LOWFREQ_MIN_FIRMWARE, MAX_DIVISOR, SLEW_RATE_LIMIT,
};

/// Voltage magnitude above which the compact waveform layout cannot be used
const COMPACT_VOLTAGE_LIMIT: i16 = 100;
/// Transition time (µs) above which the compact waveform layout cannot be used
const COMPACT_TRANSITION_LIMIT: f64 = 0.11;
/// Bias added before truncating times to 0.1 µs units
const TIME_ROUNDING_BIAS: f64 = 0.001;
/// STROBEDELAY prefix that keeps the delay potentiometer powered
const STROBE_POT_ON: u8 = 0x01;
const POKE_PAYLOAD: [u8; 3] = [0x40, 0x07, 0x0D];

/// Result of encoding one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// Frame for the requested opcode
    Frame(Frame),
    /// Frame was re-targeted to another opcode
    Retargeted {
        /// Opcode the caller asked for
        requested: Opcode,
        /// Frame carrying the substitute opcode
        frame: Frame,
    },
    /// Nothing to send; this is not an error
    NoOp,
}

impl EncodeOutcome {
    /// The frame to transmit, if any
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            EncodeOutcome::Frame(frame) | EncodeOutcome::Retargeted { frame, .. } => Some(frame),
            EncodeOutcome::NoOp => None,
        }
    }

    /// Owned variant of [`EncodeOutcome::frame`]
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            EncodeOutcome::Frame(frame) | EncodeOutcome::Retargeted { frame, .. } => Some(frame),
            EncodeOutcome::NoOp => None,
        }
    }

    /// Whether nothing needs to be sent
    pub fn is_noop(&self) -> bool {
        matches!(self, EncodeOutcome::NoOp)
    }
}

/// Encode a raw opcode byte
pub fn encode_raw(code: u8, params: &DeviceParameters) -> Result<EncodeOutcome, EncodeError> {
    encode(Opcode::try_from(code)?, params)
}

/// Encode `opcode` using the current channel parameters
pub fn encode(opcode: Opcode, params: &DeviceParameters) -> Result<EncodeOutcome, EncodeError> {
    let caps = &params.capabilities;
    let frequency = params.effective_frequency();

    let frame = match opcode {
        Opcode::NoCommand => return Ok(EncodeOutcome::NoOp),

        Opcode::Reset
        | Opcode::PollStatus
        | Opcode::SoftTrigger
        | Opcode::MultiTrigger
        | Opcode::GetVersion
        | Opcode::DumpInput => FrameBuilder::new(opcode).build(),

        Opcode::Drops => {
            if caps.extended_controller || params.drops > 0xFF {
                FrameBuilder::new(opcode).u16_be(params.drops).build()
            } else {
                FrameBuilder::new(opcode).byte(params.drops as u8).build()
            }
        }

        Opcode::ContMode => FrameBuilder::new(opcode)
            .flag(params.is_continuous())
            .build(),

        Opcode::Frequency => {
            let mut divisor = frequency_divisor(frequency);
            if params.firmware_version < LOWFREQ_MIN_FIRMWARE {
                divisor = divisor.min(MAX_DIVISOR);
            }
            if divisor <= MAX_DIVISOR {
                FrameBuilder::new(opcode).u16_be(divisor as u16).build()
            } else {
                let frame = FrameBuilder::new(Opcode::LowFreq)
                    .byte((frequency & 0xFF) as u8)
                    .build();
                return Ok(EncodeOutcome::Retargeted {
                    requested: opcode,
                    frame,
                });
            }
        }

        Opcode::Pulse => encode_pulse(params),

        Opcode::StrobeDiv => FrameBuilder::new(opcode)
            .byte((params.strobe_div & 0xFF) as u8)
            .build(),

        Opcode::Source => {
            let on = if caps.multi_channel {
                params.channel_on
            } else {
                params.is_external_source()
            };
            FrameBuilder::new(opcode).flag(on).build()
        }

        Opcode::ExternEnable => {
            if caps.multi_channel {
                FrameBuilder::new(opcode).flag(params.extern_enable).build()
            } else {
                let frame = FrameBuilder::new(Opcode::Source)
                    .flag(params.extern_enable)
                    .build();
                return Ok(EncodeOutcome::Retargeted {
                    requested: opcode,
                    frame,
                });
            }
        }

        Opcode::EditChannel => {
            if !caps.multi_channel {
                return Ok(EncodeOutcome::NoOp);
            }
            FrameBuilder::new(opcode).byte(params.channel_group).build()
        }

        Opcode::StrobeEnable => FrameBuilder::new(opcode).flag(params.strobe_enable).build(),

        Opcode::LowFreq => {
            if frequency >= 256 {
                return Err(EncodeError::NotRepresentable {
                    opcode,
                    reason: "LOWFREQ requires a frequency below 256 Hz",
                });
            }
            if params.firmware_version < LOWFREQ_MIN_FIRMWARE {
                return Err(EncodeError::NotRepresentable {
                    opcode,
                    reason: "LOWFREQ requires firmware version 40 or later",
                });
            }
            FrameBuilder::new(opcode).byte(frequency as u8).build()
        }

        Opcode::FullFreq => {
            if frequency > u32::from(u16::MAX) {
                return Err(EncodeError::NotRepresentable {
                    opcode,
                    reason: "FULLFREQ requires a frequency below 65536 Hz",
                });
            }
            FrameBuilder::new(opcode).u16_be(frequency as u16).build()
        }

        Opcode::StrobeDelay => FrameBuilder::new(opcode)
            .byte(STROBE_POT_ON)
            .i16_be(params.strobe_delay)
            .build(),

        Opcode::Debug => FrameBuilder::new(opcode)
            .byte((params.debug_switch & 0xFF) as u8)
            .byte((params.debug_value & 0xFF) as u8)
            .build(),

        Opcode::Poke => FrameBuilder::new(opcode).bytes(&POKE_PAYLOAD).build(),
    };

    Ok(EncodeOutcome::Frame(frame))
}

/// Divisor of the base clock for `frequency`, never below 1
pub fn frequency_divisor(frequency: u32) -> u32 {
    let divisor = (FREQUENCY_BASE_HZ / f64::from(frequency.max(1)) - 0.5) as u32;
    divisor.max(1)
}

/// Whether the waveform needs the extended PULSE layout
pub fn needs_extended_pulse(params: &DeviceParameters) -> bool {
    let w = &params.waveform;
    params.capabilities.extended_controller
        || w.idle_voltage.unsigned_abs() > COMPACT_VOLTAGE_LIMIT as u16
        || w.dwell_voltage.unsigned_abs() > COMPACT_VOLTAGE_LIMIT as u16
        || w.echo_voltage.unsigned_abs() > COMPACT_VOLTAGE_LIMIT as u16
        || w.rise_time > COMPACT_TRANSITION_LIMIT
        || w.fall_time > COMPACT_TRANSITION_LIMIT
        || w.final_time > COMPACT_TRANSITION_LIMIT
}

/// Time in 0.1 µs units
fn tenths(time_us: f64) -> i32 {
    (time_us * 10.0 + TIME_ROUNDING_BIAS) as i32
}

/// Shortest transition (0.1 µs units) the output stage can slew across `from → to`
fn min_transition(from: i16, to: i16) -> i32 {
    let delta = (f64::from(to) - f64::from(from)).abs();
    (delta / SLEW_RATE_LIMIT * 10.0) as i32 + 10
}

fn encode_pulse(params: &DeviceParameters) -> Frame {
    let w = &params.waveform;
    let dwell = tenths(w.dwell_time) as u16;
    let echo = tenths(w.echo_time) as u16;

    if needs_extended_pulse(params) {
        let rise = tenths(w.rise_time).max(min_transition(w.idle_voltage, w.dwell_voltage));
        let fall = tenths(w.fall_time).max(min_transition(w.dwell_voltage, w.echo_voltage));
        let last = tenths(w.final_time).max(min_transition(w.echo_voltage, w.idle_voltage));

        // Bytes 3, 4 and 7 hold the compact-only voltages and stay zero
        FrameBuilder::new(Opcode::Pulse)
            .bytes(&[0x00, 0x00])
            .u16_be(dwell)
            .byte(0x00)
            .u16_be(echo)
            .i16_be(w.idle_voltage)
            .i16_be(w.dwell_voltage)
            .i16_be(w.echo_voltage)
            .u16_be(rise as u16)
            .u16_be(fall as u16)
            .u16_be(last as u16)
            .build()
    } else {
        let builder = FrameBuilder::new(Opcode::Pulse)
            .byte(w.idle_voltage as u8)
            .byte(w.dwell_voltage as u8)
            .u16_be(dwell);

        let echo_reverses = (i32::from(w.echo_voltage) - i32::from(w.idle_voltage))
            * (i32::from(w.dwell_voltage) - i32::from(w.idle_voltage))
            < 0;
        if echo_reverses {
            builder.byte(w.echo_voltage as u8).u16_be(echo).build()
        } else {
            builder.build()
        }
    }
}
