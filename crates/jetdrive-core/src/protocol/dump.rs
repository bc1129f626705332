//! DUMPINPUT register readback
//!
//! The board answers `DUMPINPUT` with the values it is actually running.
//! Times come back in whole microseconds and the frequency as a 24-bit pulse
//! interval, so comparisons against the host's parameters need tolerances.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use super::{DeviceParameters, Opcode, TriggerMode, TriggerSource, ACK};

const STATUS_JETTING: u8 = 0x01;
const STATUS_CONTINUOUS: u8 = 0x02;
const STATUS_EXTERNAL: u8 = 0x04;
const STATUS_STROBE: u8 = 0x08;

/// Allowed difference between programmed and reported times (µs)
const TIME_TOLERANCE_US: f64 = 0.51;

/// Errors decoding a DUMPINPUT reply
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DumpError {
    /// Fewer than 29 bytes
    #[error("Dump too short: got {received} of {expected} bytes")]
    TooShort {
        /// Bytes received
        received: usize,
        /// Bytes required
        expected: usize,
    },

    /// First byte was not ACK
    #[error("Dump does not start with ACK (got {0:#04x})")]
    NotAcknowledged(u8),
}

/// Decoded DUMPINPUT reply
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDump {
    /// Volts
    pub idle_voltage: i16,
    /// Volts
    pub dwell_voltage: i16,
    /// Volts
    pub echo_voltage: i16,
    /// Whole microseconds
    pub rise_time: u16,
    /// Whole microseconds
    pub dwell_time: u16,
    /// Whole microseconds
    pub fall_time: u16,
    /// Whole microseconds
    pub echo_time: u16,
    /// Whole microseconds
    pub final_time: u16,
    /// Drops per trigger
    pub drops: u16,
    /// Strobe divider, low byte
    pub strobe_div: u8,
    /// Pulse repetition interval (µs)
    pub interval_us: u32,
    /// Strobe delay (µs)
    pub strobe_delay: i16,
    /// Continuous jetting is running
    pub jetting: bool,
    /// Trigger mode
    pub mode: TriggerMode,
    /// Trigger source
    pub source: TriggerSource,
    /// Strobe output on
    pub strobe_enable: bool,
    /// Firmware version
    pub firmware_version: u8,
}

/// A field whose reported value disagrees with the host's parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DumpField {
    /// Idle voltage
    IdleVoltage,
    /// Rise time
    RiseTime,
    /// Dwell voltage
    DwellVoltage,
    /// Dwell time
    DwellTime,
    /// Fall time
    FallTime,
    /// Echo voltage
    EchoVoltage,
    /// Echo time
    EchoTime,
    /// Final time
    FinalTime,
    /// Drop count
    Drops,
    /// Strobe divider
    StrobeDiv,
    /// Pulse interval
    Frequency,
    /// Strobe delay
    StrobeDelay,
    /// Jetting state
    Jetting,
    /// Trigger mode
    Mode,
    /// Trigger source
    Source,
    /// Strobe enable
    StrobeEnable,
    /// Firmware version
    FirmwareVersion,
}

impl DeviceDump {
    /// Decode a full DUMPINPUT response
    pub fn parse(response: &[u8]) -> Result<Self, DumpError> {
        let expected = Opcode::DumpInput.response_len();
        if response.len() < expected {
            return Err(DumpError::TooShort {
                received: response.len(),
                expected,
            });
        }
        if response[0] != ACK {
            return Err(DumpError::NotAcknowledged(response[0]));
        }

        let status = response[26];
        Ok(Self {
            idle_voltage: BigEndian::read_i16(&response[2..4]),
            rise_time: BigEndian::read_u16(&response[4..6]),
            dwell_voltage: BigEndian::read_i16(&response[6..8]),
            dwell_time: BigEndian::read_u16(&response[8..10]),
            fall_time: BigEndian::read_u16(&response[10..12]),
            echo_voltage: BigEndian::read_i16(&response[12..14]),
            echo_time: BigEndian::read_u16(&response[14..16]),
            final_time: BigEndian::read_u16(&response[16..18]),
            drops: BigEndian::read_u16(&response[18..20]),
            strobe_div: response[20],
            interval_us: BigEndian::read_u24(&response[21..24]),
            strobe_delay: BigEndian::read_i16(&response[24..26]),
            jetting: status & STATUS_JETTING != 0,
            mode: if status & STATUS_CONTINUOUS != 0 {
                TriggerMode::Continuous
            } else {
                TriggerMode::Single
            },
            source: if status & STATUS_EXTERNAL != 0 {
                TriggerSource::External
            } else {
                TriggerSource::Internal
            },
            strobe_enable: status & STATUS_STROBE != 0,
            firmware_version: response[27],
        })
    }

    /// Frequency implied by the reported interval (Hz)
    pub fn frequency(&self) -> u32 {
        if self.interval_us == 0 {
            0
        } else {
            (1.0e6 / f64::from(self.interval_us) + 0.0001) as u32
        }
    }

    /// Fields that differ from what the host believes it programmed
    pub fn compare(&self, params: &DeviceParameters) -> Vec<DumpField> {
        // Extended controllers truncate times, the others round them
        let bias = if params.capabilities.extended_controller {
            0.0001
        } else {
            0.5001
        };
        let time_differs = |programmed: f64, reported: u16| {
            (programmed - f64::from(reported) - bias).abs() > TIME_TOLERANCE_US
        };

        let w = &params.waveform;
        let mut fields = Vec::new();
        let mut check = |differs: bool, field: DumpField| {
            if differs {
                fields.push(field);
            }
        };

        check(w.idle_voltage != self.idle_voltage, DumpField::IdleVoltage);
        check(time_differs(w.rise_time, self.rise_time), DumpField::RiseTime);
        check(w.dwell_voltage != self.dwell_voltage, DumpField::DwellVoltage);
        check(time_differs(w.dwell_time, self.dwell_time), DumpField::DwellTime);
        check(time_differs(w.fall_time, self.fall_time), DumpField::FallTime);
        check(w.echo_voltage != self.echo_voltage, DumpField::EchoVoltage);
        check(time_differs(w.echo_time, self.echo_time), DumpField::EchoTime);
        check(time_differs(w.final_time, self.final_time), DumpField::FinalTime);
        check(params.drops != self.drops, DumpField::Drops);
        check(
            (params.strobe_div & 0xFF) as u8 != self.strobe_div,
            DumpField::StrobeDiv,
        );
        check(
            pulse_interval_us(params.frequency, bias) != self.interval_us,
            DumpField::Frequency,
        );
        check(params.strobe_delay != self.strobe_delay, DumpField::StrobeDelay);
        check(params.continuous_started != self.jetting, DumpField::Jetting);
        check(params.mode != self.mode, DumpField::Mode);
        check(params.source != self.source, DumpField::Source);
        check(params.strobe_enable != self.strobe_enable, DumpField::StrobeEnable);
        check(
            params.firmware_version != self.firmware_version,
            DumpField::FirmwareVersion,
        );

        fields
    }
}

/// Pulse interval (µs) the board derives from `frequency`
pub fn pulse_interval_us(frequency: u32, bias: f64) -> u32 {
    if frequency == 0 {
        0
    } else {
        (1.0e6 / f64::from(frequency) + bias) as u32
    }
}
