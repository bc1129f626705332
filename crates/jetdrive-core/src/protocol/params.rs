//! Jetting channel parameters
//!
//! The mutable state of one jetting channel. The host edits these values and
//! then issues the command that transmits them.

use serde::{Deserialize, Serialize};

/// Trigger mode of the pulser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerMode {
    /// One burst of `drops` per trigger
    #[default]
    Single,
    /// Jet continuously at the programmed frequency
    Continuous,
}

/// Where triggers come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerSource {
    /// Internal frequency clock
    Internal,
    /// External TTL trigger input
    #[default]
    External,
}

/// Features of the attached controller that change the wire encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// MicroJet III class controller: 16-bit drop counts and the extended
    /// waveform layout are always used.
    pub extended_controller: bool,
    /// Multi-channel drive; SOURCE and EDITCHANNEL address channels.
    pub multi_channel: bool,
    /// Breadboard prototype without the firmware program loader.
    pub breadboard: bool,
}

impl Capabilities {
    /// Whether the Q / X2000 firmware program handshake must run at connect
    pub fn requires_handshake(&self) -> bool {
        self.extended_controller && !self.multi_channel && !self.breadboard
    }
}

/// Pulse waveform: idle → rise → dwell → fall → echo → final → idle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Waveform {
    /// Rise time (µs)
    pub rise_time: f64,
    /// Dwell time (µs)
    pub dwell_time: f64,
    /// Fall time (µs)
    pub fall_time: f64,
    /// Echo time (µs)
    pub echo_time: f64,
    /// Final rise time (µs)
    pub final_time: f64,
    /// Idle voltage (V)
    pub idle_voltage: i16,
    /// Dwell voltage (V)
    pub dwell_voltage: i16,
    /// Echo voltage (V)
    pub echo_voltage: i16,
}

impl Default for Waveform {
    fn default() -> Self {
        Self {
            rise_time: 3.0,
            dwell_time: 20.0,
            fall_time: 3.0,
            echo_time: 40.0,
            final_time: 3.0,
            idle_voltage: 0,
            dwell_voltage: 20,
            echo_voltage: -20,
        }
    }
}

/// Parameter state of one jetting channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceParameters {
    /// Pulse shape
    pub waveform: Waveform,
    /// Amplifier gain
    pub gain: i16,
    /// Jetting frequency (Hz)
    pub frequency: u32,
    /// Drops per trigger
    pub drops: u16,
    /// Single-shot or continuous
    pub mode: TriggerMode,
    /// Trigger source (single-channel only)
    pub source: TriggerSource,
    /// Channel enable (multi-channel only)
    pub channel_on: bool,
    /// Active channel index (multi-channel only)
    pub channel_group: u8,
    /// External trigger enable
    pub extern_enable: bool,
    /// Strobe delay (µs)
    pub strobe_delay: i16,
    /// Strobe flashes every `strobe_div` pulses
    pub strobe_div: u16,
    /// Strobe output on
    pub strobe_enable: bool,
    /// Debug register index, low byte sent
    pub debug_switch: u16,
    /// Debug register value, low byte sent
    pub debug_value: u16,
    /// Last version reported by GETVERSION; 0 until queried
    pub firmware_version: u8,
    /// Continuous jetting has been started by a soft trigger
    pub continuous_started: bool,
    /// Controller features
    pub capabilities: Capabilities,
}

impl Default for DeviceParameters {
    fn default() -> Self {
        Self {
            waveform: Waveform::default(),
            gain: 225,
            frequency: 1000,
            drops: 1,
            mode: TriggerMode::Single,
            source: TriggerSource::External,
            channel_on: false,
            channel_group: 0,
            extern_enable: false,
            strobe_delay: 0,
            strobe_div: 1,
            strobe_enable: true,
            debug_switch: 0,
            debug_value: 0,
            firmware_version: 0,
            continuous_started: false,
            capabilities: Capabilities::default(),
        }
    }
}

impl DeviceParameters {
    /// Create parameters for a controller with the given capabilities
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    /// Set the jetting frequency, clamping to at least 1 Hz
    pub fn set_frequency(&mut self, frequency_hz: u32) {
        self.frequency = frequency_hz.max(1);
    }

    /// Frequency as it will be encoded (never below 1 Hz)
    pub fn effective_frequency(&self) -> u32 {
        self.frequency.max(1)
    }

    /// Mode is continuous
    pub fn is_continuous(&self) -> bool {
        self.mode == TriggerMode::Continuous
    }

    /// Triggers come from the external input
    pub fn is_external_source(&self) -> bool {
        self.source == TriggerSource::External
    }
}
