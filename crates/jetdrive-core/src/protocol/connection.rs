//! JetDrive connection management
//!
//! [`JetDrive`] owns the transport and the channel parameters, runs the
//! initialization on connect and exposes the operations the rest of the
//! printer software uses.

use serde::{Deserialize, Serialize};

use super::{
    run_initialization, CancelToken, Capabilities, DeviceDump, DeviceParameters, DumpField,
    InitError, InitOptions, InitReport, Opcode, PollPolicy, ProtocolError, SerialTransport,
    Transaction, TransactionResult, Transport, TriggerMode, TriggerSource, Waveform,
    DEFAULT_BAUD_RATE,
};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Initialization in progress
    Connecting,
    /// Connected and initialized
    Connected,
    /// Initialization failed
    Error,
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JetDriveConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Response polling
    pub poll: PollPolicy,
    /// Controller features
    pub capabilities: Capabilities,
    /// Force the firmware program handshake on or off
    pub handshake: Option<bool>,
}

impl Default for JetDriveConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            poll: PollPolicy::default(),
            capabilities: Capabilities::default(),
            handshake: None,
        }
    }
}

impl JetDriveConfig {
    /// Defaults for `port_name`
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A JetDrive board and the parameters of its jetting channel
pub struct JetDrive<T: Transport = SerialTransport> {
    transport: Option<T>,
    state: ConnectionState,
    config: JetDriveConfig,
    params: DeviceParameters,
    cancel: CancelToken,
    init_report: Option<InitReport>,
}

impl JetDrive<SerialTransport> {
    /// Open the configured serial port and initialize the board
    pub fn connect(&mut self) -> Result<&InitReport, InitError> {
        if self.state == ConnectionState::Connected {
            return Err(ProtocolError::AlreadyConnected.into());
        }
        let transport =
            SerialTransport::open(&self.config.port_name, Some(self.config.baud_rate))?;
        self.connect_with(transport)
    }
}

impl<T: Transport> JetDrive<T> {
    /// Create a new controller (not yet connected)
    pub fn new(config: JetDriveConfig) -> Self {
        let params = DeviceParameters::with_capabilities(config.capabilities);
        Self {
            transport: None,
            state: ConnectionState::Disconnected,
            config,
            params,
            cancel: CancelToken::new(),
            init_report: None,
        }
    }

    /// Take ownership of an open transport and initialize the board
    pub fn connect_with(&mut self, mut transport: T) -> Result<&InitReport, InitError> {
        if self.state == ConnectionState::Connected {
            return Err(ProtocolError::AlreadyConnected.into());
        }

        self.state = ConnectionState::Connecting;
        self.cancel.reset();
        let options = InitOptions {
            policy: self.config.poll.clone(),
            handshake: self.config.handshake,
            cancel: Some(self.cancel.clone()),
            ..InitOptions::default()
        };

        match run_initialization(&mut self.params, &mut transport, &options) {
            Ok(report) => {
                self.transport = Some(transport);
                self.state = ConnectionState::Connected;
                Ok(&*self.init_report.insert(report))
            }
            Err(e) => {
                self.state = ConnectionState::Error;
                self.transport = None;
                Err(e)
            }
        }
    }

    /// Close the transport
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            tracing::info!("JetDrive disconnected");
        }
        self.params.continuous_started = false;
        self.init_report = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connected and initialized
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Configuration in use
    pub fn config(&self) -> &JetDriveConfig {
        &self.config
    }

    /// Parameters as the host believes the board has them
    pub fn params(&self) -> &DeviceParameters {
        &self.params
    }

    /// Report of the last successful initialization
    pub fn init_report(&self) -> Option<&InitReport> {
        self.init_report.as_ref()
    }

    /// Token that aborts the transaction currently polling
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Transport while connected
    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    /// Mutable transport while connected
    pub fn transport_mut(&mut self) -> Option<&mut T> {
        self.transport.as_mut()
    }

    /// Send `opcode` with the current parameters, whatever the outcome
    pub fn send(&mut self, opcode: Opcode) -> Result<TransactionResult, ProtocolError> {
        if self.state != ConnectionState::Connected {
            return Err(ProtocolError::NotConnected);
        }
        let transport = self.transport.as_mut().ok_or(ProtocolError::NotConnected)?;
        Transaction::new(opcode)
            .cancel_token(self.cancel.clone())
            .run(&mut self.params, transport, &self.config.poll)
    }

    /// Send `opcode` and turn a failing outcome into an error
    fn command(&mut self, opcode: Opcode) -> Result<Option<u8>, ProtocolError> {
        self.send(opcode)?.into_status()
    }

    /// Apply `change` and transmit `opcode` if the parameters actually changed.
    ///
    /// The previous parameters are restored when the command fails. Returns
    /// whether anything was sent.
    fn update<F>(&mut self, opcode: Opcode, change: F) -> Result<bool, ProtocolError>
    where
        F: FnOnce(&mut DeviceParameters),
    {
        if self.state != ConnectionState::Connected {
            return Err(ProtocolError::NotConnected);
        }

        let previous = self.params.clone();
        change(&mut self.params);
        if self.params == previous {
            return Ok(false);
        }

        match self.command(opcode) {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(?opcode, error = %e, "JetDrive command failed");
                self.params = previous;
                Err(e)
            }
        }
    }

    /// Program the pulse waveform
    pub fn set_waveform(&mut self, waveform: Waveform) -> Result<bool, ProtocolError> {
        self.update(Opcode::Pulse, |p| p.waveform = waveform)
    }

    /// Switch to continuous mode without starting
    pub fn set_continuous_jetting(&mut self) -> Result<bool, ProtocolError> {
        self.update(Opcode::ContMode, |p| p.mode = TriggerMode::Continuous)
    }

    /// Switch to single-shot mode, which also stops jetting
    pub fn set_single_jetting(&mut self) -> Result<bool, ProtocolError> {
        let sent = self.update(Opcode::ContMode, |p| p.mode = TriggerMode::Single)?;
        self.params.continuous_started = false;
        Ok(sent)
    }

    /// Set the jetting frequency (Hz) via FULLFREQ
    pub fn set_frequency(&mut self, frequency_hz: u32) -> Result<bool, ProtocolError> {
        self.update(Opcode::FullFreq, |p| p.set_frequency(frequency_hz))
    }

    /// Drops per trigger
    pub fn set_drops(&mut self, drops: u16) -> Result<bool, ProtocolError> {
        self.update(Opcode::Drops, |p| p.drops = drops)
    }

    /// Trigger from the external input.
    ///
    /// Multi-channel boards use SOURCE as the channel on/off switch, so the
    /// trigger source cannot be changed there.
    pub fn set_external_trigger(&mut self) -> Result<bool, ProtocolError> {
        self.set_trigger_source(TriggerSource::External)
    }

    /// Trigger from the internal clock. See [`Self::set_external_trigger`].
    pub fn set_internal_trigger(&mut self) -> Result<bool, ProtocolError> {
        self.set_trigger_source(TriggerSource::Internal)
    }

    fn set_trigger_source(&mut self, source: TriggerSource) -> Result<bool, ProtocolError> {
        if self.params.capabilities.multi_channel {
            return Err(ProtocolError::Unsupported("trigger source selection"));
        }
        self.update(Opcode::Source, |p| p.source = source)
    }

    /// Turn the strobe on
    pub fn enable_strobe(&mut self) -> Result<bool, ProtocolError> {
        self.update(Opcode::StrobeEnable, |p| p.strobe_enable = true)
    }

    /// Turn the strobe off
    pub fn disable_strobe(&mut self) -> Result<bool, ProtocolError> {
        self.update(Opcode::StrobeEnable, |p| p.strobe_enable = false)
    }

    /// Strobe delay after the pulse (µs)
    pub fn set_strobe_delay(&mut self, delay_us: i16) -> Result<bool, ProtocolError> {
        self.update(Opcode::StrobeDelay, |p| p.strobe_delay = delay_us)
    }

    /// Flash the strobe every `divider` pulses
    pub fn set_strobe_divider(&mut self, divider: u16) -> Result<bool, ProtocolError> {
        self.update(Opcode::StrobeDiv, |p| p.strobe_div = divider)
    }

    /// Fire one trigger from the host
    pub fn soft_trigger(&mut self) -> Result<(), ProtocolError> {
        self.command(Opcode::SoftTrigger)?;
        if self.params.is_continuous() {
            self.params.continuous_started = true;
        }
        Ok(())
    }

    /// Switch to continuous mode on the internal clock and start jetting
    pub fn start_continuous_jetting(&mut self) -> Result<(), ProtocolError> {
        self.set_continuous_jetting()?;
        if !self.params.capabilities.multi_channel {
            self.set_internal_trigger()?;
        }
        self.soft_trigger()?;
        tracing::info!(frequency = self.params.frequency, "continuous jetting started");
        Ok(())
    }

    /// Return to single-shot mode
    pub fn stop_continuous_jetting(&mut self) -> Result<(), ProtocolError> {
        self.set_single_jetting()?;
        tracing::info!("continuous jetting stopped");
        Ok(())
    }

    /// Board status byte
    pub fn poll_status(&mut self) -> Result<u8, ProtocolError> {
        self.command(Opcode::PollStatus)?
            .ok_or_else(|| ProtocolError::InvalidResponse("no status byte".to_string()))
    }

    /// Read back the board's registers
    pub fn dump(&mut self) -> Result<DeviceDump, ProtocolError> {
        let result = self.send(Opcode::DumpInput)?;
        let response = result.response.clone();
        result.into_status()?;
        Ok(DeviceDump::parse(&response)?)
    }

    /// Registers that disagree with the host's parameters
    pub fn verify(&mut self) -> Result<Vec<DumpField>, ProtocolError> {
        let dump = self.dump()?;
        let mismatches = dump.compare(&self.params);
        if !mismatches.is_empty() {
            tracing::warn!(?mismatches, "JetDrive registers differ from host parameters");
        }
        Ok(mismatches)
    }
}

impl<T: Transport> Drop for JetDrive<T> {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
        }
    }
}
