//! Simulated JetDrive board
//!
//! An in-memory [`Transport`] that behaves like a JetDrive: it answers the
//! firmware program handshake, decodes command frames, keeps its own copy of
//! the channel registers and replies with ACK/NAK responses and register
//! dumps. Used by tests and by the example tool when no hardware is attached.
//!
//! Faults can be injected with [`SimulatedJetDrive::reject`],
//! [`SimulatedJetDrive::set_silent`] and [`SimulatedJetDrive::corrupt_echo`].

use byteorder::{BigEndian, ByteOrder};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use crate::protocol::{
    checksum, dump::pulse_interval_us, Capabilities, DeviceParameters, Frame, Opcode,
    ProtocolError, Transport, TriggerMode, TriggerSource, ACK, DUMP_RESPONSE_LEN, FRAME_HEADER,
    FREQUENCY_BASE_HZ, NAK, VERSION_RESPONSE_LEN,
};

/// Banner of the legacy program loader
pub const LEGACY_BANNER: &[u8; 35] = b"Q - This is a dummy response. BEEP>";

/// Firmware version reported by default
pub const DEFAULT_FIRMWARE_VERSION: u8 = 50;

const PROGRAM_COMMAND: &[u8] = b"X2000";

/// Which program loader the board emulates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoaderKind {
    /// Echoes `X2000` after a legacy banner
    #[default]
    Legacy,
    /// Sends an `MFJET32` banner
    Mfjet32,
}

/// Simulated JetDrive board
#[derive(Debug)]
pub struct SimulatedJetDrive {
    open: bool,
    capabilities: Capabilities,
    firmware_version: u8,
    loader: LoaderKind,
    /// Registers as the board holds them
    registers: DeviceParameters,
    jetting: bool,
    outbox: VecDeque<u8>,
    /// Program command bytes received since the last `Q`
    program: Option<Vec<u8>>,
    frames: Vec<Frame>,
    rejected: HashSet<Opcode>,
    silent: bool,
    corrupt_echo: bool,
    paused: Duration,
}

impl Default for SimulatedJetDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedJetDrive {
    /// Plain single-channel board
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::default())
    }

    /// Board with the given features
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            open: true,
            capabilities,
            firmware_version: DEFAULT_FIRMWARE_VERSION,
            loader: LoaderKind::Legacy,
            registers: DeviceParameters::with_capabilities(capabilities),
            jetting: false,
            outbox: VecDeque::new(),
            program: None,
            frames: Vec::new(),
            rejected: HashSet::new(),
            silent: false,
            corrupt_echo: false,
            paused: Duration::ZERO,
        }
    }

    /// Version reported by GETVERSION
    pub fn with_firmware_version(mut self, version: u8) -> Self {
        self.firmware_version = version;
        self
    }

    /// Program loader to emulate
    pub fn with_loader(mut self, loader: LoaderKind) -> Self {
        self.loader = loader;
        self
    }

    /// Answer `opcode` with NAK from now on
    pub fn reject(&mut self, opcode: Opcode) {
        self.rejected.insert(opcode);
    }

    /// Stop answering anything
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Echo the wrong byte during the program handshake
    pub fn corrupt_echo(&mut self, corrupt: bool) {
        self.corrupt_echo = corrupt;
    }

    /// Version reported by GETVERSION
    pub fn firmware_version(&self) -> u8 {
        self.firmware_version
    }

    /// Registers as the board currently holds them
    pub fn registers(&self) -> &DeviceParameters {
        &self.registers
    }

    /// Continuous jetting is running
    pub fn is_jetting(&self) -> bool {
        self.jetting
    }

    /// Every frame received, in order
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Opcodes of every frame received
    pub fn opcodes(&self) -> Vec<Opcode> {
        self.frames.iter().map(Frame::opcode).collect()
    }

    /// Total time the host asked the board to wait
    pub fn paused(&self) -> Duration {
        self.paused
    }

    fn banner(&self) -> Vec<u8> {
        match self.loader {
            LoaderKind::Legacy => LEGACY_BANNER.to_vec(),
            LoaderKind::Mfjet32 => {
                let mut banner = b"MFJET32 program loader ready>".to_vec();
                banner.resize(LEGACY_BANNER.len(), b' ');
                banner
            }
        }
    }

    fn status_bits(&self) -> u8 {
        let mut status = 0;
        if self.jetting {
            status |= 0x01;
        }
        if self.registers.is_continuous() {
            status |= 0x02;
        }
        if self.registers.is_external_source() {
            status |= 0x04;
        }
        if self.registers.strobe_enable {
            status |= 0x08;
        }
        status
    }

    fn queue_reply(&mut self, first: u8, body: &[u8]) {
        let mut reply = vec![first, (body.len() + 1) as u8];
        reply.extend_from_slice(body);
        reply.push(checksum(&reply[1..]));
        self.outbox.extend(reply);
    }

    fn handle_program_byte(&mut self, byte: u8) {
        let Some(program) = self.program.as_mut() else {
            return;
        };
        program.push(byte);
        let done = program.as_slice() == PROGRAM_COMMAND;
        let echo = if self.corrupt_echo { byte ^ 0xFF } else { byte };
        self.outbox.push_back(echo);

        if done {
            self.program = None;
            if self.loader == LoaderKind::Legacy {
                self.outbox.extend(b"\r\n");
            }
        }
    }

    fn handle_frame(&mut self, bytes: &[u8]) {
        let frame = match Frame::from_bytes(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "simulator: bad frame");
                self.queue_reply(NAK, &[0x00]);
                return;
            }
        };

        let opcode = frame.opcode();
        let reject = self.rejected.contains(&opcode);
        self.frames.push(frame.clone());
        if reject {
            self.queue_reply(NAK, &[0x00]);
            return;
        }

        self.apply(&frame);

        match opcode {
            Opcode::GetVersion => {
                // The version occupies the final byte
                let mut reply = vec![ACK, (VERSION_RESPONSE_LEN - 2) as u8, self.status_bits(), 0x00];
                reply.push(self.firmware_version);
                self.outbox.extend(reply);
            }
            Opcode::DumpInput => {
                let dump = self.dump_bytes();
                self.outbox.extend(dump);
            }
            _ => {
                let status = self.status_bits();
                self.queue_reply(ACK, &[status]);
            }
        }
    }

    fn apply(&mut self, frame: &Frame) {
        let p = frame.payload();
        let regs = &mut self.registers;
        match frame.opcode() {
            Opcode::Reset => {
                self.registers = DeviceParameters::with_capabilities(self.capabilities);
                self.jetting = false;
            }
            Opcode::Drops => {
                regs.drops = match p.len() {
                    1 => u16::from(p[0]),
                    2 => BigEndian::read_u16(p),
                    _ => regs.drops,
                };
            }
            Opcode::ContMode => {
                if p.first() == Some(&1) {
                    regs.mode = TriggerMode::Continuous;
                } else {
                    regs.mode = TriggerMode::Single;
                    self.jetting = false;
                }
            }
            Opcode::Frequency if p.len() == 2 => {
                let divisor = f64::from(BigEndian::read_u16(p));
                regs.frequency = (FREQUENCY_BASE_HZ / (divisor + 0.5)).round() as u32;
            }
            Opcode::LowFreq if p.len() == 1 => regs.frequency = u32::from(p[0]),
            Opcode::FullFreq if p.len() == 2 => regs.frequency = u32::from(BigEndian::read_u16(p)),
            Opcode::Pulse => apply_pulse(regs, p),
            Opcode::StrobeDiv if p.len() == 1 => regs.strobe_div = u16::from(p[0]),
            Opcode::StrobeEnable => regs.strobe_enable = p.first() == Some(&1),
            Opcode::StrobeDelay if p.len() == 3 => regs.strobe_delay = BigEndian::read_i16(&p[1..]),
            Opcode::Source => {
                let on = p.first() == Some(&1);
                if self.capabilities.multi_channel {
                    regs.channel_on = on;
                } else {
                    regs.source = if on {
                        TriggerSource::External
                    } else {
                        TriggerSource::Internal
                    };
                }
            }
            Opcode::ExternEnable => regs.extern_enable = p.first() == Some(&1),
            Opcode::EditChannel if p.len() == 1 => regs.channel_group = p[0],
            Opcode::SoftTrigger => {
                if regs.is_continuous() {
                    self.jetting = true;
                }
            }
            _ => {}
        }
    }

    fn dump_bytes(&self) -> Vec<u8> {
        let regs = &self.registers;
        let w = &regs.waveform;
        let bias = if self.capabilities.extended_controller {
            0.0001
        } else {
            0.5001
        };
        let micros = |t: f64| (t + 0.05) as u16;

        let mut bytes = vec![0u8; DUMP_RESPONSE_LEN];
        bytes[0] = ACK;
        bytes[1] = (DUMP_RESPONSE_LEN - 2) as u8;
        BigEndian::write_i16(&mut bytes[2..4], w.idle_voltage);
        BigEndian::write_u16(&mut bytes[4..6], micros(w.rise_time));
        BigEndian::write_i16(&mut bytes[6..8], w.dwell_voltage);
        BigEndian::write_u16(&mut bytes[8..10], micros(w.dwell_time));
        BigEndian::write_u16(&mut bytes[10..12], micros(w.fall_time));
        BigEndian::write_i16(&mut bytes[12..14], w.echo_voltage);
        BigEndian::write_u16(&mut bytes[14..16], micros(w.echo_time));
        BigEndian::write_u16(&mut bytes[16..18], micros(w.final_time));
        BigEndian::write_u16(&mut bytes[18..20], regs.drops);
        bytes[20] = (regs.strobe_div & 0xFF) as u8;
        BigEndian::write_u24(&mut bytes[21..24], pulse_interval_us(regs.frequency, bias));
        BigEndian::write_i16(&mut bytes[24..26], regs.strobe_delay);
        bytes[26] = self.status_bits();
        bytes[27] = self.firmware_version;
        bytes[28] = checksum(&bytes[1..28]);
        bytes
    }
}

/// Decode a PULSE payload into `regs`
fn apply_pulse(regs: &mut DeviceParameters, p: &[u8]) {
    let tenths = |b: &[u8]| f64::from(BigEndian::read_u16(b)) / 10.0;
    let w = &mut regs.waveform;
    match p.len() {
        19 => {
            w.dwell_time = tenths(&p[2..4]);
            w.echo_time = tenths(&p[5..7]);
            w.idle_voltage = BigEndian::read_i16(&p[7..9]);
            w.dwell_voltage = BigEndian::read_i16(&p[9..11]);
            w.echo_voltage = BigEndian::read_i16(&p[11..13]);
            w.rise_time = tenths(&p[13..15]);
            w.fall_time = tenths(&p[15..17]);
            w.final_time = tenths(&p[17..19]);
        }
        4 | 7 => {
            w.idle_voltage = i16::from(p[0] as i8);
            w.dwell_voltage = i16::from(p[1] as i8);
            w.dwell_time = tenths(&p[2..4]);
            if p.len() == 7 {
                w.echo_voltage = i16::from(p[4] as i8);
                w.echo_time = tenths(&p[5..7]);
            }
        }
        _ => tracing::debug!(len = p.len(), "simulator: unexpected PULSE payload"),
    }
}

impl Transport for SimulatedJetDrive {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        if !self.open {
            return Err(ProtocolError::TransportClosed);
        }
        if self.silent {
            return Ok(bytes.len());
        }

        if bytes == b"Q" {
            let banner = self.banner();
            self.outbox.extend(banner);
            self.program = Some(Vec::new());
        } else if bytes.first() == Some(&FRAME_HEADER) && self.program.is_none() {
            self.handle_frame(bytes);
        } else {
            for &byte in bytes {
                self.handle_program_byte(byte);
            }
        }
        Ok(bytes.len())
    }

    fn read(&mut self, max_len: usize, _timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        if !self.open {
            return Err(ProtocolError::TransportClosed);
        }
        let n = max_len.min(self.outbox.len());
        Ok(self.outbox.drain(..n).collect())
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.outbox.clear();
        Ok(())
    }

    fn pause(&mut self, duration: Duration) {
        self.paused += duration;
    }

    fn close(&mut self) {
        self.open = false;
        self.outbox.clear();
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode, Waveform, STATUS_RESPONSE_LEN};

    fn send(board: &mut SimulatedJetDrive, opcode: Opcode, params: &DeviceParameters) -> Vec<u8> {
        let frame = encode(opcode, params)
            .expect("encodes")
            .into_frame()
            .expect("has a frame");
        board.write(frame.as_bytes()).expect("write");
        board
            .read(opcode.response_len(), Duration::ZERO)
            .expect("read")
    }

    #[test]
    fn test_status_reply_is_checksummed() {
        let mut board = SimulatedJetDrive::new();
        let reply = send(&mut board, Opcode::PollStatus, &DeviceParameters::default());
        assert_eq!(reply.len(), STATUS_RESPONSE_LEN);
        assert_eq!(reply[0], ACK);
        assert_eq!(reply[3], checksum(&reply[1..3]));
    }

    #[test]
    fn test_pulse_round_trips_into_registers() {
        let mut board = SimulatedJetDrive::new();
        let mut params = DeviceParameters::default();
        params.waveform = Waveform {
            dwell_time: 25.0,
            echo_voltage: -30,
            ..Waveform::default()
        };
        send(&mut board, Opcode::Pulse, &params);
        assert_eq!(board.registers().waveform.dwell_time, 25.0);
        assert_eq!(board.registers().waveform.echo_voltage, -30);
    }

    #[test]
    fn test_bad_frame_gets_nak() {
        let mut board = SimulatedJetDrive::new();
        board.write(&[b'S', 0x02, 0x02, 0xFF]).expect("write");
        let reply = board.read(4, Duration::ZERO).expect("read");
        assert_eq!(reply[0], NAK);
    }

    #[test]
    fn test_program_echo() {
        let mut board = SimulatedJetDrive::new();
        board.write(b"Q").expect("write");
        assert_eq!(board.read(64, Duration::ZERO).expect("read"), LEGACY_BANNER.to_vec());

        for &byte in b"X2000" {
            board.write(&[byte]).expect("write");
            assert_eq!(board.read(1, Duration::ZERO).expect("read"), vec![byte]);
        }
        assert_eq!(board.read(2, Duration::ZERO).expect("read"), b"\r\n".to_vec());
    }
}
