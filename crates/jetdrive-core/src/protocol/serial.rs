//! Serial port handling
//!
//! Provides low-level serial port access for JetDrive boards. The boards are
//! reached either through a native RS-232 port or an FTDI USB adapter.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS};

/// FTDI USB vendor ID, used by the JetDrive USB cable
pub const FTDI_VID: u16 = 0x0403;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM9")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vid: None,
            pid: None,
            product: None,
        }
    }

    /// Whether this port sits behind an FTDI adapter
    pub fn is_ftdi(&self) -> bool {
        self.vid == Some(FTDI_VID)
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self::named(&info.port_name),
        }
    }
}

/// Ordering for port candidates:
///  - FTDI adapters first
///  - then native ports (`COMn`, `ttySn`) by number
///  - then everything else by name
fn port_rank(port: &PortInfo) -> (u8, usize, String) {
    let basename = port.name.rsplit('/').next().unwrap_or(&port.name);
    if port.is_ftdi() {
        return (0, 0, basename.to_string());
    }
    let native = basename
        .strip_prefix("COM")
        .or_else(|| basename.strip_prefix("ttyS"));
    if let Some(num) = native.and_then(|rest| rest.parse::<usize>().ok()) {
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List available serial ports, most likely JetDrive candidates first
pub fn list_ports() -> Vec<PortInfo> {
    let found: BTreeMap<String, PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .map(|p| (p.name.clone(), p))
        .collect();

    let mut ports: Vec<PortInfo> = found.into_values().collect();
    ports.sort_by_key(port_rank);
    ports
}

/// Open a serial port with default settings
pub fn open_port(name: &str, baud_rate: Option<u32>) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
    tracing::info!(port = name, baud, "opening JetDrive port");

    serialport::new(name, baud)
        .timeout(Duration::from_millis(DEFAULT_READ_TIMEOUT_MS))
        .open()
        .map_err(|e| match e.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(name.to_string()),
            _ => ProtocolError::SerialError(e.to_string()),
        })
}

/// Configure a serial port for JetDrive communication
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    // The board only understands 8N1 without handshaking lines
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    Ok(())
}

/// Clear the serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))
}
