//! # JetDrive Core Library
//!
//! Host-side protocol engine for MicroFab JetDrive piezo jetting drivers.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Command frame encoding for every JetDrive opcode
//! - Request/response transactions with bounded, cancellable polling
//! - The power-on initialization sequence and firmware program handshake
//! - Register dump decoding and verification
//! - A simulated board for running without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use jetdrive_core::protocol::{JetDrive, JetDriveConfig, SerialTransport};
//!
//! let mut jetdrive: JetDrive<SerialTransport> = JetDrive::new(JetDriveConfig::new("COM9"));
//! jetdrive.connect()?;
//!
//! jetdrive.set_frequency(2000)?;
//! jetdrive.start_continuous_jetting()?;
//! ```

/// Wire protocol, transactions and the controller
pub mod protocol;
/// Simulated board for tests and demos
pub mod sim;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{
        CancelToken, Capabilities, ConnectionState, DeviceParameters, JetDrive, JetDriveConfig,
        Opcode, PollPolicy, ProtocolError, SerialTransport, Transport, TriggerMode, TriggerSource,
        Waveform,
    };
    pub use crate::sim::SimulatedJetDrive;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
