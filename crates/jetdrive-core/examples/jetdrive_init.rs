//! JetDrive Initialization Tool
//!
//! Connects to a JetDrive board, runs the power-on sequence, reads back the
//! registers and optionally jets for a while.
//!
//! Usage:
//!   cargo run --example jetdrive_init -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: first listed port)
//!   --baud RATE       Baud rate (default: 9600)
//!   --sim             Use the simulated board instead of a serial port
//!   --extended        Controller is a MicroJet III (runs the handshake)
//!   --freq HZ         Frequency to program after init
//!   --jet SECONDS     Jet continuously for this long
//!   --list            List serial ports and exit
//!
//! Set `RUST_LOG=debug` to see the wire traffic.

use anyhow::{bail, Context, Result};
use jetdrive_core::protocol::{list_ports, JetDrive, JetDriveConfig, Transport};
use jetdrive_core::sim::SimulatedJetDrive;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct Options {
    config: JetDriveConfig,
    simulate: bool,
    frequency: Option<u32>,
    jet_seconds: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Some(options) = parse_args()? else {
        return Ok(());
    };

    if options.simulate {
        let mut jetdrive = JetDrive::new(options.config.clone());
        jetdrive
            .connect_with(SimulatedJetDrive::with_capabilities(options.config.capabilities))
            .context("initializing simulated JetDrive")?;
        exercise(&mut jetdrive, &options)
    } else {
        let mut config = options.config.clone();
        if config.port_name.is_empty() {
            let Some(port) = list_ports().into_iter().next() else {
                bail!("no serial ports found; pass --port or --sim");
            };
            config.port_name = port.name;
        }
        println!("Connecting to {} at {} baud", config.port_name, config.baud_rate);

        let mut jetdrive: JetDrive = JetDrive::new(config);
        jetdrive.connect().context("initializing JetDrive")?;
        exercise(&mut jetdrive, &options)
    }
}

fn exercise<T: Transport>(jetdrive: &mut JetDrive<T>, options: &Options) -> Result<()> {
    if let Some(report) = jetdrive.init_report() {
        println!("Firmware version: {}", report.firmware_version);
        if let Some(handshake) = &report.handshake {
            println!("Loader: {:?} ({})", handshake.family, handshake.banner_text().trim());
        }
        for opcode in report.rejected() {
            println!("  rejected during init: {:?}", opcode);
        }
    }

    if let Some(frequency) = options.frequency {
        jetdrive.set_frequency(frequency)?;
        println!("Frequency set to {} Hz", jetdrive.params().frequency);
    }

    let mismatches = jetdrive.verify()?;
    if mismatches.is_empty() {
        println!("Registers match host parameters");
    } else {
        println!("Registers differ: {:?}", mismatches);
    }

    if let Some(seconds) = options.jet_seconds {
        jetdrive.start_continuous_jetting()?;
        println!("Jetting for {} s", seconds);
        std::thread::sleep(Duration::from_secs(seconds));
        jetdrive.stop_continuous_jetting()?;
    }

    println!("Status: {:#04x}", jetdrive.poll_status()?);
    jetdrive.disconnect();
    Ok(())
}

fn parse_args() -> Result<Option<Options>> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        config: JetDriveConfig::default(),
        simulate: false,
        frequency: None,
        jet_seconds: None,
    };

    let mut i = 1;
    while i < args.len() {
        let value = |i: usize| {
            args.get(i + 1)
                .with_context(|| format!("{} needs a value", args[i]))
        };
        match args[i].as_str() {
            "--port" | "-p" => {
                options.config.port_name = value(i)?.clone();
                i += 1;
            }
            "--baud" | "-b" => {
                options.config.baud_rate = value(i)?.parse().context("invalid baud rate")?;
                i += 1;
            }
            "--freq" | "-f" => {
                options.frequency = Some(value(i)?.parse().context("invalid frequency")?);
                i += 1;
            }
            "--jet" => {
                options.jet_seconds = Some(value(i)?.parse().context("invalid duration")?);
                i += 1;
            }
            "--sim" => options.simulate = true,
            "--extended" => options.config.capabilities.extended_controller = true,
            "--list" => {
                for port in list_ports() {
                    let kind = if port.is_ftdi() { "FTDI" } else { "" };
                    println!("{:<20} {:<5} {}", port.name, kind, port.product.unwrap_or_default());
                }
                return Ok(None);
            }
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            other if !other.starts_with('-') => options.config.port_name = other.to_string(),
            other => bail!("unknown option {}", other),
        }
        i += 1;
    }

    Ok(Some(options))
}

fn print_help() {
    println!("JetDrive Initialization Tool");
    println!();
    println!("Usage: jetdrive_init [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --port PORT       Serial port (default: first listed port)");
    println!("  --baud RATE       Baud rate (default: 9600)");
    println!("  --sim             Use the simulated board");
    println!("  --extended        Controller is a MicroJet III (runs the handshake)");
    println!("  --freq HZ         Frequency to program after init");
    println!("  --jet SECONDS     Jet continuously for this long");
    println!("  --list            List serial ports and exit");
}
