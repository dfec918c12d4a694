//! I2C bus scanner.
//!
//! Probes every regular 7-bit address on a hardware or GPIO bus and lists the
//! devices that acknowledge. Exits with status 0 if at least one device
//! answered, 1 otherwise.

mod scan;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use i2c_jig::Bus;
use scan::{ProbeMode, SCAN_RANGE};
use tracing::level_filters::LevelFilter;

/// Find devices on an I2C bus
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = None,
    after_help = "e.g) find i2c devices on an i2c-dev node\n       i2c-scan -D /dev/i2c-0\n\n     on GPIO 18 (clock) and 23 (data)\n       i2c-scan -D GPIO,SCL,18,SDA,23"
)]
struct Args {
    /// Bus to scan: a device node such as /dev/i2c-0, or GPIO,SCL,<pin>,SDA,<pin>
    #[arg(short = 'D', long = "Device")]
    device: String,

    /// Probe with a byte read of register 0
    #[arg(short = 'b', long = "byte_read", conflicts_with = "word_read")]
    byte_read: bool,

    /// Probe with a word read of register 0
    #[arg(short = 'w', long = "word_read")]
    word_read: bool,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,
}

impl Args {
    fn mode(&self) -> ProbeMode {
        if self.byte_read {
            ProbeMode::Byte
        } else if self.word_read {
            ProbeMode::Word
        } else {
            ProbeMode::Quick
        }
    }
}

fn main() -> ExitCode {
    // Usage errors, and explicit help, exit with status 1
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    let level = if args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    i2c_jig::tracing::init_journald_or_stderr(level);

    match run(&args) {
        Ok(found) => ExitCode::from(exit_status(found)),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Status for a completed scan: 0 if any device answered, 1 otherwise.
fn exit_status(found: usize) -> u8 {
    if found == 0 {
        1
    } else {
        0
    }
}

fn run(args: &Args) -> Result<usize> {
    let mode = args.mode();
    let mut bus = Bus::open(&args.device)
        .with_context(|| format!("Failed to open I2C bus {:?}", args.device))?;

    println!("Scanning {} ({} bus) using {}", args.device, bus.kind(), mode);

    let found = scan::scan(&mut bus, mode, SCAN_RANGE);
    for address in &found {
        println!(
            "I2C ack detect {} (Device Addr : 0x{:02x})",
            args.device, address
        );
    }
    if found.is_empty() {
        println!("I2C Device not found!");
    }
    println!("{} devices found", found.len());

    bus.close().context("Failed to close I2C bus")?;
    Ok(found.len())
}
