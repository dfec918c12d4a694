//! I2C protocol errors.

use std::fmt;

/// Transaction phase in which a byte went unacknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Slave address with the write flag
    Address,
    /// Command (register) byte
    Command,
    /// Payload byte at the given index
    Data(usize),
    /// Slave address with the read flag, after the repeated start
    ReadAddress,
    /// Reported by the kernel driver, phase unknown
    Unknown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Address => f.write_str("address"),
            Phase::Command => f.write_str("command"),
            Phase::Data(index) => write!(f, "data byte {}", index),
            Phase::ReadAddress => f.write_str("read address"),
            Phase::Unknown => f.write_str("unknown phase"),
        }
    }
}

/// I2C-specific errors
#[derive(Debug, thiserror::Error)]
pub enum I2cError {
    /// No acknowledgment from device
    #[error("No acknowledgment from device at address 0x{address:02x} ({phase})")]
    NoAck { address: u8, phase: Phase },
}
