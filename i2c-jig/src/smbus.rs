//! SMBus transaction shapes.
//!
//! Every bus operation is expressed as one access: a direction, a command
//! byte and a size class that fixes how many payload bytes follow the
//! command. Payload bytes are kept in bus order, so a word is stored low
//! byte first.

use std::fmt;

use crate::error::{Error, Result};

/// Largest block transfer, as defined by SMBus.
pub const BLOCK_MAX: usize = 32;

/// Transfer direction, seen from the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    /// R/W bit appended to the slave address.
    pub fn flag(self) -> u8 {
        match self {
            Direction::Read => 0x01,
            Direction::Write => 0x00,
        }
    }
}

/// Payload size of an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    /// No payload; on the software bus only the address is sent.
    Quick,
    /// One byte after the command
    Byte,
    /// Two bytes after the command, low byte first
    Word,
    /// Explicit length, 1..=32
    Block(u8),
}

impl SizeClass {
    /// Number of payload bytes following the command byte.
    pub fn payload_len(self) -> usize {
        match self {
            SizeClass::Quick => 0,
            SizeClass::Byte => 1,
            SizeClass::Word => 2,
            SizeClass::Block(n) => n as usize,
        }
    }

    /// Check the size class against a caller buffer before touching the bus.
    ///
    /// Returns the payload length.
    pub fn check(self, buffer_len: usize) -> Result<usize> {
        if let SizeClass::Block(n) = self {
            if n == 0 || n as usize > BLOCK_MAX {
                return Err(Error::InvalidParameter(format!(
                    "block length {} outside 1..={}",
                    n, BLOCK_MAX
                )));
            }
        }
        let len = self.payload_len();
        if buffer_len < len {
            return Err(Error::InvalidParameter(format!(
                "{} transfer needs {} bytes, buffer has {}",
                self, len, buffer_len
            )));
        }
        Ok(len)
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeClass::Quick => f.write_str("quick"),
            SizeClass::Byte => f.write_str("byte"),
            SizeClass::Word => f.write_str("word"),
            SizeClass::Block(n) => write!(f, "block({})", n),
        }
    }
}

/// Block size class for a slice, rejecting empty and oversized transfers.
pub fn block_size(len: usize) -> Result<SizeClass> {
    if len == 0 || len > BLOCK_MAX {
        return Err(Error::InvalidParameter(format!(
            "block length {} outside 1..={}",
            len, BLOCK_MAX
        )));
    }
    Ok(SizeClass::Block(len as u8))
}
