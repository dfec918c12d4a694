//! Kernel i2c-dev backend.
//!
//! Opens a `/dev/i2c-N` node and issues SMBus transfers with the `I2C_SMBUS`
//! ioctl. The adapter driver generates the bus conditions; this side only
//! packs arguments and maps errors.
//!
//! | Size class | Kernel transfer          |
//! |------------|--------------------------|
//! | Quick      | `I2C_SMBUS_BYTE`         |
//! | Byte       | `I2C_SMBUS_BYTE_DATA`    |
//! | Word       | `I2C_SMBUS_WORD_DATA`    |
//! | Block(n)   | `I2C_SMBUS_I2C_BLOCK_DATA` |
//!
//! A quick access is therefore a receive-byte or send-byte, where the
//! command byte itself is the data on a write.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::errno::Errno;

use crate::error::{Error, Result};
use crate::hw_trait::{HwError, I2cError, Phase};
use crate::smbus::{Direction, SizeClass, BLOCK_MAX};
use crate::tracing::prelude::*;

use super::{Backend, BackendKind};

const I2C_SMBUS_BYTE: u32 = 1;
const I2C_SMBUS_BYTE_DATA: u32 = 2;
const I2C_SMBUS_WORD_DATA: u32 = 3;
const I2C_SMBUS_I2C_BLOCK_DATA: u32 = 8;

/// `union i2c_smbus_data`: byte, word or length-prefixed block.
#[repr(C)]
pub struct SmbusData {
    block: [u8; BLOCK_MAX + 2],
}

/// `struct i2c_smbus_ioctl_data`
#[repr(C)]
#[allow(dead_code)] // read by the kernel
pub struct SmbusIoctlData {
    read_write: u8,
    command: u8,
    size: u32,
    data: *mut SmbusData,
}

mod ioctl {
    use super::SmbusIoctlData;

    const I2C_SLAVE: u16 = 0x0703;
    const I2C_SMBUS: u16 = 0x0720;

    nix::ioctl_write_int_bad!(set_slave_address, I2C_SLAVE);
    nix::ioctl_readwrite_bad!(smbus, I2C_SMBUS, SmbusIoctlData);
}

/// Bus on a kernel I2C adapter.
pub struct HardwareBackend {
    file: Option<File>,
    path: PathBuf,
    address: Option<u8>,
}

impl HardwareBackend {
    /// Open the device node read/write.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::Open {
                path: path.display().to_string(),
                source,
            })?;

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            address: None,
        })
    }
}

impl Backend for HardwareBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hardware
    }

    fn set_address(&mut self, address: u8) -> Result<()> {
        let file = self.file.as_ref().ok_or(Error::Closed)?;
        if address > 0x7F {
            return Err(Error::InvalidParameter(format!(
                "slave address 0x{:02x} is not 7-bit",
                address
            )));
        }

        // SAFETY: I2C_SLAVE takes the address by value.
        unsafe { ioctl::set_slave_address(file.as_raw_fd(), i32::from(address)) }.map_err(
            |errno| {
                error!(
                    device = %self.path.display(),
                    addr = %format!("{:#04x}", address),
                    error = %errno,
                    "I2C_SLAVE failed"
                );
                Error::Hw(HwError::Io(io::Error::from(errno)))
            },
        )?;

        self.address = Some(address);
        Ok(())
    }

    fn access(
        &mut self,
        direction: Direction,
        command: u8,
        size: SizeClass,
        data: &mut [u8],
    ) -> Result<()> {
        let address = self.address.ok_or(Error::NoAddress)?;
        let file = self.file.as_ref().ok_or(Error::Closed)?;
        let len = size.check(data.len())?;

        let (kernel_size, mut raw) = encode(direction, size, &data[..len]);
        let mut args = SmbusIoctlData {
            read_write: direction.flag(),
            command,
            size: kernel_size,
            data: &mut raw,
        };

        // SAFETY: `args` and the buffer it points to outlive the call, and the
        // buffer is large enough for any transfer the kernel may fill in.
        unsafe { ioctl::smbus(file.as_raw_fd(), &mut args) }
            .map_err(|errno| map_errno(errno, address))?;

        if direction == Direction::Read {
            decode(size, &raw, data);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.address = None;
        if self.file.take().is_some() {
            debug!(device = %self.path.display(), "I2C device closed");
        }
        Ok(())
    }
}

/// Kernel transfer size and data union for an access.
///
/// Write payloads are copied in; block transfers carry their length in the
/// first byte for both directions.
fn encode(direction: Direction, size: SizeClass, payload: &[u8]) -> (u32, SmbusData) {
    let mut raw = SmbusData {
        block: [0; BLOCK_MAX + 2],
    };
    let write = direction == Direction::Write;

    let kernel_size = match size {
        SizeClass::Quick => I2C_SMBUS_BYTE,
        SizeClass::Byte => {
            if write {
                raw.block[0] = payload[0];
            }
            I2C_SMBUS_BYTE_DATA
        }
        SizeClass::Word => {
            if write {
                let word = u16::from_le_bytes([payload[0], payload[1]]);
                raw.block[..2].copy_from_slice(&word.to_ne_bytes());
            }
            I2C_SMBUS_WORD_DATA
        }
        SizeClass::Block(n) => {
            raw.block[0] = n;
            if write {
                raw.block[1..=payload.len()].copy_from_slice(payload);
            }
            I2C_SMBUS_I2C_BLOCK_DATA
        }
    };
    (kernel_size, raw)
}

/// Copy a read result back into the caller's buffer, in bus order.
fn decode(size: SizeClass, raw: &SmbusData, data: &mut [u8]) {
    match size {
        SizeClass::Quick | SizeClass::Byte => {
            if let Some(first) = data.first_mut() {
                *first = raw.block[0];
            }
        }
        SizeClass::Word => {
            let word = u16::from_ne_bytes([raw.block[0], raw.block[1]]);
            data[..2].copy_from_slice(&word.to_le_bytes());
        }
        SizeClass::Block(n) => {
            let n = n as usize;
            data[..n].copy_from_slice(&raw.block[1..=n]);
        }
    }
}

fn map_errno(errno: Errno, address: u8) -> Error {
    match errno {
        Errno::ENXIO | Errno::EREMOTEIO => I2cError::NoAck {
            address,
            phase: Phase::Unknown,
        }
        .into(),
        other => Error::Hw(HwError::Io(io::Error::from(other))),
    }
}
