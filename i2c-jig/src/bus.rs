//! Bus sessions.
//!
//! A [`Bus`] is one open I2C bus: a backend chosen from the descriptor at
//! open time plus the currently selected slave address. The SMBus-style
//! helpers below each turn into exactly one backend access.
//!
//! Several buses can be open at once. [`Buses`] keeps them in an arena and
//! hands out [`BusHandle`]s for callers that prefer handles to owned values.

use slotmap::SlotMap;

use crate::backend::{self, Backend, BackendKind};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::smbus::{block_size, Direction, SizeClass};
use crate::tracing::prelude::*;

/// An open I2C bus.
pub struct Bus {
    backend: Box<dyn Backend>,
    descriptor: String,
}

impl Bus {
    /// Open a bus with configuration taken from the environment.
    ///
    /// `descriptor` is a device node such as `/dev/i2c-1` or a GPIO pair
    /// such as `GPIO,SCL,18,SDA,23`.
    pub fn open(descriptor: &str) -> Result<Self> {
        Self::open_with(descriptor, &Config::from_env())
    }

    pub fn open_with(descriptor: &str, config: &Config) -> Result<Self> {
        let backend = backend::open(descriptor, config)?;
        Ok(Self::from_backend(backend, descriptor))
    }

    /// Open a bus and select `address` on it.
    ///
    /// The bus is closed again if the address cannot be set.
    pub fn open_device(descriptor: &str, address: u8) -> Result<Self> {
        let mut bus = Self::open(descriptor)?;
        if let Err(e) = bus.set_address(address) {
            if let Err(close) = bus.close() {
                warn!(descriptor, error = %close, "Close after failed address select");
            }
            return Err(e);
        }
        Ok(bus)
    }

    /// Wrap an already constructed backend.
    pub fn from_backend(backend: Box<dyn Backend>, descriptor: impl Into<String>) -> Self {
        Self {
            backend,
            descriptor: descriptor.into(),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Descriptor the bus was opened with.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Select the 7-bit slave address for following operations.
    pub fn set_address(&mut self, address: u8) -> Result<()> {
        self.backend.set_address(address)?;
        trace!(descriptor = %self.descriptor, addr = %format!("{:#04x}", address), "Address set");
        Ok(())
    }

    /// Perform one raw SMBus access.
    pub fn access(
        &mut self,
        direction: Direction,
        command: u8,
        size: SizeClass,
        data: &mut [u8],
    ) -> Result<()> {
        self.backend.access(direction, command, size, data)
    }

    /// Quick read.
    ///
    /// On the kernel backend this is a receive-byte. The GPIO backend only
    /// addresses the device, so the result is always zero there and the call
    /// is useful as a presence probe.
    pub fn read(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.access(Direction::Read, 0, SizeClass::Quick, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_byte(&mut self, register: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.access(Direction::Read, register, SizeClass::Byte, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_word(&mut self, register: u8) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.access(Direction::Read, register, SizeClass::Word, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Quick write.
    ///
    /// The kernel backend sends `value` as a single byte. The GPIO backend
    /// only addresses the device and `value` is not transmitted.
    pub fn write(&mut self, value: u8) -> Result<()> {
        self.access(Direction::Write, value, SizeClass::Quick, &mut [])
    }

    pub fn write_byte(&mut self, register: u8, value: u8) -> Result<()> {
        self.access(Direction::Write, register, SizeClass::Byte, &mut [value])
    }

    pub fn write_word(&mut self, register: u8, value: u16) -> Result<()> {
        self.access(
            Direction::Write,
            register,
            SizeClass::Word,
            &mut value.to_le_bytes(),
        )
    }

    /// Read `buf.len()` consecutive bytes starting at `register` (1..=32).
    pub fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<()> {
        let size = block_size(buf.len())?;
        self.access(Direction::Read, register, size, buf)
    }

    /// Write `data` to consecutive registers starting at `register` (1..=32
    /// bytes).
    pub fn write_block(&mut self, register: u8, data: &[u8]) -> Result<()> {
        let size = block_size(data.len())?;
        let mut buf = data.to_vec();
        self.access(Direction::Write, register, size, &mut buf)
    }

    /// Release the bus. Safe to call repeatedly; also runs on drop.
    pub fn close(&mut self) -> Result<()> {
        self.backend.close().inspect_err(|e| {
            error!(descriptor = %self.descriptor, error = %e, "Bus close failed");
        })
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        if let Err(e) = self.backend.close() {
            warn!(descriptor = %self.descriptor, error = %e, "Bus close on drop failed");
        }
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("descriptor", &self.descriptor)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Key of a bus inside [`Buses`].
pub type BusHandle = slotmap::DefaultKey;

/// Arena of open buses.
pub struct Buses {
    config: Config,
    buses: SlotMap<BusHandle, Bus>,
}

impl Buses {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            buses: SlotMap::new(),
        }
    }

    /// Open a bus and return its handle.
    ///
    /// A failed open leaves the arena unchanged.
    pub fn open(&mut self, descriptor: &str) -> Result<BusHandle> {
        let bus = Bus::open_with(descriptor, &self.config)?;
        Ok(self.insert(bus))
    }

    /// Take ownership of an already open bus.
    pub fn insert(&mut self, bus: Bus) -> BusHandle {
        self.buses.insert(bus)
    }

    pub fn get_mut(&mut self, handle: BusHandle) -> Result<&mut Bus> {
        self.buses.get_mut(handle).ok_or(Error::UnknownHandle)
    }

    /// Close a bus and forget its handle.
    pub fn close(&mut self, handle: BusHandle) -> Result<()> {
        let mut bus = self.buses.remove(handle).ok_or(Error::UnknownHandle)?;
        bus.close()
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }
}

impl Default for Buses {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
