//! I2C transactions from Linux userspace.
//!
//! A bus is opened from a descriptor string and then driven with SMBus-style
//! byte, word and block operations. Two backends sit behind the same API:
//!
//! - `/dev/i2c-N`: the kernel i2c-dev driver, via `ioctl`
//! - `GPIO,SCL,<pin>,SDA,<pin>`: a bit-banged master on two sysfs GPIOs, for
//!   boards whose I2C lines are not wired to a hardware controller
//!
//! ```no_run
//! use i2c_jig::Bus;
//!
//! # fn main() -> i2c_jig::Result<()> {
//! let mut bus = Bus::open_device("GPIO,SCL,18,SDA,23", 0x50)?;
//! bus.write_byte(0x10, 0xA5)?;
//! let value = bus.read_byte(0x10)?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod bitbang;
pub mod bus;
pub mod config;
pub mod error;
pub mod gpio;
pub mod hw_trait;
pub mod smbus;
pub mod tracing;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use bus::{Bus, BusHandle, Buses};
pub use config::Config;
pub use error::{Error, Result};
pub use smbus::{Direction, SizeClass};
