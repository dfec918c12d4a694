//! Bus backends and backend selection.
//!
//! A backend carries out SMBus accesses for one open bus. Two exist:
//!
//! - [`HardwareBackend`]: the kernel i2c-dev driver via `ioctl`
//! - [`SoftwareBackend`]: the bit-bang engine on two GPIO pins
//!
//! [`open`] parses a descriptor once and returns the matching backend behind
//! the [`Backend`] trait, so everything above this module is
//! backend-agnostic.

pub mod descriptor;
pub mod hardware;
pub mod software;

use std::fmt;

pub use descriptor::Descriptor;
pub use hardware::HardwareBackend;
pub use software::SoftwareBackend;

use crate::config::Config;
use crate::error::Result;
use crate::smbus::{Direction, SizeClass};
use crate::tracing::prelude::*;

/// Which implementation sits behind a [`Backend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Hardware,
    Software,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Hardware => f.write_str("hardware"),
            BackendKind::Software => f.write_str("gpio"),
        }
    }
}

/// One open bus session's transport.
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    /// Select the 7-bit slave address used by following accesses.
    fn set_address(&mut self, address: u8) -> Result<()>;

    /// Perform one SMBus access.
    ///
    /// `data` holds at least `size.payload_len()` bytes; for reads it
    /// receives the payload, for writes it supplies it.
    fn access(
        &mut self,
        direction: Direction,
        command: u8,
        size: SizeClass,
        data: &mut [u8],
    ) -> Result<()>;

    /// Release the transport and forget the slave address.
    ///
    /// Must be safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

/// Open the backend named by `descriptor`.
pub fn open(descriptor: &str, config: &Config) -> Result<Box<dyn Backend>> {
    let backend: Box<dyn Backend> = match descriptor.parse::<Descriptor>()? {
        Descriptor::Device(path) => Box::new(HardwareBackend::open(&path)?),
        Descriptor::Gpio { scl, sda } => Box::new(SoftwareBackend::open_sysfs(scl, sda, config)?),
    };
    debug!(descriptor, kind = %backend.kind(), "Bus opened");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_open_rejects_unknown_descriptor() {
        let result = open("spi0", &Config::default());
        assert!(matches!(result, Err(Error::UnrecognizedMode(_))));
    }

    #[test]
    fn test_open_missing_device_node() {
        let result = open("/dev/i2c-jig-does-not-exist", &Config::default());
        match result {
            Err(Error::Open { path, .. }) => assert_eq!(path, "/dev/i2c-jig-does-not-exist"),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("open should fail"),
        }
    }

    #[test]
    fn test_open_gpio_without_sysfs() {
        let config = Config {
            gpio_root: "/nonexistent/i2c-jig/gpio".into(),
            ..Config::default()
        };
        let result = open("GPIO,SCL,18,SDA,23", &config);
        assert!(matches!(result, Err(Error::PinSetup { pin: 18, .. })));
    }
}
