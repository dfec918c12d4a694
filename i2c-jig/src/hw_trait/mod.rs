//! Hardware abstraction layer traits.
//!
//! This module defines the pin and bus interfaces the rest of the crate is
//! written against. The bit-bang engine only ever talks to [`GpioPin`], so it
//! runs unchanged on sysfs GPIO, on another pin driver, or on the simulated
//! wire used by the tests.

pub mod gpio;
pub mod i2c;

// Re-export traits
pub use gpio::{Gpio, GpioPin, PinMode, PinValue};
pub use i2c::{I2cError, Phase};

/// Common error type for hardware operations
#[derive(Debug, thiserror::Error)]
pub enum HwError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other hardware-specific error
    #[error("Hardware error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, HwError>;
