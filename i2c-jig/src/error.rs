//! Crate-level error type.

use std::io;

use crate::hw_trait::{HwError, I2cError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Pin or controller failure during a transaction
    #[error(transparent)]
    Hw(#[from] HwError),

    /// Protocol failure (nack)
    #[error(transparent)]
    I2c(#[from] I2cError),

    /// Device node could not be opened
    #[error("Unable to open I2C device {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Descriptor names neither a device node nor a GPIO bus
    #[error("Unrecognized I2C mode: {0:?}")]
    UnrecognizedMode(String),

    /// GPIO descriptor with missing or bad pin assignments
    #[error("Invalid GPIO bus descriptor {descriptor:?}: {reason}")]
    InvalidDescriptor { descriptor: String, reason: String },

    /// A bus pin could not be exported, configured or released
    #[error("GPIO {pin} setup failed: {source}")]
    PinSetup {
        pin: u32,
        #[source]
        source: HwError,
    },

    /// No slave address is set on the bus
    #[error("No slave address set")]
    NoAddress,

    /// Bad argument to a bus operation
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Handle does not refer to an open bus
    #[error("Unknown bus handle")]
    UnknownHandle,

    /// Bus has already been closed
    #[error("Bus is closed")]
    Closed,
}

impl Error {
    /// True if the error is a missing acknowledge from the addressed device.
    pub fn is_nack(&self) -> bool {
        matches!(self, Error::I2c(I2cError::NoAck { .. }))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
