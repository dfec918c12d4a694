//! GPIO hardware abstraction trait.

use super::Result;
use std::fmt;

/// GPIO pin value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinValue {
    Low,
    High,
}

impl From<bool> for PinValue {
    fn from(value: bool) -> Self {
        if value { PinValue::High } else { PinValue::Low }
    }
}

impl From<PinValue> for bool {
    fn from(value: PinValue) -> Self {
        matches!(value, PinValue::High)
    }
}

/// GPIO pin mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

impl PinMode {
    /// Keyword understood by the sysfs `direction` attribute.
    pub fn as_sysfs(self) -> &'static str {
        match self {
            PinMode::Input => "in",
            PinMode::Output => "out",
        }
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sysfs())
    }
}

/// GPIO pin abstraction
///
/// All calls block until the pin has been updated. Implementations must not
/// add delays of their own; bus timing is the caller's business.
pub trait GpioPin: Send {
    /// Set the pin mode (input or output).
    fn set_mode(&mut self, mode: PinMode) -> Result<()>;

    /// Write a value to the pin (must be in output mode).
    fn write(&mut self, value: PinValue) -> Result<()>;

    /// Read the current value of the pin.
    fn read(&mut self) -> Result<PinValue>;

    /// Hand the pin back to the system (e.g. unexport it).
    ///
    /// Called when the owning bus is closed, and again on a later close if
    /// it failed. Releasing an already released pin does nothing.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// GPIO controller abstraction
pub trait Gpio {
    /// Type of pin references this controller returns
    type Pin: GpioPin;

    /// Claim a specific GPIO pin.
    fn pin(&mut self, number: u32) -> Result<Self::Pin>;
}
