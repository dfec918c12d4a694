//! Software I2C master on two GPIO pins.
//!
//! The engine produces the I2C line sequences (start, repeated start, stop,
//! bit framing, acknowledge) purely through [`GpioPin`] calls separated by a
//! fixed [`Settle`] delay. It knows nothing about SMBus transaction shapes;
//! the software backend sequences these primitives into transactions.
//!
//! Timing is entirely software-driven. There is no clock-stretching
//! detection and no arbitration, so the engine must be the only master on
//! the wire.
//!
//! ```text
//!          start               bit (x8)           ack slot        stop
//!  SDA  ‾‾\_______   ...  X=====X======   ... ‾‾‾(in)‾‾‾   ...  ____/‾‾‾
//!  SCL  ‾‾‾‾‾\____   ...  ___/‾‾‾\____    ... ___/‾‾‾\__   ...  _/‾‾‾‾‾‾
//! ```

use std::time::Duration;

use crate::hw_trait::{GpioPin, HwError, PinMode, PinValue, Result};
use crate::tracing::prelude::*;

use PinValue::{High, Low};

/// Delay primitive used between pin changes.
///
/// Swap the implementation to use a better wait primitive on a given
/// platform; protocol logic does not change.
pub trait Settle: Send {
    fn settle(&mut self);
}

/// Blocking sleep for a fixed duration.
#[derive(Debug, Clone, Copy)]
pub struct ThreadSleep(pub Duration);

impl Settle for ThreadSleep {
    fn settle(&mut self) {
        std::thread::sleep(self.0);
    }
}

/// Acknowledge bit sampled in the ninth clock slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Receiver held SDA low
    Ack,
    /// SDA stayed high
    Nack,
}

impl Ack {
    pub fn is_ack(self) -> bool {
        self == Ack::Ack
    }
}

/// Bit-banged I2C master.
pub struct BitBang<P, D> {
    scl: P,
    sda: P,
    delay: D,
}

impl<P: GpioPin, D: Settle> BitBang<P, D> {
    /// Create an engine from two pins already configured as outputs.
    pub fn new(scl: P, sda: P, delay: D) -> Self {
        Self { scl, sda, delay }
    }

    /// Start condition, or a repeated start when `restart` is set.
    ///
    /// SDA falls, then SCL. For a restart both lines are first brought back
    /// high and the falling sequence is issued again, which re-addresses the
    /// bus without releasing it.
    pub fn begin(&mut self, restart: bool) -> Result<()> {
        self.sda(Low)?;
        self.scl(Low)?;
        if restart {
            self.sda(High)?;
            self.scl(High)?;
            self.sda(Low)?;
            self.scl(Low)?;
        }
        Ok(())
    }

    /// Stop condition: SCL rises, then SDA.
    pub fn end(&mut self) -> Result<()> {
        self.scl(High)?;
        self.sda(High)
    }

    /// Shift one byte out MSB first and sample the acknowledge bit.
    pub fn send(&mut self, byte: u8) -> Result<Ack> {
        for bit in (0..8).rev() {
            self.sda.write(PinValue::from(byte & (1 << bit) != 0))?;
            self.scl(High)?;
            self.scl(Low)?;
        }

        self.scl(High)?;
        self.sda.set_mode(PinMode::Input)?;
        self.delay.settle();
        let ack = match self.sda.read()? {
            Low => Ack::Ack,
            High => Ack::Nack,
        };
        self.sda.set_mode(PinMode::Output)?;
        self.delay.settle();
        self.scl(Low)?;

        trace!(byte = %format!("{:#04x}", byte), ack = ?ack, "TX");
        Ok(ack)
    }

    /// Shift one byte in MSB first.
    ///
    /// No acknowledge is driven; the caller follows up with [`BitBang::ack`]
    /// to ask for more, or stops to end the read.
    pub fn recv(&mut self) -> Result<u8> {
        let mut byte = 0u8;

        self.sda.set_mode(PinMode::Input)?;
        for _ in 0..8 {
            self.scl(High)?;
            byte <<= 1;
            if self.sda.read()? == High {
                byte |= 1;
            }
            self.scl(Low)?;
        }
        self.sda.set_mode(PinMode::Output)?;

        trace!(byte = %format!("{:#04x}", byte), "RX");
        Ok(byte)
    }

    /// Acknowledge a received byte: one clock pulse with SDA held low.
    pub fn ack(&mut self) -> Result<()> {
        self.sda(Low)?;
        self.scl(High)?;
        self.scl(Low)?;
        self.sda(High)
    }

    /// Run `f` between a start and a stop condition.
    ///
    /// The stop is issued on every exit path, including when `f` fails, so a
    /// nack never leaves the bus mid-transaction. An error from `f` takes
    /// precedence over one from the stop.
    pub fn transaction<T, E>(
        &mut self,
        f: impl FnOnce(&mut Self) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<HwError> + std::fmt::Display,
    {
        let result = self.begin(false).map_err(E::from).and_then(|()| f(self));
        match (result, self.end()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(stop)) => Err(E::from(stop)),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(stop)) => {
                warn!(error = %stop, "Stop condition failed after aborted transaction");
                Err(e)
            }
        }
    }

    /// Borrow the (clock, data) pins, e.g. to release them.
    pub fn pins_mut(&mut self) -> (&mut P, &mut P) {
        (&mut self.scl, &mut self.sda)
    }

    fn scl(&mut self, value: PinValue) -> Result<()> {
        self.scl.write(value)?;
        self.delay.settle();
        Ok(())
    }

    fn sda(&mut self, value: PinValue) -> Result<()> {
        self.sda.write(value)?;
        self.delay.settle();
        Ok(())
    }
}
