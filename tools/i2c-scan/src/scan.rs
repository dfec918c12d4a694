//! Address scan.

use std::fmt;
use std::ops::RangeInclusive;

use i2c_jig::Bus;
use tracing::{debug, trace, warn};

/// Addresses outside the reserved blocks at either end of the 7-bit space.
pub const SCAN_RANGE: RangeInclusive<u8> = 0x03..=0x77;

/// How each address is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Quick read; on a GPIO bus this is a bare address probe
    Quick,
    /// Byte read of register 0
    Byte,
    /// Word read of register 0
    Word,
}

impl ProbeMode {
    fn probe(self, bus: &mut Bus) -> i2c_jig::Result<()> {
        match self {
            ProbeMode::Quick => bus.read().map(drop),
            ProbeMode::Byte => bus.read_byte(0).map(drop),
            ProbeMode::Word => bus.read_word(0).map(drop),
        }
    }
}

impl fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeMode::Quick => f.write_str("quick read"),
            ProbeMode::Byte => f.write_str("byte read"),
            ProbeMode::Word => f.write_str("word read"),
        }
    }
}

/// Probe every address in `range` and return those that answered.
///
/// A missing acknowledge is the normal negative result. Other failures are
/// logged and the scan moves on to the next address.
pub fn scan(bus: &mut Bus, mode: ProbeMode, range: RangeInclusive<u8>) -> Vec<u8> {
    let mut found = Vec::new();

    for address in range {
        if let Err(e) = bus.set_address(address) {
            warn!(addr = %format!("{:#04x}", address), error = %e, "Cannot select address");
            continue;
        }

        match mode.probe(bus) {
            Ok(()) => {
                debug!(addr = %format!("{:#04x}", address), "Device answered");
                found.push(address);
            }
            Err(e) if e.is_nack() => trace!(addr = %format!("{:#04x}", address), "No device"),
            Err(e) => warn!(addr = %format!("{:#04x}", address), error = %e, "Probe failed"),
        }
    }

    found
}
