//! Device descriptor parsing.
//!
//! A descriptor selects the backend:
//!
//! - `/dev/i2c-1` (anything starting with `/dev`): kernel i2c-dev node
//! - `GPIO,SCL,18,SDA,23`: software bus on sysfs GPIO 18 (clock) and 23
//!   (data); the role/pin pairs may come in either order
//!
//! The mode prefix and role names are matched case-insensitively.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Error;

const DEVICE_PREFIX: &str = "/dev";
const GPIO_TAG: &str = "GPIO";

/// Parsed bus descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// Kernel I2C device node
    Device(PathBuf),
    /// Bit-banged bus on two GPIO pins
    Gpio { scl: u32, sda: u32 },
}

impl FromStr for Descriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let head = s.get(..4).unwrap_or(s);
        if head.eq_ignore_ascii_case(GPIO_TAG) {
            parse_gpio(s)
        } else if head.eq_ignore_ascii_case(DEVICE_PREFIX) {
            Ok(Descriptor::Device(PathBuf::from(s)))
        } else {
            Err(Error::UnrecognizedMode(s.to_string()))
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::Device(path) => write!(f, "{}", path.display()),
            Descriptor::Gpio { scl, sda } => write!(f, "GPIO,SCL,{},SDA,{}", scl, sda),
        }
    }
}

fn parse_gpio(s: &str) -> Result<Descriptor, Error> {
    let invalid = |reason: &str| Error::InvalidDescriptor {
        descriptor: s.to_string(),
        reason: reason.to_string(),
    };

    let fields: Vec<&str> = s.split(',').map(str::trim).collect();
    if !fields[0].eq_ignore_ascii_case(GPIO_TAG) {
        return Err(invalid("expected GPIO tag"));
    }
    if fields.len() != 5 {
        return Err(invalid("expected SCL and SDA pin assignments"));
    }

    let mut scl = None;
    let mut sda = None;
    for pair in fields[1..].chunks(2) {
        let pin: u32 = pair[1]
            .parse()
            .map_err(|_| invalid(&format!("bad pin number {:?}", pair[1])))?;
        if pin == 0 {
            return Err(invalid("pin numbers must be nonzero"));
        }

        let slot = if pair[0].eq_ignore_ascii_case("SCL") {
            &mut scl
        } else if pair[0].eq_ignore_ascii_case("SDA") {
            &mut sda
        } else {
            return Err(invalid(&format!("unknown pin role {:?}", pair[0])));
        };
        if slot.replace(pin).is_some() {
            return Err(invalid(&format!("{} assigned twice", pair[0].to_uppercase())));
        }
    }

    match (scl, sda) {
        (Some(scl), Some(sda)) if scl == sda => Err(invalid("SCL and SDA on the same pin")),
        (Some(scl), Some(sda)) => Ok(Descriptor::Gpio { scl, sda }),
        _ => Err(invalid("expected SCL and SDA pin assignments")),
    }
}
