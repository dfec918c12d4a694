//! GPIO controller implementations.

pub mod sysfs;

pub use sysfs::{SysfsGpio, SysfsPin};
