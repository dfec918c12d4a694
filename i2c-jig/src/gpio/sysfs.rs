//! Linux sysfs GPIO implementation.
//!
//! Drives pins through the legacy `/sys/class/gpio` text interface: a pin is
//! claimed by writing its number to `export`, after which `gpioN/direction`
//! and `gpioN/value` control it. Every access opens the attribute file,
//! transfers a few bytes and closes it again, so each call is a complete
//! write that the kernel applies before returning.

use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::hw_trait::{Gpio, GpioPin, HwError, PinMode, PinValue, Result};
use crate::tracing::prelude::*;

/// Sysfs GPIO controller rooted at a directory (normally `/sys/class/gpio`).
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Claim a pin for userspace control.
    pub fn export(&self, pin: u32) -> Result<()> {
        write_attr(&self.root.join("export"), &pin.to_string()).inspect_err(|e| {
            error!(pin, error = %e, "GPIO export failed");
        })
    }

    /// Return a pin to the kernel.
    pub fn unexport(&self, pin: u32) -> Result<()> {
        unexport_at(&self.root, pin)
    }
}

impl Gpio for SysfsGpio {
    type Pin = SysfsPin;

    /// Export `number` and return a handle to it.
    ///
    /// The pin's direction is left as the kernel set it; callers choose the
    /// mode they need.
    fn pin(&mut self, number: u32) -> Result<SysfsPin> {
        self.export(number)?;
        debug!(pin = number, root = %self.root.display(), "GPIO exported");
        Ok(SysfsPin {
            number,
            root: self.root.clone(),
            dir: self.root.join(format!("gpio{}", number)),
            exported: true,
        })
    }
}

/// One exported sysfs GPIO pin.
#[derive(Debug)]
pub struct SysfsPin {
    number: u32,
    root: PathBuf,
    dir: PathBuf,
    exported: bool,
}

impl SysfsPin {
    pub fn number(&self) -> u32 {
        self.number
    }
}

impl GpioPin for SysfsPin {
    fn set_mode(&mut self, mode: PinMode) -> Result<()> {
        write_attr(&self.dir.join("direction"), mode.as_sysfs()).inspect_err(|e| {
            error!(pin = self.number, mode = %mode, error = %e, "GPIO direction failed");
        })
    }

    fn write(&mut self, value: PinValue) -> Result<()> {
        let text = if bool::from(value) { "1" } else { "0" };
        write_attr(&self.dir.join("value"), text).inspect_err(|e| {
            error!(pin = self.number, error = %e, "GPIO set value failed");
        })
    }

    fn read(&mut self) -> Result<PinValue> {
        let path = self.dir.join("value");
        let mut first = [0u8; 1];
        let n = fs::File::open(&path)
            .and_then(|mut f| f.read(&mut first))
            .map_err(|e| {
                error!(pin = self.number, error = %e, "GPIO get value failed");
                HwError::Io(e)
            })?;

        match (n, first[0]) {
            (1, b'0') => Ok(PinValue::Low),
            (1, b'1') => Ok(PinValue::High),
            _ => Err(HwError::Other(format!(
                "unexpected contents in {}",
                path.display()
            ))),
        }
    }

    fn release(&mut self) -> Result<()> {
        if !self.exported {
            return Ok(());
        }
        unexport_at(&self.root, self.number)?;
        self.exported = false;
        debug!(pin = self.number, "GPIO unexported");
        Ok(())
    }
}

fn unexport_at(root: &Path, pin: u32) -> Result<()> {
    write_attr(&root.join("unexport"), &pin.to_string()).inspect_err(|e| {
        error!(pin, error = %e, "GPIO unexport failed");
    })
}

fn write_attr(path: &Path, value: &str) -> Result<()> {
    let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
    file.write_all(value.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fake sysfs tree in the system temp dir, removed on drop.
    struct FakeSysfs {
        root: PathBuf,
    }

    impl FakeSysfs {
        fn new(name: &str, pins: &[u32]) -> Self {
            let root = std::env::temp_dir()
                .join(format!("i2c-jig-sysfs-{}-{}", name, std::process::id()));
            let _ = fs::remove_dir_all(&root);
            fs::create_dir_all(&root).unwrap();
            fs::write(root.join("export"), "").unwrap();
            fs::write(root.join("unexport"), "").unwrap();
            for pin in pins {
                let dir = root.join(format!("gpio{}", pin));
                fs::create_dir_all(&dir).unwrap();
                fs::write(dir.join("direction"), "in").unwrap();
                fs::write(dir.join("value"), "0\n").unwrap();
            }
            Self { root }
        }

        fn read(&self, rel: &str) -> String {
            fs::read_to_string(self.root.join(rel)).unwrap()
        }
    }

    impl Drop for FakeSysfs {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn test_export_and_configure_pin() {
        let sysfs = FakeSysfs::new("configure", &[18]);
        let mut gpio = SysfsGpio::new(&sysfs.root);

        let mut pin = gpio.pin(18).unwrap();
        assert_eq!(sysfs.read("export"), "18");
        assert_eq!(pin.number(), 18);

        pin.set_mode(PinMode::Output).unwrap();
        assert_eq!(sysfs.read("gpio18/direction"), "out");

        pin.write(PinValue::High).unwrap();
        assert_eq!(sysfs.read("gpio18/value"), "1");
        assert_eq!(pin.read().unwrap(), PinValue::High);

        pin.write(PinValue::Low).unwrap();
        assert_eq!(pin.read().unwrap(), PinValue::Low);
    }

    #[test]
    fn test_release_unexports_once() {
        let sysfs = FakeSysfs::new("release", &[23]);
        let mut gpio = SysfsGpio::new(&sysfs.root);
        let mut pin = gpio.pin(23).unwrap();

        pin.release().unwrap();
        assert_eq!(sysfs.read("unexport"), "23");

        // A second release does not touch sysfs again
        fs::write(sysfs.root.join("unexport"), "").unwrap();
        pin.release().unwrap();
        assert_eq!(sysfs.read("unexport"), "");
    }

    #[test]
    fn test_missing_pin_directory_is_an_error() {
        let sysfs = FakeSysfs::new("missing", &[]);
        let mut gpio = SysfsGpio::new(&sysfs.root);

        // Export "succeeds" on the fake tree, but no gpio5/ appears
        let mut pin = gpio.pin(5).unwrap();
        assert!(matches!(pin.set_mode(PinMode::Output), Err(HwError::Io(_))));
        assert!(pin.read().is_err());
    }

    #[test]
    fn test_export_fails_without_sysfs() {
        let gpio = SysfsGpio::new("/nonexistent/i2c-jig/gpio");
        assert!(gpio.export(4).is_err());
    }

    #[test]
    fn test_read_rejects_garbage() {
        let sysfs = FakeSysfs::new("garbage", &[7]);
        let mut gpio = SysfsGpio::new(&sysfs.root);
        let mut pin = gpio.pin(7).unwrap();

        fs::write(sysfs.root.join("gpio7/value"), "x").unwrap();
        assert!(matches!(pin.read(), Err(HwError::Other(_))));
    }
}
