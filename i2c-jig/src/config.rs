//! Bus configuration.
//!
//! Parses environment variables to tune the software bus. Everything has a
//! default, so a jig that sets nothing gets the stock 50 µs settle time and
//! the kernel's sysfs GPIO tree.

use std::path::PathBuf;
use std::time::Duration;

use crate::tracing::prelude::*;

/// Delay after each pin change on the software bus.
pub const DEFAULT_SETTLE: Duration = Duration::from_micros(50);

/// Root of the sysfs GPIO interface.
pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

/// Environment variable overriding the settle delay, in microseconds.
pub const ENV_SETTLE_US: &str = "I2C_JIG_SETTLE_US";

/// Environment variable overriding the sysfs GPIO root.
pub const ENV_GPIO_ROOT: &str = "I2C_JIG_GPIO_ROOT";

/// Settings used when opening a bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Settle delay after each pin write on the software bus.
    ///
    /// Sets the bus rate: a bit takes two settle periods, so the default
    /// gives a clock of roughly 10 kHz before sysfs overhead.
    pub settle: Duration,

    /// Directory holding the `export`, `unexport` and `gpioN` entries.
    pub gpio_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settle: DEFAULT_SETTLE,
            gpio_root: PathBuf::from(DEFAULT_GPIO_ROOT),
        }
    }
}

impl Config {
    /// Build a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `I2C_JIG_SETTLE_US`: settle delay in microseconds (default: 50)
    /// - `I2C_JIG_GPIO_ROOT`: sysfs GPIO directory (default: `/sys/class/gpio`)
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var(ENV_SETTLE_US) {
            match value.trim().parse::<u64>() {
                Ok(us) => config.settle = Duration::from_micros(us),
                Err(e) => warn!(
                    value = %value,
                    error = %e,
                    "Ignoring invalid {}", ENV_SETTLE_US
                ),
            }
        }

        if let Ok(root) = std::env::var(ENV_GPIO_ROOT) {
            if root.is_empty() {
                warn!("Ignoring empty {}", ENV_GPIO_ROOT);
            } else {
                config.gpio_root = PathBuf::from(root);
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var(ENV_SETTLE_US);
        std::env::remove_var(ENV_GPIO_ROOT);
    }

    #[test]
    #[serial]
    fn test_from_env_defaults_when_not_set() {
        clear_env();

        let config = Config::from_env();
        assert_eq!(config, Config::default());
        assert_eq!(config.settle, Duration::from_micros(50));
        assert_eq!(config.gpio_root, PathBuf::from("/sys/class/gpio"));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var(ENV_SETTLE_US, "5");
        std::env::set_var(ENV_GPIO_ROOT, "/tmp/fake-gpio");

        let config = Config::from_env();
        assert_eq!(config.settle, Duration::from_micros(5));
        assert_eq!(config.gpio_root, PathBuf::from("/tmp/fake-gpio"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_settle_falls_back_to_default() {
        clear_env();
        std::env::set_var(ENV_SETTLE_US, "fast");

        let config = Config::from_env();
        assert_eq!(config.settle, DEFAULT_SETTLE);

        clear_env();
    }
}
