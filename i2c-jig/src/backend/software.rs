//! Software (bit-banged) backend.
//!
//! Turns SMBus accesses into engine sequences:
//!
//! ```text
//! write:  S  addr+W  A  [cmd  A  data0  A ... dataN  A]  P
//! read:   S  addr+W  A  [cmd  A  Sr  addr+R  A  data0  A ... dataN  N]  P
//! ```
//!
//! The bracketed part is skipped for quick accesses, which makes them a pure
//! address probe. Any nack ends the access at once with a stop.

use crate::bitbang::{Ack, BitBang, Settle, ThreadSleep};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gpio::{SysfsGpio, SysfsPin};
use crate::hw_trait::{Gpio, GpioPin, I2cError, PinMode, PinValue, Phase};
use crate::smbus::{Direction, SizeClass};
use crate::tracing::prelude::*;

use super::{Backend, BackendKind};

/// SMBus over the bit-bang engine.
pub struct SoftwareBackend<P, D> {
    engine: BitBang<P, D>,
    /// Slave address shifted left by one; zero when none is set.
    address: u8,
    open: bool,
    /// Set once both pins have been handed back.
    released: bool,
}

impl SoftwareBackend<SysfsPin, ThreadSleep> {
    /// Export and configure two sysfs GPIOs as a bus.
    ///
    /// Both pins end up as outputs driven high. If anything fails, pins
    /// exported so far are released again.
    pub fn open_sysfs(scl: u32, sda: u32, config: &Config) -> Result<Self> {
        let mut gpio = SysfsGpio::new(&config.gpio_root);

        let mut scl_pin = claim(&mut gpio, scl)?;
        let sda_pin = match claim(&mut gpio, sda) {
            Ok(pin) => pin,
            Err(e) => {
                if let Err(release) = scl_pin.release() {
                    warn!(pin = scl, error = %release, "Failed to release SCL after setup error");
                }
                return Err(e);
            }
        };

        debug!(scl, sda, settle_us = config.settle.as_micros() as u64, "GPIO bus ready");
        Ok(Self::new(BitBang::new(scl_pin, sda_pin, ThreadSleep(config.settle))))
    }
}

fn claim(gpio: &mut SysfsGpio, number: u32) -> Result<SysfsPin> {
    let mut pin = gpio
        .pin(number)
        .map_err(|source| Error::PinSetup { pin: number, source })?;

    let setup = pin
        .set_mode(PinMode::Output)
        .and_then(|()| pin.write(PinValue::High));
    if let Err(source) = setup {
        if let Err(release) = pin.release() {
            warn!(pin = number, error = %release, "Failed to release GPIO after setup error");
        }
        return Err(Error::PinSetup { pin: number, source });
    }
    Ok(pin)
}

impl<P: GpioPin, D: Settle> SoftwareBackend<P, D> {
    /// Wrap an engine whose pins are outputs and whose bus is idle.
    pub fn new(engine: BitBang<P, D>) -> Self {
        Self {
            engine,
            address: 0,
            open: true,
            released: false,
        }
    }
}

impl<P: GpioPin, D: Settle> Backend for SoftwareBackend<P, D> {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn set_address(&mut self, address: u8) -> Result<()> {
        if !self.open {
            return Err(Error::Closed);
        }
        if address > 0x7F {
            return Err(Error::InvalidParameter(format!(
                "slave address 0x{:02x} is not 7-bit",
                address
            )));
        }
        self.address = address << 1;
        Ok(())
    }

    fn access(
        &mut self,
        direction: Direction,
        command: u8,
        size: SizeClass,
        data: &mut [u8],
    ) -> Result<()> {
        if self.address == 0 {
            return Err(Error::NoAddress);
        }
        let len = size.check(data.len())?;
        let address = self.address;
        let payload = &mut data[..len];

        let result = match direction {
            Direction::Write => self
                .engine
                .transaction(|bb| write_transfer(bb, address, command, payload)),
            Direction::Read => self
                .engine
                .transaction(|bb| read_transfer(bb, address, command, payload)),
        };

        if let Err(e) = &result {
            debug!(
                addr = %format!("{:#04x}", address >> 1),
                cmd = %format!("{:#04x}", command),
                ?direction,
                %size,
                error = %e,
                "GPIO access failed"
            );
        }
        result
    }

    /// Forget the address and release both pins.
    ///
    /// A failed release is retried by the next `close`.
    fn close(&mut self) -> Result<()> {
        self.address = 0;
        self.open = false;
        if self.released {
            return Ok(());
        }

        let (scl, sda) = self.engine.pins_mut();
        let scl_result = scl.release();
        let sda_result = sda.release();
        scl_result.and(sda_result)?;
        self.released = true;
        Ok(())
    }
}

fn expect_ack(ack: Ack, address: u8, phase: Phase) -> Result<()> {
    match ack {
        Ack::Ack => Ok(()),
        Ack::Nack => Err(I2cError::NoAck {
            address: address >> 1,
            phase,
        }
        .into()),
    }
}

fn write_transfer<P: GpioPin, D: Settle>(
    bb: &mut BitBang<P, D>,
    address: u8,
    command: u8,
    payload: &[u8],
) -> Result<()> {
    expect_ack(bb.send(address)?, address, Phase::Address)?;
    if payload.is_empty() {
        return Ok(());
    }
    expect_ack(bb.send(command)?, address, Phase::Command)?;
    for (i, byte) in payload.iter().enumerate() {
        expect_ack(bb.send(*byte)?, address, Phase::Data(i))?;
    }
    Ok(())
}

fn read_transfer<P: GpioPin, D: Settle>(
    bb: &mut BitBang<P, D>,
    address: u8,
    command: u8,
    payload: &mut [u8],
) -> Result<()> {
    expect_ack(bb.send(address)?, address, Phase::Address)?;
    if payload.is_empty() {
        return Ok(());
    }
    expect_ack(bb.send(command)?, address, Phase::Command)?;

    bb.begin(true)?;
    expect_ack(
        bb.send(address | Direction::Read.flag())?,
        address,
        Phase::ReadAddress,
    )?;

    // Ack every byte but the last; the missing ack tells the device to stop
    let last = payload.len() - 1;
    for (i, slot) in payload.iter_mut().enumerate() {
        *slot = bb.recv()?;
        if i < last {
            bb.ack()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BusEvent, Line, NoSettle, PinOp, SimPin, SimWire};

    const DEV: u8 = 0x50;

    fn backend(wire: &SimWire) -> SoftwareBackend<SimPin, NoSettle> {
        let (scl, sda) = wire.pins();
        SoftwareBackend::new(BitBang::new(scl, sda, NoSettle))
    }

    fn ends_with_stop(ops: &[PinOp]) -> bool {
        ops.ends_with(&[
            PinOp::Write(Line::Scl, PinValue::High),
            PinOp::Write(Line::Sda, PinValue::High),
        ])
    }

    #[test]
    fn test_access_without_address_touches_nothing() {
        let wire = SimWire::with_peer(DEV);
        let mut bus = backend(&wire);

        let mut buf = [0u8; 1];
        let result = bus.access(Direction::Read, 0, SizeClass::Byte, &mut buf);
        assert!(matches!(result, Err(Error::NoAddress)));
        assert!(wire.take_ops().is_empty());
    }

    #[test]
    fn test_rejects_wide_address() {
        let wire = SimWire::new();
        let mut bus = backend(&wire);
        assert!(matches!(
            bus.set_address(0x80),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_short_buffer_rejected_before_bus_activity() {
        let wire = SimWire::with_peer(DEV);
        let mut bus = backend(&wire);
        bus.set_address(DEV).unwrap();

        let mut buf = [0u8; 1];
        let result = bus.access(Direction::Write, 0, SizeClass::Word, &mut buf);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
        assert!(wire.take_ops().is_empty());
    }

    #[test]
    fn test_quick_probe_acked_has_no_data_phase() {
        let wire = SimWire::with_peer(DEV);
        let mut bus = backend(&wire);
        bus.set_address(DEV).unwrap();

        bus.access(Direction::Read, 0, SizeClass::Quick, &mut []).unwrap();
        assert_eq!(wire.bytes(), vec![(DEV << 1, true)]);
        assert!(ends_with_stop(&wire.take_ops()));
    }

    #[test]
    fn test_quick_probe_without_device_fails() {
        let wire = SimWire::new();
        let mut bus = backend(&wire);
        bus.set_address(DEV).unwrap();

        let err = bus
            .access(Direction::Read, 0, SizeClass::Quick, &mut [])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::I2c(I2cError::NoAck { address: DEV, phase: Phase::Address })
        ));
        assert!(ends_with_stop(&wire.take_ops()));
    }

    #[test]
    fn test_write_sequence() {
        let wire = SimWire::with_peer(DEV);
        let mut bus = backend(&wire);
        bus.set_address(DEV).unwrap();

        let mut data = [0x34, 0x12];
        bus.access(Direction::Write, 0x10, SizeClass::Word, &mut data)
            .unwrap();

        assert_eq!(
            wire.bytes(),
            vec![(0xA0, true), (0x10, true), (0x34, true), (0x12, true)]
        );
        assert_eq!(wire.events()[0], BusEvent::Start);
        assert_eq!(wire.register(DEV, 0x10), 0x34);
        assert_eq!(wire.register(DEV, 0x11), 0x12);
        assert!(ends_with_stop(&wire.take_ops()));
    }

    #[test]
    fn test_nack_in_each_write_phase_aborts_to_stop() {
        // Index 0 is the command byte, 1.. the payload
        for (nack_at, phase, bytes_on_wire) in [
            (0, Phase::Command, 2),
            (1, Phase::Data(0), 3),
            (2, Phase::Data(1), 4),
        ] {
            let wire = SimWire::with_peer(DEV);
            wire.nack_write_byte(DEV, nack_at);
            let mut bus = backend(&wire);
            bus.set_address(DEV).unwrap();

            let mut data = [1, 2, 3];
            let err = bus
                .access(Direction::Write, 0x20, SizeClass::Block(3), &mut data)
                .unwrap_err();

            assert!(
                matches!(err, Error::I2c(I2cError::NoAck { phase: p, .. }) if p == phase),
                "nack at {}: {:?}",
                nack_at,
                err
            );
            let bytes = wire.bytes();
            assert_eq!(bytes.len(), bytes_on_wire, "nack at {}", nack_at);
            assert!(!bytes.last().unwrap().1);
            assert!(ends_with_stop(&wire.take_ops()));
        }
    }

    #[test]
    fn test_read_sequence_acks_all_but_last() {
        let wire = SimWire::with_peer(DEV);
        wire.set_register(DEV, 0x05, 0xDE);
        wire.set_register(DEV, 0x06, 0xAD);
        wire.set_register(DEV, 0x07, 0xBE);
        let mut bus = backend(&wire);
        bus.set_address(DEV).unwrap();

        let mut data = [0u8; 3];
        bus.access(Direction::Read, 0x05, SizeClass::Block(3), &mut data)
            .unwrap();
        assert_eq!(data, [0xDE, 0xAD, 0xBE]);

        let events = wire.events();
        let starts = events.iter().filter(|e| **e == BusEvent::Start).count();
        assert_eq!(starts, 2, "start plus one repeated start: {:?}", events);
        assert_eq!(
            wire.bytes(),
            vec![
                (0xA0, true),
                (0x05, true),
                (0xA1, true),
                (0xDE, true),
                (0xAD, true),
                (0xBE, false),
            ]
        );
        assert!(ends_with_stop(&wire.take_ops()));
    }

    #[test]
    fn test_read_nack_on_write_address() {
        let wire = SimWire::with_peer(DEV);
        let mut bus = backend(&wire);
        bus.set_address(DEV + 1).unwrap();

        let mut data = [0u8; 1];
        let err = bus
            .access(Direction::Read, 0, SizeClass::Byte, &mut data)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::I2c(I2cError::NoAck { address: 0x51, phase: Phase::Address })
        ));
        assert_eq!(wire.bytes().len(), 1);
    }

    #[test]
    fn test_read_nack_on_read_address_after_restart() {
        let wire = SimWire::with_peer(DEV);
        wire.nack_read_address(DEV);
        let mut bus = backend(&wire);
        bus.set_address(DEV).unwrap();

        let mut data = [0u8; 2];
        let err = bus
            .access(Direction::Read, 0x05, SizeClass::Word, &mut data)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::I2c(I2cError::NoAck { address: DEV, phase: Phase::ReadAddress })
        ));
        assert_eq!(
            wire.bytes(),
            vec![(0xA0, true), (0x05, true), (0xA1, false)]
        );

        // One ack sample per sent byte and no receive phase
        let ops = wire.take_ops();
        let samples = ops
            .iter()
            .filter(|op| matches!(op, PinOp::Read(Line::Sda, _)))
            .count();
        assert_eq!(samples, 3);
        assert!(ends_with_stop(&ops));
    }

    #[test]
    fn test_write_nack_on_address_sends_nothing_more() {
        let wire = SimWire::new();
        let mut bus = backend(&wire);
        bus.set_address(DEV).unwrap();

        let mut data = [0x34, 0x12];
        let err = bus
            .access(Direction::Write, 0x10, SizeClass::Word, &mut data)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::I2c(I2cError::NoAck { address: DEV, phase: Phase::Address })
        ));
        assert_eq!(wire.bytes(), vec![(0xA0, false)]);
        assert!(ends_with_stop(&wire.take_ops()));
    }

    #[test]
    fn test_pin_failure_surfaces_as_hw_error() {
        let wire = SimWire::with_peer(DEV);
        let mut bus = backend(&wire);
        bus.set_address(DEV).unwrap();
        wire.fail_writes(true);

        let err = bus
            .access(Direction::Write, 0, SizeClass::Quick, &mut [])
            .unwrap_err();
        assert!(matches!(err, Error::Hw(_)));
    }

    fn scratch_sysfs(name: &str, pins: &[u32]) -> std::path::PathBuf {
        let root = std::env::temp_dir()
            .join(format!("i2c-jig-soft-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("export"), "").unwrap();
        std::fs::write(root.join("unexport"), "").unwrap();
        for pin in pins {
            let dir = root.join(format!("gpio{}", pin));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("direction"), "in").unwrap();
            std::fs::write(dir.join("value"), "0").unwrap();
        }
        root
    }

    #[test]
    fn test_open_sysfs_leaves_bus_idle() {
        let root = scratch_sysfs("idle", &[18, 23]);
        let config = Config {
            gpio_root: root.clone(),
            ..Config::default()
        };

        let mut bus = SoftwareBackend::open_sysfs(18, 23, &config).unwrap();
        for pin in [18, 23] {
            let dir = root.join(format!("gpio{}", pin));
            assert_eq!(std::fs::read_to_string(dir.join("direction")).unwrap(), "out");
            assert_eq!(std::fs::read_to_string(dir.join("value")).unwrap(), "1");
        }

        bus.close().unwrap();
        // Second pin released last
        assert_eq!(std::fs::read_to_string(root.join("unexport")).unwrap(), "23");
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_open_sysfs_rolls_back_first_pin() {
        // No gpio23/ directory, so configuring SDA fails after SCL is set up
        let root = scratch_sysfs("rollback", &[18]);
        let config = Config {
            gpio_root: root.clone(),
            ..Config::default()
        };

        let result = SoftwareBackend::open_sysfs(18, 23, &config);
        assert!(matches!(result, Err(Error::PinSetup { pin: 23, .. })));
        assert_eq!(std::fs::read_to_string(root.join("unexport")).unwrap(), "18");
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_close_releases_pins_and_clears_address() {
        let wire = SimWire::with_peer(DEV);
        let mut bus = backend(&wire);
        bus.set_address(DEV).unwrap();

        bus.close().unwrap();
        assert_eq!(wire.released(), vec![Line::Scl, Line::Sda]);
        assert!(matches!(
            bus.access(Direction::Read, 0, SizeClass::Quick, &mut []),
            Err(Error::NoAddress)
        ));
        assert!(matches!(bus.set_address(DEV), Err(Error::Closed)));

        // Second close is a no-op
        bus.close().unwrap();
        assert_eq!(wire.released().len(), 2);
    }

    #[test]
    fn test_failed_release_is_retried_by_next_close() {
        let wire = SimWire::with_peer(DEV);
        let mut bus = backend(&wire);
        bus.set_address(DEV).unwrap();

        wire.fail_releases(true);
        assert!(matches!(bus.close(), Err(Error::Hw(_))));
        assert!(wire.released().is_empty());
        assert!(matches!(bus.set_address(DEV), Err(Error::Closed)));

        wire.fail_releases(false);
        bus.close().unwrap();
        assert_eq!(wire.released(), vec![Line::Scl, Line::Sda]);

        bus.close().unwrap();
        assert_eq!(wire.released().len(), 2);
    }
}
