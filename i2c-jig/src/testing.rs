//! Simulated I2C wire for tests.
//!
//! [`SimWire`] models the two bus lines as wired-AND: the master's pins drive
//! them through [`SimPin`], any number of simulated peers can pull SDA low,
//! and the line reads high otherwise. Every pin call is recorded as a
//! [`PinOp`], and a small monitor decodes the line activity into
//! [`BusEvent`]s the way a logic analyzer would.
//!
//! Peers are idealized SMBus register files: the first byte written after
//! the address selects a register, following bytes are stored with
//! auto-increment, and reads return registers from the current pointer.
//!
//! Start/stop decoding is suppressed inside the acknowledge slot, where the
//! master flips its data pin between output and input.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::bitbang::Settle;
use crate::hw_trait::{GpioPin, HwError, PinMode, PinValue, Result};

/// Settle that does not wait.
pub struct NoSettle;

impl Settle for NoSettle {
    fn settle(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Scl,
    Sda,
}

/// One call made on a simulated pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOp {
    Write(Line, PinValue),
    Mode(Line, PinMode),
    Read(Line, PinValue),
}

/// Decoded bus activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Start,
    Stop,
    /// A complete byte plus its acknowledge bit (true = ack).
    Byte { value: u8, ack: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerMode {
    Idle,
    Address,
    Write,
    Read,
}

struct Peer {
    address: u8,
    registers: [u8; 256],
    pointer: u8,
    mode: PeerMode,
    drive_low: bool,
    read_pending: bool,
    tx: u8,
    received: usize,
    nack_at: Option<usize>,
    nack_read: bool,
}

impl Peer {
    fn new(address: u8) -> Self {
        Self {
            address,
            registers: [0; 256],
            pointer: 0,
            mode: PeerMode::Idle,
            drive_low: false,
            read_pending: false,
            tx: 0,
            received: 0,
            nack_at: None,
            nack_read: false,
        }
    }

    fn on_start(&mut self) {
        self.mode = PeerMode::Address;
        self.drive_low = false;
        self.read_pending = false;
    }

    fn on_stop(&mut self) {
        self.mode = PeerMode::Idle;
        self.drive_low = false;
    }

    // Falling edge after the eighth bit
    fn on_byte(&mut self, byte: u8) {
        match self.mode {
            PeerMode::Address => {
                if byte >> 1 != self.address {
                    self.mode = PeerMode::Idle;
                    return;
                }
                if byte & 1 == 1 {
                    if self.nack_read {
                        self.mode = PeerMode::Idle;
                        return;
                    }
                    self.drive_low = true;
                    self.read_pending = true;
                } else {
                    self.drive_low = true;
                    self.mode = PeerMode::Write;
                    self.received = 0;
                }
            }
            PeerMode::Write => {
                if self.nack_at == Some(self.received) {
                    self.mode = PeerMode::Idle;
                    return;
                }
                if self.received == 0 {
                    self.pointer = byte;
                } else {
                    self.registers[self.pointer as usize] = byte;
                    self.pointer = self.pointer.wrapping_add(1);
                }
                self.received += 1;
                self.drive_low = true;
            }
            PeerMode::Read => self.drive_low = false,
            PeerMode::Idle => {}
        }
    }

    // Rising edge of the ninth clock
    fn on_ack_clock(&mut self, acked: bool) {
        if self.mode != PeerMode::Read {
            return;
        }
        if acked {
            self.pointer = self.pointer.wrapping_add(1);
            self.tx = self.registers[self.pointer as usize];
        } else {
            self.mode = PeerMode::Idle;
        }
    }

    // Falling edge of the ninth clock
    fn on_ack_done(&mut self) {
        self.drive_low = false;
        if self.read_pending {
            self.read_pending = false;
            self.mode = PeerMode::Read;
            self.tx = self.registers[self.pointer as usize];
        }
        if self.mode == PeerMode::Read {
            self.drive_low = self.tx & 0x80 == 0;
        }
    }

    // Falling edge after bit `sent` (1..=7) of a byte
    fn on_bit_done(&mut self, sent: u8) {
        if self.mode == PeerMode::Read {
            self.drive_low = self.tx & (0x80 >> sent) == 0;
        }
    }
}

struct Wire {
    scl_out: bool,
    scl_output: bool,
    sda_out: bool,
    sda_output: bool,
    scl: bool,
    sda: bool,

    bits: u8,
    shift: u8,
    byte_index: usize,
    read_transfer: bool,
    pending: Option<u8>,

    peers: Vec<Peer>,
    ops: Vec<PinOp>,
    events: Vec<BusEvent>,
    released: Vec<Line>,
    fail_writes: bool,
    fail_releases: bool,
}

impl Wire {
    fn new() -> Self {
        Self {
            scl_out: true,
            scl_output: true,
            sda_out: true,
            sda_output: true,
            scl: true,
            sda: true,
            bits: 0,
            shift: 0,
            byte_index: 0,
            read_transfer: false,
            pending: None,
            peers: Vec::new(),
            ops: Vec::new(),
            events: Vec::new(),
            released: Vec::new(),
            fail_writes: false,
            fail_releases: false,
        }
    }

    fn scl_level(&self) -> bool {
        !self.scl_output || self.scl_out
    }

    fn sda_level(&self) -> bool {
        let master = !self.sda_output || self.sda_out;
        master && !self.peers.iter().any(|p| p.drive_low)
    }

    fn in_ack_slot(&self) -> bool {
        self.bits == 9
    }

    /// Recompute line levels after a master action and react to edges.
    fn update(&mut self) {
        let (old_scl, old_sda) = (self.scl, self.sda);
        self.scl = self.scl_level();
        self.sda = self.sda_level();

        if self.scl != old_scl {
            if self.scl {
                self.on_rise();
            } else {
                self.on_fall();
            }
            self.sda = self.sda_level();
        } else if self.scl && self.sda != old_sda && !self.in_ack_slot() {
            if self.sda {
                self.on_stop();
            } else {
                self.on_start();
            }
            self.sda = self.sda_level();
        }
    }

    fn on_start(&mut self) {
        self.events.push(BusEvent::Start);
        self.bits = 0;
        self.shift = 0;
        self.byte_index = 0;
        self.read_transfer = false;
        self.pending = None;
        self.peers.iter_mut().for_each(Peer::on_start);
    }

    fn on_stop(&mut self) {
        self.events.push(BusEvent::Stop);
        self.bits = 0;
        self.shift = 0;
        self.pending = None;
        self.peers.iter_mut().for_each(Peer::on_stop);
    }

    fn on_rise(&mut self) {
        if self.bits < 8 {
            self.shift = (self.shift << 1) | self.sda as u8;
            self.bits += 1;
            return;
        }
        if self.bits != 8 {
            return;
        }

        self.bits = 9;
        let value = self.shift;
        let master_sent = self.byte_index == 0 || !self.read_transfer;
        if self.byte_index == 0 {
            self.read_transfer = value & 1 == 1;
        }

        if master_sent {
            // Ack is whatever the master samples once its data pin is input
            self.pending = Some(value);
        } else {
            let acked = !self.sda;
            self.events.push(BusEvent::Byte { value, ack: acked });
            self.peers.iter_mut().for_each(|p| p.on_ack_clock(acked));
        }
    }

    fn on_fall(&mut self) {
        match self.bits {
            8 => {
                let byte = self.shift;
                self.peers.iter_mut().for_each(|p| p.on_byte(byte));
            }
            9 => {
                if let Some(value) = self.pending.take() {
                    self.events.push(BusEvent::Byte { value, ack: !self.sda });
                }
                self.peers.iter_mut().for_each(Peer::on_ack_done);
                self.bits = 0;
                self.shift = 0;
                self.byte_index += 1;
            }
            sent @ 1..=7 => self.peers.iter_mut().for_each(|p| p.on_bit_done(sent)),
            _ => {}
        }
    }

    fn sample(&mut self, line: Line) -> bool {
        let level = match line {
            Line::Scl => self.scl,
            Line::Sda => self.sda,
        };
        if line == Line::Sda && self.in_ack_slot() && !self.sda_output {
            if let Some(value) = self.pending.take() {
                self.events.push(BusEvent::Byte { value, ack: !level });
            }
        }
        level
    }
}

/// Shared handle to a simulated bus.
#[derive(Clone)]
pub struct SimWire {
    inner: Arc<Mutex<Wire>>,
}

impl Default for SimWire {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWire {
    /// Idle bus (both lines high) with no devices.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Wire::new())),
        }
    }

    /// Idle bus with one device at `address`.
    pub fn with_peer(address: u8) -> Self {
        let wire = Self::new();
        wire.add_peer(address);
        wire
    }

    pub fn add_peer(&self, address: u8) {
        self.lock().peers.push(Peer::new(address));
    }

    /// Clock and data pins driving this wire.
    pub fn pins(&self) -> (SimPin, SimPin) {
        (
            SimPin { line: Line::Scl, wire: self.inner.clone() },
            SimPin { line: Line::Sda, wire: self.inner.clone() },
        )
    }

    pub fn take_ops(&self) -> Vec<PinOp> {
        std::mem::take(&mut self.lock().ops)
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.lock().events.clone()
    }

    /// Decoded bytes only, without start/stop markers.
    pub fn bytes(&self) -> Vec<(u8, bool)> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                BusEvent::Byte { value, ack } => Some((*value, *ack)),
                _ => None,
            })
            .collect()
    }

    /// Make every pin write fail until switched off again.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Make every pin release fail until switched off again.
    pub fn fail_releases(&self, fail: bool) {
        self.lock().fail_releases = fail;
    }

    /// Have the device at `address` nack its address when addressed for a
    /// read, while still acking writes.
    pub fn nack_read_address(&self, address: u8) {
        if let Some(peer) = self.lock().peers.iter_mut().find(|p| p.address == address) {
            peer.nack_read = true;
        }
    }

    /// Have the device at `address` nack the `index`-th byte written after
    /// its address (0 is the command byte).
    pub fn nack_write_byte(&self, address: u8, index: usize) {
        if let Some(peer) = self.lock().peers.iter_mut().find(|p| p.address == address) {
            peer.nack_at = Some(index);
        }
    }

    pub fn set_register(&self, address: u8, register: u8, value: u8) {
        if let Some(peer) = self.lock().peers.iter_mut().find(|p| p.address == address) {
            peer.registers[register as usize] = value;
        }
    }

    pub fn register(&self, address: u8, register: u8) -> u8 {
        self.lock()
            .peers
            .iter()
            .find(|p| p.address == address)
            .map(|p| p.registers[register as usize])
            .unwrap_or(0)
    }

    /// Lines whose pins have been released.
    pub fn released(&self) -> Vec<Line> {
        self.lock().released.clone()
    }

    /// Current (clock, data) line levels.
    pub fn levels(&self) -> (bool, bool) {
        let wire = self.lock();
        (wire.scl, wire.sda)
    }

    fn lock(&self) -> MutexGuard<'_, Wire> {
        self.inner.lock().unwrap()
    }
}

/// Master-side pin on a [`SimWire`].
pub struct SimPin {
    line: Line,
    wire: Arc<Mutex<Wire>>,
}

impl GpioPin for SimPin {
    fn set_mode(&mut self, mode: PinMode) -> Result<()> {
        let mut wire = self.wire.lock().unwrap();
        wire.ops.push(PinOp::Mode(self.line, mode));
        let output = mode == PinMode::Output;
        match self.line {
            Line::Scl => wire.scl_output = output,
            Line::Sda => wire.sda_output = output,
        }
        wire.update();
        Ok(())
    }

    fn write(&mut self, value: PinValue) -> Result<()> {
        let mut wire = self.wire.lock().unwrap();
        if wire.fail_writes {
            return Err(HwError::Other("injected write failure".into()));
        }
        wire.ops.push(PinOp::Write(self.line, value));
        match self.line {
            Line::Scl => wire.scl_out = value.into(),
            Line::Sda => wire.sda_out = value.into(),
        }
        wire.update();
        Ok(())
    }

    fn read(&mut self) -> Result<PinValue> {
        let mut wire = self.wire.lock().unwrap();
        let level = wire.sample(self.line);
        let value = PinValue::from(level);
        wire.ops.push(PinOp::Read(self.line, value));
        Ok(value)
    }

    fn release(&mut self) -> Result<()> {
        let mut wire = self.wire.lock().unwrap();
        if wire.fail_releases {
            return Err(HwError::Other("injected release failure".into()));
        }
        wire.released.push(self.line);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PinValue::{High, Low};

    fn drive(pin: &mut SimPin, values: &[PinValue]) {
        for v in values {
            pin.write(*v).unwrap();
        }
    }

    #[test]
    fn test_monitor_decodes_start_and_stop() {
        let wire = SimWire::new();
        let (mut scl, mut sda) = wire.pins();

        drive(&mut sda, &[Low]);
        drive(&mut scl, &[Low, High]);
        drive(&mut sda, &[High]);

        assert_eq!(wire.events(), vec![BusEvent::Start, BusEvent::Stop]);
    }

    #[test]
    fn test_peer_pulls_data_low_to_ack_its_address() {
        let wire = SimWire::with_peer(0x21);
        let (mut scl, mut sda) = wire.pins();

        drive(&mut sda, &[Low]);
        drive(&mut scl, &[Low]);
        for bit in (0..8).rev() {
            sda.write(PinValue::from((0x21u8 << 1) & (1 << bit) != 0)).unwrap();
            drive(&mut scl, &[High, Low]);
        }

        // Peer holds the line even though the master drives high
        drive(&mut sda, &[High]);
        assert_eq!(wire.levels(), (false, false));
    }
}
