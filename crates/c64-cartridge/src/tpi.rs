//! MOS 6525 Tri-Port Interface (TPI).
//!
//! Three 8-bit ports with data direction registers and a small interrupt
//! controller. With interrupt mode enabled, port C's low five bits become
//! edge-triggered interrupt inputs and its data direction register the
//! interrupt mask, while CA and CB turn into handshake outputs.
//!
//! # Registers ($0-$7)
//!
//! | Reg | Name | Description                                   |
//! |-----|------|-----------------------------------------------|
//! | $0  | PA   | Port A data                                   |
//! | $1  | PB   | Port B data                                   |
//! | $2  | PC   | Port C data, or interrupt latches             |
//! | $3  | DDPA | Port A direction (1 = output)                 |
//! | $4  | DDPB | Port B direction                              |
//! | $5  | DDPC | Port C direction, or interrupt mask           |
//! | $6  | CR   | Control: mode, priority, edges, CA/CB modes   |
//! | $7  | AIR  | Active interrupt (read acknowledges)          |

use emu_core::{ModuleReader, SnapshotError, SnapshotModule};

const PA: usize = 0;
const PB: usize = 1;
const PC: usize = 2;
const DDPA: usize = 3;
const DDPB: usize = 4;
const DDPC: usize = 5;
const CREG: usize = 6;
const AIR: usize = 7;

/// Whatever is wired to the chip's pins.
#[allow(unused_variables)]
pub(crate) trait TpiPins {
    /// Port outputs: the data register with inputs pulled high.
    fn store_pa(&mut self, value: u8) {}
    fn store_pb(&mut self, value: u8) {}
    fn store_pc(&mut self, value: u8) {}
    /// Pin levels. Output bits are replaced by the data register.
    fn read_pa(&mut self) -> u8 {
        0xff
    }
    fn read_pb(&mut self) -> u8 {
        0xff
    }
    fn read_pc(&mut self) -> u8 {
        0xff
    }
    fn set_ca(&mut self, state: bool) {}
    fn set_cb(&mut self, state: bool) {}
    /// The /IRQ output changed.
    fn set_int(&mut self, active: bool) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tpi6525 {
    regs: [u8; 8],
    irq_previous: u8,
    irq_stack: u8,
    ca_state: bool,
    cb_state: bool,
}

impl Default for Tpi6525 {
    fn default() -> Self {
        Self {
            regs: [0; 8],
            irq_previous: 0xff,
            irq_stack: 0,
            ca_state: false,
            cb_state: false,
        }
    }
}

impl Tpi6525 {
    fn irq_mode(&self) -> bool {
        self.regs[CREG] & 1 != 0
    }

    fn irq_priority(&self) -> bool {
        self.regs[CREG] & 2 != 0
    }

    fn ca_handshake(&self) -> bool {
        self.regs[CREG] & 0x20 == 0
    }

    fn ca_pulse(&self) -> bool {
        self.regs[CREG] & 0x30 == 0x10
    }

    fn ca_toggle(&self) -> bool {
        self.regs[CREG] & 0x30 == 0
    }

    fn cb_handshake(&self) -> bool {
        self.regs[CREG] & 0x80 == 0
    }

    fn cb_pulse(&self) -> bool {
        self.regs[CREG] & 0xc0 == 0x40
    }

    fn cb_toggle(&self) -> bool {
        self.regs[CREG] & 0xc0 == 0
    }

    fn set_ca(&mut self, state: bool, pins: &mut impl TpiPins) {
        self.ca_state = state;
        pins.set_ca(state);
    }

    fn set_cb(&mut self, state: bool, pins: &mut impl TpiPins) {
        self.cb_state = state;
        pins.set_cb(state);
    }

    pub(crate) fn reset(&mut self, pins: &mut impl TpiPins) {
        *self = Self::default();
        pins.set_int(false);
        self.set_ca(false, pins);
        self.set_cb(false, pins);
    }

    fn latch(&mut self, bit: u8, pins: &mut impl TpiPins) {
        self.regs[PC] |= bit;
        if self.regs[DDPC] & bit == 0 {
            return;
        }
        if self.irq_priority() {
            if bit > self.regs[PC] & !bit {
                self.regs[AIR] = bit;
                pins.set_int(true);
            }
        } else if self.regs[AIR] == 0 {
            self.regs[AIR] = bit;
            pins.set_int(true);
        }
        self.irq_stack |= bit;
    }

    /// Acknowledge: returns the active interrupt and moves on to the
    /// next stacked one (without priority) or none.
    fn push_irq(&mut self, pins: &mut impl TpiPins) -> u8 {
        let old = self.regs[AIR];
        self.regs[PC] &= !old;
        self.irq_stack &= !old;
        self.regs[AIR] = 0;
        if !self.irq_priority() {
            self.regs[AIR] = self.irq_stack;
            self.irq_stack = 0;
        }
        pins.set_int(self.regs[AIR] != 0);
        old
    }

    fn pop_irq(&mut self, pins: &mut impl TpiPins) {
        if self.irq_priority() && self.irq_stack != 0 {
            // Highest pending of the five inputs.
            let top = 7 - self.irq_stack.leading_zeros().min(7);
            self.regs[AIR] = 1 << top.min(4);
        }
        pins.set_int(self.regs[AIR] != 0);
    }

    fn irq_mode_pc(&self) -> u8 {
        let active = if self.regs[AIR] != 0 { 0x20 } else { 0 };
        (self.regs[PC] & 0x1f) | active | 0xc0
    }

    pub(crate) fn store(&mut self, addr: u16, value: u8, pins: &mut impl TpiPins) {
        let reg = usize::from(addr & 7);
        match reg {
            PA | DDPA => {
                self.regs[reg] = value;
                pins.store_pa(self.regs[PA] | !self.regs[DDPA]);
            }
            PB | DDPB => {
                self.regs[reg] = value;
                pins.store_pb(self.regs[PB] | !self.regs[DDPB]);
                if self.cb_handshake() {
                    self.set_cb(false, pins);
                    if self.cb_pulse() {
                        self.set_cb(true, pins);
                    }
                }
            }
            PC | DDPC => {
                self.regs[reg] = value;
                if !self.irq_mode() {
                    pins.store_pc(self.regs[PC] | !self.regs[DDPC]);
                } else if reg == PC {
                    self.regs[PC] &= value;
                } else {
                    for bit in (0..5).rev().map(|n| 1u8 << n) {
                        if self.regs[DDPC] & self.regs[PC] & bit != 0 {
                            self.latch(bit, pins);
                        }
                    }
                }
            }
            CREG => {
                self.regs[CREG] = value;
                if value & 0x20 != 0 {
                    self.set_ca(value & 0x10 != 0, pins);
                } else if value & 0x10 != 0 {
                    self.set_ca(true, pins);
                }
                if value & 0x80 != 0 {
                    self.set_cb(value & 0x40 != 0, pins);
                } else if value & 0x40 != 0 {
                    self.set_cb(true, pins);
                }
            }
            _ => self.pop_irq(pins),
        }
    }

    pub(crate) fn read(&mut self, addr: u16, pins: &mut impl TpiPins) -> u8 {
        let reg = usize::from(addr & 7);
        let mix = |pins: u8, data: u8, ddr: u8| (pins & !ddr) | (data & ddr);
        match reg {
            PA => {
                let value = mix(pins.read_pa(), self.regs[PA], self.regs[DDPA]);
                if self.ca_handshake() {
                    self.set_ca(false, pins);
                    if self.ca_pulse() {
                        self.set_ca(true, pins);
                    }
                }
                value
            }
            PB => mix(pins.read_pb(), self.regs[PB], self.regs[DDPB]),
            PC if self.irq_mode() => self.irq_mode_pc(),
            PC => mix(pins.read_pc(), self.regs[PC], self.regs[DDPC]),
            AIR => self.push_irq(pins),
            _ => self.regs[reg],
        }
    }

    /// Register contents without acknowledging anything.
    pub(crate) fn peek(&self, addr: u16) -> u8 {
        let reg = usize::from(addr & 7);
        if reg == PC && self.irq_mode() {
            self.irq_mode_pc()
        } else {
            self.regs[reg]
        }
    }

    /// Drive interrupt input `bit` (0-4). Inputs 0-2 latch on a falling
    /// edge; 3 and 4 on the edge selected by CR bits 2 and 3.
    pub(crate) fn set_input(&mut self, bit: u8, high: bool, pins: &mut impl TpiPins) {
        if bit >= 5 {
            return;
        }
        let mask = 1u8 << bit;
        let was_high = self.irq_previous & mask != 0;
        if high == was_high {
            return;
        }
        let rising_selected = (mask >> 1) & self.regs[CREG] != 0;
        if mask & 0x18 != 0 && rising_selected == high {
            self.latch(mask, pins);
            if mask & 0x08 != 0 && self.ca_toggle() {
                self.set_ca(true, pins);
            }
            if mask & 0x10 != 0 && self.cb_toggle() {
                self.set_cb(true, pins);
            }
        }
        if high {
            self.irq_previous |= mask;
        } else {
            if mask & 0x07 != 0 {
                self.latch(mask, pins);
            }
            self.irq_previous &= !mask;
        }
    }

    #[must_use]
    pub(crate) fn ca(&self) -> bool {
        self.ca_state
    }

    #[must_use]
    pub(crate) fn cb(&self) -> bool {
        self.cb_state
    }

    pub(crate) fn write_snapshot(&self, m: &mut SnapshotModule) {
        m.write_bytes(&self.regs);
        m.write_u8(self.irq_previous);
        m.write_u8(self.irq_stack);
        m.write_u8(u8::from(self.ca_state) << 7 | u8::from(self.cb_state) << 6);
    }

    /// Restore registers. Port callbacks are not replayed; the owner
    /// restores its own view of the pins.
    pub(crate) fn read_snapshot(&mut self, r: &mut ModuleReader<'_>) -> Result<(), SnapshotError> {
        r.read_into(&mut self.regs)?;
        self.irq_previous = r.read_u8()?;
        self.irq_stack = r.read_u8()?;
        let lines = r.read_u8()?;
        self.ca_state = lines & 0x80 != 0;
        self.cb_state = lines & 0x40 != 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Pins {
        pa: Option<u8>,
        pc: Option<u8>,
        input_pc: u8,
        ca: Vec<bool>,
        cb: Vec<bool>,
        irq: bool,
    }

    impl TpiPins for Pins {
        fn store_pa(&mut self, value: u8) {
            self.pa = Some(value);
        }
        fn store_pc(&mut self, value: u8) {
            self.pc = Some(value);
        }
        fn read_pc(&mut self) -> u8 {
            self.input_pc
        }
        fn set_ca(&mut self, state: bool) {
            self.ca.push(state);
        }
        fn set_cb(&mut self, state: bool) {
            self.cb.push(state);
        }
        fn set_int(&mut self, active: bool) {
            self.irq = active;
        }
    }

    #[test]
    fn outputs_float_high_on_input_bits() {
        let mut tpi = Tpi6525::default();
        let mut pins = Pins::default();
        tpi.store(DDPA as u16, 0x0f, &mut pins);
        tpi.store(PA as u16, 0x05, &mut pins);
        assert_eq!(pins.pa, Some(0xf5));
    }

    #[test]
    fn reads_mix_pins_with_outputs() {
        let mut tpi = Tpi6525::default();
        let mut pins = Pins { input_pc: 0x7f, ..Pins::default() };
        tpi.store(PC as u16, 0x80, &mut pins);
        assert_eq!(tpi.read(PC as u16, &mut pins), 0x7f);
        tpi.store(DDPC as u16, 0x80, &mut pins);
        assert_eq!(tpi.read(PC as u16, &mut pins), 0xff);
        // Registers are mirrored every 8 bytes.
        assert_eq!(tpi.read(0xdf0d, &mut pins), 0x80);
    }

    #[test]
    fn masked_falling_edge_raises_interrupt() {
        let mut tpi = Tpi6525::default();
        let mut pins = Pins::default();
        tpi.store(CREG as u16, 0x01, &mut pins);
        tpi.store(DDPC as u16, 0x01, &mut pins);
        tpi.set_input(0, false, &mut pins);
        assert!(pins.irq);
        assert_eq!(tpi.peek(PC as u16), 0xc0 | 0x20 | 0x01);

        assert_eq!(tpi.read(AIR as u16, &mut pins), 0x01);
        assert!(!pins.irq);
        assert_eq!(tpi.peek(PC as u16), 0xc0);
    }

    #[test]
    fn unmasked_edge_only_latches() {
        let mut tpi = Tpi6525::default();
        let mut pins = Pins::default();
        tpi.store(CREG as u16, 0x01, &mut pins);
        tpi.set_input(1, false, &mut pins);
        assert!(!pins.irq);
        assert_eq!(tpi.peek(PC as u16) & 0x1f, 0x02);
        // Unmasking a latched input fires it.
        tpi.store(DDPC as u16, 0x02, &mut pins);
        assert!(pins.irq);
    }

    #[test]
    fn control_register_drives_ca_and_cb() {
        let mut tpi = Tpi6525::default();
        let mut pins = Pins::default();
        tpi.store(CREG as u16, 0xb0, &mut pins);
        assert!(tpi.ca());
        assert!(!tpi.cb());
        tpi.store(CREG as u16, 0xe0, &mut pins);
        assert!(!tpi.ca());
        assert!(tpi.cb());
        assert_eq!(pins.ca, vec![true, false]);
        assert_eq!(pins.cb, vec![false, true]);
    }

    #[test]
    fn snapshot_keeps_registers_and_lines() {
        let mut tpi = Tpi6525::default();
        let mut pins = Pins::default();
        tpi.store(DDPB as u16, 0x3c, &mut pins);
        tpi.store(CREG as u16, 0xa0 | 0x10, &mut pins);
        let mut m = SnapshotModule::new("TPI", 1, 0);
        tpi.write_snapshot(&mut m);

        let mut other = Tpi6525::default();
        other.read_snapshot(&mut m.reader()).expect("valid");
        assert_eq!(other, tpi);
    }
}
