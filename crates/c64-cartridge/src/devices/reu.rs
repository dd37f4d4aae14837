//! REU (RAM Expansion Unit) 1700/1764/1750 emulation.
//!
//! The REU provides additional RAM accessible via DMA transfers
//! between C64 memory and the expansion RAM. Registers at $DF00-$DF0A,
//! mirrored every 32 bytes; $DF0B-$DF1F read as $FF.
//!
//! # Register map
//!
//! | Addr  | Register            |
//! |-------|---------------------|
//! | $DF00 | Status register     |
//! | $DF01 | Command register    |
//! | $DF02 | C64 base addr lo    |
//! | $DF03 | C64 base addr hi    |
//! | $DF04 | REU base addr lo    |
//! | $DF05 | REU base addr hi    |
//! | $DF06 | REU bank            |
//! | $DF07 | Transfer length lo  |
//! | $DF08 | Transfer length hi  |
//! | $DF09 | IRQ mask            |
//! | $DF0A | Address control     |
//!
//! Sizes above 512 KiB behave like the CMD 1750XL: the upper bank bits
//! are a plain latch the REC chip never increments.

use std::any::Any;

use emu_core::{SnapshotError, SnapshotModule};

use crate::device::{CartridgeDevice, CartridgeId, PortBus, PortView};
use crate::CartridgeError;

const SNAPSHOT_NAME: &str = "REU1764";

const STATUS_256K_CHIPS: u8 = 0x10;
const STATUS_VERIFY_ERROR: u8 = 0x20;
const STATUS_END_OF_BLOCK: u8 = 0x40;
const STATUS_IRQ_PENDING: u8 = 0x80;

const COMMAND_FF00_DISABLED: u8 = 0x10;
const COMMAND_AUTOLOAD: u8 = 0x20;
const COMMAND_EXECUTE: u8 = 0x80;

const IRQ_UNUSED: u8 = 0x1f;
const IRQ_VERIFY: u8 = 0x20;
const IRQ_END_OF_BLOCK: u8 = 0x40;
const IRQ_ENABLED: u8 = 0x80;

const ADDR_CONTROL_UNUSED: u8 = 0x3f;
const FIX_REU: u8 = 0x40;
const FIX_C64: u8 = 0x80;

/// Number of decoded registers; the rest of each 32 byte block is unused.
const REGISTERS: u16 = 0x0b;

/// Supported sizes in KiB.
pub const REU_SIZES_KB: [u32; 8] = [128, 256, 512, 1024, 2048, 4096, 8192, 16384];

/// Wrap-around behaviour of one REU model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Geometry {
    /// Where the 19 bit REC address wraps.
    wrap_around: u32,
    dram_wrap_around: u32,
    /// Bytes of DRAM actually fitted.
    backed: u32,
    store_mask: u32,
    /// Bank register bits stuck at 1.
    bank_unused: u8,
    status_preset: u8,
}

impl Geometry {
    fn for_size(size_kb: u32) -> Self {
        let backed = size_kb << 10;
        match size_kb {
            // Commodore 1700: 64K chips and its own wrap-around.
            128 => Self {
                wrap_around: 0x20000,
                dram_wrap_around: 0x20000,
                backed,
                store_mask: 0x7ffff,
                bank_unused: 0xf8,
                status_preset: 0,
            },
            256 | 512 => Self {
                wrap_around: 0x80000,
                dram_wrap_around: 0x80000,
                backed,
                store_mask: 0x7ffff,
                bank_unused: 0xf8,
                status_preset: STATUS_256K_CHIPS,
            },
            _ => Self {
                wrap_around: 0x80000,
                dram_wrap_around: 0x0100_0000,
                backed,
                store_mask: 0x00ff_ffff,
                bank_unused: 0,
                status_preset: STATUS_256K_CHIPS,
            },
        }
    }
}

/// The REC register file, with the shadow copies autoload restores from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Registers {
    status: u8,
    command: u8,
    c64_addr: u16,
    reu_addr: u16,
    bank: u8,
    length: u16,
    irq_mask: u8,
    addr_control: u8,
    c64_addr_shadow: u16,
    reu_addr_shadow: u16,
    bank_shadow: u8,
    length_shadow: u16,
}

/// REU (RAM Expansion Unit).
#[derive(Debug, Clone)]
pub struct Reu {
    /// Expansion RAM (128K up to 16M).
    ram: Vec<u8>,
    size_kb: u32,
    geometry: Geometry,
    regs: Registers,
    /// A command was written with the $FF00 trigger enabled.
    ff00_armed: bool,
}

impl Reu {
    /// Create a new REU with the given size in KiB.
    pub fn new(size_kb: u32) -> Result<Self, CartridgeError> {
        if !REU_SIZES_KB.contains(&size_kb) {
            return Err(CartridgeError::BadSize { cartridge: "REU", size: size_kb as usize * 1024 });
        }
        let geometry = Geometry::for_size(size_kb);
        let mut reu = Self {
            ram: vec![0; geometry.backed as usize],
            size_kb,
            geometry,
            regs: Registers::default(),
            ff00_armed: false,
        };
        reu.reset_registers();
        Ok(reu)
    }

    /// RAM image; its size picks the model.
    pub fn from_bin(data: &[u8]) -> Result<Self, CartridgeError> {
        let size_kb = u32::try_from(data.len() / 1024).unwrap_or(0);
        let mut reu = Self::new(size_kb).map_err(|_| CartridgeError::BadSize { cartridge: "REU", size: data.len() })?;
        let n = reu.ram.len().min(data.len());
        reu.ram[..n].copy_from_slice(&data[..n]);
        Ok(reu)
    }

    #[must_use]
    pub fn size_kb(&self) -> u32 {
        self.size_kb
    }

    #[must_use]
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    fn reset_registers(&mut self) {
        let g = self.geometry;
        self.regs = Registers {
            status: g.status_preset,
            command: COMMAND_FF00_DISABLED,
            length: 0xffff,
            length_shadow: 0xffff,
            bank: g.bank_unused,
            bank_shadow: g.bank_unused,
            irq_mask: IRQ_UNUSED,
            addr_control: ADDR_CONTROL_UNUSED,
            ..Registers::default()
        };
        self.ff00_armed = false;
    }

    /// Read a REU register without side effects.
    fn register(&self, reg: u16) -> u8 {
        let r = &self.regs;
        match reg {
            0x00 => r.status,
            0x01 => r.command,
            0x02 => r.c64_addr as u8,
            0x03 => (r.c64_addr >> 8) as u8,
            0x04 => r.reu_addr as u8,
            0x05 => (r.reu_addr >> 8) as u8,
            0x06 => r.bank | self.geometry.bank_unused,
            0x07 => r.length as u8,
            0x08 => (r.length >> 8) as u8,
            0x09 => r.irq_mask,
            0x0a => r.addr_control,
            _ => 0xff,
        }
    }

    /// Write a REU register without starting anything.
    fn set_register(&mut self, reg: u16, value: u8) {
        let unused = self.geometry.bank_unused;
        let r = &mut self.regs;
        match reg {
            0x01 => r.command = value,
            0x02 => {
                r.c64_addr_shadow = (r.c64_addr_shadow & 0xff00) | u16::from(value);
                r.c64_addr = r.c64_addr_shadow;
            }
            0x03 => {
                r.c64_addr_shadow = (r.c64_addr_shadow & 0x00ff) | (u16::from(value) << 8);
                r.c64_addr = r.c64_addr_shadow;
            }
            0x04 => {
                r.reu_addr_shadow = (r.reu_addr_shadow & 0xff00) | u16::from(value);
                r.reu_addr = r.reu_addr_shadow;
            }
            0x05 => {
                r.reu_addr_shadow = (r.reu_addr_shadow & 0x00ff) | (u16::from(value) << 8);
                r.reu_addr = r.reu_addr_shadow;
            }
            0x06 => {
                r.bank_shadow = value & !unused;
                r.bank = r.bank_shadow;
            }
            0x07 => {
                r.length_shadow = (r.length_shadow & 0xff00) | u16::from(value);
                r.length = r.length_shadow;
            }
            0x08 => {
                r.length_shadow = (r.length_shadow & 0x00ff) | (u16::from(value) << 8);
                r.length = r.length_shadow;
            }
            0x09 => r.irq_mask = value | IRQ_UNUSED,
            0x0a => r.addr_control = value | ADDR_CONTROL_UNUSED,
            // Status is read-only.
            _ => {}
        }
    }

    fn raise_irq_if(&mut self, status_bit: u8, mask_bit: u8, bus: &mut PortBus) {
        let r = &mut self.regs;
        if r.status & status_bit != 0 && r.irq_mask & (mask_bit | IRQ_ENABLED) == mask_bit | IRQ_ENABLED {
            r.status |= STATUS_IRQ_PENDING;
            bus.set_irq(true);
        }
    }

    fn increment_reu(&self, addr: u32, step: u32) -> u32 {
        let mut next = (addr & 0x0007_ffff) + step;
        if next == self.geometry.wrap_around {
            next = 0;
        }
        (addr & 0x00f8_0000) | next
    }

    fn read_reu(&self, addr: u32) -> u8 {
        let addr = addr & (self.geometry.dram_wrap_around - 1);
        if addr < self.geometry.backed { self.ram[addr as usize] } else { 0xff }
    }

    fn store_reu(&mut self, addr: u32, value: u8) {
        let addr = addr & (self.geometry.dram_wrap_around - 1);
        if addr < self.geometry.backed {
            self.ram[addr as usize] = value;
        }
    }

    fn update_registers(&mut self, c64_addr: u16, reu_addr: u32, length: u32, status: u8, bus: &mut PortBus) {
        let reu_addr = reu_addr & self.geometry.store_mask;
        let r = &mut self.regs;
        r.status |= status;
        if r.command & COMMAND_AUTOLOAD == 0 {
            if r.addr_control & FIX_C64 == 0 {
                r.c64_addr = c64_addr;
            }
            if r.addr_control & FIX_REU == 0 {
                r.reu_addr = reu_addr as u16;
                r.bank = (reu_addr >> 16) as u8;
            }
            r.length = length as u16;
        } else {
            r.c64_addr = r.c64_addr_shadow;
            r.reu_addr = r.reu_addr_shadow;
            r.bank = r.bank_shadow;
            r.length = r.length_shadow;
        }
        if status & STATUS_END_OF_BLOCK != 0 {
            self.raise_irq_if(STATUS_END_OF_BLOCK, IRQ_END_OF_BLOCK, bus);
        }
        if status & STATUS_VERIFY_ERROR != 0 {
            self.raise_irq_if(STATUS_VERIFY_ERROR, IRQ_VERIFY, bus);
        }
    }

    /// Execute a DMA transfer based on the command register.
    fn execute_dma(&mut self, bus: &mut PortBus) {
        let r = self.regs;
        let mut c64_addr = r.c64_addr;
        let mut reu_addr = u32::from(r.reu_addr) | (u32::from(r.bank) << 16);
        let mut len = if r.length == 0 { 0x10000u32 } else { u32::from(r.length) };
        let c64_step = u16::from(r.addr_control & FIX_C64 == 0);
        let reu_step = u32::from(r.addr_control & FIX_REU == 0);
        log::debug!(
            "REU: op {} c64 ${c64_addr:04X} reu ${reu_addr:06X} len {len}",
            r.command & 3
        );

        let mut status = STATUS_END_OF_BLOCK;
        match r.command & 0x03 {
            // STASH: C64 → REU
            0 => {
                while len > 0 {
                    let value = bus.dma_read(c64_addr);
                    self.store_reu(reu_addr, value);
                    c64_addr = c64_addr.wrapping_add(c64_step);
                    reu_addr = self.increment_reu(reu_addr, reu_step);
                    len -= 1;
                }
                len = 1;
            }
            // FETCH: REU → C64
            1 => {
                while len > 0 {
                    let value = self.read_reu(reu_addr);
                    bus.dma_store(c64_addr, value);
                    c64_addr = c64_addr.wrapping_add(c64_step);
                    reu_addr = self.increment_reu(reu_addr, reu_step);
                    len -= 1;
                }
                len = 1;
            }
            // SWAP: exchange bytes
            2 => {
                while len > 0 {
                    let from_reu = self.read_reu(reu_addr);
                    let from_c64 = bus.dma_read(c64_addr);
                    self.store_reu(reu_addr, from_c64);
                    bus.dma_store(c64_addr, from_reu);
                    c64_addr = c64_addr.wrapping_add(c64_step);
                    reu_addr = self.increment_reu(reu_addr, reu_step);
                    len -= 1;
                }
                len = 1;
            }
            // VERIFY: compare bytes, stop at the first mismatch
            _ => {
                status = 0;
                while len > 0 {
                    let from_reu = self.read_reu(reu_addr);
                    let from_c64 = bus.dma_read(c64_addr);
                    reu_addr = self.increment_reu(reu_addr, reu_step);
                    c64_addr = c64_addr.wrapping_add(c64_step);
                    len -= 1;
                    if from_reu != from_c64 {
                        status |= STATUS_VERIFY_ERROR;
                        break;
                    }
                }
                if len == 0 {
                    // Also set when only the last byte differed.
                    len = 1;
                    status |= STATUS_END_OF_BLOCK;
                } else if len == 1 && self.read_reu(reu_addr) == bus.dma_read(c64_addr) {
                    status |= STATUS_END_OF_BLOCK;
                }
            }
        }
        self.update_registers(c64_addr, reu_addr, len, status, bus);
        self.regs.command = (self.regs.command & !COMMAND_EXECUTE) | COMMAND_FF00_DISABLED;
    }
}

impl CartridgeDevice for Reu {
    fn id(&self) -> CartridgeId {
        CartridgeId::Reu
    }

    fn reset(&mut self, _bus: &mut PortBus) {
        self.reset_registers();
    }

    /// Reading the status register acknowledges the interrupt.
    fn io2_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<u8> {
        let reg = addr & 0x1f;
        let value = self.register(reg);
        if reg == 0 {
            self.regs.status &= !(STATUS_VERIFY_ERROR | STATUS_END_OF_BLOCK | STATUS_IRQ_PENDING);
            bus.set_irq(false);
        }
        Some(value)
    }

    fn io2_peek(&self, addr: u16, _view: &PortView) -> Option<u8> {
        Some(self.register(addr & 0x1f))
    }

    /// Writing $DF01 with the execute bit set starts a transfer, right away
    /// or on the next write to $FF00.
    fn io2_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) {
        let reg = addr & 0x1f;
        if reg >= REGISTERS {
            return;
        }
        self.set_register(reg, value);
        match reg {
            0x01 if value & COMMAND_EXECUTE != 0 => {
                if value & COMMAND_FF00_DISABLED != 0 {
                    self.ff00_armed = false;
                    self.execute_dma(bus);
                } else {
                    self.ff00_armed = true;
                }
            }
            0x09 => {
                self.raise_irq_if(STATUS_END_OF_BLOCK, IRQ_END_OF_BLOCK, bus);
                self.raise_irq_if(STATUS_VERIFY_ERROR, IRQ_VERIFY, bus);
            }
            _ => {}
        }
    }

    fn ff00_store(&mut self, bus: &mut PortBus) {
        if self.ff00_armed {
            self.ff00_armed = false;
            self.execute_dma(bus);
        }
    }

    fn snapshot_name(&self) -> &'static str {
        SNAPSHOT_NAME
    }

    /// Size in KiB, a 16 byte register image, then RAM.
    fn write_snapshot(&self) -> SnapshotModule {
        let mut m = SnapshotModule::new(SNAPSHOT_NAME, 0, 0);
        m.write_u32(self.size_kb);
        for reg in 0..16 {
            m.write_u8(self.register(reg));
        }
        m.write_bytes(&self.ram);
        m
    }

    fn read_snapshot(&mut self, module: &SnapshotModule, bus: &mut PortBus) -> Result<(), SnapshotError> {
        module.check_version(0, 0, u8::MAX)?;
        let mut r = module.reader();
        let size_kb = r.read_u32()?;
        let mut reu = Self::new(size_kb).map_err(|_| module.invalid(format!("size {size_kb} KiB")))?;
        let mut regs = [0u8; 16];
        r.read_into(&mut regs)?;
        r.read_into(&mut reu.ram)?;
        for (reg, &value) in (0u16..).zip(regs.iter()) {
            reu.set_register(reg, value);
        }
        reu.regs.status = regs[0];
        bus.set_irq(regs[0] & STATUS_IRQ_PENDING != 0);
        *self = reu;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
