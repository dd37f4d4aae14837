//! Double Quick Brown Box: 16 KiB of battery-backed RAM at $8000-$BFFF.
//!
//! One write-only register at $DE00:
//!
//! | Bit | Meaning                              |
//! |-----|--------------------------------------|
//! | 2   | also map $A000-$BFFF (16K game)      |
//! | 4   | RAM is writeable                     |
//! | 7   | cartridge off                        |

use std::any::Any;

use emu_core::{SnapshotError, SnapshotModule};

use crate::device::{CartridgeDevice, CartridgeId, MmuWindow, PortBus, PortView, ReadResult, Translation};
use crate::export::{CMODE_16KGAME, CMODE_8KGAME, CMODE_RAM, CMODE_READ};
use crate::{CartridgeError, CrtImage};

pub const DQBB_RAM_SIZE: usize = 0x4000;

const SNAPSHOT_NAME: &str = "CARTDQBB";

#[derive(Debug, Clone)]
pub struct Dqbb {
    a000_mapped: bool,
    readwrite: bool,
    off: bool,
    ram: Vec<u8>,
}

impl Default for Dqbb {
    fn default() -> Self {
        Self::new()
    }
}

impl Dqbb {
    #[must_use]
    pub fn new() -> Self {
        Self {
            a000_mapped: false,
            readwrite: false,
            off: false,
            ram: vec![0; DQBB_RAM_SIZE],
        }
    }

    pub fn from_bin(data: &[u8]) -> Result<Self, CartridgeError> {
        let data = match data.len() {
            DQBB_RAM_SIZE => data,
            n if n == DQBB_RAM_SIZE + 2 => &data[2..],
            size => return Err(CartridgeError::BadSize { cartridge: "DQBB", size }),
        };
        let mut dqbb = Self::new();
        dqbb.ram.copy_from_slice(data);
        Ok(dqbb)
    }

    /// One 16 KiB chip, or two 8 KiB chips in bank order.
    pub fn from_crt(image: &CrtImage) -> Result<Self, CartridgeError> {
        let mut dqbb = Self::new();
        image.flatten(&mut dqbb.ram, 0x2000, "DQBB").or_else(|_| image.flatten(&mut dqbb.ram, DQBB_RAM_SIZE, "DQBB"))?;
        Ok(dqbb)
    }

    #[must_use]
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    fn change_config(&self, bus: &mut PortBus) {
        let mode = if self.off {
            CMODE_RAM
        } else if self.a000_mapped {
            CMODE_16KGAME
        } else {
            CMODE_8KGAME
        };
        bus.config_changed_slot1(mode, mode, CMODE_READ);
    }

    fn store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        if self.readwrite {
            self.ram[usize::from(addr & 0x3fff)] = value;
        }
        bus.ram_store(addr, value);
        true
    }
}

impl CartridgeDevice for Dqbb {
    fn id(&self) -> CartridgeId {
        CartridgeId::Dqbb
    }

    fn config_init(&mut self, bus: &mut PortBus) {
        self.change_config(bus);
    }

    fn config_setup(&mut self, bus: &mut PortBus) {
        self.change_config(bus);
    }

    fn reset(&mut self, bus: &mut PortBus) {
        self.a000_mapped = false;
        self.readwrite = false;
        self.off = false;
        self.change_config(bus);
    }

    fn roml_read(&mut self, addr: u16, _bus: &mut PortBus) -> ReadResult {
        if self.off {
            ReadResult::Through
        } else {
            ReadResult::Valid(self.ram[usize::from(addr & 0x1fff)])
        }
    }

    fn romh_read(&mut self, addr: u16, _bus: &mut PortBus) -> ReadResult {
        if self.off || !self.a000_mapped {
            ReadResult::Through
        } else {
            ReadResult::Valid(self.ram[0x2000 + usize::from(addr & 0x1fff)])
        }
    }

    /// Writes go to the C64 RAM underneath as well.
    fn roml_no_ultimax_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        self.store(addr, value, bus)
    }

    fn romh_no_ultimax_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        self.store(addr, value, bus)
    }

    fn io1_store(&mut self, _addr: u16, value: u8, bus: &mut PortBus) {
        self.a000_mapped = value & 0x04 != 0;
        self.readwrite = value & 0x10 != 0;
        self.off = value & 0x80 != 0;
        self.change_config(bus);
    }

    fn peek(&self, addr: u16, _view: &PortView) -> ReadResult {
        match addr {
            _ if self.off => ReadResult::Through,
            0x8000..=0x9fff => ReadResult::Valid(self.ram[usize::from(addr & 0x1fff)]),
            0xa000..=0xbfff if self.a000_mapped => ReadResult::Valid(self.ram[usize::from(addr & 0x3fff)]),
            _ => ReadResult::Through,
        }
    }

    fn mmu_translate(&self, addr: u16, _view: &PortView) -> Translation<'_> {
        if self.off {
            return Translation::Decline;
        }
        match addr & 0xe000 {
            0x8000 => Translation::Window(MmuWindow::new(&self.ram[..0x2000], 0x8000, 0x9ffd)),
            0xa000 if self.a000_mapped => Translation::Window(MmuWindow::new(&self.ram[0x2000..], 0xa000, 0xbffd)),
            _ => Translation::Decline,
        }
    }

    fn snapshot_name(&self) -> &'static str {
        SNAPSHOT_NAME
    }

    fn write_snapshot(&self) -> SnapshotModule {
        let mut m = SnapshotModule::new(SNAPSHOT_NAME, 0, 0);
        m.write_bool(self.a000_mapped);
        m.write_bool(self.readwrite);
        m.write_bool(self.off);
        m.write_bytes(&self.ram);
        m
    }

    fn read_snapshot(&mut self, module: &SnapshotModule, bus: &mut PortBus) -> Result<(), SnapshotError> {
        module.check_version(0, 0, 0)?;
        let mut r = module.reader();
        self.a000_mapped = r.read_bool()?;
        self.readwrite = r.read_bool()?;
        self.off = r.read_bool()?;
        r.read_into(&mut self.ram)?;
        self.change_config(bus);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
