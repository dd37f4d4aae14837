//! ISEPIC: a RAM based freezer with 2 KiB of RAM paged into $DF00.
//!
//! Any access to $DE00-$DE07 (mirrored through $DEFF) selects one of
//! eight 256 byte pages, with the address lines scrambled:
//!
//! ```text
//! page    0     1     2     3     4     5     6     7
//! access $DE00 $DE04 $DE02 $DE06 $DE01 $DE05 $DE03 $DE07
//! ```
//!
//! Turning the switch towards the computer puts the machine in Ultimax
//! mode with the current page mirrored into every unmapped area and
//! fires the freeze NMI; the NMI vector at $FFFA comes from the page.

use std::any::Any;

use emu_core::{SnapshotError, SnapshotModule};

use crate::device::{CartridgeDevice, CartridgeId, PortBus, PortView, ReadResult, Translation};
use crate::export::{CMODE_RAM, CMODE_READ, CMODE_RELEASE_FREEZE, CMODE_ULTIMAX};
use crate::{CartridgeError, CrtImage};

pub const ISEPIC_RAM_SIZE: usize = 0x800;

const SNAPSHOT_NAME: &str = "CARTISEPIC";

#[derive(Debug, Clone)]
pub struct Isepic {
    /// `true` when pointed towards the computer.
    switch: bool,
    page: u8,
    ram: Vec<u8>,
}

impl Isepic {
    #[must_use]
    pub fn new(switch: bool) -> Self {
        Self {
            switch,
            page: 0,
            ram: vec![0; ISEPIC_RAM_SIZE],
        }
    }

    /// RAM image from a raw dump; an optional load address is skipped.
    pub fn from_bin(data: &[u8]) -> Result<Self, CartridgeError> {
        let data = match data.len() {
            ISEPIC_RAM_SIZE => data,
            n if n == ISEPIC_RAM_SIZE + 2 => &data[2..],
            size => return Err(CartridgeError::BadSize { cartridge: "ISEPIC", size }),
        };
        let mut isepic = Self::new(false);
        isepic.ram.copy_from_slice(data);
        Ok(isepic)
    }

    /// CRT images always come up with the switch away.
    pub fn from_crt(image: &CrtImage) -> Result<Self, CartridgeError> {
        let chip = image.chips.first().ok_or(CartridgeError::NoChips)?;
        if chip.data.len() != ISEPIC_RAM_SIZE {
            return Err(CartridgeError::BadSize { cartridge: "ISEPIC", size: chip.data.len() });
        }
        let mut isepic = Self::new(false);
        isepic.ram.copy_from_slice(&chip.data);
        Ok(isepic)
    }

    #[must_use]
    pub fn switch(&self) -> bool {
        self.switch
    }

    #[must_use]
    pub fn page(&self) -> u8 {
        self.page
    }

    #[must_use]
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    /// Flip the switch. Towards the computer freezes the machine.
    pub fn set_switch(&mut self, on: bool, bus: &mut PortBus) {
        if on == self.switch {
            return;
        }
        self.switch = on;
        if on {
            bus.trigger_freeze();
            bus.config_changed_slot1(CMODE_RAM, CMODE_ULTIMAX, CMODE_READ | CMODE_RELEASE_FREEZE);
        } else {
            bus.config_changed_slot1(CMODE_RAM, CMODE_RAM, CMODE_READ | CMODE_RELEASE_FREEZE);
        }
    }

    fn page_index(&self, addr: u16) -> usize {
        usize::from(self.page) * 256 + usize::from(addr & 0xff)
    }

    fn select_page(&mut self, addr: u16) {
        if self.switch {
            self.page = (((addr & 4) >> 2) | (addr & 2) | ((addr & 1) << 2)) as u8;
        }
    }

    fn page_read(&self, addr: u16) -> ReadResult {
        ReadResult::Valid(self.ram[self.page_index(addr)])
    }

    fn page_store(&mut self, addr: u16, value: u8) -> bool {
        let n = self.page_index(addr);
        self.ram[n] = value;
        true
    }

    fn is_nmi_vector(addr: u16) -> bool {
        addr == 0xfffa || addr == 0xfffb
    }
}

impl CartridgeDevice for Isepic {
    fn id(&self) -> CartridgeId {
        CartridgeId::Isepic
    }

    fn config_setup(&mut self, bus: &mut PortBus) {
        if self.switch {
            bus.config_changed_slot1(CMODE_RAM, CMODE_ULTIMAX, CMODE_READ);
        }
    }

    /// The freeze only needs the NMI; the switch already mapped the RAM.
    fn freeze_allowed(&self) -> bool {
        true
    }

    fn roml_read(&mut self, addr: u16, _bus: &mut PortBus) -> ReadResult {
        if self.switch {
            self.page_read(addr)
        } else {
            ReadResult::Through
        }
    }

    fn romh_read(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        if !self.switch {
            ReadResult::Through
        } else if Self::is_nmi_vector(addr) {
            self.page_read(addr)
        } else {
            ReadResult::Valid(bus.read_without_ultimax(addr))
        }
    }

    fn romh_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        if !self.switch {
            return false;
        }
        if Self::is_nmi_vector(addr) {
            self.page_store(addr, value)
        } else {
            bus.store_without_ultimax(addr, value);
            true
        }
    }

    fn ultimax_1000_7fff_read(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        self.roml_read(addr, bus)
    }

    fn ultimax_1000_7fff_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        if self.switch {
            bus.store_without_ultimax(addr, value);
        }
        self.switch
    }

    fn ultimax_a000_bfff_read(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        self.roml_read(addr, bus)
    }

    fn ultimax_a000_bfff_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        self.ultimax_1000_7fff_store(addr, value, bus)
    }

    fn ultimax_c000_cfff_read(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        self.roml_read(addr, bus)
    }

    fn ultimax_c000_cfff_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        self.ultimax_1000_7fff_store(addr, value, bus)
    }

    fn romh_phi1_read(&mut self, addr: u16, _bus: &mut PortBus) -> Option<ReadResult> {
        Some(if Self::is_nmi_vector(addr) {
            self.page_read(addr)
        } else {
            ReadResult::C64Mem
        })
    }

    fn romh_phi2_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<ReadResult> {
        self.romh_phi1_read(addr, bus)
    }

    /// Page select only; the bus is never driven.
    fn io1_read(&mut self, addr: u16, _bus: &mut PortBus) -> Option<u8> {
        self.select_page(addr);
        None
    }

    fn io1_store(&mut self, addr: u16, _value: u8, _bus: &mut PortBus) {
        self.select_page(addr);
    }

    fn io2_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<u8> {
        self.io2_peek(addr, bus.view())
    }

    fn io2_peek(&self, addr: u16, _view: &PortView) -> Option<u8> {
        self.switch.then(|| self.ram[self.page_index(addr)])
    }

    fn io2_store(&mut self, addr: u16, value: u8, _bus: &mut PortBus) {
        if self.switch {
            self.page_store(addr, value);
        }
    }

    fn peek(&self, addr: u16, _view: &PortView) -> ReadResult {
        if !self.switch {
            return ReadResult::Through;
        }
        match addr {
            0x1000..=0xcfff => self.page_read(addr),
            0xfffa | 0xfffb => self.page_read(addr),
            _ => ReadResult::C64Mem,
        }
    }

    /// No fast path for the page mirrors.
    fn mmu_translate(&self, _addr: u16, _view: &PortView) -> Translation<'_> {
        if self.switch {
            Translation::Decline
        } else {
            Translation::Through
        }
    }

    fn snapshot_name(&self) -> &'static str {
        SNAPSHOT_NAME
    }

    fn write_snapshot(&self) -> SnapshotModule {
        let mut m = SnapshotModule::new(SNAPSHOT_NAME, 0, 0);
        m.write_bool(self.switch);
        m.write_u8(self.page);
        m.write_bytes(&self.ram);
        m
    }

    fn read_snapshot(&mut self, module: &SnapshotModule, _bus: &mut PortBus) -> Result<(), SnapshotError> {
        module.check_version(0, 0, 0)?;
        let mut r = module.reader();
        self.switch = r.read_bool()?;
        let page = r.read_u8()?;
        if page > 7 {
            return Err(module.invalid(format!("page {page}")));
        }
        self.page = page;
        r.read_into(&mut self.ram)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
