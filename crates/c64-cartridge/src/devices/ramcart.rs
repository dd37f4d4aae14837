//! RamCart: 64 or 128 KiB of RAM paged into $DF00 one 256 byte page at a
//! time.
//!
//! | Addr   | Meaning                                          |
//! |--------|--------------------------------------------------|
//! | $DE00  | page                                             |
//! | $DE01  | bit 0 = upper 64 KiB; bit 7 latched (128 KiB only) |
//!
//! With the read-only switch set, a 128 KiB unit also shows the current
//! page at $8000-$80FF in 8K game mode so it can boot from RAM.

use std::any::Any;

use emu_core::{SnapshotError, SnapshotModule};

use crate::device::{CartridgeDevice, CartridgeId, MmuWindow, PortBus, PortView, ReadResult, Slot, Translation};
use crate::{CartridgeError, CrtImage};

const SNAPSHOT_NAME: &str = "CARTRAMCART";

/// Supported sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RamCartSize {
    Kb64,
    #[default]
    Kb128,
}

impl RamCartSize {
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            Self::Kb64 => 0x10000,
            Self::Kb128 => 0x20000,
        }
    }

    fn kb(self) -> u8 {
        match self {
            Self::Kb64 => 64,
            Self::Kb128 => 128,
        }
    }

    fn from_kb(kb: u8) -> Option<Self> {
        match kb {
            64 => Some(Self::Kb64),
            128 => Some(Self::Kb128),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RamCart {
    size: RamCartSize,
    readonly: bool,
    regs: [u8; 2],
    ram: Vec<u8>,
}

impl RamCart {
    #[must_use]
    pub fn new(size: RamCartSize, readonly: bool) -> Self {
        Self {
            size,
            readonly,
            regs: [0; 2],
            ram: vec![0; size.bytes()],
        }
    }

    /// RAM image; the size picks the model.
    pub fn from_bin(data: &[u8]) -> Result<Self, CartridgeError> {
        let size = match data.len() {
            0x20000 | 0x20002 => RamCartSize::Kb128,
            0x10000 | 0x10002 => RamCartSize::Kb64,
            size => return Err(CartridgeError::BadSize { cartridge: "RamCart", size }),
        };
        let mut ramcart = Self::new(size, false);
        let data = &data[data.len() - size.bytes()..];
        ramcart.ram.copy_from_slice(data);
        Ok(ramcart)
    }

    pub fn from_crt(image: &CrtImage) -> Result<Self, CartridgeError> {
        let total: usize = image.chips.iter().map(|c| c.data.len()).sum();
        let size = if total > RamCartSize::Kb64.bytes() { RamCartSize::Kb128 } else { RamCartSize::Kb64 };
        let mut ramcart = Self::new(size, false);
        image.flatten(&mut ramcart.ram, 0x2000, "RamCart")?;
        Ok(ramcart)
    }

    #[must_use]
    pub fn size(&self) -> RamCartSize {
        self.size
    }

    #[must_use]
    pub fn readonly(&self) -> bool {
        self.readonly
    }

    pub fn set_readonly(&mut self, readonly: bool) {
        self.readonly = readonly;
    }

    #[must_use]
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    fn is_128k(&self) -> bool {
        self.size == RamCartSize::Kb128
    }

    fn window_index(&self, addr: u16) -> usize {
        let n = (usize::from(self.regs[1] & 1) << 16) + usize::from(self.regs[0]) * 256 + usize::from(addr & 0xff);
        n & (self.ram.len() - 1)
    }

    fn boot_window(&self) -> bool {
        self.readonly && self.is_128k()
    }
}

impl CartridgeDevice for RamCart {
    fn id(&self) -> CartridgeId {
        CartridgeId::RamCart
    }

    fn config_init(&mut self, bus: &mut PortBus) {
        bus.set_port_exrom(Slot::One, true);
        bus.port_config_changed(Slot::One);
    }

    fn config_setup(&mut self, bus: &mut PortBus) {
        self.config_init(bus);
    }

    fn reset(&mut self, _bus: &mut PortBus) {
        self.regs = [0; 2];
    }

    fn roml_read(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        if self.boot_window() && addr <= 0x80ff {
            ReadResult::Valid(self.ram[self.window_index(addr)])
        } else {
            ReadResult::Valid(bus.ram_read(addr))
        }
    }

    fn roml_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        bus.ram_store(addr, value);
        true
    }

    fn io1_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<u8> {
        if addr & 1 == 1 && self.is_128k() {
            Some((bus.vicii_read_phi1() & 0x7e) + self.regs[1])
        } else {
            Some(self.regs[usize::from(addr & 1)])
        }
    }

    fn io1_peek(&self, addr: u16, _view: &PortView) -> Option<u8> {
        Some(self.regs[usize::from(addr & 1)])
    }

    fn io1_store(&mut self, addr: u16, value: u8, _bus: &mut PortBus) {
        if addr & 1 == 1 {
            if self.is_128k() {
                self.regs[1] = value & 0x81;
            }
        } else {
            self.regs[0] = value;
        }
    }

    fn io2_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<u8> {
        self.io2_peek(addr, bus.view())
    }

    fn io2_peek(&self, addr: u16, _view: &PortView) -> Option<u8> {
        Some(self.ram[self.window_index(addr)])
    }

    fn io2_store(&mut self, addr: u16, value: u8, _bus: &mut PortBus) {
        let n = self.window_index(addr);
        self.ram[n] = value;
    }

    fn peek(&self, addr: u16, _view: &PortView) -> ReadResult {
        if self.boot_window() && (0x8000..=0x80ff).contains(&addr) {
            ReadResult::Valid(self.ram[self.window_index(addr)])
        } else {
            ReadResult::C64Mem
        }
    }

    fn mmu_translate(&self, addr: u16, _view: &PortView) -> Translation<'_> {
        if self.boot_window() && (0x8000..=0x80fd).contains(&addr) {
            let start = self.window_index(0);
            Translation::Window(MmuWindow::new(&self.ram[start..start + 0x100], 0x8000, 0x80fd))
        } else {
            Translation::Decline
        }
    }

    fn snapshot_name(&self) -> &'static str {
        SNAPSHOT_NAME
    }

    fn write_snapshot(&self) -> SnapshotModule {
        let mut m = SnapshotModule::new(SNAPSHOT_NAME, 0, 0);
        m.write_bool(self.readonly);
        m.write_u8(self.size.kb());
        m.write_bytes(&self.regs);
        m.write_bytes(&self.ram);
        m
    }

    fn read_snapshot(&mut self, module: &SnapshotModule, _bus: &mut PortBus) -> Result<(), SnapshotError> {
        module.check_version(0, 0, 0)?;
        let mut r = module.reader();
        self.readonly = r.read_bool()?;
        let kb = r.read_u8()?;
        self.size = RamCartSize::from_kb(kb).ok_or_else(|| module.invalid(format!("size {kb} KiB")))?;
        r.read_into(&mut self.regs)?;
        self.ram = r.read_bytes(self.size.bytes())?.to_vec();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExpansionPort, RamHost};

    fn attached(size: RamCartSize, readonly: bool) -> (ExpansionPort, RamHost) {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        let mut ramcart = RamCart::new(size, readonly);
        for (n, b) in ramcart.ram.iter_mut().enumerate() {
            *b = (n >> 8) as u8 ^ (n >> 16) as u8;
        }
        port.attach_device(&mut host, Box::new(ramcart));
        (port, host)
    }

    #[test]
    fn page_register_moves_the_window() {
        let (mut port, mut host) = attached(RamCartSize::Kb64, false);
        port.io1_store(&mut host, 0xde00, 0x12);
        assert_eq!(port.io2_read(&mut host, 0xdf00), 0x12);
        port.io2_store(&mut host, 0xdf05, 0xee);
        assert_eq!(port.io2_read(&mut host, 0xdf05), 0xee);
        assert_eq!(port.io1_read(&mut host, 0xde00), 0x12);
    }

    #[test]
    fn bank_register_only_on_128k() {
        let (mut port, mut host) = attached(RamCartSize::Kb128, false);
        port.io1_store(&mut host, 0xde01, 0xff);
        port.io1_store(&mut host, 0xde00, 0x02);
        assert_eq!(port.io2_read(&mut host, 0xdf00), 0x03);
        // Unused bits come from the open bus.
        host.bus_value = 0xff;
        assert_eq!(port.io1_read(&mut host, 0xde01), 0x7e + 0x81);

        let (mut port, mut host) = attached(RamCartSize::Kb64, false);
        port.io1_store(&mut host, 0xde01, 0x01);
        assert_eq!(port.io1_read(&mut host, 0xde01), 0);
    }

    #[test]
    fn exrom_is_asserted_but_roml_shows_ram() {
        let (mut port, mut host) = attached(RamCartSize::Kb128, false);
        assert!(host.export.exrom);
        host.ram[0x8010] = 0x33;
        assert_eq!(port.roml_read(&mut host, 0x8010), 0x33);
    }

    #[test]
    fn readonly_128k_shows_page_at_8000() {
        let (mut port, mut host) = attached(RamCartSize::Kb128, true);
        port.io1_store(&mut host, 0xde00, 0x05);
        assert_eq!(port.roml_read(&mut host, 0x8010), 0x05);
        let window = port.mmu_translate(0x8000).expect("valid");
        assert_eq!(window.limit, 0x80fd);
        assert_eq!(window.read(0x8001), Some(0x05));
    }

    #[test]
    fn bin_size_selects_model() {
        let cart = RamCart::from_bin(&vec![0; 0x10002]).expect("valid");
        assert_eq!(cart.size(), RamCartSize::Kb64);
        assert!(RamCart::from_bin(&[0; 100]).is_err());
    }
}
