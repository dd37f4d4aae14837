//! Expert Cartridge: 8 KiB of battery-backed RAM and a three-way switch.
//!
//! - PRG: the RAM sits at $8000 in 8K game mode and can be loaded.
//! - ON: after reset or NMI the RAM is at $8000 (writeable) and $E000
//!   (read only) in Ultimax mode; any $DE00 access toggles it out.
//! - OFF: nothing is mapped.

use std::any::Any;

use emu_core::{SnapshotError, SnapshotModule};

use crate::device::{CartridgeDevice, CartridgeId, MmuWindow, PortBus, PortView, ReadResult, Translation};
use crate::export::{CMODE_8KGAME, CMODE_PHI2_RAM, CMODE_RAM, CMODE_READ, CMODE_RELEASE_FREEZE, CMODE_ULTIMAX};
use crate::{CartridgeError, CrtImage};

pub const EXPERT_RAM_SIZE: usize = 0x2000;

const SNAPSHOT_NAME: &str = "CARTEXPERT";

/// Position of the switch on the cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExpertMode {
    Off,
    #[default]
    Prg,
    On,
}

impl ExpertMode {
    fn code(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Prg => 1,
            Self::On => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Off),
            1 => Some(Self::Prg),
            2 => Some(Self::On),
            _ => None,
        }
    }
}

/// PRG mode is run as 8K game, the closest mapping the PLA offers.
const EXPERT_PRG: u8 = CMODE_8KGAME;
const EXPERT_OFF: u8 = CMODE_RAM;
const EXPERT_ON: u8 = CMODE_ULTIMAX;

const SWITCH_FLAGS: u8 = CMODE_READ | CMODE_RELEASE_FREEZE | CMODE_PHI2_RAM;

#[derive(Debug, Clone)]
pub struct Expert {
    mode: ExpertMode,
    register_enabled: bool,
    ram_writeable: bool,
    ramh_enabled: bool,
    ram: Vec<u8>,
}

impl Expert {
    /// Empty RAM, switch in `mode`.
    #[must_use]
    pub fn new(mode: ExpertMode) -> Self {
        Self {
            mode,
            register_enabled: false,
            ram_writeable: false,
            ramh_enabled: false,
            ram: vec![0; EXPERT_RAM_SIZE],
        }
    }

    /// RAM image from a raw dump (an optional load address is skipped).
    /// Loaded images start with the switch ON.
    pub fn from_bin(data: &[u8]) -> Result<Self, CartridgeError> {
        let data = match data.len() {
            EXPERT_RAM_SIZE => data,
            n if n == EXPERT_RAM_SIZE + 2 => &data[2..],
            size => return Err(CartridgeError::BadSize { cartridge: "Expert", size }),
        };
        let mut expert = Self::new(ExpertMode::On);
        expert.ram.copy_from_slice(data);
        Ok(expert)
    }

    pub fn from_crt(image: &CrtImage) -> Result<Self, CartridgeError> {
        let chip = image.chips.first().ok_or(CartridgeError::NoChips)?;
        if chip.data.len() != EXPERT_RAM_SIZE {
            return Err(CartridgeError::BadSize { cartridge: "Expert", size: chip.data.len() });
        }
        let mut expert = Self::new(ExpertMode::On);
        expert.ram.copy_from_slice(&chip.data);
        Ok(expert)
    }

    #[must_use]
    pub fn mode(&self) -> ExpertMode {
        self.mode
    }

    #[must_use]
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    /// Move the switch.
    pub fn set_mode(&mut self, mode: ExpertMode, bus: &mut PortBus) {
        self.mode = mode;
        self.register_enabled = mode == ExpertMode::Prg;
        self.ramh_enabled = false;
        self.ram_writeable = mode == ExpertMode::Prg;
        let phi2 = match mode {
            ExpertMode::Prg => EXPERT_PRG,
            ExpertMode::On => CMODE_RAM,
            ExpertMode::Off => EXPERT_OFF,
        };
        bus.config_changed_slot1(CMODE_RAM, phi2, SWITCH_FLAGS);
    }

    fn toggle(&mut self, bus: &mut PortBus) {
        if self.mode == ExpertMode::On && self.register_enabled {
            bus.config_changed_slot1(CMODE_RAM, CMODE_ULTIMAX, SWITCH_FLAGS);
            self.ramh_enabled = !self.ramh_enabled;
            self.ram_writeable = false;
        }
    }

    fn ramh_visible(&self) -> bool {
        self.mode == ExpertMode::On && self.ramh_enabled
    }

    fn map_in(&mut self, bus: &mut PortBus) {
        if self.mode == ExpertMode::On {
            bus.config_changed_slot1(CMODE_RAM, EXPERT_ON, SWITCH_FLAGS);
            self.register_enabled = true;
            self.ram_writeable = true;
            self.ramh_enabled = true;
        }
    }
}

impl CartridgeDevice for Expert {
    fn id(&self) -> CartridgeId {
        CartridgeId::Expert
    }

    fn config_init(&mut self, bus: &mut PortBus) {
        self.reset(bus);
    }

    fn config_setup(&mut self, bus: &mut PortBus) {
        let mode = self.mode;
        self.set_mode(mode, bus);
    }

    fn reset(&mut self, bus: &mut PortBus) {
        match self.mode {
            ExpertMode::On => {
                self.register_enabled = true;
                self.ram_writeable = true;
                self.ramh_enabled = true;
                bus.config_changed_slot1(CMODE_RAM, CMODE_ULTIMAX, CMODE_READ | CMODE_PHI2_RAM);
            }
            ExpertMode::Prg => {
                self.register_enabled = true;
                self.ram_writeable = true;
                self.ramh_enabled = true;
                bus.config_changed_slot1(CMODE_RAM, EXPERT_PRG, CMODE_READ);
            }
            ExpertMode::Off => {
                self.register_enabled = false;
                self.ram_writeable = false;
                self.ramh_enabled = false;
                bus.config_changed_slot1(CMODE_RAM, EXPERT_OFF, CMODE_READ | CMODE_PHI2_RAM);
            }
        }
    }

    fn freeze(&mut self, bus: &mut PortBus) {
        self.map_in(bus);
    }

    fn freeze_allowed(&self) -> bool {
        self.mode == ExpertMode::On
    }

    fn nmi_ack(&mut self, bus: &mut PortBus) {
        self.map_in(bus);
    }

    fn roml_read(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        if self.mode == ExpertMode::Prg || self.ramh_visible() {
            ReadResult::Valid(self.ram[usize::from(addr & 0x1fff)])
        } else {
            ReadResult::Valid(bus.ram_read(addr))
        }
    }

    fn roml_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        if self.ram_writeable && (self.mode == ExpertMode::Prg || self.ramh_visible()) {
            self.ram[usize::from(addr & 0x1fff)] = value;
        } else {
            bus.ram_store(addr, value);
        }
        true
    }

    fn roml_no_ultimax_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        self.roml_store(addr, value, bus)
    }

    fn raml_no_ultimax_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        self.roml_store(addr, value, bus)
    }

    fn romh_read(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        if self.ramh_visible() {
            ReadResult::Valid(self.ram[usize::from(addr & 0x1fff)])
        } else {
            ReadResult::Valid(bus.read_without_ultimax(addr))
        }
    }

    fn ultimax_1000_7fff_read(&mut self, _addr: u16, _bus: &mut PortBus) -> ReadResult {
        ReadResult::C64Mem
    }

    fn ultimax_1000_7fff_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        bus.store_without_ultimax(addr, value);
        true
    }

    fn ultimax_a000_bfff_read(&mut self, _addr: u16, _bus: &mut PortBus) -> ReadResult {
        ReadResult::C64Mem
    }

    fn ultimax_a000_bfff_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        bus.store_without_ultimax(addr, value);
        true
    }

    fn ultimax_c000_cfff_read(&mut self, _addr: u16, _bus: &mut PortBus) -> ReadResult {
        ReadResult::C64Mem
    }

    fn ultimax_c000_cfff_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        bus.store_without_ultimax(addr, value);
        true
    }

    fn ultimax_d000_dfff_read(&mut self, _addr: u16, _bus: &mut PortBus) -> ReadResult {
        ReadResult::C64Mem
    }

    fn ultimax_d000_dfff_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        bus.store_without_ultimax(addr, value);
        true
    }

    fn romh_phi1_read(&mut self, addr: u16, _bus: &mut PortBus) -> Option<ReadResult> {
        Some(if self.ramh_visible() {
            ReadResult::Valid(self.ram[usize::from(addr & 0x1fff)])
        } else {
            ReadResult::C64Mem
        })
    }

    fn romh_phi2_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<ReadResult> {
        self.romh_phi1_read(addr, bus)
    }

    /// The register only exists as a toggle; the bus is never driven.
    fn io1_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<u8> {
        if addr & 0xff < 2 {
            self.toggle(bus);
        }
        None
    }

    fn io1_store(&mut self, addr: u16, _value: u8, bus: &mut PortBus) {
        if addr & 0xff < 2 {
            self.toggle(bus);
        }
    }

    fn peek(&self, addr: u16, _view: &PortView) -> ReadResult {
        match self.mode {
            ExpertMode::Prg | ExpertMode::On if (0x8000..=0x9fff).contains(&addr) => {
                ReadResult::Valid(self.ram[usize::from(addr & 0x1fff)])
            }
            ExpertMode::On if addr >= 0xe000 && self.ramh_enabled => {
                ReadResult::Valid(self.ram[usize::from(addr & 0x1fff)])
            }
            _ => ReadResult::Through,
        }
    }

    fn mmu_translate(&self, addr: u16, _view: &PortView) -> Translation<'_> {
        match addr & 0xf000 {
            0xe000 | 0xf000 if self.ramh_visible() => {
                Translation::Window(MmuWindow::new(&self.ram, 0xe000, 0xfffd))
            }
            0x8000 | 0x9000 if self.mode == ExpertMode::Prg || self.ramh_visible() => {
                Translation::Window(MmuWindow::new(&self.ram, 0x8000, 0x9ffd))
            }
            _ => Translation::Decline,
        }
    }

    fn snapshot_name(&self) -> &'static str {
        SNAPSHOT_NAME
    }

    fn write_snapshot(&self) -> SnapshotModule {
        let mut m = SnapshotModule::new(SNAPSHOT_NAME, 0, 0);
        m.write_u8(self.mode.code());
        m.write_bool(self.register_enabled);
        m.write_bool(self.ram_writeable);
        m.write_bool(self.ramh_enabled);
        m.write_bytes(&self.ram);
        m
    }

    fn read_snapshot(&mut self, module: &SnapshotModule, _bus: &mut PortBus) -> Result<(), SnapshotError> {
        module.check_version(0, 0, 0)?;
        let mut r = module.reader();
        let mode = r.read_u8()?;
        self.mode = ExpertMode::from_code(mode).ok_or_else(|| module.invalid(format!("mode {mode}")))?;
        self.register_enabled = r.read_bool()?;
        self.ram_writeable = r.read_bool()?;
        self.ramh_enabled = r.read_bool()?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExpansionPort, RamHost};

    fn attached(mode: ExpertMode) -> (ExpansionPort, RamHost) {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        let mut expert = Expert::new(mode);
        expert.ram[0] = 0x42;
        expert.ram[0x1ffe] = 0x99;
        port.attach_device(&mut host, Box::new(expert));
        port.reset(&mut host);
        (port, host)
    }

    #[test]
    fn prg_mode_maps_ram_as_8k_game() {
        let (mut port, mut host) = attached(ExpertMode::Prg);
        assert!(host.export.is_8k());
        assert_eq!(port.roml_read(&mut host, 0x8000), 0x42);
        port.roml_store(&mut host, 0x8001, 0x55);
        assert_eq!(port.roml_read(&mut host, 0x8001), 0x55);
    }

    #[test]
    fn on_mode_resets_into_ultimax_and_toggles_on_io1() {
        let (mut port, mut host) = attached(ExpertMode::On);
        assert!(host.export.is_ultimax());
        assert_eq!(port.romh_read(&mut host, 0xfffe), 0x99);
        host.ram[0xfffe] = 0x11;
        // Reading $DE00 flips RAMH off; the bus stays open.
        assert_eq!(port.io1_read(&mut host, 0xde00), 0xFF);
        assert_eq!(port.romh_read(&mut host, 0xfffe), 0x11);
        port.io1_store(&mut host, 0xde01, 0);
        assert_eq!(port.romh_read(&mut host, 0xfffe), 0x99);
    }

    #[test]
    fn only_on_mode_allows_freezing() {
        let (port, _) = attached(ExpertMode::On);
        assert!(port.freeze_allowed());
        let (port, _) = attached(ExpertMode::Off);
        assert!(!port.freeze_allowed());
    }

    #[test]
    fn bin_images_need_8k() {
        assert!(Expert::from_bin(&[0; 0x2000]).is_ok());
        assert!(Expert::from_bin(&[0; 0x2002]).is_ok());
        assert!(matches!(
            Expert::from_bin(&[0; 0x1000]),
            Err(CartridgeError::BadSize { size: 0x1000, .. })
        ));
        assert_eq!(Expert::from_bin(&[0; 0x2000]).expect("valid").mode(), ExpertMode::On);
    }
}
