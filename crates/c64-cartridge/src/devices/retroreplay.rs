//! Retro Replay: 128 KiB flash in eight (or sixteen) 8 KiB banks, 32 KiB
//! of RAM and a freeze button.
//!
//! # Registers
//!
//! | Addr  | Bits  | Meaning                                           |
//! |-------|-------|---------------------------------------------------|
//! | $DE00 | 0-1   | GAME/EXROM mode                                   |
//! |       | 2     | disable the cartridge until reset                 |
//! |       | 3,4,7 | bank A13, A14, A15                                |
//! |       | 5     | map RAM instead of ROM                            |
//! |       | 6     | release the freeze                                |
//! | $DE01 | 1     | allow RAM bank selection in I/O                   |
//! |       | 2     | no freeze                                         |
//! |       | 6     | REU compatible mapping (ROM/RAM at $DE02-$DEFF)   |
//!
//! $DE01 can only be written once after reset unless the flash jumper
//! is set. Flash programming is not emulated; writes to ROM areas are
//! dropped.

use std::any::Any;

use emu_core::{SnapshotError, SnapshotModule};
use log::debug;

use crate::device::{CartridgeDevice, CartridgeId, MmuWindow, PortBus, PortView, ReadResult, Slot, Translation};
use crate::export::{
    CMODE_16KGAME, CMODE_8KGAME, CMODE_BANK_SHIFT, CMODE_EXPORT_RAM, CMODE_RAM, CMODE_READ, CMODE_RELEASE_FREEZE,
    CMODE_ULTIMAX, CMODE_WRITE,
};
use crate::{CartridgeError, CrtImage};

pub const RR_FLASH_SIZE: usize = 0x20000;
pub const RR_RAM_SIZE: usize = 0x8000;

const BANK_SIZE: usize = 0x2000;
const SNAPSHOT_NAME: &str = "CARTRR";

/// Board jumpers and revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetroReplayConfig {
    /// Boot in flash mode: ROM off, $DE01 writeable any time.
    pub flash_jumper: bool,
    /// Start in the upper 64 KiB of flash.
    pub bank_jumper: bool,
    /// 0 = Retro Replay, 1 = Nordic Replay (RAM at $A000 mode).
    pub revision: u8,
}

#[derive(Debug, Clone)]
pub struct RetroReplay {
    config: RetroReplayConfig,
    active: bool,
    clockport: bool,
    bank: u32,
    write_once: bool,
    allow_bank: bool,
    no_freeze: bool,
    reu_mapping: bool,
    ram_at_a000: bool,
    rom_offset: usize,
    flash: Vec<u8>,
    ram: Vec<u8>,
}

impl RetroReplay {
    /// `raw` holds up to 128 KiB in file order; the upper 64 KiB come
    /// first in flash so the bank jumper boots the right half.
    fn with_raw(raw: &[u8], config: RetroReplayConfig) -> Self {
        let mut flash = vec![0xff; RR_FLASH_SIZE];
        let half = RR_FLASH_SIZE / 2;
        let (lo, hi) = raw.split_at(raw.len().min(half));
        flash[half..half + lo.len()].copy_from_slice(lo);
        flash[..hi.len()].copy_from_slice(hi);
        let mut rr = Self {
            config,
            active: false,
            clockport: false,
            bank: 0,
            write_once: false,
            allow_bank: false,
            no_freeze: false,
            reu_mapping: false,
            ram_at_a000: false,
            rom_offset: 0,
            flash,
            ram: vec![0; RR_RAM_SIZE],
        };
        rr.rom_offset = rr.jumper_offset();
        rr
    }

    /// 32, 64 or 128 KiB of ROM.
    pub fn from_bin(data: &[u8], config: RetroReplayConfig) -> Result<Self, CartridgeError> {
        match data.len() {
            0x8000 | 0x10000 | 0x20000 => Ok(Self::with_raw(data, config)),
            size => Err(CartridgeError::BadSize { cartridge: "Retro Replay", size }),
        }
    }

    /// Four, eight or sixteen 8 KiB banks.
    pub fn from_crt(image: &CrtImage, config: RetroReplayConfig) -> Result<Self, CartridgeError> {
        let mut raw = vec![0xff; RR_FLASH_SIZE];
        image.flatten(&mut raw, BANK_SIZE, "Retro Replay")?;
        let size = match image.chips.len() {
            4 | 8 | 16 => image.chips.len() * BANK_SIZE,
            n => return Err(CartridgeError::BadSize { cartridge: "Retro Replay", size: n * BANK_SIZE }),
        };
        Ok(Self::with_raw(&raw[..size], config))
    }

    #[must_use]
    pub fn config(&self) -> RetroReplayConfig {
        self.config
    }

    /// Is the cartridge mapped at all (cleared by $DE00 bit 2)?
    #[must_use]
    pub fn active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    fn jumper_offset(&self) -> usize {
        if self.config.bank_jumper { 0 } else { 0x10000 }
    }

    fn flash_index(&self, addr: u16, bank: u32) -> usize {
        (self.rom_offset + usize::from(addr & 0x1fff) + (bank as usize) * BANK_SIZE) & (RR_FLASH_SIZE - 1)
    }

    fn ram_index(addr: u16, bank: u32) -> usize {
        usize::from(addr & 0x1fff) + ((bank & 3) as usize) * BANK_SIZE
    }

    /// RAM bank used for accesses through $DE02-$DFFF.
    fn io_ram_bank(&self, view: &PortView) -> u32 {
        if self.allow_bank { view.roml_bank & 3 } else { 0 }
    }

    fn decode_bank(value: u8) -> u32 {
        u32::from(((value >> 3) & 3) | ((value >> 5) & 4))
    }

    fn register_value(&self, view: &PortView) -> u8 {
        let bank = view.roml_bank as u8;
        ((bank & 3) << 3)
            | ((bank & 4) << 5)
            | ((bank & 8) << 2)
            | u8::from(self.allow_bank) << 1
            | u8::from(self.reu_mapping) << 6
            | u8::from(self.config.flash_jumper)
    }

    fn power_up(&mut self, bus: &mut PortBus) {
        self.active = true;
        self.clockport = false;
        self.write_once = false;
        self.allow_bank = false;
        self.no_freeze = false;
        self.reu_mapping = false;
        self.ram_at_a000 = false;
        self.rom_offset = self.jumper_offset();
        let mode = if self.config.flash_jumper { CMODE_RAM } else { CMODE_8KGAME };
        bus.config_changed_slotmain(mode, mode, CMODE_READ);
    }

    fn store_control(&mut self, value: u8, bus: &mut PortBus) {
        self.bank = Self::decode_bank(value);
        let mut mode = value & 3;
        let mut flags = CMODE_WRITE;
        if self.config.revision > 0 && value & 0xe7 == 0x22 {
            mode = CMODE_16KGAME;
            self.ram_at_a000 = true;
        } else {
            self.ram_at_a000 = false;
            if value & 0x40 != 0 {
                flags |= CMODE_RELEASE_FREEZE;
            }
            if value & 0x20 != 0 {
                flags |= CMODE_EXPORT_RAM;
            }
        }
        bus.config_changed_slotmain(0, mode | (self.bank << CMODE_BANK_SHIFT) as u8, flags);
        if value & 0x04 != 0 {
            debug!("Retro Replay disabled until reset");
            self.active = false;
        }
    }

    fn store_extended(&mut self, value: u8, bus: &mut PortBus) {
        if self.config.flash_jumper {
            let mut bank = Self::decode_bank(value);
            if self.config.bank_jumper {
                bank |= u32::from(((value >> 2) & 8) ^ 8);
            }
            self.bank = bank;
            bus.set_main_banks(bank, bank);
            self.allow_bank = value & 0x02 != 0;
            self.no_freeze = value & 0x04 != 0;
            self.reu_mapping = false;
            bus.port_config_changed(Slot::Main);
        } else if !self.write_once {
            self.bank = Self::decode_bank(value);
            bus.set_main_banks(self.bank, self.bank);
            self.allow_bank = value & 0x02 != 0;
            self.no_freeze = value & 0x04 != 0;
            self.reu_mapping = value & 0x40 != 0;
            self.clockport = value & 0x01 != 0;
            self.write_once = true;
            bus.port_config_changed(Slot::Main);
        }
    }

    fn io_read(&self, addr: u16, base: u16, ram_base: usize, view: &PortView) -> u8 {
        if view.export_ram || (base == 0xdf00 && self.config.revision > 0 && self.ram_at_a000) {
            self.ram[ram_base + usize::from(addr & 0xff) + (self.io_ram_bank(view) as usize) * BANK_SIZE]
        } else {
            self.flash[self.flash_index(addr | base, view.roml_bank)]
        }
    }
}

impl CartridgeDevice for RetroReplay {
    fn id(&self) -> CartridgeId {
        CartridgeId::RetroReplay
    }

    fn config_init(&mut self, bus: &mut PortBus) {
        self.power_up(bus);
    }

    fn config_setup(&mut self, bus: &mut PortBus) {
        self.power_up(bus);
    }

    fn reset(&mut self, bus: &mut PortBus) {
        self.power_up(bus);
    }

    fn freeze(&mut self, bus: &mut PortBus) {
        if !self.config.flash_jumper {
            self.active = true;
            bus.config_changed_slotmain(CMODE_ULTIMAX, CMODE_ULTIMAX, CMODE_READ | CMODE_EXPORT_RAM);
        }
    }

    fn freeze_allowed(&self) -> bool {
        !self.no_freeze
    }

    fn roml_read(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        let view = bus.view();
        ReadResult::Valid(if view.export_ram {
            self.ram[Self::ram_index(addr, view.roml_bank)]
        } else {
            self.flash[self.flash_index(addr, view.roml_bank)]
        })
    }

    fn roml_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        let view = bus.view();
        if view.export_ram {
            self.ram[Self::ram_index(addr, view.roml_bank)] = value;
        }
        true
    }

    fn roml_no_ultimax_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        let view = bus.view();
        if self.config.flash_jumper && view.export_ram {
            self.ram[Self::ram_index(addr, view.roml_bank)] = value;
            true
        } else {
            false
        }
    }

    fn raml_no_ultimax_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        self.roml_no_ultimax_store(addr, value, bus)
    }

    fn romh_read(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        ReadResult::Valid(if self.config.revision > 0 && self.ram_at_a000 {
            self.ram[usize::from(addr & 0x1fff)]
        } else {
            self.flash[self.flash_index(addr, bus.view().romh_bank)]
        })
    }

    fn romh_store(&mut self, addr: u16, value: u8, _bus: &mut PortBus) -> bool {
        if self.ram_at_a000 {
            self.ram[usize::from(addr & 0x1fff)] = value;
        }
        true
    }

    fn romh_no_ultimax_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        self.romh_store(addr, value, bus)
    }

    fn io1_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<u8> {
        if !self.active {
            return None;
        }
        self.io1_peek(addr, bus.view())
    }

    fn io1_peek(&self, addr: u16, view: &PortView) -> Option<u8> {
        if !self.active {
            return None;
        }
        match addr & 0xff {
            0x00 | 0x01 => Some(self.register_value(view)),
            _ if self.reu_mapping => Some(self.io_read(addr, 0xde00, 0x1e00, view)),
            _ => None,
        }
    }

    fn io1_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) {
        if !self.active {
            return;
        }
        match addr & 0xff {
            0x00 => self.store_control(value, bus),
            0x01 => self.store_extended(value, bus),
            _ => {
                let view = *bus.view();
                if self.reu_mapping && view.export_ram {
                    let n = 0x1e00 + usize::from(addr & 0xff) + (self.io_ram_bank(&view) as usize) * BANK_SIZE;
                    self.ram[n] = value;
                }
            }
        }
    }

    fn io2_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<u8> {
        self.io2_peek(addr, bus.view())
    }

    fn io2_peek(&self, addr: u16, view: &PortView) -> Option<u8> {
        if !self.active || self.reu_mapping {
            return None;
        }
        Some(self.io_read(addr, 0xdf00, 0x1f00, view))
    }

    fn io2_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) {
        let view = *bus.view();
        if self.active && !self.reu_mapping && view.export_ram {
            let n = 0x1f00 + usize::from(addr & 0xff) + (self.io_ram_bank(&view) as usize) * BANK_SIZE;
            self.ram[n] = value;
        }
    }

    fn peek(&self, addr: u16, view: &PortView) -> ReadResult {
        let romh = || {
            if self.config.revision > 0 && self.ram_at_a000 {
                self.ram[usize::from(addr & 0x1fff)]
            } else {
                self.flash[self.flash_index(addr, view.romh_bank)]
            }
        };
        match addr {
            0x8000..=0x9fff => ReadResult::Valid(if view.export_ram {
                self.ram[Self::ram_index(addr, view.roml_bank)]
            } else {
                self.flash[self.flash_index(addr, view.roml_bank)]
            }),
            0xe000..=0xffff if view.main.is_ultimax() => ReadResult::Valid(romh()),
            0xa000..=0xbfff => ReadResult::Valid(romh()),
            _ => ReadResult::Through,
        }
    }

    fn mmu_translate(&self, addr: u16, view: &PortView) -> Translation<'_> {
        let rom_bank = |bank: u32| {
            let start = self.flash_index(0, bank);
            &self.flash[start..start + BANK_SIZE]
        };
        match addr & 0xe000 {
            0xe000 if view.export.is_ultimax() => {
                Translation::Window(MmuWindow::new(rom_bank(view.romh_bank), 0xe000, 0xfffd))
            }
            0xa000 if self.ram_at_a000 => Translation::Window(MmuWindow::new(&self.ram[..BANK_SIZE], 0xa000, 0xbffd)),
            0xa000 if view.export.is_16k() => {
                Translation::Window(MmuWindow::new(rom_bank(view.romh_bank), 0xa000, 0xbffd))
            }
            0x8000 if view.export_ram => {
                let start = Self::ram_index(0, view.roml_bank);
                Translation::Window(MmuWindow::new(&self.ram[start..start + BANK_SIZE], 0x8000, 0x9ffd))
            }
            0x8000 if view.export.exrom || view.export.is_ultimax() => {
                Translation::Window(MmuWindow::new(rom_bank(view.roml_bank), 0x8000, 0x9ffd))
            }
            _ => Translation::Through,
        }
    }

    fn snapshot_name(&self) -> &'static str {
        SNAPSHOT_NAME
    }

    fn write_snapshot(&self) -> SnapshotModule {
        let mut m = SnapshotModule::new(SNAPSHOT_NAME, 0, 1);
        m.write_u8(self.config.revision);
        m.write_bool(self.active);
        m.write_bool(self.clockport);
        m.write_u32(self.bank);
        m.write_bool(self.write_once);
        m.write_bool(self.allow_bank);
        m.write_bool(self.no_freeze);
        m.write_bool(self.reu_mapping);
        m.write_bool(self.ram_at_a000);
        m.write_bool(self.config.flash_jumper);
        m.write_bool(self.config.bank_jumper);
        m.write_u32(self.rom_offset as u32);
        m.write_bytes(&self.flash);
        m.write_bytes(&self.ram);
        m
    }

    fn read_snapshot(&mut self, module: &SnapshotModule, _bus: &mut PortBus) -> Result<(), SnapshotError> {
        module.check_version(0, 1, 1)?;
        let mut r = module.reader();
        self.config.revision = r.read_u8()?;
        self.active = r.read_bool()?;
        self.clockport = r.read_bool()?;
        self.bank = r.read_u32()? & 0x0f;
        self.write_once = r.read_bool()?;
        self.allow_bank = r.read_bool()?;
        self.no_freeze = r.read_bool()?;
        self.reu_mapping = r.read_bool()?;
        self.ram_at_a000 = r.read_bool()?;
        self.config.flash_jumper = r.read_bool()?;
        self.config.bank_jumper = r.read_bool()?;
        let offset = r.read_u32()? as usize;
        if offset != 0 && offset != 0x10000 {
            return Err(module.invalid(format!("ROM offset {offset:#x}")));
        }
        self.rom_offset = offset;
        r.read_into(&mut self.flash)?;
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
    use crate::crt::tests::{make_chip, make_crt_header};
    use crate::{ExpansionPort, RamHost, parse_crt};

    /// Eight banks, each filled with its bank number.
    fn image() -> Vec<u8> {
        let mut raw = vec![0; 0x10000];
        for (bank, chunk) in raw.chunks_mut(BANK_SIZE).enumerate() {
            chunk.fill(bank as u8);
        }
        raw
    }

    fn attached(config: RetroReplayConfig) -> (ExpansionPort, RamHost) {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        let rr = RetroReplay::from_bin(&image(), config).expect("valid");
        port.attach_device(&mut host, Box::new(rr));
        (port, host)
    }

    #[test]
    fn boots_as_8k_game_from_bank_0() {
        let (mut port, mut host) = attached(RetroReplayConfig::default());
        assert!(host.export.is_8k());
        assert_eq!(port.roml_read(&mut host, 0x8000), 0);
    }

    #[test]
    fn control_register_switches_bank_and_mode() {
        let (mut port, mut host) = attached(RetroReplayConfig::default());
        // Bank 3 (A13+A14), 16K game.
        port.io1_store(&mut host, 0xde00, 0x18 | CMODE_16KGAME);
        assert!(host.export.is_16k());
        assert_eq!(port.roml_read(&mut host, 0x8000), 3);
        assert_eq!(port.romh_read(&mut host, 0xa000), 3);
        assert_eq!(port.io1_read(&mut host, 0xde00), 0x18);
    }

    #[test]
    fn export_ram_maps_ram_at_roml() {
        let (mut port, mut host) = attached(RetroReplayConfig::default());
        port.io1_store(&mut host, 0xde00, 0x20);
        port.roml_store(&mut host, 0x8123, 0x44);
        assert_eq!(port.roml_read(&mut host, 0x8123), 0x44);
        // Switching back to ROM hides it.
        port.io1_store(&mut host, 0xde00, 0x00);
        assert_eq!(port.roml_read(&mut host, 0x8123), 0);
    }

    #[test]
    fn extended_register_is_write_once() {
        let (mut port, mut host) = attached(RetroReplayConfig::default());
        port.io1_store(&mut host, 0xde01, 0x04);
        assert!(!port.freeze_allowed());
        port.io1_store(&mut host, 0xde01, 0x00);
        assert!(!port.freeze_allowed());
        port.reset(&mut host);
        assert!(port.freeze_allowed());
    }

    #[test]
    fn disable_bit_hides_io() {
        let (mut port, mut host) = attached(RetroReplayConfig::default());
        port.io1_store(&mut host, 0xde00, 0x04 | CMODE_RAM);
        assert_eq!(host.export, crate::ExportLines::NONE);
        assert_eq!(port.io1_read(&mut host, 0xde00), 0xFF);
        // Further writes are ignored until reset.
        port.io1_store(&mut host, 0xde00, CMODE_8KGAME);
        assert_eq!(host.export, crate::ExportLines::NONE);
    }

    #[test]
    fn freeze_maps_ram_in_ultimax() {
        let (mut port, mut host) = attached(RetroReplayConfig::default());
        port.trigger_freeze(&mut host);
        let fire = port.next_alarm().expect("valid");
        host.clock = fire;
        port.handle_alarms(&mut host);
        assert!(host.nmi);
        host.clock += 3;
        port.handle_alarms(&mut host);
        assert!(host.export.is_ultimax());
        port.roml_store(&mut host, 0x8000, 0x99);
        assert_eq!(port.roml_read(&mut host, 0x8000), 0x99);
        // ROMH stays ROM.
        assert_eq!(port.romh_read(&mut host, 0xe000), 0);

        port.io1_store(&mut host, 0xde00, 0x40 | CMODE_8KGAME);
        assert!(!host.nmi);
        assert!(host.export.is_8k());
    }

    #[test]
    fn flash_jumper_boots_with_rom_off() {
        let (mut port, mut host) = attached(RetroReplayConfig {
            flash_jumper: true,
            ..RetroReplayConfig::default()
        });
        assert_eq!(host.export, crate::ExportLines::NONE);
        assert_eq!(port.io1_read(&mut host, 0xde01) & 0x01, 0x01);
    }

    #[test]
    fn io2_shows_the_end_of_the_bank() {
        let (mut port, mut host) = attached(RetroReplayConfig::default());
        port.io1_store(&mut host, 0xde00, 0x08);
        assert_eq!(port.io2_read(&mut host, 0xdf80), 1);
        port.io1_store(&mut host, 0xde00, 0x20);
        port.io2_store(&mut host, 0xdf80, 0x5e);
        assert_eq!(port.io2_read(&mut host, 0xdf80), 0x5e);
        assert_eq!(port.roml_read(&mut host, 0x9f80), 0x5e);
    }

    #[test]
    fn crt_needs_a_whole_number_of_halves() {
        let mut crt = make_crt_header(36, 0, 1);
        for bank in 0..8 {
            crt.extend(make_chip(bank, 0x8000, &[bank as u8; BANK_SIZE]));
        }
        let image = parse_crt(&crt).expect("valid");
        let rr = RetroReplay::from_crt(&image, RetroReplayConfig::default()).expect("valid");
        assert_eq!(rr.flash[rr.flash_index(0x8000, 5)], 5);

        let mut crt = make_crt_header(36, 0, 1);
        crt.extend(make_chip(0, 0x8000, &[0; BANK_SIZE]));
        let image = parse_crt(&crt).expect("valid");
        assert!(RetroReplay::from_crt(&image, RetroReplayConfig::default()).is_err());
    }

    #[test]
    fn snapshot_keeps_ram_and_registers() {
        let (mut port, mut host) = attached(RetroReplayConfig::default());
        port.io1_store(&mut host, 0xde01, 0x02);
        port.io1_store(&mut host, 0xde00, 0x20);
        port.roml_store(&mut host, 0x8000, 0x12);
        let snap = port.write_snapshot();

        let (mut other, mut host2) = attached(RetroReplayConfig::default());
        other.read_snapshot(&mut host2, &snap).expect("valid");
        assert!(host2.export.is_8k());
        assert_eq!(other.roml_read(&mut host2, 0x8000), 0x12);
        assert_eq!(other.io1_read(&mut host2, 0xde01), 0x02);
    }
}
