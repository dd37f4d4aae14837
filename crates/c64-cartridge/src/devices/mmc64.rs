//! MMC64: SD/MMC card interface with an 8 KiB flash BIOS and a pass-through
//! port.
//!
//! # Registers ($DF10-$DF13, mirrored at $DE10-$DE13 with the flash jumper)
//!
//! | Addr  | Meaning                                                    |
//! |-------|------------------------------------------------------------|
//! | $DF10 | SPI data                                                   |
//! | $DF11 | control: 0 BIOS off, 1 card deselect, 2 8 MHz, 3 clock     |
//! |       | port at $DF20, 4 flash mode, 5 no ext. ROM, 6 SPI read     |
//! |       | trigger, 7 cartridge off                                   |
//! | $DF12 | status: 1/2 pass-through EXROM/GAME, 3 no card, 4 write    |
//! |       | protected, 5 flash jumper                                  |
//! | $DF13 | identification; also takes the unlock sequences            |
//!
//! No card is ever inserted: SPI reads return $FF.

use std::any::Any;

use emu_core::{SnapshotError, SnapshotModule};
use log::debug;

use crate::device::{CartridgeDevice, CartridgeId, MmuWindow, PortBus, PortView, ReadResult, Slot, Translation};
use crate::export::{CMODE_8KGAME, CMODE_RAM, CMODE_READ, CMODE_ULTIMAX};
use crate::{CartridgeError, CrtImage};

pub const MMC64_BIOS_SIZE: usize = 0x2000;

const SNAPSHOT_NAME: &str = "CARTMMC64";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Mmc64Config {
    /// BIOS off after reset, flash programming allowed.
    pub flash_jumper: bool,
    /// 0 = rev A, 1 = rev B.
    pub revision: u8,
}

#[derive(Debug, Clone)]
pub struct Mmc64 {
    config: Mmc64Config,
    /// $DF11 bit 7.
    disabled: bool,
    bios_off: bool,
    extrom_off: bool,
    flash_mode: bool,
    clockport_df20: bool,
    speed: bool,
    card_deselected: bool,
    read_trigger: bool,
    unlocked: bool,
    unlocking: [u8; 2],
    ext_exrom: bool,
    ext_game: bool,
    bios: Vec<u8>,
    bios_changed: bool,
}

impl Mmc64 {
    fn with_bios(bios: &[u8], config: Mmc64Config) -> Self {
        Self {
            config,
            disabled: false,
            bios_off: config.flash_jumper,
            extrom_off: false,
            flash_mode: false,
            clockport_df20: false,
            speed: false,
            card_deselected: false,
            read_trigger: false,
            unlocked: false,
            unlocking: [0; 2],
            ext_exrom: false,
            ext_game: false,
            bios: bios.to_vec(),
            bios_changed: false,
        }
    }

    pub fn from_bin(data: &[u8], config: Mmc64Config) -> Result<Self, CartridgeError> {
        let bios = match data.len() {
            MMC64_BIOS_SIZE => data,
            n if n == MMC64_BIOS_SIZE + 2 => &data[2..],
            size => return Err(CartridgeError::BadSize { cartridge: "MMC64", size }),
        };
        Ok(Self::with_bios(bios, config))
    }

    pub fn from_crt(image: &CrtImage, config: Mmc64Config) -> Result<Self, CartridgeError> {
        let chip = image.chips.first().ok_or(CartridgeError::NoChips)?;
        if chip.bank > 1 {
            return Err(CartridgeError::BankOutOfRange { bank: chip.bank, banks: 2 });
        }
        if chip.data.len() != MMC64_BIOS_SIZE {
            return Err(CartridgeError::BadSize { cartridge: "MMC64", size: chip.data.len() });
        }
        Ok(Self::with_bios(&chip.data, config))
    }

    #[must_use]
    pub fn config(&self) -> Mmc64Config {
        self.config
    }

    #[must_use]
    pub fn bios(&self) -> &[u8] {
        &self.bios
    }

    /// The BIOS was reprogrammed in flash mode and should be saved.
    #[must_use]
    pub fn bios_changed(&self) -> bool {
        self.bios_changed
    }

    /// Is $DF11 bit 7 unlocked?
    #[must_use]
    pub fn unlocked(&self) -> bool {
        self.unlocked
    }

    fn bios_mapped(&self) -> bool {
        !self.disabled && !self.bios_off
    }

    /// Lines of the pass-through port, handed straight to the CPU.
    fn passthrough_mode(&self) -> u8 {
        u8::from(!self.ext_exrom) << 1 | u8::from(self.ext_game)
    }

    fn clear_registers(&mut self) {
        self.disabled = false;
        self.extrom_off = false;
        self.flash_mode = false;
        self.clockport_df20 = false;
        self.speed = false;
        self.card_deselected = false;
        self.read_trigger = false;
        self.bios_off = self.config.flash_jumper;
    }

    fn control_value(&self) -> u8 {
        u8::from(self.bios_off)
            | u8::from(self.card_deselected) << 1
            | u8::from(self.speed) << 2
            | u8::from(self.clockport_df20) << 3
            | u8::from(self.flash_mode) << 4
            | u8::from(self.extrom_off) << 5
            | u8::from(self.read_trigger) << 6
            | u8::from(self.disabled) << 7
    }

    fn status_value(&self) -> u8 {
        u8::from(self.config.flash_jumper) << 5
            | u8::from(!self.ext_exrom) << 1
            | u8::from(!self.ext_game) << 2
            // no card, so not writeable either
            | 1 << 3
            | 1 << 4
    }

    fn register_read(&self, addr: u16) -> Option<u8> {
        if self.disabled {
            return None;
        }
        match addr & 0xff {
            0x10 => Some(0xff),
            0x11 => Some(self.control_value()),
            0x12 => Some(self.status_value()),
            0x13 if !self.card_deselected => Some(0x64),
            0x13 => Some(if self.config.revision > 0 { 2 } else { 1 }),
            _ => None,
        }
    }

    fn register_store(&mut self, addr: u16, value: u8, active: bool, bus: &mut PortBus) {
        match addr & 0xff {
            0x11 if active => {
                self.bios_off = value & 0x01 != 0;
                self.card_deselected = value & 0x02 != 0;
                self.speed = value & 0x04 != 0;
                self.clockport_df20 = value & 0x08 != 0;
                if self.config.flash_jumper {
                    self.flash_mode = value & 0x10 != 0;
                }
                self.extrom_off = value & 0x20 != 0;
                self.read_trigger = value & 0x40 != 0;
                self.disabled = value & 0x80 != 0;
                if self.disabled {
                    debug!("MMC64 disabled");
                    let mode = self.passthrough_mode();
                    bus.config_changed_slot0(mode, mode, CMODE_READ);
                } else if self.bios_off {
                    bus.config_changed_slot0(CMODE_RAM, CMODE_RAM, CMODE_READ);
                } else if self.flash_mode {
                    bus.config_changed_slot0(CMODE_RAM, CMODE_ULTIMAX, CMODE_READ);
                } else {
                    bus.config_changed_slot0(CMODE_RAM, CMODE_8KGAME, CMODE_READ);
                }
            }
            0x13 => {
                self.unlocking = [self.unlocking[1], value];
                match self.unlocking {
                    [0x55, 0xaa] => self.unlocked = true,
                    [0x0a, 0x1c] => {
                        debug!("MMC64 re-enabled");
                        self.disabled = false;
                        bus.set_port_exrom(Slot::Zero, true);
                        bus.port_config_changed(Slot::Zero);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

impl CartridgeDevice for Mmc64 {
    fn id(&self) -> CartridgeId {
        CartridgeId::Mmc64
    }

    fn config_init(&mut self, bus: &mut PortBus) {
        self.clear_registers();
        let pass = bus.view().passthrough;
        self.ext_exrom = pass.exrom;
        self.ext_game = pass.game;
        let mode = u8::from(self.ext_game);
        bus.config_changed_slot0(mode, mode, CMODE_READ);
    }

    fn config_setup(&mut self, bus: &mut PortBus) {
        self.config_init(bus);
    }

    fn reset(&mut self, bus: &mut PortBus) {
        self.clear_registers();
        bus.set_port_exrom(Slot::Zero, true);
        bus.port_config_changed(Slot::Zero);
    }

    fn passthrough_changed(&mut self, bus: &mut PortBus) {
        let pass = bus.view().passthrough;
        self.ext_exrom = pass.exrom;
        self.ext_game = pass.game;
        if self.disabled {
            let mode = self.passthrough_mode();
            bus.config_changed_slot0(mode, mode, CMODE_READ);
        } else {
            bus.set_port_game(Slot::Zero, self.ext_game);
            bus.port_config_changed(Slot::Zero);
        }
    }

    fn roml_read(&mut self, addr: u16, _bus: &mut PortBus) -> ReadResult {
        if self.bios_mapped() {
            ReadResult::Valid(self.bios[usize::from(addr & 0x1fff)])
        } else {
            ReadResult::Through
        }
    }

    /// Claims the write while the BIOS is mapped; only flash mode changes
    /// it.
    fn roml_store(&mut self, addr: u16, value: u8, _bus: &mut PortBus) -> bool {
        if !self.bios_mapped() {
            return false;
        }
        if self.config.flash_jumper && self.flash_mode {
            let n = usize::from(addr & 0x1fff);
            if self.bios[n] != value {
                self.bios[n] = value;
                self.bios_changed = true;
            }
        }
        true
    }

    fn io1_read(&mut self, addr: u16, _bus: &mut PortBus) -> Option<u8> {
        self.register_read(addr)
    }

    fn io1_peek(&self, addr: u16, _view: &PortView) -> Option<u8> {
        self.register_read(addr)
    }

    fn io1_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) {
        if self.config.flash_jumper {
            self.register_store(addr, value, true, bus);
        }
    }

    fn io2_read(&mut self, addr: u16, _bus: &mut PortBus) -> Option<u8> {
        self.register_read(addr)
    }

    fn io2_peek(&self, addr: u16, _view: &PortView) -> Option<u8> {
        self.register_read(addr)
    }

    fn io2_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) {
        let active = !self.disabled;
        self.register_store(addr, value, active, bus);
    }

    fn peek(&self, addr: u16, _view: &PortView) -> ReadResult {
        if (0x8000..=0x9fff).contains(&addr) && self.bios_mapped() {
            ReadResult::Valid(self.bios[usize::from(addr & 0x1fff)])
        } else {
            ReadResult::Through
        }
    }

    fn mmu_translate(&self, addr: u16, _view: &PortView) -> Translation<'_> {
        if self.bios_mapped() && (0x8000..=0x9fff).contains(&addr) {
            Translation::Window(MmuWindow::new(&self.bios, 0x8000, 0x9ffd))
        } else {
            Translation::Through
        }
    }

    fn snapshot_name(&self) -> &'static str {
        SNAPSHOT_NAME
    }

    fn write_snapshot(&self) -> SnapshotModule {
        let mut m = SnapshotModule::new(SNAPSHOT_NAME, 0, 0);
        m.write_u8(self.control_value());
        m.write_bool(self.config.flash_jumper);
        m.write_u8(self.config.revision);
        m.write_bool(self.unlocked);
        m.write_bytes(&self.unlocking);
        m.write_bool(self.ext_exrom);
        m.write_bool(self.ext_game);
        m.write_bool(self.bios_changed);
        m.write_bytes(&self.bios);
        m
    }

    fn read_snapshot(&mut self, module: &SnapshotModule, _bus: &mut PortBus) -> Result<(), SnapshotError> {
        module.check_version(0, 0, 0)?;
        let mut r = module.reader();
        let control = r.read_u8()?;
        self.bios_off = control & 0x01 != 0;
        self.card_deselected = control & 0x02 != 0;
        self.speed = control & 0x04 != 0;
        self.clockport_df20 = control & 0x08 != 0;
        self.flash_mode = control & 0x10 != 0;
        self.extrom_off = control & 0x20 != 0;
        self.read_trigger = control & 0x40 != 0;
        self.disabled = control & 0x80 != 0;
        self.config.flash_jumper = r.read_bool()?;
        self.config.revision = r.read_u8()?;
        self.unlocked = r.read_bool()?;
        r.read_into(&mut self.unlocking)?;
        self.ext_exrom = r.read_bool()?;
        self.ext_game = r.read_bool()?;
        self.bios_changed = r.read_bool()?;
        r.read_into(&mut self.bios)?;
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

    fn bios() -> Vec<u8> {
        (0..MMC64_BIOS_SIZE).map(|n| (n >> 8) as u8).collect()
    }

    fn attached(config: Mmc64Config) -> (ExpansionPort, RamHost) {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        let mmc = Mmc64::from_bin(&bios(), config).expect("valid");
        port.attach_device(&mut host, Box::new(mmc));
        (port, host)
    }

    #[test]
    fn bios_boots_at_8000() {
        let (mut port, mut host) = attached(Mmc64Config::default());
        assert!(host.export.is_8k());
        assert_eq!(port.roml_read(&mut host, 0x8300), 3);
        assert_eq!(port.io2_read(&mut host, 0xdf13), 0x64);
        // No card inserted.
        assert_eq!(port.io2_read(&mut host, 0xdf12) & 0x08, 0x08);
    }

    #[test]
    fn bios_select_hides_the_rom() {
        let (mut port, mut host) = attached(Mmc64Config::default());
        port.io2_store(&mut host, 0xdf11, 0x01);
        assert_eq!(host.export, crate::ExportLines::NONE);
        assert_eq!(port.io2_read(&mut host, 0xdf11), 0x01);
        assert_eq!(port.mmu_translate(0x8000), None);
    }

    #[test]
    fn disable_bit_passes_through_and_unlock_sequence_reenables() {
        let (mut port, mut host) = attached(Mmc64Config::default());
        port.io2_store(&mut host, 0xdf11, 0x80);
        assert_eq!(host.export, crate::ExportLines::NONE);
        assert_eq!(port.io2_read(&mut host, 0xdf11), 0xFF);

        port.io2_store(&mut host, 0xdf13, 0x0a);
        port.io2_store(&mut host, 0xdf13, 0x1c);
        assert!(host.export.exrom);
        assert_eq!(port.io2_read(&mut host, 0xdf11), 0x00);
    }

    #[test]
    fn bit7_unlock_is_tracked() {
        let (mut port, mut host) = attached(Mmc64Config::default());
        port.io2_store(&mut host, 0xdf13, 0x55);
        port.io2_store(&mut host, 0xdf13, 0xaa);
        assert!(port.device::<Mmc64>().expect("valid").unlocked());
    }

    #[test]
    fn flash_mode_reprograms_the_bios() {
        let config = Mmc64Config {
            flash_jumper: true,
            revision: 1,
        };
        let (mut port, mut host) = attached(config);
        // The jumper boots with the BIOS off.
        assert_eq!(port.roml_read(&mut host, 0x8000), 0xFF);
        port.io1_store(&mut host, 0xde11, 0x10);
        assert!(host.export.is_ultimax());
        port.roml_store(&mut host, 0x8000, 0xea);
        assert_eq!(port.roml_read(&mut host, 0x8000), 0xea);
        let mmc = port.device::<Mmc64>().expect("valid");
        assert!(mmc.bios_changed());
        assert_eq!(port.io2_read(&mut host, 0xdf12) & 0x20, 0x20);
    }

    #[test]
    fn crt_needs_one_8k_chip() {
        let mut crt = crate::crt::tests::make_crt_header(37, 0, 1);
        crt.extend(crate::crt::tests::make_chip(0, 0x8000, &[0; 0x1000]));
        let image = crate::parse_crt(&crt).expect("valid");
        assert!(Mmc64::from_crt(&image, Mmc64Config::default()).is_err());
    }
}
