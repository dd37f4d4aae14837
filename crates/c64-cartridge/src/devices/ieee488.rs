//! IEEE-488 interface: a 6525 TPI at $DF00-$DF07 (mirrored through
//! $DFFF) and a 4 KiB ROM at $8000, mirrored at $9000.
//!
//! Port A drives the bus handshake lines, port B the data lines. Port C
//! bit 3 asserts EXROM and bit 4 enables the ROM. There are no IEEE-488
//! drives on the other end: the bus always reads idle.

use std::any::Any;

use emu_core::{SnapshotError, SnapshotModule};

use crate::device::{CartridgeDevice, CartridgeId, MmuWindow, PortBus, PortView, ReadResult, Slot, Translation};
use crate::export::{CMODE_8KGAME, CMODE_READ};
use crate::tpi::{Tpi6525, TpiPins};
use crate::{CartridgeError, CrtImage, ExportLines};

pub const IEEE488_ROM_SIZE: usize = 0x1000;

const SNAPSHOT_NAME: &str = "CARTIEEE488";

#[derive(Debug, Clone)]
pub struct Ieee488 {
    tpi: Tpi6525,
    rom_enabled: bool,
    ext_exrom: bool,
    ext_game: bool,
    rom: Vec<u8>,
}

/// The cartridge's view of the TPI pins.
struct Pins<'a, 'b> {
    rom_enabled: &'a mut bool,
    ext_exrom: bool,
    ext_game: bool,
    bus: &'a mut PortBus<'b>,
}

impl TpiPins for Pins<'_, '_> {
    fn store_pc(&mut self, value: u8) {
        // Bit 3 pulls EXROM.
        let exrom = u8::from(value & 0x08 == 0);
        *self.rom_enabled = value & 0x10 != 0;
        let mode = exrom << 1 | u8::from(self.ext_game);
        self.bus.config_changed_slot0(mode, mode, CMODE_READ);
    }

    fn read_pc(&mut self) -> u8 {
        if self.ext_exrom { 0x7f } else { 0xff }
    }

    fn set_int(&mut self, active: bool) {
        self.bus.set_irq(active);
    }
}

impl Ieee488 {
    fn with_rom(rom: &[u8]) -> Self {
        Self {
            tpi: Tpi6525::default(),
            rom_enabled: true,
            ext_exrom: false,
            ext_game: false,
            rom: rom.to_vec(),
        }
    }

    pub fn from_bin(data: &[u8]) -> Result<Self, CartridgeError> {
        let rom = match data.len() {
            IEEE488_ROM_SIZE => data,
            n if n == IEEE488_ROM_SIZE + 2 => &data[2..],
            size => return Err(CartridgeError::BadSize { cartridge: "IEEE-488", size }),
        };
        Ok(Self::with_rom(rom))
    }

    pub fn from_crt(image: &CrtImage) -> Result<Self, CartridgeError> {
        let chip = image.chips.first().ok_or(CartridgeError::NoChips)?;
        match chip.data.len() {
            IEEE488_ROM_SIZE => Ok(Self::with_rom(&chip.data)),
            size => Err(CartridgeError::BadSize { cartridge: "IEEE-488", size }),
        }
    }

    #[must_use]
    pub fn rom_enabled(&self) -> bool {
        self.rom_enabled
    }

    fn with_pins<R>(&mut self, bus: &mut PortBus, f: impl FnOnce(&mut Tpi6525, &mut Pins<'_, '_>) -> R) -> R {
        let mut pins = Pins {
            rom_enabled: &mut self.rom_enabled,
            ext_exrom: self.ext_exrom,
            ext_game: self.ext_game,
            bus,
        };
        f(&mut self.tpi, &mut pins)
    }

    fn take_passthrough(&mut self, pass: ExportLines) {
        self.ext_exrom = pass.exrom;
        self.ext_game = pass.game;
    }
}

impl CartridgeDevice for Ieee488 {
    fn id(&self) -> CartridgeId {
        CartridgeId::Ieee488
    }

    fn config_init(&mut self, bus: &mut PortBus) {
        self.take_passthrough(bus.view().passthrough);
        bus.set_port_exrom(Slot::Zero, true);
        bus.set_port_game(Slot::Zero, self.ext_game);
        bus.port_config_changed(Slot::Zero);
        self.rom_enabled = true;
    }

    fn config_setup(&mut self, bus: &mut PortBus) {
        self.config_init(bus);
    }

    fn reset(&mut self, bus: &mut PortBus) {
        self.with_pins(bus, |tpi, pins| tpi.reset(pins));
        bus.config_changed_slot0(CMODE_8KGAME, CMODE_8KGAME, CMODE_READ);
        self.rom_enabled = true;
    }

    fn passthrough_changed(&mut self, bus: &mut PortBus) {
        self.take_passthrough(bus.view().passthrough);
        bus.set_port_game(Slot::Zero, self.ext_game);
        bus.port_config_changed(Slot::Zero);
    }

    fn roml_read(&mut self, addr: u16, _bus: &mut PortBus) -> ReadResult {
        if self.rom_enabled {
            ReadResult::Valid(self.rom[usize::from(addr & 0x0fff)])
        } else {
            ReadResult::Through
        }
    }

    fn io2_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<u8> {
        Some(self.with_pins(bus, |tpi, pins| tpi.read(addr, pins)))
    }

    fn io2_peek(&self, addr: u16, _view: &PortView) -> Option<u8> {
        Some(self.tpi.peek(addr))
    }

    fn io2_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) {
        self.with_pins(bus, |tpi, pins| tpi.store(addr, value, pins));
    }

    fn peek(&self, addr: u16, _view: &PortView) -> ReadResult {
        if self.rom_enabled && (0x8000..=0x9fff).contains(&addr) {
            ReadResult::Valid(self.rom[usize::from(addr & 0x0fff)])
        } else {
            ReadResult::Through
        }
    }

    fn mmu_translate(&self, addr: u16, _view: &PortView) -> Translation<'_> {
        if !self.rom_enabled {
            return Translation::Through;
        }
        match addr & 0xf000 {
            0x8000 => Translation::Window(MmuWindow::new(&self.rom, 0x8000, 0x8ffd)),
            0x9000 => Translation::Window(MmuWindow::new(&self.rom, 0x9000, 0x9ffd)),
            _ => Translation::Through,
        }
    }

    fn snapshot_name(&self) -> &'static str {
        SNAPSHOT_NAME
    }

    fn write_snapshot(&self) -> SnapshotModule {
        let mut m = SnapshotModule::new(SNAPSHOT_NAME, 1, 0);
        self.tpi.write_snapshot(&mut m);
        m.write_bool(self.rom_enabled);
        m.write_bool(self.ext_exrom);
        m.write_bool(self.ext_game);
        m.write_bytes(&self.rom);
        m
    }

    fn read_snapshot(&mut self, module: &SnapshotModule, _bus: &mut PortBus) -> Result<(), SnapshotError> {
        module.check_version(1, 0, 0)?;
        let mut r = module.reader();
        self.tpi.read_snapshot(&mut r)?;
        self.rom_enabled = r.read_bool()?;
        self.ext_exrom = r.read_bool()?;
        self.ext_game = r.read_bool()?;
        r.read_into(&mut self.rom)?;
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

    fn attached() -> (ExpansionPort, RamHost) {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        let rom: Vec<u8> = (0..IEEE488_ROM_SIZE).map(|n| (n >> 4) as u8).collect();
        port.attach_device(&mut host, Box::new(Ieee488::from_bin(&rom).expect("valid")));
        port.reset(&mut host);
        (port, host)
    }

    #[test]
    fn rom_is_mirrored_at_9000() {
        let (mut port, mut host) = attached();
        assert!(host.export.is_8k());
        assert_eq!(port.roml_read(&mut host, 0x8120), 0x12);
        assert_eq!(port.roml_read(&mut host, 0x9120), 0x12);
        let window = port.mmu_translate(0x9005).expect("valid");
        assert_eq!(window.start, 0x9000);
        assert_eq!(window.read(0x9010), Some(0x01));
    }

    #[test]
    fn port_c_switches_rom_and_exrom() {
        let (mut port, mut host) = attached();
        // All of port C as output, ROM off and EXROM released.
        port.io2_store(&mut host, 0xdf05, 0xff);
        port.io2_store(&mut host, 0xdf02, 0x00);
        assert_eq!(host.export, crate::ExportLines::NONE);
        assert_eq!(port.roml_read(&mut host, 0x8000), 0xFF);

        port.io2_store(&mut host, 0xdf02, 0x18);
        assert!(host.export.is_8k());
        assert_eq!(port.roml_read(&mut host, 0x8010), 0x01);
    }

    #[test]
    fn idle_bus_reads_high() {
        let (mut port, mut host) = attached();
        assert_eq!(port.io2_read(&mut host, 0xdf00), 0xff);
        assert_eq!(port.io2_read(&mut host, 0xdf09), 0xff);
        // Registers are mirrored through $DFFF.
        port.io2_store(&mut host, 0xdf83, 0x3c);
        assert_eq!(port.io2_read(&mut host, 0xdf03), 0x3c);
    }

    #[test]
    fn snapshot_keeps_tpi_state() {
        let (mut port, mut host) = attached();
        port.io2_store(&mut host, 0xdf04, 0x55);
        let snap = port.write_snapshot();
        let (mut other, mut host2) = attached();
        other.read_snapshot(&mut host2, &snap).expect("valid");
        assert_eq!(other.io2_read(&mut host2, 0xdf04), 0x55);
    }
}
