//! Magic Voice speech module.
//!
//! A 16 KiB ROM, a 6525 TPI at $DF80-$DF87 (mirrored through $DFFF) and a
//! gate array that decides, per region, whether the CPU sees the Magic
//! Voice ROM, the cartridge in the pass-through port, or C64 memory. The
//! module keeps the CPU in Ultimax mode permanently and fakes the rest
//! region by region.
//!
//! The speech chip and its FIFO are not emulated: the TPI sees an idle
//! synthesizer (no end-of-speech, FIFO not ready).

use std::any::Any;

use emu_core::{SnapshotError, SnapshotModule};

use crate::device::{CartridgeDevice, CartridgeId, MmuWindow, PortBus, PortView, ReadResult, Translation};
use crate::export::{CMODE_READ, CMODE_ULTIMAX};
use crate::tpi::{Tpi6525, TpiPins};
use crate::{CartridgeError, CrtImage, ExportLines};

pub const MAGIC_VOICE_ROM_SIZE: usize = 0x4000;

const SNAPSHOT_NAME: &str = "CARTMAGICVOICE";

/// Gate array inputs and the mapping they select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct GateArray {
    /// TPI CA.
    pc6: bool,
    pb5: bool,
    pb6: bool,
    /// Driven low by TPI CB.
    exrom: bool,
    ext_exrom: bool,
    ext_game: bool,
    rom_a000: bool,
    rom_e000: bool,
    game_8000: bool,
    game_a000: bool,
    game_e000: bool,
    /// Last level of the TPI interrupt output.
    nmi: bool,
}

impl GateArray {
    fn reset(&mut self) {
        self.pc6 = false;
        self.pb5 = false;
        self.pb6 = false;
    }

    fn select(&self) -> u8 {
        u8::from(self.exrom) << 3 | u8::from(self.pc6) << 2 | u8::from(self.pb5) << 1 | u8::from(self.pb6)
    }

    fn memconfig(&mut self, bus: &mut PortBus) {
        // (rom A000, rom E000, game 8000, game A000, game E000)
        let (rom_a, rom_e, game_8, game_a, game_e) = match self.select() {
            0 => (true, false, true, false, true),
            6 => (false, false, true, true, true),
            7 | 8 | 11 | 15 => (true, true, false, false, false),
            10 | 14 => (false, false, true, true, false),
            _ => (false, false, false, false, false),
        };
        self.rom_a000 = rom_a;
        self.rom_e000 = rom_e;
        self.game_8000 = game_8;
        self.game_a000 = game_a;
        self.game_e000 = game_e;
        bus.config_changed_slot0(CMODE_ULTIMAX, CMODE_ULTIMAX, CMODE_READ);
    }

    fn take_passthrough(&mut self, pass: ExportLines) {
        self.ext_exrom = pass.exrom;
        self.ext_game = pass.game;
    }

    /// The pass-through cartridge is in real Ultimax mode.
    fn game_ultimax(&self) -> bool {
        self.game_e000 && !self.ext_exrom && self.ext_game
    }
}

struct Pins<'a, 'b> {
    ga: &'a mut GateArray,
    bus: &'a mut PortBus<'b>,
}

impl TpiPins for Pins<'_, '_> {
    /// Bit 5 is !GAME of the pass-through port, bit 6 !EOS and bit 7 the
    /// FIFO ready line.
    fn read_pa(&mut self) -> u8 {
        u8::from(!self.ga.ext_game) << 5 | 1 << 6
    }

    fn store_pb(&mut self, value: u8) {
        self.ga.pb5 = value & 0x20 != 0;
        self.ga.pb6 = value & 0x40 != 0;
        self.ga.memconfig(self.bus);
    }

    /// Bit 7 is !EXROM of the pass-through port.
    fn read_pb(&mut self) -> u8 {
        u8::from(!self.ga.ext_exrom) << 7
    }

    fn read_pc(&mut self) -> u8 {
        0
    }

    fn set_ca(&mut self, state: bool) {
        self.ga.pc6 = state;
        self.ga.memconfig(self.bus);
    }

    fn set_cb(&mut self, state: bool) {
        self.ga.exrom = !state;
        self.ga.memconfig(self.bus);
    }

    fn set_int(&mut self, active: bool) {
        if active == self.ga.nmi {
            return;
        }
        self.ga.nmi = active;
        if active {
            self.bus.trigger_freeze_nmi_only();
        } else {
            self.bus.release_freeze();
        }
    }
}

#[derive(Debug, Clone)]
pub struct MagicVoice {
    tpi: Tpi6525,
    ga: GateArray,
    rom: Vec<u8>,
}

impl MagicVoice {
    fn with_rom(rom: Vec<u8>) -> Self {
        Self {
            tpi: Tpi6525::default(),
            ga: GateArray {
                exrom: true,
                ..GateArray::default()
            },
            rom,
        }
    }

    pub fn from_bin(data: &[u8]) -> Result<Self, CartridgeError> {
        let rom = match data.len() {
            MAGIC_VOICE_ROM_SIZE => data,
            n if n == MAGIC_VOICE_ROM_SIZE + 2 => &data[2..],
            size => return Err(CartridgeError::BadSize { cartridge: "Magic Voice", size }),
        };
        Ok(Self::with_rom(rom.to_vec()))
    }

    /// One 16 KiB chip at $8000, or two 8 KiB chips at $8000 and $A000
    /// (older images number them as banks 0 and 1 instead).
    pub fn from_crt(image: &CrtImage) -> Result<Self, CartridgeError> {
        let mut rom = vec![0; MAGIC_VOICE_ROM_SIZE];
        if image.chips.is_empty() {
            return Err(CartridgeError::NoChips);
        }
        for chip in image.chips.iter().take(2) {
            let offset = match (chip.data.len(), chip.load_address) {
                (0x4000, 0x8000) => 0,
                (0x2000, 0x8000 | 0xa000) => {
                    usize::from(chip.load_address & 0x2000) + (usize::from(chip.bank) << 13)
                }
                (size, _) => return Err(CartridgeError::BadSize { cartridge: "Magic Voice", size }),
            };
            let end = offset + chip.data.len();
            if end > MAGIC_VOICE_ROM_SIZE {
                return Err(CartridgeError::BankOutOfRange { bank: chip.bank, banks: 2 });
            }
            rom[offset..end].copy_from_slice(&chip.data);
        }
        Ok(Self::with_rom(rom))
    }

    fn with_pins<R>(&mut self, bus: &mut PortBus, f: impl FnOnce(&mut Tpi6525, &mut Pins<'_, '_>) -> R) -> R {
        let mut pins = Pins { ga: &mut self.ga, bus };
        f(&mut self.tpi, &mut pins)
    }

    fn io2_decoded(addr: u16) -> bool {
        addr & 0xff >= 0x80
    }

    fn a000(&self, addr: u16) -> ReadResult {
        if self.ga.game_a000 {
            ReadResult::ThroughNoUltimax
        } else if self.ga.rom_a000 {
            ReadResult::Valid(self.rom[usize::from(addr & 0x1fff)])
        } else {
            ReadResult::C64Mem
        }
    }

    fn e000(&self, addr: u16) -> ReadResult {
        if self.ga.game_e000 {
            ReadResult::Through
        } else if self.ga.rom_e000 {
            ReadResult::Valid(self.rom[0x2000 + usize::from(addr & 0x1fff)])
        } else {
            ReadResult::C64Mem
        }
    }

    fn vic_read(&self) -> Option<ReadResult> {
        Some(if self.ga.game_ultimax() { ReadResult::Through } else { ReadResult::C64Mem })
    }
}

impl CartridgeDevice for MagicVoice {
    fn id(&self) -> CartridgeId {
        CartridgeId::MagicVoice
    }

    fn config_init(&mut self, bus: &mut PortBus) {
        self.ga.take_passthrough(bus.view().passthrough);
        self.ga.exrom = true;
        self.ga.reset();
        self.ga.memconfig(bus);
    }

    fn config_setup(&mut self, bus: &mut PortBus) {
        self.config_init(bus);
    }

    fn reset(&mut self, bus: &mut PortBus) {
        self.ga.game_8000 = false;
        self.ga.exrom = true;
        self.ga.reset();
        self.with_pins(bus, |tpi, pins| tpi.reset(pins));
        self.ga.memconfig(bus);
    }

    fn passthrough_changed(&mut self, bus: &mut PortBus) {
        self.ga.take_passthrough(bus.view().passthrough);
        self.ga.memconfig(bus);
    }

    fn roml_read(&mut self, _addr: u16, _bus: &mut PortBus) -> ReadResult {
        if self.ga.game_8000 { ReadResult::Through } else { ReadResult::C64Mem }
    }

    fn roml_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        bus.store_without_ultimax(addr, value);
        true
    }

    fn romh_read(&mut self, addr: u16, _bus: &mut PortBus) -> ReadResult {
        self.e000(addr)
    }

    fn romh_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        bus.store_without_ultimax(addr, value);
        true
    }

    fn ultimax_1000_7fff_read(&mut self, _addr: u16, _bus: &mut PortBus) -> ReadResult {
        ReadResult::C64Mem
    }

    fn ultimax_1000_7fff_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        bus.store_without_ultimax(addr, value);
        true
    }

    fn ultimax_a000_bfff_read(&mut self, addr: u16, _bus: &mut PortBus) -> ReadResult {
        self.a000(addr)
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

    fn romh_phi1_read(&mut self, _addr: u16, _bus: &mut PortBus) -> Option<ReadResult> {
        self.vic_read()
    }

    fn romh_phi2_read(&mut self, _addr: u16, _bus: &mut PortBus) -> Option<ReadResult> {
        self.vic_read()
    }

    fn io2_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<u8> {
        if !Self::io2_decoded(addr) {
            return None;
        }
        Some(self.with_pins(bus, |tpi, pins| tpi.read(addr, pins)))
    }

    fn io2_peek(&self, addr: u16, _view: &PortView) -> Option<u8> {
        Self::io2_decoded(addr).then(|| self.tpi.peek(addr))
    }

    fn io2_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) {
        if Self::io2_decoded(addr) {
            self.with_pins(bus, |tpi, pins| tpi.store(addr, value, pins));
        }
    }

    fn peek(&self, addr: u16, _view: &PortView) -> ReadResult {
        match addr {
            0x8000..=0x9fff if self.ga.game_8000 => ReadResult::Through,
            0xa000..=0xbfff => self.a000(addr),
            0xe000..=0xffff => self.e000(addr),
            _ => ReadResult::C64Mem,
        }
    }

    fn mmu_translate(&self, addr: u16, _view: &PortView) -> Translation<'_> {
        let ga = &self.ga;
        match addr >> 12 {
            0xe | 0xf if ga.game_e000 => Translation::Through,
            0xe | 0xf if ga.rom_e000 => Translation::Window(MmuWindow::new(&self.rom[0x2000..], 0xe000, 0xfffd)),
            0xa | 0xb if ga.game_a000 => Translation::Through,
            0xa | 0xb if ga.rom_a000 => Translation::Window(MmuWindow::new(&self.rom[..0x2000], 0xa000, 0xbffd)),
            0x8 | 0x9 if ga.game_8000 => Translation::Through,
            0x0 | 0xc | 0xd => Translation::Through,
            _ => Translation::Decline,
        }
    }

    fn snapshot_name(&self) -> &'static str {
        SNAPSHOT_NAME
    }

    fn write_snapshot(&self) -> SnapshotModule {
        let mut m = SnapshotModule::new(SNAPSHOT_NAME, 0, 0);
        self.tpi.write_snapshot(&mut m);
        m.write_u8(self.ga.select());
        m.write_bool(self.ga.ext_exrom);
        m.write_bool(self.ga.ext_game);
        m.write_bool(self.ga.nmi);
        m.write_bytes(&self.rom);
        m
    }

    fn read_snapshot(&mut self, module: &SnapshotModule, bus: &mut PortBus) -> Result<(), SnapshotError> {
        module.check_version(0, 0, 0)?;
        let mut r = module.reader();
        self.tpi.read_snapshot(&mut r)?;
        let select = r.read_u8()?;
        self.ga.exrom = select & 8 != 0;
        self.ga.pc6 = select & 4 != 0;
        self.ga.pb5 = select & 2 != 0;
        self.ga.pb6 = select & 1 != 0;
        self.ga.ext_exrom = r.read_bool()?;
        self.ga.ext_game = r.read_bool()?;
        self.ga.nmi = r.read_bool()?;
        r.read_into(&mut self.rom)?;
        self.ga.memconfig(bus);
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
    use crate::devices::generic::Generic;
    use crate::{ExpansionPort, RamHost};

    fn rom() -> Vec<u8> {
        let mut rom = vec![0u8; MAGIC_VOICE_ROM_SIZE];
        rom[0x0000] = 0xa0;
        rom[0x2000] = 0xe0;
        rom
    }

    fn attached() -> (ExpansionPort, RamHost) {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        port.attach_device(&mut host, Box::new(MagicVoice::from_bin(&rom()).expect("valid")));
        port.reset(&mut host);
        (port, host)
    }

    #[test]
    fn cpu_always_sees_ultimax() {
        let (_port, host) = attached();
        assert!(host.export.is_ultimax());
    }

    #[test]
    fn reset_maps_rom_at_a000_and_e000() {
        // Select 8: EXROM high, everything else low.
        let (mut port, mut host) = attached();
        assert_eq!(port.ultimax_a000_bfff_read(&mut host, 0xa000), 0xa0);
        assert_eq!(port.romh_read(&mut host, 0xe000), 0xe0);
        host.ram[0x8000] = 0x42;
        assert_eq!(port.roml_read(&mut host, 0x8000), 0x42);
        host.ram[0x4000] = 0x43;
        assert_eq!(port.ultimax_1000_7fff_read(&mut host, 0x4000), 0x43);
    }

    #[test]
    fn stores_land_in_c64_ram() {
        let (mut port, mut host) = attached();
        port.ultimax_1000_7fff_store(&mut host, 0x2000, 0x11);
        port.ultimax_c000_cfff_store(&mut host, 0xc000, 0x22);
        port.romh_store(&mut host, 0xe000, 0x33);
        assert_eq!(host.ram[0x2000], 0x11);
        assert_eq!(host.ram[0xc000], 0x22);
        assert_eq!(host.ram[0xe000], 0x33);
    }

    #[test]
    fn port_b_switches_to_pass_through_cartridge() {
        let (mut port, mut host) = attached();
        let game = Generic::new_8k(&[0x77; 0x2000]).expect("valid");
        port.attach_device(&mut host, Box::new(game));
        assert!(host.export.is_ultimax());

        // DDPB all out, then PB5: select 10, the game at $8000 and $A000.
        port.io2_store(&mut host, 0xdf84, 0xff);
        port.io2_store(&mut host, 0xdf81, 0x20);
        assert_eq!(port.roml_read(&mut host, 0x8000), 0x77);
        // Neither ROM nor game at $E000: the KERNAL side shows through.
        host.ram[0xe000] = 0x55;
        assert_eq!(port.romh_read(&mut host, 0xe000), 0x55);
        assert_eq!(port.mmu_translate(0xe000), None);
    }

    #[test]
    fn tpi_only_decodes_upper_half_of_io2() {
        let (mut port, mut host) = attached();
        port.io2_store(&mut host, 0xdf83, 0x0f);
        assert_eq!(port.io2_read(&mut host, 0xdf83), 0x0f);
        assert_eq!(port.io2_read(&mut host, 0xdf03), 0xFF);
    }

    #[test]
    fn port_a_reports_pass_through_game_line() {
        let (mut port, mut host) = attached();
        assert_eq!(port.io2_read(&mut host, 0xdf80) & 0x60, 0x60);
    }

    #[test]
    fn crt_accepts_split_chips() {
        use crate::crt::tests::{make_chip, make_crt_header};
        let mut data = make_crt_header(49, 0, 1);
        data.extend(make_chip(0, 0x8000, &[0x01; 0x2000]));
        data.extend(make_chip(0, 0xa000, &[0x02; 0x2000]));
        let image = crate::parse_crt(&data).expect("valid");
        let mv = MagicVoice::from_crt(&image).expect("valid");
        assert_eq!(mv.rom[0x1fff], 0x01);
        assert_eq!(mv.rom[0x2000], 0x02);
    }
}
