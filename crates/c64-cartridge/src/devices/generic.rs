//! Plain ROM cartridges: 8K game at $8000, 16K game at $8000-$BFFF, and
//! Ultimax with ROMH at $E000 (plus an optional ROML).

use std::any::Any;

use emu_core::{SnapshotError, SnapshotModule};

use crate::device::{CartridgeDevice, CartridgeId, MmuWindow, PortBus, PortView, ReadResult, Translation};
use crate::export::{CMODE_16KGAME, CMODE_8KGAME, CMODE_READ, CMODE_ULTIMAX};
use crate::{CartridgeError, CrtImage};

const SNAPSHOT_NAME: &str = "CARTGENERIC";

const BANK_SIZE: usize = 0x2000;

#[derive(Debug, Clone)]
pub struct Generic {
    id: CartridgeId,
    roml: Vec<u8>,
    romh: Vec<u8>,
}

/// Strip the two byte load address some dumps carry.
fn strip_load_address(data: &[u8]) -> &[u8] {
    if data.len() & 0xfff == 2 { &data[2..] } else { data }
}

fn mode_of(id: CartridgeId) -> u8 {
    match id {
        CartridgeId::Generic16k => CMODE_16KGAME,
        CartridgeId::Ultimax => CMODE_ULTIMAX,
        _ => CMODE_8KGAME,
    }
}

impl Generic {
    fn empty(id: CartridgeId) -> Self {
        Self {
            id,
            roml: vec![0; BANK_SIZE],
            romh: vec![0; BANK_SIZE],
        }
    }

    /// 8 KiB at $8000; a 4 KiB ROM is mirrored at $9000.
    pub fn new_8k(data: &[u8]) -> Result<Self, CartridgeError> {
        let data = strip_load_address(data);
        let mut cart = Self::empty(CartridgeId::Generic8k);
        match data.len() {
            0x2000 => cart.roml.copy_from_slice(data),
            0x1000 => {
                cart.roml[..0x1000].copy_from_slice(data);
                cart.roml[0x1000..].copy_from_slice(data);
            }
            size => return Err(CartridgeError::BadSize { cartridge: "8KiB cartridge", size }),
        }
        Ok(cart)
    }

    /// ROML followed by ROMH; a 12 KiB image leaves the end of ROMH empty.
    pub fn new_16k(data: &[u8]) -> Result<Self, CartridgeError> {
        let data = strip_load_address(data);
        let mut cart = Self::empty(CartridgeId::Generic16k);
        match data.len() {
            0x3000 | 0x4000 => {
                cart.roml.copy_from_slice(&data[..BANK_SIZE]);
                cart.romh[..data.len() - BANK_SIZE].copy_from_slice(&data[BANK_SIZE..]);
            }
            size => return Err(CartridgeError::BadSize { cartridge: "16KiB cartridge", size }),
        }
        Ok(cart)
    }

    /// 4 KiB at $F000 (mirrored at $E000), 8 KiB at $E000, or 16 KiB
    /// split between $8000 and $E000.
    pub fn new_ultimax(data: &[u8]) -> Result<Self, CartridgeError> {
        let data = strip_load_address(data);
        let mut cart = Self::empty(CartridgeId::Ultimax);
        match data.len() {
            0x1000 => {
                cart.romh[..0x1000].copy_from_slice(data);
                cart.romh[0x1000..].copy_from_slice(data);
            }
            0x2000 => cart.romh.copy_from_slice(data),
            0x4000 => {
                cart.roml.copy_from_slice(&data[..BANK_SIZE]);
                cart.romh.copy_from_slice(&data[BANK_SIZE..]);
            }
            size => return Err(CartridgeError::BadSize { cartridge: "Ultimax cartridge", size }),
        }
        Ok(cart)
    }

    /// Chips are placed by load address; the header lines pick the mode.
    pub fn from_crt(image: &CrtImage) -> Result<Self, CartridgeError> {
        let id = image.cartridge_id()?;
        let mut cart = Self::empty(id);
        for chip in &image.chips {
            let size = chip.data.len();
            if chip.bank != 0 {
                return Err(CartridgeError::BankOutOfRange { bank: chip.bank, banks: 1 });
            }
            match (chip.load_address, size) {
                (0x8000, 0x4000) => {
                    cart.roml.copy_from_slice(&chip.data[..BANK_SIZE]);
                    cart.romh.copy_from_slice(&chip.data[BANK_SIZE..]);
                }
                (0x8000 | 0xa000 | 0xe000, 0x2000) => {
                    let rom = if chip.load_address == 0x8000 { &mut cart.roml } else { &mut cart.romh };
                    rom.copy_from_slice(&chip.data);
                }
                (0x8000 | 0x9000 | 0xe000 | 0xf000, 0x1000) => {
                    let rom = if chip.load_address < 0xa000 { &mut cart.roml } else { &mut cart.romh };
                    rom[..0x1000].copy_from_slice(&chip.data);
                    rom[0x1000..].copy_from_slice(&chip.data);
                }
                _ => return Err(CartridgeError::BadSize { cartridge: "generic cartridge", size }),
            }
        }
        Ok(cart)
    }

    fn mode(&self) -> u8 {
        mode_of(self.id)
    }

    fn roml_at(&self, addr: u16) -> u8 {
        self.roml[usize::from(addr) & (BANK_SIZE - 1)]
    }

    fn romh_at(&self, addr: u16) -> u8 {
        self.romh[usize::from(addr) & (BANK_SIZE - 1)]
    }
}

impl CartridgeDevice for Generic {
    fn id(&self) -> CartridgeId {
        self.id
    }

    fn config_init(&mut self, bus: &mut PortBus) {
        let mode = self.mode();
        bus.config_changed_slotmain(mode, mode, CMODE_READ);
    }

    fn config_setup(&mut self, bus: &mut PortBus) {
        self.config_init(bus);
    }

    fn roml_read(&mut self, addr: u16, _bus: &mut PortBus) -> ReadResult {
        ReadResult::Valid(self.roml_at(addr))
    }

    fn romh_read(&mut self, addr: u16, _bus: &mut PortBus) -> ReadResult {
        ReadResult::Valid(self.romh_at(addr))
    }

    fn romh_phi1_read(&mut self, addr: u16, _bus: &mut PortBus) -> Option<ReadResult> {
        Some(if self.id == CartridgeId::Ultimax {
            ReadResult::Valid(self.romh_at(addr))
        } else {
            ReadResult::C64Mem
        })
    }

    fn romh_phi2_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<ReadResult> {
        self.romh_phi1_read(addr, bus)
    }

    fn peek(&self, addr: u16, view: &PortView) -> ReadResult {
        let export = view.main;
        match addr {
            0x8000..=0x9fff if export.exrom || export.is_ultimax() => ReadResult::Valid(self.roml_at(addr)),
            0xa000..=0xbfff if export.is_16k() => ReadResult::Valid(self.romh_at(addr)),
            0xe000..=0xffff if export.is_ultimax() => ReadResult::Valid(self.romh_at(addr)),
            _ => ReadResult::Through,
        }
    }

    fn mmu_translate(&self, addr: u16, view: &PortView) -> Translation<'_> {
        let export = view.main;
        match addr {
            0x8000..=0x9fff if export.exrom || export.is_ultimax() => {
                Translation::Window(MmuWindow::new(&self.roml, 0x8000, 0x9ffd))
            }
            0xa000..=0xbfff if export.is_16k() => Translation::Window(MmuWindow::new(&self.romh, 0xa000, 0xbffd)),
            0xe000..=0xffff if export.is_ultimax() => {
                Translation::Window(MmuWindow::new(&self.romh, 0xe000, 0xfffd))
            }
            _ => Translation::Through,
        }
    }

    fn snapshot_name(&self) -> &'static str {
        SNAPSHOT_NAME
    }

    fn write_snapshot(&self) -> SnapshotModule {
        let mut m = SnapshotModule::new(SNAPSHOT_NAME, 0, 0);
        m.write_u8(self.mode());
        m.write_bytes(&self.roml);
        m.write_bytes(&self.romh);
        m
    }

    fn read_snapshot(&mut self, module: &SnapshotModule, _bus: &mut PortBus) -> Result<(), SnapshotError> {
        module.check_version(0, 0, 0)?;
        let mut r = module.reader();
        self.id = match r.read_u8()? {
            CMODE_8KGAME => CartridgeId::Generic8k,
            CMODE_16KGAME => CartridgeId::Generic16k,
            CMODE_ULTIMAX => CartridgeId::Ultimax,
            mode => return Err(module.invalid(format!("mode {mode}"))),
        };
        r.read_into(&mut self.roml)?;
        r.read_into(&mut self.romh)?;
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

    fn attached(cart: Generic) -> (ExpansionPort, RamHost) {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        port.attach_device(&mut host, Box::new(cart));
        (port, host)
    }

    fn counting(len: usize) -> Vec<u8> {
        (0..len).map(|n| (n >> 8) as u8).collect()
    }

    #[test]
    fn eight_k_maps_roml_only() {
        let (mut port, mut host) = attached(Generic::new_8k(&counting(0x2000)).expect("valid"));
        assert!(host.export.is_8k());
        assert_eq!(port.roml_read(&mut host, 0x9f00), 0x1f);
        assert!(port.mmu_translate(0xa000).is_none());
        assert_eq!(port.mmu_translate(0x8100).expect("valid").read(0x8100), Some(0x01));
    }

    #[test]
    fn sixteen_k_maps_both_halves() {
        let (mut port, mut host) = attached(Generic::new_16k(&counting(0x4000)).expect("valid"));
        assert!(host.export.is_16k());
        assert_eq!(port.roml_read(&mut host, 0x8200), 0x02);
        assert_eq!(port.romh_read(&mut host, 0xa200), 0x22);
        assert_eq!(port.peek(0xbf00), Some(0x3f));
    }

    #[test]
    fn ultimax_4k_is_mirrored_and_seen_by_the_vic() {
        let (mut port, mut host) = attached(Generic::new_ultimax(&counting(0x1000)).expect("valid"));
        assert!(host.export.is_ultimax());
        assert_eq!(port.romh_read(&mut host, 0xe300), 0x03);
        assert_eq!(port.romh_read(&mut host, 0xf300), 0x03);
        let vic = port.romh_phi1_ptr(&mut host, 0x3300).expect("valid");
        assert_eq!(vic[0], 0x03);
    }

    #[test]
    fn eight_k_is_invisible_to_the_vic() {
        let (mut port, mut host) = attached(Generic::new_8k(&counting(0x2000)).expect("valid"));
        assert!(port.romh_phi1_ptr(&mut host, 0x1000).is_none());
    }

    #[test]
    fn load_address_is_skipped() {
        let mut data = vec![0x00, 0x80];
        data.extend(counting(0x2000));
        let cart = Generic::new_8k(&data).expect("valid");
        assert_eq!(cart.roml[0x100], 0x01);
        assert!(Generic::new_8k(&[0; 0x1800]).is_err());
    }

    #[test]
    fn crt_chips_land_by_load_address() {
        let mut crt = make_crt_header(0, 0, 0);
        crt.extend(make_chip(0, 0x8000, &[0x11; 0x2000]));
        crt.extend(make_chip(0, 0xa000, &[0x22; 0x2000]));
        let image = parse_crt(&crt).expect("valid");
        let cart = Generic::from_crt(&image).expect("valid");
        assert_eq!(cart.id(), CartridgeId::Generic16k);
        assert_eq!(cart.romh[0], 0x22);

        let mut crt = make_crt_header(0, 1, 0);
        crt.extend(make_chip(0, 0xf000, &[0x33; 0x1000]));
        let cart = Generic::from_crt(&parse_crt(&crt).expect("valid")).expect("valid");
        assert_eq!(cart.id(), CartridgeId::Ultimax);
        assert_eq!(cart.romh[0], 0x33);

        let mut crt = make_crt_header(0, 0, 1);
        crt.extend(make_chip(1, 0x8000, &[0; 0x2000]));
        assert!(Generic::from_crt(&parse_crt(&crt).expect("valid")).is_err());
    }

    #[test]
    fn snapshot_restores_mode() {
        let (port, _) = attached(Generic::new_ultimax(&counting(0x2000)).expect("valid"));
        let snap = port.write_snapshot();
        let (mut other, mut host2) = attached(Generic::new_8k(&[0; 0x2000]).expect("valid"));
        other.read_snapshot(&mut host2, &snap).expect("valid");
        assert!(host2.export.is_ultimax());
        assert_eq!(other.romh_read(&mut host2, 0xe500), 0x05);
    }
}
