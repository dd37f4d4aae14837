//! GEO-RAM: a 256 byte window at $DE00 into up to 4 MiB of RAM.
//!
//! The window is selected by two write-only registers, decoded on A0
//! anywhere in $DF80-$DFFF: even addresses ($DFFE) pick the 256 byte page
//! within a 16 KiB block, odd addresses ($DFFF) pick the block.

use std::any::Any;

use emu_core::{SnapshotError, SnapshotModule};

use crate::device::{CartridgeDevice, CartridgeId, PortBus, PortView};
use crate::CartridgeError;

const SNAPSHOT_NAME: &str = "GEORAM";

const BLOCK_SIZE: usize = 0x4000;
const PAGES_PER_BLOCK: u8 = 64;

/// Supported sizes in KiB.
pub const GEORAM_SIZES_KB: [u32; 7] = [64, 128, 256, 512, 1024, 2048, 4096];

#[derive(Debug, Clone)]
pub struct GeoRam {
    size_kb: u32,
    page: u8,
    block: u8,
    ram: Vec<u8>,
}

impl GeoRam {
    pub fn new(size_kb: u32) -> Result<Self, CartridgeError> {
        if !GEORAM_SIZES_KB.contains(&size_kb) {
            return Err(CartridgeError::BadSize { cartridge: "GEO-RAM", size: size_kb as usize * 1024 });
        }
        Ok(Self {
            size_kb,
            page: 0,
            block: 0,
            ram: vec![0; size_kb as usize * 1024],
        })
    }

    /// RAM image; its length picks the size.
    pub fn from_bin(data: &[u8]) -> Result<Self, CartridgeError> {
        let size_kb = u32::try_from(data.len() / 1024).unwrap_or(0);
        if data.len() % 1024 != 0 {
            return Err(CartridgeError::BadSize { cartridge: "GEO-RAM", size: data.len() });
        }
        let mut georam = Self::new(size_kb)?;
        georam.ram.copy_from_slice(data);
        Ok(georam)
    }

    #[must_use]
    pub fn size_kb(&self) -> u32 {
        self.size_kb
    }

    #[must_use]
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    fn blocks(&self) -> usize {
        self.ram.len() / BLOCK_SIZE
    }

    fn window_index(&self, addr: u16) -> usize {
        usize::from(self.block) * BLOCK_SIZE + usize::from(self.page) * 256 + usize::from(addr & 0xff)
    }
}

impl CartridgeDevice for GeoRam {
    fn id(&self) -> CartridgeId {
        CartridgeId::GeoRam
    }

    fn reset(&mut self, _bus: &mut PortBus) {
        self.page = 0;
        self.block = 0;
    }

    fn io1_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<u8> {
        self.io1_peek(addr, bus.view())
    }

    fn io1_peek(&self, addr: u16, _view: &PortView) -> Option<u8> {
        Some(self.ram[self.window_index(addr)])
    }

    fn io1_store(&mut self, addr: u16, value: u8, _bus: &mut PortBus) {
        let n = self.window_index(addr);
        self.ram[n] = value;
    }

    /// Registers are write-only; the monitor still gets to see them.
    fn io2_peek(&self, addr: u16, _view: &PortView) -> Option<u8> {
        match addr {
            0xdffe => Some(self.page),
            0xdfff => Some(self.block),
            _ => None,
        }
    }

    fn io2_store(&mut self, addr: u16, value: u8, _bus: &mut PortBus) {
        if addr & 0xff < 0x80 {
            return;
        }
        if addr & 1 == 1 {
            // Sizes are powers of two, so unfitted block bits wrap.
            self.block = (usize::from(value) % self.blocks()) as u8;
        } else {
            self.page = value % PAGES_PER_BLOCK;
        }
    }

    fn snapshot_name(&self) -> &'static str {
        SNAPSHOT_NAME
    }

    fn write_snapshot(&self) -> SnapshotModule {
        let mut m = SnapshotModule::new(SNAPSHOT_NAME, 0, 0);
        m.write_u32(self.size_kb);
        m.write_u8(self.page);
        m.write_u8(self.block);
        m.write_bytes(&self.ram);
        m
    }

    fn read_snapshot(&mut self, module: &SnapshotModule, _bus: &mut PortBus) -> Result<(), SnapshotError> {
        module.check_version(0, 0, 0)?;
        let mut r = module.reader();
        let size_kb = r.read_u32()?;
        let mut georam = Self::new(size_kb).map_err(|_| module.invalid(format!("size {size_kb} KiB")))?;
        georam.page = r.read_u8()?;
        georam.block = r.read_u8()?;
        if georam.page >= PAGES_PER_BLOCK || usize::from(georam.block) >= georam.blocks() {
            return Err(module.invalid("page register out of range"));
        }
        r.read_into(&mut georam.ram)?;
        *self = georam;
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

    fn attached(size_kb: u32) -> (ExpansionPort, RamHost) {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        port.attach_device(&mut host, Box::new(GeoRam::new(size_kb).expect("valid")));
        (port, host)
    }

    #[test]
    fn window_follows_page_and_block() {
        let (mut port, mut host) = attached(512);
        port.io2_store(&mut host, 0xdffe, 3);
        port.io2_store(&mut host, 0xdfff, 2);
        port.io1_store(&mut host, 0xde10, 0xa5);
        assert_eq!(port.device::<GeoRam>().expect("valid").ram()[2 * 0x4000 + 3 * 256 + 0x10], 0xa5);

        port.io2_store(&mut host, 0xdffe, 0);
        assert_eq!(port.io1_read(&mut host, 0xde10), 0);
        port.io2_store(&mut host, 0xdffe, 3);
        assert_eq!(port.io1_read(&mut host, 0xde10), 0xa5);
    }

    #[test]
    fn registers_wrap_to_the_fitted_size() {
        let (mut port, mut host) = attached(64);
        port.io2_store(&mut host, 0xdfff, 5);
        port.io2_store(&mut host, 0xdffe, 70);
        assert_eq!(port.io2_peek(0xdfff), 1);
        assert_eq!(port.io2_peek(0xdffe), 6);
        // Mirrored down to $DF80.
        port.io2_store(&mut host, 0xdf81, 2);
        assert_eq!(port.io2_peek(0xdfff), 2);
    }

    #[test]
    fn registers_read_as_open_bus() {
        let (mut port, mut host) = attached(64);
        host.bus_value = 0x3c;
        port.io2_store(&mut host, 0xdfff, 1);
        assert_eq!(port.io2_read(&mut host, 0xdfff), 0x3c);
    }

    #[test]
    fn reset_selects_the_first_page() {
        let (mut port, mut host) = attached(128);
        port.io2_store(&mut host, 0xdfff, 7);
        port.reset(&mut host);
        assert_eq!(port.io2_peek(0xdfff), 0);
    }

    #[test]
    fn snapshot_round_trip() {
        let (mut port, mut host) = attached(256);
        port.io2_store(&mut host, 0xdfff, 9);
        port.io1_store(&mut host, 0xde00, 0x42);
        let snap = port.write_snapshot();

        let (mut other, mut host2) = attached(64);
        other.read_snapshot(&mut host2, &snap).expect("valid");
        assert_eq!(other.device::<GeoRam>().expect("valid").size_kb(), 256);
        assert_eq!(other.io1_read(&mut host2, 0xde00), 0x42);
    }

    #[test]
    fn bin_length_picks_the_size() {
        assert_eq!(GeoRam::from_bin(&vec![0; 0x80000]).expect("valid").size_kb(), 512);
        assert!(GeoRam::from_bin(&[0; 3000]).is_err());
        assert!(GeoRam::new(96).is_err());
    }
}
