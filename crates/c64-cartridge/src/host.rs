//! What the expansion port needs from the machine around it.

use crate::ExportLines;

/// Memory, interrupt and clock services of the host machine.
///
/// The `*_without_ultimax` and `*_without_romlh` accesses resolve against
/// the plain C64 map (RAM, BASIC/KERNAL ROM, I/O) and must not call back
/// into the expansion port.
pub trait Host {
    fn ram_read(&mut self, addr: u16) -> u8;
    fn ram_store(&mut self, addr: u16, value: u8);
    /// Read through the memory map as if GAME/EXROM were inactive.
    fn read_without_ultimax(&mut self, addr: u16) -> u8;
    fn store_without_ultimax(&mut self, addr: u16, value: u8);
    /// Store that skips ROML/ROMH decoding (RAM under the cartridge).
    fn store_without_romlh(&mut self, addr: u16, value: u8);
    /// Last byte the VIC-II fetched; what the CPU sees on an open bus.
    fn vicii_read_phi1(&mut self) -> u8;
    /// Chip I/O at $D000-$DFFF.
    fn read_bank_io(&mut self, addr: u16) -> u8;
    fn store_bank_io(&mut self, addr: u16, value: u8);

    /// The export lines seen by the CPU changed.
    fn pla_config_changed(&mut self, _export: &ExportLines) {}
    /// Cached page pointers of the host memory map must be refreshed.
    fn update_memory_ptrs(&mut self) {}
    fn set_nmi(&mut self, _active: bool) {}
    fn set_irq(&mut self, _active: bool) {}
    /// Current CPU clock.
    fn clock(&self) -> u64;

    /// Bus access by a DMA device while the CPU is halted.
    fn dma_read(&mut self, addr: u16) -> u8 {
        self.ram_read(addr)
    }

    fn dma_store(&mut self, addr: u16, value: u8) {
        self.ram_store(addr, value);
    }
}

/// A host with 64 KiB of flat RAM and no ROM or I/O chips. Useful for
/// driving the port outside a full machine.
#[derive(Debug, Clone)]
pub struct RamHost {
    pub ram: Vec<u8>,
    /// Value returned for open-bus reads.
    pub bus_value: u8,
    pub clock: u64,
    pub nmi: bool,
    pub irq: bool,
    /// Lines reported by the last `pla_config_changed`.
    pub export: ExportLines,
    pub pla_changes: u32,
}

impl RamHost {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ram: vec![0; 0x10000],
            bus_value: 0xFF,
            clock: 0,
            nmi: false,
            irq: false,
            export: ExportLines::NONE,
            pla_changes: 0,
        }
    }
}

impl Default for RamHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for RamHost {
    fn ram_read(&mut self, addr: u16) -> u8 {
        self.ram[usize::from(addr)]
    }

    fn ram_store(&mut self, addr: u16, value: u8) {
        self.ram[usize::from(addr)] = value;
    }

    fn read_without_ultimax(&mut self, addr: u16) -> u8 {
        self.ram[usize::from(addr)]
    }

    fn store_without_ultimax(&mut self, addr: u16, value: u8) {
        self.ram[usize::from(addr)] = value;
    }

    fn store_without_romlh(&mut self, addr: u16, value: u8) {
        self.ram[usize::from(addr)] = value;
    }

    fn vicii_read_phi1(&mut self) -> u8 {
        self.bus_value
    }

    fn read_bank_io(&mut self, addr: u16) -> u8 {
        self.ram[usize::from(addr)]
    }

    fn store_bank_io(&mut self, addr: u16, value: u8) {
        self.ram[usize::from(addr)] = value;
    }

    fn pla_config_changed(&mut self, export: &ExportLines) {
        self.export = *export;
        self.pla_changes += 1;
    }

    fn set_nmi(&mut self, active: bool) {
        self.nmi = active;
    }

    fn set_irq(&mut self, active: bool) {
        self.irq = active;
    }

    fn clock(&self) -> u64 {
        self.clock
    }
}
