//! The interface every cartridge implements, and the handle through which
//! it talks back to the port.

use std::any::Any;

use emu_core::{SnapshotError, SnapshotModule};

use crate::{ExportLines, Host};

/// Position of a device in the expansion chain, nearest the CPU first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Slot {
    /// Pass-through cartridges that sit directly on the CPU's port.
    Zero,
    /// Pass-through cartridges with their own expansion port.
    One,
    /// Devices that only decode $DE00-$DFFF.
    Io,
    /// The cartridge at the end of the chain.
    Main,
}

/// Cartridge types, with the numeric codes used by CRT files and
/// snapshots. Negative codes are types without a CRT hardware id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CartridgeId {
    None,
    /// A CRT file; resolved to the type in its header on attach.
    Crt,
    Generic8k,
    Generic16k,
    Ultimax,
    Expert,
    RetroReplay,
    Mmc64,
    Ieee488,
    MagicVoice,
    Dqbb,
    GeoRam,
    Isepic,
    RamCart,
    Reu,
}

impl CartridgeId {
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::None => -1,
            Self::Crt => 0,
            Self::Generic8k => -3,
            Self::Generic16k => -2,
            Self::Ultimax => -6,
            Self::Expert => 6,
            Self::RetroReplay => 36,
            Self::Mmc64 => 37,
            Self::Ieee488 => 41,
            Self::MagicVoice => 49,
            Self::Dqbb => -101,
            Self::GeoRam => -102,
            Self::Isepic => -103,
            Self::RamCart => -104,
            Self::Reu => -105,
        }
    }

    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => Self::None,
            0 => Self::Crt,
            -3 => Self::Generic8k,
            -2 => Self::Generic16k,
            -6 => Self::Ultimax,
            6 => Self::Expert,
            36 => Self::RetroReplay,
            37 => Self::Mmc64,
            41 => Self::Ieee488,
            49 => Self::MagicVoice,
            -101 => Self::Dqbb,
            -102 => Self::GeoRam,
            -103 => Self::Isepic,
            -104 => Self::RamCart,
            -105 => Self::Reu,
            _ => return None,
        })
    }

    /// Where the type plugs in; `None` for the pseudo types.
    #[must_use]
    pub fn slot(self) -> Option<Slot> {
        match self {
            Self::None | Self::Crt => None,
            Self::Mmc64 | Self::Ieee488 | Self::MagicVoice => Some(Slot::Zero),
            Self::Expert | Self::Dqbb | Self::Isepic | Self::RamCart => Some(Slot::One),
            Self::GeoRam | Self::Reu => Some(Slot::Io),
            Self::Generic8k | Self::Generic16k | Self::Ultimax | Self::RetroReplay => {
                Some(Slot::Main)
            }
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Crt => "CRT",
            Self::Generic8k => "Generic 8KiB",
            Self::Generic16k => "Generic 16KiB",
            Self::Ultimax => "Ultimax",
            Self::Expert => "Expert Cartridge",
            Self::RetroReplay => "Retro Replay",
            Self::Mmc64 => "MMC64",
            Self::Ieee488 => "IEEE-488 Interface",
            Self::MagicVoice => "Magic Voice",
            Self::Dqbb => "Double Quick Brown Box",
            Self::GeoRam => "GEO-RAM",
            Self::Isepic => "ISEPIC",
            Self::RamCart => "RamCart",
            Self::Reu => "RAM Expansion Module",
        }
    }
}

/// Outcome of a device read hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    /// The device drove the bus.
    Valid(u8),
    /// The device maps plain C64 memory here ("fake Ultimax").
    C64Mem,
    /// Not handled; ask the next slot.
    Through,
    /// Not handled; the next slot must not apply Ultimax mapping.
    ThroughNoUltimax,
}

/// A span of cartridge memory the CPU may read directly: `data[addr -
/// start]` for `start <= addr <= limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmuWindow<'a> {
    pub data: &'a [u8],
    pub start: u16,
    pub limit: u16,
}

impl<'a> MmuWindow<'a> {
    /// Window over `data` mapped at `start`, ending at `limit` or the end
    /// of `data`, whichever comes first.
    #[must_use]
    pub fn new(data: &'a [u8], start: u16, limit: u16) -> Self {
        let end = usize::from(start) + data.len().saturating_sub(1);
        let limit = limit.min(u16::try_from(end).unwrap_or(u16::MAX));
        Self { data, start, limit }
    }

    #[must_use]
    pub fn read(&self, addr: u16) -> Option<u8> {
        if addr < self.start || addr > self.limit {
            return None;
        }
        self.data.get(usize::from(addr - self.start)).copied()
    }
}

/// Outcome of a device's fast-path translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation<'a> {
    Window(MmuWindow<'a>),
    /// Reads here have side effects or hit C64 memory: no fast path.
    Decline,
    /// Not mapped by this device.
    Through,
}

/// Port state a device may look at while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortView {
    /// Lines as seen by the CPU.
    pub export: ExportLines,
    pub slot1: ExportLines,
    pub main: ExportLines,
    /// What slot 1 and the main slot present to slot 0.
    pub passthrough: ExportLines,
    pub roml_bank: u32,
    pub romh_bank: u32,
    /// Main slot maps its RAM at ROML.
    pub export_ram: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Line {
    Game,
    Exrom,
}

/// Work a device asked the port to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Request {
    Config { slot: Slot, phi1: u8, phi2: u8, flags: u8 },
    SetLine { slot: Slot, line: Line, asserted: bool },
    /// Re-run PLA and memptr updates after `SetLine`s.
    PortChanged(Slot),
    MainBanks { roml: u32, romh: u32 },
    TriggerFreeze,
    TriggerFreezeNmiOnly,
    ReleaseFreeze,
}

/// Handle passed to device hooks. Host services are used directly;
/// mapping changes are queued and applied by the port once the hook
/// returns, in the order they were made.
pub struct PortBus<'a> {
    host: &'a mut dyn Host,
    view: PortView,
    requests: Vec<Request>,
}

impl<'a> PortBus<'a> {
    pub(crate) fn new(host: &'a mut dyn Host, view: PortView) -> Self {
        Self {
            host,
            view,
            requests: Vec::new(),
        }
    }

    pub(crate) fn into_requests(self) -> Vec<Request> {
        self.requests
    }

    #[must_use]
    pub fn view(&self) -> &PortView {
        &self.view
    }

    pub fn ram_read(&mut self, addr: u16) -> u8 {
        self.host.ram_read(addr)
    }

    pub fn ram_store(&mut self, addr: u16, value: u8) {
        self.host.ram_store(addr, value);
    }

    pub fn read_without_ultimax(&mut self, addr: u16) -> u8 {
        self.host.read_without_ultimax(addr)
    }

    pub fn store_without_ultimax(&mut self, addr: u16, value: u8) {
        self.host.store_without_ultimax(addr, value);
    }

    pub fn vicii_read_phi1(&mut self) -> u8 {
        self.host.vicii_read_phi1()
    }

    pub fn dma_read(&mut self, addr: u16) -> u8 {
        self.host.dma_read(addr)
    }

    pub fn dma_store(&mut self, addr: u16, value: u8) {
        self.host.dma_store(addr, value);
    }

    pub fn set_irq(&mut self, active: bool) {
        self.host.set_irq(active);
    }

    #[must_use]
    pub fn clock(&self) -> u64 {
        self.host.clock()
    }

    /// Switch the CPU lines directly (slot 0 devices).
    pub fn config_changed_slot0(&mut self, mode_phi1: u8, mode_phi2: u8, flags: u8) {
        self.request(Request::Config { slot: Slot::Zero, phi1: mode_phi1, phi2: mode_phi2, flags });
    }

    pub fn config_changed_slot1(&mut self, mode_phi1: u8, mode_phi2: u8, flags: u8) {
        self.request(Request::Config { slot: Slot::One, phi1: mode_phi1, phi2: mode_phi2, flags });
    }

    /// Switch the main slot lines; bits 2-7 of `mode_phi2` select the
    /// ROML/ROMH bank and `CMODE_EXPORT_RAM` maps cartridge RAM at ROML.
    pub fn config_changed_slotmain(&mut self, mode_phi1: u8, mode_phi2: u8, flags: u8) {
        self.request(Request::Config { slot: Slot::Main, phi1: mode_phi1, phi2: mode_phi2, flags });
    }

    pub fn set_port_game(&mut self, slot: Slot, asserted: bool) {
        self.request(Request::SetLine { slot, line: Line::Game, asserted });
    }

    pub fn set_port_exrom(&mut self, slot: Slot, asserted: bool) {
        self.request(Request::SetLine { slot, line: Line::Exrom, asserted });
    }

    pub fn port_config_changed(&mut self, slot: Slot) {
        self.request(Request::PortChanged(slot));
    }

    /// Select main slot banks without touching the lines.
    pub fn set_main_banks(&mut self, roml: u32, romh: u32) {
        self.request(Request::MainBanks { roml, romh });
    }

    /// Press the freeze button: the NMI follows within a frame.
    pub fn trigger_freeze(&mut self) {
        self.request(Request::TriggerFreeze);
    }

    pub fn trigger_freeze_nmi_only(&mut self) {
        self.request(Request::TriggerFreezeNmiOnly);
    }

    pub fn release_freeze(&mut self) {
        self.request(Request::ReleaseFreeze);
    }

    fn request(&mut self, request: Request) {
        // Later hooks in the same call see the bank they asked for.
        if let Request::MainBanks { roml, romh } = request {
            self.view.roml_bank = roml;
            self.view.romh_bank = romh;
        }
        self.requests.push(request);
    }
}

/// A cartridge plugged into one slot of the expansion port.
///
/// Every hook has a default that leaves the access to the next slot, so
/// a device only implements what its hardware decodes. Read hooks return
/// a [`ReadResult`]; store hooks return `true` when the device claimed
/// the write (whether that ends the chain depends on the region).
#[allow(unused_variables)]
pub trait CartridgeDevice {
    fn id(&self) -> CartridgeId;

    /// Power-up mapping.
    fn config_init(&mut self, bus: &mut PortBus) {}
    /// Mapping right after attach.
    fn config_setup(&mut self, bus: &mut PortBus) {}
    fn reset(&mut self, bus: &mut PortBus) {}
    /// Called before the device is dropped. Must be idempotent.
    fn detach(&mut self) {}

    fn freeze(&mut self, bus: &mut PortBus) {}
    fn freeze_allowed(&self) -> bool {
        false
    }

    /// The CPU took an NMI.
    fn nmi_ack(&mut self, bus: &mut PortBus) {}

    /// Slot 0 only: the lines from further down the chain changed.
    fn passthrough_changed(&mut self, bus: &mut PortBus) {}

    fn roml_read(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        ReadResult::Through
    }
    fn roml_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        false
    }
    fn romh_read(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        ReadResult::Through
    }
    fn romh_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        false
    }
    /// Write to ROML in 8K/16K mode.
    fn roml_no_ultimax_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        false
    }
    /// Write to ROMH in 16K mode.
    fn romh_no_ultimax_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        false
    }
    /// Write to RAM at $8000-$9FFF while ROML is not selected.
    fn raml_no_ultimax_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        false
    }
    /// $E000-$FFFF in Ultimax mode.
    fn ultimax_romh_read_hirom(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        self.romh_read(addr, bus)
    }

    fn ultimax_1000_7fff_read(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        ReadResult::Through
    }
    fn ultimax_1000_7fff_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        false
    }
    fn ultimax_a000_bfff_read(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        ReadResult::Through
    }
    fn ultimax_a000_bfff_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        false
    }
    fn ultimax_c000_cfff_read(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        ReadResult::Through
    }
    fn ultimax_c000_cfff_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        false
    }
    fn ultimax_d000_dfff_read(&mut self, addr: u16, bus: &mut PortBus) -> ReadResult {
        ReadResult::Through
    }
    fn ultimax_d000_dfff_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) -> bool {
        false
    }

    /// VIC fetches from $E000-$FFFF (mirrored to $1000-$1FFF etc.) in
    /// Ultimax mode. `None` means the device has no VIC-specific mapping.
    fn romh_phi1_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<ReadResult> {
        None
    }
    fn romh_phi2_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<ReadResult> {
        None
    }

    /// $DE00-$DEFF. `None` when the device does not drive the bus.
    fn io1_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<u8> {
        None
    }
    /// Side-effect free `io1_read`.
    fn io1_peek(&self, addr: u16, view: &PortView) -> Option<u8> {
        None
    }
    fn io1_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) {}
    /// $DF00-$DFFF.
    fn io2_read(&mut self, addr: u16, bus: &mut PortBus) -> Option<u8> {
        None
    }
    fn io2_peek(&self, addr: u16, view: &PortView) -> Option<u8> {
        None
    }
    fn io2_store(&mut self, addr: u16, value: u8, bus: &mut PortBus) {}
    /// The CPU wrote to $FF00.
    fn ff00_store(&mut self, bus: &mut PortBus) {}

    /// Side-effect free read of cartridge memory for monitors.
    fn peek(&self, addr: u16, view: &PortView) -> ReadResult {
        ReadResult::Through
    }
    fn mmu_translate(&self, addr: u16, view: &PortView) -> Translation<'_> {
        Translation::Through
    }

    /// Name of the device's own snapshot module.
    fn snapshot_name(&self) -> &'static str;
    fn write_snapshot(&self) -> SnapshotModule;
    fn read_snapshot(&mut self, module: &SnapshotModule, bus: &mut PortBus) -> Result<(), SnapshotError>;

    /// For front ends that need the concrete type (switches, RAM dumps).
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_and_slots_are_fixed() {
        let all = [
            CartridgeId::None,
            CartridgeId::Crt,
            CartridgeId::Generic8k,
            CartridgeId::Generic16k,
            CartridgeId::Ultimax,
            CartridgeId::Expert,
            CartridgeId::RetroReplay,
            CartridgeId::Mmc64,
            CartridgeId::Ieee488,
            CartridgeId::MagicVoice,
            CartridgeId::Dqbb,
            CartridgeId::GeoRam,
            CartridgeId::Isepic,
            CartridgeId::RamCart,
            CartridgeId::Reu,
        ];
        for id in all {
            assert_eq!(CartridgeId::from_code(id.code()), Some(id));
        }
        assert_eq!(CartridgeId::from_code(12345), None);
        assert_eq!(CartridgeId::Isepic.slot(), Some(Slot::One));
        assert_eq!(CartridgeId::MagicVoice.slot(), Some(Slot::Zero));
        assert_eq!(CartridgeId::Reu.slot(), Some(Slot::Io));
        assert_eq!(CartridgeId::RetroReplay.slot(), Some(Slot::Main));
        assert_eq!(CartridgeId::Crt.slot(), None);
    }

    #[test]
    fn mmu_window_is_clipped_to_its_data() {
        let data = [1u8, 2, 3, 4];
        let w = MmuWindow::new(&data, 0x8000, 0x9fff);
        assert_eq!(w.limit, 0x8003);
        assert_eq!(w.read(0x8000), Some(1));
        assert_eq!(w.read(0x8003), Some(4));
        assert_eq!(w.read(0x8004), None);
        assert_eq!(w.read(0x7fff), None);
    }

    #[test]
    fn bank_requests_show_up_in_the_view() {
        let mut host = crate::RamHost::new();
        let mut bus = PortBus::new(&mut host, PortView::default());
        bus.set_main_banks(3, 3);
        assert_eq!(bus.view().roml_bank, 3);
        bus.trigger_freeze();
        assert_eq!(
            bus.into_requests(),
            vec![Request::MainBanks { roml: 3, romh: 3 }, Request::TriggerFreeze]
        );
    }
}
