//! The expansion port: every cartridge access walks slot 0, slot 1, the
//! I/O devices and the main slot in that order.
//!
//! Devices never touch port state directly. A hook gets a [`PortBus`]; the
//! line and bank changes it queues are applied here once the hook returns,
//! followed by the PLA and memory pointer notifications.

use emu_core::{Observable, Value};

use crate::config::CartridgeConfig;
use crate::device::{CartridgeDevice, Line, MmuWindow, PortBus, PortView, ReadResult, Request, Translation};
use crate::devices::{self, BoxedDevice};
use crate::export::{
    recompute, CMODE_BANK_MASK, CMODE_BANK_SHIFT, CMODE_EXPORT_RAM, CMODE_READ, CMODE_RELEASE_FREEZE,
    CMODE_TRIGGER_FREEZE_NMI_ONLY,
};
use crate::memptr::MemPtr;
use crate::{parse_crt, CartridgeError, CartridgeId, ExportLines, Host, Slot};

type Device = dyn CartridgeDevice;

/// Freeze delay upper bound: one PAL frame.
const FRAME_CYCLES: u32 = 312 * 63;
/// Cycles between the freeze NMI and the freeze mapping.
const NMI_DELAY: u64 = 3;

/// Where a device sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Position {
    Zero,
    One,
    Io(usize),
    Main,
}

const ROM_CHAIN: [Position; 3] = [Position::Zero, Position::One, Position::Main];

/// Every position in access order, for `io_devices` I/O devices.
fn full_chain(io_devices: usize) -> impl Iterator<Item = Position> {
    [Position::Zero, Position::One]
        .into_iter()
        .chain((0..io_devices).map(Position::Io))
        .chain([Position::Main])
}

pub struct ExpansionPort {
    pub(crate) slot0: Option<BoxedDevice>,
    pub(crate) slot1: Option<BoxedDevice>,
    pub(crate) io_slot: Vec<BoxedDevice>,
    pub(crate) main: Option<BoxedDevice>,
    /// Lines seen by the CPU.
    pub(crate) export: ExportLines,
    pub(crate) export_slot1: ExportLines,
    pub(crate) export_main: ExportLines,
    pub(crate) export_passthrough: ExportLines,
    pub(crate) roml_bank: u32,
    pub(crate) romh_bank: u32,
    pub(crate) export_ram: bool,
    pub(crate) freeze_alarm: Option<u64>,
    pub(crate) nmi_alarm: Option<u64>,
    pub(crate) memptr: MemPtr,
    config: CartridgeConfig,
    rng: u32,
}

impl Default for ExpansionPort {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpansionPort {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CartridgeConfig::default())
    }

    #[must_use]
    pub fn with_config(config: CartridgeConfig) -> Self {
        Self {
            slot0: None,
            slot1: None,
            io_slot: Vec::new(),
            main: None,
            export: ExportLines::NONE,
            export_slot1: ExportLines::NONE,
            export_main: ExportLines::NONE,
            export_passthrough: ExportLines::NONE,
            roml_bank: 0,
            romh_bank: 0,
            export_ram: false,
            freeze_alarm: None,
            nmi_alarm: None,
            memptr: MemPtr::default(),
            config,
            rng: 0x2545_f491,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CartridgeConfig {
        &self.config
    }

    /// Used by later attaches; attached devices keep their settings.
    pub fn set_config(&mut self, config: CartridgeConfig) {
        self.config = config;
    }

    /// Lines as seen by the CPU.
    #[must_use]
    pub fn export(&self) -> ExportLines {
        self.export
    }

    #[must_use]
    pub fn view(&self) -> PortView {
        PortView {
            export: self.export,
            slot1: self.export_slot1,
            main: self.export_main,
            passthrough: self.export_passthrough,
            roml_bank: self.roml_bank,
            romh_bank: self.romh_bank,
            export_ram: self.export_ram,
        }
    }

    /// Attached devices in access order.
    pub(crate) fn devices(&self) -> impl Iterator<Item = &Device> {
        self.slot0
            .iter()
            .chain(self.slot1.iter())
            .chain(self.io_slot.iter())
            .chain(self.main.iter())
            .map(|d| &**d)
    }

    /// Types attached, in access order.
    #[must_use]
    pub fn attached(&self) -> Vec<CartridgeId> {
        self.devices().map(CartridgeDevice::id).collect()
    }

    #[must_use]
    pub fn is_attached(&self, id: CartridgeId) -> bool {
        self.devices().any(|d| d.id() == id)
    }

    #[must_use]
    pub fn main_id(&self) -> Option<CartridgeId> {
        self.main.as_ref().map(|d| d.id())
    }

    #[must_use]
    pub fn device<T: CartridgeDevice + 'static>(&self) -> Option<&T> {
        self.devices().find_map(|d| d.as_any().downcast_ref::<T>())
    }

    pub fn device_mut<T: CartridgeDevice + 'static>(&mut self) -> Option<&mut T> {
        self.slot0
            .iter_mut()
            .chain(self.slot1.iter_mut())
            .chain(self.io_slot.iter_mut())
            .chain(self.main.iter_mut())
            .find_map(|d| d.as_any_mut().downcast_mut::<T>())
    }

    /// Run `f` on the attached `T` with a bus, so that mapping changes it
    /// makes (switches, buttons) take effect.
    pub fn with_device<T: CartridgeDevice + 'static, R>(
        &mut self,
        host: &mut dyn Host,
        f: impl FnOnce(&mut T, &mut PortBus<'_>) -> R,
    ) -> Option<R> {
        let pos = self.position_where(|d| d.as_any().is::<T>())?;
        self.with_slot(host, pos, |d, bus| d.as_any_mut().downcast_mut::<T>().map(|t| f(t, bus)))
            .flatten()
    }

    fn position_where(&self, pred: impl Fn(&Device) -> bool) -> Option<Position> {
        full_chain(self.io_slot.len()).find(|&pos| self.device_at(pos).is_some_and(&pred))
    }

    fn device_at(&self, pos: Position) -> Option<&Device> {
        match pos {
            Position::Zero => self.slot0.as_deref(),
            Position::One => self.slot1.as_deref(),
            Position::Io(n) => self.io_slot.get(n).map(|d| &**d),
            Position::Main => self.main.as_deref(),
        }
    }

    fn device_at_mut(&mut self, pos: Position) -> Option<&mut Device> {
        match pos {
            Position::Zero => self.slot0.as_deref_mut(),
            Position::One => self.slot1.as_deref_mut(),
            Position::Io(n) => self.io_slot.get_mut(n).map(|d| &mut **d),
            Position::Main => self.main.as_deref_mut(),
        }
    }

    /// Call a hook on the device at `pos`, then apply what it asked for.
    /// `None` when the position is empty.
    pub(crate) fn with_slot<R>(
        &mut self,
        host: &mut dyn Host,
        pos: Position,
        f: impl FnOnce(&mut Device, &mut PortBus<'_>) -> R,
    ) -> Option<R> {
        let view = self.view();
        let device = self.device_at_mut(pos)?;
        let mut bus = PortBus::new(host, view);
        let result = f(device, &mut bus);
        let requests = bus.into_requests();
        self.apply(host, requests);
        Some(result)
    }

    fn apply(&mut self, host: &mut dyn Host, requests: Vec<Request>) {
        for request in requests {
            match request {
                Request::Config { slot, phi1, phi2, flags } => self.config_changed(host, slot, phi1, phi2, flags),
                Request::SetLine { slot, line, asserted } => {
                    if let Some(lines) = self.lines_mut(slot) {
                        match line {
                            Line::Game => lines.game = asserted,
                            Line::Exrom => lines.exrom = asserted,
                        }
                    }
                }
                Request::PortChanged(slot) => self.lines_changed(host, slot != Slot::Zero, CMODE_READ),
                Request::MainBanks { roml, romh } => {
                    self.roml_bank = roml;
                    self.romh_bank = romh;
                }
                Request::TriggerFreeze => self.trigger_freeze(host),
                Request::TriggerFreezeNmiOnly => host.set_nmi(true),
                Request::ReleaseFreeze => host.set_nmi(false),
            }
        }
    }

    fn lines_mut(&mut self, slot: Slot) -> Option<&mut ExportLines> {
        match slot {
            Slot::Zero => Some(&mut self.export),
            Slot::One => Some(&mut self.export_slot1),
            Slot::Main => Some(&mut self.export_main),
            Slot::Io => None,
        }
    }

    fn config_changed(&mut self, host: &mut dyn Host, slot: Slot, phi1: u8, phi2: u8, flags: u8) {
        log::debug!("cartridge: {slot:?} mode {phi1:#04x}/{phi2:#04x} flags {flags:#04x}");
        match slot {
            Slot::Zero => self.export = ExportLines::from_slot0_mode(phi1, phi2),
            Slot::One => self.export_slot1 = ExportLines::from_mode(phi1, phi2, flags),
            Slot::Main => {
                self.export_main = ExportLines::from_mode(phi1, phi2, flags);
                let bank = u32::from((phi2 >> CMODE_BANK_SHIFT) & CMODE_BANK_MASK);
                self.roml_bank = bank;
                self.romh_bank = bank;
                self.export_ram = flags & CMODE_EXPORT_RAM != 0;
            }
            Slot::Io => return,
        }
        self.lines_changed(host, slot != Slot::Zero, flags);
    }

    /// Propagate a line change to the CPU and the host. With
    /// `from_passthrough` the slot 1 and main lines are OR-ed again and
    /// offered to slot 0, which may override them.
    fn lines_changed(&mut self, host: &mut dyn Host, from_passthrough: bool, flags: u8) {
        if from_passthrough {
            self.export_passthrough = recompute(
                self.slot1.is_some().then_some(self.export_slot1),
                self.main.is_some().then_some(self.export_main),
            );
            if self.slot0.is_some() {
                self.with_slot(host, Position::Zero, |d, bus| d.passthrough_changed(bus));
            } else {
                self.export = self.export_passthrough;
            }
        }
        host.pla_config_changed(&self.export);
        self.memptr.update(&self.export);
        if flags & CMODE_RELEASE_FREEZE != 0 {
            host.set_nmi(false);
        }
        host.update_memory_ptrs();
        if flags & CMODE_TRIGGER_FREEZE_NMI_ONLY != 0 {
            host.set_nmi(true);
        }
    }

    // ---- attach / detach ----

    /// Plug in a ready-made device, evicting whatever it conflicts with.
    pub fn attach_device(&mut self, host: &mut dyn Host, device: BoxedDevice) {
        let id = device.id();
        let Some(slot) = id.slot() else {
            log::warn!("cartridge: {} has no slot", id.name());
            return;
        };
        self.evict(host, slot, id);
        let pos = match slot {
            Slot::Zero => {
                self.slot0 = Some(device);
                Position::Zero
            }
            Slot::One => {
                self.slot1 = Some(device);
                Position::One
            }
            Slot::Io => {
                self.io_slot.push(device);
                Position::Io(self.io_slot.len() - 1)
            }
            Slot::Main => {
                self.main = Some(device);
                Position::Main
            }
        };
        self.with_slot(host, pos, |d, bus| d.config_setup(bus));
        log::info!("cartridge: attached {} ({slot:?})", id.name());
    }

    /// Attach a raw image of type `id`, or a CRT file for [`CartridgeId::Crt`].
    ///
    /// # Errors
    ///
    /// Image errors are reported before anything is attached; the slot the
    /// type belongs to is left empty.
    pub fn attach(&mut self, host: &mut dyn Host, id: CartridgeId, data: &[u8]) -> Result<(), CartridgeError> {
        if id == CartridgeId::Crt {
            return self.attach_crt(host, data);
        }
        let device = devices::from_bin(id, data, &self.config);
        self.install(host, id, device)
    }

    /// Attach a CRT file; its header picks the device.
    ///
    /// # Errors
    ///
    /// A file whose header or type cannot be read detaches every
    /// cartridge. Unusable chip layouts leave the type's slot empty.
    pub fn attach_crt(&mut self, host: &mut dyn Host, data: &[u8]) -> Result<(), CartridgeError> {
        let (image, id) = match parse_crt(data).and_then(|image| image.cartridge_id().map(|id| (image, id))) {
            Ok(parsed) => parsed,
            Err(err) => {
                log::warn!("cartridge: cannot attach CRT: {err}");
                self.detach_all(host);
                return Err(err);
            }
        };
        let device = devices::from_crt(&image, &self.config);
        self.install(host, id, device)
    }

    /// Plug in a RAM-only device (REU, GEO-RAM, Expert ...) using the
    /// port's configuration.
    ///
    /// # Errors
    ///
    /// Types that need an image, or a configured size the device does not
    /// support.
    pub fn enable(&mut self, host: &mut dyn Host, id: CartridgeId) -> Result<(), CartridgeError> {
        let device = devices::enable(id, &self.config);
        self.install(host, id, device)
    }

    fn install(
        &mut self,
        host: &mut dyn Host,
        id: CartridgeId,
        device: Result<BoxedDevice, CartridgeError>,
    ) -> Result<(), CartridgeError> {
        match device {
            Ok(device) => {
                self.attach_device(host, device);
                Ok(())
            }
            Err(err) => {
                log::warn!("cartridge: cannot attach {}: {err}", id.name());
                // A bad image still costs the slot its old occupant.
                let bad_image = !matches!(err, CartridgeError::NotAttachable(_));
                if let Some(slot) = id.slot().filter(|_| bad_image) {
                    self.evict(host, slot, id);
                }
                Err(err)
            }
        }
    }

    /// Slot 0, slot 1 and the main slot hold one device each; I/O devices
    /// only clash with their own type.
    fn evict(&mut self, host: &mut dyn Host, slot: Slot, id: CartridgeId) {
        let pos = match slot {
            Slot::Zero => Some(Position::Zero),
            Slot::One => Some(Position::One),
            Slot::Main => Some(Position::Main),
            Slot::Io => self.io_slot.iter().position(|d| d.id() == id).map(Position::Io),
        };
        if let Some(old) = pos.and_then(|pos| self.remove(host, pos)) {
            log::debug!("cartridge: {} evicted by {}", old.name(), id.name());
        }
    }

    fn remove(&mut self, host: &mut dyn Host, pos: Position) -> Option<CartridgeId> {
        let mut device = match pos {
            Position::Zero => self.slot0.take(),
            Position::One => self.slot1.take(),
            Position::Io(n) => (n < self.io_slot.len()).then(|| self.io_slot.remove(n)),
            Position::Main => self.main.take(),
        }?;
        device.detach();
        let id = device.id();
        match pos {
            Position::Zero => self.lines_changed(host, true, CMODE_READ),
            Position::One => {
                self.export_slot1 = ExportLines::NONE;
                self.lines_changed(host, true, CMODE_READ);
            }
            Position::Main => {
                self.export_main = ExportLines::NONE;
                self.roml_bank = 0;
                self.romh_bank = 0;
                self.export_ram = false;
                self.lines_changed(host, true, CMODE_READ);
            }
            Position::Io(_) => {}
        }
        log::info!("cartridge: detached {}", id.name());
        Some(id)
    }

    /// Detach `id` if it is attached.
    pub fn detach(&mut self, host: &mut dyn Host, id: CartridgeId) {
        if let Some(pos) = self.position_where(|d| d.id() == id) {
            self.remove(host, pos);
        }
    }

    pub fn detach_main(&mut self, host: &mut dyn Host) {
        self.remove(host, Position::Main);
    }

    pub fn detach_all(&mut self, host: &mut dyn Host) {
        self.remove(host, Position::Zero);
        self.remove(host, Position::One);
        while !self.io_slot.is_empty() {
            self.remove(host, Position::Io(self.io_slot.len() - 1));
        }
        self.remove(host, Position::Main);
        self.freeze_alarm = None;
        self.nmi_alarm = None;
    }

    // ---- machine events ----

    /// Power-up mapping of everything attached.
    pub fn init_config(&mut self, host: &mut dyn Host) {
        for pos in full_chain(self.io_slot.len()) {
            self.with_slot(host, pos, |d, bus| d.config_init(bus));
        }
        self.memptr.reset();
    }

    /// Reset from the I/O devices up to slot 0.
    pub fn reset(&mut self, host: &mut dyn Host) {
        self.freeze_alarm = None;
        self.nmi_alarm = None;
        for n in 0..self.io_slot.len() {
            self.with_slot(host, Position::Io(n), |d, bus| d.reset(bus));
        }
        for pos in [Position::Main, Position::One, Position::Zero] {
            self.with_slot(host, pos, |d, bus| d.reset(bus));
        }
        self.memptr.reset();
    }

    /// Does any slot 1 or main slot device take a freeze right now?
    #[must_use]
    pub fn freeze_allowed(&self) -> bool {
        [&self.slot1, &self.main]
            .into_iter()
            .flatten()
            .any(|d| d.freeze_allowed())
    }

    /// Press the freeze button. The NMI follows after a random delay of
    /// up to one frame.
    pub fn trigger_freeze(&mut self, host: &mut dyn Host) {
        let delay = 1 + u64::from(self.next_random() % FRAME_CYCLES);
        let at = host.clock() + delay;
        log::debug!("cartridge: freeze at {at}");
        self.freeze_alarm = Some(at);
    }

    #[must_use]
    pub fn freeze_pending(&self) -> bool {
        self.freeze_alarm.is_some()
    }

    /// Clock of the next pending alarm.
    #[must_use]
    pub fn next_alarm(&self) -> Option<u64> {
        [self.freeze_alarm, self.nmi_alarm].into_iter().flatten().min()
    }

    /// Fire alarms that are due at the host's clock.
    pub fn handle_alarms(&mut self, host: &mut dyn Host) {
        let clk = host.clock();
        if self.freeze_alarm.is_some_and(|at| at <= clk) {
            self.freeze_alarm = None;
            if self.freeze_allowed() {
                host.set_nmi(true);
                self.nmi_alarm = Some(clk + NMI_DELAY);
            } else {
                log::debug!("cartridge: freeze ignored");
            }
        }
        if self.nmi_alarm.is_some_and(|at| at <= clk) {
            self.nmi_alarm = None;
            for pos in [Position::One, Position::Main] {
                self.with_slot(host, pos, |d, bus| d.freeze(bus));
            }
        }
    }

    /// The CPU took the NMI.
    pub fn nmi_ack(&mut self, host: &mut dyn Host) {
        for pos in ROM_CHAIN {
            self.with_slot(host, pos, |d, bus| d.nmi_ack(bus));
        }
    }

    pub fn ff00_store(&mut self, host: &mut dyn Host) {
        for pos in full_chain(self.io_slot.len()) {
            self.with_slot(host, pos, |d, bus| d.ff00_store(bus));
        }
    }

    fn next_random(&mut self) -> u32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        x
    }

    // ---- ROM space ----

    /// Ask each position in turn; the first `Valid` or `C64Mem` ends the walk.
    fn claim(
        &mut self,
        host: &mut dyn Host,
        chain: &[Position],
        mut f: impl FnMut(&mut Device, &mut PortBus<'_>) -> ReadResult,
    ) -> ReadResult {
        for &pos in chain {
            if let Some(result @ (ReadResult::Valid(_) | ReadResult::C64Mem)) = self.with_slot(host, pos, &mut f) {
                return result;
            }
        }
        ReadResult::Through
    }

    /// First device to return `true` ends the walk.
    fn claim_store(
        &mut self,
        host: &mut dyn Host,
        chain: &[Position],
        mut f: impl FnMut(&mut Device, &mut PortBus<'_>) -> bool,
    ) -> bool {
        chain.iter().any(|&pos| self.with_slot(host, pos, &mut f) == Some(true))
    }

    /// Every device sees the write.
    fn broadcast_store(&mut self, host: &mut dyn Host, mut f: impl FnMut(&mut Device, &mut PortBus<'_>) -> bool) {
        for pos in ROM_CHAIN {
            self.with_slot(host, pos, &mut f);
        }
    }

    /// $8000-$9FFF in 8K, 16K and Ultimax mode.
    pub fn roml_read(&mut self, host: &mut dyn Host, addr: u16) -> u8 {
        match self.claim(host, &ROM_CHAIN, |d, bus| d.roml_read(addr, bus)) {
            ReadResult::Valid(value) => value,
            ReadResult::C64Mem => host.ram_read(addr),
            _ => host.vicii_read_phi1(),
        }
    }

    /// $8000-$9FFF in Ultimax mode.
    pub fn roml_store(&mut self, host: &mut dyn Host, addr: u16, value: u8) {
        self.claim_store(host, &ROM_CHAIN, |d, bus| d.roml_store(addr, value, bus));
    }

    /// $A000-$BFFF in 16K mode.
    pub fn romh_read(&mut self, host: &mut dyn Host, addr: u16) -> u8 {
        match self.claim(host, &ROM_CHAIN, |d, bus| d.romh_read(addr, bus)) {
            ReadResult::Valid(value) => value,
            ReadResult::C64Mem => host.read_without_ultimax(addr),
            _ => host.vicii_read_phi1(),
        }
    }

    pub fn romh_store(&mut self, host: &mut dyn Host, addr: u16, value: u8) {
        self.broadcast_store(host, |d, bus| d.romh_store(addr, value, bus));
    }

    /// $E000-$FFFF in Ultimax mode.
    pub fn ultimax_romh_read_hirom(&mut self, host: &mut dyn Host, addr: u16) -> u8 {
        match self.claim(host, &ROM_CHAIN, |d, bus| d.ultimax_romh_read_hirom(addr, bus)) {
            ReadResult::Valid(value) => value,
            ReadResult::C64Mem => host.read_without_ultimax(addr),
            _ => host.vicii_read_phi1(),
        }
    }

    /// RAM writes under ROML in 8K/16K mode.
    pub fn roml_no_ultimax_store(&mut self, host: &mut dyn Host, addr: u16, value: u8) {
        if !self.claim_store(host, &ROM_CHAIN, |d, bus| d.roml_no_ultimax_store(addr, value, bus)) {
            host.ram_store(addr, value);
        }
    }

    /// RAM writes under ROMH in 16K mode. The main slot device sees the
    /// write and it still reaches RAM.
    pub fn romh_no_ultimax_store(&mut self, host: &mut dyn Host, addr: u16, value: u8) {
        if self.claim_store(host, &[Position::Zero, Position::One], |d, bus| {
            d.romh_no_ultimax_store(addr, value, bus)
        }) {
            return;
        }
        self.with_slot(host, Position::Main, |d, bus| d.romh_no_ultimax_store(addr, value, bus));
        host.store_without_romlh(addr, value);
    }

    /// Writes to $8000-$9FFF while ROML is not mapped. Only the main slot
    /// can keep them from RAM.
    pub fn raml_no_ultimax_store(&mut self, host: &mut dyn Host, addr: u16, value: u8) {
        for pos in [Position::Zero, Position::One] {
            self.with_slot(host, pos, |d, bus| d.raml_no_ultimax_store(addr, value, bus));
        }
        if self.with_slot(host, Position::Main, |d, bus| d.raml_no_ultimax_store(addr, value, bus)) != Some(true) {
            host.ram_store(addr, value);
        }
    }

    fn ultimax_read(&mut self, host: &mut dyn Host, addr: u16, f: impl FnMut(&mut Device, &mut PortBus<'_>) -> ReadResult) -> Option<u8> {
        match self.claim(host, &ROM_CHAIN, f) {
            ReadResult::Valid(value) => Some(value),
            ReadResult::C64Mem => Some(host.read_without_ultimax(addr)),
            _ => None,
        }
    }

    /// Ultimax mode leaves $1000-$7FFF unmapped.
    pub fn ultimax_1000_7fff_read(&mut self, host: &mut dyn Host, addr: u16) -> u8 {
        self.ultimax_read(host, addr, |d, bus| d.ultimax_1000_7fff_read(addr, bus))
            .unwrap_or_else(|| host.vicii_read_phi1())
    }

    pub fn ultimax_1000_7fff_store(&mut self, host: &mut dyn Host, addr: u16, value: u8) {
        self.broadcast_store(host, |d, bus| d.ultimax_1000_7fff_store(addr, value, bus));
    }

    /// A slot 0 device may hand $A000 to the next slot as plain ROMH.
    pub fn ultimax_a000_bfff_read(&mut self, host: &mut dyn Host, addr: u16) -> u8 {
        let first = self
            .with_slot(host, Position::Zero, |d, bus| d.ultimax_a000_bfff_read(addr, bus))
            .unwrap_or(ReadResult::Through);
        let rest = [Position::One, Position::Main];
        let result = match first {
            ReadResult::Valid(value) => return value,
            ReadResult::C64Mem => return host.read_without_ultimax(addr),
            ReadResult::ThroughNoUltimax => self.claim(host, &rest, |d, bus| d.romh_read(addr, bus)),
            ReadResult::Through => self.claim(host, &rest, |d, bus| d.ultimax_a000_bfff_read(addr, bus)),
        };
        match result {
            ReadResult::Valid(value) => value,
            ReadResult::C64Mem => host.read_without_ultimax(addr),
            _ => host.vicii_read_phi1(),
        }
    }

    pub fn ultimax_a000_bfff_store(&mut self, host: &mut dyn Host, addr: u16, value: u8) {
        self.broadcast_store(host, |d, bus| d.ultimax_a000_bfff_store(addr, value, bus));
    }

    pub fn ultimax_c000_cfff_read(&mut self, host: &mut dyn Host, addr: u16) -> u8 {
        self.ultimax_read(host, addr, |d, bus| d.ultimax_c000_cfff_read(addr, bus))
            .unwrap_or_else(|| host.vicii_read_phi1())
    }

    pub fn ultimax_c000_cfff_store(&mut self, host: &mut dyn Host, addr: u16, value: u8) {
        self.broadcast_store(host, |d, bus| d.ultimax_c000_cfff_store(addr, value, bus));
    }

    /// Unclaimed accesses reach the I/O chips.
    pub fn ultimax_d000_dfff_read(&mut self, host: &mut dyn Host, addr: u16) -> u8 {
        self.ultimax_read(host, addr, |d, bus| d.ultimax_d000_dfff_read(addr, bus))
            .unwrap_or_else(|| host.read_bank_io(addr))
    }

    pub fn ultimax_d000_dfff_store(&mut self, host: &mut dyn Host, addr: u16, value: u8) {
        if !self.claim_store(host, &ROM_CHAIN, |d, bus| d.ultimax_d000_dfff_store(addr, value, bus)) {
            host.store_bank_io(addr, value);
        }
    }

    // ---- VIC fetches in Ultimax mode ----

    /// What the VIC sees at `addr`; `None` for C64 memory.
    fn romh_phi_read(&mut self, host: &mut dyn Host, addr: u16, phi2: bool) -> Option<u8> {
        let addr = 0xe000 | (addr & 0x1fff);
        let mut hook = |d: &mut Device, bus: &mut PortBus<'_>| {
            if phi2 { d.romh_phi2_read(addr, bus) } else { d.romh_phi1_read(addr, bus) }
        };
        for pos in [Position::Zero, Position::One] {
            match self.with_slot(host, pos, &mut hook).flatten() {
                Some(ReadResult::Valid(value)) => return Some(value),
                Some(ReadResult::C64Mem) => return None,
                _ => {}
            }
        }
        if self.main.is_none() {
            return Some(host.vicii_read_phi1());
        }
        match self.with_slot(host, Position::Main, &mut hook).flatten() {
            Some(ReadResult::Valid(value)) => Some(value),
            Some(ReadResult::C64Mem) => None,
            _ => Some(self.ultimax_romh_read_hirom(host, addr)),
        }
    }

    pub fn romh_phi1_read(&mut self, host: &mut dyn Host, addr: u16) -> Option<u8> {
        self.romh_phi_read(host, addr, false)
    }

    pub fn romh_phi2_read(&mut self, host: &mut dyn Host, addr: u16) -> Option<u8> {
        self.romh_phi_read(host, addr, true)
    }

    /// The run of ROMH bytes the VIC sees from `addr` during phi1, while
    /// the lines select Ultimax for the VIC.
    pub fn romh_phi1_ptr(&mut self, host: &mut dyn Host, addr: u16) -> Option<&[u8]> {
        if !self.export.ultimax_phi1 {
            return None;
        }
        let mut cache = std::mem::take(&mut self.memptr.phi1);
        cache.validate(addr, true, |a| self.romh_phi_read(host, a, false));
        self.memptr.phi1 = cache;
        self.memptr.phi1.slice(addr)
    }

    pub fn romh_phi2_ptr(&mut self, host: &mut dyn Host, addr: u16) -> Option<&[u8]> {
        if !self.export.ultimax_phi2 {
            return None;
        }
        let mut cache = std::mem::take(&mut self.memptr.phi2);
        cache.validate(addr, true, |a| self.romh_phi_read(host, a, true));
        self.memptr.phi2 = cache;
        self.memptr.phi2.slice(addr)
    }

    // ---- side-effect free access ----

    /// Cartridge byte at `addr` for monitors; `None` where the C64's own
    /// memory shows through.
    #[must_use]
    pub fn peek(&self, addr: u16) -> Option<u8> {
        let view = self.view();
        for device in [&self.slot0, &self.slot1, &self.main].into_iter().flatten() {
            match device.peek(addr, &view) {
                ReadResult::Valid(value) => return Some(value),
                ReadResult::C64Mem => return None,
                ReadResult::Through | ReadResult::ThroughNoUltimax => {}
            }
        }
        None
    }

    /// Direct-read window covering `addr`, if the mapped cartridge memory
    /// can be read without side effects.
    #[must_use]
    pub fn mmu_translate(&self, addr: u16) -> Option<MmuWindow<'_>> {
        if (0xd000..=0xdfff).contains(&addr) {
            return None;
        }
        let view = self.view();
        for device in [&self.slot0, &self.slot1, &self.main].into_iter().flatten() {
            match device.mmu_translate(addr, &view) {
                Translation::Window(window) => return Some(window),
                Translation::Decline => return None,
                Translation::Through => {}
            }
        }
        None
    }

    // ---- I/O space ----

    /// Every decoding device is read; the first to drive the bus wins.
    fn io_read(
        &mut self,
        host: &mut dyn Host,
        addr: u16,
        mut f: impl FnMut(&mut Device, &mut PortBus<'_>) -> Option<u8>,
    ) -> u8 {
        let mut value = None;
        for pos in full_chain(self.io_slot.len()) {
            if let Some(Some(v)) = self.with_slot(host, pos, &mut f) {
                if value.is_some() {
                    log::debug!("cartridge: I/O read conflict at ${addr:04X}");
                } else {
                    value = Some(v);
                }
            }
        }
        value.unwrap_or_else(|| host.vicii_read_phi1())
    }

    fn io_store(&mut self, host: &mut dyn Host, mut f: impl FnMut(&mut Device, &mut PortBus<'_>)) {
        for pos in full_chain(self.io_slot.len()) {
            self.with_slot(host, pos, &mut f);
        }
    }

    /// $DE00-$DEFF.
    pub fn io1_read(&mut self, host: &mut dyn Host, addr: u16) -> u8 {
        self.io_read(host, addr, |d, bus| d.io1_read(addr, bus))
    }

    pub fn io1_store(&mut self, host: &mut dyn Host, addr: u16, value: u8) {
        self.io_store(host, |d, bus| d.io1_store(addr, value, bus));
    }

    /// Side-effect free `io1_read`; an undriven bus reads $FF.
    #[must_use]
    pub fn io1_peek(&self, addr: u16) -> u8 {
        let view = self.view();
        self.devices().find_map(|d| d.io1_peek(addr, &view)).unwrap_or(0xff)
    }

    /// $DF00-$DFFF.
    pub fn io2_read(&mut self, host: &mut dyn Host, addr: u16) -> u8 {
        self.io_read(host, addr, |d, bus| d.io2_read(addr, bus))
    }

    pub fn io2_store(&mut self, host: &mut dyn Host, addr: u16, value: u8) {
        self.io_store(host, |d, bus| d.io2_store(addr, value, bus));
    }

    #[must_use]
    pub fn io2_peek(&self, addr: u16) -> u8 {
        let view = self.view();
        self.devices().find_map(|d| d.io2_peek(addr, &view)).unwrap_or(0xff)
    }
}

const QUERY_PATHS: &[&str] = &[
    "export.game",
    "export.exrom",
    "export.ultimax_phi1",
    "export.ultimax_phi2",
    "slot1.game",
    "slot1.exrom",
    "main.game",
    "main.exrom",
    "passthrough.game",
    "passthrough.exrom",
    "bank.roml",
    "bank.romh",
    "export_ram",
    "slot0.id",
    "slot1.id",
    "main.id",
    "io.ids",
    "freeze.alarm",
    "freeze.nmi_alarm",
];

fn id_value(device: Option<&BoxedDevice>) -> Value {
    Value::String(device.map_or("none", |d| d.id().name()).to_string())
}

impl Observable for ExpansionPort {
    fn query(&self, path: &str) -> Option<Value> {
        Some(match path {
            "export.game" => Value::Bool(self.export.game),
            "export.exrom" => Value::Bool(self.export.exrom),
            "export.ultimax_phi1" => Value::Bool(self.export.ultimax_phi1),
            "export.ultimax_phi2" => Value::Bool(self.export.ultimax_phi2),
            "slot1.game" => Value::Bool(self.export_slot1.game),
            "slot1.exrom" => Value::Bool(self.export_slot1.exrom),
            "main.game" => Value::Bool(self.export_main.game),
            "main.exrom" => Value::Bool(self.export_main.exrom),
            "passthrough.game" => Value::Bool(self.export_passthrough.game),
            "passthrough.exrom" => Value::Bool(self.export_passthrough.exrom),
            "bank.roml" => Value::U32(self.roml_bank),
            "bank.romh" => Value::U32(self.romh_bank),
            "export_ram" => Value::Bool(self.export_ram),
            "slot0.id" => id_value(self.slot0.as_ref()),
            "slot1.id" => id_value(self.slot1.as_ref()),
            "main.id" => id_value(self.main.as_ref()),
            "io.ids" => Value::Array(self.io_slot.iter().map(|d| Value::String(d.id().name().to_string())).collect()),
            "freeze.alarm" => Value::U64(self.freeze_alarm?),
            "freeze.nmi_alarm" => Value::U64(self.nmi_alarm?),
            _ => return None,
        })
    }

    fn query_paths(&self) -> &'static [&'static str] {
        QUERY_PATHS
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::any::Any;
    use std::cell::RefCell;
    use std::rc::Rc;

    use emu_core::{SnapshotError, SnapshotModule};

    use super::*;
    use crate::devices::{Dqbb, Expert, ExpertMode, Generic, Ieee488, Isepic, RamCart, RamCartSize, RetroReplay, RetroReplayConfig, Reu};
    use crate::RamHost;

    pub(crate) type EventLog = Rc<RefCell<Vec<String>>>;

    /// Does nothing but record which hooks ran.
    pub(crate) struct Probe {
        id: CartridgeId,
        log: EventLog,
    }

    impl Probe {
        pub(crate) fn new(id: CartridgeId, log: &EventLog) -> Self {
            Self { id, log: Rc::clone(log) }
        }

        fn record(&self, what: &str) {
            self.log.borrow_mut().push(format!("{what} {}", self.id.name()));
        }
    }

    impl CartridgeDevice for Probe {
        fn id(&self) -> CartridgeId {
            self.id
        }

        fn config_setup(&mut self, _bus: &mut PortBus) {
            self.record("setup");
        }

        fn reset(&mut self, _bus: &mut PortBus) {
            self.record("reset");
        }

        fn detach(&mut self) {
            self.record("detach");
        }

        fn snapshot_name(&self) -> &'static str {
            "PROBE"
        }

        fn write_snapshot(&self) -> SnapshotModule {
            SnapshotModule::new("PROBE", 0, 0)
        }

        fn read_snapshot(&mut self, _module: &SnapshotModule, _bus: &mut PortBus) -> Result<(), SnapshotError> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn rr_image(fill: u8) -> Vec<u8> {
        vec![fill; 0x10000]
    }

    #[test]
    fn slot1_wins_over_main_slot() {
        for expert_first in [false, true] {
            let mut host = RamHost::new();
            let mut port = ExpansionPort::new();
            let rr = RetroReplay::from_bin(&rr_image(0x11), RetroReplayConfig::default()).expect("valid");
            let expert = Expert::new(ExpertMode::Prg);
            if expert_first {
                port.attach_device(&mut host, Box::new(expert));
                port.attach_device(&mut host, Box::new(rr));
            } else {
                port.attach_device(&mut host, Box::new(rr));
                port.attach_device(&mut host, Box::new(expert));
            }
            port.roml_store(&mut host, 0x8000, 0x42);
            assert_eq!(port.roml_read(&mut host, 0x8000), 0x42);
            assert_eq!(port.attached(), vec![CartridgeId::Expert, CartridgeId::RetroReplay]);
        }
    }

    #[test]
    fn group_member_is_detached_before_the_new_one_is_set_up() {
        let _ = env_logger::builder().is_test(true).try_init();
        let log = EventLog::default();
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        port.attach_device(&mut host, Box::new(Probe::new(CartridgeId::Dqbb, &log)));
        port.attach_device(&mut host, Box::new(Probe::new(CartridgeId::Isepic, &log)));
        assert_eq!(
            *log.borrow(),
            vec![
                "setup Double Quick Brown Box".to_string(),
                "detach Double Quick Brown Box".to_string(),
                "setup ISEPIC".to_string(),
            ]
        );
        assert_eq!(port.attached(), vec![CartridgeId::Isepic]);
    }

    #[test]
    fn reattaching_the_same_type_detaches_it_first() {
        let log = EventLog::default();
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        port.attach_device(&mut host, Box::new(Probe::new(CartridgeId::Reu, &log)));
        port.attach_device(&mut host, Box::new(Probe::new(CartridgeId::Reu, &log)));
        assert_eq!(log.borrow()[1], "detach RAM Expansion Module");
        assert_eq!(port.attached(), vec![CartridgeId::Reu]);
    }

    #[test]
    fn one_device_per_group() {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        port.attach_device(&mut host, Box::new(Dqbb::new()));
        port.attach_device(&mut host, Box::new(Expert::new(ExpertMode::Prg)));
        port.attach_device(&mut host, Box::new(Isepic::new(false)));
        port.attach_device(&mut host, Box::new(RamCart::new(RamCartSize::Kb64, false)));
        port.enable(&mut host, CartridgeId::GeoRam).expect("valid");
        port.enable(&mut host, CartridgeId::Reu).expect("valid");
        assert_eq!(port.attached(), vec![CartridgeId::RamCart, CartridgeId::GeoRam, CartridgeId::Reu]);
        assert!(port.device::<Dqbb>().is_none());
    }

    #[test]
    fn detach_is_idempotent() {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        port.attach_device(&mut host, Box::new(Dqbb::new()));
        assert!(host.export.is_8k());
        port.detach(&mut host, CartridgeId::Dqbb);
        let once = (port.attached(), port.export(), host.export);
        port.detach(&mut host, CartridgeId::Dqbb);
        assert_eq!((port.attached(), port.export(), host.export), once);
        assert_eq!(port.export(), ExportLines::NONE);
        port.detach_all(&mut host);
        port.detach_main(&mut host);
        assert!(port.attached().is_empty());
    }

    #[test]
    fn reset_runs_from_io_to_slot0() {
        let log = EventLog::default();
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        for id in [CartridgeId::Ieee488, CartridgeId::Dqbb, CartridgeId::Generic8k, CartridgeId::GeoRam] {
            port.attach_device(&mut host, Box::new(Probe::new(id, &log)));
        }
        log.borrow_mut().clear();
        port.reset(&mut host);
        assert_eq!(
            *log.borrow(),
            vec![
                "reset GEO-RAM".to_string(),
                "reset Generic 8KiB".to_string(),
                "reset Double Quick Brown Box".to_string(),
                "reset IEEE-488 Interface".to_string(),
            ]
        );
    }

    #[test]
    fn slot0_sees_the_lines_behind_it() {
        for ieee_first in [false, true] {
            let mut host = RamHost::new();
            let mut port = ExpansionPort::new();
            let ieee = Ieee488::from_bin(&[0; 0x1000]).expect("valid");
            let game = Generic::new_16k(&[0; 0x4000]).expect("valid");
            if ieee_first {
                port.attach_device(&mut host, Box::new(ieee));
                port.attach_device(&mut host, Box::new(game));
            } else {
                port.attach_device(&mut host, Box::new(game));
                port.attach_device(&mut host, Box::new(ieee));
            }
            assert!(port.view().passthrough.is_16k());
            assert!(host.export.is_16k());
        }
    }

    #[test]
    fn failed_attach_leaves_the_slot_empty() {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        port.attach(&mut host, CartridgeId::Generic8k, &[0; 0x2000]).expect("valid");
        port.enable(&mut host, CartridgeId::Reu).expect("valid");
        // An unreadable CRT header unplugs everything.
        assert_eq!(port.attach_crt(&mut host, b"nonsense"), Err(CartridgeError::Truncated("header")));
        assert!(port.attached().is_empty());
        assert_eq!(host.export, ExportLines::NONE);
        port.attach(&mut host, CartridgeId::Generic8k, &[0; 0x2000]).expect("valid");
        // Devices that need an image cannot be enabled; nothing changes.
        assert!(port.enable(&mut host, CartridgeId::RetroReplay).is_err());
        assert_eq!(port.main_id(), Some(CartridgeId::Generic8k));
        // A bad image for the main slot leaves it empty.
        assert!(port.attach(&mut host, CartridgeId::Generic16k, &[0; 0x100]).is_err());
        assert_eq!(port.main_id(), None);
        assert_eq!(host.export, ExportLines::NONE);
    }

    #[test]
    fn crt_attach_picks_the_slot() {
        use crate::crt::tests::{make_chip, make_crt_header};
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        let mut crt = make_crt_header(0, 0, 0);
        crt.extend(make_chip(0, 0x8000, &[0x5a; 0x4000]));
        port.attach(&mut host, CartridgeId::Crt, &crt).expect("valid");
        assert_eq!(port.main_id(), Some(CartridgeId::Generic16k));
        assert_eq!(port.romh_read(&mut host, 0xa000), 0x5a);
    }

    #[test]
    fn freeze_waits_for_the_alarm_then_the_nmi() {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        port.attach_device(&mut host, Box::new(Expert::new(ExpertMode::On)));
        host.clock = 1000;
        port.trigger_freeze(&mut host);
        let at = port.next_alarm().expect("valid");
        assert!((1001..=1000 + u64::from(FRAME_CYCLES)).contains(&at));

        host.clock = at - 1;
        port.handle_alarms(&mut host);
        assert!(!host.nmi);
        host.clock = at;
        port.handle_alarms(&mut host);
        assert!(host.nmi);
        assert!(!port.freeze_pending());
        assert_eq!(port.next_alarm(), Some(at + NMI_DELAY));
        host.clock = at + NMI_DELAY;
        port.handle_alarms(&mut host);
        assert_eq!(port.next_alarm(), None);
        assert!(host.export.is_ultimax());
    }

    #[test]
    fn freeze_is_dropped_when_not_allowed() {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        port.attach_device(&mut host, Box::new(Expert::new(ExpertMode::Off)));
        port.trigger_freeze(&mut host);
        host.clock = port.next_alarm().expect("valid");
        port.handle_alarms(&mut host);
        assert!(!host.nmi);
        assert_eq!(port.next_alarm(), None);
    }

    #[test]
    fn vic_pointer_follows_the_lines() {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        let rom: Vec<u8> = (0..0x2000).map(|n| (n >> 8) as u8).collect();
        port.attach_device(&mut host, Box::new(Generic::new_ultimax(&rom).expect("valid")));
        let run = port.romh_phi1_ptr(&mut host, 0x1800).expect("valid");
        assert_eq!(run.len(), 0x800);
        assert_eq!(run[0], 0x18);
        assert_eq!(port.romh_phi2_read(&mut host, 0x3fff), Some(0x1f));

        port.detach_main(&mut host);
        assert!(port.romh_phi1_ptr(&mut host, 0x1800).is_none());
        // Nothing attached: the VIC sees the idle bus.
        host.bus_value = 0x3c;
        assert_eq!(port.romh_phi1_read(&mut host, 0x1000), Some(0x3c));
    }

    #[test]
    fn unclaimed_accesses_float_or_fall_through() {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        host.bus_value = 0x5e;
        host.ram[0xd020] = 0x0e;
        assert_eq!(port.io1_read(&mut host, 0xde00), 0x5e);
        assert_eq!(port.roml_read(&mut host, 0x8000), 0x5e);
        assert_eq!(port.ultimax_d000_dfff_read(&mut host, 0xd020), 0x0e);
        port.roml_no_ultimax_store(&mut host, 0x8000, 0x12);
        assert_eq!(host.ram[0x8000], 0x12);
        assert_eq!(port.io2_peek(0xdf00), 0xff);
        assert_eq!(port.peek(0x8000), None);
    }

    #[test]
    fn reu_and_retro_replay_share_io2() {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        let rr = RetroReplay::from_bin(&rr_image(0), RetroReplayConfig::default()).expect("valid");
        port.attach_device(&mut host, Box::new(rr));
        port.attach_device(&mut host, Box::new(Reu::new(128).expect("valid")));
        // The REU decodes its registers; the store reaches both devices.
        port.io2_store(&mut host, 0xdf02, 0x34);
        assert_eq!(port.device::<Reu>().expect("valid").size_kb(), 128);
        assert_eq!(port.attached(), vec![CartridgeId::Reu, CartridgeId::RetroReplay]);
    }

    #[test]
    fn observable_reports_lines_and_devices() {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        port.attach_device(&mut host, Box::new(Generic::new_8k(&[0; 0x2000]).expect("valid")));
        port.enable(&mut host, CartridgeId::Reu).expect("valid");
        assert_eq!(port.query("export.exrom"), Some(Value::Bool(true)));
        assert_eq!(port.query("export.game"), Some(Value::Bool(false)));
        assert_eq!(port.query("main.id"), Some(Value::String("Generic 8KiB".to_string())));
        assert_eq!(
            port.query("io.ids"),
            Some(Value::Array(vec![Value::String("RAM Expansion Module".to_string())]))
        );
        assert_eq!(port.query("freeze.alarm"), None);
        assert_eq!(port.query("nonsense"), None);
        assert!(port.dump().len() >= 17);
    }
}
