//! Port-wide snapshot state.
//!
//! The `C64CART` module lists the attached types and the line state; each
//! device then contributes its own module, found again by name on restore.

use emu_core::{Snapshot, SnapshotError, SnapshotModule};

use crate::device::CartridgeDevice;
use crate::devices;
use crate::port::Position;
use crate::{CartridgeId, ExpansionPort, ExportLines, Host, Slot};

pub const CARTRIDGE_SNAPSHOT_NAME: &str = "C64CART";
const MAJOR: u8 = 0;
const MINOR: u8 = 1;

const MAX_CARTRIDGES: usize = 16;
const NO_ALARM: u64 = u64::MAX;

fn alarm(clock: u64) -> Option<u64> {
    (clock != NO_ALARM).then_some(clock)
}

impl ExpansionPort {
    /// Port state followed by one module per attached device.
    #[must_use]
    pub fn write_snapshot(&self) -> Snapshot {
        let attached: Vec<&dyn CartridgeDevice> = self.devices().collect();
        let main = self.main.as_ref().map_or(CartridgeId::None, |d| d.id());

        let mut m = SnapshotModule::new(CARTRIDGE_SNAPSHOT_NAME, MAJOR, MINOR);
        m.write_u8(attached.len() as u8);
        m.write_u32(main.code() as u32);
        m.write_bool(self.export.game);
        m.write_bool(self.export.exrom);
        m.write_u32(self.romh_bank);
        m.write_u32(self.roml_bank);
        m.write_bool(self.export_ram);
        m.write_bool(self.export.ultimax_phi1);
        m.write_bool(self.export.ultimax_phi2);
        m.write_u64(self.freeze_alarm.unwrap_or(NO_ALARM));
        m.write_u64(self.nmi_alarm.unwrap_or(NO_ALARM));
        for lines in [self.export_slot1, self.export_main, self.export_passthrough] {
            m.write_bytes(&lines.to_bytes());
        }
        for device in &attached {
            m.write_u32(device.id().code() as u32);
        }

        let mut snapshot = Snapshot::new();
        snapshot.push(m);
        for device in attached {
            snapshot.push(device.write_snapshot());
        }
        snapshot
    }

    /// Replace everything attached with the devices in `snapshot`.
    ///
    /// # Errors
    ///
    /// A missing or malformed `C64CART` module, an unknown type or a
    /// missing device module leave the port as it was. A device module
    /// that fails to load leaves the port empty.
    pub fn read_snapshot(&mut self, host: &mut dyn Host, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let module = snapshot.require(CARTRIDGE_SNAPSHOT_NAME)?;
        // The device list layout depends on the minor version.
        if module.major() != MAJOR || module.minor() != MINOR {
            return Err(SnapshotError::IncompatibleVersion {
                module: module.name().to_string(),
                major: module.major(),
                minor: module.minor(),
            });
        }
        let mut r = module.reader();

        let count = usize::from(r.read_u8()?);
        if count > MAX_CARTRIDGES {
            return Err(module.invalid(format!("{count} cartridges")));
        }
        let main_code = r.read_u32()? as i32;
        let game = r.read_bool()?;
        let exrom = r.read_bool()?;
        let romh_bank = r.read_u32()?;
        let roml_bank = r.read_u32()?;
        let export_ram = r.read_bool()?;
        let ultimax_phi1 = r.read_bool()?;
        let ultimax_phi2 = r.read_bool()?;
        let freeze_alarm = alarm(r.read_u64()?);
        let nmi_alarm = alarm(r.read_u64()?);
        let mut lines = [ExportLines::NONE; 3];
        for l in &mut lines {
            let mut bytes = [0; 4];
            r.read_into(&mut bytes)?;
            *l = ExportLines::from_bytes(bytes);
        }

        let mut restored = Vec::with_capacity(count);
        let mut taken = [false; 3];
        let mut io_ids = Vec::new();
        let mut main_id = CartridgeId::None;
        for _ in 0..count {
            let code = r.read_u32()? as i32;
            let id = CartridgeId::from_code(code).ok_or_else(|| module.invalid(format!("unknown cartridge {code}")))?;
            let device = devices::blank(id).ok_or_else(|| module.invalid(format!("cannot restore {}", id.name())))?;
            let clash = match id.slot() {
                Some(Slot::Zero) => std::mem::replace(&mut taken[0], true),
                Some(Slot::One) => std::mem::replace(&mut taken[1], true),
                Some(Slot::Main) => {
                    main_id = id;
                    std::mem::replace(&mut taken[2], true)
                }
                Some(Slot::Io) => {
                    let seen = io_ids.contains(&id);
                    io_ids.push(id);
                    seen
                }
                None => true,
            };
            if clash {
                return Err(module.invalid(format!("{} does not fit", id.name())));
            }
            let own = snapshot.require(device.snapshot_name())?;
            restored.push((device, own));
        }
        if main_id.code() != main_code {
            return Err(module.invalid(format!("main slot holds {main_code}")));
        }

        self.detach_all(host);
        for (device, own) in restored {
            let pos = match device.id().slot() {
                Some(Slot::Zero) => {
                    self.slot0 = Some(device);
                    Position::Zero
                }
                Some(Slot::One) => {
                    self.slot1 = Some(device);
                    Position::One
                }
                Some(Slot::Io) => {
                    self.io_slot.push(device);
                    Position::Io(self.io_slot.len() - 1)
                }
                _ => {
                    self.main = Some(device);
                    Position::Main
                }
            };
            if let Some(Err(err)) = self.with_slot(host, pos, |d, bus| d.read_snapshot(own, bus)) {
                log::warn!("cartridge: snapshot restore failed: {err}");
                self.detach_all(host);
                return Err(err);
            }
        }

        self.export = ExportLines {
            game,
            exrom,
            ultimax_phi1,
            ultimax_phi2,
        };
        [self.export_slot1, self.export_main, self.export_passthrough] = lines;
        self.roml_bank = roml_bank;
        self.romh_bank = romh_bank;
        self.export_ram = export_ram;
        self.freeze_alarm = freeze_alarm;
        self.nmi_alarm = nmi_alarm;
        host.pla_config_changed(&self.export);
        self.memptr.reset();
        host.update_memory_ptrs();
        log::info!("cartridge: restored {count} device(s)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{Expert, ExpertMode, RetroReplay, RetroReplayConfig, Reu};
    use crate::RamHost;

    fn loaded() -> (ExpansionPort, RamHost) {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        let rr = RetroReplay::from_bin(&vec![0x77; 0x10000], RetroReplayConfig::default()).expect("valid");
        port.attach_device(&mut host, Box::new(rr));
        port.attach_device(&mut host, Box::new(Expert::new(ExpertMode::Prg)));
        port.attach_device(&mut host, Box::new(Reu::new(256).expect("valid")));
        port.roml_store(&mut host, 0x8123, 0x5a);
        (port, host)
    }

    #[test]
    fn port_round_trip() {
        let (mut port, mut host) = loaded();
        host.clock = 500;
        port.trigger_freeze(&mut host);
        let alarm = port.next_alarm();
        let bytes = port.write_snapshot().to_bytes();

        let snap = Snapshot::from_bytes(&bytes).expect("valid");
        let mut host2 = RamHost::new();
        let mut other = ExpansionPort::new();
        other.enable(&mut host2, CartridgeId::Isepic).expect("valid");
        other.read_snapshot(&mut host2, &snap).expect("valid");

        assert_eq!(other.attached(), port.attached());
        assert_eq!(other.export(), port.export());
        assert_eq!(host2.export, port.export());
        assert_eq!(other.view(), port.view());
        assert_eq!(other.next_alarm(), alarm);
        assert_eq!(other.roml_read(&mut host2, 0x8123), 0x5a);
        assert_eq!(other.device::<Reu>().expect("valid").size_kb(), 256);
    }

    #[test]
    fn empty_port_round_trip() {
        let snap = ExpansionPort::new().write_snapshot();
        let (mut other, mut host) = loaded();
        other.read_snapshot(&mut host, &snap).expect("valid");
        assert!(other.attached().is_empty());
        assert_eq!(other.export(), ExportLines::NONE);
        assert_eq!(host.export, ExportLines::NONE);
    }

    fn header(ids: &[i32], main: i32) -> SnapshotModule {
        let mut m = SnapshotModule::new(CARTRIDGE_SNAPSHOT_NAME, MAJOR, MINOR);
        m.write_u8(ids.len() as u8);
        m.write_u32(main as u32);
        m.write_bytes(&[0; 2]);
        m.write_u32(0);
        m.write_u32(0);
        m.write_bytes(&[0; 3]);
        m.write_u64(NO_ALARM);
        m.write_u64(NO_ALARM);
        m.write_bytes(&[0; 12]);
        for &id in ids {
            m.write_u32(id as u32);
        }
        m
    }

    #[test]
    fn unknown_type_leaves_the_port_alone() {
        let (mut port, mut host) = loaded();
        let before = port.attached();
        let mut snap = Snapshot::new();
        snap.push(header(&[12345], -1));
        assert!(matches!(
            port.read_snapshot(&mut host, &snap),
            Err(SnapshotError::Invalid { .. })
        ));
        assert_eq!(port.attached(), before);
    }

    #[test]
    fn missing_device_module_is_reported() {
        let (mut port, mut host) = loaded();
        let mut snap = Snapshot::new();
        snap.push(header(&[CartridgeId::Reu.code()], -1));
        assert!(matches!(
            port.read_snapshot(&mut host, &snap),
            Err(SnapshotError::MissingModule(_))
        ));
        assert_eq!(port.attached().len(), 3);
    }

    #[test]
    fn two_main_cartridges_are_rejected() {
        let (mut port, mut host) = loaded();
        let mut snap = Snapshot::new();
        snap.push(header(&[-3, 36], 36));
        assert!(port.read_snapshot(&mut host, &snap).is_err());
        assert_eq!(port.attached().len(), 3);
    }

    #[test]
    fn newer_minor_version_is_refused() {
        let mut host = RamHost::new();
        let mut port = ExpansionPort::new();
        let mut snap = Snapshot::new();
        snap.push(SnapshotModule::new(CARTRIDGE_SNAPSHOT_NAME, MAJOR, MINOR + 1));
        assert!(matches!(
            port.read_snapshot(&mut host, &snap),
            Err(SnapshotError::IncompatibleVersion { .. })
        ));
        assert!(matches!(
            port.read_snapshot(&mut host, &Snapshot::new()),
            Err(SnapshotError::MissingModule(_))
        ));
    }
}
