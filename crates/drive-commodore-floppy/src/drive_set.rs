//! All drives on the serial bus.

use emu_core::{SnapshotError, SnapshotModule};

use crate::{snapshot, Drive, DriveConfig};

/// Disk units (device numbers 8 to 11).
pub const DRIVE_UNITS: usize = 4;
/// Mechanisms per unit (dual drives such as the 4040).
pub const DRIVES_PER_UNIT: usize = 2;
/// Device number of the first unit.
pub const FIRST_UNIT: u8 = 8;

#[derive(Debug)]
pub struct DriveSet {
    drives: Vec<Drive>,
    /// Host-to-drive clock ratio, only carried through snapshots.
    sync_factor: u32,
}

impl DriveSet {
    /// Every unit and drive configured alike.
    #[must_use]
    pub fn new(config: DriveConfig) -> Self {
        let drives = (0..DRIVE_UNITS)
            .flat_map(|unit| {
                (0..DRIVES_PER_UNIT).map(move |number| {
                    Drive::new(FIRST_UNIT + unit as u8, number as u8, config)
                })
            })
            .collect();
        Self {
            drives,
            sync_factor: 0,
        }
    }

    fn index(unit: u8, drive: u8) -> Option<usize> {
        let slot = usize::from(unit.checked_sub(FIRST_UNIT)?);
        let drive = usize::from(drive);
        (slot < DRIVE_UNITS && drive < DRIVES_PER_UNIT).then_some(slot * DRIVES_PER_UNIT + drive)
    }

    /// Drive `drive` of device `unit` (8-11).
    #[must_use]
    pub fn drive(&self, unit: u8, drive: u8) -> Option<&Drive> {
        self.drives.get(Self::index(unit, drive)?)
    }

    pub fn drive_mut(&mut self, unit: u8, drive: u8) -> Option<&mut Drive> {
        let index = Self::index(unit, drive)?;
        self.drives.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Drive> {
        self.drives.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Drive> {
        self.drives.iter_mut()
    }

    #[must_use]
    pub fn sync_factor(&self) -> u32 {
        self.sync_factor
    }

    pub fn set_sync_factor(&mut self, factor: u32) {
        self.sync_factor = factor;
    }

    /// Flush pending track writes of every drive, e.g. before the host
    /// saves images or exits.
    pub fn gcr_data_writeback_all(&mut self) {
        for drive in &mut self.drives {
            drive.gcr_data_writeback_all();
        }
    }

    /// Save all drives as a `DRIVE` module.
    #[must_use]
    pub fn write_snapshot(&self) -> SnapshotModule {
        snapshot::write(self)
    }

    /// Restore drive state from a `DRIVE` module. Images are not part of
    /// the module; attach them first.
    pub fn read_snapshot(&mut self, module: &SnapshotModule) -> Result<(), SnapshotError> {
        snapshot::read(self, module)
    }

    pub(crate) fn drives(&self) -> &[Drive] {
        &self.drives
    }

    pub(crate) fn drives_mut(&mut self) -> &mut [Drive] {
        &mut self.drives
    }
}

impl Default for DriveSet {
    fn default() -> Self {
        Self::new(DriveConfig::default())
    }
}
