//! The `DRIVE` snapshot module.
//!
//! ```text
//! u32   sync factor
//! per drive (units 8-11, two drives each):
//!   u64 attach clock        u8  BYTE READY level   u8  clock (MHz)
//!   u16 half-track + 84 * side                     u64 detach clock
//!   u8  extend policy       u32 head bit offset    u8  GCR read latch
//!   u8  write value         u8  read only          u32 speed zone
//!   u32 drive type
//!   rotation: u32 accum, u64 last clock, u32 bit counter,
//!     u16 read shifter, u8 write shifter, u32 seed, u32 speed zone,
//!     u32 UE7 preset, u32 UE7, u32 UF4, u32 random countdown,
//!     u32 filter counter, u8 filter state, u8 filter last state,
//!     u8 write flux, u32 pulse head position, u32 xorshift,
//!     u32 SO delay, u32 cycle index, u32 ref advance,
//!     u32 requested ref ticks
//! per drive: u64 attach-after-detach clock          (1.3+)
//! per drive: u8 BYTE READY edge, u8 BYTE READY active (1.4+)
//! per drive: u8 complicated                        (1.5+)
//! ```
//!
//! Clocks of zero mean "not pending".

use emu_core::{ModuleReader, SnapshotError, SnapshotModule};

use crate::{DriveSet, DriveType, ExtendPolicy};

pub const DRIVE_SNAPSHOT_NAME: &str = "DRIVE";
pub const DRIVE_SNAPSHOT_MAJOR: u8 = 1;
pub const DRIVE_SNAPSHOT_MINOR: u8 = 5;

const OLDEST_MINOR: u8 = 2;
const SIDE_HALF_TRACKS: u32 = 84;

fn clock(value: u64) -> Option<u64> {
    (value != 0).then_some(value)
}

pub(crate) fn write(set: &DriveSet) -> SnapshotModule {
    let mut m = SnapshotModule::new(DRIVE_SNAPSHOT_NAME, DRIVE_SNAPSHOT_MAJOR, DRIVE_SNAPSHOT_MINOR);
    m.write_u32(set.sync_factor());

    for drive in set.drives() {
        let [attach, detach, _] = drive.clocks();
        let signals = drive.signals();
        let config = drive.config();
        m.write_u64(attach.unwrap_or(0));
        m.write_bool(signals.byte_ready_level);
        m.write_u8(config.clock_frequency);
        m.write_u16((drive.half_track() + drive.side() * SIDE_HALF_TRACKS) as u16);
        m.write_u64(detach.unwrap_or(0));
        m.write_u8(config.extend_policy.code());
        m.write_u32(u32::try_from(drive.head_offset()).unwrap_or(0));
        m.write_u8(signals.gcr_read);
        m.write_u8(signals.write_value);
        m.write_bool(drive.is_read_only());
        m.write_u32(drive.speed_zone());
        m.write_u32(config.drive_type.code());

        let r = drive.rotation();
        m.write_u32(r.accum);
        m.write_u64(r.last_clk);
        m.write_u32(r.bit_counter);
        m.write_u16(r.last_read_data as u16);
        m.write_u8(r.last_write_data);
        m.write_u32(r.seed);
        m.write_u32(r.speed_zone);
        m.write_u32(r.ue7_dcba);
        m.write_u32(r.ue7_counter);
        m.write_u32(r.uf4_counter);
        m.write_u32(r.fr_randcount);
        m.write_u32(r.filter_counter);
        m.write_bool(r.filter_state);
        m.write_bool(r.filter_last_state);
        m.write_bool(r.write_flux);
        m.write_u32(r.pulse_head_position);
        m.write_u32(r.xorshift);
        m.write_u32(r.so_delay);
        m.write_u32(r.cycle_index);
        m.write_u32(r.ref_advance);
        m.write_u32(signals.req_ref_cycles);
    }

    for drive in set.drives() {
        m.write_u64(drive.clocks()[2].unwrap_or(0));
    }
    for drive in set.drives() {
        m.write_bool(drive.signals().byte_ready_edge);
        m.write_u8(drive.signals().byte_ready_active);
    }
    for drive in set.drives() {
        m.write_bool(drive.is_complicated());
    }
    m
}

pub(crate) fn read(set: &mut DriveSet, module: &SnapshotModule) -> Result<(), SnapshotError> {
    module.check_version(DRIVE_SNAPSHOT_MAJOR, OLDEST_MINOR, DRIVE_SNAPSHOT_MINOR)?;
    let mut rd = module.reader();
    set.set_sync_factor(rd.read_u32()?);

    for drive in set.drives_mut() {
        let attach = clock(rd.read_u64()?);
        let byte_ready_level = rd.read_bool()?;
        let clock_frequency = rd.read_u8()?;
        let mut half_track = u32::from(rd.read_u16()?);
        let detach = clock(rd.read_u64()?);
        let extend_policy = ExtendPolicy::from_code(rd.read_u8()?)
            .ok_or_else(|| module.invalid("unknown extend policy"))?;
        let head_offset = rd.read_u32()? as usize;
        let gcr_read = rd.read_u8()?;
        let write_value = rd.read_u8()?;
        let read_only = rd.read_bool()?;
        let speed_zone = rd.read_u32()?;
        let drive_type = DriveType::from_code(rd.read_u32()?)
            .ok_or_else(|| module.invalid("unknown drive type"))?;

        let config = drive.config_mut();
        config.drive_type = drive_type;
        config.clock_frequency = clock_frequency;
        config.extend_policy = extend_policy;

        let mut side = 0;
        if drive_type.is_double_sided() && half_track > SIDE_HALF_TRACKS + 1 {
            half_track -= SIDE_HALF_TRACKS;
            side = 1;
        }
        drive.set_half_track(half_track, side);
        drive.set_head_offset(head_offset);
        drive.set_read_only(read_only);
        drive.set_clocks(attach, detach, None);

        let signals = drive.signals_mut();
        signals.byte_ready_level = byte_ready_level;
        signals.gcr_read = gcr_read;
        signals.write_value = write_value;

        read_rotation(&mut rd, drive.rotation_mut())?;
        let r = drive.rotation_mut();
        r.frequency = u32::from(clock_frequency >= 2);
        r.speed_zone = speed_zone;
        drive.signals_mut().req_ref_cycles = rd.read_u32()?;
    }

    if module.minor() >= 3 {
        for drive in set.drives_mut() {
            let [attach, detach, _] = drive.clocks();
            drive.set_clocks(attach, detach, clock(rd.read_u64()?));
        }
    }
    if module.minor() >= 4 {
        for drive in set.drives_mut() {
            let signals = drive.signals_mut();
            signals.byte_ready_edge = rd.read_bool()?;
            signals.byte_ready_active = rd.read_u8()?;
        }
    }
    // Without the flag, assume the full engine: it is correct for every
    // image, only slower.
    for drive in set.drives_mut() {
        let complicated = if module.minor() >= 5 { rd.read_bool()? } else { true };
        drive.set_complicated(complicated);
    }
    log::debug!("restored {} drives from snapshot", set.drives().len());
    Ok(())
}

fn read_rotation(rd: &mut ModuleReader<'_>, r: &mut crate::rotation::Rotation) -> Result<(), SnapshotError> {
    r.accum = rd.read_u32()?;
    r.last_clk = rd.read_u64()?;
    r.bit_counter = rd.read_u32()?;
    r.last_read_data = u32::from(rd.read_u16()?) & 0x3FF;
    r.last_write_data = rd.read_u8()?;
    r.seed = rd.read_u32()?;
    r.speed_zone = rd.read_u32()?;
    r.ue7_dcba = rd.read_u32()?;
    r.ue7_counter = rd.read_u32()?;
    r.uf4_counter = rd.read_u32()?;
    r.fr_randcount = rd.read_u32()?;
    r.filter_counter = rd.read_u32()?;
    r.filter_state = rd.read_bool()?;
    r.filter_last_state = rd.read_bool()?;
    r.write_flux = rd.read_bool()?;
    r.pulse_head_position = rd.read_u32()?;
    r.xorshift = rd.read_u32()?;
    r.so_delay = rd.read_u32()?;
    r.cycle_index = rd.read_u32()?;
    r.ref_advance = rd.read_u32()?;
    Ok(())
}
