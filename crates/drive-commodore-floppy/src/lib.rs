//! Commodore GCR floppy drive mechanism.
//!
//! Emulates what sits between the drive's VIA and the disk surface: the
//! spindle, the read/write head and the 1541 read/write electronics
//! (flux filter, UE7 clock divider, UF4 bit-cell counter, 10-bit shift
//! register, SYNC and BYTE READY). Sector and G64 images are fed to the
//! electronics as flat GCR bit streams; P64 images as flux pulses.
//!
//! The drive CPU calls [`Drive::rotate`] (or [`Drive::byte_read`]) with
//! its current clock before sampling SYNC or the data port. Time is
//! measured in 16 MHz reference ticks internally, 16 per drive cycle at
//! 1 MHz.

mod config;
mod drive;
mod drive_set;
mod error;
mod flux;
mod image;
mod rotation;
mod snapshot;

pub use config::{DriveConfig, DriveType, ExtendPolicy};
pub use drive::{
    Drive, ExtendPrompt, DRIVE_ATTACH_DELAY, DRIVE_ATTACH_DETACH_DELAY, SYNC_FOUND, SYNC_NOT_FOUND,
};
pub use drive_set::{DriveSet, DRIVES_PER_UNIT, DRIVE_UNITS, FIRST_UNIT};
pub use error::ImageError;
pub use image::{DiskImage, ImageKind};
pub use rotation::{BYTE_READY_ENABLE, MOTOR_ON};
pub use snapshot::{DRIVE_SNAPSHOT_MAJOR, DRIVE_SNAPSHOT_MINOR, DRIVE_SNAPSHOT_NAME};
