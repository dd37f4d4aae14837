//! P64 flux-pulse disk images.
//!
//! Instead of bytes, a P64 track is a list of magnetic flux reversals
//! ("pulses") placed on a ring of 3,200,000 positions, one position per
//! 16 MHz tick at 300 rpm. Each pulse has a strength; `0xFFFF_FFFF` is a
//! certain pulse and smaller values are weak bits that read randomly.
//!
//! On disk each half-track is compressed with an adaptive binary range
//! coder and wrapped in CRC-checked chunks.

mod crc32;
mod error;
mod image;
mod pulse_stream;
mod range_coder;

pub use crc32::crc32;
pub use error::P64Error;
pub use image::{P64Image, HALF_TRACKS};
pub use pulse_stream::{Pulse, PulseStream};

/// Pulse positions per revolution.
pub const POSITIONS_PER_ROTATION: u32 = 3_200_000;

/// Strength of a pulse that always reads.
pub const FULL_STRENGTH: u32 = 0xFFFF_FFFF;

pub const FIRST_HALF_TRACK: usize = 2;
pub const LAST_HALF_TRACK: usize = 84;
