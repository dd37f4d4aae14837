//! GCR (Group Code Recording) for Commodore 1541-family drives.
//!
//! The drive stores data as a continuous bit stream where every 4 data
//! bits become a 5-bit code with no more than two consecutive zeros.
//! [`codec`] handles the nibble mapping and sector blocks, [`track`] the
//! per-half-track buffers a drive rotates under its head, and [`g64`] the
//! raw-track G64/G71 container.

pub mod codec;
pub mod g64;
pub mod track;

pub use codec::{raw_track_size, speed_zone};
pub use g64::{G64, G64Error};
pub use track::{decode_sectors, encode_d64_track, DecodedSector, GcrImage, GcrTrack, MAX_GCR_TRACKS};
