//! G64/G71 raw GCR track images.
//!
//! Layout (little-endian):
//!
//! ```text
//! "GCR-1541" or "GCR-1571"   signature
//! u8                         version (0)
//! u8                         half-track entries (84, or 168 for G71)
//! u16                        maximum track size in bytes
//! u32 × entries              track offsets (0 = no track)
//! u32 × entries              speed zone per entry (0-3)
//! at each offset: u16 length, then the track bytes
//! ```
//!
//! Entry `i` is half-track `i + 2`; G71 entries 84-167 are side 1.

use std::fmt;

use crate::codec;
use crate::track::{GcrImage, GcrTrack};

const SIGNATURE_1541: &[u8; 8] = b"GCR-1541";
const SIGNATURE_1571: &[u8; 8] = b"GCR-1571";
const HEADER_LEN: usize = 12;
const ENTRIES_PER_SIDE: usize = 84;
const DEFAULT_MAX_TRACK_SIZE: u16 = 7928;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G64Error {
    BadSignature,
    UnsupportedVersion(u8),
    /// A table or track ran past the end of the file.
    Truncated { offset: usize },
    NoSuchTrack(usize),
}

impl fmt::Display for G64Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSignature => write!(f, "not a G64/G71 image (bad signature)"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported G64 version {v}"),
            Self::Truncated { offset } => write!(f, "G64 image truncated at offset {offset}"),
            Self::NoSuchTrack(i) => write!(f, "G64 image has no half-track entry {i}"),
        }
    }
}

impl std::error::Error for G64Error {}

fn read_le_u16(data: &[u8], pos: usize) -> Result<u16, G64Error> {
    data.get(pos..pos + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or(G64Error::Truncated { offset: pos })
}

fn read_le_u32(data: &[u8], pos: usize) -> Result<u32, G64Error> {
    data.get(pos..pos + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(G64Error::Truncated { offset: pos })
}

/// A parsed G64 or G71 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct G64 {
    double_sided: bool,
    max_track_size: u16,
    tracks: Vec<GcrTrack>,
    speeds: Vec<u32>,
}

impl G64 {
    pub fn from_bytes(data: &[u8]) -> Result<Self, G64Error> {
        let signature = data.get(..8).ok_or(G64Error::BadSignature)?;
        let double_sided = match signature {
            s if s == SIGNATURE_1541 => false,
            s if s == SIGNATURE_1571 => true,
            _ => return Err(G64Error::BadSignature),
        };
        let version = *data.get(8).ok_or(G64Error::Truncated { offset: 8 })?;
        if version != 0 {
            return Err(G64Error::UnsupportedVersion(version));
        }
        let entries = *data.get(9).ok_or(G64Error::Truncated { offset: 9 })? as usize;
        let max_track_size = read_le_u16(data, 10)?;

        let mut tracks = Vec::with_capacity(entries);
        let mut speeds = Vec::with_capacity(entries);
        for i in 0..entries {
            let offset = read_le_u32(data, HEADER_LEN + i * 4)? as usize;
            let speed = read_le_u32(data, HEADER_LEN + (entries + i) * 4)?;
            let track = if offset == 0 {
                GcrTrack::default()
            } else {
                let len = read_le_u16(data, offset)? as usize;
                let bytes = data
                    .get(offset + 2..offset + 2 + len)
                    .ok_or(G64Error::Truncated { offset })?;
                GcrTrack::new(bytes.to_vec())
            };
            tracks.push(track);
            // Values above 3 point at per-byte speed maps; use the track's zone.
            speeds.push(if speed > 3 {
                u32::from(codec::speed_zone(entry_track(i)))
            } else {
                speed
            });
        }

        Ok(Self {
            double_sided,
            max_track_size,
            tracks,
            speeds,
        })
    }

    /// Build an image from half-track buffers.
    #[must_use]
    pub fn from_gcr(image: &GcrImage, double_sided: bool) -> Self {
        let entries = if double_sided { 2 * ENTRIES_PER_SIDE } else { ENTRIES_PER_SIDE };
        let tracks = image.tracks()[..entries].to_vec();
        let longest = tracks.iter().map(GcrTrack::len).max().unwrap_or(0);
        let speeds = (0..entries)
            .map(|i| u32::from(codec::speed_zone(entry_track(i))))
            .collect();
        Self {
            double_sided,
            max_track_size: DEFAULT_MAX_TRACK_SIZE.max(longest as u16),
            tracks,
            speeds,
        }
    }

    #[must_use]
    pub fn is_double_sided(&self) -> bool {
        self.double_sided
    }

    #[must_use]
    pub fn entries(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn max_track_size(&self) -> u16 {
        self.max_track_size
    }

    #[must_use]
    pub fn speed_zone(&self, index: usize) -> Option<u32> {
        self.speeds.get(index).copied()
    }

    #[must_use]
    pub fn track(&self, index: usize) -> Option<&GcrTrack> {
        self.tracks.get(index)
    }

    /// Replace a half-track entry, growing the size limit if needed.
    pub fn set_track(&mut self, index: usize, track: GcrTrack) -> Result<(), G64Error> {
        let slot = self.tracks.get_mut(index).ok_or(G64Error::NoSuchTrack(index))?;
        if track.len() > self.max_track_size as usize {
            self.max_track_size = track.len().min(u16::MAX as usize) as u16;
        }
        *slot = track;
        Ok(())
    }

    /// Half-track buffers in drive order.
    #[must_use]
    pub fn to_gcr(&self) -> GcrImage {
        GcrImage::from_tracks(self.tracks.clone())
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let entries = self.tracks.len();
        let slot = 2 + self.max_track_size as usize;
        let mut out = Vec::new();
        out.extend_from_slice(if self.double_sided { SIGNATURE_1571 } else { SIGNATURE_1541 });
        out.push(0);
        out.push(entries as u8);
        out.extend_from_slice(&self.max_track_size.to_le_bytes());

        let mut next = HEADER_LEN + entries * 8;
        for track in &self.tracks {
            let offset = if track.is_empty() {
                0
            } else {
                let at = next;
                next += slot;
                at
            };
            out.extend_from_slice(&(offset as u32).to_le_bytes());
        }
        for speed in &self.speeds {
            out.extend_from_slice(&speed.to_le_bytes());
        }
        for track in self.tracks.iter().filter(|t| !t.is_empty()) {
            let len = track.len().min(self.max_track_size as usize);
            out.extend_from_slice(&(len as u16).to_le_bytes());
            out.extend_from_slice(&track.data()[..len]);
            out.resize(out.len() + slot - 2 - len, 0);
        }
        out
    }
}

/// Full track number of a G64 entry, ignoring side.
fn entry_track(index: usize) -> u8 {
    ((index % ENTRIES_PER_SIDE) / 2 + 1) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> G64 {
        let mut image = GcrImage::new();
        image.set_track(0, GcrTrack::new(vec![0xFF, 0x52, 0x94]));
        image.set_track(35, GcrTrack::new(vec![0x55; 10]));
        G64::from_gcr(&image, false)
    }

    #[test]
    fn serialise_and_parse() {
        let g64 = sample();
        let bytes = g64.to_bytes();
        assert_eq!(&bytes[..8], b"GCR-1541");
        assert_eq!(bytes[9], 84);

        let back = G64::from_bytes(&bytes).expect("valid");
        assert_eq!(back, g64);
        assert_eq!(back.track(0).expect("valid").data(), &[0xFF, 0x52, 0x94]);
        assert!(back.track(1).expect("valid").is_empty());
        assert_eq!(back.speed_zone(0), Some(3));
        assert_eq!(back.speed_zone(83), Some(0));
    }

    #[test]
    fn g71_has_two_sides() {
        let g71 = G64::from_gcr(&GcrImage::new(), true);
        let back = G64::from_bytes(&g71.to_bytes()).expect("valid");
        assert!(back.is_double_sided());
        assert_eq!(back.entries(), 168);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(G64::from_bytes(b"GCR-1581\0\0\0\0"), Err(G64Error::BadSignature));
        let mut bytes = sample().to_bytes();
        bytes[8] = 1;
        assert_eq!(G64::from_bytes(&bytes), Err(G64Error::UnsupportedVersion(1)));
        let bytes = sample().to_bytes();
        assert!(matches!(
            G64::from_bytes(&bytes[..bytes.len() / 2]),
            Err(G64Error::Truncated { .. })
        ));
    }

    #[test]
    fn set_track_grows_limit() {
        let mut g64 = sample();
        g64.set_track(2, GcrTrack::new(vec![0x55; 8000])).expect("valid");
        assert_eq!(g64.max_track_size(), 8000);
        assert_eq!(g64.set_track(84, GcrTrack::default()), Err(G64Error::NoSuchTrack(84)));
    }
}
