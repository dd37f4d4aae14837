//! Half-track GCR buffers.
//!
//! A drive sees a disk as up to 168 half-track bit streams (84 per side).
//! Sector images are synthesised into this form on attach and decoded back
//! when a written track is flushed.

use format_d64::D64;

use crate::codec::{self, DATA_GCR_LEN, HEADER_GCR_LEN, SECTOR_GCR_LEN};

/// Half-track buffers across both sides.
pub const MAX_GCR_TRACKS: usize = 168;

/// One half-track of raw GCR bytes. An empty buffer means no track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcrTrack {
    data: Vec<u8>,
}

impl GcrTrack {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// A track of `len` bytes filled with $55 gap bytes.
    #[must_use]
    pub fn unformatted(len: usize) -> Self {
        Self { data: vec![0x55; len] }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// All half-track buffers of a disk, indexed from half-track 2 of side 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcrImage {
    tracks: Vec<GcrTrack>,
}

impl Default for GcrImage {
    fn default() -> Self {
        Self::new()
    }
}

impl GcrImage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tracks: vec![GcrTrack::default(); MAX_GCR_TRACKS],
        }
    }

    /// Build from a list of tracks, padding or cutting to 168 entries.
    #[must_use]
    pub fn from_tracks(mut tracks: Vec<GcrTrack>) -> Self {
        tracks.resize(MAX_GCR_TRACKS, GcrTrack::default());
        Self { tracks }
    }

    /// Synthesise every track of a sector image. Odd half-tracks stay empty.
    #[must_use]
    pub fn from_d64(d64: &D64) -> Self {
        let mut image = Self::new();
        for track in 1..=d64.total_tracks() {
            if let Some(gcr) = encode_d64_track(d64, track) {
                image.tracks[track as usize * 2 - 2] = gcr;
            }
        }
        image
    }

    #[must_use]
    pub fn track(&self, index: usize) -> Option<&GcrTrack> {
        self.tracks.get(index)
    }

    pub fn track_mut(&mut self, index: usize) -> Option<&mut GcrTrack> {
        self.tracks.get_mut(index)
    }

    pub fn set_track(&mut self, index: usize, track: GcrTrack) {
        if let Some(slot) = self.tracks.get_mut(index) {
            *slot = track;
        }
    }

    #[must_use]
    pub fn tracks(&self) -> &[GcrTrack] {
        &self.tracks
    }
}

/// Synthesise one track of a sector image.
///
/// `track` uses the image's numbering (36-70 are side 1 of a D71). Returns
/// `None` if the image has no such track.
#[must_use]
pub fn encode_d64_track(d64: &D64, track: u8) -> Option<GcrTrack> {
    let sectors = d64.track_sectors(track);
    if sectors == 0 {
        return None;
    }
    let physical = if d64.is_double_sided() && track > d64.tracks() {
        track - d64.tracks()
    } else {
        track
    };
    let size = codec::raw_track_size(physical);
    let gap = (size - sectors as usize * SECTOR_GCR_LEN) / sectors as usize;
    let disk_id = d64.disk_id();

    let mut out = Vec::with_capacity(size);
    let mut block = [0u8; 256];
    for sector in 0..sectors {
        match d64.read_sector(track, sector) {
            Some(data) => block.copy_from_slice(data),
            None => block.fill(0),
        }
        let error = d64.sector_error(track, sector).unwrap_or(format_d64::SECTOR_OK);
        codec::encode_sector(physical, sector, &block, disk_id, error, &mut out);
        out.extend(std::iter::repeat_n(0x55, gap));
    }
    out.resize(size, 0x55);
    Some(GcrTrack::new(out))
}

/// A sector recovered from a GCR bit stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSector {
    pub track: u8,
    pub sector: u8,
    pub data: [u8; 256],
}

struct BitStream<'a> {
    bytes: &'a [u8],
    bits: usize,
}

impl BitStream<'_> {
    fn bit(&self, pos: usize) -> bool {
        let pos = pos % self.bits;
        (self.bytes[pos >> 3] >> (7 - (pos & 7))) & 1 != 0
    }

    fn bytes_at(&self, pos: usize, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| {
                (0..8).fold(0u8, |acc, b| (acc << 1) | u8::from(self.bit(pos + i * 8 + b)))
            })
            .collect()
    }
}

/// Recover every readable sector on a track.
///
/// The track is treated as circular. A sync mark is ten or more one-bits;
/// the block starts at the first zero after it. Each valid header is paired
/// with the block after the next sync.
#[must_use]
pub fn decode_sectors(track: &[u8]) -> Vec<DecodedSector> {
    let stream = BitStream {
        bytes: track,
        bits: track.len() * 8,
    };
    if stream.bits == 0 {
        return Vec::new();
    }
    let Some(start) = (0..stream.bits).find(|&p| !stream.bit(p)) else {
        return Vec::new();
    };

    let mut sync_ends = Vec::new();
    let mut ones = 0;
    for k in 0..stream.bits {
        let pos = start + k;
        if stream.bit(pos) {
            ones += 1;
        } else {
            if ones >= 10 {
                sync_ends.push(pos);
            }
            ones = 0;
        }
    }

    let mut sectors = Vec::new();
    for (i, &pos) in sync_ends.iter().enumerate() {
        let Some(header) = codec::decode_header(&stream.bytes_at(pos, HEADER_GCR_LEN)) else {
            continue;
        };
        let data_pos = sync_ends[(i + 1) % sync_ends.len()];
        if let Some(data) = codec::decode_data_block(&stream.bytes_at(data_pos, DATA_GCR_LEN)) {
            sectors.push(DecodedSector {
                track: header.track,
                sector: header.sector,
                data,
            });
        } else {
            log::debug!(
                "track {} sector {}: unreadable data block",
                header.track,
                header.sector
            );
        }
    }
    sectors
}
