//! The P64 container.
//!
//! ```text
//! "P64-1541"   signature
//! u32          version (0)
//! u32          flags: bit 0 write protected, bit 1 double sided
//! u32          size of the chunk area
//! u32          CRC-32 of the chunk area
//! chunks:      [u8; 4] tag, u32 size, u32 CRC-32, payload
//! ```
//!
//! `HTP` + half-track byte (bit 7 = side) holds one pulse stream, `DONE`
//! ends the list. Unknown chunks are skipped once their CRC checks out.

use crate::{crc32, P64Error, PulseStream, FIRST_HALF_TRACK, LAST_HALF_TRACK};

const SIGNATURE: &[u8; 8] = b"P64-1541";
const HEADER_LEN: usize = 24;
const CHUNK_HEADER_LEN: usize = 12;

/// Stream slots per side (index 0 and 1 are never used).
pub const HALF_TRACKS: usize = LAST_HALF_TRACK + 1;

fn le_u32(bytes: &[u8], at: usize) -> Result<u32, P64Error> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(P64Error::Truncated)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P64Image {
    streams: Box<[[PulseStream; HALF_TRACKS]; 2]>,
    write_protected: bool,
    sides: u8,
}

impl Default for P64Image {
    fn default() -> Self {
        Self::new()
    }
}

impl P64Image {
    /// An empty single-sided image.
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: Box::new(std::array::from_fn(|_| std::array::from_fn(|_| PulseStream::new()))),
            write_protected: false,
            sides: 1,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    #[must_use]
    pub fn stream(&self, side: usize, half_track: usize) -> &PulseStream {
        &self.streams[side & 1][half_track.min(LAST_HALF_TRACK)]
    }

    pub fn stream_mut(&mut self, side: usize, half_track: usize) -> &mut PulseStream {
        &mut self.streams[side & 1][half_track.min(LAST_HALF_TRACK)]
    }

    #[must_use]
    pub fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn set_write_protected(&mut self, protected: bool) {
        self.write_protected = protected;
    }

    #[must_use]
    pub fn sides(&self) -> u8 {
        self.sides
    }

    pub fn set_sides(&mut self, sides: u8) {
        self.sides = sides.clamp(1, 2);
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, P64Error> {
        if data.get(..8) != Some(&SIGNATURE[..]) {
            return Err(P64Error::BadSignature);
        }
        let version = le_u32(data, 8)?;
        if version != 0 {
            return Err(P64Error::UnsupportedVersion(version));
        }
        let flags = le_u32(data, 12)?;
        let size = le_u32(data, 16)? as usize;
        let checksum = le_u32(data, 20)?;
        let area = data
            .get(HEADER_LEN..HEADER_LEN + size)
            .ok_or(P64Error::Truncated)?;
        if crc32(area) != checksum {
            return Err(P64Error::ChecksumMismatch);
        }

        let mut image = Self::new();
        image.write_protected = flags & 1 != 0;
        image.sides = if flags & 2 != 0 { 2 } else { 1 };

        let mut pos = 0;
        while pos < area.len() {
            let tag = area.get(pos..pos + 4).ok_or(P64Error::Truncated)?;
            let chunk_size = le_u32(area, pos + 4)? as usize;
            let chunk_crc = le_u32(area, pos + 8)?;
            pos += CHUNK_HEADER_LEN;
            if chunk_size == 0 {
                if chunk_crc != 0 {
                    return Err(P64Error::ChecksumMismatch);
                }
                continue;
            }
            let body = area.get(pos..pos + chunk_size).ok_or(P64Error::Truncated)?;
            pos += chunk_size;
            if crc32(body) != chunk_crc {
                return Err(P64Error::ChecksumMismatch);
            }
            let half_track = (tag[3] & 0x7F) as usize;
            if &tag[..3] == b"HTP" && (FIRST_HALF_TRACK..=LAST_HALF_TRACK).contains(&half_track) {
                let side = usize::from(tag[3] >> 7);
                image.streams[side][half_track].read_from(body)?;
            } else {
                log::debug!("skipping P64 chunk {:?}", String::from_utf8_lossy(tag));
            }
        }
        Ok(image)
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut chunks = Vec::new();
        let mut body = Vec::new();
        for side in 0..usize::from(self.sides) {
            for half_track in FIRST_HALF_TRACK..=LAST_HALF_TRACK {
                body.clear();
                self.streams[side][half_track].write_to(&mut body);
                let tag = [b'H', b'T', b'P', (half_track + 128 * side) as u8];
                push_chunk(&mut chunks, tag, &body);
            }
        }
        push_chunk(&mut chunks, *b"DONE", &[]);

        let mut flags = 0u32;
        if self.write_protected {
            flags |= 1;
        }
        if self.sides == 2 {
            flags |= 2;
        }
        let mut out = Vec::with_capacity(HEADER_LEN + chunks.len());
        out.extend_from_slice(SIGNATURE);
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
        out.extend_from_slice(&crc32(&chunks).to_le_bytes());
        out.extend_from_slice(&chunks);
        out
    }
}

fn push_chunk(out: &mut Vec<u8>, tag: [u8; 4], body: &[u8]) {
    out.extend_from_slice(&tag);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc32(body).to_le_bytes());
    out.extend_from_slice(body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FULL_STRENGTH;

    fn sample() -> P64Image {
        let mut image = P64Image::new();
        for (i, p) in (1000..3_100_000).step_by(3200).enumerate() {
            image.stream_mut(0, 36).add_pulse(p, FULL_STRENGTH);
            if i % 3 == 0 {
                image.stream_mut(0, 2).add_pulse(p + 17, 0x4000_0000);
            }
        }
        image
    }

    #[test]
    fn container_round_trip() {
        let image = sample();
        let bytes = image.to_bytes();
        assert_eq!(&bytes[..8], b"P64-1541");
        let back = P64Image::from_bytes(&bytes).expect("valid");
        assert_eq!(back, image);
        assert_eq!(back.sides(), 1);
        assert!(!back.is_write_protected());
    }

    #[test]
    fn double_sided_and_protected_flags() {
        let mut image = sample();
        image.set_sides(2);
        image.set_write_protected(true);
        image.stream_mut(1, 84).add_pulse(42, FULL_STRENGTH);
        let back = P64Image::from_bytes(&image.to_bytes()).expect("valid");
        assert_eq!(back.sides(), 2);
        assert!(back.is_write_protected());
        assert_eq!(back.stream(1, 84).pulse_count(), 1);
    }

    #[test]
    fn corrupted_chunk_area_is_rejected() {
        let mut bytes = sample().to_bytes();
        let last = bytes.len() - 20;
        bytes[last] ^= 0x01;
        assert_eq!(P64Image::from_bytes(&bytes), Err(P64Error::ChecksumMismatch));
    }

    #[test]
    fn header_errors() {
        assert_eq!(P64Image::from_bytes(b"G64-1541"), Err(P64Error::BadSignature));
        let mut bytes = sample().to_bytes();
        bytes[8] = 1;
        assert_eq!(P64Image::from_bytes(&bytes), Err(P64Error::UnsupportedVersion(1)));
        let bytes = sample().to_bytes();
        assert_eq!(P64Image::from_bytes(&bytes[..bytes.len() - 1]), Err(P64Error::Truncated));
    }
}
