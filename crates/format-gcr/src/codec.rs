//! Nibble mapping and sector block encoding.
//!
//! Each sector on disk is laid out as:
//!   - Sync mark: 5 bytes of $FF (40 one-bits)
//!   - Header block: 10 GCR bytes (8 raw)
//!   - Header gap: 9 bytes of $55
//!   - Sync mark: 5 bytes of $FF
//!   - Data block: 325 GCR bytes (260 raw)
//!   - Inter-sector gap: $55 filler, sized so the track fills its zone
//!
//! Speed zones follow the drive's own numbering (the value written to the
//! VIA density bits), so the outer tracks are the fastest zone:
//!   Zone 3 (tracks  1-17): 7692 bytes/track
//!   Zone 2 (tracks 18-24): 7142 bytes/track
//!   Zone 1 (tracks 25-30): 6666 bytes/track
//!   Zone 0 (tracks 31-42): 6250 bytes/track

/// 4-bit to 5-bit GCR encoding table.
const GCR_ENCODE: [u8; 16] = [
    0x0A, 0x0B, 0x12, 0x13, 0x0E, 0x0F, 0x16, 0x17,
    0x09, 0x19, 0x1A, 0x1B, 0x0D, 0x1D, 0x1E, 0x15,
];

/// 5-bit to 4-bit decoding table. Invalid codes map to 0xFF.
const GCR_DECODE: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, // 00-07: invalid
    0xFF, 0x08, 0x00, 0x01, 0xFF, 0x0C, 0x04, 0x05, // 08-0F
    0xFF, 0xFF, 0x02, 0x03, 0xFF, 0x0F, 0x06, 0x07, // 10-17
    0xFF, 0x09, 0x0A, 0x0B, 0xFF, 0x0D, 0x0E, 0xFF, // 18-1F
];

/// Raw track length in bytes, indexed by speed zone.
const RAW_TRACK_SIZE: [usize; 4] = [6250, 6666, 7142, 7692];

pub const HEADER_ID: u8 = 0x08;
pub const DATA_ID: u8 = 0x07;
pub const SYNC_LEN: usize = 5;
pub const HEADER_GCR_LEN: usize = 10;
pub const HEADER_GAP_LEN: usize = 9;
pub const DATA_GCR_LEN: usize = 325;

/// Bytes of one sector before its inter-sector gap.
pub const SECTOR_GCR_LEN: usize = SYNC_LEN + HEADER_GCR_LEN + HEADER_GAP_LEN + SYNC_LEN + DATA_GCR_LEN;

/// Error-info codes that change how a sector is laid down.
pub mod sector_error {
    pub const HEADER_NOT_FOUND: u8 = 0x02;
    pub const NO_SYNC: u8 = 0x03;
    pub const DATA_NOT_FOUND: u8 = 0x04;
    pub const DATA_CHECKSUM: u8 = 0x05;
    pub const HEADER_CHECKSUM: u8 = 0x09;
    pub const ID_MISMATCH: u8 = 0x0B;
}

/// Speed zone (0-3) for a full track number.
#[must_use]
pub fn speed_zone(track: u8) -> u8 {
    match track {
        0..=17 => 3,
        18..=24 => 2,
        25..=30 => 1,
        _ => 0,
    }
}

/// Raw GCR bytes on a track formatted at its natural zone.
#[must_use]
pub fn raw_track_size(track: u8) -> usize {
    RAW_TRACK_SIZE[speed_zone(track) as usize]
}

/// Encode 4 raw bytes into 5 GCR bytes.
#[must_use]
pub fn encode_gcr_group(input: &[u8; 4]) -> [u8; 5] {
    let n: [u8; 8] = std::array::from_fn(|i| {
        let byte = input[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0F };
        GCR_ENCODE[nibble as usize]
    });

    // Pack 8 x 5-bit codes into 40 bits
    [
        (n[0] << 3) | (n[1] >> 2),
        (n[1] << 6) | (n[2] << 1) | (n[3] >> 4),
        (n[3] << 4) | (n[4] >> 1),
        (n[4] << 7) | (n[5] << 2) | (n[6] >> 3),
        (n[6] << 5) | n[7],
    ]
}

/// Decode 5 GCR bytes into 4 raw bytes.
///
/// Returns `None` if any 5-bit code is invalid.
#[must_use]
pub fn decode_gcr_group(input: &[u8; 5]) -> Option<[u8; 4]> {
    let codes = [
        input[0] >> 3,
        (input[0] << 2) | (input[1] >> 6),
        input[1] >> 1,
        (input[1] << 4) | (input[2] >> 4),
        (input[2] << 1) | (input[3] >> 7),
        input[3] >> 2,
        (input[3] << 3) | (input[4] >> 5),
        input[4],
    ];
    let mut nibbles = [0u8; 8];
    for (out, code) in nibbles.iter_mut().zip(codes) {
        let nibble = GCR_DECODE[(code & 0x1F) as usize];
        if nibble == 0xFF {
            return None;
        }
        *out = nibble;
    }
    Some(std::array::from_fn(|i| (nibbles[2 * i] << 4) | nibbles[2 * i + 1]))
}

fn encode_groups(raw: &[u8], out: &mut Vec<u8>) {
    for chunk in raw.chunks_exact(4) {
        out.extend_from_slice(&encode_gcr_group(&[chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
}

fn decode_groups(gcr: &[u8]) -> Option<Vec<u8>> {
    let mut raw = Vec::with_capacity(gcr.len() / 5 * 4);
    for chunk in gcr.chunks_exact(5) {
        raw.extend_from_slice(&decode_gcr_group(&[chunk[0], chunk[1], chunk[2], chunk[3], chunk[4]])?);
    }
    Some(raw)
}

/// Decoded sector header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorHeader {
    pub track: u8,
    pub sector: u8,
    pub disk_id: [u8; 2],
}

/// Encode a header block. Raw layout: $08, checksum, sector, track, id2,
/// id1, $0F, $0F.
fn encode_header(track: u8, sector: u8, disk_id: [u8; 2], error: u8, out: &mut Vec<u8>) {
    let mut id = disk_id;
    if error == sector_error::ID_MISMATCH {
        id = [id[0] ^ 0xFF, id[1] ^ 0xFF];
    }
    let mut checksum = sector ^ track ^ id[0] ^ id[1];
    if error == sector_error::HEADER_CHECKSUM {
        checksum ^= 0xFF;
    }
    let marker = if error == sector_error::HEADER_NOT_FOUND { 0x00 } else { HEADER_ID };
    encode_groups(&[marker, checksum, sector, track, id[1], id[0], 0x0F, 0x0F], out);
}

/// Decode a 10-byte header block, checking its marker and checksum.
#[must_use]
pub fn decode_header(gcr: &[u8]) -> Option<SectorHeader> {
    let raw = decode_groups(gcr.get(..HEADER_GCR_LEN)?)?;
    if raw[0] != HEADER_ID || raw[1] != raw[2] ^ raw[3] ^ raw[4] ^ raw[5] {
        return None;
    }
    Some(SectorHeader {
        sector: raw[2],
        track: raw[3],
        disk_id: [raw[5], raw[4]],
    })
}

/// Encode a data block. Raw layout: $07, 256 data bytes, checksum, $00, $00.
fn encode_data_block(sector_data: &[u8; 256], error: u8, out: &mut Vec<u8>) {
    let mut checksum = sector_data.iter().fold(0u8, |acc, &b| acc ^ b);
    if error == sector_error::DATA_CHECKSUM {
        checksum ^= 0xFF;
    }
    let mut raw = Vec::with_capacity(260);
    raw.push(if error == sector_error::DATA_NOT_FOUND { 0x00 } else { DATA_ID });
    raw.extend_from_slice(sector_data);
    raw.extend_from_slice(&[checksum, 0x00, 0x00]);
    encode_groups(&raw, out);
}

/// Decode a 325-byte data block.
///
/// Returns the 256 data bytes, or `None` on a bad code, marker or checksum.
#[must_use]
pub fn decode_data_block(gcr: &[u8]) -> Option<[u8; 256]> {
    let raw = decode_groups(gcr.get(..DATA_GCR_LEN)?)?;
    if raw[0] != DATA_ID {
        return None;
    }
    let checksum = raw[1..257].iter().fold(0u8, |acc, &b| acc ^ b);
    if checksum != raw[257] {
        return None;
    }
    let mut data = [0u8; 256];
    data.copy_from_slice(&raw[1..257]);
    Some(data)
}

/// Encode a sector (sync, header, gap, sync, data) without its trailing gap.
///
/// `error` is the image's error-info byte for the sector; codes other than
/// those in [`sector_error`] lay the sector down normally.
pub fn encode_sector(track: u8, sector: u8, data: &[u8; 256], disk_id: [u8; 2], error: u8, out: &mut Vec<u8>) {
    let sync = if error == sector_error::NO_SYNC { 0x55 } else { 0xFF };
    out.extend_from_slice(&[sync; SYNC_LEN]);
    encode_header(track, sector, disk_id, error, out);
    out.extend_from_slice(&[0x55; HEADER_GAP_LEN]);
    out.extend_from_slice(&[sync; SYNC_LEN]);
    encode_data_block(data, error, out);
}
