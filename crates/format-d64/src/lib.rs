//! D64 and D71 sector images.
//!
//! A single-sided image holds 35, 40 or 42 tracks with a variable number
//! of sectors per track:
//!   Tracks  1-17: 21 sectors
//!   Tracks 18-24: 19 sectors
//!   Tracks 25-30: 18 sectors
//!   Tracks 31-42: 17 sectors
//!
//! A D71 is two 35-track sides back to back; its tracks 36-70 are side 1.
//! Any layout may be followed by one error byte per sector.

use std::fmt;

pub const SECTOR_SIZE: usize = 256;

/// Error-info byte meaning "sector read fine".
pub const SECTOR_OK: u8 = 0x01;

const MAX_TRACKS: u8 = 42;

/// Sectors per track, indexed by track number (index 0 unused).
const SECTORS_PER_TRACK: [u8; 43] = [
    0, // track 0 doesn't exist
    21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, // 1-17
    19, 19, 19, 19, 19, 19, 19, // 18-24
    18, 18, 18, 18, 18, 18, // 25-30
    17, 17, 17, 17, 17, // 31-35
    17, 17, 17, 17, 17, 17, 17, // 36-42
];

/// Index of the first sector of each track (1-indexed).
const TRACK_FIRST_SECTOR: [usize; 43] = {
    let mut first = [0usize; 43];
    let mut track = 1;
    let mut sector = 0;
    while track < 43 {
        first[track] = sector;
        sector += SECTORS_PER_TRACK[track] as usize;
        track += 1;
    }
    first
};

const fn sectors_in_tracks(tracks: u8) -> usize {
    TRACK_FIRST_SECTOR[tracks as usize] + SECTORS_PER_TRACK[tracks as usize] as usize
}

const SECTORS_35: usize = sectors_in_tracks(35);
const SECTORS_40: usize = sectors_in_tracks(40);
const SECTORS_42: usize = sectors_in_tracks(42);
const SECTORS_D71: usize = 2 * SECTORS_35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum D64Error {
    /// The byte count matches no known layout.
    InvalidSize(usize),
    /// Sector writes must be exactly 256 bytes.
    BadSectorLength(usize),
    NoSuchSector { track: u8, sector: u8 },
    /// Only single-sided images grow, and only to 40 or 42 tracks.
    CannotExtend { from: u8, to: u8 },
}

impl fmt::Display for D64Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSize(size) => write!(
                f,
                "invalid D64/D71 size: {size} bytes (expected a 35, 40 or 42 track D64 or a 70 track D71)"
            ),
            Self::BadSectorLength(len) => write!(f, "sector data must be 256 bytes, got {len}"),
            Self::NoSuchSector { track, sector } => {
                write!(f, "track {track} sector {sector} is outside the image")
            }
            Self::CannotExtend { from, to } => {
                write!(f, "cannot extend image from {from} to {to} tracks")
            }
        }
    }
}

impl std::error::Error for D64Error {}

/// A parsed D64 or D71 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct D64 {
    data: Vec<u8>,
    /// Tracks per side.
    tracks: u8,
    double_sided: bool,
    errors: Option<Vec<u8>>,
}

impl D64 {
    /// Parse an image from raw bytes, detecting the layout from its size.
    pub fn from_bytes(data: &[u8]) -> Result<Self, D64Error> {
        let layouts = [
            (SECTORS_35, 35, false),
            (SECTORS_40, 40, false),
            (SECTORS_42, 42, false),
            (SECTORS_D71, 35, true),
        ];
        for (sectors, tracks, double_sided) in layouts {
            let plain = sectors * SECTOR_SIZE;
            if data.len() == plain || data.len() == plain + sectors {
                let errors = (data.len() > plain).then(|| data[plain..].to_vec());
                return Ok(Self {
                    data: data[..plain].to_vec(),
                    tracks,
                    double_sided,
                    errors,
                });
            }
        }
        Err(D64Error::InvalidSize(data.len()))
    }

    /// An all-zero single-sided image with `tracks` tracks (35, 40 or 42).
    pub fn blank(tracks: u8) -> Result<Self, D64Error> {
        if !matches!(tracks, 35 | 40 | 42) {
            return Err(D64Error::InvalidSize(0));
        }
        Ok(Self {
            data: vec![0; sectors_in_tracks(tracks) * SECTOR_SIZE],
            tracks,
            double_sided: false,
            errors: None,
        })
    }

    /// An all-zero 70-track D71.
    #[must_use]
    pub fn blank_d71() -> Self {
        Self {
            data: vec![0; SECTORS_D71 * SECTOR_SIZE],
            tracks: 35,
            double_sided: true,
            errors: None,
        }
    }

    /// Sectors on a track of the single-sided layout (1-42).
    ///
    /// Returns 0 for invalid track numbers.
    #[must_use]
    pub fn sectors_per_track(track: u8) -> u8 {
        if (1..=MAX_TRACKS).contains(&track) {
            SECTORS_PER_TRACK[track as usize]
        } else {
            0
        }
    }

    /// Sectors on `track` of this image, honouring the D71 side split.
    #[must_use]
    pub fn track_sectors(&self, track: u8) -> u8 {
        let (_, local) = self.split_track(track);
        if local == 0 || local > self.tracks {
            0
        } else {
            SECTORS_PER_TRACK[local as usize]
        }
    }

    /// Tracks per side.
    #[must_use]
    pub fn tracks(&self) -> u8 {
        self.tracks
    }

    /// Track numbers addressable in this image (70 for a D71).
    #[must_use]
    pub fn total_tracks(&self) -> u8 {
        if self.double_sided { self.tracks * 2 } else { self.tracks }
    }

    #[must_use]
    pub fn is_double_sided(&self) -> bool {
        self.double_sided
    }

    #[must_use]
    pub fn has_error_info(&self) -> bool {
        self.errors.is_some()
    }

    /// Side and per-side track number.
    fn split_track(&self, track: u8) -> (usize, u8) {
        if self.double_sided && track > self.tracks {
            (1, track - self.tracks)
        } else {
            (0, track)
        }
    }

    fn sector_index(&self, track: u8, sector: u8) -> Option<usize> {
        let (side, local) = self.split_track(track);
        if local == 0 || local > self.tracks || sector >= SECTORS_PER_TRACK[local as usize] {
            return None;
        }
        Some(side * SECTORS_35 + TRACK_FIRST_SECTOR[local as usize] + sector as usize)
    }

    /// Byte offset of a sector within the sector data.
    #[must_use]
    pub fn sector_offset(&self, track: u8, sector: u8) -> Option<usize> {
        self.sector_index(track, sector).map(|i| i * SECTOR_SIZE)
    }

    #[must_use]
    pub fn read_sector(&self, track: u8, sector: u8) -> Option<&[u8]> {
        let offset = self.sector_offset(track, sector)?;
        Some(&self.data[offset..offset + SECTOR_SIZE])
    }

    pub fn write_sector(&mut self, track: u8, sector: u8, data: &[u8]) -> Result<(), D64Error> {
        if data.len() != SECTOR_SIZE {
            return Err(D64Error::BadSectorLength(data.len()));
        }
        let index = self
            .sector_index(track, sector)
            .ok_or(D64Error::NoSuchSector { track, sector })?;
        let offset = index * SECTOR_SIZE;
        self.data[offset..offset + SECTOR_SIZE].copy_from_slice(data);
        if let Some(errors) = self.errors.as_mut() {
            errors[index] = SECTOR_OK;
        }
        Ok(())
    }

    /// Error-info byte for a sector, if the image carries error info.
    #[must_use]
    pub fn sector_error(&self, track: u8, sector: u8) -> Option<u8> {
        let index = self.sector_index(track, sector)?;
        self.errors.as_ref().map(|e| e[index])
    }

    /// Disk ID from the BAM (track 18, sector 0, bytes $A2-$A3).
    #[must_use]
    pub fn disk_id(&self) -> [u8; 2] {
        self.read_sector(18, 0)
            .map_or([0, 0], |bam| [bam[0xA2], bam[0xA3]])
    }

    /// Grow a single-sided image to 40 or 42 tracks.
    pub fn extend(&mut self, tracks: u8) -> Result<(), D64Error> {
        if self.double_sided || tracks <= self.tracks || !matches!(tracks, 40 | 42) {
            return Err(D64Error::CannotExtend {
                from: self.tracks,
                to: tracks,
            });
        }
        let sectors = sectors_in_tracks(tracks);
        self.data.resize(sectors * SECTOR_SIZE, 0);
        if let Some(errors) = self.errors.as_mut() {
            errors.resize(sectors, SECTOR_OK);
        }
        log::info!("extended disk image from {} to {} tracks", self.tracks, tracks);
        self.tracks = tracks;
        Ok(())
    }

    /// Serialise the image, error info included.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.data.clone();
        if let Some(errors) = &self.errors {
            out.extend_from_slice(errors);
        }
        out
    }
}
