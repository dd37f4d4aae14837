//! Disk images as the drive sees them.
//!
//! Sector images (D64, D71, X64) are synthesised into GCR half-tracks on
//! attach and decoded back sector by sector when a written track is
//! flushed. G64/G71 images carry the half-tracks verbatim. P64 images are
//! flux pulses and bypass the GCR buffers entirely.

use format_d64::D64;
use format_gcr::{decode_sectors, encode_d64_track, raw_track_size, GcrImage, GcrTrack, G64};
use format_p64::{P64Image, LAST_HALF_TRACK};

use crate::ImageError;

const X64_SIGNATURE: [u8; 4] = [0x43, 0x15, 0x41, 0x64];
const X64_HEADER_LEN: usize = 64;
const D81_SIZES: [usize; 2] = [819_200, 822_400];
const MAX_EXTENDED_TRACKS: u8 = 42;

/// Image container type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImageKind {
    D64,
    D71,
    D81,
    G64,
    G71,
    P64,
    X64,
}

impl ImageKind {
    /// Whether writes past the last track may grow the image.
    #[must_use]
    pub fn can_extend(self) -> bool {
        !matches!(self, Self::D71 | Self::D81 | Self::X64)
    }

    /// Half-track buffer index of side 1's first half-track, less two.
    #[must_use]
    pub fn side_offset(self) -> u32 {
        if self == Self::G71 { 84 } else { 70 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Surface {
    Sectors(D64),
    Gcr(G64),
    Pulses(P64Image),
}

/// An attached disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskImage {
    kind: ImageKind,
    read_only: bool,
    /// X64 header, kept for serialisation.
    header: Vec<u8>,
    surface: Surface,
}

impl DiskImage {
    /// Detect the container from its signature (or, for sector images,
    /// its size) and parse it.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ImageError> {
        match data.get(..8) {
            Some(b"GCR-1541" | b"GCR-1571") => return Ok(Self::from_g64(G64::from_bytes(data)?)),
            Some(b"P64-1541") => return Ok(Self::from_p64(P64Image::from_bytes(data)?)),
            _ => {}
        }
        if data.starts_with(&X64_SIGNATURE) && data.len() > X64_HEADER_LEN {
            let d64 = D64::from_bytes(&data[X64_HEADER_LEN..])?;
            let mut image = Self::from_d64(d64);
            image.kind = ImageKind::X64;
            image.header = data[..X64_HEADER_LEN].to_vec();
            return Ok(image);
        }
        if D81_SIZES.contains(&data.len()) {
            return Err(ImageError::Unsupported(ImageKind::D81));
        }
        Ok(Self::from_d64(D64::from_bytes(data)?))
    }

    #[must_use]
    pub fn from_d64(d64: D64) -> Self {
        Self {
            kind: if d64.is_double_sided() { ImageKind::D71 } else { ImageKind::D64 },
            read_only: false,
            header: Vec::new(),
            surface: Surface::Sectors(d64),
        }
    }

    #[must_use]
    pub fn from_g64(g64: G64) -> Self {
        Self {
            kind: if g64.is_double_sided() { ImageKind::G71 } else { ImageKind::G64 },
            read_only: false,
            header: Vec::new(),
            surface: Surface::Gcr(g64),
        }
    }

    #[must_use]
    pub fn from_p64(p64: P64Image) -> Self {
        Self {
            kind: ImageKind::P64,
            read_only: p64.is_write_protected(),
            header: Vec::new(),
            surface: Surface::Pulses(p64),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Full tracks per side.
    #[must_use]
    pub fn tracks(&self) -> u32 {
        match &self.surface {
            Surface::Sectors(d64) => u32::from(d64.tracks()),
            Surface::Gcr(g64) => (g64.entries() / if g64.is_double_sided() { 4 } else { 2 }) as u32,
            Surface::Pulses(_) => (LAST_HALF_TRACK / 2) as u32,
        }
    }

    /// Highest half-track (side offset included) a write may target.
    #[must_use]
    pub fn max_half_tracks(&self) -> u32 {
        match &self.surface {
            Surface::Sectors(d64) if d64.is_double_sided() => 140,
            Surface::Sectors(_) => 84,
            Surface::Gcr(g64) => g64.entries() as u32,
            Surface::Pulses(p64) => LAST_HALF_TRACK as u32 * u32::from(p64.sides()),
        }
    }

    /// Whether the image is flux pulses rather than GCR bytes.
    #[must_use]
    pub fn is_pulse_image(&self) -> bool {
        matches!(self.surface, Surface::Pulses(_))
    }

    /// All half-track buffers, as loaded into the drive on attach. Pulse
    /// images have none.
    #[must_use]
    pub fn gcr_image(&self) -> GcrImage {
        match &self.surface {
            Surface::Sectors(d64) => {
                let mut image = GcrImage::from_d64(d64);
                if !d64.is_double_sided() {
                    // Room for the drive to format past the last track.
                    for track in d64.total_tracks() + 1..=MAX_EXTENDED_TRACKS {
                        image.set_track(
                            usize::from(track) * 2 - 2,
                            GcrTrack::unformatted(raw_track_size(track)),
                        );
                    }
                }
                image
            }
            Surface::Gcr(g64) => g64.to_gcr(),
            Surface::Pulses(_) => GcrImage::new(),
        }
    }

    /// One half-track buffer (side offset included, first half-track 2).
    #[must_use]
    pub fn read_half_track(&self, half_track: u32) -> Option<GcrTrack> {
        let index = half_track.checked_sub(2)? as usize;
        match &self.surface {
            Surface::Sectors(_) if half_track & 1 != 0 => Some(GcrTrack::default()),
            Surface::Sectors(d64) => encode_d64_track(d64, u8::try_from(half_track / 2).ok()?),
            Surface::Gcr(g64) => g64.track(index).cloned(),
            Surface::Pulses(_) => None,
        }
    }

    #[must_use]
    pub fn p64(&self) -> Option<&P64Image> {
        match &self.surface {
            Surface::Pulses(p64) => Some(p64),
            _ => None,
        }
    }

    #[must_use]
    pub fn d64(&self) -> Option<&D64> {
        match &self.surface {
            Surface::Sectors(d64) => Some(d64),
            _ => None,
        }
    }

    #[must_use]
    pub fn g64(&self) -> Option<&G64> {
        match &self.surface {
            Surface::Gcr(g64) => Some(g64),
            _ => None,
        }
    }

    /// Store a written half-track.
    ///
    /// Sector images keep every sector whose header and data block decode
    /// cleanly; odd half-tracks carry no sectors and are dropped. Writing
    /// past the last track grows an extendable image to 40 or 42 tracks.
    pub fn write_half_track(&mut self, half_track: u32, track: &GcrTrack) -> Result<(), ImageError> {
        if self.read_only {
            return Err(ImageError::ReadOnly);
        }
        let kind = self.kind;
        match &mut self.surface {
            Surface::Gcr(g64) => {
                let index = half_track.saturating_sub(2) as usize;
                g64.set_track(index, track.clone())?;
            }
            Surface::Pulses(p64) => {
                let (side, ht) = if half_track > LAST_HALF_TRACK as u32 {
                    (1, half_track - LAST_HALF_TRACK as u32)
                } else {
                    (0, half_track)
                };
                p64.stream_mut(side, ht as usize)
                    .convert_from_gcr(track.data(), track.len() as u32 * 8);
            }
            Surface::Sectors(d64) => {
                if half_track & 1 != 0 {
                    log::debug!("dropping write to half-track {half_track} of a sector image");
                    return Ok(());
                }
                let image_track = half_track / 2;
                if image_track > u32::from(d64.total_tracks()) {
                    if !kind.can_extend() {
                        return Err(ImageError::CannotExtend { kind, track: image_track });
                    }
                    d64.extend(if image_track <= 40 { 40 } else { 42 })?;
                }
                let physical = if d64.is_double_sided() && image_track > u32::from(d64.tracks()) {
                    image_track - u32::from(d64.tracks())
                } else {
                    image_track
                };
                for sector in decode_sectors(track.data()) {
                    if u32::from(sector.track) != physical {
                        log::debug!(
                            "track {image_track}: ignoring sector header for track {}",
                            sector.track
                        );
                        continue;
                    }
                    d64.write_sector(image_track as u8, sector.sector, &sector.data)?;
                }
            }
        }
        Ok(())
    }

    /// Replace the pulse data of a P64 image.
    pub fn write_pulses(&mut self, pulses: &P64Image) -> Result<(), ImageError> {
        if self.read_only {
            return Err(ImageError::ReadOnly);
        }
        match &mut self.surface {
            Surface::Pulses(p64) => {
                *p64 = pulses.clone();
                Ok(())
            }
            _ => Err(ImageError::Unsupported(self.kind)),
        }
    }

    /// Grow a sector image to `tracks` tracks.
    pub fn extend(&mut self, tracks: u8) -> Result<(), ImageError> {
        match &mut self.surface {
            Surface::Sectors(d64) if self.kind.can_extend() => Ok(d64.extend(tracks)?),
            _ => Err(ImageError::CannotExtend {
                kind: self.kind,
                track: u32::from(tracks),
            }),
        }
    }

    /// Serialise in the image's own container format.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.surface {
            Surface::Sectors(d64) => {
                let mut out = self.header.clone();
                out.extend_from_slice(&d64.to_bytes());
                out
            }
            Surface::Gcr(g64) => g64.to_bytes(),
            Surface::Pulses(p64) => p64.to_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_d64() -> D64 {
        D64::blank(35).expect("valid")
    }

    #[test]
    fn detects_containers() {
        let d64 = blank_d64();
        assert_eq!(DiskImage::from_bytes(&d64.to_bytes()).expect("valid").kind(), ImageKind::D64);

        let g64 = G64::from_gcr(&GcrImage::from_d64(&d64), false);
        assert_eq!(DiskImage::from_bytes(&g64.to_bytes()).expect("valid").kind(), ImageKind::G64);

        let p64 = P64Image::new();
        assert_eq!(DiskImage::from_bytes(&p64.to_bytes()).expect("valid").kind(), ImageKind::P64);

        let mut x64 = X64_SIGNATURE.to_vec();
        x64.resize(X64_HEADER_LEN, 0);
        x64.extend_from_slice(&d64.to_bytes());
        let image = DiskImage::from_bytes(&x64).expect("valid");
        assert_eq!(image.kind(), ImageKind::X64);
        assert_eq!(image.to_bytes(), x64);

        assert_eq!(
            DiskImage::from_bytes(&vec![0; 819_200]),
            Err(ImageError::Unsupported(ImageKind::D81))
        );
        assert!(matches!(DiskImage::from_bytes(&[0; 100]), Err(ImageError::D64(_))));
    }

    #[test]
    fn extend_capability() {
        assert!(ImageKind::D64.can_extend());
        assert!(!ImageKind::D71.can_extend());
        assert!(!ImageKind::D81.can_extend());
        assert!(!ImageKind::X64.can_extend());
        let mut image = DiskImage::from_d64(D64::blank_d71());
        assert!(matches!(image.extend(40), Err(ImageError::CannotExtend { .. })));
    }

    #[test]
    fn sector_writeback_decodes_gcr() {
        let mut source = blank_d64();
        let mut block = [0u8; 256];
        block[0] = 0xA5;
        block[255] = 0x5A;
        source.write_sector(17, 3, &block).expect("valid");
        let gcr = encode_d64_track(&source, 17).expect("valid");

        let mut image = DiskImage::from_d64(blank_d64());
        image.write_half_track(34, &gcr).expect("valid");
        let d64 = image.d64().expect("valid");
        assert_eq!(d64.read_sector(17, 3).expect("valid"), &block[..]);
    }

    #[test]
    fn writing_past_last_track_extends() {
        let mut image = DiskImage::from_d64(blank_d64());
        let mut source = D64::blank(40).expect("valid");
        source.write_sector(38, 0, &[0x11; 256]).expect("valid");
        let gcr = encode_d64_track(&source, 38).expect("valid");

        image.write_half_track(76, &gcr).expect("valid");
        assert_eq!(image.tracks(), 40);
        assert_eq!(image.d64().expect("valid").read_sector(38, 0).expect("valid"), &[0x11; 256][..]);
    }

    #[test]
    fn read_only_images_reject_writes() {
        let mut image = DiskImage::from_d64(blank_d64());
        image.set_read_only(true);
        assert_eq!(
            image.write_half_track(36, &GcrTrack::unformatted(10)),
            Err(ImageError::ReadOnly)
        );
    }

    #[test]
    fn g64_half_track_write_is_verbatim() {
        let mut image = DiskImage::from_g64(G64::from_gcr(&GcrImage::new(), false));
        let track = GcrTrack::new(vec![0xFF, 0x52, 0x55]);
        image.write_half_track(3, &track).expect("valid");
        assert_eq!(image.read_half_track(3), Some(track));
        assert_eq!(image.max_half_tracks(), 84);
    }
}
