use std::fmt;

use format_d64::D64Error;
use format_gcr::G64Error;
use format_p64::P64Error;

use crate::ImageKind;

/// Disk image load and write failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    D64(D64Error),
    G64(G64Error),
    P64(P64Error),
    /// Recognised, but not something a GCR drive can spin.
    Unsupported(ImageKind),
    ReadOnly,
    /// The half-track lies outside the image and the image cannot grow.
    CannotExtend { kind: ImageKind, track: u32 },
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::D64(e) => write!(f, "{e}"),
            Self::G64(e) => write!(f, "{e}"),
            Self::P64(e) => write!(f, "{e}"),
            Self::Unsupported(kind) => write!(f, "{kind:?} images are not supported by GCR drives"),
            Self::ReadOnly => write!(f, "disk image is write protected"),
            Self::CannotExtend { kind, track } => {
                write!(f, "{kind:?} image cannot be extended to track {track}")
            }
        }
    }
}

impl std::error::Error for ImageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::D64(e) => Some(e),
            Self::G64(e) => Some(e),
            Self::P64(e) => Some(e),
            _ => None,
        }
    }
}

impl From<D64Error> for ImageError {
    fn from(e: D64Error) -> Self {
        Self::D64(e)
    }
}

impl From<G64Error> for ImageError {
    fn from(e: G64Error) -> Self {
        Self::G64(e)
    }
}

impl From<P64Error> for ImageError {
    fn from(e: P64Error) -> Self {
        Self::P64(e)
    }
}
