use std::fmt;

use crate::CartridgeId;

/// Cartridge image and attach failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartridgeError {
    /// No `C64 CARTRIDGE` signature at the start of the file.
    BadSignature,
    /// The file ends inside the named structure.
    Truncated(&'static str),
    BadHeaderLength(u32),
    /// Missing `CHIP` signature or bad packet length.
    BadChip { offset: usize },
    /// A CRT hardware type this crate has no device for.
    UnsupportedType(u16),
    NoChips,
    /// Raw image or chip of a size the cartridge cannot hold.
    BadSize { cartridge: &'static str, size: usize },
    BankOutOfRange { bank: u16, banks: u16 },
    /// The type has no attachable device (`None`, `Crt`).
    NotAttachable(CartridgeId),
}

impl fmt::Display for CartridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSignature => write!(f, "invalid CRT signature"),
            Self::Truncated(what) => write!(f, "CRT file truncated in {what}"),
            Self::BadHeaderLength(len) => write!(f, "invalid CRT header length: {len}"),
            Self::BadChip { offset } => write!(f, "invalid CHIP packet at offset {offset}"),
            Self::UnsupportedType(t) => write!(f, "unsupported CRT type: {t}"),
            Self::NoChips => write!(f, "CRT file contains no CHIP packets"),
            Self::BadSize { cartridge, size } => {
                write!(f, "{cartridge}: invalid image size {size}")
            }
            Self::BankOutOfRange { bank, banks } => {
                write!(f, "bank {bank} out of range (cartridge has {banks} banks)")
            }
            Self::NotAttachable(id) => write!(f, "{id:?} cannot be attached"),
        }
    }
}

impl std::error::Error for CartridgeError {}
