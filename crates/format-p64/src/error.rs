use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum P64Error {
    BadSignature,
    UnsupportedVersion(u32),
    /// The header, a chunk or a pulse stream ended early.
    Truncated,
    /// The chunk area or a chunk failed its CRC-32.
    ChecksumMismatch,
    /// A pulse stream decoded to a different pulse count than it declared.
    BadPulseStream { expected: u32, decoded: u32 },
}

impl fmt::Display for P64Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSignature => write!(f, "not a P64 image (bad signature)"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported P64 version {v}"),
            Self::Truncated => write!(f, "P64 image is truncated"),
            Self::ChecksumMismatch => write!(f, "P64 checksum mismatch"),
            Self::BadPulseStream { expected, decoded } => write!(
                f,
                "P64 pulse stream declares {expected} pulses but decodes to {decoded}"
            ),
        }
    }
}

impl std::error::Error for P64Error {}
