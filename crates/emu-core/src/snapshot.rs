//! Versioned snapshot modules.
//!
//! A snapshot is a sequence of named modules. Each module carries a major
//! and minor version so that a reader can accept older layouts it still
//! understands and reject ones it cannot.
//!
//! Container layout (all integers little-endian):
//!
//! ```text
//! "EMUSNAP\x1A"  magic (8 bytes)
//! u8             container version (1)
//! repeated:
//!   [u8; 16]     module name, NUL padded
//!   u8           major version
//!   u8           minor version
//!   u32          payload length
//!   [u8; len]    payload
//! ```

use std::fmt;

/// Snapshot container magic.
const MAGIC: &[u8; 8] = b"EMUSNAP\x1A";

/// Container version written by [`Snapshot::to_bytes`].
const CONTAINER_VERSION: u8 = 1;

/// Module names are stored as fixed 16-byte fields.
pub const MODULE_NAME_LEN: usize = 16;

const MODULE_HEADER_LEN: usize = MODULE_NAME_LEN + 2 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// The data does not start with the snapshot magic.
    BadMagic,
    /// The container version is not one this build reads.
    UnsupportedContainer(u8),
    /// A module or the container ended early.
    Truncated(String),
    /// A module required for restore is not present.
    MissingModule(String),
    /// A module's version cannot be read by this build.
    IncompatibleVersion { module: String, major: u8, minor: u8 },
    /// A module decoded but its contents make no sense.
    Invalid { module: String, reason: String },
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "not a snapshot (bad magic)"),
            Self::UnsupportedContainer(v) => write!(f, "unsupported snapshot container version {v}"),
            Self::Truncated(module) => write!(f, "snapshot module {module} is truncated"),
            Self::MissingModule(module) => write!(f, "snapshot module {module} is missing"),
            Self::IncompatibleVersion {
                module,
                major,
                minor,
            } => write!(f, "snapshot module {module} has incompatible version {major}.{minor}"),
            Self::Invalid { module, reason } => write!(f, "snapshot module {module}: {reason}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// One named, versioned chunk of state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotModule {
    name: String,
    major: u8,
    minor: u8,
    data: Vec<u8>,
}

impl SnapshotModule {
    /// Start an empty module. Names longer than [`MODULE_NAME_LEN`] bytes are
    /// cut when serialised.
    #[must_use]
    pub fn new(name: &str, major: u8, minor: u8) -> Self {
        Self {
            name: name.to_string(),
            major,
            minor,
            data: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn major(&self) -> u8 {
        self.major
    }

    #[must_use]
    pub fn minor(&self) -> u8 {
        self.minor
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.data.push(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// A cursor over the payload.
    #[must_use]
    pub fn reader(&self) -> ModuleReader<'_> {
        ModuleReader {
            module: self,
            pos: 0,
        }
    }

    /// Reject a module whose major version differs from `major` or whose
    /// minor version is older than `min_minor`. A newer minor is accepted
    /// with a warning; readers ignore trailing fields they do not know.
    pub fn check_version(&self, major: u8, min_minor: u8, max_minor: u8) -> Result<(), SnapshotError> {
        if self.major != major || self.minor < min_minor {
            return Err(SnapshotError::IncompatibleVersion {
                module: self.name.clone(),
                major: self.major,
                minor: self.minor,
            });
        }
        if self.minor > max_minor {
            log::warn!(
                "snapshot module {} version {}.{} is newer than {}.{}; ignoring extra fields",
                self.name,
                self.major,
                self.minor,
                major,
                max_minor
            );
        }
        Ok(())
    }

    /// Build an [`SnapshotError::Invalid`] for this module.
    #[must_use]
    pub fn invalid(&self, reason: impl Into<String>) -> SnapshotError {
        SnapshotError::Invalid {
            module: self.name.clone(),
            reason: reason.into(),
        }
    }
}

/// Sequential reader over a module payload.
pub struct ModuleReader<'a> {
    module: &'a SnapshotModule,
    pos: usize,
}

impl<'a> ModuleReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], SnapshotError> {
        let module: &'a SnapshotModule = self.module;
        let data: &'a [u8] = &module.data;
        let end = self.pos + n;
        if end > data.len() {
            return Err(SnapshotError::Truncated(module.name.clone()));
        }
        let slice = &data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, SnapshotError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, SnapshotError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, SnapshotError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, SnapshotError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], SnapshotError> {
        self.take(n)
    }

    /// Fill `out` completely from the payload.
    pub fn read_into(&mut self, out: &mut [u8]) -> Result<(), SnapshotError> {
        let src = self.take(out.len())?;
        out.copy_from_slice(src);
        Ok(())
    }

    /// Bytes left unread.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.module.data.len() - self.pos
    }
}

/// An ordered collection of modules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    modules: Vec<SnapshotModule>,
}

impl Snapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a module, replacing an earlier module of the same name.
    pub fn push(&mut self, module: SnapshotModule) {
        if let Some(existing) = self.modules.iter_mut().find(|m| m.name == module.name) {
            *existing = module;
        } else {
            self.modules.push(module);
        }
    }

    #[must_use]
    pub fn module(&self, name: &str) -> Option<&SnapshotModule> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Like [`Snapshot::module`] but missing modules are an error.
    pub fn require(&self, name: &str) -> Result<&SnapshotModule, SnapshotError> {
        self.module(name)
            .ok_or_else(|| SnapshotError::MissingModule(name.to_string()))
    }

    #[must_use]
    pub fn modules(&self) -> &[SnapshotModule] {
        &self.modules
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload: usize = self.modules.iter().map(|m| MODULE_HEADER_LEN + m.data.len()).sum();
        let mut out = Vec::with_capacity(MAGIC.len() + 1 + payload);
        out.extend_from_slice(MAGIC);
        out.push(CONTAINER_VERSION);
        for module in &self.modules {
            let mut name = [0u8; MODULE_NAME_LEN];
            let bytes = module.name.as_bytes();
            let len = bytes.len().min(MODULE_NAME_LEN);
            name[..len].copy_from_slice(&bytes[..len]);
            out.extend_from_slice(&name);
            out.push(module.major);
            out.push(module.minor);
            out.extend_from_slice(&(module.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&module.data);
        }
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, SnapshotError> {
        if data.len() < MAGIC.len() + 1 || &data[..MAGIC.len()] != MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let version = data[MAGIC.len()];
        if version != CONTAINER_VERSION {
            return Err(SnapshotError::UnsupportedContainer(version));
        }

        let mut modules = Vec::new();
        let mut pos = MAGIC.len() + 1;
        while pos < data.len() {
            if pos + MODULE_HEADER_LEN > data.len() {
                return Err(SnapshotError::Truncated("<header>".to_string()));
            }
            let raw_name = &data[pos..pos + MODULE_NAME_LEN];
            let name_len = raw_name.iter().position(|&b| b == 0).unwrap_or(MODULE_NAME_LEN);
            let name = String::from_utf8_lossy(&raw_name[..name_len]).into_owned();
            let major = data[pos + MODULE_NAME_LEN];
            let minor = data[pos + MODULE_NAME_LEN + 1];
            let len_at = pos + MODULE_NAME_LEN + 2;
            let len = u32::from_le_bytes([
                data[len_at],
                data[len_at + 1],
                data[len_at + 2],
                data[len_at + 3],
            ]) as usize;
            pos += MODULE_HEADER_LEN;
            if pos + len > data.len() {
                return Err(SnapshotError::Truncated(name));
            }
            modules.push(SnapshotModule {
                name,
                major,
                minor,
                data: data[pos..pos + len].to_vec(),
            });
            pos += len;
        }
        Ok(Self { modules })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        let mut drive = SnapshotModule::new("DRIVE", 1, 4);
        drive.write_u32(0xDEAD_BEEF);
        drive.write_u8(7);
        drive.write_u64(1 << 40);
        let mut cart = SnapshotModule::new("C64CART", 0, 1);
        cart.write_u16(0x8000);
        cart.write_bytes(b"abc");
        let mut snap = Snapshot::new();
        snap.push(drive);
        snap.push(cart);
        snap
    }

    #[test]
    fn container_round_trip() {
        let snap = sample();
        let bytes = snap.to_bytes();
        let back = Snapshot::from_bytes(&bytes).expect("valid");
        assert_eq!(back, snap);

        let drive = back.require("DRIVE").expect("valid");
        assert_eq!((drive.major(), drive.minor()), (1, 4));
        let mut r = drive.reader();
        assert_eq!(r.read_u32().expect("valid"), 0xDEAD_BEEF);
        assert_eq!(r.read_u8().expect("valid"), 7);
        assert_eq!(r.read_u64().expect("valid"), 1 << 40);
        assert_eq!(r.remaining(), 0);
        assert!(matches!(r.read_u8(), Err(SnapshotError::Truncated(_))));
    }

    #[test]
    fn push_replaces_same_name() {
        let mut snap = sample();
        snap.push(SnapshotModule::new("DRIVE", 1, 3));
        assert_eq!(snap.modules().len(), 2);
        assert_eq!(snap.require("DRIVE").expect("valid").minor(), 3);
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        assert_eq!(Snapshot::from_bytes(b"NOTASNAP\x01"), Err(SnapshotError::BadMagic));
        let bytes = sample().to_bytes();
        assert!(matches!(
            Snapshot::from_bytes(&bytes[..bytes.len() - 1]),
            Err(SnapshotError::Truncated(_))
        ));
    }

    #[test]
    fn missing_module() {
        assert_eq!(
            sample().require("CARTGEORAM"),
            Err(SnapshotError::MissingModule("CARTGEORAM".to_string()))
        );
    }

    #[test]
    fn version_checks() {
        let m = SnapshotModule::new("DRIVE", 1, 4);
        assert!(m.check_version(1, 2, 4).is_ok());
        assert!(m.check_version(1, 2, 3).is_ok());
        assert!(m.check_version(1, 5, 6).is_err());
        assert!(m.check_version(2, 0, 0).is_err());
    }
}
