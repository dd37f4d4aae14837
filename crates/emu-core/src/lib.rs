//! Core types shared by the disk drive and cartridge crates.
//!
//! Two concerns live here: read-only state inspection ([`Observable`]) and
//! the versioned module framing used by machine snapshots ([`Snapshot`]).

mod observable;
mod snapshot;

pub use observable::{Observable, Value};
pub use snapshot::{ModuleReader, Snapshot, SnapshotError, SnapshotModule, MODULE_NAME_LEN};
