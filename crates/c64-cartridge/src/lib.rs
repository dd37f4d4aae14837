//! C64 expansion port.
//!
//! Several cartridges can be plugged in at once, stacked the way the real
//! pass-through adapters stack them:
//!
//! - slot 0 (IEEE-488, Magic Voice, MMC64) sits closest to the CPU and may
//!   rewrite the GAME/EXROM lines coming from behind it;
//! - slot 1 (Expert, ISEPIC, DQBB, RamCart) is the freezer/RAM slot;
//! - I/O devices (REU, GEO-RAM) only decode $DE00-$DFFF;
//! - the main slot holds the game or freezer cartridge.
//!
//! The machine calls [`ExpansionPort`] for every access to cartridge
//! space; the port asks each device in order and falls back to the C64's
//! own memory through the [`Host`] trait.

mod config;
mod crt;
mod device;
pub mod devices;
mod error;
mod export;
mod host;
mod memptr;
mod port;
mod snapshot;
mod tpi;

pub use config::{CartridgeConfig, GeoRamConfig, RamCartConfig, ReuConfig};
pub use crt::{parse_crt, Chip, CrtImage};
pub use device::{CartridgeDevice, CartridgeId, MmuWindow, PortBus, PortView, ReadResult, Slot, Translation};
pub use error::CartridgeError;
pub use export::{
    recompute, ExportLines, CMODE_16KGAME, CMODE_8KGAME, CMODE_BANK_MASK, CMODE_BANK_SHIFT, CMODE_EXPORT_RAM,
    CMODE_PHI2_RAM, CMODE_RAM, CMODE_READ, CMODE_RELEASE_FREEZE, CMODE_TRIGGER_FREEZE_NMI_ONLY, CMODE_ULTIMAX,
    CMODE_WRITE,
};
pub use host::{Host, RamHost};
pub use port::ExpansionPort;
pub use snapshot::CARTRIDGE_SNAPSHOT_NAME;
