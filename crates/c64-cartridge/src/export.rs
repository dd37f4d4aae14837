//! GAME/EXROM export lines and the mode bytes devices use to drive them.
//!
//! A mode byte packs the requested memory configuration in bits 0-1
//! (`CMODE_8KGAME` .. `CMODE_ULTIMAX`) and, for the main slot, the ROM
//! bank in bits 2-7. `game` and `exrom` below are "asserted" flags, not
//! line levels: 8K game mode asserts EXROM only, Ultimax asserts GAME only.

pub const CMODE_8KGAME: u8 = 0;
pub const CMODE_16KGAME: u8 = 1;
pub const CMODE_RAM: u8 = 2;
pub const CMODE_ULTIMAX: u8 = 3;

pub const CMODE_BANK_SHIFT: u8 = 2;
pub const CMODE_BANK_MASK: u8 = 0x3f;

/// Flags passed alongside a mode change.
pub const CMODE_READ: u8 = 0x00;
/// The change was caused by a CPU write (pending alarms run one cycle later).
pub const CMODE_WRITE: u8 = 0x01;
/// Release the freeze NMI after switching.
pub const CMODE_RELEASE_FREEZE: u8 = 0x02;
/// RAM instead of ROM at $E000 for the VIC in Ultimax mode.
pub const CMODE_PHI2_RAM: u8 = 0x04;
/// Cartridge RAM instead of ROM at ROML (main slot only).
pub const CMODE_EXPORT_RAM: u8 = 0x08;
/// Assert the freeze NMI after switching.
pub const CMODE_TRIGGER_FREEZE_NMI_ONLY: u8 = 0x10;

/// State of the export lines seen by the PLA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExportLines {
    pub game: bool,
    pub exrom: bool,
    /// Ultimax mapping during the VIC half of the cycle.
    pub ultimax_phi1: bool,
    /// Ultimax mapping during the CPU half of the cycle.
    pub ultimax_phi2: bool,
}

impl ExportLines {
    /// Nothing asserted: the plain C64 memory map.
    pub const NONE: Self = Self {
        game: false,
        exrom: false,
        ultimax_phi1: false,
        ultimax_phi2: false,
    };

    /// Lines driven by a slot 1 or main slot device for a mode pair.
    #[must_use]
    pub fn from_mode(mode_phi1: u8, mode_phi2: u8, flags: u8) -> Self {
        let game = mode_phi2 & 1 != 0;
        let exrom = (mode_phi2 >> 1) & 1 == 0;
        Self {
            game,
            exrom,
            ultimax_phi1: mode_phi1 & 3 == CMODE_ULTIMAX,
            ultimax_phi2: game && !exrom && flags & CMODE_PHI2_RAM == 0,
        }
    }

    /// Lines driven by a slot 0 device, which sits between everything
    /// else and the CPU.
    #[must_use]
    pub fn from_slot0_mode(mode_phi1: u8, mode_phi2: u8) -> Self {
        Self {
            game: mode_phi2 & 1 != 0,
            exrom: (mode_phi2 >> 1) & 1 == 0,
            ultimax_phi1: mode_phi1 & 3 == CMODE_ULTIMAX,
            ultimax_phi2: mode_phi2 & 3 == CMODE_ULTIMAX,
        }
    }

    /// Mode bits (`CMODE_8KGAME` .. `CMODE_ULTIMAX`) these lines select.
    #[must_use]
    pub fn mode(&self) -> u8 {
        u8::from(self.game) | (u8::from(!self.exrom) << 1)
    }

    #[must_use]
    pub fn is_ultimax(&self) -> bool {
        self.game && !self.exrom
    }

    #[must_use]
    pub fn is_16k(&self) -> bool {
        self.game && self.exrom
    }

    #[must_use]
    pub fn is_8k(&self) -> bool {
        !self.game && self.exrom
    }

    fn union(self, other: Self) -> Self {
        Self {
            game: self.game | other.game,
            exrom: self.exrom | other.exrom,
            ultimax_phi1: self.ultimax_phi1 | other.ultimax_phi1,
            ultimax_phi2: self.ultimax_phi2 | other.ultimax_phi2,
        }
    }

    pub(crate) fn to_bytes(self) -> [u8; 4] {
        [
            u8::from(self.game),
            u8::from(self.exrom),
            u8::from(self.ultimax_phi1),
            u8::from(self.ultimax_phi2),
        ]
    }

    pub(crate) fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            game: bytes[0] != 0,
            exrom: bytes[1] != 0,
            ultimax_phi1: bytes[2] != 0,
            ultimax_phi2: bytes[3] != 0,
        }
    }
}

/// Lines seen past slot 1 and the main slot: the wired-OR of whatever is
/// attached. Slot 0 may still override the result on its way to the CPU.
#[must_use]
pub fn recompute(slot1: Option<ExportLines>, main: Option<ExportLines>) -> ExportLines {
    [slot1, main]
        .into_iter()
        .flatten()
        .fold(ExportLines::NONE, ExportLines::union)
}
