//! Per-device settings used when a cartridge is attached or enabled.

use crate::devices::{ExpertMode, Mmc64Config, RamCartSize, RetroReplayConfig};

/// REU model, by RAM size in KiB (128 = 1700, 256 = 1764, 512 = 1750,
/// larger sizes are 1750XL-style expansions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReuConfig {
    pub size_kb: u32,
}

impl Default for ReuConfig {
    fn default() -> Self {
        Self { size_kb: 512 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoRamConfig {
    pub size_kb: u32,
}

impl Default for GeoRamConfig {
    fn default() -> Self {
        Self { size_kb: 512 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RamCartConfig {
    pub size: RamCartSize,
    /// Write-protect switch; on a 128 KiB unit it also maps the boot page.
    pub readonly: bool,
}

/// Settings for every device type, in one place for front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CartridgeConfig {
    pub expert_mode: ExpertMode,
    /// Isepic switch towards the computer.
    pub isepic_switch: bool,
    pub ramcart: RamCartConfig,
    pub georam: GeoRamConfig,
    pub reu: ReuConfig,
    pub retro_replay: RetroReplayConfig,
    pub mmc64: Mmc64Config,
}
