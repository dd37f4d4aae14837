//! Drive configuration.

/// Drive models that share the 1541-style GCR mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DriveType {
    None,
    D1540,
    #[default]
    D1541,
    D1541II,
    D1551,
    D1570,
    D1571,
    D1571Cr,
    D1581,
    D2031,
}

impl DriveType {
    /// Last half-track the stepper can reach, if the model limits it.
    #[must_use]
    pub fn max_half_track(self) -> Option<u32> {
        match self {
            Self::D1540
            | Self::D1541
            | Self::D1541II
            | Self::D1551
            | Self::D1570
            | Self::D1571
            | Self::D1571Cr
            | Self::D2031 => Some(84),
            Self::None | Self::D1581 => None,
        }
    }

    /// Drives with a second head.
    #[must_use]
    pub fn is_double_sided(self) -> bool {
        matches!(self, Self::D1570 | Self::D1571 | Self::D1571Cr)
    }

    /// CPU clock in MHz after power-on.
    #[must_use]
    pub fn default_clock_frequency(self) -> u8 {
        match self {
            Self::D1571 | Self::D1571Cr | Self::D1581 => 2,
            _ => 1,
        }
    }

    /// Numeric code stored in snapshots.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::None => 0,
            Self::D1540 => 1540,
            Self::D1541 => 1541,
            Self::D1541II => 1542,
            Self::D1551 => 1551,
            Self::D1570 => 1570,
            Self::D1571 => 1571,
            Self::D1571Cr => 1573,
            Self::D1581 => 1581,
            Self::D2031 => 2031,
        }
    }

    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::None,
            1540 => Self::D1540,
            1541 => Self::D1541,
            1542 => Self::D1541II,
            1551 => Self::D1551,
            1570 => Self::D1570,
            1571 => Self::D1571,
            1573 => Self::D1571Cr,
            1581 => Self::D1581,
            2031 => Self::D2031,
            _ => return None,
        })
    }
}

/// What to do when the DOS writes past the last track of a sector image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExtendPolicy {
    /// Drop the write.
    #[default]
    Never,
    /// Ask once per attached image through an [`crate::ExtendPrompt`].
    Ask,
    /// Extend silently.
    OnAccess,
}

impl ExtendPolicy {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Never => 0,
            Self::Ask => 1,
            Self::OnAccess => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Never),
            1 => Some(Self::Ask),
            2 => Some(Self::OnAccess),
            _ => None,
        }
    }
}

/// Configuration for one drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriveConfig {
    pub drive_type: DriveType,
    /// CPU clock in MHz: 1, or 2 for the 1571/1581 fast mode.
    pub clock_frequency: u8,
    pub extend_policy: ExtendPolicy,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self::for_type(DriveType::default())
    }
}

impl DriveConfig {
    /// Defaults for a drive model.
    #[must_use]
    pub fn for_type(drive_type: DriveType) -> Self {
        Self {
            drive_type,
            clock_frequency: drive_type.default_clock_frequency(),
            extend_policy: ExtendPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_round_trip() {
        for t in [
            DriveType::None,
            DriveType::D1540,
            DriveType::D1541,
            DriveType::D1541II,
            DriveType::D1551,
            DriveType::D1570,
            DriveType::D1571,
            DriveType::D1571Cr,
            DriveType::D1581,
            DriveType::D2031,
        ] {
            assert_eq!(DriveType::from_code(t.code()), Some(t));
        }
        assert_eq!(DriveType::from_code(9999), None);
    }

    #[test]
    fn defaults_follow_model() {
        assert_eq!(DriveConfig::default().clock_frequency, 1);
        assert_eq!(DriveConfig::for_type(DriveType::D1571).clock_frequency, 2);
        assert_eq!(DriveType::D1541.max_half_track(), Some(84));
        assert_eq!(DriveType::D1581.max_half_track(), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_serde_round_trip() {
        let config = DriveConfig {
            extend_policy: ExtendPolicy::Ask,
            ..DriveConfig::for_type(DriveType::D1571)
        };
        let json = serde_json::to_string(&config).expect("valid");
        let back: DriveConfig = serde_json::from_str(&json).expect("valid");
        assert_eq!(back, config);
    }
}
