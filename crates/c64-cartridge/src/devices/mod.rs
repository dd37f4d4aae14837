//! Cartridge devices, and constructors keyed by [`CartridgeId`].

mod dqbb;
mod expert;
mod generic;
mod georam;
mod ieee488;
mod isepic;
mod magicvoice;
mod mmc64;
mod ramcart;
mod retroreplay;
mod reu;

pub use dqbb::{Dqbb, DQBB_RAM_SIZE};
pub use expert::{Expert, ExpertMode, EXPERT_RAM_SIZE};
pub use generic::Generic;
pub use georam::{GeoRam, GEORAM_SIZES_KB};
pub use ieee488::{Ieee488, IEEE488_ROM_SIZE};
pub use isepic::{Isepic, ISEPIC_RAM_SIZE};
pub use magicvoice::{MagicVoice, MAGIC_VOICE_ROM_SIZE};
pub use mmc64::{Mmc64, Mmc64Config, MMC64_BIOS_SIZE};
pub use ramcart::{RamCart, RamCartSize};
pub use retroreplay::{RetroReplay, RetroReplayConfig, RR_FLASH_SIZE, RR_RAM_SIZE};
pub use reu::{Reu, REU_SIZES_KB};

use crate::config::CartridgeConfig;
use crate::device::CartridgeDevice;
use crate::{CartridgeError, CartridgeId, CrtImage};

pub(crate) type BoxedDevice = Box<dyn CartridgeDevice>;

fn boxed<D: CartridgeDevice + 'static>(device: D) -> BoxedDevice {
    Box::new(device)
}

/// Build a device from a raw image (no CRT header).
pub fn from_bin(id: CartridgeId, data: &[u8], config: &CartridgeConfig) -> Result<BoxedDevice, CartridgeError> {
    Ok(match id {
        CartridgeId::Generic8k => boxed(Generic::new_8k(data)?),
        CartridgeId::Generic16k => boxed(Generic::new_16k(data)?),
        CartridgeId::Ultimax => boxed(Generic::new_ultimax(data)?),
        CartridgeId::Expert => boxed(Expert::from_bin(data)?),
        CartridgeId::RetroReplay => boxed(RetroReplay::from_bin(data, config.retro_replay)?),
        CartridgeId::Mmc64 => boxed(Mmc64::from_bin(data, config.mmc64)?),
        CartridgeId::Ieee488 => boxed(Ieee488::from_bin(data)?),
        CartridgeId::MagicVoice => boxed(MagicVoice::from_bin(data)?),
        CartridgeId::Dqbb => boxed(Dqbb::from_bin(data)?),
        CartridgeId::GeoRam => boxed(GeoRam::from_bin(data)?),
        CartridgeId::Isepic => boxed(Isepic::from_bin(data)?),
        CartridgeId::RamCart => {
            let mut ramcart = RamCart::from_bin(data)?;
            ramcart.set_readonly(config.ramcart.readonly);
            boxed(ramcart)
        }
        CartridgeId::Reu => boxed(Reu::from_bin(data)?),
        CartridgeId::None | CartridgeId::Crt => return Err(CartridgeError::NotAttachable(id)),
    })
}

/// Build a device from a parsed CRT file; the header picks the type.
pub fn from_crt(image: &CrtImage, config: &CartridgeConfig) -> Result<BoxedDevice, CartridgeError> {
    let id = image.cartridge_id()?;
    Ok(match id {
        CartridgeId::Generic8k | CartridgeId::Generic16k | CartridgeId::Ultimax => boxed(Generic::from_crt(image)?),
        CartridgeId::Expert => boxed(Expert::from_crt(image)?),
        CartridgeId::RetroReplay => boxed(RetroReplay::from_crt(image, config.retro_replay)?),
        CartridgeId::Mmc64 => boxed(Mmc64::from_crt(image, config.mmc64)?),
        CartridgeId::Ieee488 => boxed(Ieee488::from_crt(image)?),
        CartridgeId::MagicVoice => boxed(MagicVoice::from_crt(image)?),
        CartridgeId::Dqbb => boxed(Dqbb::from_crt(image)?),
        CartridgeId::Isepic => boxed(Isepic::from_crt(image)?),
        CartridgeId::RamCart => boxed(RamCart::from_crt(image)?),
        CartridgeId::GeoRam | CartridgeId::Reu | CartridgeId::None | CartridgeId::Crt => {
            return Err(CartridgeError::UnsupportedType(image.hardware_type));
        }
    })
}

/// Build a RAM-only device without an image.
pub fn enable(id: CartridgeId, config: &CartridgeConfig) -> Result<BoxedDevice, CartridgeError> {
    Ok(match id {
        CartridgeId::Expert => boxed(Expert::new(config.expert_mode)),
        CartridgeId::Dqbb => boxed(Dqbb::new()),
        CartridgeId::Isepic => boxed(Isepic::new(config.isepic_switch)),
        CartridgeId::RamCart => boxed(RamCart::new(config.ramcart.size, config.ramcart.readonly)),
        CartridgeId::GeoRam => boxed(GeoRam::new(config.georam.size_kb)?),
        CartridgeId::Reu => boxed(Reu::new(config.reu.size_kb)?),
        _ => return Err(CartridgeError::NotAttachable(id)),
    })
}

/// An empty device of type `id`, for restoring a snapshot into.
pub(crate) fn blank(id: CartridgeId) -> Option<BoxedDevice> {
    let config = CartridgeConfig::default();
    match id {
        CartridgeId::Generic8k => Generic::new_8k(&[0; 0x2000]).ok().map(boxed),
        CartridgeId::Generic16k => Generic::new_16k(&[0; 0x4000]).ok().map(boxed),
        CartridgeId::Ultimax => Generic::new_ultimax(&[0; 0x2000]).ok().map(boxed),
        CartridgeId::RetroReplay => RetroReplay::from_bin(&[0; 0x10000], config.retro_replay).ok().map(boxed),
        CartridgeId::Mmc64 => Mmc64::from_bin(&[0; MMC64_BIOS_SIZE], config.mmc64).ok().map(boxed),
        CartridgeId::Ieee488 => Ieee488::from_bin(&[0; IEEE488_ROM_SIZE]).ok().map(boxed),
        CartridgeId::MagicVoice => MagicVoice::from_bin(&[0; MAGIC_VOICE_ROM_SIZE]).ok().map(boxed),
        CartridgeId::None | CartridgeId::Crt => None,
        _ => enable(id, &config).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crt::tests::{make_chip, make_crt_header};
    use crate::parse_crt;

    #[test]
    fn bin_attach_checks_sizes() {
        let config = CartridgeConfig::default();
        assert!(from_bin(CartridgeId::Generic8k, &[0; 0x2000], &config).is_ok());
        assert!(matches!(
            from_bin(CartridgeId::Generic16k, &[0; 0x2000], &config),
            Err(CartridgeError::BadSize { .. })
        ));
        assert!(matches!(
            from_bin(CartridgeId::Crt, &[0; 0x2000], &config),
            Err(CartridgeError::NotAttachable(CartridgeId::Crt))
        ));
    }

    #[test]
    fn crt_header_picks_the_device() {
        let config = CartridgeConfig::default();
        let mut crt = make_crt_header(6, 1, 1);
        crt.extend(make_chip(0, 0x8000, &[0; 0x2000]));
        let device = from_crt(&parse_crt(&crt).expect("valid"), &config).expect("valid");
        assert_eq!(device.id(), CartridgeId::Expert);

        let mut crt = make_crt_header(41, 1, 1);
        crt.extend(make_chip(0, 0x8000, &[0; 0x2000]));
        let err = from_crt(&parse_crt(&crt).expect("valid"), &config).err();
        assert!(matches!(err, Some(CartridgeError::BadSize { .. })));

        // Known to the CRT format, but no device here.
        let mut crt = make_crt_header(32, 0, 1);
        crt.extend(make_chip(0, 0x8000, &[0; 0x2000]));
        let err = from_crt(&parse_crt(&crt).expect("valid"), &config).err();
        assert_eq!(err, Some(CartridgeError::UnsupportedType(32)));
    }

    #[test]
    fn only_ram_devices_can_be_enabled() {
        let config = CartridgeConfig::default();
        assert_eq!(enable(CartridgeId::Reu, &config).expect("valid").id(), CartridgeId::Reu);
        assert_eq!(enable(CartridgeId::Isepic, &config).expect("valid").id(), CartridgeId::Isepic);
        assert!(matches!(
            enable(CartridgeId::RetroReplay, &config),
            Err(CartridgeError::NotAttachable(CartridgeId::RetroReplay))
        ));
    }

    #[test]
    fn every_attachable_type_has_a_blank() {
        for code in [-3, -2, -6, 6, 36, 37, 41, 49, -101, -102, -103, -104, -105] {
            let id = CartridgeId::from_code(code).expect("valid");
            assert_eq!(blank(id).expect("valid").id(), id);
        }
        assert!(blank(CartridgeId::Crt).is_none());
    }
}
