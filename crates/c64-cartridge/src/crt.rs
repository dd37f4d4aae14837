//! CRT cartridge image parser.
//!
//! A CRT file is a 64-byte header naming the hardware type and the
//! initial EXROM/GAME levels, followed by CHIP packets that each carry one
//! ROM/RAM/flash chip image with its bank number and load address. All
//! multi-byte fields are big-endian.

use crate::{CartridgeError, CartridgeId};

const CRT_SIGNATURE: &[u8; 16] = b"C64 CARTRIDGE   ";
const CHIP_SIGNATURE: &[u8; 4] = b"CHIP";

const HEADER_SIZE: usize = 0x40;
const CHIP_HEADER_SIZE: usize = 0x10;

/// One CHIP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chip {
    /// 0 = ROM, 1 = RAM, 2 = flash.
    pub chip_type: u16,
    pub bank: u16,
    pub load_address: u16,
    pub data: Vec<u8>,
}

/// A parsed CRT file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrtImage {
    /// Hardware type from the header (0 = generic).
    pub hardware_type: u16,
    pub version: u16,
    /// EXROM asserted at power-up (header byte 0).
    pub exrom: bool,
    /// GAME asserted at power-up (header byte 0).
    pub game: bool,
    pub name: String,
    pub chips: Vec<Chip>,
}

fn read_be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from(data[offset]) << 8 | u16::from(data[offset + 1])
}

fn read_be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from(data[offset]) << 24
        | u32::from(data[offset + 1]) << 16
        | u32::from(data[offset + 2]) << 8
        | u32::from(data[offset + 3])
}

/// Parse a CRT file.
///
/// # Errors
///
/// Returns an error for a bad signature or header, truncated or malformed
/// CHIP packets, or a file without chips. The hardware type is not
/// checked here; see [`CrtImage::cartridge_id`].
pub fn parse_crt(data: &[u8]) -> Result<CrtImage, CartridgeError> {
    if data.len() < HEADER_SIZE {
        return Err(CartridgeError::Truncated("header"));
    }
    if &data[0..16] != CRT_SIGNATURE {
        return Err(CartridgeError::BadSignature);
    }

    // Some tools write 0x20 here even though the header is always 0x40.
    let header_len = read_be_u32(data, 0x10);
    if header_len < 0x20 || header_len as usize > data.len() {
        return Err(CartridgeError::BadHeaderLength(header_len));
    }
    let header_len = (header_len as usize).max(HEADER_SIZE);

    let name_bytes = &data[0x20..0x40];
    let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());

    let mut chips = Vec::new();
    let mut offset = header_len;
    while offset + CHIP_HEADER_SIZE <= data.len() {
        if &data[offset..offset + 4] != CHIP_SIGNATURE {
            return Err(CartridgeError::BadChip { offset });
        }
        let packet_len = read_be_u32(data, offset + 4) as usize;
        let size = usize::from(read_be_u16(data, offset + 0x0E));
        if packet_len < CHIP_HEADER_SIZE + size {
            return Err(CartridgeError::BadChip { offset });
        }
        let start = offset + CHIP_HEADER_SIZE;
        if start + size > data.len() {
            return Err(CartridgeError::Truncated("CHIP data"));
        }
        chips.push(Chip {
            chip_type: read_be_u16(data, offset + 0x08),
            bank: read_be_u16(data, offset + 0x0A),
            load_address: read_be_u16(data, offset + 0x0C),
            data: data[start..start + size].to_vec(),
        });
        offset = offset.saturating_add(packet_len);
    }

    if chips.is_empty() {
        return Err(CartridgeError::NoChips);
    }

    Ok(CrtImage {
        hardware_type: read_be_u16(data, 0x16),
        version: read_be_u16(data, 0x14),
        exrom: data[0x18] == 0,
        game: data[0x19] == 0,
        name: String::from_utf8_lossy(&name_bytes[..end]).trim().to_string(),
        chips,
    })
}

impl CrtImage {
    /// Device type for the header's hardware type.
    pub fn cartridge_id(&self) -> Result<CartridgeId, CartridgeError> {
        Ok(match self.hardware_type {
            0 => match (self.exrom, self.game) {
                (true, true) => CartridgeId::Generic16k,
                (false, true) => CartridgeId::Ultimax,
                _ => CartridgeId::Generic8k,
            },
            t => match CartridgeId::from_code(i32::from(t)) {
                Some(id) if id.code() > 0 => id,
                _ => return Err(CartridgeError::UnsupportedType(t)),
            },
        })
    }

    /// Copy every chip into `raw` at `bank * bank_size`, checking banks
    /// against `banks` and chip sizes against `bank_size`.
    pub(crate) fn flatten(&self, raw: &mut [u8], bank_size: usize, cartridge: &'static str) -> Result<(), CartridgeError> {
        let banks = raw.len() / bank_size;
        for chip in &self.chips {
            let bank = usize::from(chip.bank);
            if bank >= banks {
                return Err(CartridgeError::BankOutOfRange { bank: chip.bank, banks: banks as u16 });
            }
            if chip.data.len() > bank_size {
                return Err(CartridgeError::BadSize { cartridge, size: chip.data.len() });
            }
            let at = bank * bank_size;
            raw[at..at + chip.data.len()].copy_from_slice(&chip.data);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A minimal CRT header.
    pub(crate) fn make_crt_header(cart_type: u16, exrom: u8, game: u8) -> Vec<u8> {
        let mut header = Vec::new();
        header.extend_from_slice(CRT_SIGNATURE);
        header.extend_from_slice(&[0x00, 0x00, 0x00, 0x40]);
        header.extend_from_slice(&[0x01, 0x00]);
        header.extend_from_slice(&cart_type.to_be_bytes());
        header.push(exrom);
        header.push(game);
        header.extend_from_slice(&[0; 6]);
        let name = b"Test Cart";
        header.extend_from_slice(name);
        header.extend_from_slice(&vec![0u8; 32 - name.len()]);
        assert_eq!(header.len(), 64);
        header
    }

    pub(crate) fn make_chip(bank: u16, load_addr: u16, rom_data: &[u8]) -> Vec<u8> {
        let total_len = 0x10 + rom_data.len() as u32;
        let mut chip = Vec::new();
        chip.extend_from_slice(CHIP_SIGNATURE);
        chip.extend_from_slice(&total_len.to_be_bytes());
        chip.extend_from_slice(&[0x00, 0x00]);
        chip.extend_from_slice(&bank.to_be_bytes());
        chip.extend_from_slice(&load_addr.to_be_bytes());
        chip.extend_from_slice(&(rom_data.len() as u16).to_be_bytes());
        chip.extend_from_slice(rom_data);
        chip
    }

    #[test]
    fn parse_crt_normal_8k() {
        let mut crt = make_crt_header(0, 0, 1);
        crt.extend(make_chip(0, 0x8000, &[0xAA; 8192]));

        let image = parse_crt(&crt).expect("valid");
        assert!(image.exrom);
        assert!(!image.game);
        assert_eq!(image.name, "Test Cart");
        assert_eq!(image.chips.len(), 1);
        assert_eq!(image.chips[0].load_address, 0x8000);
        assert_eq!(image.chips[0].data.len(), 8192);
        assert_eq!(image.cartridge_id(), Ok(CartridgeId::Generic8k));
    }

    #[test]
    fn header_lines_select_generic_type() {
        let mut crt = make_crt_header(0, 0, 0);
        crt.extend(make_chip(0, 0x8000, &[0; 0x4000]));
        assert_eq!(parse_crt(&crt).expect("valid").cartridge_id(), Ok(CartridgeId::Generic16k));

        let mut crt = make_crt_header(0, 1, 0);
        crt.extend(make_chip(0, 0xE000, &[0; 0x2000]));
        assert_eq!(parse_crt(&crt).expect("valid").cartridge_id(), Ok(CartridgeId::Ultimax));
    }

    #[test]
    fn hardware_types_map_to_devices() {
        let mut crt = make_crt_header(36, 0, 1);
        crt.extend(make_chip(0, 0x8000, &[0; 0x2000]));
        assert_eq!(parse_crt(&crt).expect("valid").cartridge_id(), Ok(CartridgeId::RetroReplay));

        let mut crt = make_crt_header(99, 0, 0);
        crt.extend(make_chip(0, 0x8000, &[0; 0x2000]));
        assert_eq!(
            parse_crt(&crt).expect("valid").cartridge_id(),
            Err(CartridgeError::UnsupportedType(99))
        );
    }

    #[test]
    fn parse_crt_bad_signature() {
        let mut data = vec![0u8; 64];
        data[0..16].copy_from_slice(b"NOT A CARTRIDGE!");
        assert_eq!(parse_crt(&data), Err(CartridgeError::BadSignature));
    }

    #[test]
    fn parse_crt_too_short() {
        assert_eq!(parse_crt(&[0; 10]), Err(CartridgeError::Truncated("header")));
    }

    #[test]
    fn parse_crt_without_chips() {
        let crt = make_crt_header(0, 0, 1);
        assert_eq!(parse_crt(&crt), Err(CartridgeError::NoChips));
    }

    #[test]
    fn truncated_chip_data_is_rejected() {
        let mut crt = make_crt_header(0, 0, 1);
        let mut chip = make_chip(0, 0x8000, &[0xAA; 8192]);
        chip.truncate(0x10 + 100);
        crt.extend(chip);
        assert_eq!(parse_crt(&crt), Err(CartridgeError::Truncated("CHIP data")));
    }

    #[test]
    fn garbage_after_header_is_rejected() {
        let mut crt = make_crt_header(0, 0, 1);
        crt.extend_from_slice(b"JUNKJUNKJUNKJUNK");
        assert_eq!(parse_crt(&crt), Err(CartridgeError::BadChip { offset: 0x40 }));
    }

    #[test]
    fn flatten_checks_banks() {
        let mut crt = make_crt_header(36, 0, 1);
        crt.extend(make_chip(0, 0x8000, &[1; 0x2000]));
        crt.extend(make_chip(3, 0x8000, &[4; 0x2000]));
        let image = parse_crt(&crt).expect("valid");

        let mut raw = vec![0u8; 4 * 0x2000];
        image.flatten(&mut raw, 0x2000, "test").expect("valid");
        assert_eq!(raw[0], 1);
        assert_eq!(raw[3 * 0x2000], 4);

        let mut small = vec![0u8; 2 * 0x2000];
        assert_eq!(
            image.flatten(&mut small, 0x2000, "test"),
            Err(CartridgeError::BankOutOfRange { bank: 3, banks: 2 })
        );
    }
}
