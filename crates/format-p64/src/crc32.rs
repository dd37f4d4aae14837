//! Nibble-table CRC-32 (reflected polynomial 0xEDB88320).

const TABLE: [u32; 16] = [
    0x0000_0000, 0x1DB7_1064, 0x3B6E_20C8, 0x26D9_30AC,
    0x76DC_4190, 0x6B6B_51F4, 0x4DB2_6158, 0x5005_713C,
    0xEDB8_8320, 0xF00F_9344, 0xD6D6_A3E8, 0xCB61_B38C,
    0x9B64_C2B0, 0x86D3_D2D4, 0xA00A_E278, 0xBDBD_F21C,
];

/// CRC-32 of `data`; an empty slice checks to 0.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    if data.is_empty() {
        return 0;
    }
    let mut value = !0u32;
    for &byte in data {
        value ^= u32::from(byte);
        value = TABLE[(value & 0xF) as usize] ^ (value >> 4);
        value = TABLE[(value & 0xF) as usize] ^ (value >> 4);
    }
    !value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(crc32(&[]), 0);
    }
}
