//! Adaptive binary range coder and the pulse-stream context models.
//!
//! Probabilities are 12-bit (initially 2048) and adapt by 1/16 of the
//! remaining distance after every coded bit.

const PROBABILITY_INIT: u32 = 2048;
const ADAPT_SHIFT: u32 = 4;

pub(crate) const MODEL_POSITION: usize = 0;
pub(crate) const MODEL_STRENGTH: usize = 4;
pub(crate) const MODEL_POSITION_FLAG: usize = 8;
pub(crate) const MODEL_STRENGTH_FLAG: usize = 9;

/// Probability slots per model: four byte models each for position deltas
/// and strength deltas, then the two flag models.
const MODEL_SIZES: [usize; 10] = [65536, 65536, 65536, 65536, 65536, 65536, 65536, 65536, 4, 4];

fn split(low: u32, high: u32, probability: u32) -> u32 {
    low.wrapping_add((high.wrapping_sub(low) >> 12).wrapping_mul(probability))
}

fn adapt(probability: &mut u32, bit: bool) {
    if bit {
        *probability += (0xFFF - *probability) >> ADAPT_SHIFT;
    } else {
        *probability -= *probability >> ADAPT_SHIFT;
    }
}

pub(crate) struct RangeEncoder {
    low: u32,
    high: u32,
    out: Vec<u8>,
}

impl RangeEncoder {
    pub(crate) fn new() -> Self {
        Self {
            low: 0,
            high: 0xFFFF_FFFF,
            out: Vec::new(),
        }
    }

    pub(crate) fn encode_bit(&mut self, probability: &mut u32, bit: bool) -> bool {
        let mid = split(self.low, self.high, *probability);
        adapt(probability, bit);
        if bit {
            self.high = mid;
        } else {
            self.low = mid.wrapping_add(1);
        }
        while (self.low ^ self.high) & 0xFF00_0000 == 0 {
            self.out.push((self.high >> 24) as u8);
            self.low <<= 8;
            self.high = (self.high << 8) | 0xFF;
        }
        bit
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        for _ in 0..4 {
            self.out.push((self.high >> 24) as u8);
            self.high <<= 8;
        }
        self.out
    }
}

pub(crate) struct RangeDecoder<'a> {
    code: u32,
    low: u32,
    high: u32,
    input: &'a [u8],
    pos: usize,
}

impl<'a> RangeDecoder<'a> {
    pub(crate) fn new(input: &'a [u8]) -> Self {
        let mut decoder = Self {
            code: 0,
            low: 0,
            high: 0xFFFF_FFFF,
            input,
            pos: 0,
        };
        for _ in 0..4 {
            decoder.code = (decoder.code << 8) | u32::from(decoder.next_byte());
        }
        decoder
    }

    /// Reads past the end yield zero.
    fn next_byte(&mut self) -> u8 {
        let byte = self.input.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        byte
    }

    pub(crate) fn decode_bit(&mut self, probability: &mut u32) -> bool {
        let mid = split(self.low, self.high, *probability);
        let bit = self.code <= mid;
        adapt(probability, bit);
        if bit {
            self.high = mid;
        } else {
            self.low = mid.wrapping_add(1);
        }
        while (self.low ^ self.high) & 0xFF00_0000 == 0 {
            self.low <<= 8;
            self.high = (self.high << 8) | 0xFF;
            self.code = (self.code << 8) | u32::from(self.next_byte());
        }
        bit
    }
}

/// Probability tables plus the per-model context (last bit or last byte).
pub(crate) struct Models {
    probabilities: Vec<u32>,
    offsets: [usize; 10],
    states: [u32; 10],
}

impl Models {
    pub(crate) fn new() -> Self {
        let mut offsets = [0usize; 10];
        let mut total = 0;
        for (offset, size) in offsets.iter_mut().zip(MODEL_SIZES) {
            *offset = total;
            total += size;
        }
        Self {
            probabilities: vec![PROBABILITY_INIT; total],
            offsets,
            states: [0; 10],
        }
    }

    fn flag_slot(&self, model: usize) -> usize {
        self.offsets[model] + self.states[model] as usize
    }

    fn byte_slot(&self, model: usize, context: u32) -> usize {
        self.offsets[model] + (((self.states[model] << 8) | context) & 0xFFFF) as usize
    }

    pub(crate) fn encode_flag(&mut self, encoder: &mut RangeEncoder, model: usize, bit: bool) {
        let slot = self.flag_slot(model);
        encoder.encode_bit(&mut self.probabilities[slot], bit);
        self.states[model] = u32::from(bit);
    }

    pub(crate) fn decode_flag(&mut self, decoder: &mut RangeDecoder<'_>, model: usize) -> bool {
        let slot = self.flag_slot(model);
        let bit = decoder.decode_bit(&mut self.probabilities[slot]);
        self.states[model] = u32::from(bit);
        bit
    }

    /// Code a 32-bit value as four bytes, least significant first, each
    /// byte conditioned on the previous byte coded by the same model.
    pub(crate) fn encode_dword(&mut self, encoder: &mut RangeEncoder, model: usize, value: u32) {
        for byte_index in 0..4 {
            let m = model + byte_index;
            let byte = (value >> (byte_index * 8)) & 0xFF;
            let mut context = 1u32;
            for bit in (0..8).rev() {
                let slot = self.byte_slot(m, context);
                let coded = encoder.encode_bit(&mut self.probabilities[slot], (byte >> bit) & 1 != 0);
                context = (context << 1) | u32::from(coded);
            }
            self.states[m] = byte;
        }
    }

    pub(crate) fn decode_dword(&mut self, decoder: &mut RangeDecoder<'_>, model: usize) -> u32 {
        let mut value = 0u32;
        for byte_index in 0..4 {
            let m = model + byte_index;
            let mut context = 1u32;
            for _ in 0..8 {
                let slot = self.byte_slot(m, context);
                let bit = decoder.decode_bit(&mut self.probabilities[slot]);
                context = (context << 1) | u32::from(bit);
            }
            let byte = context & 0xFF;
            self.states[m] = byte;
            value |= byte << (byte_index * 8);
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip_with_adaptation() {
        let bits: Vec<bool> = (0..500).map(|i| i % 7 == 0 || i % 11 == 3).collect();
        let mut encoder = RangeEncoder::new();
        let mut p = PROBABILITY_INIT;
        for &b in &bits {
            encoder.encode_bit(&mut p, b);
        }
        let bytes = encoder.finish();

        let mut decoder = RangeDecoder::new(&bytes);
        let mut q = PROBABILITY_INIT;
        let decoded: Vec<bool> = bits.iter().map(|_| decoder.decode_bit(&mut q)).collect();
        assert_eq!(decoded, bits);
        assert_eq!(p, q);
    }

    #[test]
    fn models_code_flags_and_dwords() {
        let values = [0u32, 1, 0xFFFF_FFFF, 3_199_999, 160, 160];
        let mut models = Models::new();
        let mut encoder = RangeEncoder::new();
        for (i, &v) in values.iter().enumerate() {
            models.encode_flag(&mut encoder, MODEL_POSITION_FLAG, i % 2 == 0);
            models.encode_dword(&mut encoder, MODEL_POSITION, v);
        }
        let bytes = encoder.finish();

        let mut models = Models::new();
        let mut decoder = RangeDecoder::new(&bytes);
        for (i, &v) in values.iter().enumerate() {
            assert_eq!(models.decode_flag(&mut decoder, MODEL_POSITION_FLAG), i % 2 == 0);
            assert_eq!(models.decode_dword(&mut decoder, MODEL_POSITION), v);
        }
    }
}
