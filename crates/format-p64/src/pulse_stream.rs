//! One half-track of flux pulses.
//!
//! Pulses live in a slot vector and are chained in ascending position
//! order by index links. Freed slots go on a free list and are reused.
//! A cursor remembers the last pulse touched so that the sequential access
//! pattern of a rotating head stays cheap.

use crate::range_coder::{
    Models, RangeDecoder, RangeEncoder, MODEL_POSITION, MODEL_POSITION_FLAG, MODEL_STRENGTH,
    MODEL_STRENGTH_FLAG,
};
use crate::{P64Error, FULL_STRENGTH, POSITIONS_PER_ROTATION};

/// Headroom subtracted after a detected pulse when sampling to GCR
/// (20 positions = 1.25 µs).
const SAMPLE_HEADROOM: u32 = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pulse {
    previous: Option<u32>,
    next: Option<u32>,
    position: u32,
    strength: u32,
}

impl Pulse {
    #[must_use]
    pub fn previous(&self) -> Option<u32> {
        self.previous
    }

    #[must_use]
    pub fn next(&self) -> Option<u32> {
        self.next
    }

    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    #[must_use]
    pub fn strength(&self) -> u32 {
        self.strength
    }
}

#[derive(Debug, Clone, Default)]
pub struct PulseStream {
    pulses: Vec<Pulse>,
    first: Option<u32>,
    last: Option<u32>,
    free: Option<u32>,
    current: Option<u32>,
}

/// Two streams are equal when they hold the same pulses, whatever their
/// slot layout or cursor.
impl PartialEq for PulseStream {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for PulseStream {}

impl PulseStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// The pulse in slot `index`. Indices come from [`PulseStream::first`],
    /// [`PulseStream::current`] and the pulse links.
    #[must_use]
    pub fn pulse(&self, index: u32) -> &Pulse {
        &self.pulses[index as usize]
    }

    #[must_use]
    pub fn first(&self) -> Option<u32> {
        self.first
    }

    #[must_use]
    pub fn last(&self) -> Option<u32> {
        self.last
    }

    #[must_use]
    pub fn current(&self) -> Option<u32> {
        self.current
    }

    pub fn set_current(&mut self, index: Option<u32>) {
        self.current = index;
    }

    /// `(position, strength)` of every pulse in ascending position order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        std::iter::successors(self.first, |&i| self.pulses[i as usize].next)
            .map(|i| (self.pulses[i as usize].position, self.pulses[i as usize].strength))
    }

    /// Number of pulses in the stream.
    #[must_use]
    pub fn pulse_count(&self) -> usize {
        self.iter().count()
    }

    fn allocate(&mut self) -> u32 {
        match self.free {
            Some(index) => {
                self.free = self.pulses[index as usize].next;
                self.pulses[index as usize] = Pulse::default();
                index
            }
            None => {
                self.pulses.push(Pulse::default());
                (self.pulses.len() - 1) as u32
            }
        }
    }

    /// Unlink a pulse and put its slot on the free list. A cursor on the
    /// freed pulse moves to its successor.
    pub fn free_pulse(&mut self, index: u32) {
        let Pulse { previous, next, .. } = self.pulses[index as usize];
        if self.current == Some(index) {
            self.current = next;
        }
        match previous {
            Some(p) => self.pulses[p as usize].next = next,
            None => self.first = next,
        }
        match next {
            Some(n) => self.pulses[n as usize].previous = previous,
            None => self.last = previous,
        }
        self.pulses[index as usize].previous = None;
        self.pulses[index as usize].next = self.free;
        self.free = Some(index);
    }

    /// First pulse at or after `position`, starting from the cursor when
    /// that is safe and from the head of the list otherwise.
    fn find_from_cursor(&self, position: u32) -> Option<u32> {
        let mut cur = self.current;
        let rewind = match cur {
            None => true,
            Some(c) => {
                cur != self.first
                    && self.pulses[c as usize]
                        .previous
                        .is_some_and(|p| self.pulses[p as usize].position >= position)
            }
        };
        if rewind {
            cur = self.first;
        }
        while let Some(c) = cur {
            if self.pulses[c as usize].position >= position {
                break;
            }
            cur = self.pulses[c as usize].next;
        }
        cur
    }

    /// Insert a pulse, or overwrite the strength of one already at
    /// `position`. Leaves the cursor on it and returns its slot.
    pub fn add_pulse(&mut self, position: u32, strength: u32) -> u32 {
        let position = position % POSITIONS_PER_ROTATION;
        let at = match self.last {
            Some(last) if self.pulses[last as usize].position < position => None,
            _ => self.find_from_cursor(position),
        };
        let index = match at {
            None => {
                let index = self.allocate();
                match self.last {
                    Some(last) => {
                        self.pulses[last as usize].next = Some(index);
                        self.pulses[index as usize].previous = Some(last);
                    }
                    None => self.first = Some(index),
                }
                self.last = Some(index);
                index
            }
            Some(c) if self.pulses[c as usize].position == position => c,
            Some(c) => {
                let index = self.allocate();
                let previous = self.pulses[c as usize].previous;
                self.pulses[index as usize].previous = previous;
                self.pulses[index as usize].next = Some(c);
                self.pulses[c as usize].previous = Some(index);
                match previous {
                    Some(p) => self.pulses[p as usize].next = Some(index),
                    None => self.first = Some(index),
                }
                index
            }
        };
        self.pulses[index as usize].position = position;
        self.pulses[index as usize].strength = strength;
        self.current = Some(index);
        index
    }

    /// Change the strength of an existing pulse in place.
    pub fn set_strength(&mut self, index: u32, strength: u32) {
        self.pulses[index as usize].strength = strength;
    }

    /// Remove every pulse in `[position, position + count)`, wrapping
    /// around the end of the rotation.
    pub fn remove_pulses(&mut self, position: u32, count: u32) {
        let mut position = position % POSITIONS_PER_ROTATION;
        let mut count = count;
        while count > 0 {
            let todo = count.min(POSITIONS_PER_ROTATION - position);
            let end = position + todo;
            let mut cur = self.find_from_cursor(position);
            while let Some(c) = cur {
                let p = self.pulses[c as usize].position;
                if p < position || p >= end {
                    break;
                }
                cur = self.pulses[c as usize].next;
                self.free_pulse(c);
            }
            position = end % POSITIONS_PER_ROTATION;
            count -= todo;
        }
    }

    pub fn remove_pulse(&mut self, position: u32) {
        let position = position % POSITIONS_PER_ROTATION;
        if let Some(c) = self.find_from_cursor(position) {
            if self.pulses[c as usize].position == position {
                self.free_pulse(c);
            }
        }
    }

    /// Distance from `position` to the next pulse at or after it, wrapping
    /// to the first pulse. An empty stream reports the distance to the end
    /// of the rotation.
    pub fn delta_to_next(&mut self, position: u32) -> u32 {
        let position = position % POSITIONS_PER_ROTATION;
        match self.find_from_cursor(position) {
            Some(c) => {
                self.current = Some(c);
                self.pulses[c as usize].position - position
            }
            None => match self.first {
                Some(first) => POSITIONS_PER_ROTATION + self.pulses[first as usize].position - position,
                None => POSITIONS_PER_ROTATION - position,
            },
        }
    }

    /// Strength of the next pulse at or after `position`, wrapping; 0 for
    /// an empty stream.
    pub fn next_pulse_strength(&mut self, position: u32) -> u32 {
        let position = position % POSITIONS_PER_ROTATION;
        match self.find_from_cursor(position) {
            Some(c) => {
                self.current = Some(c);
                self.pulses[c as usize].strength
            }
            None => self.first.map_or(0, |f| self.pulses[f as usize].strength),
        }
    }

    /// Strength of the pulse exactly at `position`, or 0.
    pub fn get_pulse(&mut self, position: u32) -> u32 {
        let position = position % POSITIONS_PER_ROTATION;
        match self.find_from_cursor(position) {
            Some(c) if self.pulses[c as usize].position == position => {
                self.current = Some(c);
                self.pulses[c as usize].strength
            }
            _ => 0,
        }
    }

    /// Add or overwrite a pulse; a zero strength removes it instead.
    pub fn set_pulse(&mut self, position: u32, strength: u32) {
        if strength == 0 {
            self.remove_pulse(position);
        } else {
            self.add_pulse(position, strength);
        }
    }

    /// Move the cursor to the first pulse at or after `position`.
    pub fn seek(&mut self, position: u32) {
        self.current = self.find_from_cursor(position % POSITIONS_PER_ROTATION);
    }

    /// Replace the stream with one full-strength pulse per set bit of a
    /// `len_bits`-long GCR bit stream, spaced evenly and offset by half a
    /// bit cell.
    pub fn convert_from_gcr(&mut self, bytes: &[u8], len_bits: u32) {
        self.clear();
        if len_bits == 0 {
            return;
        }
        let inc_hi = POSITIONS_PER_ROTATION / len_bits;
        let inc_lo = POSITIONS_PER_ROTATION % len_bits;
        let mut pos_hi = (POSITIONS_PER_ROTATION >> 1) / len_bits;
        let mut pos_lo = (POSITIONS_PER_ROTATION >> 1) % len_bits;
        for bit in 0..len_bits {
            let byte = bytes.get((bit >> 3) as usize).copied().unwrap_or(0);
            if byte & (1 << (!bit & 7)) != 0 {
                self.add_pulse(pos_hi, FULL_STRENGTH);
            }
            pos_hi += inc_hi;
            pos_lo += inc_lo;
            while pos_lo >= len_bits {
                pos_lo -= len_bits;
                pos_hi += 1;
            }
        }
    }

    /// Sample the stream into a `len_bits`-long GCR bit stream, one bit per
    /// evenly spaced cell; a cell is set when a pulse falls inside it.
    #[must_use]
    pub fn convert_to_gcr(&self, len_bits: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; (len_bits as usize).div_ceil(8)];
        if len_bits == 0 {
            return bytes;
        }
        let inc_hi = POSITIONS_PER_ROTATION / len_bits;
        let inc_lo = POSITIONS_PER_ROTATION % len_bits;
        let mut cur = self.first;
        let mut pos_hi = cur.map_or(0, |c| self.pulses[c as usize].position.wrapping_sub(1));
        let mut pos_lo = len_bits - 1;
        for bit in 0..len_bits {
            pos_hi = pos_hi.wrapping_add(inc_hi);
            pos_lo += inc_lo;
            while pos_lo >= len_bits {
                pos_lo -= len_bits;
                pos_hi = pos_hi.wrapping_add(1);
            }
            loop {
                if let Some(c) = cur.filter(|&c| self.pulses[c as usize].position < pos_hi) {
                    pos_hi = (self.pulses[c as usize].position + inc_hi).wrapping_sub(SAMPLE_HEADROOM);
                    pos_lo = inc_lo;
                    cur = self.pulses[c as usize].next;
                    bytes[(bit >> 3) as usize] |= 1 << (!bit & 7);
                } else if pos_hi >= POSITIONS_PER_ROTATION {
                    pos_hi -= POSITIONS_PER_ROTATION;
                    cur = self.first;
                    continue;
                }
                break;
            }
        }
        bytes
    }

    /// Decode the stream through a model of the drive's read electronics
    /// (the 16 MHz divider chain clocked at `speed_zone`), ignoring weak
    /// pulses. Returns the bit stream and the number of bits produced,
    /// which is at most `len_bits`.
    #[must_use]
    pub fn convert_to_gcr_with_logic(&self, len_bits: u32, speed_zone: u32) -> (Vec<u8>, u32) {
        let mut bytes = vec![0u8; (len_bits as usize).div_ceil(8)];
        let mut last_position = 0u32;
        let mut flip_flop = 0u32;
        let mut last_flip_flop = 0u32;
        let mut clock = speed_zone;
        let mut counter = 0u32;
        let mut bit_pos = 0u32;
        let mut cur = self.first;
        while let Some(c) = cur {
            if bit_pos >= len_bits {
                break;
            }
            let pulse = self.pulses[c as usize];
            cur = pulse.next;
            if pulse.strength < 0x8000_0000 {
                continue;
            }
            let delta = pulse.position.wrapping_sub(last_position);
            last_position = pulse.position;
            flip_flop ^= 1;
            let mut delay = 0u32;
            loop {
                if delay == 40 && last_flip_flop != flip_flop {
                    last_flip_flop = flip_flop;
                    clock = speed_zone;
                    counter = 0;
                }
                if clock == 16 {
                    clock = speed_zone;
                    counter = (counter + 1) & 0xF;
                    if counter & 3 == 2 && bit_pos < len_bits {
                        let bit = ((counter + 0x1C) >> 4) & 1;
                        bytes[(bit_pos >> 3) as usize] |= (bit as u8) << (!bit_pos & 7);
                        bit_pos += 1;
                    }
                }
                clock += 1;
                delay += 1;
                if delay >= delta {
                    break;
                }
            }
        }
        (bytes, bit_pos)
    }

    /// Decode a pulse stream record: pulse count, payload size, then the
    /// range-coded payload. Returns the bytes consumed.
    pub fn read_from(&mut self, data: &[u8]) -> Result<usize, P64Error> {
        self.clear();
        let header = data.get(..8).ok_or(P64Error::Truncated)?;
        let expected = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if size == 0 {
            return if expected == 0 {
                Ok(8)
            } else {
                Err(P64Error::BadPulseStream { expected, decoded: 0 })
            };
        }
        let payload = data.get(8..8 + size).ok_or(P64Error::Truncated)?;

        let mut models = Models::new();
        let mut decoder = RangeDecoder::new(payload);
        let mut decoded = 0u32;
        let mut position = 0u32;
        let mut delta = 0u32;
        let mut strength = 0u32;
        while decoded < expected {
            if models.decode_flag(&mut decoder, MODEL_POSITION_FLAG) {
                delta = models.decode_dword(&mut decoder, MODEL_POSITION);
                if delta == 0 {
                    break;
                }
            }
            position = position.wrapping_add(delta);
            if models.decode_flag(&mut decoder, MODEL_STRENGTH_FLAG) {
                strength = strength.wrapping_add(models.decode_dword(&mut decoder, MODEL_STRENGTH));
            }
            self.add_pulse(position, strength);
            decoded += 1;
        }
        if decoded != expected {
            return Err(P64Error::BadPulseStream { expected, decoded });
        }
        Ok(8 + size)
    }

    /// Encode the stream as a pulse stream record.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let mut models = Models::new();
        let mut encoder = RangeEncoder::new();
        let mut last_position = 0u32;
        let mut previous_delta = 0u32;
        let mut last_strength = 0u32;
        let mut count = 0u32;
        for (position, strength) in self.iter() {
            let delta = position.wrapping_sub(last_position);
            if delta == previous_delta {
                models.encode_flag(&mut encoder, MODEL_POSITION_FLAG, false);
            } else {
                previous_delta = delta;
                models.encode_flag(&mut encoder, MODEL_POSITION_FLAG, true);
                models.encode_dword(&mut encoder, MODEL_POSITION, delta);
            }
            last_position = position;

            if strength == last_strength {
                models.encode_flag(&mut encoder, MODEL_STRENGTH_FLAG, false);
            } else {
                models.encode_flag(&mut encoder, MODEL_STRENGTH_FLAG, true);
                models.encode_dword(&mut encoder, MODEL_STRENGTH, strength.wrapping_sub(last_strength));
            }
            last_strength = strength;
            count += 1;
        }
        // A zero position delta terminates the stream.
        models.encode_flag(&mut encoder, MODEL_POSITION_FLAG, true);
        models.encode_dword(&mut encoder, MODEL_POSITION, 0);
        let payload = encoder.finish();

        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
    }
}
