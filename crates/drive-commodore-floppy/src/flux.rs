//! The read/write electronics over a P64 pulse stream.
//!
//! Same clock, filter and decoder as the GCR engine, but the head moves
//! over absolute positions (one per reference tick) and reversals come
//! from the pulses under it. Weak pulses only get through with a
//! probability equal to their strength.

use format_p64::{PulseStream, FULL_STRENGTH};

use crate::rotation::{Rotation, Signals, TICKS_PER_ROTATION};

/// Distance from the head to the cursor pulse, or to the end of the
/// rotation once the cursor has run off the list.
fn distance_to_cursor(stream: &PulseStream, head: u32) -> u32 {
    match stream.current() {
        Some(c) => stream.pulse(c).position().wrapping_sub(head),
        None => TICKS_PER_ROTATION - head,
    }
}

/// Put the cursor on the first pulse after `head`, walking from wherever
/// it was left.
fn resync_cursor(stream: &mut PulseStream, head: u32) {
    if stream.last().is_some_and(|l| stream.pulse(l).position() <= head) {
        stream.set_current(None);
        return;
    }
    let mut cur = match stream.current() {
        None => stream.first(),
        Some(mut c) => {
            while Some(c) != stream.first() {
                match stream.pulse(c).previous() {
                    Some(p) if stream.pulse(p).position() > head => c = p,
                    _ => break,
                }
            }
            Some(c)
        }
    };
    while let Some(c) = cur {
        if stream.pulse(c).position() > head {
            break;
        }
        cur = stream.pulse(c).next();
    }
    stream.set_current(cur);
}

/// After the head wraps: cursor on the first pulse at or after `head`.
fn rewind_cursor(stream: &mut PulseStream, head: u32) {
    let mut cur = stream.first();
    while let Some(c) = cur {
        if stream.pulse(c).position() >= head {
            break;
        }
        cur = stream.pulse(c).next();
    }
    stream.set_current(cur);
}

/// Cursor pulse if it sits exactly under the head.
fn pulse_under_head(stream: &PulseStream, head: u32) -> Option<u32> {
    stream.current().filter(|&c| stream.pulse(c).position() == head)
}

impl Rotation {
    /// Run the electronics over `stream` for `ticks` reference ticks.
    pub(crate) fn run_p64(&mut self, signals: &mut Signals, stream: &mut PulseStream, dirty: &mut bool, ticks: u32) {
        resync_cursor(stream, self.pulse_head_position);
        if signals.read_mode {
            self.read_pulses(signals, stream, ticks);
        } else {
            self.write_pulses(signals, stream, dirty, ticks);
        }
    }

    fn read_pulses(&mut self, signals: &mut Signals, stream: &mut PulseStream, ticks: u32) {
        let mut delta = distance_to_cursor(stream, self.pulse_head_position);
        let mut remaining = ticks;
        while remaining > 0 {
            let todo = if delta <= 1 {
                1
            } else {
                self.clamp_batch(delta, remaining, true)
            };

            self.step_so_delay(todo, signals);

            if self.filter_counter < 40 {
                self.filter_counter += todo;
            }
            let restarted = self.flux_filter(todo);
            if self.clock_divider(todo, restarted) {
                self.last_write_data <<= 1;
                self.decode_bit(todo, signals);
            }

            delta = delta.saturating_sub(todo);
            self.pulse_head_position += todo;
            if self.pulse_head_position >= TICKS_PER_ROTATION {
                self.pulse_head_position -= TICKS_PER_ROTATION;
                rewind_cursor(stream, self.pulse_head_position);
                delta = distance_to_cursor(stream, self.pulse_head_position);
            }

            if delta == 0 {
                if let Some(c) = pulse_under_head(stream, self.pulse_head_position) {
                    let strength = stream.pulse(c).strength();
                    if strength == FULL_STRENGTH || (self.next_int() ^ 0x8000_0000) < strength {
                        self.filter_state = !self.filter_state;
                        self.filter_counter = 0;
                    }
                    stream.set_current(stream.pulse(c).next());
                }
                delta = distance_to_cursor(stream, self.pulse_head_position);
            }

            self.cycle_index = self.cycle_index.wrapping_add(todo);
            remaining -= todo;
        }
    }

    fn write_pulses(&mut self, signals: &mut Signals, stream: &mut PulseStream, dirty: &mut bool, ticks: u32) {
        let mut delta = distance_to_cursor(stream, self.pulse_head_position);
        let mut remaining = ticks;
        while remaining > 0 {
            let todo = if delta <= 1 {
                1
            } else {
                let to_wrap = TICKS_PER_ROTATION - self.pulse_head_position;
                self.clamp_batch(delta.min(to_wrap), remaining, false)
            };

            self.step_so_delay(todo, signals);

            let mut head_write = false;
            if self.clock_divider(todo, false) {
                head_write = self.encode_bit(todo, signals);
            }

            self.pulse_head_position += todo;
            if self.pulse_head_position >= TICKS_PER_ROTATION {
                self.pulse_head_position -= TICKS_PER_ROTATION;
                rewind_cursor(stream, self.pulse_head_position);
            }

            let head = self.pulse_head_position;
            if head_write {
                match pulse_under_head(stream, head) {
                    Some(c) => {
                        if stream.pulse(c).strength() != FULL_STRENGTH {
                            stream.set_strength(c, FULL_STRENGTH);
                            *dirty = true;
                        }
                    }
                    None => {
                        stream.add_pulse(head, FULL_STRENGTH);
                        *dirty = true;
                    }
                }
                if let Some(c) = stream.current() {
                    stream.set_current(stream.pulse(c).next());
                }
            } else if let Some(c) = pulse_under_head(stream, head) {
                // Erase: the cursor moves on to the next pulse.
                stream.free_pulse(c);
                *dirty = true;
            }

            delta = distance_to_cursor(stream, head);
            self.cycle_index = self.cycle_index.wrapping_add(todo);
            remaining -= todo;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Full-strength pulses for a GCR bit pattern at zone 3 spacing, plus
    /// a weak pulse in an otherwise empty stretch.
    fn make_stream() -> PulseStream {
        let mut stream = PulseStream::new();
        let mut bytes = vec![0xFF; 5];
        bytes.extend_from_slice(&[0x52, 0x54, 0xB5, 0x29, 0x4B, 0x9A, 0xA6, 0xA5]);
        bytes.extend(std::iter::repeat_n(0x55, 7692 - bytes.len()));
        stream.convert_from_gcr(&bytes, 7692 * 8);
        stream.add_pulse(3_100_003, 0x6000_0000);
        stream
    }

    struct Rig {
        rotation: Rotation,
        signals: Signals,
        stream: PulseStream,
        dirty: bool,
    }

    impl Rig {
        fn new(read_mode: bool) -> Self {
            let mut rotation = Rotation::new(0);
            rotation.set_speed_zone(3);
            rotation.seed = 0x0BAD_F00D;
            let mut signals = Signals::new();
            signals.read_mode = read_mode;
            signals.write_value = 0x69;
            Self {
                rotation,
                signals,
                stream: make_stream(),
                dirty: false,
            }
        }

        fn run(&mut self, ticks: u32) {
            self.rotation
                .run_p64(&mut self.signals, &mut self.stream, &mut self.dirty, ticks);
        }
    }

    #[test]
    fn read_batching_matches_single_ticks() {
        let mut batched = Rig::new(true);
        let mut stepped = Rig::new(true);
        for chunk in [1u32, 9, 40, 777, 30_000, 150_000] {
            batched.run(chunk);
            for _ in 0..chunk {
                stepped.run(1);
            }
            assert_eq!(batched.rotation, stepped.rotation);
            assert_eq!(batched.signals, stepped.signals);
        }
        assert!(!batched.dirty);
    }

    #[test]
    fn read_decodes_pulse_stream() {
        let mut rig = Rig::new(true);
        let mut bytes = Vec::new();
        for _ in 0..4000 {
            rig.signals.byte_ready_level = false;
            rig.run(52);
            if rig.signals.byte_ready_level {
                bytes.push(rig.signals.gcr_read);
            }
        }
        assert!(bytes.windows(3).any(|w| w == [0x52, 0x54, 0xB5]));
    }

    #[test]
    fn head_position_wraps_each_rotation() {
        let mut rig = Rig::new(true);
        rig.run(TICKS_PER_ROTATION - 10);
        assert_eq!(rig.rotation.pulse_head_position, TICKS_PER_ROTATION - 10);
        rig.run(25);
        assert_eq!(rig.rotation.pulse_head_position, 15);
    }

    #[test]
    fn writing_replaces_pulses() {
        let mut rig = Rig::new(false);
        let before = rig.stream.pulse_count();
        // About 2000 cells of 0x69.
        rig.run(52 * 2000);
        assert!(rig.dirty);
        let written: Vec<u32> = rig
            .stream
            .iter()
            .take_while(|&(p, _)| p < 52 * 1900)
            .map(|(_, s)| s)
            .collect();
        assert!(written.iter().all(|&s| s == FULL_STRENGTH));
        // 0x69 has four ones per byte where the old 0x55 run had four too,
        // but the leading sync run was denser.
        assert!(rig.stream.pulse_count() < before);
    }

    #[test]
    fn write_batching_matches_single_ticks() {
        let mut batched = Rig::new(false);
        let mut stepped = Rig::new(false);
        for chunk in [5u32, 52, 1000, 9000] {
            batched.run(chunk);
            for _ in 0..chunk {
                stepped.run(1);
            }
            assert_eq!(batched.rotation, stepped.rotation);
            assert_eq!(batched.signals, stepped.signals);
            assert_eq!(batched.stream, stepped.stream);
        }
    }

    #[test]
    fn cursor_resyncs_after_head_moves_back() {
        let mut stream = make_stream();
        resync_cursor(&mut stream, 2_000_000);
        let c = stream.current().expect("valid");
        assert!(stream.pulse(c).position() > 2_000_000);
        resync_cursor(&mut stream, 100);
        let c = stream.current().expect("valid");
        assert!(stream.pulse(c).position() > 100);
        let previous = stream.pulse(c).previous().expect("valid");
        assert!(stream.pulse(previous).position() <= 100);
        resync_cursor(&mut stream, TICKS_PER_ROTATION - 1);
        assert_eq!(stream.current(), None);
    }
}
