//! One disk drive: head position, attached image and the electronics.

use std::fmt;

use emu_core::{Observable, Value};
use format_gcr::{GcrImage, GcrTrack};
use format_p64::P64Image;

use crate::rotation::{GcrHead, Rotation, Signals, MOTOR_ON};
use crate::{DiskImage, DriveConfig, DriveType, ExtendPolicy, ImageKind};

/// Drive cycles after an attach during which the electronics read zero.
pub const DRIVE_ATTACH_DELAY: u64 = 3 * 600_000;
/// Same, when the attach follows a detach (disk swap).
pub const DRIVE_ATTACH_DETACH_DELAY: u64 = 2 * 600_000;

/// `sync_found` value when the shifter holds a SYNC mark (VIA PB7 low).
pub const SYNC_FOUND: u8 = 0x00;
/// `sync_found` value otherwise.
pub const SYNC_NOT_FOUND: u8 = 0x80;

const INITIAL_HALF_TRACK: u32 = 36;

/// Asked before a write grows an image past its last track.
pub trait ExtendPrompt {
    /// Return `true` to let the image grow.
    fn confirm_extend(&mut self, unit: u8, drive: u8) -> bool;
}

impl<F: FnMut(u8, u8) -> bool> ExtendPrompt for F {
    fn confirm_extend(&mut self, unit: u8, drive: u8) -> bool {
        self(unit, drive)
    }
}

/// Answer to the extend question, remembered until the next attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtendAnswer {
    Declined,
    Ask,
    Accepted,
}

pub struct Drive {
    unit: u8,
    number: u8,
    config: DriveConfig,
    image: Option<DiskImage>,
    /// Half-track buffers of a GCR or sector image.
    gcr: GcrImage,
    /// Working copy of a P64 image's pulses.
    p64: P64Image,
    gcr_loaded: bool,
    p64_loaded: bool,
    gcr_dirty: bool,
    p64_dirty: bool,
    /// Bit offset of the head within the current half-track.
    head_offset: usize,
    /// Byte length of the current half-track.
    track_size: usize,
    half_track: u32,
    side: u32,
    read_only: bool,
    attach_clk: Option<u64>,
    detach_clk: Option<u64>,
    attach_detach_clk: Option<u64>,
    extend_answer: ExtendAnswer,
    /// Set once the fast path can no longer be trusted: pulse images and
    /// anything that has been written.
    complicated: bool,
    signals: Signals,
    rotation: Rotation,
    prompt: Option<Box<dyn ExtendPrompt>>,
}

impl fmt::Debug for Drive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drive")
            .field("unit", &self.unit)
            .field("number", &self.number)
            .field("config", &self.config)
            .field("image", &self.image.as_ref().map(DiskImage::kind))
            .field("half_track", &self.half_track)
            .field("side", &self.side)
            .field("head_offset", &self.head_offset)
            .field("complicated", &self.complicated)
            .finish_non_exhaustive()
    }
}

impl Drive {
    #[must_use]
    pub fn new(unit: u8, number: u8, config: DriveConfig) -> Self {
        let frequency = u32::from(config.clock_frequency >= 2);
        let mut drive = Self {
            unit,
            number,
            config,
            image: None,
            gcr: GcrImage::new(),
            p64: P64Image::new(),
            gcr_loaded: false,
            p64_loaded: false,
            gcr_dirty: false,
            p64_dirty: false,
            head_offset: 0,
            track_size: 0,
            half_track: 0,
            side: 0,
            read_only: false,
            attach_clk: None,
            detach_clk: None,
            attach_detach_clk: None,
            extend_answer: ExtendAnswer::Ask,
            complicated: false,
            signals: Signals::new(),
            rotation: Rotation::new(frequency),
            prompt: None,
        };
        drive.set_half_track(INITIAL_HALF_TRACK, 0);
        drive
    }

    #[must_use]
    pub fn unit(&self) -> u8 {
        self.unit
    }

    #[must_use]
    pub fn number(&self) -> u8 {
        self.number
    }

    #[must_use]
    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Change the drive model. The head is re-clamped to the new model's
    /// range.
    pub fn set_drive_type(&mut self, drive_type: DriveType) {
        self.config.drive_type = drive_type;
        self.set_clock_frequency(drive_type.default_clock_frequency());
        if !drive_type.is_double_sided() {
            self.side = 0;
        }
        self.set_half_track(self.half_track, self.side);
    }

    /// Select a 1 or 2 MHz drive CPU clock.
    pub fn set_clock_frequency(&mut self, mhz: u8) {
        self.config.clock_frequency = mhz;
        self.rotation.init(u32::from(mhz >= 2));
    }

    pub fn set_extend_policy(&mut self, policy: ExtendPolicy) {
        self.config.extend_policy = policy;
    }

    /// Install the handler asked under [`ExtendPolicy::Ask`].
    pub fn set_extend_prompt(&mut self, prompt: impl ExtendPrompt + 'static) {
        self.prompt = Some(Box::new(prompt));
    }

    /// Drive CPU reset at `clk`.
    pub fn reset(&mut self, clk: u64) {
        self.rotation.reset(clk, &mut self.signals);
        self.signals.byte_ready_level = true;
        self.signals.byte_ready_edge = true;
        self.signals.write_value = 0x55;
        self.signals.read_mode = true;
    }

    /// Insert `image`, replacing (and returning) any disk already in the
    /// drive. The electronics read nothing until the attach delay passes.
    pub fn attach_image(&mut self, image: DiskImage, clk: u64) -> Option<DiskImage> {
        let previous = if self.image.is_some() {
            self.detach_image(clk)
        } else {
            None
        };

        if self.detach_clk.is_some() {
            self.attach_detach_clk = Some(clk);
        } else {
            self.attach_clk = Some(clk);
        }
        self.extend_answer = ExtendAnswer::Ask;
        self.read_only = image.is_read_only();

        match image.p64() {
            Some(p64) => {
                self.p64 = p64.clone();
                self.p64_loaded = true;
                self.p64_dirty = false;
                self.complicated = true;
            }
            None => {
                self.gcr = image.gcr_image();
                self.gcr_loaded = true;
                self.complicated = false;
            }
        }
        log::info!(
            "unit {} drive {}: attached {:?} image{}",
            self.unit,
            self.number,
            image.kind(),
            if self.read_only { " (read only)" } else { "" }
        );
        self.image = Some(image);
        self.set_half_track(self.half_track, self.side);
        previous
    }

    /// Remove the disk, flushing pending writes into it first.
    pub fn detach_image(&mut self, clk: u64) -> Option<DiskImage> {
        self.image.as_ref()?;
        self.gcr_data_writeback();
        self.flush_pulses();

        self.detach_clk = Some(clk);
        self.gcr_loaded = false;
        self.p64_loaded = false;
        self.gcr_dirty = false;
        self.p64_dirty = false;
        self.read_only = false;
        self.gcr = GcrImage::new();
        self.p64.clear();
        let image = self.image.take();
        log::info!("unit {} drive {}: image detached", self.unit, self.number);
        self.set_half_track(self.half_track, self.side);
        image
    }

    fn flush_pulses(&mut self) {
        if !self.p64_dirty {
            return;
        }
        self.p64_dirty = false;
        if let Some(image) = self.image.as_mut() {
            if let Err(err) = image.write_pulses(&self.p64) {
                log::warn!("unit {} drive {}: P64 write-back failed: {err}", self.unit, self.number);
            }
        }
    }

    fn side_offset(&self) -> u32 {
        self.image.as_ref().map_or(70, |image| image.kind().side_offset())
    }

    fn gcr_index(&self) -> usize {
        (self.half_track - 2 + self.side * self.side_offset()) as usize
    }

    /// Position the head. Half-tracks are clamped to the model's range
    /// and to at least 2; the bit offset scales with the track length.
    pub fn set_half_track(&mut self, half_track: u32, side: u32) {
        let mut half_track = half_track;
        if let Some(max) = self.config.drive_type.max_half_track() {
            half_track = half_track.min(max);
        }
        let half_track = half_track.max(2);
        let side = side & 1;

        if half_track != self.half_track || side != self.side {
            self.half_track = half_track;
            self.side = side;
            self.p64
                .stream_mut(side as usize, half_track as usize)
                .set_current(None);
        }

        let new_size = self.gcr.track(self.gcr_index()).map_or(0, |t| t.len());
        self.head_offset = if self.track_size != 0 {
            self.head_offset * new_size / self.track_size
        } else {
            0
        };
        self.track_size = new_size;
    }

    /// Step the head by `step` half-tracks, flushing the track it leaves.
    pub fn move_head(&mut self, step: i32) {
        if !(-1..=1).contains(&step) {
            log::warn!("unit {} drive {}: ambiguous step count ({step})", self.unit, self.number);
        }
        self.gcr_data_writeback();
        let target = i64::from(self.half_track) + i64::from(step);
        self.set_half_track(u32::try_from(target.max(0)).unwrap_or(0), self.side);
    }

    /// Select the head of a double-sided drive.
    pub fn set_side(&mut self, side: u32) {
        if !self.config.drive_type.is_double_sided() {
            return;
        }
        if side & 1 != self.side {
            self.gcr_data_writeback();
            self.set_half_track(self.half_track, side);
        }
    }

    /// Write the current half-track back into a sector or GCR image if it
    /// was modified.
    pub fn gcr_data_writeback(&mut self) {
        let Some(image) = self.image.as_ref() else {
            return;
        };
        let kind = image.kind();
        if kind == ImageKind::P64 || !self.gcr_dirty {
            return;
        }

        let half_track = self.half_track + self.side * kind.side_offset();
        let track = self.half_track / 2;
        if !matches!(kind, ImageKind::G64 | ImageKind::G71) {
            if half_track > image.max_half_tracks() {
                self.gcr_dirty = false;
                return;
            }
            if track > image.tracks() && !self.may_extend(kind, track) {
                self.gcr_dirty = false;
                return;
            }
        }

        let data = self
            .gcr
            .track(half_track as usize - 2)
            .cloned()
            .unwrap_or_default();
        if let Some(image) = self.image.as_mut() {
            match image.write_half_track(half_track, &data) {
                Ok(()) => log::debug!(
                    "unit {} drive {}: wrote back half-track {half_track}",
                    self.unit,
                    self.number
                ),
                Err(err) => log::warn!(
                    "unit {} drive {}: half-track {half_track} write-back failed: {err}",
                    self.unit,
                    self.number
                ),
            }
        }
        self.gcr_dirty = false;
    }

    /// Flush everything pending, P64 pulses included.
    pub fn gcr_data_writeback_all(&mut self) {
        self.gcr_data_writeback();
        self.flush_pulses();
    }

    fn may_extend(&mut self, kind: ImageKind, track: u32) -> bool {
        match self.config.extend_policy {
            ExtendPolicy::Never => {
                self.extend_answer = ExtendAnswer::Ask;
                log::info!(
                    "unit {} drive {}: not extending image for track {track}",
                    self.unit,
                    self.number
                );
                return false;
            }
            ExtendPolicy::Ask => match self.extend_answer {
                ExtendAnswer::Ask => {
                    let (unit, number) = (self.unit, self.number);
                    let accepted = self
                        .prompt
                        .as_mut()
                        .is_some_and(|prompt| prompt.confirm_extend(unit, number));
                    if !accepted {
                        self.extend_answer = ExtendAnswer::Declined;
                        return false;
                    }
                    self.extend_answer = ExtendAnswer::Accepted;
                }
                ExtendAnswer::Declined => return false,
                ExtendAnswer::Accepted => {}
            },
            ExtendPolicy::OnAccess => self.extend_answer = ExtendAnswer::Ask,
        }
        if !kind.can_extend() {
            log::warn!("unit {} drive {}: {kind:?} images cannot be extended", self.unit, self.number);
            return false;
        }
        true
    }

    /// Bring the disk and electronics up to drive clock `clk`.
    pub fn rotate(&mut self, clk: u64) {
        let index = self.gcr_index();
        let Self {
            signals,
            rotation,
            gcr,
            p64,
            gcr_loaded,
            p64_loaded,
            gcr_dirty,
            p64_dirty,
            head_offset,
            half_track,
            side,
            complicated,
            ..
        } = self;

        if signals.byte_ready_active & MOTOR_ON == 0 {
            signals.req_ref_cycles = 0;
            return;
        }

        if *complicated {
            let ticks = rotation.reference_ticks(clk, signals);
            if ticks == 0 {
                return;
            }
            if *p64_loaded {
                let stream = p64.stream_mut(*side as usize, *half_track as usize);
                rotation.run_p64(signals, stream, p64_dirty, ticks);
            } else {
                let track = gcr.track_mut(index).map(GcrTrack::data_mut).unwrap_or_default();
                let mut head = GcrHead::new(*gcr_loaded, track, head_offset, gcr_dirty);
                rotation.run_gcr(signals, &mut head, ticks);
            }
        } else {
            let track = gcr.track_mut(index).map(GcrTrack::data_mut).unwrap_or_default();
            let mut head = GcrHead::new(*gcr_loaded, track, head_offset, gcr_dirty);
            if rotation.rotate_fast(clk, signals, &mut head) {
                *complicated = true;
            }
        }
    }

    /// Rotate up to `clk` unless the attach delay is still running, in
    /// which case the data latch reads zero.
    pub fn byte_read(&mut self, clk: u64) {
        if let Some(attached) = self.attach_clk {
            if clk.saturating_sub(attached) < DRIVE_ATTACH_DELAY {
                self.signals.gcr_read = 0;
            } else {
                self.attach_clk = None;
            }
        } else if let Some(swapped) = self.attach_detach_clk {
            if clk.saturating_sub(swapped) < DRIVE_ATTACH_DETACH_DELAY {
                self.signals.gcr_read = 0;
            } else {
                self.attach_detach_clk = None;
                self.detach_clk = None;
            }
        } else {
            self.rotate(clk);
        }
        self.signals.req_ref_cycles = 0;
    }

    /// VIA port A read: latch and return the byte under the head. Reading
    /// acknowledges BYTE READY.
    pub fn read_data(&mut self, clk: u64) -> u8 {
        self.byte_read(clk);
        self.signals.byte_ready_level = false;
        self.signals.gcr_read
    }

    /// Last latched byte, without rotating.
    #[must_use]
    pub fn gcr_read(&self) -> u8 {
        self.signals.gcr_read
    }

    /// Consume a pending BYTE READY edge (the CPU's SO input).
    pub fn take_byte_ready_edge(&mut self) -> bool {
        std::mem::take(&mut self.signals.byte_ready_edge)
    }

    #[must_use]
    pub fn byte_ready(&self) -> bool {
        self.signals.byte_ready_level
    }

    /// SYNC as the level on VIA port B bit 7, ready to be ORed into the
    /// port value: active low, so [`SYNC_FOUND`] is 0x00 and
    /// [`SYNC_NOT_FOUND`] is 0x80. [`Drive::is_sync`] is the boolean view.
    /// Call [`Drive::rotate`] first.
    #[must_use]
    pub fn sync_found(&self) -> u8 {
        if !self.signals.read_mode || self.attach_clk.is_some() {
            return SYNC_NOT_FOUND;
        }
        if self.rotation.last_read_data == 0x3FF {
            SYNC_FOUND
        } else {
            SYNC_NOT_FOUND
        }
    }

    /// True while a SYNC mark is under the head.
    #[must_use]
    pub fn is_sync(&self) -> bool {
        self.sync_found() == SYNC_FOUND
    }

    /// Byte presented by the VIA for writing.
    pub fn set_write_value(&mut self, value: u8) {
        self.signals.write_value = value;
    }

    /// `true` selects read mode, `false` write mode.
    pub fn set_read_write_mode(&mut self, read: bool) {
        self.signals.read_mode = read;
    }

    #[must_use]
    pub fn is_read_mode(&self) -> bool {
        self.signals.read_mode
    }

    /// Motor and BYTE READY enables ([`MOTOR_ON`],
    /// [`crate::BYTE_READY_ENABLE`]).
    pub fn set_byte_ready_active(&mut self, active: u8) {
        self.signals.byte_ready_active = active;
    }

    #[must_use]
    pub fn byte_ready_active(&self) -> u8 {
        self.signals.byte_ready_active
    }

    pub fn set_speed_zone(&mut self, zone: u32) {
        self.rotation.set_speed_zone(zone);
    }

    #[must_use]
    pub fn speed_zone(&self) -> u32 {
        self.rotation.speed_zone
    }

    /// Motor switched on at `clk`.
    pub fn rotation_begins(&mut self, clk: u64) {
        self.rotation.begins(clk);
    }

    /// Ask the next rotation to run `ticks` (< 16) reference ticks beyond
    /// the current cycle.
    pub fn request_ref_cycles(&mut self, ticks: u32) {
        self.signals.req_ref_cycles = ticks;
    }

    pub fn set_head_offset(&mut self, offset: usize) {
        self.head_offset = offset;
    }

    #[must_use]
    pub fn head_offset(&self) -> usize {
        self.head_offset
    }

    #[must_use]
    pub fn half_track(&self) -> u32 {
        self.half_track
    }

    #[must_use]
    pub fn side(&self) -> u32 {
        self.side
    }

    #[must_use]
    pub fn image(&self) -> Option<&DiskImage> {
        self.image.as_ref()
    }

    /// Half-track buffers as the electronics see them.
    #[must_use]
    pub fn gcr(&self) -> &GcrImage {
        &self.gcr
    }

    /// Working copy of an attached P64 image.
    #[must_use]
    pub fn pulses(&self) -> Option<&P64Image> {
        self.p64_loaded.then_some(&self.p64)
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub fn is_complicated(&self) -> bool {
        self.complicated
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.gcr_dirty || self.p64_dirty
    }

    pub(crate) fn rotation(&self) -> &Rotation {
        &self.rotation
    }

    pub(crate) fn rotation_mut(&mut self) -> &mut Rotation {
        &mut self.rotation
    }

    pub(crate) fn signals(&self) -> &Signals {
        &self.signals
    }

    pub(crate) fn signals_mut(&mut self) -> &mut Signals {
        &mut self.signals
    }

    pub(crate) fn clocks(&self) -> [Option<u64>; 3] {
        [self.attach_clk, self.detach_clk, self.attach_detach_clk]
    }

    pub(crate) fn set_clocks(&mut self, attach: Option<u64>, detach: Option<u64>, attach_detach: Option<u64>) {
        self.attach_clk = attach;
        self.detach_clk = detach;
        self.attach_detach_clk = attach_detach;
    }

    pub(crate) fn set_complicated(&mut self, complicated: bool) {
        self.complicated = complicated;
    }

    pub(crate) fn config_mut(&mut self) -> &mut DriveConfig {
        &mut self.config
    }

    pub(crate) fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }
}

const QUERY_PATHS: &[&str] = &[
    "head.half_track",
    "head.side",
    "head.offset",
    "image.kind",
    "image.read_only",
    "image.dirty",
    "signals.byte_ready",
    "signals.byte_ready_edge",
    "signals.byte_ready_active",
    "signals.read_mode",
    "signals.gcr_read",
    "signals.write_value",
    "signals.sync",
    "rotation.accum",
    "rotation.speed_zone",
    "rotation.last_read_data",
    "rotation.last_write_data",
    "rotation.bit_counter",
    "rotation.ue7_counter",
    "rotation.uf4_counter",
    "rotation.filter_counter",
    "rotation.so_delay",
    "rotation.pulse_head_position",
    "rotation.complicated",
];

impl Observable for Drive {
    fn query(&self, path: &str) -> Option<Value> {
        let r = &self.rotation;
        let s = &self.signals;
        Some(match path {
            "head.half_track" => Value::U32(self.half_track),
            "head.side" => Value::U32(self.side),
            "head.offset" => Value::U32(u32::try_from(self.head_offset).unwrap_or(u32::MAX)),
            "image.kind" => Value::String(
                self.image
                    .as_ref()
                    .map_or_else(|| "none".to_string(), |i| format!("{:?}", i.kind())),
            ),
            "image.read_only" => Value::Bool(self.read_only),
            "image.dirty" => Value::Bool(self.is_dirty()),
            "signals.byte_ready" => Value::Bool(s.byte_ready_level),
            "signals.byte_ready_edge" => Value::Bool(s.byte_ready_edge),
            "signals.byte_ready_active" => Value::U8(s.byte_ready_active),
            "signals.read_mode" => Value::Bool(s.read_mode),
            "signals.gcr_read" => Value::U8(s.gcr_read),
            "signals.write_value" => Value::U8(s.write_value),
            "signals.sync" => Value::Bool(self.is_sync()),
            "rotation.accum" => Value::U32(r.accum),
            "rotation.speed_zone" => Value::U32(r.speed_zone),
            "rotation.last_read_data" => Value::U16(r.last_read_data as u16),
            "rotation.last_write_data" => Value::U8(r.last_write_data),
            "rotation.bit_counter" => Value::U32(r.bit_counter),
            "rotation.ue7_counter" => Value::U32(r.ue7_counter),
            "rotation.uf4_counter" => Value::U32(r.uf4_counter),
            "rotation.filter_counter" => Value::U32(r.filter_counter),
            "rotation.so_delay" => Value::U32(r.so_delay),
            "rotation.pulse_head_position" => Value::U32(r.pulse_head_position),
            "rotation.complicated" => Value::Bool(self.complicated),
            _ => return None,
        })
    }

    fn query_paths(&self) -> &'static [&'static str] {
        QUERY_PATHS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use format_d64::D64;
    use format_gcr::G64;

    use std::cell::Cell;
    use std::rc::Rc;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// G64 whose half-track 36 (where the head starts) holds `data`
    /// padded to a zone 0 track length.
    fn g64_with(data: &[u8]) -> DiskImage {
        let mut track = data.to_vec();
        track.resize(6250, 0x00);
        let mut tracks = vec![GcrTrack::default(); 84];
        tracks[34] = GcrTrack::new(track);
        let gcr = GcrImage::from_tracks(tracks);
        DiskImage::from_g64(G64::from_gcr(&gcr, false))
    }

    /// Drive with `image` attached at cycle 0 and the attach delay spent.
    /// Returns the clock the motor started at.
    fn ready_drive(image: DiskImage) -> (Drive, u64) {
        let mut drive = Drive::new(8, 0, DriveConfig::default());
        drive.attach_image(image, 0);
        drive.byte_read(DRIVE_ATTACH_DELAY);
        let start = DRIVE_ATTACH_DELAY + 1000;
        drive.set_speed_zone(0);
        drive.rotation_begins(start);
        (drive, start)
    }

    #[test]
    fn new_drive_defaults() {
        let drive = Drive::new(8, 0, DriveConfig::default());
        assert_eq!(drive.half_track(), 36);
        assert!(drive.is_read_mode());
        assert!(drive.byte_ready());
        assert_eq!(drive.byte_ready_active(), 0x06);
        assert_eq!(drive.sync_found(), SYNC_NOT_FOUND);
        assert!(drive.image().is_none());
    }

    #[test]
    fn sync_appears_after_ten_one_bits() {
        init_logging();
        let (mut drive, start) = ready_drive(g64_with(&[0x7F, 0xE0]));
        // Zone 0 at 1 MHz: one bit cell every 4 cycles.
        drive.rotate(start + 36);
        assert!(!drive.is_sync());
        assert_eq!(drive.sync_found(), 0x80);
        drive.rotate(start + 40);
        assert!(drive.is_sync());
        assert_eq!(drive.sync_found() & 0x80, 0);
        drive.rotate(start + 44);
        assert!(!drive.is_sync());
        assert_eq!(drive.sync_found(), SYNC_NOT_FOUND);
    }

    #[test]
    fn written_bytes_read_back_from_the_image() {
        init_logging();
        let (mut drive, start) = ready_drive(g64_with(&[]));
        drive.set_read_write_mode(false);
        drive.set_write_value(0x52);
        drive.rotate(start + 32);
        drive.set_write_value(0x55);
        drive.rotate(start + 64);
        drive.rotate(start + 96);
        assert!(drive.is_complicated());
        assert!(drive.is_dirty());

        let image = drive.detach_image(start + 100).expect("valid");
        let track = image.g64().and_then(|g| g.track(34)).expect("valid");
        assert_eq!(&track.data()[..3], &[0x00, 0x52, 0x55]);

        let (mut reader, start) = ready_drive(image);
        reader.set_head_offset(7);
        reader.rotate(start + 32);
        assert_eq!(reader.gcr_read(), 0x52);
        reader.rotate(start + 64);
        assert_eq!(reader.gcr_read(), 0x55);
        assert!(!reader.is_complicated());
    }

    #[test]
    fn attach_delay_reads_zero() {
        let mut drive = Drive::new(8, 0, DriveConfig::default());
        drive.attach_image(g64_with(&[0xFF; 8]), 100);
        assert_eq!(drive.sync_found(), SYNC_NOT_FOUND);
        assert_eq!(drive.read_data(200), 0);
        assert_eq!(drive.read_data(100 + DRIVE_ATTACH_DELAY - 1), 0);
        drive.byte_read(100 + DRIVE_ATTACH_DELAY);
        assert_eq!(drive.clocks()[0], None);
    }

    #[test]
    fn swapping_disks_uses_shorter_delay() {
        let mut drive = Drive::new(8, 0, DriveConfig::default());
        drive.attach_image(g64_with(&[]), 0);
        drive.byte_read(DRIVE_ATTACH_DELAY);
        let previous = drive.attach_image(g64_with(&[0x55]), 5_000_000);
        assert!(previous.is_some());
        let [attach, detach, swap] = drive.clocks();
        assert_eq!(attach, None);
        assert_eq!(detach, Some(5_000_000));
        assert_eq!(swap, Some(5_000_000));
        drive.byte_read(5_000_000 + DRIVE_ATTACH_DETACH_DELAY);
        assert_eq!(drive.clocks(), [None, None, None]);
    }

    #[test]
    fn motor_off_freezes_rotation() {
        let (mut drive, start) = ready_drive(g64_with(&[0x7F, 0xE0]));
        drive.set_byte_ready_active(0x02);
        drive.rotate(start + 40);
        assert_eq!(drive.head_offset(), 0);
        drive.set_byte_ready_active(0x06);
        drive.rotation_begins(start + 1000);
        drive.rotate(start + 1040);
        assert!(drive.is_sync());
    }

    #[test]
    fn head_is_clamped_to_model_range() {
        let mut drive = Drive::new(8, 0, DriveConfig::default());
        drive.set_half_track(90, 0);
        assert_eq!(drive.half_track(), 84);
        drive.set_half_track(0, 0);
        assert_eq!(drive.half_track(), 2);
        drive.move_head(-1);
        assert_eq!(drive.half_track(), 2);
        drive.move_head(1);
        assert_eq!(drive.half_track(), 3);

        let mut drive = Drive::new(8, 0, DriveConfig::for_type(DriveType::D1581));
        drive.set_half_track(90, 0);
        assert_eq!(drive.half_track(), 90);
    }

    #[test]
    fn head_offset_scales_with_track_length() {
        let d64 = D64::blank(35).expect("valid");
        let (mut drive, _) = ready_drive(DiskImage::from_d64(d64));
        drive.set_half_track(2, 0);
        let zone3 = drive.gcr().track(0).expect("valid").len();
        drive.set_head_offset(zone3 * 4);
        drive.set_half_track(62, 0);
        let zone0 = drive.gcr().track(60).expect("valid").len();
        assert_eq!(drive.head_offset(), zone3 * 4 * zone0 / zone3);
    }

    /// Write a full track of $55 with the head on half-track 72, then
    /// step off it to flush.
    fn write_track_36(drive: &mut Drive, start: u64) {
        drive.set_half_track(72, 0);
        drive.set_read_write_mode(false);
        drive.set_write_value(0x55);
        drive.rotate(start + 200_000);
        drive.move_head(-2);
    }

    #[test]
    fn extend_policy_never_drops_writes() {
        init_logging();
        let (mut drive, start) = ready_drive(DiskImage::from_d64(D64::blank(35).expect("valid")));
        write_track_36(&mut drive, start);
        assert_eq!(drive.image().map(DiskImage::tracks), Some(35));
        assert!(!drive.is_dirty());
    }

    #[test]
    fn extend_policy_ask_remembers_answer() {
        init_logging();
        let asked = Rc::new(Cell::new(0));
        let (mut drive, start) = ready_drive(DiskImage::from_d64(D64::blank(35).expect("valid")));
        drive.set_extend_policy(ExtendPolicy::Ask);
        let counter = Rc::clone(&asked);
        drive.set_extend_prompt(move |unit: u8, number: u8| {
            assert_eq!((unit, number), (8, 0));
            counter.set(counter.get() + 1);
            false
        });
        write_track_36(&mut drive, start);
        write_track_36(&mut drive, start + 200_000);
        assert_eq!(asked.get(), 1);
        assert_eq!(drive.image().map(DiskImage::tracks), Some(35));
    }

    #[test]
    fn extend_policy_on_access_grows_image() {
        init_logging();
        let (mut drive, start) = ready_drive(DiskImage::from_d64(D64::blank(35).expect("valid")));
        drive.set_extend_policy(ExtendPolicy::OnAccess);
        write_track_36(&mut drive, start);
        assert_eq!(drive.image().map(DiskImage::tracks), Some(40));
    }

    #[test]
    fn p64_images_run_the_flux_engine() {
        let mut p64 = P64Image::new();
        let mut bits = vec![0xFF; 5];
        bits.resize(6250, 0x55);
        p64.stream_mut(0, 36).convert_from_gcr(&bits, 6250 * 8);
        let (mut drive, start) = ready_drive(DiskImage::from_p64(p64));
        assert!(drive.is_complicated());
        drive.rotate(start + 44);
        assert!(drive.is_sync());
        assert_ne!(drive.query("rotation.pulse_head_position"), Some(Value::U32(0)));
    }

    #[test]
    fn observable_paths_resolve() {
        let drive = Drive::new(8, 1, DriveConfig::default());
        for &path in drive.query_paths() {
            assert!(drive.query(path).is_some(), "{path}");
        }
        assert_eq!(drive.query("head.half_track"), Some(Value::U32(36)));
        assert_eq!(drive.query("image.kind"), Some(Value::String("none".into())));
        assert_eq!(drive.query("nope"), None);
    }
}
