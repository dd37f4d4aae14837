//! Shadow copies of what the VIC sees of ROMH in Ultimax mode.
//!
//! The VIC fetches the upper 4 KiB of ROMH wherever it would otherwise see
//! $1000-$1FFF, $3000-$3FFF, etc. Renderers that want a plain byte slice
//! get one from here; each lookup re-reads the byte under `addr` and
//! refills the whole buffer when its mapping changed.

use crate::ExportLines;

const SIZE: usize = 0x1000;

#[derive(Debug, Clone, Default)]
pub(crate) struct PhiCache {
    data: Vec<u8>,
    /// `false` where the VIC sees C64 memory instead of the cartridge.
    mapped: Vec<bool>,
    valid: bool,
    /// Ultimax state the buffer was filled under.
    last: bool,
}

impl PhiCache {
    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
    }

    fn update(&mut self, ultimax: bool) {
        if self.last != ultimax {
            self.valid = false;
        }
    }

    #[must_use]
    pub(crate) fn is_valid(&self) -> bool {
        self.valid
    }

    /// Refresh the buffer for a lookup at `addr`. `read` returns what the
    /// VIC sees at a $1000-$1FFF address, or `None` for C64 memory.
    pub(crate) fn validate(&mut self, addr: u16, ultimax: bool, mut read: impl FnMut(u16) -> Option<u8>) {
        if self.data.len() != SIZE {
            self.data = vec![0; SIZE];
            self.mapped = vec![false; SIZE];
            self.valid = false;
        }
        let n = usize::from(addr & 0x0fff);
        let value = read(0x1000 + n as u16);
        if let Some(v) = value {
            self.data[n] = v;
        }
        if value.is_some() != self.mapped[n] {
            self.valid = false;
        }
        if !self.valid {
            for n in 0..SIZE {
                match read(0x1000 + n as u16) {
                    Some(v) => {
                        self.data[n] = v;
                        self.mapped[n] = true;
                    }
                    None => self.mapped[n] = false,
                }
            }
            self.valid = true;
            self.last = ultimax;
        }
    }

    /// The run of mapped bytes starting at `addr`.
    pub(crate) fn slice(&self, addr: u16) -> Option<&[u8]> {
        let n = usize::from(addr & 0x0fff);
        if !self.mapped.get(n).copied().unwrap_or(false) {
            return None;
        }
        let end = self.mapped[n..]
            .iter()
            .position(|&m| !m)
            .map_or(SIZE, |p| n + p);
        Some(&self.data[n..end])
    }
}

/// Both halves of the cycle.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemPtr {
    pub(crate) phi1: PhiCache,
    pub(crate) phi2: PhiCache,
}

impl MemPtr {
    /// Drop buffers whose Ultimax state changed since they were filled.
    pub(crate) fn update(&mut self, export: &ExportLines) {
        self.phi1.update(export.ultimax_phi1);
        self.phi2.update(export.ultimax_phi2);
    }

    pub(crate) fn reset(&mut self) {
        self.phi1.invalidate();
        self.phi2.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_lookup_fills_the_buffer() {
        let mut cache = PhiCache::default();
        let mut reads = 0;
        cache.validate(0x3005, true, |a| {
            reads += 1;
            Some((a & 0xff) as u8)
        });
        assert!(cache.is_valid());
        assert_eq!(reads, 1 + SIZE);
        let s = cache.slice(0x3005).expect("valid");
        assert_eq!(s.len(), SIZE - 5);
        assert_eq!(s[0], 0x05);
    }

    #[test]
    fn unchanged_mapping_reads_one_byte() {
        let mut cache = PhiCache::default();
        cache.validate(0, true, |_| Some(0xAA));
        let mut reads = 0;
        cache.validate(0x10, true, |_| {
            reads += 1;
            Some(0xBB)
        });
        assert_eq!(reads, 1);
        // The byte under the lookup is refreshed, the rest is stale.
        assert_eq!(cache.slice(0x10).expect("valid")[0], 0xBB);
        assert_eq!(cache.slice(0x11).expect("valid")[0], 0xAA);
    }

    #[test]
    fn mapping_change_under_lookup_refills() {
        let mut cache = PhiCache::default();
        cache.validate(0, true, |_| Some(0xAA));
        let mut reads = 0;
        cache.validate(0x20, true, |a| {
            reads += 1;
            (a >= 0x1800).then_some(0xCC)
        });
        assert_eq!(reads, 1 + SIZE);
        assert!(cache.slice(0x20).is_none());
        let s = cache.slice(0x1800).expect("valid");
        assert_eq!(s.len(), 0x800);
        assert_eq!(cache.slice(0x17ff), None);
    }

    #[test]
    fn run_stops_at_first_unmapped_byte() {
        let mut cache = PhiCache::default();
        cache.validate(0, false, |a| (a != 0x1010).then_some(1));
        assert_eq!(cache.slice(0x1000).expect("valid").len(), 0x10);
    }

    #[test]
    fn ultimax_change_invalidates_only_that_phase() {
        let mut m = MemPtr::default();
        m.phi1.validate(0, false, |_| Some(0));
        m.phi2.validate(0, false, |_| Some(0));
        m.update(&ExportLines {
            ultimax_phi2: true,
            ..ExportLines::NONE
        });
        assert!(m.phi1.is_valid());
        assert!(!m.phi2.is_valid());
        m.reset();
        assert!(!m.phi1.is_valid());
    }
}
