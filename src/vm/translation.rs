//! Translation Entry - one virtual-to-physical page mapping
//!
//! The same structure lives in two places: as a row of a process page
//! table and as a slot of the TLB cache. The TLB copy is a cache of the
//! page-table copy; its `dirty` bit has to be written back before the slot
//! is reused.

use crate::types::{FrameNumber, Tick, VirtualPage};

/// A single page mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TranslationEntry {
    /// Index into the owning page table
    pub virtual_page: VirtualPage,
    /// Frame holding the data; meaningful only when `valid`
    pub physical_page: FrameNumber,
    /// `physical_page` currently holds the mapped data
    pub valid: bool,
    /// Written through this mapping since it became resident
    pub dirty: bool,
    /// Writes through this mapping are refused
    pub read_only: bool,
    /// Referenced since the hint was last cleared
    pub use_bit: bool,
    /// Tick of the most recent access (LRU key)
    pub last_used: Tick,
    /// Tick at which the mapping was installed (FIFO key)
    pub first_time: Tick,
}

impl TranslationEntry {
    /// Non-resident entry for `vpn`, as built at address-space creation
    pub const fn absent(vpn: VirtualPage) -> Self {
        Self {
            virtual_page: vpn,
            physical_page: FrameNumber(0),
            valid: false,
            dirty: false,
            read_only: false,
            use_bit: false,
            last_used: 0,
            first_time: 0,
        }
    }

    /// Install a fresh mapping to `frame` at tick `now`
    pub fn map(&mut self, frame: FrameNumber, now: Tick) {
        self.physical_page = frame;
        self.valid = true;
        self.dirty = false;
        self.use_bit = false;
        self.last_used = now;
        self.first_time = now;
    }

    /// Drop residency; the frame number is left behind but meaningless
    pub fn invalidate(&mut self) {
        self.valid = false;
        self.use_bit = false;
    }

    /// Record an access at tick `now`
    pub fn touch(&mut self, now: Tick, write: bool) {
        self.last_used = now;
        self.use_bit = true;
        if write {
            self.dirty = true;
        }
    }

    /// Valid and mapping `vpn`
    pub fn maps(&self, vpn: VirtualPage) -> bool {
        self.valid && self.virtual_page == vpn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_resets_state() {
        let mut entry = TranslationEntry::absent(VirtualPage(5));
        assert!(!entry.valid);

        entry.dirty = true;
        entry.map(FrameNumber(2), 40);
        assert!(entry.valid);
        assert!(!entry.dirty);
        assert_eq!(entry.physical_page, FrameNumber(2));
        assert_eq!(entry.last_used, 40);
        assert_eq!(entry.first_time, 40);
        assert!(entry.maps(VirtualPage(5)));
    }

    #[test]
    fn test_touch() {
        let mut entry = TranslationEntry::absent(VirtualPage(1));
        entry.map(FrameNumber(0), 1);

        entry.touch(7, false);
        assert_eq!(entry.last_used, 7);
        assert_eq!(entry.first_time, 1);
        assert!(!entry.dirty);

        entry.touch(9, true);
        assert!(entry.dirty);

        entry.invalidate();
        assert!(!entry.maps(VirtualPage(1)));
    }
}
