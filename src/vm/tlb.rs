//! TLB Cache - emulated translation lookaside buffer
//!
//! A fixed number of `TranslationEntry` slots caching the page table of
//! the currently scheduled address space. The cache remembers which space
//! it is scoped to; a context switch flushes it (writing dirty bits back)
//! and rescopes it to the incoming space.
//!
//! ## Invariants
//!
//! - at most one valid slot per virtual page
//! - every valid slot agrees with a valid page-table entry of the scoped
//!   space on `physical_page`

use alloc::vec;
use alloc::vec::Vec;

use crate::types::{AddressSpaceId, Tick, VirtualPage};
use crate::vm::address_space::AddressSpace;
use crate::vm::policy::{Candidate, ReplacementPolicy};
use crate::vm::translation::TranslationEntry;

/// Software-managed TLB
#[derive(Debug, Clone)]
pub struct TlbCache {
    slots: Vec<TranslationEntry>,
    /// Space the valid slots belong to
    space: Option<AddressSpaceId>,
    policy: ReplacementPolicy,
}

impl TlbCache {
    /// Cache of `size` slots, all invalid
    pub fn new(size: usize, policy: ReplacementPolicy) -> Self {
        Self {
            slots: vec![TranslationEntry::default(); size],
            space: None,
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn policy(&self) -> ReplacementPolicy {
        self.policy
    }

    pub fn space(&self) -> Option<AddressSpaceId> {
        self.space
    }

    pub fn slots(&self) -> &[TranslationEntry] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&TranslationEntry> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut TranslationEntry> {
        self.slots.get_mut(index)
    }

    /// Slot holding a valid mapping of `vpn`
    pub fn lookup(&self, vpn: VirtualPage) -> Option<usize> {
        self.slots.iter().position(|slot| slot.maps(vpn))
    }

    pub fn valid_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.valid).count()
    }

    /// Slot to refill on a miss; invalid slots first
    pub fn select_slot(&self) -> Option<usize> {
        self.policy.select_victim(self.slots.iter().map(|slot| {
            if slot.valid {
                Candidate::occupied(slot.last_used, slot.first_time)
            } else {
                Candidate::FREE
            }
        }))
    }

    /// Retire the occupant of `index`, propagating its dirty bit into the
    /// page table of `space`. Data is untouched; only the flag persists.
    ///
    /// Returns the virtual page that was retired, if the slot was valid.
    pub fn retire_slot(&mut self, index: usize, space: &mut AddressSpace) -> Option<VirtualPage> {
        let slot = self.slots.get_mut(index)?;
        if !slot.valid {
            return None;
        }
        let vpn = slot.virtual_page;
        if slot.dirty {
            if let Some(entry) = space.entry_mut(vpn) {
                entry.dirty = true;
            }
        }
        slot.invalidate();
        Some(vpn)
    }

    /// Load `entry` (a resident page-table entry) into slot `index`
    pub fn fill(&mut self, index: usize, entry: &TranslationEntry, now: Tick) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = TranslationEntry {
                virtual_page: entry.virtual_page,
                physical_page: entry.physical_page,
                valid: true,
                dirty: false,
                read_only: entry.read_only,
                use_bit: false,
                last_used: now,
                first_time: now,
            };
        }
    }

    /// Invalidate every slot mapping `vpn` of `space`.
    ///
    /// The scan is exhaustive. Returns whether any invalidated slot was
    /// dirty, so the caller can carry the bit into the page table.
    pub fn invalidate_page(&mut self, space: AddressSpaceId, vpn: VirtualPage) -> bool {
        if self.space != Some(space) {
            return false;
        }
        let mut dirty = false;
        for slot in self.slots.iter_mut().filter(|slot| slot.maps(vpn)) {
            dirty |= slot.dirty;
            slot.invalidate();
        }
        dirty
    }

    /// Write every dirty bit back into `space` and invalidate all slots
    ///
    /// Returns the number of slots that were valid.
    pub fn flush_into(&mut self, space: &mut AddressSpace) -> usize {
        let mut flushed = 0;
        for index in 0..self.slots.len() {
            if self.retire_slot(index, space).is_some() {
                flushed += 1;
            }
        }
        flushed
    }

    /// Drop every slot without writing anything back
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.invalidate();
        }
    }

    /// Scope the cache to `space`; all slots must already be invalid
    pub fn rescope(&mut self, space: Option<AddressSpaceId>) {
        debug_assert_eq!(self.valid_count(), 0);
        self.space = space;
    }
}
