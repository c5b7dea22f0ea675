//! Physical Frame Table - global frame allocation and reverse map
//!
//! A bitmap marks each frame free or occupied; a parallel array records,
//! for each occupied frame, which `(address space, virtual page)` lives in
//! it. The reverse map is a lookup key resolved through the registry,
//! never an ownership relation.
//!
//! ## Eviction
//!
//! `evict` writes the frame back to the owner's backing store, invalidates
//! the owner's page-table entry and every TLB slot caching it, and only
//! then frees the frame. `bind` refuses a frame that is still owned.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{VmError, VmResult};
use crate::types::{AddressSpaceId, FrameNumber, VirtualPage};
use crate::vm::phys_mem::PhysicalMemory;
use crate::vm::policy::{Candidate, ReplacementPolicy};
use crate::vm::registry::AddressSpaceRegistry;
use crate::vm::tlb::TlbCache;

// ============================================================================
// Frame Bitmap
// ============================================================================

const WORD_BITS: usize = u64::BITS as usize;

/// Allocation bitmap, one bit per frame
#[derive(Debug, Clone)]
pub struct FrameBitmap {
    words: Vec<u64>,
    num_bits: usize,
}

impl FrameBitmap {
    pub fn new(num_bits: usize) -> Self {
        Self {
            words: vec![0; num_bits.div_ceil(WORD_BITS)],
            num_bits,
        }
    }

    pub fn len(&self) -> usize {
        self.num_bits
    }

    pub fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    pub fn mark(&mut self, bit: usize) {
        if bit < self.num_bits {
            self.words[bit / WORD_BITS] |= 1 << (bit % WORD_BITS);
        }
    }

    pub fn clear(&mut self, bit: usize) {
        if bit < self.num_bits {
            self.words[bit / WORD_BITS] &= !(1 << (bit % WORD_BITS));
        }
    }

    pub fn test(&self, bit: usize) -> bool {
        bit < self.num_bits && self.words[bit / WORD_BITS] & (1 << (bit % WORD_BITS)) != 0
    }

    /// Lowest clear bit
    pub fn find_clear(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)
            .map(|(index, word)| index * WORD_BITS + word.trailing_ones() as usize)
            .filter(|bit| *bit < self.num_bits)
    }

    pub fn count_clear(&self) -> usize {
        let set: usize = self.words.iter().map(|w| w.count_ones() as usize).sum();
        self.num_bits - set
    }
}

// ============================================================================
// Reverse Mapping
// ============================================================================

/// Which page occupies a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameOwner {
    pub space: AddressSpaceId,
    pub vpn: VirtualPage,
}

/// What an eviction displaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub frame: FrameNumber,
    pub owner: FrameOwner,
    /// The page had been written since it was loaded
    pub dirty: bool,
}

// ============================================================================
// Frame Table
// ============================================================================

/// Global frame pool bookkeeping
#[derive(Debug, Clone)]
pub struct PhysicalFrameTable {
    bitmap: FrameBitmap,
    owners: Vec<Option<FrameOwner>>,
    policy: ReplacementPolicy,
}

impl PhysicalFrameTable {
    pub fn new(num_frames: usize, policy: ReplacementPolicy) -> Self {
        Self {
            bitmap: FrameBitmap::new(num_frames),
            owners: vec![None; num_frames],
            policy,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.owners.len()
    }

    pub fn free_count(&self) -> usize {
        self.bitmap.count_clear()
    }

    pub fn is_occupied(&self, frame: FrameNumber) -> bool {
        self.bitmap.test(frame.0)
    }

    /// Reverse mapping of `frame`
    pub fn owner(&self, frame: FrameNumber) -> Option<FrameOwner> {
        self.owners.get(frame.0).copied().flatten()
    }

    /// Occupied frames with their owners
    pub fn occupied(&self) -> impl Iterator<Item = (FrameNumber, FrameOwner)> + '_ {
        self.owners
            .iter()
            .enumerate()
            .filter_map(|(frame, owner)| owner.map(|owner| (FrameNumber(frame), owner)))
    }

    /// First free frame, otherwise the policy's pick among occupied frames.
    ///
    /// Recency comes from the owners' page-table entries.
    pub fn find_victim_frame(&self, registry: &AddressSpaceRegistry) -> VmResult<FrameNumber> {
        if let Some(frame) = self.bitmap.find_clear() {
            return Ok(FrameNumber(frame));
        }

        let mut candidates = Vec::with_capacity(self.owners.len());
        for (frame, owner) in self.owners.iter().enumerate() {
            let owner = owner.ok_or(VmError::InconsistentMapping {
                frame: FrameNumber(frame),
                reason: "occupied frame without owner",
            })?;
            let entry = registry
                .entry(owner.space, owner.vpn)
                .ok_or(VmError::InconsistentMapping {
                    frame: FrameNumber(frame),
                    reason: "owner does not resolve to a page-table entry",
                })?;
            candidates.push(Candidate::occupied(entry.last_used, entry.first_time));
        }

        self.policy
            .select_victim(candidates)
            .map(FrameNumber)
            .ok_or(VmError::FrameExhaustion)
    }

    /// Empty `frame`, writing its contents back to the owner first.
    ///
    /// Returns `None` when the frame was already free.
    pub fn evict(
        &mut self,
        frame: FrameNumber,
        registry: &mut AddressSpaceRegistry,
        tlb: &mut TlbCache,
        memory: &PhysicalMemory,
    ) -> VmResult<Option<Eviction>> {
        if !self.is_occupied(frame) {
            return Ok(None);
        }
        let owner = self.owner(frame).ok_or(VmError::InconsistentMapping {
            frame,
            reason: "occupied frame without owner",
        })?;

        let tlb_dirty = tlb.invalidate_page(owner.space, owner.vpn);

        let space = registry
            .get_mut(owner.space)
            .map_err(|_| VmError::InconsistentMapping {
                frame,
                reason: "owner address space is gone",
            })?;
        let entry = space
            .entry_mut(owner.vpn)
            .ok_or(VmError::InconsistentMapping {
                frame,
                reason: "owner page outside its page table",
            })?;
        if !entry.valid || entry.physical_page != frame {
            return Err(VmError::InconsistentMapping {
                frame,
                reason: "stale reverse mapping",
            });
        }
        let dirty = entry.dirty || tlb_dirty;
        entry.dirty = dirty;
        entry.invalidate();

        let data = memory.frame(frame).ok_or(VmError::InconsistentMapping {
            frame,
            reason: "frame outside physical memory",
        })?;
        if !space.store_page(owner.vpn, data) {
            return Err(VmError::InconsistentMapping {
                frame,
                reason: "backing store too small for owner page",
            });
        }

        self.release(frame);
        log::debug!(
            "evicted {} ({} of {}, dirty={})",
            frame,
            owner.vpn,
            owner.space,
            dirty
        );
        Ok(Some(Eviction {
            frame,
            owner,
            dirty,
        }))
    }

    /// Give `frame` to `owner` and load the owner's page into it
    pub fn bind(
        &mut self,
        frame: FrameNumber,
        owner: FrameOwner,
        registry: &AddressSpaceRegistry,
        memory: &mut PhysicalMemory,
    ) -> VmResult<()> {
        if frame.0 >= self.owners.len() {
            return Err(VmError::InconsistentMapping {
                frame,
                reason: "frame outside the pool",
            });
        }
        if self.is_occupied(frame) || self.owners[frame.0].is_some() {
            return Err(VmError::InconsistentMapping {
                frame,
                reason: "bind over an owned frame",
            });
        }

        let space = registry.get(owner.space)?;
        let data = space
            .page_bytes(owner.vpn)
            .ok_or(VmError::AddressOutOfRange {
                space: owner.space,
                vaddr: owner.vpn.byte_offset(space.page_size()) as u64,
            })?;
        let dst = memory.frame_mut(frame).ok_or(VmError::InconsistentMapping {
            frame,
            reason: "frame outside physical memory",
        })?;
        dst.copy_from_slice(data);

        self.bitmap.mark(frame.0);
        self.owners[frame.0] = Some(owner);
        Ok(())
    }

    /// Free `frame` without any writeback
    pub fn release(&mut self, frame: FrameNumber) {
        self.bitmap.clear(frame.0);
        if let Some(owner) = self.owners.get_mut(frame.0) {
            *owner = None;
        }
    }
}
