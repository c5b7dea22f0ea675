//! VM Fault - TLB-miss and page-fault handling
//!
//! ## TLB miss
//!
//! 1. Pick a TLB slot (free first, then by policy)
//! 2. Retire its occupant, carrying the dirty bit into the page table
//! 3. Look up the faulting page in the current page table
//! 4. If the page is not resident, take a page fault first (cascade)
//! 5. Fill the slot from the now-resident page-table entry
//!
//! ## Page fault
//!
//! 1. Find a victim frame (free first, then by policy)
//! 2. Evict it if occupied (writeback + TLB invalidation)
//! 3. Bind the frame and load the page from the backing store
//! 4. Mark the page-table entry resident
//!
//! Neither handler has a rollback path: each either restores the
//! TLB / page table / frame table invariant or returns a fatal error.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::{VmError, VmResult};
use crate::types::{FrameNumber, Tick};
use crate::vm::frame_table::FrameOwner;
use crate::vm::system::VmSystem;

// ============================================================================
// Fault Statistics
// ============================================================================

/// Fault statistics counters
#[derive(Debug, Default)]
pub struct FaultStats {
    /// TLB-miss traps serviced
    pub tlb_misses: AtomicU64,
    /// Translations satisfied by the TLB
    pub tlb_hits: AtomicU64,
    /// Page faults serviced
    pub page_faults: AtomicU64,
    /// Page faults reached through a TLB miss
    pub cascaded: AtomicU64,
    /// Frames taken from a resident page
    pub evictions: AtomicU64,
    /// Evicted pages that had been written
    pub dirty_evictions: AtomicU64,
    /// TLB flushes on context switch
    pub context_flushes: AtomicU64,
    /// Frames freed by address-space teardown
    pub reclaimed: AtomicU64,
}

impl FaultStats {
    pub const fn new() -> Self {
        Self {
            tlb_misses: AtomicU64::new(0),
            tlb_hits: AtomicU64::new(0),
            page_faults: AtomicU64::new(0),
            cascaded: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            dirty_evictions: AtomicU64::new(0),
            context_flushes: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
        }
    }

    pub fn incr_tlb_misses(&self) {
        self.tlb_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_tlb_hits(&self) {
        self.tlb_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_page_faults(&self) {
        self.page_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_cascaded(&self) {
        self.cascaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_evictions(&self, dirty: bool) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        if dirty {
            self.dirty_evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn incr_context_flushes(&self) {
        self.context_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_reclaimed(&self, frames: u64) {
        self.reclaimed.fetch_add(frames, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> FaultStatsSnapshot {
        FaultStatsSnapshot {
            tlb_misses: self.tlb_misses.load(Ordering::Relaxed),
            tlb_hits: self.tlb_hits.load(Ordering::Relaxed),
            page_faults: self.page_faults.load(Ordering::Relaxed),
            cascaded: self.cascaded.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            dirty_evictions: self.dirty_evictions.load(Ordering::Relaxed),
            context_flushes: self.context_flushes.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of `FaultStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStatsSnapshot {
    pub tlb_misses: u64,
    pub tlb_hits: u64,
    pub page_faults: u64,
    pub cascaded: u64,
    pub evictions: u64,
    pub dirty_evictions: u64,
    pub context_flushes: u64,
    pub reclaimed: u64,
}

// ============================================================================
// TLB Miss
// ============================================================================

/// Service a TLB miss at `vaddr` for the current address space.
///
/// Returns the TLB slot now mapping the faulting page.
pub fn handle_tlb_miss(vm: &mut VmSystem, vaddr: u64) -> VmResult<usize> {
    vm.stats.incr_tlb_misses();
    let now = vm.tick();

    let space = vm.registry.current()?;
    let space_id = space.id;
    let vpn = space.page_for(vaddr)?;

    // Already cached: refresh recency and leave everything else alone
    if let Some(index) = vm.tlb.lookup(vpn) {
        if let Some(slot) = vm.tlb.slot_mut(index) {
            slot.last_used = now;
        }
        if let Some(entry) = vm.registry.entry_mut(space_id, vpn) {
            entry.last_used = now;
        }
        log::trace!("tlb miss at {:#x}: {} already in slot {}", vaddr, vpn, index);
        return Ok(index);
    }

    let index = vm.tlb.select_slot().ok_or(VmError::InvalidConfig(
        "TLB must have at least one entry",
    ))?;
    let retired = vm.tlb.retire_slot(index, vm.registry.current_mut()?);

    let resident = vm
        .registry
        .entry(space_id, vpn)
        .map(|entry| entry.valid)
        .unwrap_or(false);
    if !resident {
        vm.stats.incr_cascaded();
        fault_in(vm, vaddr, now)?;
    }

    let entry = vm
        .registry
        .entry(space_id, vpn)
        .copied()
        .filter(|entry| entry.valid)
        .ok_or(VmError::InconsistentMapping {
            frame: FrameNumber(0),
            reason: "page not resident after page fault",
        })?;
    vm.tlb.fill(index, &entry, now);

    log::debug!(
        "tlb miss at {:#x}: {} -> {} in slot {} (retired {:?})",
        vaddr,
        vpn,
        entry.physical_page,
        index,
        retired
    );
    Ok(index)
}

// ============================================================================
// Page Fault
// ============================================================================

/// Make the page containing `vaddr` resident in the current address space.
///
/// Returns the frame now holding the page.
pub fn handle_page_fault(vm: &mut VmSystem, vaddr: u64) -> VmResult<FrameNumber> {
    let now = vm.tick();
    fault_in(vm, vaddr, now)
}

/// Page-fault body, stamping the new mapping with `now`
fn fault_in(vm: &mut VmSystem, vaddr: u64, now: Tick) -> VmResult<FrameNumber> {
    vm.stats.incr_page_faults();

    let space = vm.registry.current()?;
    let space_id = space.id;
    let vpn = space.page_for(vaddr)?;
    if let Some(entry) = space.entry(vpn).filter(|entry| entry.valid) {
        log::trace!("page fault at {:#x}: {} already resident", vaddr, vpn);
        return Ok(entry.physical_page);
    }

    let frame = match vm.frames.find_victim_frame(&vm.registry) {
        Ok(frame) => frame,
        Err(err) => {
            log::error!("page fault at {:#x}: {}", vaddr, err);
            return Err(err);
        }
    };

    if let Some(eviction) = vm
        .frames
        .evict(frame, &mut vm.registry, &mut vm.tlb, &vm.memory)?
    {
        vm.stats.incr_evictions(eviction.dirty);
    }

    let owner = FrameOwner {
        space: space_id,
        vpn,
    };
    vm.frames.bind(frame, owner, &vm.registry, &mut vm.memory)?;

    let entry = vm
        .registry
        .entry_mut(space_id, vpn)
        .ok_or(VmError::InconsistentMapping {
            frame,
            reason: "faulting page vanished from its page table",
        })?;
    entry.map(frame, now);

    log::debug!("page fault at {:#x}: {} of {} -> {}", vaddr, vpn, space_id, frame);
    Ok(frame)
}
