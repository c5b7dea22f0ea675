//! VM System - the shared TLB, frame pool and address spaces
//!
//! `VmSystem` aggregates every structure the fault handlers mutate. The
//! kernel-wide instance sits behind a single `spin::Mutex`, held for the
//! whole of each handler, so only one mutator touches the TLB and the
//! frame table at a time.

use spin::Mutex;

use crate::config::VmConfig;
use crate::error::{VmError, VmResult};
use crate::types::{AddressSpaceId, FrameNumber, Tick, VirtualPage};
use crate::vm::address_space::AddressSpace;
use crate::vm::dispatch::{ExceptionKind, FaultDispatcher, TrapOutcome};
use crate::vm::fault::{FaultStats, FaultStatsSnapshot};
use crate::vm::frame_table::{FrameOwner, PhysicalFrameTable};
use crate::vm::phys_mem::PhysicalMemory;
use crate::vm::registry::AddressSpaceRegistry;
use crate::vm::tlb::TlbCache;

/// Result of translating one access through the TLB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    /// Physical byte address
    Physical(usize),
    /// The access must trap
    Exception(ExceptionKind),
}

// ============================================================================
// VM System
// ============================================================================

/// Virtual-memory state of the whole machine
#[derive(Debug)]
pub struct VmSystem {
    pub(crate) config: VmConfig,
    pub(crate) registry: AddressSpaceRegistry,
    pub(crate) frames: PhysicalFrameTable,
    pub(crate) tlb: TlbCache,
    pub(crate) memory: PhysicalMemory,
    pub(crate) stats: FaultStats,
    clock: Tick,
}

impl VmSystem {
    pub fn new(config: VmConfig) -> VmResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: AddressSpaceRegistry::new(),
            frames: PhysicalFrameTable::new(config.num_frames, config.policy),
            tlb: TlbCache::new(config.tlb_size, config.policy),
            memory: PhysicalMemory::new(config.num_frames, config.page_size),
            stats: FaultStats::new(),
            clock: 0,
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Advance the tick counter and return the new value
    pub fn tick(&mut self) -> Tick {
        self.clock += 1;
        self.clock
    }

    pub fn now(&self) -> Tick {
        self.clock
    }

    pub fn stats(&self) -> FaultStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn tlb(&self) -> &TlbCache {
        &self.tlb
    }

    pub fn frames(&self) -> &PhysicalFrameTable {
        &self.frames
    }

    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    pub fn registry(&self) -> &AddressSpaceRegistry {
        &self.registry
    }

    pub fn space(&self, id: AddressSpaceId) -> VmResult<&AddressSpace> {
        self.registry.get(id)
    }

    pub fn current_space_id(&self) -> Option<AddressSpaceId> {
        self.registry.current_id()
    }

    // ========================================================================
    // Address space lifecycle
    // ========================================================================

    /// New address space of `num_pages` zero-filled pages
    pub fn create_space(&mut self, num_pages: usize) -> VmResult<AddressSpaceId> {
        if num_pages == 0 {
            return Err(VmError::InvalidConfig(
                "address space must have at least one page",
            ));
        }
        if num_pages.checked_mul(self.config.page_size).is_none() {
            return Err(VmError::InvalidConfig("address space size overflows"));
        }
        let id = self.registry.create(num_pages, self.config.page_size);
        log::debug!("created {} with {} pages", id, num_pages);
        Ok(id)
    }

    /// Copy `data` into the address space at byte `offset`.
    ///
    /// Resident pages are written back before the merge so writes made
    /// through their frames survive; the merged page is then reloaded into
    /// its frame.
    pub fn load_space_bytes(
        &mut self,
        id: AddressSpaceId,
        offset: usize,
        data: &[u8],
    ) -> VmResult<()> {
        let page_size = self.config.page_size;
        let space = self.registry.get_mut(id)?;
        let out_of_range = VmError::AddressOutOfRange {
            space: id,
            vaddr: offset as u64,
        };
        match offset.checked_add(data.len()) {
            Some(end) if end <= space.backing().len() => {}
            _ => return Err(out_of_range),
        }
        if data.is_empty() {
            return Ok(());
        }

        let first = offset / page_size;
        let last = (offset + data.len() - 1) / page_size;
        let resident: alloc::vec::Vec<(VirtualPage, FrameNumber)> = (first..=last)
            .map(VirtualPage)
            .filter_map(|vpn| {
                space
                    .entry(vpn)
                    .filter(|entry| entry.valid)
                    .map(|entry| (vpn, entry.physical_page))
            })
            .collect();

        for &(vpn, frame) in &resident {
            let synced = self
                .memory
                .frame(frame)
                .is_some_and(|bytes| space.store_page(vpn, bytes));
            if !synced {
                return Err(VmError::InconsistentMapping {
                    frame,
                    reason: "resident page outside physical memory",
                });
            }
        }

        if !space.backing_mut().write_bytes(offset, data) {
            return Err(out_of_range);
        }

        for (vpn, frame) in resident {
            let (Some(src), Some(dst)) = (space.page_bytes(vpn), self.memory.frame_mut(frame))
            else {
                return Err(VmError::InconsistentMapping {
                    frame,
                    reason: "resident page outside physical memory",
                });
            };
            dst.copy_from_slice(src);
        }
        Ok(())
    }

    /// Set the read-only attribute of one page
    pub fn set_page_read_only(
        &mut self,
        id: AddressSpaceId,
        vpn: VirtualPage,
        read_only: bool,
    ) -> VmResult<()> {
        let space = self.registry.get_mut(id)?;
        if !space.set_read_only(vpn, read_only) {
            return Err(VmError::AddressOutOfRange {
                space: id,
                vaddr: vpn.byte_offset(self.config.page_size) as u64,
            });
        }
        if self.tlb.space() == Some(id) {
            if let Some(slot) = self.tlb.lookup(vpn).and_then(|i| self.tlb.slot_mut(i)) {
                slot.read_only = read_only;
            }
        }
        Ok(())
    }

    /// Schedule address space `id`.
    ///
    /// The outgoing space's TLB entries are flushed with their dirty bits
    /// written back; the TLB is then scoped to `id`.
    pub fn switch_to(&mut self, id: AddressSpaceId) -> VmResult<()> {
        if !self.registry.contains(id) {
            return Err(VmError::UnknownAddressSpace(id));
        }
        if self.registry.current_id() == Some(id) && self.tlb.space() == Some(id) {
            return Ok(());
        }

        if let Some(outgoing) = self.tlb.space() {
            let space = self.registry.get_mut(outgoing)?;
            let flushed = self.tlb.flush_into(space);
            self.stats.incr_context_flushes();
            log::debug!("context switch {} -> {}: flushed {} TLB entries", outgoing, id, flushed);
        } else {
            self.tlb.clear();
        }

        self.registry.set_current(Some(id))?;
        self.tlb.rescope(Some(id));
        Ok(())
    }

    /// Tear down address space `id`, freeing every frame it occupies.
    ///
    /// Nothing is written back: the backing store dies with the space.
    /// Returns the number of frames reclaimed.
    pub fn destroy_space(&mut self, id: AddressSpaceId) -> VmResult<usize> {
        let space = self.registry.get(id)?;

        let mut reclaimed = 0;
        for (vpn, frame) in space.resident_frames() {
            if self.frames.owner(frame) != Some(FrameOwner { space: id, vpn }) {
                return Err(VmError::InconsistentMapping {
                    frame,
                    reason: "resident page not owned in frame table",
                });
            }
        }
        let resident: alloc::vec::Vec<FrameNumber> =
            space.resident_frames().map(|(_, frame)| frame).collect();
        for frame in resident {
            self.frames.release(frame);
            reclaimed += 1;
        }

        if self.tlb.space() == Some(id) {
            self.tlb.clear();
            self.tlb.rescope(None);
        }
        self.registry.remove(id)?;
        self.stats.add_reclaimed(reclaimed as u64);
        log::debug!("destroyed {}: reclaimed {} frames", id, reclaimed);
        Ok(reclaimed)
    }

    // ========================================================================
    // Translation
    // ========================================================================

    /// Translate one access of the current space through the TLB.
    ///
    /// A hit refreshes recency on the TLB slot and the page-table entry and
    /// sets the slot's dirty bit on writes.
    pub fn translate(&mut self, vaddr: u64, write: bool) -> VmResult<Translation> {
        let page_size = self.config.page_size;
        let space = self.registry.current()?;
        let space_id = space.id;
        let Ok(vpn) = space.page_for(vaddr) else {
            return Ok(Translation::Exception(ExceptionKind::AddressError));
        };

        let Some(index) = self.tlb.lookup(vpn) else {
            return Ok(Translation::Exception(ExceptionKind::TlbMiss));
        };
        let read_only = self.tlb.slot(index).map(|slot| slot.read_only).unwrap_or(false);
        if write && read_only {
            return Ok(Translation::Exception(ExceptionKind::ReadOnly));
        }

        let now = self.tick();
        let Some(slot) = self.tlb.slot_mut(index) else {
            return Ok(Translation::Exception(ExceptionKind::TlbMiss));
        };
        slot.touch(now, write);
        let frame = slot.physical_page;
        if let Some(entry) = self.registry.entry_mut(space_id, vpn) {
            entry.last_used = now;
            entry.use_bit = true;
        }
        self.stats.incr_tlb_hits();

        let offset = (vaddr % page_size as u64) as usize;
        Ok(Translation::Physical(frame.byte_offset(page_size) + offset))
    }

    /// Route a trap to its handler
    pub fn handle(&mut self, kind: ExceptionKind, vaddr: u64) -> VmResult<TrapOutcome> {
        FaultDispatcher::dispatch(self, kind, vaddr)
    }

    // ========================================================================
    // Consistency
    // ========================================================================

    /// Verify that TLB, page tables and frame table agree
    pub fn check_invariants(&self) -> VmResult<()> {
        for frame in (0..self.frames.num_frames()).map(FrameNumber) {
            match (self.frames.is_occupied(frame), self.frames.owner(frame)) {
                (false, None) => {}
                (true, Some(owner)) => {
                    let entry = self.registry.entry(owner.space, owner.vpn).ok_or(
                        VmError::InconsistentMapping {
                            frame,
                            reason: "owner does not resolve",
                        },
                    )?;
                    if !entry.valid || entry.physical_page != frame {
                        return Err(VmError::InconsistentMapping {
                            frame,
                            reason: "owner entry does not map this frame",
                        });
                    }
                }
                _ => {
                    return Err(VmError::InconsistentMapping {
                        frame,
                        reason: "bitmap and reverse map disagree",
                    })
                }
            }
        }

        for space in self.registry.iter() {
            for (vpn, frame) in space.resident_frames() {
                if self.frames.owner(frame) != Some(FrameOwner { space: space.id, vpn }) {
                    return Err(VmError::InconsistentMapping {
                        frame,
                        reason: "valid entry points at a frame it does not own",
                    });
                }
            }
        }

        let slots = self.tlb.slots();
        for (index, slot) in slots.iter().enumerate().filter(|(_, slot)| slot.valid) {
            let frame = slot.physical_page;
            let space = self.tlb.space().ok_or(VmError::InconsistentMapping {
                frame,
                reason: "valid TLB entry with no scoped space",
            })?;
            if slots[index + 1..].iter().any(|other| other.maps(slot.virtual_page)) {
                return Err(VmError::InconsistentMapping {
                    frame,
                    reason: "duplicate TLB entries for one page",
                });
            }
            let entry = self.registry.entry(space, slot.virtual_page);
            if !entry.is_some_and(|entry| entry.valid && entry.physical_page == frame) {
                return Err(VmError::InconsistentMapping {
                    frame,
                    reason: "TLB entry disagrees with page table",
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Global State
// ============================================================================

static VM_SYSTEM: spin::Once<Mutex<VmSystem>> = spin::Once::new();

/// Initialize the kernel-wide VM system
pub fn init(config: VmConfig) -> VmResult<()> {
    if VM_SYSTEM.is_completed() {
        log::warn!("VM system already initialized; ignoring new configuration");
        return Ok(());
    }
    let vm = VmSystem::new(config)?;
    VM_SYSTEM.call_once(|| Mutex::new(vm));
    Ok(())
}

/// Get the kernel-wide VM system
pub fn vm_system() -> VmResult<&'static Mutex<VmSystem>> {
    VM_SYSTEM.get().ok_or(VmError::Uninitialized)
}

/// Run `f` with exclusive access to the VM system
pub fn with_vm<R>(f: impl FnOnce(&mut VmSystem) -> R) -> VmResult<R> {
    let mut vm = vm_system()?.lock();
    Ok(f(&mut vm))
}

/// Service a trap on the kernel-wide VM system
pub fn handle_trap(kind: ExceptionKind, vaddr: u64) -> VmResult<TrapOutcome> {
    with_vm(|vm| vm.handle(kind, vaddr))?
}
