//! Virtual Memory Subsystem
//!
//! Demand paging behind a software-managed TLB:
//! - translation: page mapping shared by page tables and the TLB
//! - policy: LRU / FIFO victim selection
//! - address_space: per-process page table and backing store
//! - registry: live address spaces and the scheduled one
//! - phys_mem: frame storage
//! - frame_table: frame allocation and reverse map
//! - tlb: translation cache
//! - fault: TLB-miss and page-fault handlers
//! - dispatch: trap routing
//! - system: the aggregate and its kernel-wide instance

pub mod address_space;
pub mod dispatch;
pub mod fault;
pub mod frame_table;
pub mod phys_mem;
pub mod policy;
pub mod registry;
pub mod system;
pub mod tlb;
pub mod translation;

pub use address_space::{AddressSpace, BackingStore};
pub use dispatch::{ExceptionKind, FaultDispatcher, TrapOutcome};
pub use fault::{handle_page_fault, handle_tlb_miss, FaultStats, FaultStatsSnapshot};
pub use frame_table::{Eviction, FrameOwner, PhysicalFrameTable};
pub use phys_mem::PhysicalMemory;
pub use policy::{Candidate, ReplacementPolicy};
pub use registry::AddressSpaceRegistry;
pub use system::{handle_trap, vm_system, with_vm, Translation, VmSystem};
pub use tlb::TlbCache;
pub use translation::TranslationEntry;

/// Initialize the VM subsystem
pub fn init(config: crate::config::VmConfig) -> crate::error::VmResult<()> {
    system::init(config)
}
