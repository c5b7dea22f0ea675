//! Error types for the VM core using thiserror
//!
//! Every VM-core error is fatal to the handler that raised it: a handler
//! either restores the TLB / page table / frame table invariant or the
//! faulting process is terminated. There is no retry path.

use thiserror::Error;

use crate::types::{AddressSpaceId, FrameNumber};
use crate::vm::dispatch::ExceptionKind;

/// Result alias for VM-core operations
pub type VmResult<T> = Result<T, VmError>;

/// Top-level error type for the VM core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// No free frame and no evictable frame (pool smaller than working-set floor)
    #[error("frame exhaustion: no free frame and no eviction candidate")]
    FrameExhaustion,

    /// Internal invariant violation between TLB, page table and frame table
    #[error("inconsistent mapping at {frame}: {reason}")]
    InconsistentMapping {
        frame: FrameNumber,
        reason: &'static str,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("address {vaddr:#x} outside of {space}")]
    AddressOutOfRange { space: AddressSpaceId, vaddr: u64 },

    #[error("unknown address space {0}")]
    UnknownAddressSpace(AddressSpaceId),

    #[error("VM system not initialized")]
    Uninitialized,

    #[error("no address space is scheduled")]
    NoCurrentSpace,

    #[error("write to read-only page at {vaddr:#x}")]
    ReadOnlyViolation { vaddr: u64 },

    #[error("unhandled exception {0:?}")]
    UnhandledException(ExceptionKind),
}

impl VmError {
    /// Whether this error terminates the faulting process
    ///
    /// Configuration and lookup errors are reported to the caller that
    /// set things up; everything raised from inside a handler is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            VmError::InvalidConfig(_) | VmError::UnknownAddressSpace(_) | VmError::Uninitialized
        )
    }
}
