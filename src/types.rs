//! Common types used across vmcore
//!
//! Index newtypes shared by the page table, the TLB and the frame pool, so
//! that a virtual page number can never be passed where a frame is expected.

use core::fmt;

/// Address space identifier
///
/// Assigned by the address-space registry; never reused while the
/// registry lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AddressSpaceId(pub u64);

impl fmt::Display for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "as{}", self.0)
    }
}

/// Virtual page number (index into a page table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtualPage(pub usize);

impl VirtualPage {
    /// Page containing `vaddr`
    pub const fn containing(vaddr: u64, page_size: usize) -> Self {
        Self((vaddr / page_size as u64) as usize)
    }

    /// Byte offset of this page inside a backing store
    pub const fn byte_offset(&self, page_size: usize) -> usize {
        self.0 * page_size
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vpn {}", self.0)
    }
}

/// Physical frame number (index into the frame pool)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FrameNumber(pub usize);

impl FrameNumber {
    /// Byte offset of this frame inside physical memory
    pub const fn byte_offset(&self, page_size: usize) -> usize {
        self.0 * page_size
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ppn {}", self.0)
    }
}

/// Value of the process-wide tick counter
pub type Tick = u64;
