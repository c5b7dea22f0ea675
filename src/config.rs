//! VM configuration
//!
//! Machine geometry and replacement policy, fixed at construction time.

use crate::error::{VmError, VmResult};
use crate::vm::policy::ReplacementPolicy;

// ============================================================================
// Defaults
// ============================================================================

/// Default page size in bytes (equal to the disk sector size)
pub const DEFAULT_PAGE_SIZE: usize = 128;

/// Default number of TLB entries
pub const DEFAULT_TLB_SIZE: usize = 4;

/// Default number of physical frames
pub const DEFAULT_NUM_FRAMES: usize = 32;

// ============================================================================
// Configuration
// ============================================================================

/// Geometry of the emulated machine and the replacement policy in force
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Bytes per page and per frame
    pub page_size: usize,
    /// Number of TLB slots
    pub tlb_size: usize,
    /// Number of physical frames in the shared pool
    pub num_frames: usize,
    /// Victim selection for both the TLB and the frame pool
    pub policy: ReplacementPolicy,
}

impl VmConfig {
    pub const fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            tlb_size: DEFAULT_TLB_SIZE,
            num_frames: DEFAULT_NUM_FRAMES,
            policy: ReplacementPolicy::Lru,
        }
    }

    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub const fn with_tlb_size(mut self, tlb_size: usize) -> Self {
        self.tlb_size = tlb_size;
        self
    }

    pub const fn with_num_frames(mut self, num_frames: usize) -> Self {
        self.num_frames = num_frames;
        self
    }

    pub const fn with_policy(mut self, policy: ReplacementPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Total bytes of physical memory, `None` if it overflows `usize`
    pub const fn memory_size(&self) -> Option<usize> {
        self.page_size.checked_mul(self.num_frames)
    }

    /// Reject geometries the fault handlers cannot work with
    pub fn validate(&self) -> VmResult<()> {
        if self.page_size == 0 {
            return Err(VmError::InvalidConfig("page size must be non-zero"));
        }
        if self.page_size % 4 != 0 {
            return Err(VmError::InvalidConfig("page size must be a multiple of the word size"));
        }
        if self.tlb_size == 0 {
            return Err(VmError::InvalidConfig("TLB must have at least one entry"));
        }
        if self.num_frames == 0 {
            return Err(VmError::InvalidConfig("frame pool must have at least one frame"));
        }
        if self.memory_size().is_none() {
            return Err(VmError::InvalidConfig("physical memory size overflows"));
        }
        Ok(())
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VmConfig::default();
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.tlb_size, DEFAULT_TLB_SIZE);
        assert_eq!(config.num_frames, DEFAULT_NUM_FRAMES);
        assert_eq!(config.policy, ReplacementPolicy::Lru);
        assert_eq!(config.memory_size(), Some(128 * 32));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let config = VmConfig::new().with_num_frames(0);
        assert!(matches!(config.validate(), Err(VmError::InvalidConfig(_))));
        let config = VmConfig::new().with_tlb_size(0);
        assert!(config.validate().is_err());
        let config = VmConfig::new().with_page_size(0);
        assert!(config.validate().is_err());
        let config = VmConfig::new().with_page_size(6);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_overflowing_memory() {
        let config = VmConfig::new().with_num_frames(usize::MAX / 64);
        assert_eq!(config.memory_size(), None);
        assert_eq!(
            config.validate(),
            Err(VmError::InvalidConfig("physical memory size overflows"))
        );
    }
}
