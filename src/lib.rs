//! vmcore - demand-paged virtual memory for a teaching kernel
//!
//! A software-managed TLB in front of per-process page tables, backed by
//! per-process swap regions, sharing one pool of physical frames that is
//! recycled under an LRU or FIFO policy.

#![no_std]

// Kernel-appropriate clippy configuration
// Kernel code often needs explicit casts between address widths
#![allow(clippy::unnecessary_cast)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// Core types
pub mod types;

pub mod config;
pub mod error;
pub mod machine;
pub mod vm;

pub use config::VmConfig;
pub use error::{VmError, VmResult};
pub use machine::Machine;
pub use types::{AddressSpaceId, FrameNumber, Tick, VirtualPage};
pub use vm::{ExceptionKind, ReplacementPolicy, VmSystem};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the kernel-wide VM system
pub fn init(config: VmConfig) -> VmResult<()> {
    vm::init(config)
}
