//! Fault Dispatcher
//!
//! Routes a trap raised by the machine to the matching VM handler:
//!
//! ```text
//! TRAP -> classify(kind) -> { TlbMiss -> handle_tlb_miss ; PageFault -> handle_page_fault }
//! ```
//!
//! The dispatcher holds no state. Control always returns to the machine,
//! which retries the faulting instruction.

use crate::error::{VmError, VmResult};
use crate::types::FrameNumber;
use crate::vm::fault;
use crate::vm::system::VmSystem;

/// Exception kinds the machine can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ExceptionKind {
    /// Everything ok
    NoException = 0,
    /// Program executed a system call
    Syscall = 1,
    /// No valid translation found
    PageFault = 2,
    /// Write attempted to a read-only page
    ReadOnly = 3,
    /// Translation resulted in an invalid physical address
    BusError = 4,
    /// Unaligned reference or beyond the end of the address space
    AddressError = 5,
    /// Integer overflow in add or sub
    Overflow = 6,
    /// Unimplemented or reserved instruction
    IllegalInstr = 7,
    /// Translation not present in the TLB
    TlbMiss = 8,
}

impl ExceptionKind {
    /// Decode the cause number the machine reports
    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => ExceptionKind::NoException,
            1 => ExceptionKind::Syscall,
            2 => ExceptionKind::PageFault,
            3 => ExceptionKind::ReadOnly,
            4 => ExceptionKind::BusError,
            5 => ExceptionKind::AddressError,
            6 => ExceptionKind::Overflow,
            7 => ExceptionKind::IllegalInstr,
            8 => ExceptionKind::TlbMiss,
            _ => return None,
        })
    }

    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// What a serviced trap produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    /// TLB slot now holding the translation
    TlbFilled(usize),
    /// Frame now holding the page
    PageLoaded(FrameNumber),
}

/// Stateless trap router
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultDispatcher;

impl FaultDispatcher {
    /// Service trap `kind` raised at `vaddr`
    pub fn dispatch(vm: &mut VmSystem, kind: ExceptionKind, vaddr: u64) -> VmResult<TrapOutcome> {
        let result = match kind {
            ExceptionKind::TlbMiss => fault::handle_tlb_miss(vm, vaddr).map(TrapOutcome::TlbFilled),
            ExceptionKind::PageFault => {
                fault::handle_page_fault(vm, vaddr).map(TrapOutcome::PageLoaded)
            }
            ExceptionKind::ReadOnly => Err(VmError::ReadOnlyViolation { vaddr }),
            other => Err(VmError::UnhandledException(other)),
        };
        if let Err(err) = &result {
            log::warn!("{:?} at {:#x} not serviced: {}", kind, vaddr, err);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;

    #[test]
    fn test_codes() {
        for code in 0..9 {
            let kind = ExceptionKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert_eq!(ExceptionKind::from_code(9), None);
    }

    #[test]
    fn test_routing() {
        let mut vm = VmSystem::new(VmConfig::new().with_page_size(16)).unwrap();
        let space = vm.create_space(2).unwrap();
        vm.switch_to(space).unwrap();

        assert!(matches!(
            FaultDispatcher::dispatch(&mut vm, ExceptionKind::PageFault, 0),
            Ok(TrapOutcome::PageLoaded(_))
        ));
        assert!(matches!(
            FaultDispatcher::dispatch(&mut vm, ExceptionKind::TlbMiss, 0),
            Ok(TrapOutcome::TlbFilled(_))
        ));
        assert_eq!(
            FaultDispatcher::dispatch(&mut vm, ExceptionKind::Overflow, 0),
            Err(VmError::UnhandledException(ExceptionKind::Overflow))
        );
        assert_eq!(
            FaultDispatcher::dispatch(&mut vm, ExceptionKind::ReadOnly, 4),
            Err(VmError::ReadOnlyViolation { vaddr: 4 })
        );
    }
}
