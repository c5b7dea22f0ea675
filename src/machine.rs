//! Machine - the CPU side of address translation
//!
//! A register file and the two memory operations user code performs.
//! Every access is translated through the TLB; when translation traps,
//! the faulting address goes into `BAD_VADDR_REG`, the trap is handed to
//! the fault dispatcher, and the access is retried.

use crate::error::{VmError, VmResult};
use crate::types::FrameNumber;
use crate::vm::dispatch::{ExceptionKind, FaultDispatcher, TrapOutcome};
use crate::vm::system::{Translation, VmSystem};

// ============================================================================
// Register File Layout
// ============================================================================

/// General purpose registers
pub const NUM_GP_REGS: usize = 32;
/// Multiply result, high word
pub const HI_REG: usize = 32;
/// Multiply result, low word
pub const LO_REG: usize = 33;
/// Current program counter
pub const PC_REG: usize = 34;
/// Next program counter (branch delay)
pub const NEXT_PC_REG: usize = 35;
/// Previous program counter
pub const PREV_PC_REG: usize = 36;
/// Target register of a delayed load
pub const LOAD_REG: usize = 37;
/// Value of a delayed load
pub const LOAD_VALUE_REG: usize = 38;
/// Faulting virtual address on a trap
pub const BAD_VADDR_REG: usize = 39;
pub const NUM_TOTAL_REGS: usize = 40;

/// Syscall number register
pub const SYSCALL_CODE_REG: usize = 2;

/// Width of one instruction
const INSTRUCTION_SIZE: u64 = 4;

/// One miss plus one page fault plus the successful retry
const MAX_TRANSLATION_ATTEMPTS: usize = 3;

// ============================================================================
// Machine
// ============================================================================

/// Emulated CPU state
#[derive(Debug, Clone)]
pub struct Machine {
    registers: [u64; NUM_TOTAL_REGS],
}

impl Machine {
    pub fn new() -> Self {
        let mut registers = [0; NUM_TOTAL_REGS];
        registers[NEXT_PC_REG] = INSTRUCTION_SIZE;
        Self { registers }
    }

    pub fn read_register(&self, index: usize) -> Option<u64> {
        self.registers.get(index).copied()
    }

    pub fn write_register(&mut self, index: usize, value: u64) -> bool {
        match self.registers.get_mut(index) {
            Some(reg) => {
                *reg = value;
                true
            }
            None => false,
        }
    }

    /// Step past the instruction that trapped (syscalls only; faults retry)
    pub fn advance_pc(&mut self) {
        self.registers[PREV_PC_REG] = self.registers[PC_REG];
        self.registers[PC_REG] = self.registers[NEXT_PC_REG];
        self.registers[NEXT_PC_REG] = self.registers[PC_REG] + INSTRUCTION_SIZE;
    }

    /// Deliver trap `kind` for `vaddr` to the dispatcher
    pub fn raise_exception(
        &mut self,
        vm: &mut VmSystem,
        kind: ExceptionKind,
        vaddr: u64,
    ) -> VmResult<TrapOutcome> {
        self.registers[BAD_VADDR_REG] = vaddr;
        FaultDispatcher::dispatch(vm, kind, self.registers[BAD_VADDR_REG])
    }

    /// Read `size` bytes (1, 2 or 4) at `vaddr`, little endian
    pub fn read_mem(&mut self, vm: &mut VmSystem, vaddr: u64, size: usize) -> VmResult<u32> {
        let paddr = self.translate(vm, vaddr, size, false)?;
        let mut buf = [0u8; 4];
        if !vm.memory.read(paddr, &mut buf[..size]) {
            return Err(VmError::UnhandledException(ExceptionKind::BusError));
        }
        Ok(u32::from_le_bytes(buf))
    }

    /// Write the low `size` bytes (1, 2 or 4) of `value` at `vaddr`
    pub fn write_mem(
        &mut self,
        vm: &mut VmSystem,
        vaddr: u64,
        size: usize,
        value: u32,
    ) -> VmResult<()> {
        let paddr = self.translate(vm, vaddr, size, true)?;
        let bytes = value.to_le_bytes();
        if !vm.memory.write(paddr, &bytes[..size]) {
            return Err(VmError::UnhandledException(ExceptionKind::BusError));
        }
        Ok(())
    }

    /// Translate, servicing traps and retrying until the access resolves
    fn translate(
        &mut self,
        vm: &mut VmSystem,
        vaddr: u64,
        size: usize,
        write: bool,
    ) -> VmResult<usize> {
        if !matches!(size, 1 | 2 | 4) || vaddr % size as u64 != 0 {
            self.raise_exception(vm, ExceptionKind::AddressError, vaddr)?;
        }
        for _ in 0..MAX_TRANSLATION_ATTEMPTS {
            match vm.translate(vaddr, write)? {
                Translation::Physical(paddr) => return Ok(paddr),
                Translation::Exception(kind) => {
                    self.raise_exception(vm, kind, vaddr)?;
                }
            }
        }
        Err(VmError::InconsistentMapping {
            frame: FrameNumber(0),
            reason: "translation still missing after servicing its fault",
        })
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;

    fn setup() -> (Machine, VmSystem) {
        let mut vm =
            VmSystem::new(VmConfig::new().with_page_size(16).with_tlb_size(2).with_num_frames(2))
                .unwrap();
        let space = vm.create_space(4).unwrap();
        vm.load_space_bytes(space, 0, b"hello, world....").unwrap();
        vm.switch_to(space).unwrap();
        (Machine::new(), vm)
    }

    #[test]
    fn test_registers() {
        let mut machine = Machine::new();
        assert!(machine.write_register(SYSCALL_CODE_REG, 7));
        assert_eq!(machine.read_register(SYSCALL_CODE_REG), Some(7));
        assert!(!machine.write_register(NUM_TOTAL_REGS, 1));
        assert_eq!(machine.read_register(NUM_TOTAL_REGS), None);

        machine.advance_pc();
        assert_eq!(machine.read_register(PREV_PC_REG), Some(0));
        assert_eq!(machine.read_register(PC_REG), Some(4));
        assert_eq!(machine.read_register(NEXT_PC_REG), Some(8));
    }

    #[test]
    fn test_read_faults_in_page() {
        let (mut machine, mut vm) = setup();
        assert_eq!(machine.read_mem(&mut vm, 0, 1).unwrap(), u32::from(b'h'));
        assert_eq!(machine.read_register(BAD_VADDR_REG), Some(0));
        assert_eq!(machine.read_mem(&mut vm, 4, 4).unwrap(), u32::from_le_bytes(*b"o, w"));

        let stats = vm.stats();
        assert_eq!(stats.tlb_misses, 1);
        assert_eq!(stats.page_faults, 1);
        assert_eq!(stats.tlb_hits, 2);
    }

    #[test]
    fn test_write_survives_eviction() {
        let (mut machine, mut vm) = setup();
        machine.write_mem(&mut vm, 20, 4, 0xdead_beef).unwrap();
        // touch two other pages so page 1 leaves the two-frame pool
        machine.read_mem(&mut vm, 32, 1).unwrap();
        machine.read_mem(&mut vm, 48, 1).unwrap();
        assert!(vm.tlb().lookup(crate::types::VirtualPage(1)).is_none());

        assert_eq!(machine.read_mem(&mut vm, 20, 4).unwrap(), 0xdead_beef);
        assert!(vm.stats().dirty_evictions >= 1);
        vm.check_invariants().unwrap();
    }

    #[test]
    fn test_bad_accesses() {
        let (mut machine, mut vm) = setup();
        assert_eq!(
            machine.read_mem(&mut vm, 2, 4),
            Err(VmError::UnhandledException(ExceptionKind::AddressError))
        );
        assert_eq!(
            machine.read_mem(&mut vm, 64, 1),
            Err(VmError::UnhandledException(ExceptionKind::AddressError))
        );
        vm.set_page_read_only(vm.current_space_id().unwrap(), crate::types::VirtualPage(0), true)
            .unwrap();
        assert_eq!(
            machine.write_mem(&mut vm, 0, 1, 1),
            Err(VmError::ReadOnlyViolation { vaddr: 0 })
        );
    }
}
