//! End-to-end paging scenarios driven through the machine
//!
//! Every access goes through `Machine::read_mem` / `write_mem`, so TLB
//! misses, cascaded page faults and evictions happen exactly as they
//! would for a running user program.

use vmcore::vm::ExceptionKind;
use vmcore::{
    AddressSpaceId, FrameNumber, Machine, ReplacementPolicy, VirtualPage, VmConfig, VmError,
    VmSystem,
};

const PAGE: u64 = 128;

fn boot(tlb_size: usize, num_frames: usize, policy: ReplacementPolicy) -> VmSystem {
    VmSystem::new(
        VmConfig::new()
            .with_tlb_size(tlb_size)
            .with_num_frames(num_frames)
            .with_policy(policy),
    )
    .expect("valid config")
}

/// Space whose page `n` is filled with byte `n + 1`
fn patterned_space(vm: &mut VmSystem, num_pages: usize) -> AddressSpaceId {
    let id = vm.create_space(num_pages).expect("space");
    for vpn in 0..num_pages {
        let fill = [vpn as u8 + 1; PAGE as usize];
        vm.load_space_bytes(id, vpn * PAGE as usize, &fill)
            .expect("load");
    }
    id
}

fn frame_of(vm: &VmSystem, space: AddressSpaceId, vpn: usize) -> Option<FrameNumber> {
    vm.space(space)
        .ok()?
        .entry(VirtualPage(vpn))
        .filter(|entry| entry.valid)
        .map(|entry| entry.physical_page)
}

fn last_used(vm: &VmSystem, space: AddressSpaceId, vpn: usize) -> u64 {
    vm.space(space)
        .expect("space")
        .entry(VirtualPage(vpn))
        .expect("entry")
        .last_used
}

#[test]
fn touch_sequence_0_1_2_0() {
    let mut vm = boot(4, 2, ReplacementPolicy::Lru);
    let space = patterned_space(&mut vm, 3);
    vm.switch_to(space).unwrap();
    let mut machine = Machine::new();

    // pages 0 and 1 fill the two frames
    assert_eq!(machine.read_mem(&mut vm, 0, 1).unwrap(), 1);
    assert_eq!(frame_of(&vm, space, 0), Some(FrameNumber(0)));
    assert_eq!(machine.read_mem(&mut vm, PAGE, 1).unwrap(), 2);
    assert_eq!(frame_of(&vm, space, 1), Some(FrameNumber(1)));
    assert_eq!(vm.frames().free_count(), 0);
    assert_eq!(vm.stats().evictions, 0);

    // page 2 evicts whichever resident page was touched least recently
    let (older, newer) = if last_used(&vm, space, 0) < last_used(&vm, space, 1) {
        (0, 1)
    } else {
        (1, 0)
    };
    let victim_frame = frame_of(&vm, space, older).unwrap();
    assert_eq!(machine.read_mem(&mut vm, 2 * PAGE, 1).unwrap(), 3);
    assert_eq!(frame_of(&vm, space, older), None);
    assert_eq!(frame_of(&vm, space, 2), Some(victim_frame));
    assert!(frame_of(&vm, space, newer).is_some());
    assert!(vm.tlb().lookup(VirtualPage(older)).is_none());
    assert_eq!(vm.stats().evictions, 1);
    vm.check_invariants().unwrap();

    // re-touching page 0 has to fault again since it was evicted
    let faults_before = vm.stats().page_faults;
    assert_eq!(machine.read_mem(&mut vm, 0, 1).unwrap(), 1);
    assert_eq!(vm.stats().page_faults, faults_before + 1);
    vm.check_invariants().unwrap();

    // page 1's data survives whatever happened to its frame
    assert_eq!(machine.read_mem(&mut vm, PAGE + 7, 1).unwrap(), 2);
    vm.check_invariants().unwrap();
}

#[test]
fn fifo_ignores_recency() {
    let mut vm = boot(4, 2, ReplacementPolicy::Fifo);
    let space = patterned_space(&mut vm, 3);
    vm.switch_to(space).unwrap();
    let mut machine = Machine::new();

    machine.read_mem(&mut vm, 0, 1).unwrap();
    machine.read_mem(&mut vm, PAGE, 1).unwrap();
    // keep page 0 hot; FIFO evicts it anyway
    for _ in 0..5 {
        machine.read_mem(&mut vm, 4, 1).unwrap();
    }
    machine.read_mem(&mut vm, 2 * PAGE, 1).unwrap();
    assert_eq!(frame_of(&vm, space, 0), None);
    assert!(frame_of(&vm, space, 1).is_some());

    let mut lru = boot(4, 2, ReplacementPolicy::Lru);
    let space = patterned_space(&mut lru, 3);
    lru.switch_to(space).unwrap();
    machine.read_mem(&mut lru, 0, 1).unwrap();
    machine.read_mem(&mut lru, PAGE, 1).unwrap();
    for _ in 0..5 {
        machine.read_mem(&mut lru, 4, 1).unwrap();
    }
    machine.read_mem(&mut lru, 2 * PAGE, 1).unwrap();
    assert!(frame_of(&lru, space, 0).is_some());
    assert_eq!(frame_of(&lru, space, 1), None);
}

#[test]
fn writes_reach_backing_store_on_eviction() {
    let mut vm = boot(2, 1, ReplacementPolicy::Lru);
    let space = patterned_space(&mut vm, 2);
    vm.switch_to(space).unwrap();
    let mut machine = Machine::new();

    machine.write_mem(&mut vm, 8, 4, 0x1234_5678).unwrap();
    let frame = frame_of(&vm, space, 0).unwrap();
    let resident: Vec<u8> = vm.memory().frame(frame).unwrap().to_vec();

    // the single frame goes to page 1
    machine.read_mem(&mut vm, PAGE, 1).unwrap();
    let stored = vm
        .space(space)
        .unwrap()
        .page_bytes(VirtualPage(0))
        .unwrap()
        .to_vec();
    assert_eq!(stored, resident);
    assert_eq!(&stored[8..12], &0x1234_5678u32.to_le_bytes());
    assert_eq!(vm.stats().dirty_evictions, 1);

    assert_eq!(machine.read_mem(&mut vm, 8, 4).unwrap(), 0x1234_5678);
}

#[test]
fn spaces_share_the_frame_pool() {
    let mut vm = boot(2, 2, ReplacementPolicy::Lru);
    let a = patterned_space(&mut vm, 2);
    let b = vm.create_space(2).unwrap();
    vm.load_space_bytes(b, 0, &[0xbb; 256]).unwrap();
    let mut machine = Machine::new();

    vm.switch_to(a).unwrap();
    machine.write_mem(&mut vm, 0, 1, 0xaa).unwrap();
    machine.read_mem(&mut vm, PAGE, 1).unwrap();

    // b's page 0 has the same vpn as a's page 0 but must not alias it
    vm.switch_to(b).unwrap();
    assert_eq!(machine.read_mem(&mut vm, 0, 1).unwrap(), 0xbb);
    machine.read_mem(&mut vm, PAGE, 1).unwrap();
    assert_eq!(frame_of(&vm, a, 0), None);
    assert_eq!(frame_of(&vm, a, 1), None);
    vm.check_invariants().unwrap();

    vm.switch_to(a).unwrap();
    assert_eq!(machine.read_mem(&mut vm, 0, 1).unwrap(), 0xaa);
    assert_eq!(machine.read_mem(&mut vm, 1, 1).unwrap(), 1);
    vm.check_invariants().unwrap();
}

#[test]
fn teardown_returns_frames() {
    let mut vm = boot(4, 3, ReplacementPolicy::Lru);
    let a = patterned_space(&mut vm, 3);
    let b = patterned_space(&mut vm, 3);
    let mut machine = Machine::new();

    vm.switch_to(a).unwrap();
    for vpn in 0..3 {
        machine.read_mem(&mut vm, vpn * PAGE, 1).unwrap();
    }
    assert_eq!(vm.frames().free_count(), 0);

    vm.switch_to(b).unwrap();
    assert_eq!(vm.destroy_space(a), Ok(3));
    assert_eq!(vm.frames().free_count(), 3);
    assert!(vm.space(a).is_err());

    for vpn in 0..3 {
        machine.read_mem(&mut vm, vpn * PAGE, 1).unwrap();
    }
    assert_eq!(vm.stats().evictions, 0);
    vm.check_invariants().unwrap();
}

#[test]
fn page_fault_trap_without_tlb_miss() {
    let mut vm = boot(4, 2, ReplacementPolicy::Lru);
    let space = patterned_space(&mut vm, 2);
    vm.switch_to(space).unwrap();

    vm.handle(ExceptionKind::PageFault, PAGE).unwrap();
    assert!(frame_of(&vm, space, 1).is_some());
    assert_eq!(vm.tlb().valid_count(), 0);

    // a second fault on a resident page allocates nothing
    vm.handle(ExceptionKind::PageFault, PAGE + 3).unwrap();
    assert_eq!(vm.frames().free_count(), 1);
    vm.check_invariants().unwrap();
}

#[test]
fn no_scheduled_space_is_fatal() {
    let mut vm = boot(4, 2, ReplacementPolicy::Lru);
    let mut machine = Machine::new();
    let err = machine.read_mem(&mut vm, 0, 1).unwrap_err();
    assert_eq!(err, VmError::NoCurrentSpace);
    assert!(err.is_fatal());
}
