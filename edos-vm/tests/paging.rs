//! Demand-paging scenarios: lazy population, swap round trips, violations,
//! and process teardown, including under concurrent faults.

mod common;

use common::*;
use edos::KernelError;
use edos_vm::{MmStruct, STACK_TOP, fault::FaultInfo, map_stack};
use std::sync::Arc;

const BASE: usize = 0x10_0000;

#[test]
fn demand_zero_page_is_lazy_and_zeroed() {
    let vm = vm(2, 4);
    let mm = MmStruct::new(1);
    mm.map_zero(va(BASE), 1, true).unwrap();
    assert!(!resident(&mm, BASE), "mapping alone must not consume a frame");
    assert_eq!(vm.frames().free_frames(), 2);

    vm.with_user_page(&mm, va(BASE), false, |bytes| {
        assert!(bytes.iter().all(|&b| b == 0), "fresh page must read as zero");
    })
    .unwrap();
    assert!(resident(&mm, BASE));
    assert_eq!(vm.frames().free_frames(), 1);
    vm.assert_consistent();
}

#[test]
fn writes_survive_eviction_through_swap() {
    let vm = vm(2, 8);
    let mm = MmStruct::new(1);
    mm.map_zero(va(BASE), 3, true).unwrap();

    for i in 0..3 {
        fill_page(&vm, &mm, BASE + i * PAGE, 0x40 + i as u8, PAGE);
    }
    // Three pages, two frames: at least one page went to swap.
    assert!(vm.swap().free_slots() < 8, "eviction must have used swap");

    for i in 0..3 {
        assert_eq!(
            first_byte(&vm, &mm, BASE + i * PAGE),
            0x40 + i as u8,
            "page contents must survive eviction and swap-in"
        );
    }
    vm.assert_consistent();
}

#[test]
fn swap_in_frees_the_slot() {
    let vm = vm(1, 4);
    let mm = MmStruct::new(1);
    mm.map_zero(va(BASE), 2, true).unwrap();

    fill_page(&vm, &mm, BASE, 0xAA, PAGE);
    fill_page(&vm, &mm, BASE + PAGE, 0xBB, PAGE);
    assert_eq!(vm.swap().free_slots(), 3, "first page went to swap");

    // Reading the first page back swaps the second one out and frees the
    // first one's slot; occupancy stays at one.
    assert_eq!(first_byte(&vm, &mm, BASE), 0xAA);
    assert_eq!(vm.swap().free_slots(), 3);
    vm.assert_consistent();
}

#[test]
fn segment_pages_populate_from_the_image() {
    let vm = vm(2, 4);
    let mm = MmStruct::new(1);
    let seg = Arc::new(PatternSegment { seed: 17 });
    mm.map_segment(va(BASE), 2, false, seg.clone(), 0).unwrap();

    vm.with_user_page(&mm, va(BASE + PAGE), false, |bytes| {
        assert_eq!(bytes[0], seg.byte_at(PAGE));
        assert_eq!(bytes[100], seg.byte_at(PAGE + 100));
    })
    .unwrap();
    assert!(!resident(&mm, BASE), "untouched segment page stays lazy");
}

#[test]
fn read_only_segment_is_evicted_without_swap() {
    let vm = vm(1, 4);
    let mm = MmStruct::new(1);
    let seg = Arc::new(PatternSegment { seed: 3 });
    mm.map_segment(va(BASE), 2, false, seg.clone(), 0).unwrap();

    assert_eq!(first_byte(&vm, &mm, BASE), seg.byte_at(0));
    assert_eq!(first_byte(&vm, &mm, BASE + PAGE), seg.byte_at(PAGE));
    assert!(!resident(&mm, BASE), "single frame forces eviction");
    assert_eq!(
        vm.swap().free_slots(),
        4,
        "clean pages must be dropped, not swapped"
    );
    // Refault repopulates from the image.
    assert_eq!(first_byte(&vm, &mm, BASE), seg.byte_at(0));
}

#[test]
fn writable_segment_pages_keep_their_stores() {
    let vm = vm(1, 4);
    let mm = MmStruct::new(1);
    let seg = Arc::new(PatternSegment { seed: 9 });
    mm.map_segment(va(BASE), 2, true, seg.clone(), 0).unwrap();

    fill_page(&vm, &mm, BASE, 0x77, 8);
    // Evict the written page, then bring it back.
    assert_eq!(first_byte(&vm, &mm, BASE + PAGE), seg.byte_at(PAGE));
    assert_eq!(
        first_byte(&vm, &mm, BASE),
        0x77,
        "a written segment page must come back from swap, not the image"
    );
}

#[test]
fn fault_outside_any_mapping_is_a_violation() {
    let vm = vm(2, 4);
    let mm = MmStruct::new(1);
    let result = vm.handle_page_fault(
        &mm,
        &FaultInfo {
            addr: va(0xdead_b000),
            is_write: false,
            is_user: true,
        },
    );
    assert_eq!(result, Err(KernelError::InvalidAccess));
}

#[test]
fn write_fault_on_read_only_page_is_a_violation() {
    let vm = vm(2, 4);
    let mm = MmStruct::new(1);
    let seg = Arc::new(PatternSegment { seed: 0 });
    mm.map_segment(va(BASE), 1, false, seg, 0).unwrap();

    let result = vm.handle_page_fault(
        &mm,
        &FaultInfo {
            addr: va(BASE + 4),
            is_write: true,
            is_user: true,
        },
    );
    assert_eq!(result, Err(KernelError::InvalidAccess));
    assert!(!resident(&mm, BASE), "a violation must not consume a frame");
}

#[test]
fn refault_on_a_resident_page_is_benign() {
    let vm = vm(2, 4);
    let mm = MmStruct::new(1);
    mm.map_zero(va(BASE), 1, true).unwrap();

    let info = FaultInfo {
        addr: va(BASE),
        is_write: true,
        is_user: true,
    };
    vm.handle_page_fault(&mm, &info).unwrap();
    vm.handle_page_fault(&mm, &info).unwrap();
    assert_eq!(vm.frames().free_frames(), 1, "the second fault must be a no-op");
}

#[test]
fn stack_pages_fault_in_from_the_top() {
    let vm = vm(2, 4);
    let mm = MmStruct::new(1);
    map_stack(&mm).unwrap();

    vm.with_user_page(&mm, va(STACK_TOP - 8), true, |bytes| {
        assert_eq!(bytes.len(), 8);
        bytes.fill(0xCD);
    })
    .unwrap();
    assert!(resident(&mm, STACK_TOP - PAGE));
    assert_eq!(vm.frames().free_frames(), 1, "only the touched page is backed");
}

#[test]
fn exit_releases_frames_and_swap() {
    let vm = vm(2, 8);
    let mm = MmStruct::new(1);
    mm.map_zero(va(BASE), 3, true).unwrap();
    for i in 0..3 {
        fill_page(&vm, &mm, BASE + i * PAGE, i as u8 + 1, 16);
    }
    assert_eq!(vm.frames().free_frames(), 0);
    assert!(vm.swap().free_slots() < 8);

    vm.exit(&mm);
    assert_eq!(vm.frames().free_frames(), 2, "exit must return every frame");
    assert_eq!(vm.swap().free_slots(), 8, "exit must free held swap slots");
    assert!(mm.spt().is_empty());
    vm.assert_consistent();
}

#[test]
fn concurrent_faults_on_distinct_pages_preserve_contents() {
    const THREADS: usize = 4;
    const PAGES_PER_THREAD: usize = 4;

    // Fewer frames than pages, so the threads evict each other's pages.
    let vm = Arc::new(vm(3, 32));
    let mm = Arc::new(MmStruct::new(1));
    mm.map_zero(va(BASE), THREADS * PAGES_PER_THREAD, true)
        .unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let vm = Arc::clone(&vm);
            let mm = Arc::clone(&mm);
            std::thread::spawn(move || {
                for round in 0..8u8 {
                    for p in 0..PAGES_PER_THREAD {
                        let addr = BASE + (t * PAGES_PER_THREAD + p) * PAGE;
                        let tag = (t as u8) << 4 | (p as u8);
                        fill_page(&vm, &mm, addr, tag.wrapping_add(round), PAGE);
                        assert_eq!(first_byte(&vm, &mm, addr), tag.wrapping_add(round));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..THREADS {
        for p in 0..PAGES_PER_THREAD {
            let addr = BASE + (t * PAGES_PER_THREAD + p) * PAGE;
            let tag = ((t as u8) << 4 | (p as u8)).wrapping_add(7);
            assert_eq!(first_byte(&vm, &mm, addr), tag);
        }
    }
    vm.assert_consistent();
}

#[test]
fn concurrent_faults_on_the_same_page_resolve_once() {
    let vm = Arc::new(vm(2, 4));
    let mm = Arc::new(MmStruct::new(1));
    mm.map_zero(va(BASE), 1, true).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let vm = Arc::clone(&vm);
            let mm = Arc::clone(&mm);
            std::thread::spawn(move || {
                vm.handle_page_fault(
                    &mm,
                    &FaultInfo {
                        addr: va(BASE),
                        is_write: true,
                        is_user: true,
                    },
                )
                .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(
        vm.frames().free_frames(),
        1,
        "racing faults on one page must settle on one frame"
    );
    vm.assert_consistent();
}
