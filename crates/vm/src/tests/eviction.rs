use alloc::{sync::Arc, vec::Vec};
use std::thread;

use super::mock::{Fixture, MockFile, MockInode, PAGE, assert_frame_bijection};
use crate::{PageTable, Vaddr, VmError};

fn va(addr: usize) -> Vaddr {
    Vaddr::from_usize(addr)
}

fn is_resident(space: &crate::AddressSpace, addr: usize) -> bool {
    space.find_page(va(addr)).unwrap().lock().is_resident()
}

#[test]
fn test_swap_round_trip() {
    let fx = Fixture::new(2, 4);
    let (mut space, _mmu) = fx.space(1);
    for i in 1..=3 {
        space.alloc_anon(va(i * PAGE), true).unwrap();
        space.write_bytes_at(i * PAGE, &[i as u8; PAGE]).unwrap();
    }
    assert_eq!(fx.vm.frames().evictions(), 1);
    assert_eq!(fx.resident(), 2);

    for i in 1..=3 {
        let mut buf = [0u8; PAGE];
        space.read_bytes_at(i * PAGE, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == i as u8), "page {} corrupted", i);
    }
    assert!(fx.vm.frames().evictions() >= 2);
    assert_eq!(fx.resident(), 2);
    assert_frame_bijection(&fx, &[&space]);
}

#[test]
fn test_swap_slot_reused_and_released() {
    let fx = Fixture::new(1, 4);
    let (mut space, _mmu) = fx.space(1);
    space.alloc_anon(va(0x1000), true).unwrap();
    space.alloc_anon(va(0x2000), true).unwrap();

    space.write_bytes_at(0x1000, b"a").unwrap();
    space.write_bytes_at(0x2000, b"b").unwrap();
    let slot = space.find_page(va(0x1000)).unwrap().lock().anon().unwrap().swap_slot();
    assert!(slot.is_some());
    assert_eq!(fx.vm.swap().used_slots(), 1);

    // 来回换出不会占用新的槽位
    space.write_bytes_at(0x1000, b"c").unwrap();
    space.write_bytes_at(0x2000, b"d").unwrap();
    assert_eq!(fx.vm.swap().used_slots(), 2);
    let again = space.find_page(va(0x1000)).unwrap().lock().anon().unwrap().swap_slot();
    assert_eq!(again, slot);

    space.remove_page(va(0x1000));
    assert_eq!(fx.vm.swap().used_slots(), 1);
}

#[test]
fn test_clock_clears_accessed_bits_then_evicts_head() {
    let fx = Fixture::new(3, 4);
    let (mut space, mmu) = fx.space(1);
    for i in 1..=3 {
        space.alloc_anon(va(i * PAGE), true).unwrap();
        space.write_bytes_at(i * PAGE, b"x").unwrap();
        assert!(mmu.pte(i * PAGE).unwrap().accessed);
    }

    space.alloc_anon(va(4 * PAGE), true).unwrap();
    space.claim_page(va(4 * PAGE)).unwrap();

    assert!(!is_resident(&space, PAGE));
    assert!(mmu.pte(PAGE).is_none());
    for i in 2..=3 {
        assert!(is_resident(&space, i * PAGE));
        assert!(!mmu.pte(i * PAGE).unwrap().accessed);
    }
    assert_frame_bijection(&fx, &[&space]);
}

#[test]
fn test_clock_prefers_unaccessed_page() {
    let fx = Fixture::new(3, 4);
    let (mut space, mmu) = fx.space(1);
    for i in 1..=3 {
        space.alloc_anon(va(i * PAGE), true).unwrap();
        space.write_bytes_at(i * PAGE, b"x").unwrap();
    }
    mmu.set_accessed(va(2 * PAGE), false);

    space.alloc_anon(va(4 * PAGE), true).unwrap();
    space.claim_page(va(4 * PAGE)).unwrap();

    assert!(is_resident(&space, PAGE));
    assert!(!is_resident(&space, 2 * PAGE));
    assert!(is_resident(&space, 3 * PAGE));
    // 被跳过的页用掉了第二次机会
    assert!(!mmu.pte(PAGE).unwrap().accessed);
    assert!(mmu.pte(3 * PAGE).unwrap().accessed);
}

#[test]
fn test_lru_order_follows_registration() {
    let fx = Fixture::new(4, 4);
    let (mut space, _mmu) = fx.space(1);
    for i in [3, 1, 2] {
        space.alloc_anon(va(i * PAGE), true).unwrap();
        space.claim_page(va(i * PAGE)).unwrap();
    }
    let order: Vec<Vaddr> = fx
        .vm
        .frames()
        .resident_frames()
        .into_iter()
        .map(|(_, va)| va)
        .collect();
    assert_eq!(order, [va(3 * PAGE), va(PAGE), va(2 * PAGE)]);
}

#[test]
fn test_dirty_file_page_written_back_on_eviction() {
    let fx = Fixture::new(1, 4);
    let (mut space, _mmu) = fx.space(1);
    let inode = MockInode::new(&[b'a'; PAGE]);
    let file = MockFile::open(&inode);
    space.mmap(0x1000_0000, PAGE, true, &file, 0).unwrap();
    space.write_bytes_at(0x1000_0000, b"XY").unwrap();

    space.alloc_anon(va(0x1000), true).unwrap();
    space.claim_page(va(0x1000)).unwrap();

    assert_eq!(inode.write_count(), 1);
    assert_eq!(&inode.contents()[..3], b"XYa");
    // 文件页不进交换区
    assert_eq!(fx.vm.swap().used_slots(), 0);

    let mut back = [0u8; 2];
    space.read_bytes_at(0x1000_0000, &mut back).unwrap();
    assert_eq!(&back, b"XY");
}

#[test]
fn test_clean_file_page_dropped_without_write() {
    let fx = Fixture::new(1, 4);
    let (mut space, _mmu) = fx.space(1);
    let inode = MockInode::new(&[b'a'; PAGE]);
    let file = MockFile::open(&inode);
    space.mmap(0x1000_0000, PAGE, false, &file, 0).unwrap();
    let mut buf = [0u8; 4];
    space.read_bytes_at(0x1000_0000, &mut buf).unwrap();

    space.alloc_anon(va(0x1000), true).unwrap();
    space.claim_page(va(0x1000)).unwrap();

    assert!(!is_resident(&space, 0x1000_0000));
    assert_eq!(inode.write_count(), 0);
    assert_eq!(fx.vm.swap().used_slots(), 0);
}

#[test]
fn test_swap_full_keeps_victim_resident() {
    let fx = Fixture::new(1, 0);
    let (mut space, _mmu) = fx.space(1);
    space.alloc_anon(va(0x1000), true).unwrap();
    space.alloc_anon(va(0x2000), true).unwrap();
    space.write_bytes_at(0x1000, b"keep").unwrap();

    assert_eq!(space.claim_page(va(0x2000)), Err(VmError::StorageFailure));
    assert!(is_resident(&space, 0x1000));
    assert!(space.find_page(va(0x2000)).unwrap().lock().is_uninit());
    assert_eq!(fx.resident(), 1);

    let mut back = [0u8; 4];
    space.read_bytes_at(0x1000, &mut back).unwrap();
    assert_eq!(&back, b"keep");
}

#[test]
fn test_shared_frame_evicted_mapping_by_mapping() {
    let fx = Fixture::new(1, 4);
    let (mut parent, _pmmu) = fx.space(1);
    parent.alloc_anon(va(0x1000), true).unwrap();
    parent.write_bytes_at(0x1000, b"cow").unwrap();

    let mut child = parent.fork(2, super::mock::MockMmu::new()).unwrap();
    parent.alloc_anon(va(0x2000), true).unwrap();

    // 两个共享者各自换出，最后一个换出后帧才回收
    parent.claim_page(va(0x2000)).unwrap();
    assert!(!is_resident(&parent, 0x1000));
    assert!(!is_resident(&child, 0x1000));
    assert_eq!(fx.vm.frames().evictions(), 2);
    assert_eq!(fx.vm.swap().used_slots(), 2);
    assert_eq!(fx.resident(), 1);

    let mut buf = [0u8; 3];
    child.read_bytes_at(0x1000, &mut buf).unwrap();
    assert_eq!(&buf, b"cow");
    parent.read_bytes_at(0x1000, &mut buf).unwrap();
    assert_eq!(&buf, b"cow");
    assert_frame_bijection(&fx, &[&parent, &child]);
}

#[test]
fn test_eviction_after_fork_keeps_list_consistent() {
    let fx = Fixture::new(2, 8);
    let (mut parent, _pmmu) = fx.space(1);
    parent.alloc_anon(va(0x1000), true).unwrap();
    parent.write_bytes_at(0x1000, b"a").unwrap();
    let child = parent.fork(2, super::mock::MockMmu::new()).unwrap();

    for i in 2..=4 {
        parent.alloc_anon(va(i * PAGE), true).unwrap();
        parent.write_bytes_at(i * PAGE, &[i as u8; 8]).unwrap();
    }
    // 链表项与驻留页一一对应，不残留已换出页的项
    assert_frame_bijection(&fx, &[&parent, &child]);
    assert_eq!(fx.resident(), 2);

    let mut buf = [0u8; 1];
    parent.read_bytes_at(0x1000, &mut buf).unwrap();
    assert_eq!(&buf, b"a");
    assert_frame_bijection(&fx, &[&parent, &child]);
}

#[test]
fn test_concurrent_address_spaces_under_pressure() {
    let fx = Arc::new(Fixture::new(4, 32));
    let handles: Vec<_> = (1..=2usize)
        .map(|pid| {
            let fx = Arc::clone(&fx);
            thread::spawn(move || {
                let (mut space, _mmu) = fx.space(pid);
                for i in 1..=6 {
                    space.alloc_anon(va(i * PAGE), true).unwrap();
                }
                for round in 0..4u8 {
                    for i in 1..=6 {
                        let tag = [pid as u8, i as u8, round];
                        space.write_bytes_at(i * PAGE + 100, &tag).unwrap();
                    }
                    for i in 1..=6 {
                        let mut back = [0u8; 3];
                        space.read_bytes_at(i * PAGE + 100, &mut back).unwrap();
                        assert_eq!(back, [pid as u8, i as u8, round]);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(fx.resident(), 0);
    assert_eq!(fx.allocated_frames(), 0);
    assert_eq!(fx.vm.swap().used_slots(), 0);
}
