mod common;

use common::{CondvarNotify, StallingNotify};
use kernel_alloc::page_alloc::{install, kernel_pages};
use kernel_alloc::{
    AddressConstraint, AllocError, AllocFlags, Bucket, FrameAlloc, PageAllocator, PageRequest,
};
use kernel_info::boot::{MemoryMap, MemoryRange};
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::{NeverBlock, Notify};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;

const PAGE: u64 = 0x1000;
const GIB: u64 = 1 << 30;
const LOW_BASE: u64 = 0x10_0000;
const HIGH_BASE: u64 = 4 * GIB;

/// 8 pages below 4 GiB, 4 pages above, with a reserved hole in between.
fn two_bucket_map() -> [MemoryRange; 3] {
    [
        MemoryRange::usable(LOW_BASE, 8 * PAGE),
        MemoryRange::reserved(LOW_BASE + 8 * PAGE, GIB),
        MemoryRange::usable(HIGH_BASE, 4 * PAGE),
    ]
}

fn pages<N: Notify>(notify: N) -> PageAllocator<N> {
    PageAllocator::new(MemoryMap::new(&two_bucket_map()), notify).unwrap()
}

fn is_low(pa: PhysicalAddress) -> bool {
    pa.as_u64() < HIGH_BASE
}

#[test]
fn boot_map_populates_both_buckets() {
    let stats = pages(NeverBlock).stats();
    assert_eq!(stats.total, 12);
    assert_eq!(stats.free, 12);
    assert_eq!(stats.total_in(Bucket::Below4GiB), 8);
    assert_eq!(stats.total_in(Bucket::Unconstrained), 4);
}

#[test]
fn range_straddling_four_gib_is_split() {
    let map = [MemoryRange::usable(HIGH_BASE - 2 * PAGE, 5 * PAGE)];
    let pages = PageAllocator::new(MemoryMap::new(&map), NeverBlock).unwrap();
    let stats = pages.stats();
    assert_eq!(stats.total_in(Bucket::Below4GiB), 2);
    assert_eq!(stats.total_in(Bucket::Unconstrained), 3);

    // A run may not cross from one bucket into the other.
    assert_eq!(
        pages.allocate(PageRequest::pages(4), AllocFlags::empty()),
        Err(AllocError::Exhausted)
    );
}

#[test]
fn unconstrained_drains_high_memory_first() {
    let pages = pages(NeverBlock);

    for _ in 0..4 {
        let pa = pages
            .allocate(PageRequest::pages(1), AllocFlags::empty())
            .unwrap();
        assert!(!is_low(pa), "{pa} taken from low memory while high memory was free");
        assert_eq!(pages.stats().free_in(Bucket::Below4GiB), 8);
    }

    // Only now does the fallback touch bucket 1.
    let pa = pages
        .allocate(PageRequest::pages(1), AllocFlags::empty())
        .unwrap();
    assert!(is_low(pa));
    assert_eq!(pages.stats().free_in(Bucket::Below4GiB), 7);
}

#[test]
fn unconstrained_run_uses_low_memory_only_once_high_memory_is_empty() {
    let pages = pages(NeverBlock);
    let first = pages
        .allocate(PageRequest::pages(1), AllocFlags::empty())
        .unwrap();
    assert!(!is_low(first));

    // Three high pages are still free, so a run of four may not use low memory.
    assert_eq!(
        pages.allocate(PageRequest::pages(4), AllocFlags::empty()),
        Err(AllocError::Exhausted)
    );
    assert_eq!(pages.stats().free_in(Bucket::Below4GiB), 8);

    let rest = pages
        .allocate(PageRequest::pages(3), AllocFlags::empty())
        .unwrap();
    assert_eq!(rest.as_u64(), HIGH_BASE + PAGE);

    // High memory is empty now; the run comes from bucket 1.
    let low = pages
        .allocate(PageRequest::pages(4), AllocFlags::empty())
        .unwrap();
    assert_eq!(low.as_u64(), LOW_BASE);
    assert_eq!(pages.stats().free_in(Bucket::Below4GiB), 4);
}

#[test]
fn blocking_run_too_large_for_high_memory_fails_while_it_has_free_pages() {
    let pages = pages(CondvarNotify::leaked());
    assert_eq!(
        pages.allocate(PageRequest::pages(5), AllocFlags::BLOCK_UNTIL_AVAILABLE),
        Err(AllocError::Exhausted)
    );
    assert_eq!(pages.stats().free_in(Bucket::Below4GiB), 8);
}

#[test]
fn below_4gib_never_returns_high_pages() {
    let pages = pages(NeverBlock);

    for _ in 0..8 {
        let pa = pages
            .allocate(PageRequest::pages(1).below_4gib(), AllocFlags::empty())
            .unwrap();
        assert!(is_low(pa));
    }
    assert_eq!(
        pages.allocate(PageRequest::pages(1).below_4gib(), AllocFlags::empty()),
        Err(AllocError::Exhausted)
    );
    assert_eq!(pages.stats().free_in(Bucket::Unconstrained), 4);
}

#[test]
fn allocate_release_pairs_conserve_free_counts() {
    let pages = pages(NeverBlock);
    let before = pages.stats();

    let low = pages
        .allocate(PageRequest::pages(3).below_4gib(), AllocFlags::empty())
        .unwrap();
    let high = pages
        .allocate(PageRequest::pages(2), AllocFlags::empty())
        .unwrap();
    let stats = pages.stats();
    assert_eq!(stats.free_in(Bucket::Below4GiB), 5);
    assert_eq!(stats.free_in(Bucket::Unconstrained), 2);

    pages.release(low, 3);
    pages.release(high, 2);
    assert_eq!(pages.stats(), before);
}

#[test]
fn multi_page_runs_are_contiguous_and_disjoint() {
    let pages = pages(NeverBlock);
    let a = pages
        .allocate(PageRequest::pages(3).below_4gib(), AllocFlags::empty())
        .unwrap();
    let b = pages
        .allocate(PageRequest::pages(3).below_4gib(), AllocFlags::empty())
        .unwrap();
    assert_eq!(a.as_u64(), LOW_BASE);
    assert_eq!(b.as_u64(), LOW_BASE + 3 * PAGE);

    // Two pages left; a run of three no longer fits.
    assert_eq!(
        pages.allocate(PageRequest::pages(3).below_4gib(), AllocFlags::empty()),
        Err(AllocError::Exhausted)
    );

    pages.release(a, 3);
    let c = pages
        .allocate(PageRequest::pages(3).below_4gib(), AllocFlags::empty())
        .unwrap();
    assert_eq!(c, a);
}

#[test]
fn reserve_range_takes_boot_pages_out_of_circulation() {
    let pages = pages(NeverBlock);
    let taken = pages.reserve_range(PhysicalAddress::new(LOW_BASE), 2);
    assert_eq!(taken, 2);
    assert_eq!(pages.reserve_range(PhysicalAddress::new(LOW_BASE), 2), 0);

    let pa = pages
        .allocate(PageRequest::pages(1).below_4gib(), AllocFlags::empty())
        .unwrap();
    assert_eq!(pa.as_u64(), LOW_BASE + 2 * PAGE);

    // Unmanaged memory is ignored.
    assert_eq!(pages.reserve_range(PhysicalAddress::new(2 * GIB), 16), 0);
}

#[test]
fn frame_alloc_round_trip() {
    let pages = pages(NeverBlock);
    let frame = pages.alloc_frame(AllocFlags::empty()).unwrap();
    assert_eq!(frame.base().as_u64(), HIGH_BASE);
    assert_eq!(pages.stats().free, 11);

    pages.free_frame(frame);
    assert_eq!(pages.stats().free, 12);
}

#[test]
fn alloc_page_honors_constraint() {
    let pages = pages(NeverBlock);
    let page = pages
        .alloc_page(AddressConstraint::Below4GiB, AllocFlags::empty())
        .unwrap();
    assert!(is_low(page.base()));
}

#[test]
fn no_wait_reports_would_block_while_locked() {
    let gate = StallingNotify::leaked();
    let pages = Arc::new(pages(gate));
    let all_low = pages
        .allocate(PageRequest::pages(8).below_4gib(), AllocFlags::empty())
        .unwrap();

    let waiter = {
        let pages = Arc::clone(&pages);
        thread::spawn(move || {
            pages.allocate(
                PageRequest::pages(1).below_4gib(),
                AllocFlags::BLOCK_UNTIL_AVAILABLE,
            )
        })
    };

    gate.held.wait();
    assert_eq!(
        pages.allocate(PageRequest::pages(1), AllocFlags::NO_WAIT),
        Err(AllocError::WouldBlock)
    );
    gate.resume.wait();

    pages.release(all_low, 8);
    assert!(is_low(waiter.join().unwrap().unwrap()));
}

#[test]
fn no_wait_release_paths_report_would_block_while_locked() {
    let gate = StallingNotify::leaked();
    let pages = Arc::new(pages(gate));
    let all_low = pages
        .allocate(PageRequest::pages(8).below_4gib(), AllocFlags::empty())
        .unwrap();

    let waiter = {
        let pages = Arc::clone(&pages);
        thread::spawn(move || {
            pages.allocate(
                PageRequest::pages(1).below_4gib(),
                AllocFlags::BLOCK_UNTIL_AVAILABLE,
            )
        })
    };

    gate.held.wait();
    assert_eq!(
        pages.try_release(all_low, 8, AllocFlags::NO_WAIT),
        Err(AllocError::WouldBlock)
    );
    assert_eq!(
        pages.try_reserve_range(PhysicalAddress::new(HIGH_BASE), 1, AllocFlags::NO_WAIT),
        Err(AllocError::WouldBlock)
    );
    assert_eq!(pages.try_stats(AllocFlags::NO_WAIT), Err(AllocError::WouldBlock));
    gate.resume.wait();

    // Nothing was released or reserved by the refused calls.
    let stats = pages.stats();
    assert_eq!(stats.free_in(Bucket::Below4GiB), 0);
    assert_eq!(stats.free_in(Bucket::Unconstrained), 4);

    assert_eq!(pages.try_release(all_low, 8, AllocFlags::empty()), Ok(()));
    assert!(is_low(waiter.join().unwrap().unwrap()));
}

#[test]
fn concurrent_callers_never_share_a_page() {
    let threads = 8;
    let rounds = 200;
    let map = [
        MemoryRange::usable(LOW_BASE, 64 * PAGE),
        MemoryRange::usable(HIGH_BASE, 64 * PAGE),
    ];
    let pages = Arc::new(PageAllocator::new(MemoryMap::new(&map), NeverBlock).unwrap());
    let before = pages.stats();
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let pages = Arc::clone(&pages);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let mut held = VecDeque::new();
                start.wait();
                for round in 0..rounds {
                    let count = 1 + (t + round) % 3;
                    let request = if round % 4 == 0 {
                        PageRequest::pages(count).below_4gib()
                    } else {
                        PageRequest::pages(count)
                    };
                    match pages.allocate(request, AllocFlags::empty()) {
                        Ok(base) => held.push_back((base, count)),
                        Err(AllocError::Exhausted) => {}
                        Err(e) => panic!("unexpected allocation failure: {e}"),
                    }
                    if held.len() > 4 {
                        let (base, count) = held.pop_front().unwrap();
                        pages.release(base, count);
                    }
                }
                held
            })
        })
        .collect();

    let held: Vec<(PhysicalAddress, usize)> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let mut seen = HashSet::new();
    for &(base, count) in &held {
        let last = PhysicalAddress::new(base.as_u64() + (count as u64 - 1) * PAGE);
        assert_eq!(is_low(base), is_low(last), "run at {base} spans both buckets");
        for i in 0..count as u64 {
            let page = base.as_u64() + i * PAGE;
            assert!(seen.insert(page), "page {page:#x} handed out twice");
        }
    }

    let outstanding: usize = held.iter().map(|&(_, count)| count).sum();
    assert_eq!(pages.stats().free, before.free - outstanding);

    for (base, count) in held {
        pages.release(base, count);
    }
    assert_eq!(pages.stats(), before);
}

#[test]
fn blocked_request_wakes_on_matching_release() {
    let pages = Arc::new(pages(CondvarNotify::leaked()));
    let low = pages
        .allocate(PageRequest::pages(8).below_4gib(), AllocFlags::empty())
        .unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let pages = Arc::clone(&pages);
        thread::spawn(move || {
            let pa = pages
                .allocate(
                    PageRequest::pages(1).below_4gib(),
                    AllocFlags::BLOCK_UNTIL_AVAILABLE,
                )
                .unwrap();
            tx.send(pa).unwrap();
        })
    };

    // High memory is free but does not satisfy the waiter.
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    pages.release(low, 1);
    let pa = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(pa, low);
    waiter.join().unwrap();
}

#[test]
fn unsatisfiable_blocking_request_fails_immediately() {
    let pages = pages(CondvarNotify::leaked());
    assert_eq!(
        pages.allocate(
            PageRequest::pages(9).below_4gib(),
            AllocFlags::BLOCK_UNTIL_AVAILABLE
        ),
        Err(AllocError::Exhausted)
    );
}

#[test]
#[should_panic(expected = "already free")]
fn double_release_panics() {
    let pages = pages(NeverBlock);
    let pa = pages
        .allocate(PageRequest::pages(1), AllocFlags::empty())
        .unwrap();
    pages.release(pa, 1);
    pages.release(pa, 1);
}

#[test]
#[should_panic(expected = "not managed memory")]
fn releasing_unmanaged_memory_panics() {
    pages(NeverBlock).release(PhysicalAddress::new(2 * GIB), 1);
}

#[test]
#[should_panic(expected = "crosses the range end")]
fn release_past_range_end_panics() {
    let pages = pages(NeverBlock);
    let pa = pages
        .allocate(PageRequest::pages(4), AllocFlags::empty())
        .unwrap();
    pages.release(pa, 5);
}

#[test]
#[should_panic(expected = "fatal allocation failure")]
fn fatal_flag_halts_on_exhaustion() {
    let pages = pages(NeverBlock);
    let _ = pages.allocate(PageRequest::pages(9), AllocFlags::FATAL_ON_EXHAUSTION);
}

#[test]
fn global_allocator_installs_once() {
    let notify: &'static (dyn Notify + Sync) = CondvarNotify::leaked();
    let first = PageAllocator::new(MemoryMap::new(&two_bucket_map()), notify).unwrap();
    let second = PageAllocator::new(MemoryMap::new(&two_bucket_map()), notify).unwrap();

    let installed = install(first).unwrap();
    assert!(install(second).is_err());
    assert!(std::ptr::eq(installed, kernel_pages().unwrap()));
}
