//! # Physical page allocator
//!
//! Free physical memory is kept in two buckets, searched by index:
//!
//! | Bucket | Pages                     | Serves                         |
//! |--------|---------------------------|--------------------------------|
//! | 0      | at or above 4 GiB         | unconstrained requests         |
//! | 1      | below 4 GiB               | 32-bit DMA and, as a fallback, everything else |
//!
//! Unconstrained requests drain bucket 0 completely before touching bucket 1,
//! so low memory stays available for devices that cannot address anything
//! else. There is no interleaving between the buckets.
//!
//! ```text
//!   boot map:   [ usable ........................... ]
//!                             4 GiB
//!                               |
//!   ranges:     [ bucket 1 .....][ bucket 0 ........ ]
//!                 bitmap/range    bitmap/range
//! ```
//!
//! Each managed range is page aligned, lies entirely on one side of the
//! 4 GiB line and carries a [`Bitmap`] with one bit per page (set means
//! allocated). Multi-page requests are served as physically contiguous runs
//! from a single range.

use crate::bitmap::Bitmap;
use crate::frame_alloc::FrameAlloc;
use crate::{AllocError, AllocFlags};
use alloc::boxed::Box;
use alloc::vec::Vec;
use kernel_info::boot::MemoryMap;
use kernel_info::memory::{DMA32_LIMIT, PAGE_SIZE};
use kernel_memory_addresses::{
    PhysicalAddress, PhysicalPage, Size4K, align_down, checked_align_up,
};
use kernel_sync::{NeverBlock, Notify, SyncOnceCell, TicketMutex};
use log::{debug, info, trace, warn};

/// Address class of a page.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(usize)]
pub enum Bucket {
    /// Pages at or above 4 GiB.
    Unconstrained = 0,
    /// Pages below 4 GiB.
    Below4GiB = 1,
}

impl Bucket {
    pub const COUNT: usize = 2;
    pub const ALL: [Self; Self::COUNT] = [Self::Unconstrained, Self::Below4GiB];

    #[must_use]
    pub fn of(addr: PhysicalAddress) -> Self {
        if addr.is_below(DMA32_LIMIT) {
            Self::Below4GiB
        } else {
            Self::Unconstrained
        }
    }

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

/// Where the pages of a request may live.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum AddressConstraint {
    /// Anywhere; prefers memory above 4 GiB.
    #[default]
    Unconstrained,
    /// Only below 4 GiB, for devices limited to 32-bit DMA.
    Below4GiB,
}

impl AddressConstraint {
    /// Eligible buckets in search order.
    const fn search_order(self) -> &'static [Bucket] {
        match self {
            Self::Unconstrained => &[Bucket::Unconstrained, Bucket::Below4GiB],
            Self::Below4GiB => &[Bucket::Below4GiB],
        }
    }
}

/// A request for `count` physically contiguous pages.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageRequest {
    pub count: usize,
    pub constraint: AddressConstraint,
    /// Alignment of the first page, in pages. Must be a power of two.
    pub align: usize,
}

impl PageRequest {
    #[must_use]
    pub const fn pages(count: usize) -> Self {
        Self {
            count,
            constraint: AddressConstraint::Unconstrained,
            align: 1,
        }
    }

    #[must_use]
    pub const fn below_4gib(mut self) -> Self {
        self.constraint = AddressConstraint::Below4GiB;
        self
    }

    #[must_use]
    pub const fn aligned(mut self, align: usize) -> Self {
        self.align = align;
        self
    }
}

/// Snapshot of allocator occupancy.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PageStats {
    pub total: usize,
    pub free: usize,
    pub total_per_bucket: [usize; Bucket::COUNT],
    pub free_per_bucket: [usize; Bucket::COUNT],
}

impl PageStats {
    #[must_use]
    pub const fn free_in(&self, bucket: Bucket) -> usize {
        self.free_per_bucket[bucket.index()]
    }

    #[must_use]
    pub const fn total_in(&self, bucket: Bucket) -> usize {
        self.total_per_bucket[bucket.index()]
    }
}

pub struct PageAllocator<N: Notify = NeverBlock> {
    pools: TicketMutex<Pools>,
    notify: N,
}

impl<N: Notify> PageAllocator<N> {
    /// Build the free lists from the usable entries of the boot memory map.
    ///
    /// Ranges are shrunk inward to page boundaries, split at 4 GiB, and
    /// merged with a directly adjacent range of the same bucket.
    ///
    /// # Errors
    /// [`AllocError::Exhausted`] if the bookkeeping cannot be allocated.
    pub fn new(map: MemoryMap<'_>, notify: N) -> Result<Self, AllocError> {
        let spans = usable_spans(map)?;

        let mut ranges = Vec::new();
        ranges
            .try_reserve_exact(spans.len())
            .map_err(|_| AllocError::Exhausted)?;

        let mut total = [0; Bucket::COUNT];
        for span in spans {
            let pages = pages_between(span.start, span.end);
            let used = Bitmap::alloc(pages, AllocFlags::empty())?;
            total[span.bucket.index()] += pages;
            debug!(
                "{pages} pages at {:#x}..{:#x} -> {:?}",
                span.start, span.end, span.bucket
            );
            ranges.push(PageRange {
                base: PhysicalAddress::new(span.start),
                bucket: span.bucket,
                used,
                free: pages,
            });
        }

        let managed: usize = total.iter().sum();
        info!(
            "page allocator: {managed} pages ({:#x} of {:#x} usable bytes) in {} ranges, {} above 4 GiB, {} below",
            managed as u64 * PAGE_SIZE,
            map.usable_bytes(),
            ranges.len(),
            total[Bucket::Unconstrained.index()],
            total[Bucket::Below4GiB.index()],
        );

        Ok(Self {
            pools: TicketMutex::new(Pools {
                ranges,
                total,
                free: total,
            }),
            notify,
        })
    }

    /// Allocate `request.count` contiguous pages and return the first one.
    ///
    /// # Errors
    /// * [`AllocError::Exhausted`] if no eligible bucket can serve the request,
    ///   or if a blocking request is larger than anything the eligible
    ///   buckets could ever provide.
    /// * [`AllocError::WouldBlock`] if [`AllocFlags::NO_WAIT`] is set and the
    ///   allocator is locked.
    ///
    /// # Panics
    /// On a zero count, a non power-of-two alignment, contradictory flags, or
    /// exhaustion with [`AllocFlags::FATAL_ON_EXHAUSTION`].
    pub fn allocate(
        &self,
        request: PageRequest,
        flags: AllocFlags,
    ) -> Result<PhysicalAddress, AllocError> {
        assert!(request.count > 0, "requesting zero pages");
        assert!(
            request.align.is_power_of_two(),
            "page alignment {} is not a power of two",
            request.align
        );
        flags.validate();

        loop {
            let mut pools = self.pools.acquire(flags.lock_mode())?;
            if let Some((base, bucket)) = pools.take(request) {
                trace!("{} pages at {base} from {bucket:?}", request.count);
                return Ok(base);
            }

            if !flags.blocks() {
                drop(pools);
                return Err(flags.exhausted("physical pages"));
            }

            if !pools.could_ever_fit(request) {
                drop(pools);
                warn!("blocking request {request:?} can never be satisfied");
                return Err(flags.exhausted("physical pages"));
            }

            let epoch = self.notify.epoch();
            drop(pools);
            debug!("waiting for pages: {request:?}");
            self.notify.wait(epoch);
        }
    }

    /// Allocate a single page.
    ///
    /// # Errors
    /// As [`allocate`](Self::allocate).
    pub fn alloc_page(
        &self,
        constraint: AddressConstraint,
        flags: AllocFlags,
    ) -> Result<PhysicalPage<Size4K>, AllocError> {
        let request = PageRequest {
            constraint,
            ..PageRequest::pages(1)
        };
        self.allocate(request, flags)
            .map(PhysicalPage::from_aligned)
    }

    /// Return `count` pages starting at `base` and wake blocked requests.
    ///
    /// # Panics
    /// If `base` is not managed memory, the run extends past the end of the
    /// range it starts in, or any page of the run is already free.
    pub fn release(&self, base: PhysicalAddress, count: usize) {
        self.pools.lock().release(base, count);
        self.released(base, count);
    }

    /// [`release`](Self::release) for callers that may not spin on the lock.
    ///
    /// # Errors
    /// [`AllocError::WouldBlock`] if [`AllocFlags::NO_WAIT`] is set and the
    /// allocator is locked; nothing is released then.
    ///
    /// # Panics
    /// As [`release`](Self::release), or on contradictory flags.
    pub fn try_release(
        &self,
        base: PhysicalAddress,
        count: usize,
        flags: AllocFlags,
    ) -> Result<(), AllocError> {
        flags.validate();
        self.pools.acquire(flags.lock_mode())?.release(base, count);
        self.released(base, count);
        Ok(())
    }

    fn released(&self, base: PhysicalAddress, count: usize) {
        trace!("{count} pages at {base} released");
        self.notify.notify_all();
    }

    /// Mark managed pages overlapping `[base, base + count pages)` as allocated.
    ///
    /// For memory consumed before the allocator existed (kernel image, boot
    /// page tables). Unmanaged and already allocated pages are skipped.
    /// Returns the number of pages newly taken.
    pub fn reserve_range(&self, base: PhysicalAddress, count: usize) -> usize {
        let taken = self.pools.lock().reserve(base, count);
        debug!("reserved {taken} pages at {base}");
        taken
    }

    /// [`reserve_range`](Self::reserve_range) honoring [`AllocFlags::NO_WAIT`].
    ///
    /// # Errors
    /// [`AllocError::WouldBlock`] if the allocator is locked and
    /// [`AllocFlags::NO_WAIT`] is set.
    pub fn try_reserve_range(
        &self,
        base: PhysicalAddress,
        count: usize,
        flags: AllocFlags,
    ) -> Result<usize, AllocError> {
        flags.validate();
        let taken = self.pools.acquire(flags.lock_mode())?.reserve(base, count);
        debug!("reserved {taken} pages at {base}");
        Ok(taken)
    }

    #[must_use]
    pub fn stats(&self) -> PageStats {
        self.pools.lock().stats()
    }

    /// # Errors
    /// [`AllocError::WouldBlock`] if the allocator is locked and
    /// [`AllocFlags::NO_WAIT`] is set.
    pub fn try_stats(&self, flags: AllocFlags) -> Result<PageStats, AllocError> {
        flags.validate();
        Ok(self.pools.acquire(flags.lock_mode())?.stats())
    }
}

impl<N: Notify> FrameAlloc for PageAllocator<N> {
    fn alloc_frame(&self, flags: AllocFlags) -> Result<PhysicalPage<Size4K>, AllocError> {
        self.alloc_page(AddressConstraint::Unconstrained, flags)
    }

    fn free_frame(&self, frame: PhysicalPage<Size4K>) {
        self.release(frame.base(), 1);
    }
}

impl<N: Notify> core::fmt::Debug for PageAllocator<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageAllocator")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// The page allocator as installed for the running kernel.
pub type KernelPageAllocator = PageAllocator<&'static (dyn Notify + Sync)>;

static KERNEL_PAGES: SyncOnceCell<KernelPageAllocator> = SyncOnceCell::new();

/// Make `pages` the kernel-wide page allocator.
///
/// # Errors
/// Hands `pages` back if an allocator was already installed.
pub fn install(pages: KernelPageAllocator) -> Result<&'static KernelPageAllocator, KernelPageAllocator> {
    let installed = KERNEL_PAGES.set(pages)?;
    info!("kernel page allocator installed: {:?}", installed.stats());
    Ok(installed)
}

/// The kernel-wide page allocator, once [`install`]ed.
pub fn kernel_pages() -> Option<&'static KernelPageAllocator> {
    KERNEL_PAGES.get()
}

struct Pools {
    /// Sorted by base address, non-overlapping.
    ranges: Vec<PageRange>,
    total: [usize; Bucket::COUNT],
    free: [usize; Bucket::COUNT],
}

impl Pools {
    /// Take a run from the first bucket in search order that still has free
    /// pages. The next bucket is only consulted once this one is empty, even
    /// if it cannot hold a run of the requested size.
    fn take(&mut self, request: PageRequest) -> Option<(PhysicalAddress, Bucket)> {
        let bucket = self.serving_bucket(request.constraint)?;
        if self.free[bucket.index()] < request.count {
            return None;
        }

        for range in self.ranges.iter_mut().filter(|r| r.bucket == bucket) {
            if let Some(first) = range.find_run(request.count, request.align) {
                range.mark(first, request.count);
                self.free[bucket.index()] -= request.count;
                return Some((range.page_address(first), bucket));
            }
        }
        None
    }

    /// The bucket a request with `constraint` is served from right now.
    fn serving_bucket(&self, constraint: AddressConstraint) -> Option<Bucket> {
        constraint
            .search_order()
            .iter()
            .copied()
            .find(|bucket| self.free[bucket.index()] > 0)
    }

    /// Whether waiting for releases could ever satisfy the request.
    ///
    /// While a bucket has free pages, later buckets are out of reach, so only
    /// buckets up to the serving one are considered.
    fn could_ever_fit(&self, request: PageRequest) -> bool {
        for &bucket in request.constraint.search_order() {
            let fits = self.ranges.iter().filter(|r| r.bucket == bucket).any(|r| {
                let first = r.align_offset(0, request.align);
                first
                    .checked_add(request.count)
                    .is_some_and(|end| end <= r.pages())
            });
            if fits {
                return true;
            }
            if self.free[bucket.index()] > 0 {
                return false;
            }
        }
        false
    }

    fn release(&mut self, base: PhysicalAddress, count: usize) {
        assert!(count > 0, "releasing zero pages");
        assert!(
            base.is_aligned::<Size4K>(),
            "release of unaligned address {base}"
        );
        let Some(idx) = self.range_index(base) else {
            panic!("release of {base}, which is not managed memory");
        };

        let range = &mut self.ranges[idx];
        let first = range.index_of(base);
        assert!(
            count <= range.pages() - first,
            "release of {count} pages at {base} crosses the range end at {}",
            range.end()
        );
        if let Some(free) = (first..first + count).find(|&i| !range.used.test(i)) {
            panic!("page {} released while already free", range.page_address(free));
        }

        range.unmark(first, count);
        let bucket = range.bucket;
        self.free[bucket.index()] += count;
    }

    fn reserve(&mut self, base: PhysicalAddress, count: usize) -> usize {
        let start = align_down(base.as_u64(), PAGE_SIZE);
        let end = start.saturating_add((count as u64).saturating_mul(PAGE_SIZE));

        let mut taken = [0; Bucket::COUNT];
        for range in &mut self.ranges {
            let lo = start.max(range.base.as_u64());
            let hi = end.min(range.end().as_u64());
            if lo >= hi {
                continue;
            }

            let first = range.index_of(PhysicalAddress::new(lo));
            let last = range.index_of(PhysicalAddress::new(hi));
            for i in first..last {
                if !range.used.test(i) {
                    range.used.set(i);
                    range.free -= 1;
                    taken[range.bucket.index()] += 1;
                }
            }
        }
        for bucket in Bucket::ALL {
            self.free[bucket.index()] -= taken[bucket.index()];
        }
        taken.iter().sum()
    }

    fn stats(&self) -> PageStats {
        PageStats {
            total: self.total.iter().sum(),
            free: self.free.iter().sum(),
            total_per_bucket: self.total,
            free_per_bucket: self.free,
        }
    }

    fn range_index(&self, addr: PhysicalAddress) -> Option<usize> {
        let idx = self.ranges.partition_point(|r| r.end() <= addr);
        self.ranges
            .get(idx)
            .filter(|r| r.base <= addr)
            .map(|_| idx)
    }
}

struct PageRange {
    base: PhysicalAddress,
    bucket: Bucket,
    used: Bitmap<Box<[u8]>>,
    free: usize,
}

impl PageRange {
    #[inline]
    fn pages(&self) -> usize {
        self.used.len()
    }

    #[inline]
    fn end(&self) -> PhysicalAddress {
        self.page_address(self.pages())
    }

    #[inline]
    fn page_address(&self, index: usize) -> PhysicalAddress {
        self.base + index as u64 * PAGE_SIZE
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn index_of(&self, addr: PhysicalAddress) -> usize {
        debug_assert!(addr >= self.base);
        ((addr.as_u64() - self.base.as_u64()) / PAGE_SIZE) as usize
    }

    /// Smallest index `>= index` whose physical page number is a multiple of `align`.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn align_offset(&self, index: usize, align: usize) -> usize {
        let pfn = (self.base.as_u64() / PAGE_SIZE) as usize + index;
        pfn.next_multiple_of(align) - (pfn - index)
    }

    /// First-fit search for `count` free pages starting on an `align` boundary.
    fn find_run(&self, count: usize, align: usize) -> Option<usize> {
        if self.free < count {
            return None;
        }

        let mut from = 0;
        while let Some(candidate) = self.used.next_clear(from) {
            let first = self.align_offset(candidate, align);
            let end = first.checked_add(count)?;
            if end > self.pages() {
                return None;
            }
            match (first..end).find(|&i| self.used.test(i)) {
                None => return Some(first),
                Some(busy) => from = busy + 1,
            }
        }
        None
    }

    fn mark(&mut self, first: usize, count: usize) {
        for i in first..first + count {
            self.used.set(i);
        }
        self.free -= count;
    }

    fn unmark(&mut self, first: usize, count: usize) {
        for i in first..first + count {
            self.used.clear(i);
        }
        self.free += count;
    }
}

#[derive(Copy, Clone, Debug)]
struct Span {
    start: u64,
    end: u64,
    bucket: Bucket,
}

#[allow(clippy::cast_possible_truncation)]
const fn pages_between(start: u64, end: u64) -> usize {
    ((end - start) / PAGE_SIZE) as usize
}

/// Page-aligned usable spans, split at 4 GiB, sorted and merged.
fn usable_spans(map: MemoryMap<'_>) -> Result<Vec<Span>, AllocError> {
    let mut spans: Vec<Span> = Vec::new();
    spans
        .try_reserve_exact(map.ranges().len() * 2)
        .map_err(|_| AllocError::Exhausted)?;

    let limit = DMA32_LIMIT.as_u64();
    for range in map.usable() {
        let end = align_down(range.end().as_u64(), PAGE_SIZE);
        let Some(start) = checked_align_up(range.start, PAGE_SIZE).filter(|&s| s < end) else {
            warn!(
                "usable range {}..{} holds no whole page",
                range.start(),
                range.end()
            );
            continue;
        };

        if start < limit {
            spans.push(Span {
                start,
                end: end.min(limit),
                bucket: Bucket::Below4GiB,
            });
        }
        if end > limit {
            spans.push(Span {
                start: start.max(limit),
                end,
                bucket: Bucket::Unconstrained,
            });
        }
    }

    spans.sort_unstable_by_key(|s| s.start);

    let mut kept = 0;
    for i in 0..spans.len() {
        let mut span = spans[i];
        if kept > 0 {
            let prev = &mut spans[kept - 1];
            if span.start < prev.end {
                warn!("usable ranges overlap at {:#x}", span.start);
                span.start = prev.end;
                if span.start >= span.end {
                    continue;
                }
            }
            if span.start == prev.end && span.bucket == prev.bucket {
                prev.end = span.end;
                continue;
            }
        }
        spans[kept] = span;
        kept += 1;
    }
    spans.truncate(kept);
    Ok(spans)
}
