//! # Kernel Resource Allocators
//!
//! Bookkeeping for the discrete resources the kernel hands out:
//!
//! * [`Bitmap`]: fixed-size bit vector over owned or borrowed bytes.
//! * [`IdAllocator`]: lowest-first integer ids from `[0, max)`, e.g. thread ids.
//! * [`PageAllocator`]: physical 4 KiB pages, segregated into memory above
//!   and below 4 GiB so that 32-bit DMA devices are not starved.
//!
//! ```text
//!   IdAllocator            PageAllocator
//!       │                      │
//!   SpinMutex<Bitmap>      TicketMutex<[range: Bitmap, ...]>
//!       │                      │
//!       └──── Notify ──────────┘   (wakes BLOCK_UNTIL_AVAILABLE callers)
//! ```
//!
//! ## Allocation policy
//!
//! Every allocating call takes [`AllocFlags`]:
//!
//! * no flags: fail with [`AllocError::Exhausted`] when nothing is free;
//! * [`AllocFlags::BLOCK_UNTIL_AVAILABLE`]: park on the allocator's
//!   [`Notify`](kernel_sync::Notify) until a release, then retry;
//! * [`AllocFlags::FATAL_ON_EXHAUSTION`]: halt instead of returning;
//! * [`AllocFlags::NO_WAIT`]: fail with [`AllocError::WouldBlock`] rather
//!   than spin on a busy lock.
//!
//! Releasing something that is not allocated is a bug in the caller and
//! panics.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::{AllocFlags, IdAllocator, PageAllocator, PageRequest};
//! use kernel_info::boot::{MemoryMap, MemoryRange};
//! use kernel_sync::NeverBlock;
//!
//! let tids = IdAllocator::new(64, AllocFlags::empty(), NeverBlock).unwrap();
//! tids.reserve(0);
//! assert_eq!(tids.get(AllocFlags::empty()), Ok(1));
//!
//! let map = [MemoryRange::usable(0x10_0000, 0x10_0000)];
//! let pages = PageAllocator::new(MemoryMap::new(&map), NeverBlock).unwrap();
//! let dma = pages
//!     .allocate(PageRequest::pages(4).below_4gib(), AllocFlags::empty())
//!     .unwrap();
//! pages.release(dma, 4);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod bitmap;
mod flags;
pub mod frame_alloc;
pub mod id_alloc;
pub mod page_alloc;

pub use bitmap::Bitmap;
pub use flags::{AllocError, AllocFlags};
pub use frame_alloc::FrameAlloc;
pub use id_alloc::IdAllocator;
pub use page_alloc::{
    AddressConstraint, Bucket, KernelPageAllocator, PageAllocator, PageRequest, PageStats,
};
