//! # Virtual Address Space Bookkeeping
//!
//! Tracks reserved and mapped regions of user address spaces and runs the
//! per-architecture reservation protocol when a space is created.
//!
//! ```text
//!  0x0000_0000_0000_0000 ┌──────────────────────────────┐
//!                        │ null guard (always reserved) │
//!  PAGE_SIZE             ├──────────────────────────────┤
//!                        │ architecture reservations    │
//!                        │ user mappings                │
//!  USERSPACE_END         └──────────────────────────────┘
//! ```
//!
//! Page-table contents are not managed here; an address space only owns the
//! frame of its root table, drawn from a [`FrameAlloc`](kernel_alloc::FrameAlloc).
//!
//! ```rust
//! use kernel_alloc::{AllocFlags, PageAllocator};
//! use kernel_info::boot::{MemoryMap, MemoryRange};
//! use kernel_memory_addresses::VirtualAddress;
//! use kernel_sync::NeverBlock;
//! use kernel_vmem::{AddressSpace, MapError};
//!
//! let map = [MemoryRange::usable(0x10_0000, 0x10_0000)];
//! let frames = PageAllocator::new(MemoryMap::new(&map), NeverBlock).unwrap();
//!
//! let mut space = AddressSpace::create(&frames, AllocFlags::empty()).unwrap();
//! assert!(space.is_reserved(VirtualAddress::zero()));
//! assert!(matches!(
//!     space.map(VirtualAddress::zero(), 0x1000),
//!     Err(MapError::Reserved(_))
//! ));
//! space.map(VirtualAddress::new(0x40_0000), 0x2000).unwrap();
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod address_space;
pub mod arch;
mod error;

pub use crate::address_space::{AddressSpace, AddressSpaceState, Region, RegionKind, RootPage};
pub use crate::arch::ReservationHook;
pub use crate::error::{CreateError, MapError, ReserveError};
