//! # Virtual and Physical Memory Address Types
//!
//! Zero-cost wrappers around raw `u64` addresses that keep physical and
//! virtual values apart at compile time.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in host RAM or MMIO space. |
//! | [`PhysicalPage<S>`] | The page-aligned base of a physical page of size `S`. |
//! | [`VirtualAddress`] | A byte address in some address space. |
//!
//! Page sizes are marker types implementing the sealed [`PageSize`] trait.
//! Only [`Size4K`] is needed by the allocators; the trait keeps the page
//! granularity visible in signatures.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0000_0001_0000_2345);
//! let page = pa.page::<Size4K>();
//! assert_eq!(page.base().as_u64(), 0x0000_0001_0000_2000);
//! assert!(!pa.is_aligned::<Size4K>());
//! assert_eq!(page.add_pages(2).base().as_u64(), 0x0000_0001_0000_4000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;

pub use page_size::{PageSize, Size4K};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;

/// Align `x` down to a multiple of `a` (power of two).
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    x & !(a - 1)
}

/// Align `x` up to a multiple of `a` (power of two), or `None` on overflow.
#[inline(always)]
#[must_use]
pub const fn checked_align_up(x: u64, a: u64) -> Option<u64> {
    debug_assert!(a.is_power_of_two());
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}
