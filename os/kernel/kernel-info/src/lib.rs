//! # Kernel Memory Layout and Boot Interface
//!
//! Shared constants and boot-time data contracts used by the resource
//! accounting crates.
//!
//! - [`memory`]: page granularity, the 32-bit DMA addressing limit, and the
//!   user portion of every address space.
//! - [`boot`]: the physical memory map the loader hands to the kernel, which
//!   is consumed exactly once to populate the physical page allocator.
//!
//! Both modules are plain data; nothing here allocates or locks.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod boot;
pub mod memory;
