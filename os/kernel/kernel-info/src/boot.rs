//! # Boot Memory Map
//!
//! The loader describes physical memory as an ordered sequence of ranges.
//! Only ranges flagged usable are handed to the page allocator; everything
//! else (firmware, ACPI tables, the kernel image) stays out of the free lists.

use kernel_memory_addresses::PhysicalAddress;

/// One entry of the boot memory map.
///
/// Keep this `#[repr(C)]`: the loader writes it before the kernel runs.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryRange {
    /// Physical start of the range (not necessarily page aligned).
    pub start: u64,

    /// Length of the range in **bytes**.
    pub len: u64,

    /// Whether the range is free for general use after boot.
    pub usable: bool,
}

impl MemoryRange {
    #[must_use]
    pub const fn usable(start: u64, len: u64) -> Self {
        Self {
            start,
            len,
            usable: true,
        }
    }

    #[must_use]
    pub const fn reserved(start: u64, len: u64) -> Self {
        Self {
            start,
            len,
            usable: false,
        }
    }

    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.start)
    }

    /// Exclusive end of the range, saturating at the top of the address space.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.start.saturating_add(self.len))
    }
}

/// Borrowed view of the loader's memory map.
#[derive(Copy, Clone, Debug)]
pub struct MemoryMap<'a> {
    ranges: &'a [MemoryRange],
}

impl<'a> MemoryMap<'a> {
    #[must_use]
    pub const fn new(ranges: &'a [MemoryRange]) -> Self {
        Self { ranges }
    }

    /// All entries, in loader order.
    #[must_use]
    pub const fn ranges(&self) -> &'a [MemoryRange] {
        self.ranges
    }

    /// Entries the kernel may hand out.
    pub fn usable(&self) -> impl Iterator<Item = &'a MemoryRange> + 'a {
        self.ranges.iter().filter(|r| r.usable && r.len > 0)
    }

    /// Total bytes flagged usable, before page alignment.
    #[must_use]
    pub fn usable_bytes(&self) -> u64 {
        self.usable().map(|r| r.len).sum()
    }
}
