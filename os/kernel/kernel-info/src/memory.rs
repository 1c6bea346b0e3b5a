//! # Memory Layout

use kernel_memory_addresses::{PageSize, PhysicalAddress, Size4K};

/// Allocation granule of the physical page allocator.
pub const PAGE_SIZE: u64 = Size4K::SIZE;

/// Devices limited to 32-bit DMA addresses can only reach memory below this
/// physical address (4 GiB).
pub const DMA32_LIMIT: PhysicalAddress = PhysicalAddress::new(1 << 32);

/// First address past the user portion of an address space.
///
/// Region reservations are only valid in `[0, USERSPACE_END)`.
pub const USERSPACE_END: u64 = 0x0000_8000_0000_0000;

/// Size of the guard reservation at virtual address zero.
pub const NULL_GUARD_SIZE: u64 = PAGE_SIZE;

/// End of the legacy real-mode area on 32-bit x86 (1 MiB).
pub const REAL_MODE_END: u64 = 0x0010_0000;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(DMA32_LIMIT.is_aligned::<Size4K>());
    assert!(USERSPACE_END.is_multiple_of(PAGE_SIZE));
    assert!(NULL_GUARD_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(REAL_MODE_END.is_multiple_of(PAGE_SIZE));
    assert!(REAL_MODE_END < USERSPACE_END);
};
