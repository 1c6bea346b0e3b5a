//! # Architecture reservation hooks
//!
//! Each supported architecture contributes one [`ReservationHook`]. The hook
//! for the build target is chosen at compile time as [`Current`]; there is no
//! runtime dispatch.
//!
//! | Target    | Hook        | Reserves                                  |
//! |-----------|-------------|-------------------------------------------|
//! | `x86_64`  | [`X86_64`]  | null page                                 |
//! | `x86`     | [`X86`]     | `[0, 1 MiB)`, the vm86 real-mode window   |
//! | `aarch64` | [`Aarch64`] | null page                                 |
//! | other     | [`Generic`] | null page                                 |

use crate::address_space::AddressSpace;
use crate::ReserveError;
use kernel_alloc::FrameAlloc;
use kernel_info::memory::{NULL_GUARD_SIZE, REAL_MODE_END};
use kernel_memory_addresses::VirtualAddress;

/// Reserves the regions an architecture needs in every new address space.
///
/// Called exactly once per address space, on the creating thread, while the
/// space is `Reserving`. Must not block. Returning an error discards every
/// reservation made so far. Succeeding without reserving address zero is
/// treated as a failure by the caller.
pub trait ReservationHook {
    const NAME: &'static str;

    /// # Errors
    /// Whatever [`AddressSpace::reserve`] reports, or
    /// [`ReserveError::Arch`] for architecture-specific problems.
    fn reserve_regions<A: FrameAlloc>(space: &mut AddressSpace<'_, A>)
    -> Result<(), ReserveError>;
}

fn reserve_null_page<A: FrameAlloc>(space: &mut AddressSpace<'_, A>) -> Result<(), ReserveError> {
    space.reserve(VirtualAddress::zero(), NULL_GUARD_SIZE)
}

pub struct X86_64;

impl ReservationHook for X86_64 {
    const NAME: &'static str = "x86_64";

    fn reserve_regions<A: FrameAlloc>(
        space: &mut AddressSpace<'_, A>,
    ) -> Result<(), ReserveError> {
        reserve_null_page(space)
    }
}

/// 32-bit x86.
///
/// Virtual-8086 tasks run BIOS code at its real-mode addresses, so the whole
/// first megabyte stays out of reach of ordinary mappings.
pub struct X86;

impl ReservationHook for X86 {
    const NAME: &'static str = "x86";

    fn reserve_regions<A: FrameAlloc>(
        space: &mut AddressSpace<'_, A>,
    ) -> Result<(), ReserveError> {
        space.reserve(VirtualAddress::zero(), REAL_MODE_END)
    }
}

pub struct Aarch64;

impl ReservationHook for Aarch64 {
    const NAME: &'static str = "aarch64";

    fn reserve_regions<A: FrameAlloc>(
        space: &mut AddressSpace<'_, A>,
    ) -> Result<(), ReserveError> {
        reserve_null_page(space)
    }
}

/// Fallback for targets without a dedicated hook.
pub struct Generic;

impl ReservationHook for Generic {
    const NAME: &'static str = "generic";

    fn reserve_regions<A: FrameAlloc>(
        space: &mut AddressSpace<'_, A>,
    ) -> Result<(), ReserveError> {
        reserve_null_page(space)
    }
}

#[cfg(target_arch = "x86_64")]
pub type Current = X86_64;

#[cfg(target_arch = "x86")]
pub type Current = X86;

#[cfg(target_arch = "aarch64")]
pub type Current = Aarch64;

#[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
pub type Current = Generic;
