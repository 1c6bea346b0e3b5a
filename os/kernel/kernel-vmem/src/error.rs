use crate::address_space::{AddressSpaceState, Region};
use kernel_alloc::AllocError;
use kernel_memory_addresses::VirtualAddress;

/// Why a region could not be reserved.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ReserveError {
    /// Zero length, or start / length not page aligned.
    #[error("invalid region {start} + {len:#x}")]
    InvalidArgument { start: VirtualAddress, len: u64 },

    /// The region extends past the user portion of the address space.
    #[error("region {start} + {len:#x} is outside the user address range")]
    OutOfRange { start: VirtualAddress, len: u64 },

    /// The region intersects an existing one.
    #[error("region overlaps {existing}")]
    Overlap { existing: Region },

    /// Reservations are only accepted while reserving or ready.
    #[error("cannot reserve in state {0:?}")]
    InvalidState(AddressSpaceState),

    /// Architecture-specific failure reported by a reservation hook.
    #[error("architecture hook failed: {0}")]
    Arch(&'static str),
}

/// Why a region could not be mapped or unmapped.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("invalid region {start} + {len:#x}")]
    InvalidArgument { start: VirtualAddress, len: u64 },

    #[error("region {start} + {len:#x} is outside the user address range")]
    OutOfRange { start: VirtualAddress, len: u64 },

    /// The region touches reserved address space.
    #[error("region intersects reserved {0}")]
    Reserved(Region),

    /// The region touches an existing mapping.
    #[error("region overlaps mapping {0}")]
    Overlap(Region),

    /// No region matches the request exactly.
    #[error("no region at {start} + {len:#x}")]
    NotFound { start: VirtualAddress, len: u64 },

    /// The null guard can never be removed.
    #[error("the null page guard is permanent")]
    NullGuard,

    #[error("address space is {0:?}, not ready")]
    NotReady(AddressSpaceState),
}

/// Why an address space could not be constructed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CreateError {
    /// No frame for the root page table.
    #[error("no frame for the root table: {0}")]
    Frame(#[from] AllocError),

    /// The architecture hook failed.
    #[error("reservation hook {hook} failed: {source}")]
    Hook {
        hook: &'static str,
        source: ReserveError,
    },

    /// The hook returned success without reserving address zero.
    #[error("reservation hook {0} left the null page unreserved")]
    NullPageUnreserved(&'static str),
}
