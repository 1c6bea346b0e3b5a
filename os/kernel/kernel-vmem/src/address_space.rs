//! # Address Space
//!
//! An [`AddressSpace`] tracks which parts of the user address range are
//! reserved (never mappable) or mapped. It owns the frame of its root page
//! table for as long as it lives.
//!
//! ## Construction
//!
//! ```text
//!  Uninitialized ──initialize::<H>()──► Reserving ──hook ok──► Ready
//!                                           │
//!                                           └──hook err──────► Failed
//! ```
//!
//! The generic constructor moves the space to `Reserving` and runs exactly
//! one [`ReservationHook`] synchronously. The hook reserves whatever the
//! architecture needs; address zero is always among it, so null pointer
//! dereferences fault. If the hook fails, or succeeds without reserving
//! address zero, every reservation it made is discarded, the root frame is
//! returned, and the space ends in `Failed`. Nothing in between is ever
//! observable from outside the constructor.
//!
//! Once `Ready`, the region covering address zero stays reserved and any
//! mapping that touches a reserved region is refused.

mod region;

pub use region::{Region, RegionKind};

use crate::arch::{self, ReservationHook};
use crate::{CreateError, MapError, ReserveError};
use kernel_alloc::{AllocFlags, FrameAlloc};
use kernel_info::memory::{PAGE_SIZE, USERSPACE_END};
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use log::{debug, trace, warn};
use region::RegionSet;

/// Construction state of an [`AddressSpace`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AddressSpaceState {
    Uninitialized,
    /// The reservation hook is running.
    Reserving,
    Ready,
    /// The hook failed; the space holds no regions and no root frame.
    Failed,
}

/// The PML4 (or architecture equivalent) root page for an [`AddressSpace`].
pub type RootPage = PhysicalPage<Size4K>;

pub struct AddressSpace<'a, A: FrameAlloc> {
    frames: &'a A,
    root: Option<RootPage>,
    regions: RegionSet,
    state: AddressSpaceState,
}

impl<'a, A: FrameAlloc> AddressSpace<'a, A> {
    /// Create and initialize an address space for the architecture this
    /// kernel is built for.
    ///
    /// # Errors
    /// See [`CreateError`].
    pub fn create(frames: &'a A, flags: AllocFlags) -> Result<Self, CreateError> {
        Self::create_with::<arch::Current>(frames, flags)
    }

    /// Create and initialize an address space with hook `H`.
    ///
    /// # Errors
    /// See [`CreateError`].
    pub fn create_with<H: ReservationHook>(
        frames: &'a A,
        flags: AllocFlags,
    ) -> Result<Self, CreateError> {
        let mut space = Self::new(frames, flags)?;
        space.initialize::<H>()?;
        Ok(space)
    }

    /// An uninitialized address space with a freshly allocated root frame.
    ///
    /// # Errors
    /// Propagates the frame allocator's [`AllocError`](kernel_alloc::AllocError).
    pub fn new(frames: &'a A, flags: AllocFlags) -> Result<Self, CreateError> {
        let root = frames.alloc_frame(flags)?;
        trace!("address space root {root}");
        Ok(Self {
            frames,
            root: Some(root),
            regions: RegionSet::new(),
            state: AddressSpaceState::Uninitialized,
        })
    }

    /// Run the reservation hook `H` and settle in `Ready` or `Failed`.
    ///
    /// # Errors
    /// [`CreateError::Hook`] if `H` fails, [`CreateError::NullPageUnreserved`]
    /// if it succeeds without covering address zero.
    ///
    /// # Panics
    /// If the space is not `Uninitialized`.
    pub fn initialize<H: ReservationHook>(&mut self) -> Result<(), CreateError> {
        assert_eq!(
            self.state,
            AddressSpaceState::Uninitialized,
            "address space initialized twice"
        );
        self.state = AddressSpaceState::Reserving;

        let outcome = match H::reserve_regions(self) {
            Err(source) => Err(CreateError::Hook {
                hook: H::NAME,
                source,
            }),
            Ok(()) if !self.is_reserved(VirtualAddress::zero()) => {
                Err(CreateError::NullPageUnreserved(H::NAME))
            }
            Ok(()) => Ok(()),
        };

        match outcome {
            Ok(()) => {
                self.state = AddressSpaceState::Ready;
                debug!(
                    "address space ready with {} regions ({})",
                    self.regions.len(),
                    H::NAME
                );
                Ok(())
            }
            Err(err) => {
                warn!("address space construction failed: {err}");
                self.fail();
                Err(err)
            }
        }
    }

    /// Reserve `[start, start + len)` so it can never be mapped.
    ///
    /// # Errors
    /// See [`ReserveError`].
    pub fn reserve(&mut self, start: VirtualAddress, len: u64) -> Result<(), ReserveError> {
        if !matches!(
            self.state,
            AddressSpaceState::Reserving | AddressSpaceState::Ready
        ) {
            return Err(ReserveError::InvalidState(self.state));
        }

        let end = match check_span(start, len) {
            Ok(end) => end,
            Err(SpanError::Invalid) => return Err(ReserveError::InvalidArgument { start, len }),
            Err(SpanError::OutOfRange) => return Err(ReserveError::OutOfRange { start, len }),
        };
        if let Some(&existing) = self.regions.overlapping(start.as_u64(), end).next() {
            return Err(ReserveError::Overlap { existing });
        }

        self.regions.insert(Region {
            start,
            len,
            kind: RegionKind::Reserved,
        });
        debug!("reserved {start} + {len:#x}");
        Ok(())
    }

    /// Record a mapping of `[start, start + len)`.
    ///
    /// # Errors
    /// See [`MapError`]; any overlap with a reserved region is
    /// [`MapError::Reserved`].
    pub fn map(&mut self, start: VirtualAddress, len: u64) -> Result<(), MapError> {
        if self.state != AddressSpaceState::Ready {
            return Err(MapError::NotReady(self.state));
        }

        let end = match check_span(start, len) {
            Ok(end) => end,
            Err(SpanError::Invalid) => return Err(MapError::InvalidArgument { start, len }),
            Err(SpanError::OutOfRange) => return Err(MapError::OutOfRange { start, len }),
        };

        let mut mapped = None;
        for &region in self.regions.overlapping(start.as_u64(), end) {
            if region.is_reserved() {
                return Err(MapError::Reserved(region));
            }
            mapped.get_or_insert(region);
        }
        if let Some(region) = mapped {
            return Err(MapError::Overlap(region));
        }

        self.regions.insert(Region {
            start,
            len,
            kind: RegionKind::Mapped,
        });
        trace!("mapped {start} + {len:#x}");
        Ok(())
    }

    /// Remove the region that is exactly `[start, start + len)`.
    ///
    /// Mappings and reservations can both be removed, except the reservation
    /// covering address zero.
    ///
    /// # Errors
    /// [`MapError::NotFound`] if no region matches exactly,
    /// [`MapError::NullGuard`] for the null page reservation.
    pub fn unmap(&mut self, start: VirtualAddress, len: u64) -> Result<Region, MapError> {
        if self.state != AddressSpaceState::Ready {
            return Err(MapError::NotReady(self.state));
        }

        let Some(&region) = self.regions.get(start) else {
            return Err(MapError::NotFound { start, len });
        };
        if region.len != len {
            return Err(MapError::NotFound { start, len });
        }
        if region.is_reserved() && region.contains(VirtualAddress::zero()) {
            return Err(MapError::NullGuard);
        }

        self.regions.remove(start);
        trace!("removed {region}");
        Ok(region)
    }

    #[inline]
    pub const fn state(&self) -> AddressSpaceState {
        self.state
    }

    /// Root page-table frame; `None` once construction failed.
    #[inline]
    pub const fn root_page(&self) -> Option<RootPage> {
        self.root
    }

    /// All regions in address order.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    /// Reserved regions in address order.
    pub fn reserved_regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().filter(|r| r.is_reserved())
    }

    /// The region containing `va`, if any.
    pub fn region_at(&self, va: VirtualAddress) -> Option<&Region> {
        self.regions.covering(va)
    }

    pub fn is_reserved(&self, va: VirtualAddress) -> bool {
        self.region_at(va).is_some_and(Region::is_reserved)
    }

    fn fail(&mut self) {
        self.regions.clear();
        self.release_root();
        self.state = AddressSpaceState::Failed;
    }

    fn release_root(&mut self) {
        if let Some(root) = self.root.take() {
            self.frames.free_frame(root);
        }
    }
}

impl<A: FrameAlloc> Drop for AddressSpace<'_, A> {
    fn drop(&mut self) {
        self.release_root();
    }
}

impl<A: FrameAlloc> core::fmt::Debug for AddressSpace<'_, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("state", &self.state)
            .field("root", &self.root)
            .field("regions", &self.regions.len())
            .finish_non_exhaustive()
    }
}

enum SpanError {
    Invalid,
    OutOfRange,
}

/// Validate a span and return its exclusive end.
fn check_span(start: VirtualAddress, len: u64) -> Result<u64, SpanError> {
    if len == 0 || !start.is_aligned::<Size4K>() || !len.is_multiple_of(PAGE_SIZE) {
        return Err(SpanError::Invalid);
    }
    match start.as_u64().checked_add(len) {
        Some(end) if end <= USERSPACE_END => Ok(end),
        _ => Err(SpanError::OutOfRange),
    }
}
