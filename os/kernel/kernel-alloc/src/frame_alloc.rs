//! Single-frame interface consumed by page-table code.

use crate::{AllocError, AllocFlags};
use kernel_memory_addresses::{PhysicalPage, Size4K};

/// Source of 4 KiB physical frames.
///
/// Implemented by [`PageAllocator`](crate::PageAllocator); address-space code
/// only depends on this trait so it can be driven by a test double.
pub trait FrameAlloc {
    /// Take one frame from anywhere in physical memory.
    ///
    /// # Errors
    /// See [`AllocError`].
    fn alloc_frame(&self, flags: AllocFlags) -> Result<PhysicalPage<Size4K>, AllocError>;

    /// Give back a frame obtained from [`alloc_frame`](Self::alloc_frame).
    fn free_frame(&self, frame: PhysicalPage<Size4K>);
}

impl<F: FrameAlloc + ?Sized> FrameAlloc for &F {
    #[inline]
    fn alloc_frame(&self, flags: AllocFlags) -> Result<PhysicalPage<Size4K>, AllocError> {
        (**self).alloc_frame(flags)
    }

    #[inline]
    fn free_frame(&self, frame: PhysicalPage<Size4K>) {
        (**self).free_frame(frame);
    }
}
