//! # ID allocator
//!
//! Hands out integers from `[0, max)` lowest-first. Thread and process ids,
//! interrupt vectors and similar small namespaces are drawn from here.

use crate::bitmap::Bitmap;
use crate::{AllocError, AllocFlags};
use alloc::boxed::Box;
use kernel_sync::{NeverBlock, Notify, SpinMutex};
use log::{debug, trace};

pub struct IdAllocator<N: Notify = NeverBlock> {
    ids: SpinMutex<Bitmap<Box<[u8]>>>,
    max: usize,
    notify: N,
}

impl<N: Notify> IdAllocator<N> {
    /// Create an allocator for ids `0..max`, all free.
    ///
    /// `notify` parks [`get`](Self::get) calls that pass
    /// [`AllocFlags::BLOCK_UNTIL_AVAILABLE`]; use [`NeverBlock`] if none will.
    ///
    /// # Errors
    /// [`AllocError::Exhausted`] if the bitmap cannot be allocated.
    pub fn new(max: usize, flags: AllocFlags, notify: N) -> Result<Self, AllocError> {
        let ids = Bitmap::alloc(max, flags)?;
        Ok(Self {
            ids: SpinMutex::new(ids),
            max,
            notify,
        })
    }

    #[inline]
    pub const fn max(&self) -> usize {
        self.max
    }

    /// Allocate the lowest free id.
    ///
    /// # Errors
    /// * [`AllocError::Exhausted`] if every id is taken.
    /// * [`AllocError::WouldBlock`] if [`AllocFlags::NO_WAIT`] is set and the
    ///   allocator is locked.
    ///
    /// # Panics
    /// On contradictory flags, or on exhaustion with
    /// [`AllocFlags::FATAL_ON_EXHAUSTION`].
    pub fn get(&self, flags: AllocFlags) -> Result<usize, AllocError> {
        flags.validate();
        loop {
            let mut ids = self.ids.acquire(flags.lock_mode())?;
            if let Some(id) = ids.first_clear() {
                ids.set(id);
                trace!("id {id} allocated");
                return Ok(id);
            }

            if !flags.blocks() {
                drop(ids);
                return Err(flags.exhausted("id space"));
            }

            let epoch = self.notify.epoch();
            drop(ids);
            debug!("all {} ids in use, waiting for a release", self.max);
            self.notify.wait(epoch);
        }
    }

    /// Return `id` to the pool and wake blocked [`get`](Self::get) calls.
    ///
    /// # Panics
    /// If `id` is out of range or not currently allocated.
    pub fn release(&self, id: usize) {
        self.check_range(id);
        Self::clear_allocated(&mut self.ids.lock(), id);
        self.released(id);
    }

    /// [`release`](Self::release) for callers that may not spin on the lock.
    ///
    /// # Errors
    /// [`AllocError::WouldBlock`] if [`AllocFlags::NO_WAIT`] is set and the
    /// allocator is locked; `id` stays allocated then.
    ///
    /// # Panics
    /// As [`release`](Self::release), or on contradictory flags.
    pub fn try_release(&self, id: usize, flags: AllocFlags) -> Result<(), AllocError> {
        flags.validate();
        self.check_range(id);
        Self::clear_allocated(&mut *self.ids.acquire(flags.lock_mode())?, id);
        self.released(id);
        Ok(())
    }

    /// Mark `id` as taken without scanning, e.g. id 0 for the idle thread.
    ///
    /// # Panics
    /// If `id` is out of range.
    pub fn reserve(&self, id: usize) {
        self.check_range(id);
        self.ids.lock().set(id);
        debug!("id {id} reserved");
    }

    /// [`reserve`](Self::reserve) honoring [`AllocFlags::NO_WAIT`].
    ///
    /// # Errors
    /// [`AllocError::WouldBlock`] if the allocator is locked and
    /// [`AllocFlags::NO_WAIT`] is set.
    pub fn try_reserve(&self, id: usize, flags: AllocFlags) -> Result<(), AllocError> {
        flags.validate();
        self.check_range(id);
        self.ids.acquire(flags.lock_mode())?.set(id);
        debug!("id {id} reserved");
        Ok(())
    }

    fn check_range(&self, id: usize) {
        assert!(id < self.max, "id {id} out of range 0..{}", self.max);
    }

    fn clear_allocated(ids: &mut Bitmap<Box<[u8]>>, id: usize) {
        assert!(ids.test(id), "releasing id {id} which is not allocated");
        ids.clear(id);
    }

    fn released(&self, id: usize) {
        trace!("id {id} released");
        self.notify.notify_all();
    }

    pub fn is_allocated(&self, id: usize) -> bool {
        id < self.max && self.ids.lock().test(id)
    }

    /// Number of ids currently allocated or reserved.
    pub fn in_use(&self) -> usize {
        self.ids.lock().count_set()
    }
}

impl<N: Notify> core::fmt::Debug for IdAllocator<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdAllocator")
            .field("max", &self.max)
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}
