//! Wake/wait collaborator for blocking allocations.
//!
//! The allocators never sleep on their own. A request flagged to block until
//! resources are available parks through a [`Notify`] supplied by whoever
//! owns scheduling, using an event-count handshake:
//!
//! 1. while still holding the allocator lock, sample [`Notify::epoch`];
//! 2. drop the lock;
//! 3. call [`Notify::wait`] with the sample.
//!
//! Releases mutate under the lock, drop it, then call [`Notify::notify_all`],
//! which must advance the epoch. A release that slips in between steps 2 and
//! 3 therefore makes `wait` return immediately instead of being lost.

/// Event-count style wait queue.
pub trait Notify {
    /// Current epoch; advanced by every [`notify_all`](Self::notify_all).
    fn epoch(&self) -> u64;

    /// Suspend the caller until the epoch differs from `observed`.
    ///
    /// Spurious returns are allowed; callers re-check their condition.
    fn wait(&self, observed: u64);

    /// Advance the epoch and wake every waiter.
    fn notify_all(&self);
}

impl<N: Notify + ?Sized> Notify for &N {
    #[inline]
    fn epoch(&self) -> u64 {
        (**self).epoch()
    }

    #[inline]
    fn wait(&self, observed: u64) {
        (**self).wait(observed);
    }

    #[inline]
    fn notify_all(&self) {
        (**self).notify_all();
    }
}

/// [`Notify`] for instances that are never used with blocking requests.
///
/// Waking is a no-op. Waiting is a contract violation: there is nothing that
/// could ever wake the caller.
#[derive(Copy, Clone, Debug, Default)]
pub struct NeverBlock;

impl Notify for NeverBlock {
    fn epoch(&self) -> u64 {
        0
    }

    fn wait(&self, _observed: u64) {
        panic!("blocking allocation requested on an instance without a wait queue");
    }

    fn notify_all(&self) {}
}
