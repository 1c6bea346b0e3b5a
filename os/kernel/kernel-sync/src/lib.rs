//! # Kernel synchronization primitives
//!
//! Locks here never sleep: contention is resolved by spinning. Callers that
//! must not spin at all (interrupt context) use [`LockMode::NonBlocking`] and
//! receive [`WouldBlock`] instead. Sleeping until a resource is released is
//! delegated to a [`Notify`] implementation supplied by the scheduler.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod mutex;
mod notify;
mod raw_spin;
mod raw_ticket;
mod sync_once_cell;

pub use mutex::{Mutex, MutexGuard};
pub use notify::{NeverBlock, Notify};
pub use raw_spin::RawSpin;
pub use raw_ticket::RawTicket;
pub use sync_once_cell::SyncOnceCell;

/// Test-and-set lock; cheapest under low contention.
pub type SpinMutex<T> = Mutex<T, RawSpin>;

/// FIFO ticket lock; fair under contention.
pub type TicketMutex<T> = Mutex<T, RawTicket>;

impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSpin::new(), value)
    }
}

impl<T> TicketMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawTicket::new(), value)
    }
}

/// How a lock may be acquired.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LockMode {
    /// Spin until the lock is free.
    Blocking,
    /// Try exactly once; fail with [`WouldBlock`] if the lock is held.
    NonBlocking,
}

/// A non-blocking acquisition found the lock held.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("lock is held and the caller may not wait")]
pub struct WouldBlock;

pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
    fn raw_is_locked(&self) -> bool;
}

pub trait RawUnlock {
    /// # Safety
    /// The caller must hold the lock.
    unsafe fn raw_unlock(&self);
}
