use bitflags::bitflags;
use kernel_sync::{LockMode, WouldBlock};
use log::error;

bitflags! {
    /// Per-call allocation policy, understood by every allocator in this crate.
    ///
    /// The empty set means: spin for the lock, fail immediately on exhaustion.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct AllocFlags: u32 {
        /// Suspend the caller until a release makes the request satisfiable.
        const BLOCK_UNTIL_AVAILABLE = 1 << 0;

        /// Halt the system instead of reporting exhaustion.
        const FATAL_ON_EXHAUSTION = 1 << 1;

        /// Do not spin for a busy allocator lock; report [`AllocError::WouldBlock`].
        ///
        /// For callers that must not sleep, e.g. interrupt handlers. Cannot be
        /// combined with [`BLOCK_UNTIL_AVAILABLE`](Self::BLOCK_UNTIL_AVAILABLE).
        const NO_WAIT = 1 << 2;
    }
}

impl AllocFlags {
    /// Panics on contradictory flag combinations.
    #[inline]
    pub(crate) fn validate(self) {
        assert!(
            !self.contains(Self::BLOCK_UNTIL_AVAILABLE | Self::NO_WAIT),
            "BLOCK_UNTIL_AVAILABLE and NO_WAIT are mutually exclusive"
        );
    }

    #[inline]
    pub(crate) const fn blocks(self) -> bool {
        self.contains(Self::BLOCK_UNTIL_AVAILABLE)
    }

    #[inline]
    pub(crate) const fn lock_mode(self) -> LockMode {
        if self.contains(Self::NO_WAIT) {
            LockMode::NonBlocking
        } else {
            LockMode::Blocking
        }
    }

    /// Exhaustion outcome for a request that could not be satisfied.
    ///
    /// Does not return if [`FATAL_ON_EXHAUSTION`](Self::FATAL_ON_EXHAUSTION) is set.
    pub(crate) fn exhausted(self, what: &str) -> AllocError {
        if self.contains(Self::FATAL_ON_EXHAUSTION) {
            error!("{what} exhausted with FATAL_ON_EXHAUSTION set");
            panic!("fatal allocation failure: {what} exhausted");
        }
        AllocError::Exhausted
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AllocError {
    /// No free resource satisfies the request.
    #[error("resource exhausted")]
    Exhausted,

    /// The allocator is busy and the caller asked not to wait.
    #[error("allocator busy and caller may not wait")]
    WouldBlock,
}

impl From<WouldBlock> for AllocError {
    fn from(_: WouldBlock) -> Self {
        Self::WouldBlock
    }
}
