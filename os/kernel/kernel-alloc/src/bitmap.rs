//! # Fixed-size bit vector
//!
//! A [`Bitmap`] tracks `len` boolean slots packed eight to a byte, bit `i`
//! living at byte `i / 8` under mask `1 << (i % 8)`.
//!
//! Ownership of the backing bytes is part of the type:
//!
//! * [`Bitmap::alloc`] allocates zeroed storage and frees it on drop.
//! * [`Bitmap::wrap`] borrows a caller buffer as-is and never frees it.
//!
//! There is no internal synchronization; owners that share a bitmap
//! serialize access themselves.

use crate::{AllocError, AllocFlags};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

/// Bytes needed to hold `bits` bits.
#[inline]
#[must_use]
pub const fn bytes_for(bits: usize) -> usize {
    bits.div_ceil(8)
}

pub struct Bitmap<S> {
    storage: S,
    len: usize,
}

impl Bitmap<Box<[u8]>> {
    /// Allocate a zeroed bitmap of `len` bits.
    ///
    /// The heap has no wait queue, so [`AllocFlags::BLOCK_UNTIL_AVAILABLE`]
    /// behaves like the default policy here.
    ///
    /// # Errors
    /// [`AllocError::Exhausted`] if the storage cannot be allocated.
    ///
    /// # Panics
    /// If `len` is zero, or on exhaustion with [`AllocFlags::FATAL_ON_EXHAUSTION`].
    pub fn alloc(len: usize, flags: AllocFlags) -> Result<Self, AllocError> {
        assert!(len > 0, "a bitmap needs at least one bit");
        let bytes = bytes_for(len);

        let mut storage = Vec::new();
        if storage.try_reserve_exact(bytes).is_err() {
            return Err(flags.exhausted("bitmap storage"));
        }
        storage.resize(bytes, 0);

        Ok(Self {
            storage: storage.into_boxed_slice(),
            len,
        })
    }
}

impl<'a> Bitmap<&'a mut [u8]> {
    /// Use the first `bytes_for(len)` bytes of `buffer` as bitmap storage.
    ///
    /// The current contents are kept; call [`clear_all`](Bitmap::clear_all)
    /// for a blank map.
    ///
    /// # Panics
    /// If `len` is zero or `buffer` is too short.
    pub fn wrap(len: usize, buffer: &'a mut [u8]) -> Self {
        assert!(len > 0, "a bitmap needs at least one bit");
        let bytes = bytes_for(len);
        assert!(
            buffer.len() >= bytes,
            "buffer of {} bytes cannot hold {len} bits",
            buffer.len()
        );
        Self {
            storage: &mut buffer[..bytes],
            len,
        }
    }
}

impl<S: AsRef<[u8]>> Bitmap<S> {
    /// Number of bits.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Always `false`: a bitmap holds at least one bit.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// The backing bytes, `bytes_for(len)` of them.
    #[inline]
    pub fn storage(&self) -> &[u8] {
        self.storage.as_ref()
    }

    #[inline]
    pub fn test(&self, bit: usize) -> bool {
        let (byte, mask) = self.locate(bit);
        self.storage.as_ref()[byte] & mask != 0
    }

    /// Lowest set bit.
    #[inline]
    pub fn first_set(&self) -> Option<usize> {
        self.scan(0, true)
    }

    /// Lowest clear bit.
    #[inline]
    pub fn first_clear(&self) -> Option<usize> {
        self.scan(0, false)
    }

    /// Lowest set bit strictly after `after`.
    #[inline]
    pub fn next_set(&self, after: usize) -> Option<usize> {
        self.scan(after.checked_add(1)?, true)
    }

    /// Lowest clear bit at or after `from`.
    #[inline]
    pub fn next_clear(&self, from: usize) -> Option<usize> {
        self.scan(from, false)
    }

    pub fn count_set(&self) -> usize {
        let bytes = self.storage.as_ref();
        let Some((last, head)) = bytes.split_last() else {
            return 0;
        };
        let head: u32 = head.iter().map(|b| b.count_ones()).sum();
        let tail = last & Self::tail_mask(self.len);
        (head + tail.count_ones()) as usize
    }

    #[inline]
    fn locate(&self, bit: usize) -> (usize, u8) {
        assert!(
            bit < self.len,
            "bit {bit} out of range for bitmap of {} bits",
            self.len
        );
        (bit / 8, 1 << (bit % 8))
    }

    /// Valid bits of the final byte.
    #[inline]
    const fn tail_mask(len: usize) -> u8 {
        match len % 8 {
            0 => 0xFF,
            r => (1u8 << r) - 1,
        }
    }

    fn scan(&self, from: usize, want_set: bool) -> Option<usize> {
        if from >= self.len {
            return None;
        }

        let bytes = self.storage.as_ref();
        let mut mask = 0xFFu8 << (from % 8);
        for (idx, &byte) in bytes.iter().enumerate().skip(from / 8) {
            let candidates = (if want_set { byte } else { !byte }) & mask;
            if candidates != 0 {
                let bit = idx * 8 + candidates.trailing_zeros() as usize;
                return (bit < self.len).then_some(bit);
            }
            mask = 0xFF;
        }
        None
    }
}

impl<S: AsRef<[u8]> + AsMut<[u8]>> Bitmap<S> {
    #[inline]
    pub fn set(&mut self, bit: usize) {
        let (byte, mask) = self.locate(bit);
        self.storage.as_mut()[byte] |= mask;
    }

    #[inline]
    pub fn clear(&mut self, bit: usize) {
        let (byte, mask) = self.locate(bit);
        self.storage.as_mut()[byte] &= !mask;
    }

    pub fn clear_all(&mut self) {
        self.storage.as_mut().fill(0);
    }
}

impl<S: AsRef<[u8]>> fmt::Debug for Bitmap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("len", &self.len)
            .field("set", &self.count_set())
            .finish()
    }
}
