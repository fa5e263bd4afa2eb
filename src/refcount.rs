//! Atomic reference counting with illegal-state detection
//!
//! Every pooled buffer carries a [`RefCount`] initialized to 1. Retaining a
//! dead object or releasing past zero is a hard error rather than silent
//! corruption; reaching zero is reported exactly once so the deallocation
//! hook (returning backing storage to its pool) runs exactly once.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::{Error, Result};

/// Atomic reference count with retain/release semantics
///
/// All mutation goes through compare-and-swap loops so the count can be
/// shared across threads even though buffer cursors are not thread-safe.
#[derive(Debug)]
pub struct RefCount {
    count: AtomicI32,
}

impl RefCount {
    /// Create a counter holding one reference
    pub(crate) fn new() -> Self {
        Self {
            count: AtomicI32::new(1),
        }
    }

    /// Current reference count
    #[inline]
    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }

    /// Increment the count by one
    #[inline]
    pub fn retain(&self) -> Result<()> {
        self.retain_n(1)
    }

    /// Increment the count by `n`
    ///
    /// Fails with [`Error::IllegalReferenceCount`] if the object already hit
    /// zero: a dead object must never be resurrected.
    pub fn retain_n(&self, n: u32) -> Result<()> {
        debug_assert!(n > 0);
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return Err(Error::IllegalReferenceCount(current));
            }
            let next = current
                .checked_add(n as i32)
                .ok_or(Error::IllegalReferenceCount(current))?;
            match self.count.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Decrement the count by one
    ///
    /// Returns true iff the count reached zero with this call.
    #[inline]
    pub fn release(&self) -> Result<bool> {
        self.release_n(1)
    }

    /// Decrement the count by `n`; true iff the count reached zero
    ///
    /// Releasing more references than are held fails with
    /// [`Error::IllegalReferenceCount`] and leaves the count untouched.
    pub fn release_n(&self, n: u32) -> Result<bool> {
        debug_assert!(n > 0);
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current < n as i32 {
                return Err(Error::IllegalReferenceCount(current));
            }
            let next = current - n as i32;
            match self.count.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(next == 0),
                Err(observed) => current = observed,
            }
        }
    }

    /// Rearm a recycled counter to one reference
    ///
    /// Only the pool may call this, and only on a counter that has reached
    /// zero and whose storage has been reinstalled.
    pub(crate) fn reset(&self) {
        self.count.store(1, Ordering::Release);
    }
}
