//! The version-tagged pointer (VP) used by [`crate::pool`] and [`crate::link_queue`] to
//! defend their free-list / chain CAS loops against the ABA problem.
//!
//! A VP is conceptually `(pointer, version)`, updated as a single atomic word so that a CAS
//! can never succeed against a pointer that merely *looks* unchanged while its generation has
//! moved on underneath it. Rather than a raw pointer, the "pointer" half here is a `u32` index
//! into a fixed arena (see the arena note on [`crate::pool::Pool`]) — that keeps the whole pair
//! inside a single `AtomicU64`, so no platform-specific double-width CAS is required.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel index standing in for "no node" (the VP equivalent of a null pointer).
const NIL: u32 = u32::MAX;

/// A `(slot index, version)` pair, packed losslessly into a `u64`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Tagged {
    pub index: u32,
    pub version: u32,
}

impl Tagged {
    pub const NULL: Tagged = Tagged {
        index: NIL,
        version: 0,
    };

    pub fn of(index: u32, version: u32) -> Self {
        Tagged { index, version }
    }

    /// A null index paired with an explicit version, so a freshly detached node's link can
    /// still carry forward a bumped generation even though it points nowhere.
    pub fn null_with_version(version: u32) -> Self {
        Tagged { index: NIL, version }
    }

    pub fn is_null(&self) -> bool {
        self.index == NIL
    }

    fn pack(self) -> u64 {
        ((self.index as u64) << 32) | self.version as u64
    }

    fn unpack(bits: u64) -> Self {
        Tagged {
            index: (bits >> 32) as u32,
            version: bits as u32,
        }
    }
}

/// An atomic `Tagged` pair, CAS'd as a single 64-bit word.
pub(crate) struct AtomicTagged(AtomicU64);

impl AtomicTagged {
    pub fn new(value: Tagged) -> Self {
        AtomicTagged(AtomicU64::new(value.pack()))
    }

    pub fn load(&self, order: Ordering) -> Tagged {
        Tagged::unpack(self.0.load(order))
    }

    pub fn store(&self, value: Tagged, order: Ordering) {
        self.0.store(value.pack(), order)
    }

    /// Returns `Ok(new)` on success, `Err(observed)` on failure — the observed current value,
    /// so callers can retry their CAS loop from it without an extra load.
    pub fn compare_exchange(
        &self,
        current: Tagged,
        new: Tagged,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Tagged, Tagged> {
        self.0
            .compare_exchange(current.pack(), new.pack(), success, failure)
            .map(Tagged::unpack)
            .map_err(Tagged::unpack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let t = Tagged::of(7, 12345);
        assert_eq!(Tagged::unpack(t.pack()), t);
    }

    #[test]
    fn null_is_distinguishable() {
        assert!(Tagged::NULL.is_null());
        assert!(!Tagged::of(0, 0).is_null());
    }

    #[test]
    fn compare_exchange_detects_aba_via_version() {
        let cell = AtomicTagged::new(Tagged::of(1, 0));
        let observed = cell.load(Ordering::Acquire);

        // Simulate another thread cycling the slot back to the same index but a new version.
        cell.store(Tagged::of(2, 1), Ordering::Release);
        cell.store(Tagged::of(1, 2), Ordering::Release);

        // A CAS against the stale (index=1, version=0) pair must fail even though the index
        // matches again, because the version does not.
        let result = cell.compare_exchange(
            observed,
            Tagged::of(9, 9),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        assert_eq!(result, Err(Tagged::of(1, 2)));
    }
}
