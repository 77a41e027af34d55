//! A bounded, array-backed MPMC queue with a fixed, compile-time capacity.
//!
//! Storage is an inline array of `CAPACITY` slots, each carrying a 4-state lifecycle atomic
//! that serialises a producer's construction against a consumer's destruction of whatever
//! element previously lived at that modular index. `ArrayQueue` does not depend on
//! [`crate::pool`] at all — it is the simpler of the two queues in this crate.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::error::{fatal, LockfreeError};

/// One array slot: a 4-state lifecycle tag plus uninitialised storage for a `T`.
struct Slot<T> {
    lifecycle: AtomicU8,
    payload: UnsafeCell<MaybeUninit<T>>,
}

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const WRITTEN: u8 = 2;
const READING: u8 = 3;

/// Forces a compile-time (monomorphisation-time) error for `CAPACITY == 0`.
struct AssertCapacityNonZero<const CAPACITY: usize>;
impl<const CAPACITY: usize> AssertCapacityNonZero<CAPACITY> {
    const OK: () = assert!(CAPACITY != 0, "ArrayQueue capacity must be non-zero");
}

/// A bounded MPMC queue of `CAPACITY` slots.
pub struct ArrayQueue<T, const CAPACITY: usize> {
    slots: Box<[Slot<T>]>,
    read: AtomicU64,
    write: AtomicU64,
}

unsafe impl<T: Send, const CAPACITY: usize> Send for ArrayQueue<T, CAPACITY> {}
unsafe impl<T: Send, const CAPACITY: usize> Sync for ArrayQueue<T, CAPACITY> {}

impl<T, const CAPACITY: usize> ArrayQueue<T, CAPACITY> {
    /// Creates an empty queue. Fails to compile if `CAPACITY == 0`.
    pub fn new() -> Self {
        let _ = AssertCapacityNonZero::<CAPACITY>::OK;

        let mut slots = Vec::with_capacity(CAPACITY);
        for _ in 0..CAPACITY {
            slots.push(Slot {
                lifecycle: AtomicU8::new(EMPTY),
                payload: UnsafeCell::new(MaybeUninit::uninit()),
            });
        }

        ArrayQueue {
            slots: slots.into_boxed_slice(),
            read: AtomicU64::new(0),
            write: AtomicU64::new(0),
        }
    }

    fn index(&self, pos: u64) -> usize {
        (pos as usize) % CAPACITY
    }

    /// Pushes `value` onto the queue.
    ///
    /// Returns `Err(value)`, handing the value back, if the queue is observed full.
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut write = self.write.load(Ordering::Relaxed);
        loop {
            let read = self.read.load(Ordering::Relaxed);

            if read + CAPACITY as u64 == write {
                #[cfg(feature = "logging")]
                log::warn!("ArrayQueue full: capacity {} reached", CAPACITY);
                return Err(value);
            }

            match self.write.compare_exchange_weak(
                write,
                write + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => write = observed,
            }
        }

        let read_after = self.read.load(Ordering::Relaxed);
        if read_after > write || write > read_after + CAPACITY as u64 {
            fatal(LockfreeError::IndexInvariantViolated {
                read: read_after,
                write,
                capacity: CAPACITY,
                where_: *std::panic::Location::caller(),
            });
        }

        let slot = &self.slots[self.index(write)];

        // Spin until the previous occupant of this modular index has finished destructing
        // and releasing it. `expected` stays pinned at EMPTY: whatever transient state a
        // failed CAS observes, the only transition this producer ever attempts is EMPTY ->
        // WRITING, so there is nothing to adapt between retries.
        while slot
            .lifecycle
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            #[cfg(feature = "logging")]
            log::trace!("push spinning on a slot still being vacated");
            std::thread::yield_now();
        }

        unsafe {
            (*slot.payload.get()).write(value);
        }

        if slot
            .lifecycle
            .compare_exchange(WRITING, WRITTEN, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            fatal(LockfreeError::LifecycleCasFailed {
                expected: WRITING,
                observed: slot.lifecycle.load(Ordering::Relaxed),
                where_: *std::panic::Location::caller(),
            });
        }

        Ok(())
    }

    /// Pops the oldest element, or `None` if the queue is observed empty.
    pub fn pop(&self) -> Option<T> {
        let mut read = self.read.load(Ordering::Relaxed);
        loop {
            let write = self.write.load(Ordering::Relaxed);

            if read == write {
                return None;
            }

            match self
                .read
                .compare_exchange_weak(read, read + 1, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(observed) => read = observed,
            }
        }

        let write_after = self.write.load(Ordering::Relaxed);
        if read > write_after || write_after > read + CAPACITY as u64 {
            fatal(LockfreeError::IndexInvariantViolated {
                read,
                write: write_after,
                capacity: CAPACITY,
                where_: *std::panic::Location::caller(),
            });
        }

        let slot = &self.slots[self.index(read)];

        // Symmetric spin: wait out a still-in-progress producer that reserved this modular
        // index first.
        while slot
            .lifecycle
            .compare_exchange(WRITTEN, READING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            #[cfg(feature = "logging")]
            log::trace!("pop spinning on a slot still being filled");
            std::thread::yield_now();
        }

        let value = unsafe { (*slot.payload.get()).assume_init_read() };

        if slot
            .lifecycle
            .compare_exchange(READING, EMPTY, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            fatal(LockfreeError::LifecycleCasFailed {
                expected: READING,
                observed: slot.lifecycle.load(Ordering::Relaxed),
                where_: *std::panic::Location::caller(),
            });
        }

        Some(value)
    }

    /// Pops and drops every remaining element.
    ///
    /// Takes `&mut self`: draining while another thread might still be pushing/popping would
    /// race the very index this method uses to decide when to stop.
    pub fn clear(&mut self) {
        while self.pop().is_some() {}
    }

    /// An estimate of the current queue length.
    ///
    /// Reads `write` and `read` independently with `Relaxed` ordering; under concurrent
    /// access the pair may be observed inconsistently (e.g. transiently appearing to exceed
    /// `CAPACITY`). Never rely on this for correctness — it exists for diagnostics only.
    pub fn approximate_size(&self) -> usize {
        let write = self.write.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Relaxed);
        write.wrapping_sub(read) as usize
    }
}

impl<T, const CAPACITY: usize> Default for ArrayQueue<T, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const CAPACITY: usize> Drop for ArrayQueue<T, CAPACITY> {
    fn drop(&mut self) {
        self.clear();
    }
}
