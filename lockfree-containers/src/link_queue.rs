//! A bounded, linked MPMC queue: a Michael–Scott-style variant built on top of [`crate::pool`].
//!
//! Unlike [`crate::array_queue::ArrayQueue`], which stores payloads inline at a modular index,
//! `LinkQueue` threads a singly-linked chain through nodes borrowed from a backing `Pool`, using
//! the pool's own free-list link ([`crate::pool::Pool::link`]) as the queue's next-pointer. The
//! queue is always non-empty in the structural sense: one node is held back as a dummy/sentinel,
//! so `read_head` and `write_tail` are never null while the queue lives.
//!
//! `MULTI_READER` (a `const bool` generic) selects between two ways of reclaiming a used
//! sentinel: spin-waiting for a concurrent reader to finish with it (`true`, safe with any
//! number of concurrent poppers), or asserting it is already finished (`false`, cheaper, valid
//! only when the caller guarantees a single popper at a time).

use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{fatal, LockfreeError};
use crate::pool::{Pool, PoolNode};
use crate::vptr::{AtomicTagged, Tagged};

const CONSTRUCTED: u8 = 0;
const READING: u8 = 1;
const DESTRUCTED: u8 = 2;
const RECYCLE: u8 = 3;

/// A node's payload plus the lifecycle atomic that hands it off between the pusher that built
/// it, the popper that reads it, and whichever popper later recycles it as a spent sentinel.
struct Container<T> {
    payload: MaybeUninit<T>,
    lifetime: AtomicU8,
}

/// A bounded MPMC queue of up to `capacity` elements, linked through pool-owned nodes.
pub struct LinkQueue<T, const MULTI_READER: bool = true> {
    pool: Pool<Container<T>>,
    read_head: AtomicTagged,
    write_tail: AtomicTagged,
}

unsafe impl<T: Send, const MULTI_READER: bool> Send for LinkQueue<T, MULTI_READER> {}
unsafe impl<T: Send, const MULTI_READER: bool> Sync for LinkQueue<T, MULTI_READER> {}

impl<T, const MULTI_READER: bool> LinkQueue<T, MULTI_READER> {
    /// Creates an empty queue able to hold up to `capacity` elements.
    ///
    /// One extra node is minted beyond `capacity` to serve as the permanent sentinel, mirroring
    /// the `capacity + 1` backing allocation a Michael–Scott queue always needs.
    pub fn new(capacity: usize) -> Self {
        let backing = capacity
            .checked_add(1)
            .expect("LinkQueue capacity + 1 overflows usize");
        let pool = Pool::new(backing);
        let sentinel = pool
            .allocate()
            .expect("a freshly constructed pool of capacity + 1 always has a node free");

        unsafe {
            let container = pool.access_payload(sentinel);
            ptr::write(
                ptr::addr_of_mut!((*container).lifetime),
                AtomicU8::new(DESTRUCTED),
            );
        }
        pool.link(sentinel).store(Tagged::NULL, Ordering::Relaxed);

        let start = Tagged::of(sentinel.index(), 0);
        LinkQueue {
            pool,
            read_head: AtomicTagged::new(start),
            write_tail: AtomicTagged::new(start),
        }
    }

    /// The number of elements this queue was constructed to hold.
    pub fn capacity(&self) -> usize {
        self.pool.capacity() - 1
    }

    /// Pushes `value` onto the queue.
    ///
    /// Returns `Err(value)`, handing the value back, if the backing pool is observed exhausted.
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut leftover = Some(value);
        if self.push_with(|slot| {
            slot.write(leftover.take().expect("push_with calls its closure at most once"));
        }) {
            Ok(())
        } else {
            Err(leftover.expect("closure was never invoked, value was never taken"))
        }
    }

    /// Pushes a value built in place by `f`, which is handed a reference to the slot's raw
    /// (uninitialised) storage and is responsible for fully initialising it.
    ///
    /// Returns `false`, without invoking `f`, if the backing pool is observed exhausted.
    pub fn push_with(&self, f: impl FnOnce(&mut MaybeUninit<T>)) -> bool {
        let node = match self.pool.allocate() {
            Some(node) => node,
            None => {
                #[cfg(feature = "logging")]
                log::warn!("LinkQueue full: capacity {} reached", self.capacity());
                return false;
            }
        };

        unsafe {
            let container = self.pool.access_payload(node);
            let payload_ptr = ptr::addr_of_mut!((*container).payload);
            f(&mut *payload_ptr);
            ptr::write(
                ptr::addr_of_mut!((*container).lifetime),
                AtomicU8::new(CONSTRUCTED),
            );
        }

        let own_link = self.pool.link(node);
        let own_next = own_link.load(Ordering::Relaxed);
        own_link.store(Tagged::null_with_version(own_next.version.wrapping_add(1)), Ordering::Relaxed);

        loop {
            let tail = self.write_tail.load(Ordering::Acquire);
            let tail_link = self.pool.link(PoolNode::from_index(tail.index));
            let tail_next = tail_link.load(Ordering::Acquire);

            // Re-read write_tail: if it moved since we loaded tail, our view of tail_next may
            // already be stale relative to a newer tail.
            if tail != self.write_tail.load(Ordering::Acquire) {
                std::thread::yield_now();
                continue;
            }

            if tail_next.is_null() {
                if tail_link
                    .compare_exchange(
                        tail_next,
                        Tagged::of(node.index(), tail_next.version.wrapping_add(1)),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    let _ = self.write_tail.compare_exchange(
                        tail,
                        Tagged::of(node.index(), tail.version.wrapping_add(1)),
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                    return true;
                }
            } else {
                // Another pusher linked a node onto the tail but has not yet swung write_tail
                // forward. Help it along before retrying our own attempt.
                let _ = self.write_tail.compare_exchange(
                    tail,
                    Tagged::of(tail_next.index, tail.version.wrapping_add(1)),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
            }

            #[cfg(feature = "logging")]
            log::trace!("push retrying tail CAS");
            std::thread::yield_now();
        }
    }

    /// Pops the oldest element, or `None` if the queue is observed empty.
    pub fn pop(&self) -> Option<T> {
        self.pop_with(|value| value)
    }

    /// Pops the oldest element and passes it, by value, to `f`.
    ///
    /// `f` takes ownership of the popped value: it may transform it, drop it, or simply return
    /// it (as `pop` does). Returns `None`, without invoking `f`, if the queue is observed empty.
    pub fn pop_with<R>(&self, f: impl FnOnce(T) -> R) -> Option<R> {
        let (old_sentinel, data_node) = loop {
            let write = self.write_tail.load(Ordering::Acquire);
            let read = self.read_head.load(Ordering::Relaxed);
            let read_link = self.pool.link(PoolNode::from_index(read.index));
            let read_next = read_link.load(Ordering::Acquire);

            if read != self.read_head.load(Ordering::Relaxed) {
                std::thread::yield_now();
                continue;
            }

            if read_next.is_null() {
                return None;
            }

            if read.index == write.index {
                // write_tail has fallen behind the actual chain; help it forward and retry.
                let _ = self.write_tail.compare_exchange(
                    write,
                    Tagged::of(read_next.index, write.version.wrapping_add(1)),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                std::thread::yield_now();
                continue;
            }

            match self.read_head.compare_exchange(
                read,
                Tagged::of(read_next.index, read.version.wrapping_add(1)),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break (PoolNode::from_index(read.index), PoolNode::from_index(read_next.index)),
                Err(_) => continue,
            }
        };

        let value = unsafe {
            let container = self.pool.access_payload(data_node);
            let lifetime = &(*container).lifetime;

            if lifetime
                .compare_exchange(CONSTRUCTED, READING, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                fatal(LockfreeError::LifecycleCasFailed {
                    expected: CONSTRUCTED,
                    observed: lifetime.load(Ordering::Relaxed),
                    where_: *std::panic::Location::caller(),
                });
            }

            let payload_ptr = ptr::addr_of!((*container).payload);
            let value = ptr::read(payload_ptr).assume_init();

            if lifetime
                .compare_exchange(READING, DESTRUCTED, Ordering::Release, Ordering::Relaxed)
                .is_err()
            {
                fatal(LockfreeError::LifecycleCasFailed {
                    expected: READING,
                    observed: lifetime.load(Ordering::Relaxed),
                    where_: *std::panic::Location::caller(),
                });
            }

            value
        };

        self.recycle_sentinel(old_sentinel);

        Some(f(value))
    }

    /// Returns a node that just became the chain's tail-of-history back to the free list, once
    /// whichever popper was still finalising it (if any) has marked it `DESTRUCTED`.
    fn recycle_sentinel(&self, old_sentinel: PoolNode) {
        let container = unsafe { self.pool.access_payload(old_sentinel) };
        let lifetime = unsafe { &(*container).lifetime };

        if MULTI_READER {
            while lifetime
                .compare_exchange(DESTRUCTED, RECYCLE, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                #[cfg(feature = "logging")]
                log::trace!("pop spinning on a sentinel still being finalised by another reader");
                std::thread::yield_now();
            }
        } else if lifetime
            .compare_exchange(DESTRUCTED, RECYCLE, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            fatal(LockfreeError::LifecycleCasFailed {
                expected: DESTRUCTED,
                observed: lifetime.load(Ordering::Relaxed),
                where_: *std::panic::Location::caller(),
            });
        }

        self.pool.deallocate(old_sentinel);
    }

    /// Pops and drops every remaining element.
    ///
    /// Takes `&mut self` for the same reason `ArrayQueue::clear` does: draining concurrently
    /// with another thread's push/pop would race the emptiness check this method relies on.
    pub fn clear(&mut self) {
        self.clear_with(|_| {});
    }

    /// Pops every remaining element, passing each to `f` by value before dropping it.
    pub fn clear_with(&mut self, mut f: impl FnMut(T)) {
        while self.pop_with(|value| f(value)).is_some() {}
    }
}

impl<T, const MULTI_READER: bool> Drop for LinkQueue<T, MULTI_READER> {
    fn drop(&mut self) {
        let read = self.read_head.load(Ordering::Relaxed);
        let write = self.write_tail.load(Ordering::Relaxed);

        if read.index != write.index {
            let mut live = 0usize;
            let mut node = read;
            while node.index != write.index {
                live += 1;
                node = self.pool.link(PoolNode::from_index(node.index)).load(Ordering::Relaxed);
            }
            fatal(LockfreeError::DroppedNonEmpty {
                live,
                where_: *std::panic::Location::caller(),
            });
        }

        self.pool.deallocate(PoolNode::from_index(read.index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l1_capacity_three_fifo_order() {
        let mut q: LinkQueue<i32> = LinkQueue::new(3);
        assert_eq!(q.capacity(), 3);
        for v in [10, 20, 30] {
            assert_eq!(q.push(v), Ok(()));
        }
        assert_eq!(q.push(40), Err(40));

        assert_eq!(q.pop(), Some(10));
        assert_eq!(q.push(40), Ok(()));
        assert_eq!(q.pop(), Some(20));
        assert_eq!(q.pop(), Some(30));
        assert_eq!(q.pop(), Some(40));
        assert_eq!(q.pop(), None);

        q.clear();
    }

    #[test]
    #[should_panic(expected = "overflows usize")]
    fn new_panics_on_capacity_plus_one_overflow() {
        let _q: LinkQueue<i32> = LinkQueue::new(usize::MAX);
    }

    #[test]
    fn empty_queue_pops_none() {
        let q: LinkQueue<i32> = LinkQueue::new(4);
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn single_reader_variant_matches_behaviour() {
        let mut q: LinkQueue<i32, false> = LinkQueue::new(2);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        q.clear();
    }

    #[test]
    fn clear_drains_and_drops_everything() {
        let mut q: LinkQueue<Vec<u8>> = LinkQueue::new(4);
        q.push(vec![1, 2, 3]).unwrap();
        q.push(vec![4, 5, 6]).unwrap();
        q.clear();
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn drop_after_clear_does_not_panic() {
        let mut q: LinkQueue<i32> = LinkQueue::new(1);
        q.push(99).unwrap();
        q.clear();
        drop(q);
    }

    #[test]
    #[should_panic]
    fn drop_while_non_empty_panics() {
        let q: LinkQueue<i32> = LinkQueue::new(1);
        q.push(1).unwrap();
        drop(q);
    }

    #[test]
    fn push_with_constructs_in_place() {
        let q: LinkQueue<String> = LinkQueue::new(1);
        assert!(q.push_with(|slot| {
            slot.write(String::from("hand built"));
        }));
        assert_eq!(q.pop(), Some(String::from("hand built")));
    }

    #[test]
    fn pop_with_transforms_value() {
        let q: LinkQueue<i32> = LinkQueue::new(1);
        q.push(21).unwrap();
        let doubled = q.pop_with(|v| v * 2);
        assert_eq!(doubled, Some(42));
    }

    #[test]
    fn panicking_pop_with_closure_does_not_wedge_the_queue() {
        let mut q: LinkQueue<i32> = LinkQueue::new(2);
        q.push(1).unwrap();
        q.push(2).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            q.pop_with(|_| panic!("caller-supplied closure panics"));
        }));
        assert!(result.is_err());

        // The queue's own bookkeeping already completed before the closure ran, so the next
        // pop proceeds normally.
        assert_eq!(q.pop(), Some(2));
        q.clear();
    }
}
