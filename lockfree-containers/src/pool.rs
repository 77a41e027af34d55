//! A lock-free object pool: a Treiber free-list stack of fixed-size, type-aligned slots.
//!
//! `Pool<T>` hands out slots without per-allocation heap traffic. It can be used standalone
//! (as a lock-free bump allocator for a fixed number of `T`s) or as the node supplier for
//! [`crate::link_queue::LinkQueue`].
//!
//! # Arena, not per-node heap blocks
//!
//! The `capacity` nodes live in a single contiguous `Box<[Slot<T>]>` arena, and a [`PoolNode`]
//! is a `u32` index into it rather than a raw pointer — see [`crate::vptr`] for why that packs
//! losslessly into one `AtomicU64`. This means `Pool::clear` cannot free nodes one at a time
//! (there is nothing separate to free); instead it verifies no payload is outstanding and
//! rebuilds the free chain. The whole arena is freed in one shot when the `Pool` drops.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::Ordering;

use crate::error::{fatal, LockfreeError};
use crate::vptr::{AtomicTagged, Tagged};

/// An opaque handle to a node owned by some [`Pool`]. Only meaningful when passed back to the
/// same `Pool` that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PoolNode(u32);

/// One arena slot: uninitialised storage for a `T` plus the free-list link.
///
/// `repr(C)` pins `payload` at offset 0 so that [`Pool::node_of`] can recover a slot's address
/// from a payload pointer by a plain pointer cast.
#[repr(C)]
struct Slot<T> {
    payload: UnsafeCell<MaybeUninit<T>>,
    next: AtomicTagged,
}

/// A lock-free LIFO pool of `capacity` fixed slots for `T`.
///
/// `Pool<T>` is `Send + Sync` for `T: Send`: the pool only ever hands a given slot to one
/// thread at a time (enforced by the free-list CAS), so concurrent access to the pool itself
/// is safe even though individual slots are plain `UnsafeCell`s.
pub struct Pool<T> {
    arena: Box<[Slot<T>]>,
    head: AtomicTagged,
    capacity: usize,
}

unsafe impl<T: Send> Send for Pool<T> {}
unsafe impl<T: Send> Sync for Pool<T> {}

impl<T> Pool<T> {
    /// Creates a pool with `capacity` freshly minted, empty slots, all initially free.
    pub fn new(capacity: usize) -> Self {
        let mut arena = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let next = if i + 1 < capacity {
                Tagged::of((i + 1) as u32, 0)
            } else {
                Tagged::NULL
            };
            arena.push(Slot {
                payload: UnsafeCell::new(MaybeUninit::uninit()),
                next: AtomicTagged::new(next),
            });
        }

        let head = if capacity == 0 {
            Tagged::NULL
        } else {
            Tagged::of(0, 0)
        };

        Pool {
            arena: arena.into_boxed_slice(),
            head: AtomicTagged::new(head),
            capacity,
        }
    }

    /// The number of nodes this pool was minted with. Purely informational — it does not
    /// reflect how many are currently free.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Claims a free node, or `None` if the pool is observed as exhausted.
    ///
    /// Never blocks; lock-free (some thread always makes progress on contention).
    pub fn allocate(&self) -> Option<PoolNode> {
        let mut h = self.head.load(Ordering::Acquire);
        loop {
            if h.is_null() {
                #[cfg(feature = "logging")]
                log::warn!("pool exhausted: all {} nodes allocated", self.capacity);
                return None;
            }

            let n = self.arena[h.index as usize].next.load(Ordering::Relaxed);

            match self.head.compare_exchange(
                h,
                Tagged::of(n.index, h.version.wrapping_add(1)),
                Ordering::SeqCst,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(PoolNode(h.index)),
                Err(observed) => {
                    #[cfg(feature = "logging")]
                    log::trace!("allocate retry: head CAS lost a race");
                    h = observed
                }
            }
        }
    }

    /// Returns `node` to the free list.
    ///
    /// The caller must not use `node` again until a later `allocate()` hands it back out.
    pub fn deallocate(&self, node: PoolNode) {
        let slot = &self.arena[node.0 as usize];
        let mut h = self.head.load(Ordering::Acquire);
        loop {
            let own_next = slot.next.load(Ordering::Relaxed);
            slot.next
                .store(Tagged::of(h.index, own_next.version.wrapping_add(1)), Ordering::Relaxed);

            match self.head.compare_exchange(
                h,
                Tagged::of(node.0, h.version.wrapping_add(1)),
                Ordering::SeqCst,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => h = observed,
            }
        }
    }

    /// Resets the pool to its freshly constructed state: every node becomes free again.
    ///
    /// # Panics
    ///
    /// Panics if any node is not currently free (i.e. a payload is still constructed
    /// somewhere) — calling this while the pool is in active use is a caller bug. Taking
    /// `&mut self` here makes the concurrent half of that precondition a compile error rather
    /// than undefined behaviour: no other thread can hold a `&Pool<T>` (which is what
    /// `allocate`/`deallocate` require) while this exclusive borrow is live.
    pub fn clear(&mut self) {
        let mut h = self.head.load(Ordering::Relaxed);
        let mut count = 0;
        while !h.is_null() {
            count += 1;
            h = self.arena[h.index as usize].next.load(Ordering::Relaxed);
        }

        if count != self.capacity {
            fatal(LockfreeError::DroppedNonEmpty {
                live: self.capacity - count,
                where_: *std::panic::Location::caller(),
            });
        }

        *self = Pool::new(self.capacity);
    }

    /// Raw pointer to the payload storage embedded in `node`.
    ///
    /// # Safety
    ///
    /// `node` must currently be allocated from this pool (i.e. returned by `allocate` and not
    /// yet passed to `deallocate`). The returned pointer is valid only as long as that holds,
    /// and reading through it before `construct_at` (or after `destruct_at`/`move_out`) is UB.
    pub unsafe fn access_payload(&self, node: PoolNode) -> *mut T {
        self.arena[node.0 as usize].payload.get() as *mut T
    }

    /// Recovers the [`PoolNode`] handle for a payload pointer previously returned by
    /// [`Pool::access_payload`] on this same pool.
    ///
    /// # Safety
    ///
    /// `ptr` must have been obtained from `self.access_payload(node)` for some `node`
    /// allocated from this exact pool.
    pub unsafe fn node_of(&self, ptr: *mut T) -> PoolNode {
        let base = self.arena.as_ptr();
        let slot_ptr = ptr as *const Slot<T>;
        let offset = slot_ptr.offset_from(base);
        PoolNode(offset as u32)
    }

    /// Constructs `value` in place at `node`'s payload storage.
    ///
    /// # Safety
    ///
    /// `node` must be allocated and its payload must not already hold a live value (calling
    /// this twice without an intervening `destruct_at`/`move_out` leaks/overwrites the prior
    /// value without running its destructor).
    pub unsafe fn construct_at(&self, node: PoolNode, value: T) {
        ptr::write(self.access_payload(node), value);
    }

    /// Runs `T`'s destructor in place at `node`'s payload storage.
    ///
    /// # Safety
    ///
    /// `node`'s payload must currently hold a live value constructed via `construct_at`.
    pub unsafe fn destruct_at(&self, node: PoolNode) {
        ptr::drop_in_place(self.access_payload(node));
    }

    /// Moves the value out of `node`'s payload storage, leaving it logically uninitialised.
    ///
    /// # Safety
    ///
    /// Same precondition as `destruct_at`. After this call the slot holds no live value;
    /// calling `destruct_at` or `move_out` again on the same construction is UB.
    pub unsafe fn move_out(&self, node: PoolNode) -> T {
        ptr::read(self.access_payload(node))
    }

    /// Crate-internal access to a node's free-list link, used directly by
    /// [`crate::link_queue::LinkQueue`] to thread its own chain through pool-owned nodes,
    /// reusing the same per-node link this pool's own free list is built on.
    pub(crate) fn link(&self, node: PoolNode) -> &AtomicTagged {
        &self.arena[node.0 as usize].next
    }
}

impl PoolNode {
    pub(crate) fn index(self) -> u32 {
        self.0
    }

    pub(crate) fn from_index(index: u32) -> Self {
        PoolNode(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_returns_distinct_nodes_lifo() {
        let pool: Pool<(i32, String)> = Pool::new(2);
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_ne!(a, b);
        assert!(pool.allocate().is_none());

        pool.deallocate(b);
        let c = pool.allocate().unwrap();
        assert_eq!(c, b, "LIFO: the most recently freed node comes back first");
    }

    #[test]
    fn construct_destruct_roundtrip_is_reusable() {
        let pool: Pool<String> = Pool::new(1);
        let node = pool.allocate().unwrap();
        unsafe {
            pool.construct_at(node, String::from("hello"));
            assert_eq!(&*pool.access_payload(node), "hello");
            pool.destruct_at(node);
        }
        pool.deallocate(node);

        let node2 = pool.allocate().unwrap();
        assert_eq!(node2, node);
        unsafe {
            pool.construct_at(node2, String::from("again"));
            assert_eq!(&*pool.access_payload(node2), "again");
            pool.destruct_at(node2);
        }
        pool.deallocate(node2);
    }

    #[test]
    fn move_out_transfers_ownership() {
        let pool: Pool<Vec<u8>> = Pool::new(1);
        let node = pool.allocate().unwrap();
        unsafe {
            pool.construct_at(node, vec![1, 2, 3]);
            let v = pool.move_out(node);
            assert_eq!(v, vec![1, 2, 3]);
        }
        pool.deallocate(node);
    }

    #[test]
    fn node_of_inverts_access_payload() {
        let pool: Pool<u64> = Pool::new(4);
        let node = pool.allocate().unwrap();
        unsafe {
            let ptr = pool.access_payload(node);
            assert_eq!(pool.node_of(ptr), node);
        }
    }

    #[test]
    fn clear_resets_fully_freed_pool() {
        let mut pool: Pool<u8> = Pool::new(3);
        let a = pool.allocate().unwrap();
        pool.deallocate(a);
        pool.clear();
        assert_eq!(pool.allocate().is_some(), true);
        assert_eq!(pool.capacity(), 3);
    }

    #[test]
    #[should_panic]
    fn clear_panics_if_nodes_still_outstanding() {
        let mut pool: Pool<u8> = Pool::new(2);
        let _held = pool.allocate().unwrap();
        pool.clear();
    }

    #[test]
    fn zero_capacity_pool_is_always_exhausted() {
        let pool: Pool<u8> = Pool::new(0);
        assert!(pool.allocate().is_none());
        assert_eq!(pool.capacity(), 0);
    }
}
