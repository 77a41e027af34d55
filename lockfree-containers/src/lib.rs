//! Lock-free bounded MPMC containers.
//!
//! Three containers, built bottom-up:
//!
//! - [`pool::Pool`]: a fixed-capacity lock-free free-list allocator (a Treiber stack of slots).
//! - [`array_queue::ArrayQueue`]: a bounded queue with payloads stored inline in an array,
//!   independent of `Pool`.
//! - [`link_queue::LinkQueue`]: a bounded queue built on top of `Pool`, linking borrowed nodes
//!   together with a Michael–Scott-style protocol.
//!
//! All three are safe to share across threads (`Send + Sync` wherever `T: Send`) without any
//! external locking; none of them allocate on the hot path after construction.
//!
//! # Diagnostics
//!
//! Enable the `logging` feature to get `log::warn!`/`log::trace!` calls at pool-exhaustion,
//! full-queue, and lifecycle-retry-storm points. Off by default, so a build without the feature
//! has no logging-related branches in its hot CAS loops.
//!
//! # Panics, not errors
//!
//! The containers here only ever panic for conditions their concurrency protocol proves cannot
//! happen under correct, safe-API use (see [`error::LockfreeError`]) — there is nothing a caller
//! could usefully recover from, since it would mean this crate or a caller's `unsafe` misuse of
//! `Pool`'s low-level API has corrupted a queue's structure. Capacity limits, by contrast, are
//! ordinary `Result`/`Option` values: a full queue is an expected, recoverable outcome.

mod error;
mod vptr;

pub mod array_queue;
pub mod link_queue;
pub mod pool;

pub use array_queue::ArrayQueue;
pub use error::LockfreeError;
pub use link_queue::LinkQueue;
pub use pool::{Pool, PoolNode};
