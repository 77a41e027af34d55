//! Diagnostics for conditions the concurrency protocol proves cannot happen under correct
//! use. These are never returned to a caller — a `LockfreeError` is rendered and then the
//! thread panics with it (see the `fatal!` macro below). They exist so that, when the
//! invariant they guard is somehow violated (a caller misusing `unsafe` Pool internals, or a
//! genuine bug in this crate), the panic message identifies exactly what went wrong, where,
//! and on which thread, rather than surfacing as an inscrutable downstream corruption.

use std::fmt;
use std::panic::Location;
use std::thread::ThreadId;

/// A fatal violation of one of this crate's concurrency invariants.
///
/// None of these are reachable through the safe, documented API used correctly; they exist
/// as a diagnostic surface for `unsafe` misuse of [`crate::pool::Pool`]'s low-level API or for
/// bugs in this crate itself.
#[derive(Debug, thiserror::Error)]
pub enum LockfreeError {
    /// A lifecycle CAS that the protocol guarantees must succeed did not.
    #[error("lifecycle CAS expected {expected:?} but observed {observed:?} at {where_}")]
    LifecycleCasFailed {
        expected: u8,
        observed: u8,
        where_: Location<'static>,
    },

    /// `ArrayQueue`'s `read`/`write` indices violated `read <= write <= read + capacity`.
    #[error("index invariant violated: read={read}, write={write}, capacity={capacity} at {where_}")]
    IndexInvariantViolated {
        read: u64,
        write: u64,
        capacity: usize,
        where_: Location<'static>,
    },

    /// A container was dropped while it still held live elements.
    #[error("container dropped with {live} live element(s) still present; call clear() first, at {where_}")]
    DroppedNonEmpty { live: usize, where_: Location<'static> },
}

impl LockfreeError {
    /// The thread that is about to panic with this error — included in the rendered message
    /// via [`fatal`] so a fatal diagnostic always identifies which thread observed it.
    pub(crate) fn thread_id() -> ThreadId {
        std::thread::current().id()
    }
}

struct WithThread<'a>(&'a LockfreeError, ThreadId);

impl fmt::Display for WithThread<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[thread {:?}] {}", self.1, self.0)
    }
}

/// Panics with a `LockfreeError`, annotated with the observing thread's id.
///
/// Invariant violations are unreachable under correct use (see module docs); this exists so
/// that if one ever fires, the message is immediately actionable.
#[track_caller]
pub(crate) fn fatal(err: LockfreeError) -> ! {
    let tid = LockfreeError::thread_id();
    panic!("{}", WithThread(&err, tid));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_invariant_details() {
        let err = LockfreeError::IndexInvariantViolated {
            read: 5,
            write: 2,
            capacity: 4,
            where_: *Location::caller(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("read=5"));
        assert!(rendered.contains("write=2"));
        assert!(rendered.contains("capacity=4"));
    }
}
