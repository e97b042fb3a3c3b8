//! Error types for key/value store operations.
//!
//! [`KvError`] is the single error type returned by all [`KvStore`](crate::KvStore)
//! methods. The engine only tells corruption apart from every other backend
//! failure.

use thiserror::Error;

/// Errors returned by [`KvStore`](crate::KvStore) operations.
#[derive(Debug, Error)]
pub enum KvError {
    /// Stored bytes could not be interpreted (e.g. a snapshot import with
    /// duplicate keys).
    #[error("store corrupted: {message}")]
    Corrupted {
        /// Description of the inconsistency.
        message: String,
    },

    /// Any other failure of the backing store. [`MemoryKv`](crate::MemoryKv)
    /// never returns it; stores supplied by an embedding application report
    /// their own I/O and driver errors here.
    #[error("store backend error: {message}")]
    Backend {
        /// Freeform error description from the backend.
        message: String,
    },
}
