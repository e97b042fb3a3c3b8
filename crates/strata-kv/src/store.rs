//! The [`KvStore`] trait: the abstraction boundary between strata and
//! persistent storage.
//!
//! | Group  | Methods                         |
//! |--------|---------------------------------|
//! | Read   | `get`, `scan_prefix`, `len`     |
//! | Write  | `apply`                         |
//! | Export | `export`                        |
//!
//! Keys are ordered lexicographically by byte value; `scan_prefix` returns
//! pairs in that order.

use crate::batch::WriteBatch;
use crate::error::KvError;

/// A key/value pair as returned by scans and exports.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Ordered key/value store used by the strata engine.
///
/// # Atomicity
///
/// [`apply`](Self::apply) must be atomic with respect to every read method:
/// a concurrent reader observes the store either entirely before or entirely
/// after the batch, never in between.
///
/// # Object safety
///
/// The trait is object-safe; the engine holds a `Box<dyn KvStore>`.
pub trait KvStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    /// Return every pair whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>, KvError>;

    /// Apply all operations of `batch` atomically.
    fn apply(&self, batch: WriteBatch) -> Result<(), KvError>;

    /// Return every pair in the store, in key order.
    fn export(&self) -> Result<Vec<KvPair>, KvError>;

    /// Number of stored keys.
    fn len(&self) -> Result<usize, KvError>;

    /// Returns `true` if the store holds no keys.
    fn is_empty(&self) -> Result<bool, KvError> {
        Ok(self.len()? == 0)
    }
}
