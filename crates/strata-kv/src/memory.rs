//! Ordered in-memory [`KvStore`] backend.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::batch::{BatchOp, WriteBatch};
use crate::error::KvError;
use crate::store::{KvPair, KvStore};

/// A [`KvStore`] held entirely in memory, backed by a `BTreeMap`.
///
/// Batches are applied under a single write lock, so readers never observe a
/// partially applied batch.
#[derive(Debug, Default)]
pub struct MemoryKv {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from exported pairs.
    ///
    /// # Errors
    /// Returns [`KvError::Corrupted`] if the same key appears twice.
    pub fn from_pairs(pairs: impl IntoIterator<Item = KvPair>) -> Result<Self, KvError> {
        let mut map = BTreeMap::new();
        for (key, value) in pairs {
            if map.insert(key.clone(), value).is_some() {
                return Err(KvError::Corrupted {
                    message: format!(
                        "duplicate key in import: {}",
                        String::from_utf8_lossy(&key)
                    ),
                });
            }
        }
        Ok(Self {
            inner: RwLock::new(map),
        })
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KvPair>, KvError> {
        let guard = self.inner.read();
        let range = guard.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded));
        Ok(range
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), KvError> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.len();
        let mut guard = self.inner.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    guard.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    guard.remove(&key);
                }
            }
        }
        tracing::trace!(ops = count, "applied write batch");
        Ok(())
    }

    fn export(&self) -> Result<Vec<KvPair>, KvError> {
        Ok(self
            .inner
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn len(&self) -> Result<usize, KvError> {
        Ok(self.inner.read().len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
