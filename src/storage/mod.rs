//! Storage layer: table layout, transactions, writer lock, blob export.
//!
//! Everything above this module reads through [`StoreRead`] and writes
//! through [`Txn`]. Reads see either the committed store ([`ReadView`]) or
//! the committed store plus the transaction's own uncommitted writes
//! ([`Txn`]).

pub mod blob;
pub mod keys;
pub mod lock;
pub mod txn;
pub mod verify;

use serde::de::DeserializeOwned;
use strata_kv::{KvPair, KvStore};

use crate::context::Env;
use crate::error::{EngineError, EngineResult};

pub use keys::Table;
pub use txn::Txn;

// ---------------------------------------------------------------------------
// StoreRead
// ---------------------------------------------------------------------------

/// Read access to the engine's tables.
pub trait StoreRead {
    /// The engine context this reader belongs to.
    fn env(&self) -> &Env;

    /// Read one raw value.
    ///
    /// # Errors
    /// Returns an error if the underlying store fails.
    fn get_raw(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>>;

    /// Read every pair under `prefix`, in key order.
    ///
    /// # Errors
    /// Returns an error if the underlying store fails.
    fn scan_raw(&self, prefix: &[u8]) -> EngineResult<Vec<KvPair>>;

    /// Read and decode one row.
    ///
    /// # Errors
    /// Returns an error if the store fails or the row does not decode.
    fn get_row<T: DeserializeOwned>(&self, table: Table, row_id: &str) -> EngineResult<Option<T>> {
        self.get_raw(&table.key(row_id))?
            .map(|bytes| decode_row(table, row_id, &bytes))
            .transpose()
    }

    /// Read and decode every row whose id starts with `row_id_prefix`,
    /// returning `(row_id, row)` pairs in row-id order.
    ///
    /// # Errors
    /// Returns an error if the store fails or a row does not decode.
    fn scan_rows<T: DeserializeOwned>(
        &self,
        table: Table,
        row_id_prefix: &str,
    ) -> EngineResult<Vec<(String, T)>> {
        let prefix = table.key_prefix(row_id_prefix);
        self.scan_raw(&prefix)?
            .into_iter()
            .map(|(key, bytes)| {
                let row_id = table.row_id_of(&key).ok_or_else(|| EngineError::Corrupted {
                    detail: format!("non-utf8 key in table {table}"),
                })?;
                let row = decode_row(table, &row_id, &bytes)?;
                Ok((row_id, row))
            })
            .collect()
    }
}

pub(crate) fn decode_row<T: DeserializeOwned>(
    table: Table,
    row_id: &str,
    bytes: &[u8],
) -> EngineResult<T> {
    serde_json::from_slice(bytes).map_err(|e| EngineError::Corrupted {
        detail: format!("row {table}/{row_id} does not decode: {e}"),
    })
}

// ---------------------------------------------------------------------------
// ReadView
// ---------------------------------------------------------------------------

/// Read-only access to committed state.
///
/// Obtained from [`Engine::read`](crate::engine::Engine::read), which keeps
/// commits out for the lifetime of the view so every read inside it sees the
/// same committed state.
pub struct ReadView<'e> {
    kv: &'e dyn KvStore,
    env: &'e Env,
}

impl<'e> ReadView<'e> {
    pub(crate) fn new(kv: &'e dyn KvStore, env: &'e Env) -> Self {
        Self { kv, env }
    }
}

impl StoreRead for ReadView<'_> {
    fn env(&self) -> &Env {
        self.env
    }

    fn get_raw(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.kv.get(key)?)
    }

    fn scan_raw(&self, prefix: &[u8]) -> EngineResult<Vec<KvPair>> {
        Ok(self.kv.scan_prefix(prefix)?)
    }
}
