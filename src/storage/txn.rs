//! Write transactions.
//!
//! A [`Txn`] buffers writes in an overlay on top of the committed store.
//! Reads through the transaction see its own writes. Nothing reaches the
//! store until [`Engine::transaction`](crate::engine::Engine::transaction)
//! turns the overlay into one atomic [`WriteBatch`]; dropping the
//! transaction discards everything.
//!
//! Nested operations use [`Txn::savepoint`]: if the nested closure fails,
//! every write it made is undone and the outer transaction continues.

use std::collections::BTreeMap;
use std::ops::Bound;

use serde::Serialize;
use strata_kv::{KvPair, KvStore, WriteBatch};

use super::keys::{self, Table};
use super::{StoreRead, decode_row};
use crate::context::{self, Env};
use crate::error::{EngineError, EngineResult};
use crate::model::records::MutationLogEntry;

/// Overlay entry: `Some(bytes)` is a pending put, `None` a pending delete.
type Pending = Option<Vec<u8>>;

/// A write transaction.
pub struct Txn<'e> {
    kv: &'e dyn KvStore,
    env: &'e Env,
    overlay: BTreeMap<Vec<u8>, Pending>,
    /// Previous overlay state of each touched key, newest last. `None`
    /// means the key was not in the overlay.
    journal: Vec<(Vec<u8>, Option<Pending>)>,
}

impl<'e> Txn<'e> {
    pub(crate) fn new(kv: &'e dyn KvStore, env: &'e Env) -> Self {
        Self {
            kv,
            env,
            overlay: BTreeMap::new(),
            journal: Vec::new(),
        }
    }

    /// Number of keys with pending writes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.overlay.len()
    }

    /// Run `f` as a savepoint: on error, roll back every write `f` made and
    /// return the error.
    ///
    /// # Errors
    /// Returns whatever `f` returns.
    pub fn savepoint<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mark = self.journal.len();
        let result = f(self);
        if result.is_err() {
            self.rollback_to(mark);
        }
        result
    }

    fn rollback_to(&mut self, mark: usize) {
        let undone = self.journal.len().saturating_sub(mark);
        while self.journal.len() > mark {
            let Some((key, previous)) = self.journal.pop() else {
                break;
            };
            match previous {
                Some(state) => {
                    self.overlay.insert(key, state);
                }
                None => {
                    self.overlay.remove(&key);
                }
            }
        }
        tracing::debug!(undone, "rolled back savepoint");
    }

    fn stage(&mut self, key: Vec<u8>, value: Pending) {
        let previous = self.overlay.insert(key.clone(), value);
        self.journal.push((key, previous));
    }

    /// Turn the overlay into a batch for the store.
    pub(crate) fn into_batch(self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (key, value) in self.overlay {
            match value {
                Some(bytes) => batch.put(key, bytes),
                None => batch.delete(key),
            }
        }
        batch
    }

    // -----------------------------------------------------------------------
    // Raw writes
    // -----------------------------------------------------------------------

    pub(crate) fn put_raw(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.stage(key, Some(value));
    }

    pub(crate) fn delete_raw(&mut self, key: Vec<u8>) {
        self.stage(key, None);
    }

    // -----------------------------------------------------------------------
    // Row writes
    // -----------------------------------------------------------------------

    /// Write a row. Writes to synced tables append a mutation log entry.
    ///
    /// # Errors
    /// Returns an error if the row does not serialize or the log cannot be
    /// written.
    pub fn put_row<T: Serialize>(&mut self, table: Table, row_id: &str, row: &T) -> EngineResult<()> {
        self.put_row_unlogged(table, row_id, row)?;
        if table.is_synced() {
            self.log_mutation(table, row_id)?;
        }
        Ok(())
    }

    /// Delete a row. Deletes from synced tables append a mutation log entry.
    ///
    /// # Errors
    /// Returns an error if the log cannot be written.
    pub fn delete_row(&mut self, table: Table, row_id: &str) -> EngineResult<()> {
        self.delete_raw(table.key(row_id));
        if table.is_synced() {
            self.log_mutation(table, row_id)?;
        }
        Ok(())
    }

    /// Write a row without touching the mutation log. Used for local tables
    /// and for rows imported by sync, which arrive with their own log.
    ///
    /// # Errors
    /// Returns an error if the row does not serialize.
    pub fn put_row_unlogged<T: Serialize>(
        &mut self,
        table: Table,
        row_id: &str,
        row: &T,
    ) -> EngineResult<()> {
        let bytes = serde_json::to_vec(row)
            .map_err(|e| EngineError::serialization(format!("{table} row {row_id}"), e))?;
        self.put_raw(table.key(row_id), bytes);
        Ok(())
    }

    /// Delete a row without touching the mutation log.
    pub fn delete_row_unlogged(&mut self, table: Table, row_id: &str) {
        self.delete_raw(table.key(row_id));
    }

    /// Append a mutation log entry for `table/row_id` under this engine's
    /// session and point the row's mutation head at it.
    fn log_mutation(&mut self, table: Table, row_id: &str) -> EngineResult<()> {
        let session = self.env.session.clone();
        let session_time = self
            .get_row::<u64>(Table::SessionClock, session.as_str())?
            .unwrap_or(0)
            + 1;
        let wall_clock = context::next_wall_clock(self)?;
        let entry = MutationLogEntry {
            table_name: table.name().to_owned(),
            row_id: row_id.to_owned(),
            session,
            session_time,
            wall_clock,
        };
        self.put_row_unlogged(Table::SessionClock, entry.session.as_str(), &session_time)?;
        self.put_row_unlogged(
            Table::MutationLog,
            &keys::mutation_row_id(entry.session.as_str(), session_time),
            &entry,
        )?;
        self.put_row_unlogged(
            Table::MutationHead,
            &keys::mutation_head_row_id(table, row_id),
            &entry,
        )
    }
}

impl StoreRead for Txn<'_> {
    fn env(&self) -> &Env {
        self.env
    }

    fn get_raw(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        match self.overlay.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => Ok(self.kv.get(key)?),
        }
    }

    fn scan_raw(&self, prefix: &[u8]) -> EngineResult<Vec<KvPair>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.kv.scan_prefix(prefix)?.into_iter().collect();
        let pending = self
            .overlay
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix));
        for (key, value) in pending {
            match value {
                Some(bytes) => {
                    merged.insert(key.clone(), bytes.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}

impl Txn<'_> {
    /// Read and decode a row that must exist.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] if the row is missing.
    pub fn require_row<T: serde::de::DeserializeOwned>(
        &self,
        table: Table,
        row_id: &str,
        kind: &'static str,
    ) -> EngineResult<T> {
        let bytes = self
            .get_raw(&table.key(row_id))?
            .ok_or_else(|| EngineError::not_found(kind, row_id))?;
        decode_row(table, row_id, &bytes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
