//! State materializer: the effective value of every entity in every
//! version.
//!
//! Resolution walks a version's inheritance chain, nearest first. At each
//! level the untracked override wins over tracked state; the first level
//! that defines either one decides the answer, and a tracked tombstone at
//! that level means the entity does not exist.
//!
//! Tracked state per version is cached in the `cache` table. Moving a
//! version's head marks the version stale instead of recomputing; stale
//! versions are recomputed in memory on read and rebuilt in place when the
//! writing transaction commits (see [`refresh_stale_all`]). Tracked writes
//! update the cache row of the written key directly, so a run of writes in
//! one working set costs O(changed entities).

pub mod history;
pub mod materialize;
pub mod write;

use serde_json::Value;

use crate::error::EngineResult;
use crate::model::types::{ChangeId, EntityKey, SchemaKey, SnapshotId, VersionId};
use crate::storage::keys::{Table, row_prefix};
use crate::storage::{StoreRead, Txn};

pub use history::{HistoryEntry, entity_history, state_at, state_at_commit};
pub use materialize::{get, list, refresh, refresh_stale_all};
pub use write::{EntityWrite, write_entity};

/// The effective state of one entity as seen from one version.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityState {
    pub key: EntityKey,
    pub content: Value,
    /// `None` for untracked state.
    pub snapshot_id: Option<SnapshotId>,
    /// The leaf change; `None` for untracked state.
    pub change_id: Option<ChangeId>,
    pub plugin_key: String,
    pub schema_version: String,
    pub untracked: bool,
    /// The ancestor version the value comes from, `None` when the queried
    /// version defines it itself.
    pub inherited_from: Option<VersionId>,
}

/// Filter for [`list`] and [`state_at_commit`]. Empty fields match all.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateFilter {
    pub schema_key: Option<SchemaKey>,
    pub file_id: Option<String>,
}

impl StateFilter {
    /// Only entities of `file_id`.
    #[must_use]
    pub fn file(file_id: impl Into<String>) -> Self {
        Self {
            schema_key: None,
            file_id: Some(file_id.into()),
        }
    }

    /// Only entities of `schema_key`.
    #[must_use]
    pub fn schema(schema_key: SchemaKey) -> Self {
        Self {
            schema_key: Some(schema_key),
            file_id: None,
        }
    }

    #[must_use]
    pub fn matches(&self, key: &EntityKey) -> bool {
        self.schema_key.as_ref().is_none_or(|s| s == &key.schema_key)
            && self.file_id.as_ref().is_none_or(|f| f == &key.file_id)
    }

    /// Row-id prefix narrowing a per-version scan as far as the filter
    /// allows.
    pub(crate) fn row_prefix(&self, version: &VersionId) -> String {
        match &self.file_id {
            Some(file) => row_prefix(&[version.as_str(), file]),
            None => row_prefix(&[version.as_str()]),
        }
    }
}

// ---------------------------------------------------------------------------
// Staleness
// ---------------------------------------------------------------------------

/// Mark the cached tracked state of `version` out of date.
///
/// # Errors
/// Returns an error if the flag cannot be written.
pub fn mark_stale(tx: &mut Txn<'_>, version: &VersionId) -> EngineResult<()> {
    tx.put_row_unlogged(Table::Stale, version.as_str(), &true)
}

/// Whether the cached tracked state of `version` is out of date.
///
/// # Errors
/// Returns an error if the flag cannot be read.
pub fn is_stale(reader: &impl StoreRead, version: &VersionId) -> EngineResult<bool> {
    Ok(reader
        .get_row::<bool>(Table::Stale, version.as_str())?
        .unwrap_or(false))
}

/// Versions whose cache is out of date.
///
/// # Errors
/// Returns an error if the flags cannot be read.
pub fn stale_versions(reader: &impl StoreRead) -> EngineResult<Vec<VersionId>> {
    let mut stale = Vec::new();
    for (row_id, flag) in reader.scan_rows::<bool>(Table::Stale, "")? {
        if flag {
            stale.push(VersionId::new(&row_id)?);
        }
    }
    Ok(stale)
}

/// Remove every cached, untracked and staleness row of a deleted version.
///
/// # Errors
/// Returns an error if the rows cannot be read.
pub fn drop_version_state(tx: &mut Txn<'_>, version: &VersionId) -> EngineResult<()> {
    let prefix = row_prefix(&[version.as_str()]);
    for table in [Table::Cache, Table::Untracked] {
        let keys: Vec<Vec<u8>> = tx
            .scan_raw(&table.key_prefix(&prefix))?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        for key in keys {
            tx.delete_raw(key);
        }
    }
    tx.delete_row_unlogged(Table::Stale, version.as_str());
    Ok(())
}
