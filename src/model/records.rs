//! Persisted row types.
//!
//! Every row is a `serde` struct stored as JSON under a [`Table`] key (see
//! [`crate::storage::keys`]). Rows in synced tables are exchanged verbatim
//! between replicas, so their shape is part of the wire contract.
//!
//! [`Table`]: crate::storage::keys::Table

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{
    ChangeId, ChangeSetId, CommitId, EntityKey, LabelId, SchemaKey, SessionId, SnapshotId,
    VersionId,
};

/// Immutable payload of one entity at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Hash of the canonical content.
    pub id: SnapshotId,
    /// The payload. `Null` is the tombstone snapshot.
    pub content: Value,
}

/// One mutation of one entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub entity_id: String,
    pub schema_key: SchemaKey,
    pub schema_version: String,
    pub file_id: String,
    pub plugin_key: String,
    pub snapshot_id: SnapshotId,
    /// RFC 3339 timestamp from the engine context.
    pub created_at: String,
}

impl Change {
    /// The logical row this change mutates.
    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey {
            entity_id: self.entity_id.clone(),
            schema_key: self.schema_key.clone(),
            file_id: self.file_id.clone(),
        }
    }
}

/// An atomic bundle of changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: ChangeSetId,
    pub created_at: String,
}

/// Membership of one change in one change set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetElement {
    pub change_set_id: ChangeSetId,
    pub change_id: ChangeId,
    pub entity_id: String,
    pub schema_key: SchemaKey,
    pub file_id: String,
}

impl ChangeSetElement {
    /// The logical row the referenced change mutates.
    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey {
            entity_id: self.entity_id.clone(),
            schema_key: self.schema_key.clone(),
            file_id: self.file_id.clone(),
        }
    }
}

/// Parent→child relation between change sets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetEdge {
    pub parent_id: ChangeSetId,
    pub child_id: ChangeSetId,
}

/// Immutable node of the history DAG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub change_set_id: ChangeSetId,
    pub parent_commit_ids: Vec<CommitId>,
    pub created_at: String,
}

/// Mutable named pointer into the commit graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub name: String,
    /// The sealed head.
    pub commit_id: CommitId,
    /// Detached commit whose change set collects uncommitted changes.
    pub working_commit_id: CommitId,
    pub inherits_from_version_id: Option<VersionId>,
}

/// A tag attachable to change sets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: LabelId,
    pub name: String,
}

/// Join row between change sets and labels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetLabel {
    pub change_set_id: ChangeSetId,
    pub label_id: LabelId,
}

/// Per-write log entry used to build vector clocks and order sync writes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationLogEntry {
    pub table_name: String,
    pub row_id: String,
    pub session: SessionId,
    /// Strictly increasing per session.
    pub session_time: u64,
    /// Milliseconds since the Unix epoch, HLC-clamped.
    pub wall_clock: u64,
}

impl MutationLogEntry {
    /// Ordering used to pick the winning write for a row: wall clock, then
    /// session id, then session time.
    #[must_use]
    pub fn order_key(&self) -> (u64, &str, u64) {
        (self.wall_clock, self.session.as_str(), self.session_time)
    }
}

/// A registered schema definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredSchema {
    pub key: SchemaKey,
    pub version: String,
    /// Opaque schema body (typically JSON Schema).
    pub definition: Value,
    /// Schema keys this schema's entities reference.
    #[serde(default)]
    pub foreign_keys: Vec<SchemaKey>,
}

/// Cached tracked state of one entity in one version.
///
/// A tombstone row masks inherited state (copy-on-write delete).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRow {
    pub key: EntityKey,
    /// The leaf change for this key.
    pub change_id: ChangeId,
    pub snapshot_id: SnapshotId,
    pub plugin_key: String,
    pub schema_version: String,
    /// The leaf change deletes the entity.
    pub tombstone: bool,
}

/// An untracked override: state that never enters history or sync.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UntrackedRow {
    pub key: EntityKey,
    pub content: Value,
    pub plugin_key: String,
    pub schema_version: String,
}
