//! Content-addressed snapshot store.
//!
//! A snapshot id is the SHA-256 of the content's canonical JSON (object keys
//! sorted at every level, no whitespace). Storing the same content twice
//! yields the same id and writes nothing the second time. `null` content is
//! the tombstone snapshot.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, EngineResult};
use crate::model::records::Snapshot;
use crate::model::types::SnapshotId;
use crate::storage::keys::Table;
use crate::storage::{StoreRead, Txn};

/// Canonical JSON text of `value`.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// The id `content` would be stored under.
#[must_use]
pub fn snapshot_id(content: &Value) -> SnapshotId {
    let digest = Sha256::digest(canonical_json(content).as_bytes());
    SnapshotId::from_digest_hex(format!("{digest:x}"))
}

/// Id of the tombstone snapshot.
#[must_use]
pub fn tombstone_id() -> SnapshotId {
    snapshot_id(&Value::Null)
}

/// Store `content`, returning its id. Idempotent.
///
/// # Errors
/// Returns an error if the row cannot be written.
pub fn put(tx: &mut Txn<'_>, content: Value) -> EngineResult<SnapshotId> {
    let id = snapshot_id(&content);
    if tx.get_raw(&Table::Snapshot.key(id.as_str()))?.is_none() {
        tx.put_row(
            Table::Snapshot,
            id.as_str(),
            &Snapshot {
                id: id.clone(),
                content,
            },
        )?;
    }
    Ok(id)
}

/// Read the content stored under `id`.
///
/// # Errors
/// Returns [`EngineError::NotFound`] if no such snapshot exists.
pub fn get(reader: &impl StoreRead, id: &SnapshotId) -> EngineResult<Value> {
    reader
        .get_row::<Snapshot>(Table::Snapshot, id.as_str())?
        .map(|s| s.content)
        .ok_or_else(|| EngineError::not_found("snapshot", id))
}
