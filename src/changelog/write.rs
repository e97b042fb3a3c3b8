//! Appending changes.

use crate::context;
use crate::error::EngineResult;
use crate::model::records::Change;
use crate::model::types::{ChangeId, EntityKey, ErrorKind, SnapshotId, ValidationError};
use crate::storage::keys::Table;
use crate::storage::Txn;

/// A change about to be appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewChange {
    pub key: EntityKey,
    pub schema_version: String,
    pub plugin_key: String,
    pub snapshot_id: SnapshotId,
}

/// Append one change to the log and return it.
///
/// The change gets a fresh id and timestamp from the engine context. Writing
/// the row appends a mutation log entry for the current session.
///
/// # Errors
/// Returns a validation error if the schema version or plugin key is empty.
#[tracing::instrument(skip_all, fields(entity = %new.key))]
pub fn append(tx: &mut Txn<'_>, new: NewChange) -> EngineResult<Change> {
    if new.schema_version.trim().is_empty() {
        return Err(ValidationError::new(
            ErrorKind::SchemaVersion,
            &new.schema_version,
            "schema version must not be empty",
        )
        .into());
    }
    if new.plugin_key.trim().is_empty() {
        return Err(ValidationError::new(
            ErrorKind::EntityKey,
            &new.plugin_key,
            "plugin key must not be empty",
        )
        .into());
    }

    let id = ChangeId::new(&context::uuid(tx)?)?;
    let created_at = context::timestamp(tx)?;
    let change = Change {
        id,
        entity_id: new.key.entity_id,
        schema_key: new.key.schema_key,
        schema_version: new.schema_version,
        file_id: new.key.file_id,
        plugin_key: new.plugin_key,
        snapshot_id: new.snapshot_id,
        created_at,
    };
    tx.put_row(Table::Change, change.id.as_str(), &change)?;
    tracing::debug!(change = %change.id, "appended change");
    Ok(change)
}
