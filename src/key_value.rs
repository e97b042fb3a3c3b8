//! Versioned key/value entries.
//!
//! Key/value pairs are ordinary entities of schema `strata_key_value` in the
//! `strata` system file, so tracked entries are versioned, merged and synced
//! like any other entity. Engine settings (deterministic mode, the sequence
//! counter, the active version, the store id) are untracked entries in the
//! global version and are read here without going through the materializer.

use serde_json::{Value, json};

use crate::error::EngineResult;
use crate::model::records::UntrackedRow;
use crate::model::types::{ChangeId, EntityKey, SchemaKey, VersionId};
use crate::state::{self, EntityWrite};
use crate::storage::keys::{Table, entity_row_id};
use crate::storage::{StoreRead, Txn};
use crate::version::GLOBAL_VERSION_ID;

/// Schema of key/value entities.
pub const KEY_VALUE_SCHEMA: &str = "strata_key_value";
/// File id of engine-owned entities.
pub const SYSTEM_FILE_ID: &str = "strata";
/// Plugin key of engine-owned entities.
pub const SYSTEM_PLUGIN_KEY: &str = "strata_own_entity";
/// Schema version of key/value entities.
pub const KEY_VALUE_SCHEMA_VERSION: &str = "1.0";

pub const DETERMINISTIC_MODE_KEY: &str = "strata_deterministic_mode";
pub const SEQUENCE_NUMBER_KEY: &str = "strata_deterministic_sequence_number";
pub const ACTIVE_VERSION_KEY: &str = "strata_active_version";
pub const STORE_ID_KEY: &str = "strata_id";

/// Entity key of the key/value entry `key`.
///
/// # Errors
/// Returns a validation error if `key` is empty or contains control
/// characters.
pub fn entity_key(key: &str) -> EngineResult<EntityKey> {
    Ok(EntityKey::new(
        key,
        SchemaKey::new(KEY_VALUE_SCHEMA)?,
        SYSTEM_FILE_ID,
    )?)
}

fn entity_content(key: &str, value: &Value) -> Value {
    json!({ "key": key, "value": value })
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Set `key` to `value` in `version`. Returns the change id for tracked
/// writes.
///
/// # Errors
/// Returns an error if the key is invalid or the write fails.
pub fn set(
    tx: &mut Txn<'_>,
    version: &VersionId,
    key: &str,
    value: Value,
    untracked: bool,
) -> EngineResult<Option<ChangeId>> {
    let write = EntityWrite {
        key: entity_key(key)?,
        content: entity_content(key, &value),
        schema_version: KEY_VALUE_SCHEMA_VERSION.to_owned(),
        plugin_key: SYSTEM_PLUGIN_KEY.to_owned(),
        untracked,
    };
    state::write_entity(tx, version, write)
}

/// Read `key` as visible in `version`.
///
/// # Errors
/// Returns an error if the key is invalid or the state cannot be resolved.
pub fn get(reader: &impl StoreRead, version: &VersionId, key: &str) -> EngineResult<Option<Value>> {
    let found = state::get(reader, version, &entity_key(key)?)?;
    Ok(found.and_then(|entity| entity.content.get("value").cloned()))
}

/// Delete `key` in `version`.
///
/// # Errors
/// Returns an error if the key is invalid or the write fails.
pub fn delete(
    tx: &mut Txn<'_>,
    version: &VersionId,
    key: &str,
    untracked: bool,
) -> EngineResult<Option<ChangeId>> {
    let write = EntityWrite {
        key: entity_key(key)?,
        content: Value::Null,
        schema_version: KEY_VALUE_SCHEMA_VERSION.to_owned(),
        plugin_key: SYSTEM_PLUGIN_KEY.to_owned(),
        untracked,
    };
    state::write_entity(tx, version, write)
}

// ---------------------------------------------------------------------------
// Engine settings
// ---------------------------------------------------------------------------

/// Read an untracked setting of the global version.
pub(crate) fn read_setting(reader: &impl StoreRead, key: &str) -> EngineResult<Option<Value>> {
    let row_id = entity_row_id(GLOBAL_VERSION_ID, &entity_key(key)?);
    let row: Option<UntrackedRow> = reader.get_row(Table::Untracked, &row_id)?;
    Ok(row.and_then(|r| r.content.get("value").cloned()))
}

/// Write an untracked setting of the global version.
pub(crate) fn write_setting(tx: &mut Txn<'_>, key: &str, value: Value) -> EngineResult<()> {
    let entity = entity_key(key)?;
    let row_id = entity_row_id(GLOBAL_VERSION_ID, &entity);
    let row = UntrackedRow {
        content: entity_content(key, &value),
        key: entity,
        plugin_key: SYSTEM_PLUGIN_KEY.to_owned(),
        schema_version: KEY_VALUE_SCHEMA_VERSION.to_owned(),
    };
    tx.put_row_unlogged(Table::Untracked, &row_id, &row)
}
