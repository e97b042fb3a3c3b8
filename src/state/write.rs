//! Entity writes.

use serde_json::Value;

use super::materialize;
use crate::changelog::{self, NewChange};
use crate::error::EngineResult;
use crate::graph::change_set;
use crate::model::records::{CacheRow, UntrackedRow};
use crate::model::types::{ChangeId, EntityKey, VersionId};
use crate::snapshot;
use crate::storage::keys::{Table, entity_row_id};
use crate::storage::{StoreRead, Txn};
use crate::version;

/// One entity write. `content: Null` deletes.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityWrite {
    pub key: EntityKey,
    pub content: Value,
    pub schema_version: String,
    pub plugin_key: String,
    /// Write outside change control: no change, no history, no sync.
    pub untracked: bool,
}

/// Write one entity into `version`.
///
/// Tracked writes put the snapshot, append a change, place it in the
/// version's working set (replacing an earlier working change for the same
/// key) and update the version's cache row. They also drop any untracked
/// override of the key in this version. Returns the new change id; `None`
/// for untracked writes and for deletes of keys that are not visible.
///
/// # Errors
/// Returns an error if the version does not exist or a row cannot be
/// written.
#[tracing::instrument(skip_all, fields(version = %version, entity = %write.key))]
pub fn write_entity(
    tx: &mut Txn<'_>,
    version: &VersionId,
    write: EntityWrite,
) -> EngineResult<Option<ChangeId>> {
    let row = version::get_version(tx, version)?;
    let row_id = entity_row_id(version.as_str(), &write.key);

    if write.untracked {
        if write.content.is_null() {
            tx.delete_row_unlogged(Table::Untracked, &row_id);
        } else {
            let untracked = UntrackedRow {
                key: write.key,
                content: write.content,
                plugin_key: write.plugin_key,
                schema_version: write.schema_version,
            };
            tx.put_row_unlogged(Table::Untracked, &row_id, &untracked)?;
        }
        return Ok(None);
    }

    if tx.get_raw(&Table::Untracked.key(&row_id))?.is_some() {
        tx.delete_row_unlogged(Table::Untracked, &row_id);
    }
    if write.content.is_null() && materialize::get(tx, version, &write.key)?.is_none() {
        tracing::debug!("delete of an invisible entity ignored");
        return Ok(None);
    }

    let tombstone = write.content.is_null();
    let snapshot_id = snapshot::put(tx, write.content)?;
    let change = changelog::append(
        tx,
        NewChange {
            key: write.key.clone(),
            schema_version: write.schema_version.clone(),
            plugin_key: write.plugin_key.clone(),
            snapshot_id: snapshot_id.clone(),
        },
    )?;

    let working = version::working_change_set(tx, &row)?;
    let previous: Option<CacheRow> = tx.get_row(Table::Cache, &row_id)?;
    if let Some(previous) = previous
        && change_set::contains(tx, &working, &previous.change_id)?
    {
        change_set::remove_element(tx, &working, &previous.change_id)?;
    }
    change_set::add_element(tx, &working, &change)?;

    let cache_row = CacheRow {
        key: write.key,
        change_id: change.id.clone(),
        snapshot_id,
        plugin_key: write.plugin_key,
        schema_version: write.schema_version,
        tombstone,
    };
    tx.put_row_unlogged(Table::Cache, &row_id, &cache_row)?;
    Ok(Some(change.id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use strata_kv::MemoryKv;

    use super::*;
    use crate::context::Env;
    use crate::model::types::SchemaKey;
    use crate::state;

    fn item(id: &str, content: Value, untracked: bool) -> EntityWrite {
        EntityWrite {
            key: EntityKey::new(id, SchemaKey::new("item").unwrap(), "f1").unwrap(),
            content,
            schema_version: "1".to_owned(),
            plugin_key: "test".to_owned(),
            untracked,
        }
    }

    #[test]
    fn rewrites_replace_the_working_element() {
        let kv = MemoryKv::new();
        let env = Env::for_tests("s");
        let mut tx = Txn::new(&kv, &env);
        let main = version::bootstrap(&mut tx, "main").unwrap();
        write_entity(&mut tx, &main.id, item("a", json!(1), false)).unwrap();
        let second = write_entity(&mut tx, &main.id, item("a", json!(2), false))
            .unwrap()
            .unwrap();

        let elements = version::working_elements(&tx, &main).unwrap();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].change_id, second);
        let seen = state::get(&tx, &main.id, &item("a", Value::Null, false).key).unwrap();
        assert_eq!(seen.unwrap().content, json!(2));
    }

    #[test]
    fn untracked_writes_leave_no_history() {
        let kv = MemoryKv::new();
        let env = Env::for_tests("s");
        let mut tx = Txn::new(&kv, &env);
        let main = version::bootstrap(&mut tx, "main").unwrap();
        let id = write_entity(&mut tx, &main.id, item("u", json!("x"), true)).unwrap();
        assert!(id.is_none());
        assert!(version::working_elements(&tx, &main).unwrap().is_empty());
        let seen = state::get(&tx, &main.id, &item("u", Value::Null, true).key)
            .unwrap()
            .unwrap();
        assert!(seen.untracked);
        assert_eq!(seen.content, json!("x"));
    }

    #[test]
    fn tracked_write_replaces_untracked_override() {
        let kv = MemoryKv::new();
        let env = Env::for_tests("s");
        let mut tx = Txn::new(&kv, &env);
        let main = version::bootstrap(&mut tx, "main").unwrap();
        write_entity(&mut tx, &main.id, item("a", json!("local"), true)).unwrap();
        write_entity(&mut tx, &main.id, item("a", json!("tracked"), false)).unwrap();
        let seen = state::get(&tx, &main.id, &item("a", Value::Null, false).key)
            .unwrap()
            .unwrap();
        assert!(!seen.untracked);
        assert_eq!(seen.content, json!("tracked"));
    }

    #[test]
    fn deleting_an_invisible_key_is_a_noop() {
        let kv = MemoryKv::new();
        let env = Env::for_tests("s");
        let mut tx = Txn::new(&kv, &env);
        let main = version::bootstrap(&mut tx, "main").unwrap();
        let pending = tx.pending();
        assert!(write_entity(&mut tx, &main.id, item("ghost", Value::Null, false))
            .unwrap()
            .is_none());
        assert_eq!(tx.pending(), pending);
    }
}
