//! RESOLVE step of a merge.
//!
//! Hands the shared entities of each file to the plugins that own them,
//! one plugin at a time.
//! Whatever the plugin resolves becomes a new change; everything else is
//! recorded as a [`ConflictRecord`] carrying both sides, never a silent
//! pick.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::partition::SharedEntity;
use crate::error::EngineResult;
use crate::file::plugin::{EntityConflict, MergeFileInput, plugin_failed};
use crate::key_value::SYSTEM_PLUGIN_KEY;
use crate::model::records::Change;
use crate::model::types::{ChangeId, EntityKey};
use crate::snapshot;
use crate::storage::StoreRead;

/// A conflict stored as data in the target version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub key: EntityKey,
    pub base: Option<Value>,
    pub current: Option<Value>,
    pub incoming: Option<Value>,
    pub current_change_id: ChangeId,
    pub incoming_change_id: ChangeId,
    pub plugin_key: String,
    pub schema_version: String,
}

/// A plugin-merged value. `Null` deletes.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedEntity {
    pub key: EntityKey,
    pub content: Value,
    pub plugin_key: String,
    pub schema_version: String,
}

/// Output of [`resolve_file`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolveResult {
    pub resolved: Vec<ResolvedEntity>,
    pub conflicts: Vec<(ConflictRecord, SharedEntity)>,
}

fn content_of(reader: &impl StoreRead, change: Option<&Change>) -> EngineResult<Option<Value>> {
    let Some(change) = change else {
        return Ok(None);
    };
    let content = snapshot::get(reader, &change.snapshot_id)?;
    Ok((!content.is_null()).then_some(content))
}

fn conflict_record(reader: &impl StoreRead, entity: &SharedEntity) -> EngineResult<ConflictRecord> {
    Ok(ConflictRecord {
        key: entity.key.clone(),
        base: content_of(reader, entity.base.as_ref())?,
        current: content_of(reader, Some(&entity.current))?,
        incoming: content_of(reader, Some(&entity.incoming))?,
        current_change_id: entity.current.id.clone(),
        incoming_change_id: entity.incoming.id.clone(),
        plugin_key: entity.current.plugin_key.clone(),
        schema_version: entity.current.schema_version.clone(),
    })
}

/// Resolve the shared entities of one file.
///
/// Each plugin only sees the entities it owns. Engine-owned entities have
/// no merge hook and always conflict.
///
/// # Errors
/// - [`EngineError::UnknownPlugin`](crate::error::EngineError::UnknownPlugin)
///   if an owning plugin is not registered.
/// - [`EngineError::Plugin`](crate::error::EngineError::Plugin) if a merge
///   hook fails.
pub fn resolve_file(
    reader: &impl StoreRead,
    file_id: &str,
    shared: Vec<SharedEntity>,
) -> EngineResult<ResolveResult> {
    let mut by_plugin: BTreeMap<String, Vec<(ConflictRecord, SharedEntity)>> = BTreeMap::new();
    for entity in shared {
        let record = conflict_record(reader, &entity)?;
        by_plugin
            .entry(record.plugin_key.clone())
            .or_default()
            .push((record, entity));
    }

    let mut result = ResolveResult::default();
    for (plugin_key, group) in by_plugin {
        if plugin_key == SYSTEM_PLUGIN_KEY {
            result.conflicts.extend(group);
            continue;
        }
        let settled = resolve_group(reader, file_id, &plugin_key, &group, &mut result.resolved)?;
        result
            .conflicts
            .extend(group.into_iter().filter(|(record, _)| !settled.contains(&record.key)));
    }
    Ok(result)
}

/// Run one plugin's merge hook over its own entities. Returns the keys it
/// settled.
fn resolve_group(
    reader: &impl StoreRead,
    file_id: &str,
    plugin_key: &str,
    group: &[(ConflictRecord, SharedEntity)],
    resolved: &mut Vec<ResolvedEntity>,
) -> EngineResult<BTreeSet<EntityKey>> {
    let plugin = reader.env().plugins.get(plugin_key)?;
    let conflicts: Vec<EntityConflict> = group
        .iter()
        .map(|(r, _)| EntityConflict {
            key: r.key.clone(),
            base: r.base.clone(),
            current: r.current.clone(),
            incoming: r.incoming.clone(),
        })
        .collect();
    let output = plugin
        .merge_file(&MergeFileInput {
            file_id,
            conflicts: &conflicts,
        })
        .map_err(|e| plugin_failed(plugin_key, e))?;

    let mut settled = BTreeSet::new();
    let Some(output) = output else {
        return Ok(settled);
    };
    for (key, content) in output.resolved {
        let Some((record, _)) = group.iter().find(|(r, _)| r.key == key) else {
            tracing::warn!(plugin = %plugin_key, entity = %key, "merge hook resolved an entity it was not given; ignored");
            continue;
        };
        if !settled.insert(key.clone()) {
            continue;
        }
        resolved.push(ResolvedEntity {
            key,
            content,
            plugin_key: record.plugin_key.clone(),
            schema_version: record.schema_version.clone(),
        });
    }
    Ok(settled)
}
