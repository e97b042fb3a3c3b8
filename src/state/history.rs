//! As-of-commit queries. These bypass the cache and walk history directly,
//! bounded by a depth (the configured default when the caller passes none).

use serde_json::Value;

use super::{EntityState, StateFilter};
use crate::changelog;
use crate::error::EngineResult;
use crate::graph::commit::{self, AncestorQuery};
use crate::graph::change_set;
use crate::model::records::Change;
use crate::model::types::{CommitId, EntityKey};
use crate::snapshot;
use crate::storage::StoreRead;

/// One change of an entity's history.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    /// The commit whose change set holds the change.
    pub commit_id: CommitId,
    pub change: Change,
    /// Snapshot content; `Null` for deletions.
    pub content: Value,
}

fn resolve_depth(reader: &impl StoreRead, depth: Option<usize>) -> usize {
    depth.unwrap_or(reader.env().config.history.default_depth)
}

fn state_of(reader: &impl StoreRead, change: Change) -> EngineResult<Option<EntityState>> {
    let content = snapshot::get(reader, &change.snapshot_id)?;
    if content.is_null() {
        return Ok(None);
    }
    Ok(Some(EntityState {
        key: change.key(),
        content,
        snapshot_id: Some(change.snapshot_id),
        change_id: Some(change.id),
        plugin_key: change.plugin_key,
        schema_version: change.schema_version,
        untracked: false,
        inherited_from: None,
    }))
}

/// State of `key` as of `commit`.
///
/// # Errors
/// Returns [`EngineError::NotFound`](crate::error::EngineError::NotFound) if
/// the commit does not exist.
pub fn state_at(
    reader: &impl StoreRead,
    commit_id: &CommitId,
    key: &EntityKey,
    depth: Option<usize>,
) -> EngineResult<Option<EntityState>> {
    let cs = commit::get_commit(reader, commit_id)?.change_set_id;
    let depth = resolve_depth(reader, depth);
    match changelog::leaf_map_for(reader, &[cs], Some(depth))?.remove(key) {
        Some(change) => state_of(reader, change),
        None => Ok(None),
    }
}

/// Every live entity as of `commit` that matches `filter`, ordered by key.
///
/// # Errors
/// Returns [`EngineError::NotFound`](crate::error::EngineError::NotFound) if
/// the commit does not exist.
pub fn state_at_commit(
    reader: &impl StoreRead,
    commit_id: &CommitId,
    filter: &StateFilter,
    depth: Option<usize>,
) -> EngineResult<Vec<EntityState>> {
    let cs = commit::get_commit(reader, commit_id)?.change_set_id;
    let depth = resolve_depth(reader, depth);
    let mut states = Vec::new();
    for (key, change) in changelog::leaf_map_for(reader, &[cs], Some(depth))? {
        if !filter.matches(&key) {
            continue;
        }
        if let Some(state) = state_of(reader, change)? {
            states.push(state);
        }
    }
    Ok(states)
}

/// Changes to `key` in the history of `commit`, nearest commit first.
///
/// # Errors
/// Returns [`EngineError::NotFound`](crate::error::EngineError::NotFound) if
/// the commit does not exist.
pub fn entity_history(
    reader: &impl StoreRead,
    commit_id: &CommitId,
    key: &EntityKey,
    depth: Option<usize>,
) -> EngineResult<Vec<HistoryEntry>> {
    let query = AncestorQuery {
        depth: Some(resolve_depth(reader, depth)),
        include_self: true,
    };
    let mut entries = Vec::new();
    for ancestor in commit::ancestors_of(reader, commit_id, query)? {
        let mut changes = Vec::new();
        for element in change_set::elements_of(reader, &ancestor.change_set_id)? {
            if &element.key() == key {
                changes.push(changelog::get_change(reader, &element.change_id)?);
            }
        }
        changes.sort_by(|a, b| (&b.created_at, &b.id).cmp(&(&a.created_at, &a.id)));
        for change in changes {
            let content = snapshot::get(reader, &change.snapshot_id)?;
            entries.push(HistoryEntry {
                commit_id: ancestor.id.clone(),
                change,
                content,
            });
        }
    }
    Ok(entries)
}
