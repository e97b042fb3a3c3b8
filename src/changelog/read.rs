//! Change lookups and leaf-change resolution.

use std::collections::BTreeMap;

use crate::error::{EngineError, EngineResult};
use crate::graph::{change_set, walk};
use crate::model::records::{Change, ChangeSet};
use crate::model::types::{ChangeId, ChangeSetId, EntityKey};
use crate::storage::StoreRead;
use crate::storage::keys::Table;

/// Load one change.
///
/// # Errors
/// Returns [`EngineError::UnknownChange`] if the change does not exist.
pub fn get_change(reader: &impl StoreRead, id: &ChangeId) -> EngineResult<Change> {
    reader
        .get_row(Table::Change, id.as_str())?
        .ok_or_else(|| EngineError::UnknownChange {
            change_id: id.to_string(),
        })
}

/// Whether a change with this id exists.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn change_exists(reader: &impl StoreRead, id: &ChangeId) -> EngineResult<bool> {
    Ok(reader.get_raw(&Table::Change.key(id.as_str()))?.is_some())
}

/// Change sets reachable from `starts` through change-set edges, ordered
/// so that every change set precedes its ancestors (newest first among
/// unrelated ones).
///
/// # Errors
/// Returns an error if a change set or edge cannot be read.
pub fn change_sets_newest_first(
    reader: &impl StoreRead,
    starts: &[ChangeSetId],
    max_depth: Option<usize>,
) -> EngineResult<Vec<ChangeSetId>> {
    let mut start_nodes = Vec::with_capacity(starts.len());
    for id in starts {
        let cs = change_set::get_change_set(reader, id)?;
        start_nodes.push((cs.created_at, cs.id));
    }
    let order = walk::reverse_topological(
        &start_nodes,
        |(_, id)| {
            change_set::parents_of(reader, id)?
                .into_iter()
                .map(|parent| {
                    let ChangeSet { id, created_at } = change_set::get_change_set(reader, &parent)?;
                    Ok((created_at, id))
                })
                .collect()
        },
        max_depth,
    )?;
    Ok(order.into_iter().map(|(_, id)| id).collect())
}

/// For every entity key, the most recent change reachable from the given
/// change sets. Tombstone leaves are included.
///
/// A change set shadows its ancestors. Within one change set the newest
/// change for a key wins.
///
/// # Errors
/// Returns an error if the graph or a referenced change cannot be read.
pub fn leaf_map_for(
    reader: &impl StoreRead,
    change_set_ids: &[ChangeSetId],
    max_depth: Option<usize>,
) -> EngineResult<BTreeMap<EntityKey, Change>> {
    let mut leaves: BTreeMap<EntityKey, Change> = BTreeMap::new();
    for cs in change_sets_newest_first(reader, change_set_ids, max_depth)? {
        let mut local: BTreeMap<EntityKey, Change> = BTreeMap::new();
        for element in change_set::elements_of(reader, &cs)? {
            let key = element.key();
            if leaves.contains_key(&key) {
                continue;
            }
            let change = get_change(reader, &element.change_id)?;
            let newer = local
                .get(&key)
                .is_none_or(|c| (&change.created_at, &change.id) > (&c.created_at, &c.id));
            if newer {
                local.insert(key, change);
            }
        }
        leaves.extend(local);
    }
    Ok(leaves)
}

/// [`leaf_map_for`] as a list ordered by entity key.
///
/// # Errors
/// Same as [`leaf_map_for`].
pub fn leaf_changes_for(
    reader: &impl StoreRead,
    change_set_ids: &[ChangeSetId],
) -> EngineResult<Vec<Change>> {
    Ok(leaf_map_for(reader, change_set_ids, None)?
        .into_values()
        .collect())
}
