//! Transition commits: one commit that moves a replica from one state to
//! another.

use crate::changelog::{self, NewChange};
use crate::error::{EngineError, EngineResult};
use crate::graph::{change_set, commit};
use crate::model::records::Commit;
use crate::model::types::{ChangeId, CommitId};
use crate::snapshot;
use crate::storage::Txn;

/// Build a commit whose application turns the state at `source` into the
/// state at `target`.
///
/// The change set holds every leaf of `target` that `source` does not
/// share, plus a tombstone for every live leaf of `source` that `target`
/// lacks. The commit's parents are `[source, target]`.
///
/// # Errors
/// - [`EngineError::NoCommonAncestor`] if the commits share no history.
/// - [`EngineError::EmptyTransition`] if the states already agree.
#[tracing::instrument(skip_all, fields(source = %source, target = %target))]
pub fn create_transition_commit(
    tx: &mut Txn<'_>,
    source: &CommitId,
    target: &CommitId,
) -> EngineResult<Commit> {
    if commit::lowest_common_ancestor(tx, source, target)?.is_none() {
        return Err(EngineError::NoCommonAncestor {
            a: source.clone(),
            b: target.clone(),
        });
    }
    let source_cs = commit::get_commit(tx, source)?.change_set_id;
    let target_cs = commit::get_commit(tx, target)?.change_set_id;
    let source_leaves = changelog::leaf_map_for(tx, &[source_cs], None)?;
    let target_leaves = changelog::leaf_map_for(tx, &[target_cs], None)?;
    let tombstone = snapshot::tombstone_id();

    let mut elements: Vec<ChangeId> = Vec::new();
    for (key, change) in &target_leaves {
        let source_leaf = source_leaves.get(key);
        if source_leaf.is_some_and(|c| c.id == change.id) {
            continue;
        }
        let live_at_source = source_leaf.is_some_and(|c| c.snapshot_id != tombstone);
        if change.snapshot_id == tombstone && !live_at_source {
            continue;
        }
        elements.push(change.id.clone());
    }

    let mut deletions = 0usize;
    for (key, change) in &source_leaves {
        if target_leaves.contains_key(key) || change.snapshot_id == tombstone {
            continue;
        }
        let snapshot_id = snapshot::put(tx, serde_json::Value::Null)?;
        let deleted = changelog::append(
            tx,
            NewChange {
                key: key.clone(),
                schema_version: change.schema_version.clone(),
                plugin_key: change.plugin_key.clone(),
                snapshot_id,
            },
        )?;
        elements.push(deleted.id);
        deletions += 1;
    }

    if elements.is_empty() {
        return Err(EngineError::EmptyTransition {
            source: source.clone(),
            target: target.clone(),
        });
    }
    let cs = change_set::create_change_set(tx, &elements)?;
    let transition = commit::create_commit(tx, &cs.id, &[source.clone(), target.clone()])?;
    tracing::info!(
        commit = %transition.id,
        applied = elements.len() - deletions,
        deleted = deletions,
        "created transition commit"
    );
    Ok(transition)
}
