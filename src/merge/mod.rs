//! Three-way merge of one version's history into another.
//!
//! The pipeline is partition → resolve → commit:
//!
//! - **partition**: leaves of the lowest common ancestor against the leaves
//!   of both heads ([`partition`]).
//! - **resolve**: entities changed on both sides go to the owning plugin's
//!   merge hook ([`resolve`]); unresolved ones become conflict entities.
//! - **commit**: one change set with the incoming-only changes, the merged
//!   values, the conflict records and the target's side of every conflict,
//!   committed on top of both heads. The target version then advances to it.
//!
//! Conflicts are data: entities of schema `strata_conflict` in the target
//! version, listed by [`conflicts`] and cleared by [`resolve_conflict`].
//! A target with conflicts or uncommitted changes cannot be merged into.

pub mod partition;
pub mod resolve;

use serde_json::Value;

use crate::changelog::{self, NewChange};
use crate::error::{EngineError, EngineResult};
use crate::graph::{change_set, commit};
use crate::key_value::SYSTEM_PLUGIN_KEY;
use crate::model::records::Commit;
use crate::model::types::{ChangeId, EntityKey, SchemaKey, VersionId};
use crate::snapshot;
use crate::state::{self, EntityWrite, StateFilter};
use crate::storage::{StoreRead, Txn};
use crate::version;

pub use partition::{PartitionResult, SharedEntity};
pub use resolve::{ConflictRecord, ResolvedEntity};

/// Schema of conflict entities.
pub const CONFLICT_SCHEMA: &str = "strata_conflict";
const CONFLICT_SCHEMA_VERSION: &str = "1.0";

/// Result of [`merge`].
#[derive(Clone, Debug, PartialEq)]
pub enum MergeOutcome {
    /// The incoming head is already part of the target's history.
    UpToDate,
    Merged(MergeReport),
}

/// What a merge did.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeReport {
    /// The merge commit; its parents are the target's and incoming heads.
    pub commit: Commit,
    /// Incoming-only changes staged as they are.
    pub applied: Vec<EntityKey>,
    /// Entities merged by a plugin.
    pub resolved: Vec<EntityKey>,
    pub conflicts: Vec<ConflictRecord>,
}

fn conflict_key(key: &EntityKey) -> EngineResult<EntityKey> {
    Ok(EntityKey::new(
        format!("{}:{}", key.schema_key, key.entity_id),
        SchemaKey::new(CONFLICT_SCHEMA)?,
        &key.file_id,
    )?)
}

fn decode_conflict(content: Value) -> EngineResult<ConflictRecord> {
    serde_json::from_value(content).map_err(|e| EngineError::serialization("conflict record", e))
}

/// Unresolved conflicts in `version`, ordered by conflict key.
///
/// # Errors
/// Returns an error if state cannot be resolved or a record is malformed.
pub fn conflicts(reader: &impl StoreRead, version: &VersionId) -> EngineResult<Vec<ConflictRecord>> {
    let filter = StateFilter::schema(SchemaKey::new(CONFLICT_SCHEMA)?);
    state::list(reader, version, &filter)?
        .into_iter()
        .filter(|entity| entity.inherited_from.is_none())
        .map(|entity| decode_conflict(entity.content))
        .collect()
}

/// Merge the head of `incoming` into `target`.
///
/// # Errors
/// - [`EngineError::UncommittedChanges`] if `target` has a non-empty working
///   set.
/// - [`EngineError::UnresolvedConflict`] if `target` has conflicts.
/// - [`EngineError::NoCommonAncestor`] if the histories are unrelated.
/// - Plugin errors from merge hooks.
#[tracing::instrument(skip_all, fields(target = %target, incoming = %incoming))]
pub fn merge(tx: &mut Txn<'_>, target: &VersionId, incoming: &VersionId) -> EngineResult<MergeOutcome> {
    tx.savepoint(|tx| merge_inner(tx, target, incoming))
}

fn merge_inner(tx: &mut Txn<'_>, target: &VersionId, incoming: &VersionId) -> EngineResult<MergeOutcome> {
    let target_row = version::get_version(tx, target)?;
    let incoming_row = version::get_version(tx, incoming)?;

    let pending = version::working_elements(tx, &target_row)?.len();
    if pending > 0 {
        return Err(EngineError::UncommittedChanges {
            version: target.clone(),
            count: pending,
        });
    }
    let open = conflicts(tx, target)?.len();
    if open > 0 {
        return Err(EngineError::UnresolvedConflict {
            version: target.clone(),
            count: open,
        });
    }
    if commit::is_ancestor(tx, &incoming_row.commit_id, &target_row.commit_id)? {
        tracing::info!("already up to date");
        return Ok(MergeOutcome::UpToDate);
    }
    let base = commit::lowest_common_ancestor(tx, &target_row.commit_id, &incoming_row.commit_id)?
        .ok_or_else(|| EngineError::NoCommonAncestor {
            a: target_row.commit_id.clone(),
            b: incoming_row.commit_id.clone(),
        })?;

    // PARTITION
    let base_leaves = changelog::leaf_map_for(tx, &[base.change_set_id.clone()], None)?;
    let current_cs = commit::get_commit(tx, &target_row.commit_id)?.change_set_id;
    let incoming_cs = commit::get_commit(tx, &incoming_row.commit_id)?.change_set_id;
    let current_leaves = changelog::leaf_map_for(tx, &[current_cs], None)?;
    let incoming_leaves = changelog::leaf_map_for(tx, &[incoming_cs], None)?;
    let parts = partition::partition(&base_leaves, &current_leaves, &incoming_leaves);
    tracing::debug!(
        base = %base.id,
        incoming_only = parts.incoming_only.len(),
        shared = parts.shared_count(),
        "partitioned"
    );

    let mut elements: Vec<ChangeId> = Vec::new();
    let applied: Vec<EntityKey> = parts.incoming_only.iter().map(|c| c.key()).collect();
    elements.extend(parts.incoming_only.into_iter().map(|c| c.id));

    // RESOLVE
    let mut resolved = Vec::new();
    let mut records = Vec::new();
    for (file_id, shared) in parts.shared {
        let outcome = resolve::resolve_file(tx, &file_id, shared)?;
        for entity in outcome.resolved {
            let snapshot_id = snapshot::put(tx, entity.content)?;
            let change = changelog::append(
                tx,
                NewChange {
                    key: entity.key.clone(),
                    schema_version: entity.schema_version,
                    plugin_key: entity.plugin_key,
                    snapshot_id,
                },
            )?;
            elements.push(change.id);
            resolved.push(entity.key);
        }
        for (record, shared) in outcome.conflicts {
            let content = serde_json::to_value(&record)
                .map_err(|e| EngineError::serialization("conflict record", e))?;
            let snapshot_id = snapshot::put(tx, content)?;
            let change = changelog::append(
                tx,
                NewChange {
                    key: conflict_key(&record.key)?,
                    schema_version: CONFLICT_SCHEMA_VERSION.to_owned(),
                    plugin_key: SYSTEM_PLUGIN_KEY.to_owned(),
                    snapshot_id,
                },
            )?;
            elements.push(change.id);
            // Keep the target's value visible until the conflict is resolved.
            elements.push(shared.current.id);
            tracing::warn!(entity = %record.key, "merge conflict");
            records.push(record);
        }
    }

    // COMMIT
    let cs = change_set::create_change_set(tx, &elements)?;
    let merged = commit::create_commit(
        tx,
        &cs.id,
        &[target_row.commit_id.clone(), incoming_row.commit_id.clone()],
    )?;
    version::advance(tx, target, &merged.id)?;
    tracing::info!(
        commit = %merged.id,
        applied = applied.len(),
        resolved = resolved.len(),
        conflicts = records.len(),
        "merged"
    );
    Ok(MergeOutcome::Merged(MergeReport {
        commit: merged,
        applied,
        resolved,
        conflicts: records,
    }))
}

/// How to settle a conflict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the target's value.
    Current,
    /// Take the incoming value.
    Incoming,
    /// Write this value; `Null` deletes the entity.
    Value(Value),
}

/// Settle the conflict on `key` in `version`: write the chosen value and
/// delete the conflict record. Both land in the working set.
///
/// # Errors
/// Returns [`EngineError::NotFound`] if `key` has no conflict in `version`.
#[tracing::instrument(skip_all, fields(version = %version, entity = %key))]
pub fn resolve_conflict(
    tx: &mut Txn<'_>,
    version: &VersionId,
    key: &EntityKey,
    resolution: Resolution,
) -> EngineResult<()> {
    let ckey = conflict_key(key)?;
    let entity = state::get(tx, version, &ckey)?
        .ok_or_else(|| EngineError::not_found("conflict", key))?;
    let record = decode_conflict(entity.content)?;
    let content = match resolution {
        Resolution::Current => record.current,
        Resolution::Incoming => record.incoming,
        Resolution::Value(value) => Some(value),
    };
    state::write_entity(
        tx,
        version,
        EntityWrite {
            key: key.clone(),
            content: content.unwrap_or(Value::Null),
            schema_version: record.schema_version,
            plugin_key: record.plugin_key,
            untracked: false,
        },
    )?;
    state::write_entity(
        tx,
        version,
        EntityWrite {
            key: ckey,
            content: Value::Null,
            schema_version: CONFLICT_SCHEMA_VERSION.to_owned(),
            plugin_key: SYSTEM_PLUGIN_KEY.to_owned(),
            untracked: false,
        },
    )?;
    tracing::info!("resolved conflict");
    Ok(())
}
