//! Reads through the inheritance chain and cache maintenance.

use std::collections::{BTreeMap, BTreeSet};

use super::{EntityState, StateFilter, is_stale, stale_versions};
use crate::changelog;
use crate::error::EngineResult;
use crate::graph::commit;
use crate::model::records::{CacheRow, UntrackedRow, Version};
use crate::model::types::{EntityKey, VersionId};
use crate::snapshot;
use crate::storage::keys::{Table, entity_row_id};
use crate::storage::{StoreRead, Txn};
use crate::version;

// ---------------------------------------------------------------------------
// Tracked state of one version
// ---------------------------------------------------------------------------

/// Compute the tracked state of `version` from history: the leaves of its
/// head, overridden by its working set.
pub(crate) fn compute_tracked(
    reader: &impl StoreRead,
    version: &Version,
) -> EngineResult<BTreeMap<EntityKey, CacheRow>> {
    let head = commit::get_commit(reader, &version.commit_id)?.change_set_id;
    let mut leaves = changelog::leaf_map_for(reader, &[head], None)?;
    let working = version::working_change_set(reader, version)?;
    leaves.extend(changelog::leaf_map_for(reader, &[working], None)?);

    let tombstone = snapshot::tombstone_id();
    Ok(leaves
        .into_iter()
        .map(|(key, change)| {
            let row = CacheRow {
                key: key.clone(),
                tombstone: change.snapshot_id == tombstone,
                change_id: change.id,
                snapshot_id: change.snapshot_id,
                plugin_key: change.plugin_key,
                schema_version: change.schema_version,
            };
            (key, row)
        })
        .collect())
}

/// The tracked row of `key` at one level of the chain, tombstones included.
fn tracked_row(
    reader: &impl StoreRead,
    version: &Version,
    key: &EntityKey,
) -> EngineResult<Option<CacheRow>> {
    if is_stale(reader, &version.id)? {
        return Ok(compute_tracked(reader, version)?.remove(key));
    }
    reader.get_row(Table::Cache, &entity_row_id(version.id.as_str(), key))
}

/// Every tracked row of one level matching `filter`, tombstones included.
fn tracked_rows(
    reader: &impl StoreRead,
    version: &Version,
    filter: &StateFilter,
) -> EngineResult<Vec<CacheRow>> {
    let rows: Vec<CacheRow> = if is_stale(reader, &version.id)? {
        compute_tracked(reader, version)?.into_values().collect()
    } else {
        reader
            .scan_rows::<CacheRow>(Table::Cache, &filter.row_prefix(&version.id))?
            .into_iter()
            .map(|(_, row)| row)
            .collect()
    };
    Ok(rows.into_iter().filter(|row| filter.matches(&row.key)).collect())
}

fn untracked_rows(
    reader: &impl StoreRead,
    version: &Version,
    filter: &StateFilter,
) -> EngineResult<Vec<UntrackedRow>> {
    Ok(reader
        .scan_rows::<UntrackedRow>(Table::Untracked, &filter.row_prefix(&version.id))?
        .into_iter()
        .map(|(_, row)| row)
        .filter(|row| filter.matches(&row.key))
        .collect())
}

fn inherited_from(chain_start: &VersionId, level: &Version) -> Option<VersionId> {
    (chain_start != &level.id).then(|| level.id.clone())
}

fn untracked_state(row: UntrackedRow, inherited_from: Option<VersionId>) -> EntityState {
    EntityState {
        key: row.key,
        content: row.content,
        snapshot_id: None,
        change_id: None,
        plugin_key: row.plugin_key,
        schema_version: row.schema_version,
        untracked: true,
        inherited_from,
    }
}

fn tracked_state(
    reader: &impl StoreRead,
    row: CacheRow,
    inherited_from: Option<VersionId>,
) -> EngineResult<EntityState> {
    let content = snapshot::get(reader, &row.snapshot_id)?;
    Ok(EntityState {
        key: row.key,
        content,
        snapshot_id: Some(row.snapshot_id),
        change_id: Some(row.change_id),
        plugin_key: row.plugin_key,
        schema_version: row.schema_version,
        untracked: false,
        inherited_from,
    })
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// The effective state of `key` in `version`.
///
/// Resolution order: the version's own untracked override, then tracked
/// state walking up the inheritance chain (the nearest tombstone masks
/// everything above it), then inherited untracked overrides.
///
/// # Errors
/// Returns [`EngineError::NotFound`](crate::error::EngineError::NotFound) if
/// the version does not exist.
pub fn get(
    reader: &impl StoreRead,
    version: &VersionId,
    key: &EntityKey,
) -> EngineResult<Option<EntityState>> {
    let chain = version::inheritance_chain(reader, version)?;
    let Some((own, ancestors)) = chain.split_first() else {
        return Ok(None);
    };
    let untracked = |level: &Version| -> EngineResult<Option<UntrackedRow>> {
        reader.get_row(Table::Untracked, &entity_row_id(level.id.as_str(), key))
    };

    if let Some(row) = untracked(own)? {
        return Ok(Some(untracked_state(row, None)));
    }
    for level in &chain {
        if let Some(row) = tracked_row(reader, level, key)? {
            if row.tombstone {
                return Ok(None);
            }
            return tracked_state(reader, row, inherited_from(version, level)).map(Some);
        }
    }
    for level in ancestors {
        if let Some(row) = untracked(level)? {
            return Ok(Some(untracked_state(row, inherited_from(version, level))));
        }
    }
    Ok(None)
}

/// Every entity visible in `version` that matches `filter`, ordered by
/// entity key. Each key resolves as in [`get`].
///
/// # Errors
/// Returns [`EngineError::NotFound`](crate::error::EngineError::NotFound) if
/// the version does not exist.
pub fn list(
    reader: &impl StoreRead,
    version: &VersionId,
    filter: &StateFilter,
) -> EngineResult<Vec<EntityState>> {
    let chain = version::inheritance_chain(reader, version)?;
    let Some((own, ancestors)) = chain.split_first() else {
        return Ok(Vec::new());
    };
    let mut decided: BTreeSet<EntityKey> = BTreeSet::new();
    let mut visible: BTreeMap<EntityKey, EntityState> = BTreeMap::new();

    for row in untracked_rows(reader, own, filter)? {
        decided.insert(row.key.clone());
        visible.insert(row.key.clone(), untracked_state(row, None));
    }
    for level in &chain {
        let from = inherited_from(version, level);
        for row in tracked_rows(reader, level, filter)? {
            if !decided.insert(row.key.clone()) || row.tombstone {
                continue;
            }
            visible.insert(row.key.clone(), tracked_state(reader, row, from.clone())?);
        }
    }
    for level in ancestors {
        let from = inherited_from(version, level);
        for row in untracked_rows(reader, level, filter)? {
            if decided.insert(row.key.clone()) {
                visible.insert(row.key.clone(), untracked_state(row, from.clone()));
            }
        }
    }
    Ok(visible.into_values().collect())
}

// ---------------------------------------------------------------------------
// Cache maintenance
// ---------------------------------------------------------------------------

/// Rebuild the cache of `version` from history and clear its stale flag.
///
/// # Errors
/// Returns an error if history cannot be read.
#[tracing::instrument(skip_all, fields(version = %version))]
pub fn refresh(tx: &mut Txn<'_>, version: &VersionId) -> EngineResult<()> {
    let row = version::get_version(tx, version)?;
    let tracked = compute_tracked(tx, &row)?;
    let prefix = StateFilter::default().row_prefix(version);
    let existing: Vec<Vec<u8>> = tx
        .scan_raw(&Table::Cache.key_prefix(&prefix))?
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    for key in existing {
        tx.delete_raw(key);
    }
    let rows = tracked.len();
    for (key, cache_row) in tracked {
        tx.put_row_unlogged(Table::Cache, &entity_row_id(version.as_str(), &key), &cache_row)?;
    }
    tx.delete_row_unlogged(Table::Stale, version.as_str());
    tracing::debug!(rows, "rebuilt version cache");
    Ok(())
}

/// Rebuild every stale cache. Run before a transaction commits so committed
/// state never carries a stale flag for long.
///
/// # Errors
/// Returns an error if history cannot be read.
pub fn refresh_stale_all(tx: &mut Txn<'_>) -> EngineResult<()> {
    for version in stale_versions(tx)? {
        if tx.get_raw(&Table::Version.key(version.as_str()))?.is_none() {
            tx.delete_row_unlogged(Table::Stale, version.as_str());
            continue;
        }
        refresh(tx, &version)?;
    }
    Ok(())
}
