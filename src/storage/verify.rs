//! Referential integrity checks over the history tables.
//!
//! The engine never writes a dangling reference, so any failure here means
//! the store was modified from outside. [`verify`] reports the first problem
//! as [`EngineError::Corrupted`]; there is no repair.

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;

use super::keys::Table;
use super::StoreRead;
use crate::error::{EngineError, EngineResult};
use crate::model::records::{
    Change, ChangeSet, ChangeSetElement, ChangeSetEdge, Commit, Snapshot, Version,
};

/// Counts of verified rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub snapshots: usize,
    pub changes: usize,
    pub change_sets: usize,
    pub commits: usize,
    pub versions: usize,
}

fn corrupted(detail: String) -> EngineError {
    EngineError::Corrupted { detail }
}

fn rows<T: DeserializeOwned>(reader: &impl StoreRead, table: Table) -> EngineResult<Vec<T>> {
    Ok(reader
        .scan_rows::<T>(table, "")?
        .into_iter()
        .map(|(_, row)| row)
        .collect())
}

/// Check that every reference between history rows resolves.
///
/// # Errors
/// Returns [`EngineError::Corrupted`] describing the first dangling
/// reference or misaddressed snapshot.
pub fn verify(reader: &impl StoreRead) -> EngineResult<VerifyReport> {
    let snapshots: Vec<Snapshot> = rows(reader, Table::Snapshot)?;
    let mut snapshot_ids = BTreeSet::new();
    for snapshot in &snapshots {
        let expected = crate::snapshot::snapshot_id(&snapshot.content);
        if expected != snapshot.id {
            return Err(corrupted(format!(
                "snapshot '{}' does not match its content",
                snapshot.id
            )));
        }
        snapshot_ids.insert(snapshot.id.as_str());
    }

    let changes: Vec<Change> = rows(reader, Table::Change)?;
    let change_ids: BTreeSet<&str> = changes.iter().map(|c| c.id.as_str()).collect();
    for change in &changes {
        if !snapshot_ids.contains(change.snapshot_id.as_str()) {
            return Err(corrupted(format!(
                "change '{}' references missing snapshot '{}'",
                change.id, change.snapshot_id
            )));
        }
    }

    let change_sets: Vec<ChangeSet> = rows(reader, Table::ChangeSet)?;
    let change_set_ids: BTreeSet<&str> = change_sets.iter().map(|c| c.id.as_str()).collect();
    for element in rows::<ChangeSetElement>(reader, Table::ChangeSetElement)? {
        if !change_set_ids.contains(element.change_set_id.as_str()) {
            return Err(corrupted(format!(
                "element of missing change set '{}'",
                element.change_set_id
            )));
        }
        if !change_ids.contains(element.change_id.as_str()) {
            return Err(corrupted(format!(
                "change set '{}' references missing change '{}'",
                element.change_set_id, element.change_id
            )));
        }
    }
    for edge in rows::<ChangeSetEdge>(reader, Table::ChangeSetEdge)? {
        for end in [&edge.parent_id, &edge.child_id] {
            if !change_set_ids.contains(end.as_str()) {
                return Err(corrupted(format!("change set edge references missing '{end}'")));
            }
        }
    }

    let commits: Vec<Commit> = rows(reader, Table::Commit)?;
    let commit_ids: BTreeSet<&str> = commits.iter().map(|c| c.id.as_str()).collect();
    for commit in &commits {
        if !change_set_ids.contains(commit.change_set_id.as_str()) {
            return Err(corrupted(format!(
                "commit '{}' references missing change set '{}'",
                commit.id, commit.change_set_id
            )));
        }
        if let Some(parent) = commit
            .parent_commit_ids
            .iter()
            .find(|p| !commit_ids.contains(p.as_str()))
        {
            return Err(corrupted(format!(
                "commit '{}' references missing parent '{parent}'",
                commit.id
            )));
        }
    }

    let versions: Vec<Version> = rows(reader, Table::Version)?;
    let version_ids: BTreeSet<&str> = versions.iter().map(|v| v.id.as_str()).collect();
    for version in &versions {
        for commit in [&version.commit_id, &version.working_commit_id] {
            if !commit_ids.contains(commit.as_str()) {
                return Err(corrupted(format!(
                    "version '{}' points at missing commit '{commit}'",
                    version.id
                )));
            }
        }
        if let Some(parent) = &version.inherits_from_version_id
            && !version_ids.contains(parent.as_str())
        {
            return Err(corrupted(format!(
                "version '{}' inherits from missing version '{parent}'",
                version.id
            )));
        }
    }

    let report = VerifyReport {
        snapshots: snapshots.len(),
        changes: changes.len(),
        change_sets: change_sets.len(),
        commits: commits.len(),
        versions: versions.len(),
    };
    tracing::debug!(?report, "store verified");
    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use strata_kv::MemoryKv;

    use super::*;
    use crate::context::Env;
    use crate::storage::Txn;
    use crate::version;

    #[test]
    fn bootstrapped_store_verifies() {
        let kv = MemoryKv::new();
        let env = Env::for_tests("s");
        let mut tx = Txn::new(&kv, &env);
        version::bootstrap(&mut tx, "main").unwrap();
        let report = verify(&tx).unwrap();
        assert_eq!(report.versions, 2);
        assert!(report.commits >= 3);
    }

    #[test]
    fn dangling_parent_is_corruption() {
        let kv = MemoryKv::new();
        let env = Env::for_tests("s");
        let mut tx = Txn::new(&kv, &env);
        version::bootstrap(&mut tx, "main").unwrap();
        let (id, mut commit): (String, Commit) =
            tx.scan_rows(Table::Commit, "").unwrap().remove(0);
        commit.parent_commit_ids.push(crate::model::types::CommitId::new("ghost").unwrap());
        tx.put_row_unlogged(Table::Commit, &id, &commit).unwrap();
        let err = verify(&tx).unwrap_err();
        assert!(err.to_string().contains("ghost"), "{err}");
    }
}
