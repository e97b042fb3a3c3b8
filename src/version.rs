//! Version registry: named, mutable pointers into the commit graph.
//!
//! A version points at a sealed head (`commit_id`) and owns a detached
//! working commit whose change set collects uncommitted changes.
//! [`checkpoint`] seals the working set; [`advance`] moves the head. Neither
//! merges anything: merging is [`crate::merge`]'s job.
//!
//! Versions may inherit from another version. The inheritance relation is a
//! tree rooted at the `global` version; cycles are rejected when an edge is
//! assigned.

use std::collections::HashSet;

use serde_json::Value;

use crate::context;
use crate::error::{EngineError, EngineResult};
use crate::graph::{change_set, commit};
use crate::key_value::{self, ACTIVE_VERSION_KEY, STORE_ID_KEY};
use crate::label::{self, CHECKPOINT_LABEL};
use crate::model::records::{ChangeSetElement, Commit, Version};
use crate::model::types::{ChangeSetId, CommitId, ErrorKind, ValidationError, VersionId};
use crate::state;
use crate::storage::keys::Table;
use crate::storage::{StoreRead, Txn};

/// Id (and name) of the root version every version inherits from by default.
pub const GLOBAL_VERSION_ID: &str = "global";

/// Which version a new version inherits from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Inherit {
    /// The `global` version.
    #[default]
    Global,
    /// A specific version.
    From(VersionId),
    /// No inheritance.
    Nothing,
}

/// Options for [`create_version`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateVersion {
    /// Explicit id; a fresh one is generated otherwise.
    pub id: Option<VersionId>,
    /// Unique name; defaults to the id.
    pub name: Option<String>,
    /// Head commit; defaults to the active version's head.
    pub commit_id: Option<CommitId>,
    pub inherits_from: Inherit,
}

/// Id of the global version.
///
/// # Errors
/// Infallible for the built-in id.
pub fn global_id() -> EngineResult<VersionId> {
    Ok(VersionId::new(GLOBAL_VERSION_ID)?)
}

fn validate_name(name: &str) -> EngineResult<()> {
    if name.trim().is_empty() || name.chars().any(char::is_control) {
        return Err(ValidationError::new(
            ErrorKind::VersionName,
            name,
            "version names must be non-empty and free of control characters",
        )
        .into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Load a version.
///
/// # Errors
/// Returns [`EngineError::NotFound`] if it does not exist.
pub fn get_version(reader: &impl StoreRead, id: &VersionId) -> EngineResult<Version> {
    reader
        .get_row(Table::Version, id.as_str())?
        .ok_or_else(|| EngineError::not_found("version", id))
}

/// Every version, ordered by id.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn list_versions(reader: &impl StoreRead) -> EngineResult<Vec<Version>> {
    Ok(reader
        .scan_rows(Table::Version, "")?
        .into_iter()
        .map(|(_, v)| v)
        .collect())
}

/// Find a version by name.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn version_by_name(reader: &impl StoreRead, name: &str) -> EngineResult<Option<Version>> {
    Ok(list_versions(reader)?.into_iter().find(|v| v.name == name))
}

/// `version` followed by the versions it inherits from, nearest first.
///
/// # Errors
/// Returns [`EngineError::Corrupted`] if stored inheritance is cyclic.
pub fn inheritance_chain(reader: &impl StoreRead, version: &VersionId) -> EngineResult<Vec<Version>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(version.clone());
    while let Some(id) = next {
        if !seen.insert(id.clone()) {
            return Err(EngineError::Corrupted {
                detail: format!("version inheritance cycles through '{id}'"),
            });
        }
        let v = get_version(reader, &id)?;
        next = v.inherits_from_version_id.clone();
        chain.push(v);
    }
    Ok(chain)
}

/// The active version.
///
/// # Errors
/// Returns [`EngineError::NotFound`] if no active version is recorded.
pub fn active_version(reader: &impl StoreRead) -> EngineResult<Version> {
    let id = match key_value::read_setting(reader, ACTIVE_VERSION_KEY)? {
        Some(Value::String(id)) => VersionId::new(&id)?,
        _ => return Err(EngineError::not_found("version", "<active>")),
    };
    get_version(reader, &id)
}

/// The working change set of `version`.
///
/// # Errors
/// Returns an error if the working commit is missing.
pub fn working_change_set(reader: &impl StoreRead, version: &Version) -> EngineResult<ChangeSetId> {
    Ok(commit::get_commit(reader, &version.working_commit_id)?.change_set_id)
}

/// Uncommitted elements of `version`.
///
/// # Errors
/// Returns an error if the working set cannot be read.
pub fn working_elements(reader: &impl StoreRead, version: &Version) -> EngineResult<Vec<ChangeSetElement>> {
    change_set::elements_of(reader, &working_change_set(reader, version)?)
}

// ---------------------------------------------------------------------------
// Mutation
// ---------------------------------------------------------------------------

fn new_working_commit(tx: &mut Txn<'_>) -> EngineResult<Commit> {
    let cs = change_set::create_change_set(tx, &[])?;
    commit::create_commit(tx, &cs.id, &[])
}

/// Create a version with a fresh, empty working set.
///
/// # Errors
/// - [`EngineError::VersionExists`] if the id or name is taken.
/// - [`EngineError::NotFound`] if the commit or parent version is missing.
#[tracing::instrument(skip_all)]
pub fn create_version(tx: &mut Txn<'_>, options: CreateVersion) -> EngineResult<Version> {
    let id = match options.id {
        Some(id) => id,
        None => VersionId::new(&context::uuid(tx)?)?,
    };
    if tx.get_raw(&Table::Version.key(id.as_str()))?.is_some() {
        return Err(EngineError::VersionExists {
            name: id.to_string(),
        });
    }
    let name = options.name.unwrap_or_else(|| id.to_string());
    validate_name(&name)?;
    if version_by_name(tx, &name)?.is_some() {
        return Err(EngineError::VersionExists { name });
    }
    let commit_id = match options.commit_id {
        Some(commit_id) => {
            commit::get_commit(tx, &commit_id)?;
            commit_id
        }
        None => active_version(tx)?.commit_id,
    };
    let inherits_from_version_id = match options.inherits_from {
        Inherit::Global => Some(global_id()?),
        Inherit::From(parent) => Some(parent),
        Inherit::Nothing => None,
    };
    if let Some(parent) = &inherits_from_version_id {
        get_version(tx, parent)?;
    }

    let working = new_working_commit(tx)?;
    let version = Version {
        id,
        name,
        commit_id,
        working_commit_id: working.id,
        inherits_from_version_id,
    };
    tx.put_row(Table::Version, version.id.as_str(), &version)?;
    state::mark_stale(tx, &version.id)?;
    tracing::info!(version = %version.id, name = %version.name, "created version");
    Ok(version)
}

/// Point `version` at `commit`. Marks the version's cached state stale.
///
/// # Errors
/// Returns [`EngineError::NotFound`] if the version or commit is missing.
pub fn advance(tx: &mut Txn<'_>, version: &VersionId, commit_id: &CommitId) -> EngineResult<Version> {
    let mut row = get_version(tx, version)?;
    commit::get_commit(tx, commit_id)?;
    if &row.commit_id == commit_id {
        return Ok(row);
    }
    row.commit_id = commit_id.clone();
    tx.put_row(Table::Version, version.as_str(), &row)?;
    state::mark_stale(tx, version)?;
    tracing::debug!(version = %version, commit = %commit_id, "advanced version");
    Ok(row)
}

/// Change which version `version` inherits from.
///
/// # Errors
/// Returns [`EngineError::CyclicAncestry`] if `version` would inherit from
/// itself, directly or transitively.
pub fn set_inheritance(
    tx: &mut Txn<'_>,
    version: &VersionId,
    parent: Option<&VersionId>,
) -> EngineResult<Version> {
    let mut row = get_version(tx, version)?;
    if let Some(parent) = parent {
        let chain = inheritance_chain(tx, parent)?;
        if chain.iter().any(|v| &v.id == version) {
            return Err(EngineError::CyclicAncestry {
                detail: format!("version '{version}' would inherit from itself through '{parent}'"),
            });
        }
    }
    row.inherits_from_version_id = parent.cloned();
    tx.put_row(Table::Version, version.as_str(), &row)?;
    Ok(row)
}

/// Delete a version pointer. History stays in place.
///
/// # Errors
/// Returns [`EngineError::VersionInUse`] for the global version, the active
/// version, or a version other versions inherit from.
pub fn delete_version(tx: &mut Txn<'_>, version: &VersionId) -> EngineResult<()> {
    get_version(tx, version)?;
    let in_use = |reason: &str| EngineError::VersionInUse {
        version: version.clone(),
        reason: reason.to_owned(),
    };
    if version.as_str() == GLOBAL_VERSION_ID {
        return Err(in_use("it is the root of version inheritance"));
    }
    if &active_version(tx)?.id == version {
        return Err(in_use("it is the active version"));
    }
    if let Some(child) = list_versions(tx)?
        .into_iter()
        .find(|v| v.inherits_from_version_id.as_ref() == Some(version))
    {
        return Err(in_use(&format!("version '{}' inherits from it", child.id)));
    }
    tx.delete_row(Table::Version, version.as_str())?;
    state::drop_version_state(tx, version)?;
    tracing::info!(version = %version, "deleted version");
    Ok(())
}

/// Make `version` the active version.
///
/// # Errors
/// Returns [`EngineError::NotFound`] if it does not exist.
pub fn switch_version(tx: &mut Txn<'_>, version: &VersionId) -> EngineResult<Version> {
    let row = get_version(tx, version)?;
    key_value::write_setting(tx, ACTIVE_VERSION_KEY, Value::String(version.to_string()))?;
    Ok(row)
}

/// Seal the working set of `version` into a commit on top of its head,
/// label it `checkpoint`, advance the version and open a new working set.
///
/// # Errors
/// Returns [`EngineError::NothingToCommit`] if the working set is empty.
#[tracing::instrument(skip_all, fields(version = %version))]
pub fn checkpoint(tx: &mut Txn<'_>, version: &VersionId) -> EngineResult<Commit> {
    let mut row = get_version(tx, version)?;
    let working = working_change_set(tx, &row)?;
    let pending = change_set::elements_of(tx, &working)?.len();
    if pending == 0 {
        return Err(EngineError::NothingToCommit {
            version: version.clone(),
        });
    }
    let sealed = commit::create_commit(tx, &working, std::slice::from_ref(&row.commit_id))?;
    let checkpoint_label = label::create_label(tx, CHECKPOINT_LABEL)?;
    label::attach_label(tx, &working, &checkpoint_label.id)?;
    let next_working = new_working_commit(tx)?;

    // The cached state already includes the working changes, so the cache
    // stays valid across this pointer swap.
    row.commit_id = sealed.id.clone();
    row.working_commit_id = next_working.id;
    tx.put_row(Table::Version, version.as_str(), &row)?;
    tracing::info!(commit = %sealed.id, changes = pending, "checkpointed version");
    Ok(sealed)
}

/// Create the root history and the global and main versions of an empty
/// store. Returns the main version, which is made active.
pub(crate) fn bootstrap(tx: &mut Txn<'_>, main_version_name: &str) -> EngineResult<Version> {
    let root_cs = change_set::create_change_set(tx, &[])?;
    let root = commit::create_commit(tx, &root_cs.id, &[])?;
    label::create_label(tx, CHECKPOINT_LABEL)?;

    create_version(
        tx,
        CreateVersion {
            id: Some(global_id()?),
            name: Some(GLOBAL_VERSION_ID.to_owned()),
            commit_id: Some(root.id.clone()),
            inherits_from: Inherit::Nothing,
        },
    )?;
    let main = create_version(
        tx,
        CreateVersion {
            id: None,
            name: Some(main_version_name.to_owned()),
            commit_id: Some(root.id),
            inherits_from: Inherit::Global,
        },
    )?;
    switch_version(tx, &main.id)?;
    let store_id = context::uuid(tx)?;
    key_value::write_setting(tx, STORE_ID_KEY, Value::String(store_id))?;
    tracing::info!(main = %main.id, "bootstrapped store");
    Ok(main)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use strata_kv::MemoryKv;

    use super::*;
    use crate::context::Env;

    fn boot(tx: &mut Txn<'_>) -> Version {
        bootstrap(tx, "main").unwrap()
    }

    #[test]
    fn bootstrap_creates_global_and_main() {
        let kv = MemoryKv::new();
        let env = Env::for_tests("s");
        let mut tx = Txn::new(&kv, &env);
        let main = boot(&mut tx);
        assert_eq!(active_version(&tx).unwrap(), main);
        let chain = inheritance_chain(&tx, &main.id).unwrap();
        let names: Vec<_> = chain.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["main", "global"]);
        assert!(label::label_by_name(&tx, CHECKPOINT_LABEL).unwrap().is_some());
    }

    #[test]
    fn names_are_unique() {
        let kv = MemoryKv::new();
        let env = Env::for_tests("s");
        let mut tx = Txn::new(&kv, &env);
        boot(&mut tx);
        let err = create_version(
            &mut tx,
            CreateVersion {
                name: Some("main".to_owned()),
                ..CreateVersion::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::VersionExists { .. }));
    }

    #[test]
    fn inheritance_cycles_are_rejected() {
        let kv = MemoryKv::new();
        let env = Env::for_tests("s");
        let mut tx = Txn::new(&kv, &env);
        let main = boot(&mut tx);
        let child = create_version(
            &mut tx,
            CreateVersion {
                name: Some("child".to_owned()),
                inherits_from: Inherit::From(main.id.clone()),
                ..CreateVersion::default()
            },
        )
        .unwrap();
        let err = set_inheritance(&mut tx, &main.id, Some(&child.id)).unwrap_err();
        assert!(matches!(err, EngineError::CyclicAncestry { .. }));
        set_inheritance(&mut tx, &child.id, None).unwrap();
        assert_eq!(inheritance_chain(&tx, &child.id).unwrap().len(), 1);
    }

    #[test]
    fn delete_guards() {
        let kv = MemoryKv::new();
        let env = Env::for_tests("s");
        let mut tx = Txn::new(&kv, &env);
        let main = boot(&mut tx);
        assert!(matches!(
            delete_version(&mut tx, &global_id().unwrap()),
            Err(EngineError::VersionInUse { .. })
        ));
        assert!(matches!(
            delete_version(&mut tx, &main.id),
            Err(EngineError::VersionInUse { .. })
        ));
        let other = create_version(&mut tx, CreateVersion::default()).unwrap();
        let commit_before = commit::get_commit(&tx, &other.commit_id).unwrap();
        delete_version(&mut tx, &other.id).unwrap();
        assert!(get_version(&tx, &other.id).is_err());
        // History is untouched.
        assert_eq!(commit::get_commit(&tx, &other.commit_id).unwrap(), commit_before);
    }

    #[test]
    fn empty_checkpoint_is_refused() {
        let kv = MemoryKv::new();
        let env = Env::for_tests("s");
        let mut tx = Txn::new(&kv, &env);
        let main = boot(&mut tx);
        assert!(matches!(
            checkpoint(&mut tx, &main.id),
            Err(EngineError::NothingToCommit { .. })
        ));
    }

    #[test]
    fn advance_swaps_pointer() {
        let kv = MemoryKv::new();
        let env = Env::for_tests("s");
        let mut tx = Txn::new(&kv, &env);
        let main = boot(&mut tx);
        let cs = change_set::create_change_set(&mut tx, &[]).unwrap();
        let next = commit::create_commit(&mut tx, &cs.id, &[main.commit_id.clone()]).unwrap();
        let moved = advance(&mut tx, &main.id, &next.id).unwrap();
        assert_eq!(moved.commit_id, next.id);
        assert!(state::is_stale(&tx, &main.id).unwrap());
    }
}
