//! Change sets and the edges between them.

use crate::changelog;
use crate::context;
use crate::error::{EngineError, EngineResult};
use crate::graph::walk;
use crate::model::records::{Change, ChangeSet, ChangeSetEdge, ChangeSetElement};
use crate::model::types::{ChangeId, ChangeSetId};
use crate::storage::keys::{Table, row_id, row_prefix};
use crate::storage::{StoreRead, Txn};

/// Load one change set.
///
/// # Errors
/// Returns [`EngineError::NotFound`] if it does not exist.
pub fn get_change_set(reader: &impl StoreRead, id: &ChangeSetId) -> EngineResult<ChangeSet> {
    reader
        .get_row(Table::ChangeSet, id.as_str())?
        .ok_or_else(|| EngineError::not_found("change set", id))
}

/// Create a change set holding `changes`.
///
/// # Errors
/// Returns [`EngineError::UnknownChange`] if any change does not exist.
/// Nothing is written in that case.
pub fn create_change_set(tx: &mut Txn<'_>, changes: &[ChangeId]) -> EngineResult<ChangeSet> {
    let mut loaded = Vec::with_capacity(changes.len());
    for id in changes {
        loaded.push(changelog::get_change(tx, id)?);
    }
    let id = ChangeSetId::new(&context::uuid(tx)?)?;
    let created_at = context::timestamp(tx)?;
    let change_set = ChangeSet { id, created_at };
    tx.put_row(Table::ChangeSet, change_set.id.as_str(), &change_set)?;
    for change in &loaded {
        add_element(tx, &change_set.id, change)?;
    }
    tracing::debug!(change_set = %change_set.id, elements = loaded.len(), "created change set");
    Ok(change_set)
}

/// Add `change` to a change set. Idempotent per `(change_set, change)`.
///
/// # Errors
/// Returns an error if the row cannot be written.
pub fn add_element(tx: &mut Txn<'_>, change_set: &ChangeSetId, change: &Change) -> EngineResult<()> {
    let id = row_id(&[change_set.as_str(), change.id.as_str()]);
    if tx.get_raw(&Table::ChangeSetElement.key(&id))?.is_some() {
        return Ok(());
    }
    let element = ChangeSetElement {
        change_set_id: change_set.clone(),
        change_id: change.id.clone(),
        entity_id: change.entity_id.clone(),
        schema_key: change.schema_key.clone(),
        file_id: change.file_id.clone(),
    };
    tx.put_row(Table::ChangeSetElement, &id, &element)
}

/// Remove `change` from a change set. Only used on open working sets.
///
/// # Errors
/// Returns an error if the log cannot be written.
pub(crate) fn remove_element(
    tx: &mut Txn<'_>,
    change_set: &ChangeSetId,
    change: &ChangeId,
) -> EngineResult<()> {
    let id = row_id(&[change_set.as_str(), change.as_str()]);
    if tx.get_raw(&Table::ChangeSetElement.key(&id))?.is_some() {
        tx.delete_row(Table::ChangeSetElement, &id)?;
    }
    Ok(())
}

/// Whether `change` is an element of `change_set`.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn contains(reader: &impl StoreRead, change_set: &ChangeSetId, change: &ChangeId) -> EngineResult<bool> {
    let id = row_id(&[change_set.as_str(), change.as_str()]);
    Ok(reader.get_raw(&Table::ChangeSetElement.key(&id))?.is_some())
}

/// Every element of a change set.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn elements_of(reader: &impl StoreRead, change_set: &ChangeSetId) -> EngineResult<Vec<ChangeSetElement>> {
    Ok(reader
        .scan_rows(Table::ChangeSetElement, &row_prefix(&[change_set.as_str()]))?
        .into_iter()
        .map(|(_, element)| element)
        .collect())
}

/// Direct parents of a change set.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn parents_of(reader: &impl StoreRead, child: &ChangeSetId) -> EngineResult<Vec<ChangeSetId>> {
    Ok(reader
        .scan_rows::<ChangeSetEdge>(Table::ChangeSetEdge, &row_prefix(&[child.as_str()]))?
        .into_iter()
        .map(|(_, edge)| edge.parent_id)
        .collect())
}

/// Whether `ancestor` is reachable from `descendant` by following parent
/// edges (a change set is its own ancestor).
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn is_ancestor(
    reader: &impl StoreRead,
    ancestor: &ChangeSetId,
    descendant: &ChangeSetId,
) -> EngineResult<bool> {
    let reachable = walk::breadth_first(
        std::slice::from_ref(descendant),
        |id| parents_of(reader, id),
        None,
    )?;
    Ok(reachable.iter().any(|(id, _)| id == ancestor))
}

/// Record `parent → child`.
///
/// # Errors
/// Returns [`EngineError::CyclicAncestry`] for a self edge or when `child`
/// is already an ancestor of `parent`.
pub fn add_edge(tx: &mut Txn<'_>, parent: &ChangeSetId, child: &ChangeSetId) -> EngineResult<()> {
    if parent == child {
        return Err(EngineError::CyclicAncestry {
            detail: format!("change set '{child}' cannot be its own parent"),
        });
    }
    get_change_set(tx, parent)?;
    get_change_set(tx, child)?;
    if is_ancestor(tx, child, parent)? {
        return Err(EngineError::CyclicAncestry {
            detail: format!("change set '{child}' is already an ancestor of '{parent}'"),
        });
    }
    let id = row_id(&[child.as_str(), parent.as_str()]);
    if tx.get_raw(&Table::ChangeSetEdge.key(&id))?.is_none() {
        tx.put_row(
            Table::ChangeSetEdge,
            &id,
            &ChangeSetEdge {
                parent_id: parent.clone(),
                child_id: child.clone(),
            },
        )?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use strata_kv::MemoryKv;

    use super::*;
    use crate::context::Env;

    #[test]
    fn unknown_change_is_rejected_without_writes() {
        let kv = MemoryKv::new();
        let env = Env::for_tests("s");
        let mut tx = Txn::new(&kv, &env);
        let err = create_change_set(&mut tx, &[ChangeId::new("nope").unwrap()]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownChange { .. }));
        assert_eq!(tx.pending(), 0);
    }

    #[test]
    fn edges_reject_self_and_cycles() {
        let kv = MemoryKv::new();
        let env = Env::for_tests("s");
        let mut tx = Txn::new(&kv, &env);
        let a = create_change_set(&mut tx, &[]).unwrap();
        let b = create_change_set(&mut tx, &[]).unwrap();
        let c = create_change_set(&mut tx, &[]).unwrap();

        assert!(matches!(
            add_edge(&mut tx, &a.id, &a.id),
            Err(EngineError::CyclicAncestry { .. })
        ));
        add_edge(&mut tx, &a.id, &b.id).unwrap();
        add_edge(&mut tx, &b.id, &c.id).unwrap();
        assert!(matches!(
            add_edge(&mut tx, &c.id, &a.id),
            Err(EngineError::CyclicAncestry { .. })
        ));
        assert!(is_ancestor(&tx, &a.id, &c.id).unwrap());
        assert!(!is_ancestor(&tx, &c.id, &a.id).unwrap());
        assert_eq!(parents_of(&tx, &c.id).unwrap(), vec![b.id]);
    }
}
