//! Commits, ancestry queries and lowest common ancestor search.

use std::collections::{HashSet, VecDeque};

use crate::context;
use crate::error::{EngineError, EngineResult};
use crate::graph::{change_set, walk};
use crate::model::records::Commit;
use crate::model::types::{ChangeSetId, CommitId};
use crate::storage::keys::Table;
use crate::storage::{StoreRead, Txn};

/// Options for [`ancestors_of`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AncestorQuery {
    /// Maximum number of parent hops. `None` walks the whole history.
    pub depth: Option<usize>,
    /// Include the starting commit.
    pub include_self: bool,
}

/// Load one commit.
///
/// # Errors
/// Returns [`EngineError::NotFound`] if it does not exist.
pub fn get_commit(reader: &impl StoreRead, id: &CommitId) -> EngineResult<Commit> {
    reader
        .get_row(Table::Commit, id.as_str())?
        .ok_or_else(|| EngineError::not_found("commit", id))
}

/// Create a commit of `change_set` on top of `parents`.
///
/// Each parent's change set becomes a parent of `change_set`, so leaf
/// resolution from the new commit sees the parents' history.
///
/// # Errors
/// - [`EngineError::NotFound`] if the change set or a parent is missing.
/// - [`EngineError::CyclicAncestry`] if a parent is listed twice or the
///   change set is already part of a parent's history.
#[tracing::instrument(skip_all, fields(change_set = %change_set))]
pub fn create_commit(
    tx: &mut Txn<'_>,
    change_set: &ChangeSetId,
    parents: &[CommitId],
) -> EngineResult<Commit> {
    change_set::get_change_set(tx, change_set)?;
    let mut seen = HashSet::new();
    let mut parent_sets = Vec::with_capacity(parents.len());
    for parent in parents {
        if !seen.insert(parent.clone()) {
            return Err(EngineError::CyclicAncestry {
                detail: format!("commit '{parent}' listed twice as a parent"),
            });
        }
        let parent_commit = get_commit(tx, parent)?;
        if change_set::is_ancestor(tx, change_set, &parent_commit.change_set_id)? {
            return Err(EngineError::CyclicAncestry {
                detail: format!(
                    "change set '{change_set}' is already in the history of parent '{parent}'"
                ),
            });
        }
        parent_sets.push(parent_commit.change_set_id);
    }

    let id = CommitId::new(&context::uuid(tx)?)?;
    let created_at = context::timestamp(tx)?;
    let commit = Commit {
        id,
        change_set_id: change_set.clone(),
        parent_commit_ids: parents.to_vec(),
        created_at,
    };
    tx.put_row(Table::Commit, commit.id.as_str(), &commit)?;
    for parent_set in &parent_sets {
        change_set::add_edge(tx, parent_set, change_set)?;
    }
    tracing::debug!(commit = %commit.id, parents = parents.len(), "created commit");
    Ok(commit)
}

/// Ancestors of `commit`, nearest first.
///
/// With `depth: Some(n)` only commits at most `n` parent hops away are
/// returned.
///
/// # Errors
/// Returns [`EngineError::NotFound`] if a commit on the way is missing.
pub fn ancestors_of(
    reader: &impl StoreRead,
    commit: &CommitId,
    query: AncestorQuery,
) -> EngineResult<Vec<Commit>> {
    let walked = walk::breadth_first(
        std::slice::from_ref(commit),
        |id| Ok(get_commit(reader, id)?.parent_commit_ids),
        query.depth,
    )?;
    walked
        .into_iter()
        .filter(|(_, depth)| query.include_self || *depth > 0)
        .map(|(id, _)| get_commit(reader, &id))
        .collect()
}

/// Whether `ancestor` is `descendant` or one of its ancestors.
///
/// # Errors
/// Returns [`EngineError::NotFound`] if a commit on the way is missing.
pub fn is_ancestor(
    reader: &impl StoreRead,
    ancestor: &CommitId,
    descendant: &CommitId,
) -> EngineResult<bool> {
    if ancestor == descendant {
        return Ok(true);
    }
    let walked = walk::breadth_first(
        std::slice::from_ref(descendant),
        |id| Ok(get_commit(reader, id)?.parent_commit_ids),
        None,
    )?;
    Ok(walked.iter().any(|(id, _)| id == ancestor))
}

/// Closest commit shared by the histories of `a` and `b`.
///
/// Both ancestries are walked breadth-first in lock-step, parents in
/// newest-first order; the first commit one walk reaches that the other has
/// already visited is the answer. `None` means the histories are unrelated.
///
/// # Errors
/// Returns [`EngineError::NotFound`] if a commit on the way is missing.
pub fn lowest_common_ancestor(
    reader: &impl StoreRead,
    a: &CommitId,
    b: &CommitId,
) -> EngineResult<Option<Commit>> {
    if a == b {
        return get_commit(reader, a).map(Some);
    }
    let mut sides = [LcaWalk::new(a.clone()), LcaWalk::new(b.clone())];
    loop {
        let mut progressed = false;
        for side in 0..2 {
            let Some(id) = sides[side].queue.pop_front() else {
                continue;
            };
            progressed = true;
            if sides[1 - side].visited.contains(&id) {
                return get_commit(reader, &id).map(Some);
            }
            if !sides[side].visited.insert(id.clone()) {
                continue;
            }
            let commit = get_commit(reader, &id)?;
            let mut parents = Vec::with_capacity(commit.parent_commit_ids.len());
            for parent in &commit.parent_commit_ids {
                parents.push(get_commit(reader, parent)?);
            }
            parents.sort_by(|x, y| (&y.created_at, &y.id).cmp(&(&x.created_at, &x.id)));
            sides[side]
                .queue
                .extend(parents.into_iter().map(|p| p.id));
        }
        if !progressed {
            return Ok(None);
        }
    }
}

struct LcaWalk {
    queue: VecDeque<CommitId>,
    visited: HashSet<CommitId>,
}

impl LcaWalk {
    fn new(start: CommitId) -> Self {
        Self {
            queue: VecDeque::from([start]),
            visited: HashSet::new(),
        }
    }
}
