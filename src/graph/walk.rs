//! Generic DAG walks over stored ids.
//!
//! The graph is never held in memory as linked nodes: callers pass a
//! `parents` closure that loads a node's parent ids from the store, and the
//! walks keep only visited sets and queues.

use std::collections::{BTreeMap, BinaryHeap, HashSet, VecDeque};
use std::hash::Hash;

use crate::error::EngineResult;

/// Breadth-first walk from `starts` towards parents.
///
/// Returns each reachable node once, paired with its distance from the
/// nearest start, in BFS order (starts first at depth 0). Nodes deeper than
/// `max_depth` are not visited. A visited set prevents duplicates when
/// branches converge.
///
/// # Errors
/// Propagates errors from `parents`.
pub fn breadth_first<N, F>(
    starts: &[N],
    mut parents: F,
    max_depth: Option<usize>,
) -> EngineResult<Vec<(N, usize)>>
where
    N: Clone + Eq + Hash,
    F: FnMut(&N) -> EngineResult<Vec<N>>,
{
    let mut result = Vec::new();
    let mut visited: HashSet<N> = HashSet::new();
    let mut queue: VecDeque<(N, usize)> = starts.iter().cloned().map(|n| (n, 0)).collect();

    while let Some((node, depth)) = queue.pop_front() {
        if !visited.insert(node.clone()) {
            continue;
        }
        let at_limit = max_depth.is_some_and(|max| depth >= max);
        if !at_limit {
            for parent in parents(&node)? {
                if !visited.contains(&parent) {
                    queue.push_back((parent, depth + 1));
                }
            }
        }
        result.push((node, depth));
    }
    Ok(result)
}

/// Order the nodes reachable from `starts` so that every node comes before
/// all of its ancestors.
///
/// Among nodes whose descendants have all been emitted, the greatest (by
/// `Ord`) goes first; callers encode "newest first" by making the creation
/// time the leading component of `N`. `max_depth` bounds the walk as in
/// [`breadth_first`].
///
/// # Errors
/// Propagates errors from `parents`.
pub fn reverse_topological<N, F>(
    starts: &[N],
    mut parents: F,
    max_depth: Option<usize>,
) -> EngineResult<Vec<N>>
where
    N: Clone + Ord + Hash,
    F: FnMut(&N) -> EngineResult<Vec<N>>,
{
    let mut parent_lists: BTreeMap<N, Vec<N>> = BTreeMap::new();
    let nodes = breadth_first(
        starts,
        |n| {
            let ps = parents(n)?;
            parent_lists.insert(n.clone(), ps.clone());
            Ok(ps)
        },
        max_depth,
    )?;
    let included: HashSet<&N> = nodes.iter().map(|(n, _)| n).collect();

    // Pending children per node, counted inside the walked subgraph only.
    let mut pending: BTreeMap<&N, usize> = included.iter().map(|n| (*n, 0)).collect();
    for (node, _) in &nodes {
        for parent in parent_lists.get(node).into_iter().flatten() {
            if let Some(count) = pending.get_mut(parent) {
                *count += 1;
            }
        }
    }

    let mut ready: BinaryHeap<&N> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(node) = ready.pop() {
        order.push(node.clone());
        for parent in parent_lists.get(node).into_iter().flatten() {
            if let Some(count) = pending.get_mut(parent) {
                *count -= 1;
                if *count == 0 {
                    if let Some((key, _)) = pending.get_key_value(parent) {
                        ready.push(*key);
                    }
                }
            }
        }
    }
    Ok(order)
}
