//! PARTITION step of a merge.
//!
//! Compares the leaves of the common ancestor with the leaves of both heads
//! and sorts every entity key into one of three buckets:
//!
//! - **incoming only**: changed on the incoming side alone → stage as is.
//! - **shared**: changed on both sides to different content → resolve.
//! - everything else (unchanged, changed on the target side only, or
//!   changed identically on both) needs no work.
//!
//! ```text
//! base:     e1=A  e2=X
//! current:  e1=C  e2=X  e3=N
//! incoming: e1=B  e2=Y
//!
//! incoming only: [e2 → Y]
//! shared:        [e1 → (base A, current C, incoming B)]
//! ```
//!
//! Shared entities are grouped by file so a plugin sees every disputed
//! entity of one file in a single call. Keys are processed in order, so the
//! partition is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::records::Change;
use crate::model::types::EntityKey;

/// An entity both sides changed differently.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedEntity {
    pub key: EntityKey,
    pub base: Option<Change>,
    pub current: Change,
    pub incoming: Change,
}

/// Output of [`partition`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartitionResult {
    pub incoming_only: Vec<Change>,
    /// Shared entities by file id.
    pub shared: BTreeMap<String, Vec<SharedEntity>>,
}

impl PartitionResult {
    #[must_use]
    pub fn shared_count(&self) -> usize {
        self.shared.values().map(Vec::len).sum()
    }
}

fn changed(base: Option<&Change>, side: Option<&Change>) -> bool {
    match (base, side) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(b), Some(s)) => b.id != s.id,
    }
}

/// Partition leaf maps (ancestor, target head, incoming head).
#[must_use]
pub fn partition(
    base: &BTreeMap<EntityKey, Change>,
    current: &BTreeMap<EntityKey, Change>,
    incoming: &BTreeMap<EntityKey, Change>,
) -> PartitionResult {
    let keys: BTreeSet<&EntityKey> = current.keys().chain(incoming.keys()).collect();
    let mut result = PartitionResult::default();
    for key in keys {
        let b = base.get(key);
        let c = current.get(key);
        let i = incoming.get(key);
        let current_changed = changed(b, c);
        let incoming_changed = changed(b, i);
        match (current_changed, incoming_changed, c, i) {
            (false, true, _, Some(i)) => result.incoming_only.push(i.clone()),
            (true, true, Some(c), Some(i)) => {
                if c.id == i.id || c.snapshot_id == i.snapshot_id {
                    continue;
                }
                result
                    .shared
                    .entry(key.file_id.clone())
                    .or_default()
                    .push(SharedEntity {
                        key: key.clone(),
                        base: b.cloned(),
                        current: c.clone(),
                        incoming: i.clone(),
                    });
            }
            _ => {}
        }
    }
    result
}
