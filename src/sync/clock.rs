//! Vector clocks: the highest `session_time` seen per writer session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::storage::keys::Table;
use crate::storage::{StoreRead, Txn};

/// Per-session high-water marks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<String, u64>);

impl VectorClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last seen time of `session`; 0 if never seen.
    #[must_use]
    pub fn get(&self, session: &str) -> u64 {
        self.0.get(session).copied().unwrap_or(0)
    }

    /// Raise `session` to at least `time`.
    pub fn observe(&mut self, session: &str, time: u64) {
        let entry = self.0.entry(session.to_owned()).or_insert(0);
        *entry = (*entry).max(time);
    }

    /// Whether an entry `(session, time)` is already covered.
    #[must_use]
    pub fn has_seen(&self, session: &str, time: u64) -> bool {
        self.get(session) >= time
    }

    /// Whether this clock has seen something of `session` that `other`
    /// has not.
    #[must_use]
    pub fn is_ahead_on(&self, other: &Self, session: &str) -> bool {
        self.get(session) > other.get(session)
    }

    /// Pointwise maximum.
    pub fn merge(&mut self, other: &Self) {
        for (session, time) in &other.0 {
            self.observe(session, *time);
        }
    }

    pub fn sessions(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(s, t)| (s.as_str(), *t))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The vector clock of a replica: every session it has log entries from.
///
/// # Errors
/// Returns an error if the session clocks cannot be read.
pub fn local_clock(reader: &impl StoreRead) -> EngineResult<VectorClock> {
    let mut clock = VectorClock::new();
    for (session, time) in reader.scan_rows::<u64>(Table::SessionClock, "")? {
        clock.observe(&session, time);
    }
    Ok(clock)
}

/// Raise the stored clock of `session` to at least `time`.
pub(crate) fn observe_session(tx: &mut Txn<'_>, session: &str, time: u64) -> EngineResult<()> {
    let current = tx.get_row::<u64>(Table::SessionClock, session)?.unwrap_or(0);
    if time > current {
        tx.put_row_unlogged(Table::SessionClock, session, &time)?;
    }
    Ok(())
}
