//! Key layout for strata's tables inside a [`KvStore`](strata_kv::KvStore).
//!
//! # Layout
//!
//! ```text
//! t/<table>/<row_id>
//!
//! synced (exchanged by sync, logged in the mutation log):
//!   snapshot/<snapshot_id>
//!   change/<change_id>
//!   change_set/<change_set_id>
//!   change_set_element/<change_set_id>/<change_id>
//!   change_set_edge/<child_id>/<parent_id>
//!   commit/<commit_id>
//!   version/<version_id>
//!   label/<label_id>
//!   change_set_label/<change_set_id>/<label_id>
//!   stored_schema/<schema_key>/<version>
//!
//! local (never leave the replica):
//!   mutation_log/<session>/<session_time:020>
//!   mutation_head/<table>/<row_id>      ← latest log entry per row
//!   session_clock/<session>             ← vector clock component
//!   clock_floor/hlc                     ← highest wall clock seen
//!   untracked/<version>/<file>/<schema>/<entity>
//!   cache/<version>/<file>/<schema>/<entity>
//!   stale/<version>
//! ```
//!
//! Row-id components are escaped (`%` → `%25`, `/` → `%2F`) so that a
//! composite row id always splits back into the same components and prefix
//! scans never match a longer component by accident.

use std::borrow::Cow;
use std::fmt;

use crate::model::types::EntityKey;

/// Prefix shared by every table key.
pub const TABLE_PREFIX: &str = "t/";

/// Row id of the single hybrid-logical-clock floor row.
pub const CLOCK_FLOOR_ROW: &str = "hlc";

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Every table the engine stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Snapshot,
    Change,
    ChangeSet,
    ChangeSetElement,
    ChangeSetEdge,
    Commit,
    Version,
    Label,
    ChangeSetLabel,
    StoredSchema,
    MutationLog,
    MutationHead,
    SessionClock,
    ClockFloor,
    Untracked,
    Cache,
    Stale,
}

impl Table {
    /// Tables whose rows are exchanged by sync, in dependency order
    /// (referenced rows before referencing rows).
    pub const SYNCED: [Self; 10] = [
        Self::Snapshot,
        Self::Change,
        Self::ChangeSet,
        Self::ChangeSetElement,
        Self::ChangeSetEdge,
        Self::Commit,
        Self::Version,
        Self::Label,
        Self::ChangeSetLabel,
        Self::StoredSchema,
    ];

    /// The table's name as used in keys and on the wire.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Change => "change",
            Self::ChangeSet => "change_set",
            Self::ChangeSetElement => "change_set_element",
            Self::ChangeSetEdge => "change_set_edge",
            Self::Commit => "commit",
            Self::Version => "version",
            Self::Label => "label",
            Self::ChangeSetLabel => "change_set_label",
            Self::StoredSchema => "stored_schema",
            Self::MutationLog => "mutation_log",
            Self::MutationHead => "mutation_head",
            Self::SessionClock => "session_clock",
            Self::ClockFloor => "clock_floor",
            Self::Untracked => "untracked",
            Self::Cache => "cache",
            Self::Stale => "stale",
        }
    }

    /// Look a synced table up by its wire name.
    #[must_use]
    pub fn synced_from_name(name: &str) -> Option<Self> {
        Self::SYNCED.into_iter().find(|t| t.name() == name)
    }

    /// Whether writes to this table are logged and synced.
    #[must_use]
    pub const fn is_synced(self) -> bool {
        matches!(
            self,
            Self::Snapshot
                | Self::Change
                | Self::ChangeSet
                | Self::ChangeSetElement
                | Self::ChangeSetEdge
                | Self::Commit
                | Self::Version
                | Self::Label
                | Self::ChangeSetLabel
                | Self::StoredSchema
        )
    }

    /// `t/<table>/`.
    #[must_use]
    pub fn prefix(self) -> Vec<u8> {
        format!("{TABLE_PREFIX}{}/", self.name()).into_bytes()
    }

    /// Full key of a row.
    #[must_use]
    pub fn key(self, row_id: &str) -> Vec<u8> {
        format!("{TABLE_PREFIX}{}/{row_id}", self.name()).into_bytes()
    }

    /// Key prefix of every row whose id starts with `row_id_prefix`.
    #[must_use]
    pub fn key_prefix(self, row_id_prefix: &str) -> Vec<u8> {
        self.key(row_id_prefix)
    }

    /// Recover the row id from a key of this table.
    #[must_use]
    pub fn row_id_of(self, key: &[u8]) -> Option<String> {
        let prefix = self.prefix();
        let rest = key.strip_prefix(prefix.as_slice())?;
        String::from_utf8(rest.to_vec()).ok()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Row ids
// ---------------------------------------------------------------------------

/// Escape one row-id component.
#[must_use]
pub fn escape(component: &str) -> Cow<'_, str> {
    if component.contains(['%', '/']) {
        Cow::Owned(component.replace('%', "%25").replace('/', "%2F"))
    } else {
        Cow::Borrowed(component)
    }
}

/// Reverse [`escape`].
#[must_use]
pub fn unescape(component: &str) -> Cow<'_, str> {
    if component.contains('%') {
        Cow::Owned(component.replace("%2F", "/").replace("%25", "%"))
    } else {
        Cow::Borrowed(component)
    }
}

/// Join components into a composite row id.
#[must_use]
pub fn row_id(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| escape(p))
        .collect::<Vec<_>>()
        .join("/")
}

/// Prefix matching every composite row id that starts with `parts`.
#[must_use]
pub fn row_prefix(parts: &[&str]) -> String {
    let mut id = row_id(parts);
    id.push('/');
    id
}

/// Split a composite row id into its unescaped components.
#[must_use]
pub fn split_row_id(row_id: &str) -> Vec<String> {
    row_id.split('/').map(|p| unescape(p).into_owned()).collect()
}

/// Row id of an entity in a per-version table (`untracked`, `cache`).
#[must_use]
pub fn entity_row_id(version_id: &str, key: &EntityKey) -> String {
    row_id(&[
        version_id,
        &key.file_id,
        key.schema_key.as_str(),
        &key.entity_id,
    ])
}

/// Row id of a mutation log entry. The session time is zero-padded so rows
/// of one session sort by time.
#[must_use]
pub fn mutation_row_id(session: &str, session_time: u64) -> String {
    format!("{}/{session_time:020}", escape(session))
}

/// Row id of a mutation head: the synced row it describes.
#[must_use]
pub fn mutation_head_row_id(table: Table, row_id: &str) -> String {
    format!("{}/{}", table.name(), escape(row_id))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::types::SchemaKey;

    #[test]
    fn key_layout() {
        assert_eq!(Table::Commit.key("c1"), b"t/commit/c1".to_vec());
        assert_eq!(Table::Commit.prefix(), b"t/commit/".to_vec());
        assert_eq!(
            Table::Commit.row_id_of(b"t/commit/c1").as_deref(),
            Some("c1")
        );
        assert_eq!(Table::Change.row_id_of(b"t/commit/c1"), None);
    }

    #[test]
    fn escape_round_trips() {
        for s in ["plain", "a/b", "50%", "%2F", "/%/"] {
            assert_eq!(unescape(&escape(s)), s);
        }
    }

    #[test]
    fn composite_ids_split_back() {
        let id = row_id(&["cs/1", "ch%2"]);
        assert_eq!(split_row_id(&id), vec!["cs/1", "ch%2"]);
    }

    #[test]
    fn row_prefix_does_not_match_longer_component() {
        let prefix = row_prefix(&["v1"]);
        assert!(row_id(&["v1", "x"]).starts_with(&prefix));
        assert!(!row_id(&["v10", "x"]).starts_with(&prefix));
    }

    #[test]
    fn entity_row_ids_group_by_file() {
        let key = EntityKey::new("e/1", SchemaKey::new("item").unwrap(), "f").unwrap();
        let id = entity_row_id("main", &key);
        assert!(id.starts_with(&row_prefix(&["main", "f"])));
        assert_eq!(split_row_id(&id), vec!["main", "f", "item", "e/1"]);
    }

    #[test]
    fn mutation_rows_sort_by_time() {
        assert!(mutation_row_id("s", 9) < mutation_row_id("s", 10));
    }

    #[test]
    fn synced_tables_resolve_by_name() {
        for table in Table::SYNCED {
            assert!(table.is_synced());
            assert_eq!(Table::synced_from_name(table.name()), Some(table));
        }
        assert_eq!(Table::synced_from_name("cache"), None);
        assert!(!Table::MutationLog.is_synced());
    }
}
