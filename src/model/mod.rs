//! strata data model: identifiers and persisted rows.

pub mod records;
pub mod types;

pub use records::{
    CacheRow, Change, ChangeSet, ChangeSetEdge, ChangeSetElement, ChangeSetLabel, Commit, Label,
    MutationLogEntry, Snapshot, StoredSchema, UntrackedRow, Version,
};
pub use types::{
    ChangeId, ChangeSetId, CommitId, EntityKey, ErrorKind, LabelId, SchemaKey, SessionId,
    SnapshotId, ValidationError, VersionId,
};
