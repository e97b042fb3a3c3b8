//! Engine error types for strata.
//!
//! Defines [`EngineError`], the unified error type for every engine
//! operation. Each variant carries enough context to say what went wrong and
//! what to do next; the `Display` output ends with a `To fix:` hint.
//!
//! Variants fall into the groups callers care about:
//! - validation (rejected before anything is written),
//! - conflict and consistency (resolve locally, then retry),
//! - transport (retry the same request),
//! - corruption (refuse to operate).

use std::fmt;

use strata_kv::KvError;

use crate::config::ConfigError;
use crate::model::types::{CommitId, ValidationError, VersionId};
use crate::sync::transport::TransportError;

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Unified error type for strata engine operations.
#[derive(Debug)]
pub enum EngineError {
    /// A change set element references a change that was never appended.
    UnknownChange {
        /// The missing change id.
        change_id: String,
    },

    /// A new edge would make the commit graph or version inheritance cyclic.
    CyclicAncestry {
        /// Human-readable description of the cycle.
        detail: String,
    },

    /// A stored schema `(key, version)` was redefined with a different shape.
    SchemaMismatch {
        /// The schema key.
        schema_key: String,
        /// The schema version.
        version: String,
    },

    /// A schema definition is unusable (e.g. its foreign keys form a cycle).
    InvalidSchema {
        /// The schema key.
        schema_key: String,
        /// Why the schema was rejected.
        reason: String,
    },

    /// Two commits share no history.
    NoCommonAncestor {
        /// First commit.
        a: CommitId,
        /// Second commit.
        b: CommitId,
    },

    /// A transition commit between two states would contain no changes.
    EmptyTransition {
        /// Source commit.
        source: CommitId,
        /// Target commit.
        target: CommitId,
    },

    /// The target version has uncommitted changes in its working set.
    UncommittedChanges {
        /// The version with pending changes.
        version: VersionId,
        /// Number of pending working-set elements.
        count: usize,
    },

    /// The target version carries unresolved merge conflicts.
    UnresolvedConflict {
        /// The version with conflicts.
        version: VersionId,
        /// Number of unresolved conflicts.
        count: usize,
    },

    /// A checkpoint was requested with an empty working set.
    NothingToCommit {
        /// The version that was checkpointed.
        version: VersionId,
    },

    /// A referenced row does not exist.
    NotFound {
        /// Kind of row (e.g. `"commit"`, `"version"`).
        kind: &'static str,
        /// The id or name that was looked up.
        id: String,
    },

    /// A version with this name already exists.
    VersionExists {
        /// The duplicate name.
        name: String,
    },

    /// A version cannot be deleted while something still depends on it.
    VersionInUse {
        /// The version.
        version: VersionId,
        /// What depends on it.
        reason: String,
    },

    /// No plugin is registered under this key.
    UnknownPlugin {
        /// The plugin key that was looked up.
        plugin_key: String,
    },

    /// A plugin returned an error.
    Plugin {
        /// The plugin that failed.
        plugin_key: String,
        /// The plugin's message.
        message: String,
    },

    /// A deterministic counter was requested while deterministic mode is off.
    DeterministicModeDisabled,

    /// The store failed an integrity check. The engine refuses to proceed.
    Corrupted {
        /// Description of the inconsistency.
        detail: String,
    },

    /// An identifier failed validation.
    Validation(ValidationError),

    /// A stored or supplied value could not be (de)serialized.
    Serialization {
        /// What was being (de)serialized.
        context: String,
        /// The underlying message.
        message: String,
    },

    /// The key/value store returned an error.
    Storage(KvError),

    /// A configuration file could not be loaded.
    Config(ConfigError),

    /// A sync request failed in transport.
    Transport(TransportError),
}

impl EngineError {
    /// Shorthand for [`EngineError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`EngineError::Serialization`] with a context string.
    pub fn serialization(context: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::Serialization {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// Returns `true` if retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for EngineError {
    #[allow(clippy::too_many_lines)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownChange { change_id } => write!(
                f,
                "change '{change_id}' does not exist.\n  To fix: append the change before adding it to a change set."
            ),
            Self::CyclicAncestry { detail } => write!(
                f,
                "refusing to create a cycle: {detail}.\n  To fix: check the parent ids; history must stay acyclic."
            ),
            Self::SchemaMismatch {
                schema_key,
                version,
            } => write!(
                f,
                "schema '{schema_key}' version '{version}' is already stored with a different definition.\n  To fix: register the changed definition under a new version."
            ),
            Self::InvalidSchema { schema_key, reason } => write!(
                f,
                "schema '{schema_key}' is invalid: {reason}.\n  To fix: correct the schema definition and register it again."
            ),
            Self::NoCommonAncestor { a, b } => write!(
                f,
                "commits '{a}' and '{b}' share no history.\n  To fix: only merge or transition between versions of the same store lineage."
            ),
            Self::EmptyTransition { source, target } => write!(
                f,
                "transition from '{source}' to '{target}' contains no changes.\n  To fix: nothing to do; both commits already describe the same state."
            ),
            Self::UncommittedChanges { version, count } => write!(
                f,
                "version '{version}' has {count} uncommitted change(s).\n  To fix: checkpoint the version before merging into it."
            ),
            Self::UnresolvedConflict { version, count } => write!(
                f,
                "version '{version}' has {count} unresolved conflict(s).\n  To fix: resolve each conflict, checkpoint, then merge again."
            ),
            Self::NothingToCommit { version } => write!(
                f,
                "version '{version}' has no working changes.\n  To fix: write entities before checkpointing."
            ),
            Self::NotFound { kind, id } => write!(
                f,
                "{kind} '{id}' not found.\n  To fix: check the id; it may belong to another store."
            ),
            Self::VersionExists { name } => write!(
                f,
                "version '{name}' already exists.\n  To fix: choose a different name or delete the existing version."
            ),
            Self::VersionInUse { version, reason } => write!(
                f,
                "version '{version}' cannot be deleted: {reason}.\n  To fix: switch away from it or re-parent its dependents first."
            ),
            Self::UnknownPlugin { plugin_key } => write!(
                f,
                "no plugin registered for '{plugin_key}'.\n  To fix: register the plugin with the engine before using it."
            ),
            Self::Plugin {
                plugin_key,
                message,
            } => write!(
                f,
                "plugin '{plugin_key}' failed: {message}.\n  To fix: check the input file; the plugin rejected it."
            ),
            Self::DeterministicModeDisabled => write!(
                f,
                "deterministic mode is disabled.\n  To fix: enable deterministic mode before requesting sequence numbers."
            ),
            Self::Corrupted { detail } => write!(
                f,
                "store is corrupted: {detail}.\n  To fix: restore the store from a known-good blob; the engine will not repair it."
            ),
            Self::Validation(e) => write!(f, "{e}.\n  To fix: pass a well-formed identifier."),
            Self::Serialization { context, message } => {
                write!(f, "failed to (de)serialize {context}: {message}")
            }
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Config(e) => write!(
                f,
                "{e}\n  To fix: correct the configuration file and retry."
            ),
            Self::Transport(e) => {
                write!(f, "sync transport error: {e}")?;
                if e.is_retryable() {
                    write!(f, "\n  To fix: retry; sync requests are idempotent.")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Validation(e) => Some(e),
            Self::Storage(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<KvError> for EngineError {
    fn from(e: KvError) -> Self {
        match e {
            KvError::Corrupted { message } => Self::Corrupted { detail: message },
            other => Self::Storage(other),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<TransportError> for EngineError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization("json", e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    fn commit(s: &str) -> CommitId {
        CommitId::new(s).unwrap()
    }

    #[test]
    fn display_no_common_ancestor() {
        let msg = EngineError::NoCommonAncestor {
            a: commit("c1"),
            b: commit("c2"),
        }
        .to_string();
        assert!(msg.contains("'c1'"));
        assert!(msg.contains("'c2'"));
        assert!(msg.contains("To fix:"));
    }

    #[test]
    fn display_uncommitted_changes() {
        let msg = EngineError::UncommittedChanges {
            version: VersionId::new("main").unwrap(),
            count: 2,
        }
        .to_string();
        assert!(msg.contains("2 uncommitted"));
        assert!(msg.contains("checkpoint"));
    }

    #[test]
    fn display_not_found() {
        let msg = EngineError::not_found("version", "feature").to_string();
        assert!(msg.starts_with("version 'feature' not found"));
    }

    #[test]
    fn kv_corruption_maps_to_corrupted() {
        let err: EngineError = KvError::Corrupted {
            message: "dup".to_owned(),
        }
        .into();
        assert!(matches!(err, EngineError::Corrupted { .. }));
    }

    #[test]
    fn storage_error_has_source() {
        let err: EngineError = KvError::Backend {
            message: "disk".to_owned(),
        }
        .into();
        assert!(err.source().is_some());
        assert!(!err.is_retryable());
    }

    #[test]
    fn transport_retryability_is_forwarded() {
        let err: EngineError = TransportError::Unavailable {
            message: "connection refused".to_owned(),
        }
        .into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("retry"));

        let err: EngineError = TransportError::Rejected {
            status: 400,
            code: "FAILED_TO_INSERT_DATA".to_owned(),
            message: "bad".to_owned(),
        }
        .into();
        assert!(!err.is_retryable());
    }
}
