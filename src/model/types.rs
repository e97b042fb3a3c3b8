//! Core identifier types for strata.
//!
//! Foundation types used throughout the engine: snapshot ids (content
//! hashes), opaque row ids for changes, change sets, commits, versions and
//! labels, schema keys, and the logical [`EntityKey`] every change mutates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// Which identifier failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A [`SnapshotId`].
    SnapshotId,
    /// An opaque row id ([`ChangeId`], [`CommitId`], ...).
    RowId,
    /// A [`SchemaKey`].
    SchemaKey,
    /// A schema version string.
    SchemaVersion,
    /// A component of an [`EntityKey`].
    EntityKey,
    /// A version name.
    VersionName,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SnapshotId => write!(f, "snapshot id"),
            Self::RowId => write!(f, "id"),
            Self::SchemaKey => write!(f, "schema key"),
            Self::SchemaVersion => write!(f, "schema version"),
            Self::EntityKey => write!(f, "entity key"),
            Self::VersionName => write!(f, "version name"),
        }
    }
}

/// An identifier or name failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// What was being validated.
    pub kind: ErrorKind,
    /// The rejected value.
    pub value: String,
    /// Why it was rejected.
    pub reason: String,
}

impl ValidationError {
    pub(crate) fn new(kind: ErrorKind, value: &str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.to_owned(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} '{}': {}", self.kind, self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// SnapshotId
// ---------------------------------------------------------------------------

/// A validated 64-character lowercase hex SHA-256 digest identifying a
/// snapshot's content.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotId(String);

impl SnapshotId {
    /// Length of the hex digest.
    pub const LEN: usize = 64;

    /// Create a `SnapshotId` from a hex string, validating format.
    ///
    /// # Errors
    /// Returns an error if the string is not exactly 64 lowercase hex characters.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Wrap a freshly computed SHA-256 hex digest.
    pub(crate) const fn from_digest_hex(hex: String) -> Self {
        Self(hex)
    }

    /// Return the inner hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        if s.len() != Self::LEN {
            return Err(ValidationError::new(
                ErrorKind::SnapshotId,
                s,
                format!("expected {} hex characters, got {}", Self::LEN, s.len()),
            ));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(ValidationError::new(
                ErrorKind::SnapshotId,
                s,
                "must contain only lowercase hex characters (0-9, a-f)",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SnapshotId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SnapshotId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<SnapshotId> for String {
    fn from(id: SnapshotId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// Opaque row ids
// ---------------------------------------------------------------------------

fn validate_row_id(s: &str) -> Result<(), ValidationError> {
    if s.is_empty() {
        return Err(ValidationError::new(ErrorKind::RowId, s, "must not be empty"));
    }
    if s.len() > 128 {
        return Err(ValidationError::new(
            ErrorKind::RowId,
            s,
            format!("must be at most 128 characters, got {}", s.len()),
        ));
    }
    if s.chars().any(char::is_control) {
        return Err(ValidationError::new(
            ErrorKind::RowId,
            s,
            "must not contain control characters",
        ));
    }
    Ok(())
}

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create an id from a string, validating format.
            ///
            /// # Errors
            /// Returns an error if the string is empty, longer than 128
            /// characters, or contains control characters.
            pub fn new(s: &str) -> Result<Self, ValidationError> {
                validate_row_id(s)?;
                Ok(Self(s.to_owned()))
            }

            /// Return the inner string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                validate_row_id(&s)?;
                Ok(Self(s))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

row_id!(
    /// Identity of one [`Change`](crate::model::records::Change).
    ChangeId
);
row_id!(
    /// Identity of one [`ChangeSet`](crate::model::records::ChangeSet).
    ChangeSetId
);
row_id!(
    /// Identity of one [`Commit`](crate::model::records::Commit).
    CommitId
);
row_id!(
    /// Identity of one [`Version`](crate::model::records::Version).
    VersionId
);
row_id!(
    /// Identity of one [`Label`](crate::model::records::Label).
    LabelId
);
row_id!(
    /// Identity of a writer session in the mutation log.
    SessionId
);

// ---------------------------------------------------------------------------
// SchemaKey
// ---------------------------------------------------------------------------

/// A validated schema key: lowercase ASCII letters, digits and underscores,
/// starting with a letter, 1–64 characters. Examples: `strata_key_value`,
/// `markdown_paragraph`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaKey(String);

impl SchemaKey {
    /// The maximum length of a schema key.
    pub const MAX_LEN: usize = 64;

    /// Create a new `SchemaKey`, validating format.
    ///
    /// # Errors
    /// Returns an error if the key is empty, too long, or contains characters
    /// other than `[a-z0-9_]`.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        if s.is_empty() {
            return Err(ValidationError::new(
                ErrorKind::SchemaKey,
                s,
                "schema key must not be empty",
            ));
        }
        if s.len() > Self::MAX_LEN {
            return Err(ValidationError::new(
                ErrorKind::SchemaKey,
                s,
                format!(
                    "schema key must be at most {} characters, got {}",
                    Self::MAX_LEN,
                    s.len()
                ),
            ));
        }
        if !s.starts_with(|c: char| c.is_ascii_lowercase()) {
            return Err(ValidationError::new(
                ErrorKind::SchemaKey,
                s,
                "schema key must start with a lowercase letter",
            ));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(ValidationError::new(
                ErrorKind::SchemaKey,
                s,
                "schema key must contain only lowercase letters (a-z), digits (0-9), and underscores (_)",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SchemaKey {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SchemaKey {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<SchemaKey> for String {
    fn from(key: SchemaKey) -> Self {
        key.0
    }
}

// ---------------------------------------------------------------------------
// EntityKey
// ---------------------------------------------------------------------------

/// The logical row a change mutates: `(entity_id, schema_key, file_id)`.
///
/// Ordering is `(file_id, entity_id, schema_key)` so that iterating a sorted
/// collection groups entities by file, which is how the merge engine and the
/// file materializer consume them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Entity identity, stable across edits (assigned by the codec).
    pub entity_id: String,
    /// The schema the entity conforms to.
    pub schema_key: SchemaKey,
    /// The file (or logical container) the entity belongs to.
    pub file_id: String,
}

impl EntityKey {
    /// Create a key, validating that `entity_id` and `file_id` are non-empty.
    ///
    /// # Errors
    /// Returns an error if a component is empty or contains control characters.
    pub fn new(
        entity_id: impl Into<String>,
        schema_key: SchemaKey,
        file_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let entity_id = entity_id.into();
        let file_id = file_id.into();
        for component in [&entity_id, &file_id] {
            if component.is_empty() {
                return Err(ValidationError::new(
                    ErrorKind::EntityKey,
                    component,
                    "entity id and file id must not be empty",
                ));
            }
            if component.chars().any(char::is_control) {
                return Err(ValidationError::new(
                    ErrorKind::EntityKey,
                    component,
                    "must not contain control characters",
                ));
            }
        }
        Ok(Self {
            entity_id,
            schema_key,
            file_id,
        })
    }
}

impl PartialOrd for EntityKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntityKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.file_id
            .cmp(&other.file_id)
            .then_with(|| self.entity_id.cmp(&other.entity_id))
            .then_with(|| self.schema_key.cmp(&other.schema_key))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file_id, self.schema_key, self.entity_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_id_requires_64_lowercase_hex() {
        assert!(SnapshotId::new(&"a".repeat(64)).is_ok());
        assert!(SnapshotId::new(&"a".repeat(63)).is_err());
        assert!(SnapshotId::new(&"A".repeat(64)).is_err());
        let err = SnapshotId::new(&"g".repeat(64)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SnapshotId);
    }

    #[test]
    fn snapshot_id_serde_validates() {
        let bad: Result<SnapshotId, _> = serde_json::from_str("\"xyz\"");
        assert!(bad.is_err());
        let good: SnapshotId = serde_json::from_str(&format!("\"{}\"", "0".repeat(64))).unwrap();
        assert_eq!(good.as_str(), "0".repeat(64));
    }

    #[test]
    fn row_ids_reject_empty_and_control_chars() {
        assert!(ChangeId::new("").is_err());
        assert!(CommitId::new("a\nb").is_err());
        assert!(VersionId::new(&"x".repeat(129)).is_err());
        assert_eq!(VersionId::new("global").unwrap().to_string(), "global");
    }

    #[test]
    fn schema_key_rules() {
        assert!(SchemaKey::new("strata_key_value").is_ok());
        assert!(SchemaKey::new("p2").is_ok());
        assert!(SchemaKey::new("").is_err());
        assert!(SchemaKey::new("9lives").is_err());
        assert!(SchemaKey::new("Upper").is_err());
        assert!(SchemaKey::new("with-dash").is_err());
        assert!(SchemaKey::new(&"a".repeat(65)).is_err());
    }

    #[test]
    fn entity_key_orders_by_file_then_entity() {
        let s = SchemaKey::new("item").unwrap();
        let a = EntityKey::new("z", s.clone(), "file-a").unwrap();
        let b = EntityKey::new("a", s, "file-b").unwrap();
        assert!(a < b);
    }

    #[test]
    fn entity_key_rejects_empty_components() {
        let s = SchemaKey::new("item").unwrap();
        assert!(EntityKey::new("", s.clone(), "f").is_err());
        assert!(EntityKey::new("e", s, "").is_err());
    }
}
