//! Codec plugin contract and the typed plugin registry.
//!
//! A plugin turns file bytes into entity changes ([`Plugin::detect_changes`])
//! and entity state back into bytes ([`Plugin::apply_changes`]). Plugins are
//! looked up by key; an unknown key is an error, never a silent no-op.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::model::types::{EntityKey, SchemaKey};
use crate::state::EntityState;

/// Failure reported by a plugin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginError {
    pub message: String,
}

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for PluginError {}

pub type PluginResult<T> = Result<T, PluginError>;

/// One entity-level change detected in a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectedChange {
    /// Stable across calls, so an edit is an update rather than a
    /// delete plus create.
    pub entity_id: String,
    pub schema_key: SchemaKey,
    pub schema_version: String,
    /// New content; `Null` deletes the entity.
    pub content: Value,
}

/// The engine's record of a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub id: String,
    pub path: String,
    pub plugin_key: String,
}

/// One entity on which both sides of a merge disagree.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityConflict {
    pub key: EntityKey,
    /// Values at the common ancestor and on each side; `None` means absent.
    pub base: Option<Value>,
    pub current: Option<Value>,
    pub incoming: Option<Value>,
}

/// Input of [`Plugin::merge_file`]: every disputed entity of one file.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeFileInput<'a> {
    pub file_id: &'a str,
    pub conflicts: &'a [EntityConflict],
}

/// Output of [`Plugin::merge_file`].
///
/// Keys in neither list stay unresolved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeFileOutput {
    /// Merged values; `Null` deletes the entity.
    pub resolved: Vec<(EntityKey, Value)>,
    pub unresolved: Vec<EntityKey>,
}

/// A file-format codec.
pub trait Plugin: Send + Sync {
    /// Registry key; matches `plugin_key` on changes and descriptors.
    fn key(&self) -> &str;

    /// Entity changes that turn `before` into `after`. `before` is `None`
    /// when the file is new.
    ///
    /// # Errors
    /// Returns a [`PluginError`] if either input cannot be parsed.
    fn detect_changes(&self, before: Option<&[u8]>, after: &[u8]) -> PluginResult<Vec<DetectedChange>>;

    /// Render a file from its live entities, given in dependency order
    /// (referenced schemas first).
    ///
    /// # Errors
    /// Returns a [`PluginError`] if the entities cannot be rendered.
    fn apply_changes(&self, file: &FileDescriptor, entities: &[EntityState]) -> PluginResult<Vec<u8>>;

    /// Merge entities both sides changed. `None` leaves everything
    /// unresolved.
    ///
    /// # Errors
    /// Returns a [`PluginError`] if the merge fails outright.
    fn merge_file(&self, input: &MergeFileInput<'_>) -> PluginResult<Option<MergeFileOutput>> {
        let _ = input;
        Ok(None)
    }
}

/// Plugins by key. Cheap to clone.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.plugins.keys()).finish()
    }
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, replacing any plugin with the same key.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let key = plugin.key().to_owned();
        if self.plugins.insert(key.clone(), plugin).is_some() {
            tracing::debug!(plugin = %key, "replaced plugin");
        }
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.register(plugin);
        self
    }

    /// Look up a plugin.
    ///
    /// # Errors
    /// Returns [`EngineError::UnknownPlugin`] if no plugin has this key.
    pub fn get(&self, key: &str) -> EngineResult<Arc<dyn Plugin>> {
        self.plugins
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::UnknownPlugin {
                plugin_key: key.to_owned(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.plugins.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }
}

/// Map a plugin failure into an engine error.
pub(crate) fn plugin_failed(plugin_key: &str, error: PluginError) -> EngineError {
    EngineError::Plugin {
        plugin_key: plugin_key.to_owned(),
        message: error.message,
    }
}
