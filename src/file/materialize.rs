//! Writing files through plugins and rendering them back.

use serde_json::Value;

use super::plugin::{FileDescriptor, plugin_failed};
use crate::error::{EngineError, EngineResult};
use crate::key_value::SYSTEM_PLUGIN_KEY;
use crate::model::types::{ChangeId, CommitId, EntityKey, SchemaKey, VersionId};
use crate::schema;
use crate::state::{self, EntityState, EntityWrite, StateFilter};
use crate::storage::{StoreRead, Txn};

/// Schema of the per-file descriptor entity.
pub const FILE_DESCRIPTOR_SCHEMA: &str = "strata_file_descriptor";
const FILE_DESCRIPTOR_SCHEMA_VERSION: &str = "1.0";

/// A file to write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileWrite {
    pub id: String,
    pub path: String,
    pub plugin_key: String,
    pub data: Vec<u8>,
}

fn descriptor_key(file_id: &str) -> EngineResult<EntityKey> {
    Ok(EntityKey::new(
        file_id,
        SchemaKey::new(FILE_DESCRIPTOR_SCHEMA)?,
        file_id,
    )?)
}

fn is_descriptor(entity: &EntityState) -> bool {
    entity.key.schema_key.as_str() == FILE_DESCRIPTOR_SCHEMA
}

fn decode_descriptor(entity: EntityState) -> EngineResult<FileDescriptor> {
    serde_json::from_value(entity.content)
        .map_err(|e| EngineError::serialization(format!("descriptor of file {}", entity.key.file_id), e))
}

/// The descriptor of `file_id` in `version`.
///
/// # Errors
/// Returns [`EngineError::NotFound`] if the file does not exist there.
pub fn file_descriptor(
    reader: &impl StoreRead,
    version: &VersionId,
    file_id: &str,
) -> EngineResult<FileDescriptor> {
    let entity = state::get(reader, version, &descriptor_key(file_id)?)?
        .ok_or_else(|| EngineError::not_found("file", file_id))?;
    decode_descriptor(entity)
}

/// Every file visible in `version`, ordered by id.
///
/// # Errors
/// Returns an error if state cannot be resolved.
pub fn list_files(reader: &impl StoreRead, version: &VersionId) -> EngineResult<Vec<FileDescriptor>> {
    let filter = StateFilter::schema(SchemaKey::new(FILE_DESCRIPTOR_SCHEMA)?);
    state::list(reader, version, &filter)?
        .into_iter()
        .map(decode_descriptor)
        .collect()
}

/// Write a file into `version`: detect entity changes against the bytes the
/// file currently materializes to and record them as tracked writes, plus
/// the file's descriptor. Returns the ids of the recorded changes.
///
/// # Errors
/// - [`EngineError::UnknownPlugin`] if the plugin key is not registered.
/// - [`EngineError::Plugin`] if the plugin fails.
#[tracing::instrument(skip_all, fields(version = %version, file = %file.id))]
pub fn write_file(tx: &mut Txn<'_>, version: &VersionId, file: FileWrite) -> EngineResult<Vec<ChangeId>> {
    let plugin = tx.env().plugins.get(&file.plugin_key)?;
    let before = match state::get(tx, version, &descriptor_key(&file.id)?)? {
        Some(_) => Some(materialize_file(tx, version, &file.id)?),
        None => None,
    };
    let detected = plugin
        .detect_changes(before.as_deref(), &file.data)
        .map_err(|e| plugin_failed(&file.plugin_key, e))?;

    let mut changes = Vec::with_capacity(detected.len() + 1);
    for change in detected {
        let write = EntityWrite {
            key: EntityKey::new(&change.entity_id, change.schema_key, &file.id)?,
            content: change.content,
            schema_version: change.schema_version,
            plugin_key: file.plugin_key.clone(),
            untracked: false,
        };
        changes.extend(state::write_entity(tx, version, write)?);
    }

    let descriptor = FileDescriptor {
        id: file.id.clone(),
        path: file.path,
        plugin_key: file.plugin_key,
    };
    let current = state::get(tx, version, &descriptor_key(&file.id)?)?;
    let content = serde_json::to_value(&descriptor)
        .map_err(|e| EngineError::serialization(format!("descriptor of file {}", file.id), e))?;
    if current.is_none_or(|entity| entity.content != content) {
        let write = EntityWrite {
            key: descriptor_key(&file.id)?,
            content,
            schema_version: FILE_DESCRIPTOR_SCHEMA_VERSION.to_owned(),
            plugin_key: SYSTEM_PLUGIN_KEY.to_owned(),
            untracked: false,
        };
        changes.extend(state::write_entity(tx, version, write)?);
    }
    tracing::debug!(changes = changes.len(), "wrote file");
    Ok(changes)
}

/// Keep the entities `plugin_key` owns, with referenced schemas before
/// referencing ones. The descriptor and open conflicts belong to the engine.
fn in_dependency_order(
    reader: &impl StoreRead,
    plugin_key: &str,
    mut entities: Vec<EntityState>,
) -> EngineResult<Vec<EntityState>> {
    let ranks = schema::dependency_rank(reader)?;
    entities.retain(|e| !is_descriptor(e) && e.plugin_key == plugin_key);
    entities.sort_by(|a, b| {
        let rank = |e: &EntityState| ranks.get(&e.key.schema_key).copied().unwrap_or(0);
        rank(a).cmp(&rank(b)).then_with(|| a.key.cmp(&b.key))
    });
    Ok(entities)
}

fn render(
    reader: &impl StoreRead,
    descriptor: &FileDescriptor,
    entities: Vec<EntityState>,
) -> EngineResult<Vec<u8>> {
    let plugin = reader.env().plugins.get(&descriptor.plugin_key)?;
    let ordered = in_dependency_order(reader, &descriptor.plugin_key, entities)?;
    plugin
        .apply_changes(descriptor, &ordered)
        .map_err(|e| plugin_failed(&descriptor.plugin_key, e))
}

/// Render `file_id` as it currently is in `version`.
///
/// # Errors
/// - [`EngineError::NotFound`] if the file does not exist in the version.
/// - [`EngineError::UnknownPlugin`] / [`EngineError::Plugin`] on plugin
///   failure.
pub fn materialize_file(reader: &impl StoreRead, version: &VersionId, file_id: &str) -> EngineResult<Vec<u8>> {
    let descriptor = file_descriptor(reader, version, file_id)?;
    let entities = state::list(reader, version, &StateFilter::file(file_id))?;
    render(reader, &descriptor, entities)
}

/// Render `file_id` as of `commit`.
///
/// # Errors
/// Same as [`materialize_file`].
pub fn materialize_file_at(
    reader: &impl StoreRead,
    commit: &CommitId,
    file_id: &str,
    depth: Option<usize>,
) -> EngineResult<Vec<u8>> {
    let descriptor = state::state_at(reader, commit, &descriptor_key(file_id)?, depth)?
        .ok_or_else(|| EngineError::not_found("file", file_id))?;
    let descriptor = decode_descriptor(descriptor)?;
    let entities = state::state_at_commit(reader, commit, &StateFilter::file(file_id), depth)?;
    render(reader, &descriptor, entities)
}

/// Delete a file: tombstone every entity of the file and its descriptor.
/// Returns the number of deleted entities.
///
/// # Errors
/// Returns [`EngineError::NotFound`] if the file does not exist.
pub fn delete_file(tx: &mut Txn<'_>, version: &VersionId, file_id: &str) -> EngineResult<usize> {
    file_descriptor(tx, version, file_id)?;
    let entities = state::list(tx, version, &StateFilter::file(file_id))?;
    let mut deleted = 0;
    for entity in entities.into_iter().filter(|e| !e.untracked) {
        let write = EntityWrite {
            key: entity.key,
            content: Value::Null,
            schema_version: entity.schema_version,
            plugin_key: entity.plugin_key,
            untracked: false,
        };
        if state::write_entity(tx, version, write)?.is_some() {
            deleted += 1;
        }
    }
    tracing::debug!(file = %file_id, deleted, "deleted file");
    Ok(deleted)
}
