//! Shared helpers for strata integration tests.
//!
//! Every test builds its own in-memory engine; nothing touches the real
//! filesystem except through `tempfile`.
//!
//! Two test codecs are provided:
//! - [`PropertiesPlugin`]: a JSON object file, one entity per top-level
//!   property. Numeric properties merge additively.
//! - [`OutlinePlugin`]: a line-based outline of sections and items, where
//!   items reference their section and must be applied after it.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use strata::file::{
    DetectedChange, EntityConflict, FileDescriptor, MergeFileInput, MergeFileOutput, Plugin,
    PluginError, PluginResult,
};
use strata::key_value;
use strata::model::records::{Commit, StoredSchema, Version};
use strata::schema;
use strata::state::EntityState;
use strata::version::{self, CreateVersion, Inherit};
use strata::{Engine, EngineConfig, OpenOptions, SchemaKey, VersionId};

pub const PROPERTIES: &str = "json_properties";
pub const PROPERTY_SCHEMA: &str = "json_property";
pub const OUTLINE: &str = "outline";
pub const SECTION_SCHEMA: &str = "outline_section";
pub const ITEM_SCHEMA: &str = "outline_item";

fn schema_key(key: &str) -> SchemaKey {
    SchemaKey::new(key).expect("valid schema key")
}

// ---------------------------------------------------------------------------
// PropertiesPlugin
// ---------------------------------------------------------------------------

/// One entity per top-level property of a JSON object.
pub struct PropertiesPlugin;

fn parse_object(bytes: &[u8]) -> PluginResult<Map<String, Value>> {
    match serde_json::from_slice(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(PluginError::new("file is not a JSON object")),
        Err(e) => Err(PluginError::new(e.to_string())),
    }
}

impl Plugin for PropertiesPlugin {
    fn key(&self) -> &str {
        PROPERTIES
    }

    fn detect_changes(&self, before: Option<&[u8]>, after: &[u8]) -> PluginResult<Vec<DetectedChange>> {
        let before = before.map(parse_object).transpose()?.unwrap_or_default();
        let after = parse_object(after)?;
        let mut changes = Vec::new();
        for (name, value) in &after {
            if before.get(name) != Some(value) {
                changes.push(DetectedChange {
                    entity_id: name.clone(),
                    schema_key: schema_key(PROPERTY_SCHEMA),
                    schema_version: "1.0".to_owned(),
                    content: json!({ "value": value }),
                });
            }
        }
        for name in before.keys().filter(|name| !after.contains_key(*name)) {
            changes.push(DetectedChange {
                entity_id: name.clone(),
                schema_key: schema_key(PROPERTY_SCHEMA),
                schema_version: "1.0".to_owned(),
                content: Value::Null,
            });
        }
        Ok(changes)
    }

    fn apply_changes(&self, _file: &FileDescriptor, entities: &[EntityState]) -> PluginResult<Vec<u8>> {
        let mut object = Map::new();
        for entity in entities {
            let value = entity
                .content
                .get("value")
                .cloned()
                .ok_or_else(|| PluginError::new(format!("property {} has no value", entity.key.entity_id)))?;
            object.insert(entity.key.entity_id.clone(), value);
        }
        serde_json::to_vec(&Value::Object(object)).map_err(|e| PluginError::new(e.to_string()))
    }

    fn merge_file(&self, input: &MergeFileInput<'_>) -> PluginResult<Option<MergeFileOutput>> {
        let mut output = MergeFileOutput::default();
        for conflict in input.conflicts {
            if conflict.key.schema_key.as_str() != PROPERTY_SCHEMA {
                return Err(PluginError::new(format!("{} is not a property", conflict.key)));
            }
            match merge_counter(conflict) {
                Some(value) => output.resolved.push((conflict.key.clone(), json!({ "value": value }))),
                None => output.unresolved.push(conflict.key.clone()),
            }
        }
        Ok(Some(output))
    }
}

/// `current + incoming - base` when all three are integers.
fn merge_counter(conflict: &EntityConflict) -> Option<i64> {
    let number = |v: &Option<Value>| v.as_ref()?.get("value")?.as_i64();
    Some(number(&conflict.current)? + number(&conflict.incoming)? - number(&conflict.base)?)
}

// ---------------------------------------------------------------------------
// OutlinePlugin
// ---------------------------------------------------------------------------

/// Line format:
///
/// ```text
/// # <section-id> <title>
/// - <item-id> <text>
/// ```
///
/// Items belong to the closest preceding section.
pub struct OutlinePlugin;

fn parse_outline(bytes: &[u8]) -> PluginResult<BTreeMap<(String, String), Value>> {
    let text = std::str::from_utf8(bytes).map_err(|e| PluginError::new(e.to_string()))?;
    let mut entities = BTreeMap::new();
    let mut section: Option<String> = None;
    let mut position = 0u64;
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let (marker, rest) = line.split_at(1);
        let (id, body) = rest.trim().split_once(' ').unwrap_or((rest.trim(), ""));
        position += 1;
        match marker {
            "#" => {
                section = Some(id.to_owned());
                entities.insert(
                    (SECTION_SCHEMA.to_owned(), id.to_owned()),
                    json!({ "title": body, "position": position }),
                );
            }
            "-" => {
                let owner = section
                    .clone()
                    .ok_or_else(|| PluginError::new(format!("item {id} has no section")))?;
                entities.insert(
                    (ITEM_SCHEMA.to_owned(), id.to_owned()),
                    json!({ "section": owner, "text": body, "position": position }),
                );
            }
            other => return Err(PluginError::new(format!("unknown line marker '{other}'"))),
        }
    }
    Ok(entities)
}

impl Plugin for OutlinePlugin {
    fn key(&self) -> &str {
        OUTLINE
    }

    fn detect_changes(&self, before: Option<&[u8]>, after: &[u8]) -> PluginResult<Vec<DetectedChange>> {
        let before = before.map(parse_outline).transpose()?.unwrap_or_default();
        let after = parse_outline(after)?;
        let mut changes = Vec::new();
        for ((schema, id), content) in &after {
            if before.get(&(schema.clone(), id.clone())) != Some(content) {
                changes.push(DetectedChange {
                    entity_id: id.clone(),
                    schema_key: schema_key(schema),
                    schema_version: "1.0".to_owned(),
                    content: content.clone(),
                });
            }
        }
        for (schema, id) in before.keys().filter(|k| !after.contains_key(*k)) {
            changes.push(DetectedChange {
                entity_id: id.clone(),
                schema_key: schema_key(schema),
                schema_version: "1.0".to_owned(),
                content: Value::Null,
            });
        }
        Ok(changes)
    }

    /// Fails if an item arrives before its section.
    fn apply_changes(&self, _file: &FileDescriptor, entities: &[EntityState]) -> PluginResult<Vec<u8>> {
        let mut sections: BTreeMap<String, (u64, String)> = BTreeMap::new();
        let mut items: Vec<(u64, String, String, String)> = Vec::new();
        for entity in entities {
            let content = &entity.content;
            let position = content["position"].as_u64().unwrap_or(0);
            match entity.key.schema_key.as_str() {
                SECTION_SCHEMA => {
                    let title = content["title"].as_str().unwrap_or_default().to_owned();
                    sections.insert(entity.key.entity_id.clone(), (position, title));
                }
                ITEM_SCHEMA => {
                    let section = content["section"].as_str().unwrap_or_default().to_owned();
                    if !sections.contains_key(&section) {
                        return Err(PluginError::new(format!(
                            "item {} applied before its section {section}",
                            entity.key.entity_id
                        )));
                    }
                    let text = content["text"].as_str().unwrap_or_default().to_owned();
                    items.push((position, section, entity.key.entity_id.clone(), text));
                }
                other => return Err(PluginError::new(format!("unexpected schema {other}"))),
            }
        }
        let mut ordered_sections: Vec<_> = sections.into_iter().collect();
        ordered_sections.sort_by_key(|(_, (position, _))| *position);
        items.sort();
        let mut out = String::new();
        for (id, (_, title)) in ordered_sections {
            out.push_str(&format!("# {id} {title}\n"));
            for (_, _, item_id, text) in items.iter().filter(|(_, s, _, _)| *s == id) {
                out.push_str(&format!("- {item_id} {text}\n"));
            }
        }
        Ok(out.into_bytes())
    }
}

// ---------------------------------------------------------------------------
// Engine helpers
// ---------------------------------------------------------------------------

pub fn options() -> OpenOptions {
    OpenOptions::new()
        .with_plugin(Arc::new(PropertiesPlugin))
        .with_plugin(Arc::new(OutlinePlugin))
}

/// A fresh engine with both test plugins.
pub fn engine() -> Engine {
    Engine::new(options()).expect("failed to create engine")
}

/// A fresh engine in deterministic mode.
pub fn deterministic_engine() -> Engine {
    let mut config = EngineConfig::default();
    config.engine.deterministic_mode = true;
    Engine::new(options().with_config(config)).expect("failed to create engine")
}

pub fn main_version(engine: &Engine) -> Version {
    engine.version_named("main").expect("main exists")
}

/// Set a tracked key/value entry.
pub fn set(engine: &Engine, version: &VersionId, key: &str, value: Value) {
    engine
        .transaction(|tx| key_value::set(tx, version, key, value, false))
        .expect("set failed");
}

pub fn get(engine: &Engine, version: &VersionId, key: &str) -> Option<Value> {
    engine
        .read(|view| key_value::get(view, version, key))
        .expect("get failed")
}

pub fn checkpoint(engine: &Engine, version: &VersionId) -> Commit {
    engine.checkpoint(version).expect("checkpoint failed")
}

/// A version named `name` at `commit`, without inheritance.
pub fn branch(engine: &Engine, name: &str, commit: &Commit) -> Version {
    engine
        .create_version(CreateVersion {
            name: Some(name.to_owned()),
            commit_id: Some(commit.id.clone()),
            inherits_from: Inherit::Nothing,
            ..CreateVersion::default()
        })
        .expect("create version failed")
}

/// Register the outline schemas so items depend on sections.
pub fn register_outline_schemas(engine: &Engine) {
    engine
        .transaction(|tx| {
            schema::register_schema(
                tx,
                &StoredSchema {
                    key: schema_key(SECTION_SCHEMA),
                    version: "1.0".to_owned(),
                    definition: json!({ "type": "object" }),
                    foreign_keys: Vec::new(),
                },
            )?;
            schema::register_schema(
                tx,
                &StoredSchema {
                    key: schema_key(ITEM_SCHEMA),
                    version: "1.0".to_owned(),
                    definition: json!({ "type": "object" }),
                    foreign_keys: vec![schema_key(SECTION_SCHEMA)],
                },
            )
        })
        .expect("register schemas failed");
}

/// Live key/value entries of `version` as a map, settings excluded.
pub fn key_values(engine: &Engine, version: &VersionId) -> BTreeMap<String, Value> {
    let filter = strata::StateFilter::schema(schema_key(key_value::KEY_VALUE_SCHEMA));
    engine
        .list_entities(version, &filter)
        .expect("list failed")
        .into_iter()
        .filter(|e| !e.untracked)
        .map(|e| (e.key.entity_id, e.content["value"].clone()))
        .collect()
}

/// Head commit of the version named `name`.
pub fn head_of(engine: &Engine, name: &str) -> Commit {
    let version = engine.version_named(name).expect("version exists");
    engine
        .read(|view| strata::graph::get_commit(view, &version.commit_id))
        .expect("commit exists")
}

pub fn version_ids(engine: &Engine) -> Vec<String> {
    engine
        .read(|view| version::list_versions(view))
        .expect("list versions failed")
        .into_iter()
        .map(|v| v.id.to_string())
        .collect()
}
