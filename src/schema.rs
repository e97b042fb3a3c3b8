//! Stored schemas and schema dependency order.
//!
//! A schema `(key, version)` is immutable once stored. Foreign keys name the
//! schemas whose entities a schema's entities reference; they define the
//! order in which the file materializer hands changes to a plugin
//! (referenced kinds first).

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EngineError, EngineResult};
use crate::model::records::StoredSchema;
use crate::model::types::SchemaKey;
use crate::storage::keys::{Table, row_id};
use crate::storage::{StoreRead, Txn};

/// Register a schema.
///
/// Registering an identical `(key, version)` again is a no-op.
///
/// # Errors
/// - [`EngineError::SchemaMismatch`] if `(key, version)` is stored with a
///   different definition or foreign keys.
/// - [`EngineError::InvalidSchema`] if the version is empty or the foreign
///   keys would form a dependency cycle.
pub fn register_schema(tx: &mut Txn<'_>, schema: &StoredSchema) -> EngineResult<()> {
    if schema.version.trim().is_empty() {
        return Err(EngineError::InvalidSchema {
            schema_key: schema.key.to_string(),
            reason: "schema version must not be empty".to_owned(),
        });
    }
    let id = row_id(&[schema.key.as_str(), &schema.version]);
    if let Some(existing) = tx.get_row::<StoredSchema>(Table::StoredSchema, &id)? {
        if existing == *schema {
            return Ok(());
        }
        return Err(EngineError::SchemaMismatch {
            schema_key: schema.key.to_string(),
            version: schema.version.clone(),
        });
    }

    let mut graph = dependency_graph(tx)?;
    graph
        .entry(schema.key.clone())
        .or_default()
        .extend(schema.foreign_keys.iter().cloned());
    ranks_of(&graph).map_err(|cycle| EngineError::InvalidSchema {
        schema_key: schema.key.to_string(),
        reason: format!("foreign keys form a cycle through '{cycle}'"),
    })?;

    tx.put_row(Table::StoredSchema, &id, schema)?;
    tracing::debug!(schema = %schema.key, version = %schema.version, "registered schema");
    Ok(())
}

/// Look up one stored schema.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn get_schema(
    reader: &impl StoreRead,
    key: &SchemaKey,
    version: &str,
) -> EngineResult<Option<StoredSchema>> {
    reader.get_row(Table::StoredSchema, &row_id(&[key.as_str(), version]))
}

/// Every stored schema, ordered by `(key, version)`.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn list_schemas(reader: &impl StoreRead) -> EngineResult<Vec<StoredSchema>> {
    Ok(reader
        .scan_rows(Table::StoredSchema, "")?
        .into_iter()
        .map(|(_, schema)| schema)
        .collect())
}

/// Rank of every stored schema key: 0 for kinds that reference nothing,
/// otherwise one more than the highest rank they reference. Unregistered
/// keys have rank 0.
///
/// # Errors
/// Returns [`EngineError::InvalidSchema`] if stored foreign keys are cyclic.
pub fn dependency_rank(reader: &impl StoreRead) -> EngineResult<BTreeMap<SchemaKey, usize>> {
    let graph = dependency_graph(reader)?;
    ranks_of(&graph).map_err(|cycle| EngineError::InvalidSchema {
        schema_key: cycle.to_string(),
        reason: "stored foreign keys form a cycle".to_owned(),
    })
}

/// Foreign keys per schema key, merged across versions. Self references are
/// dropped.
fn dependency_graph(reader: &impl StoreRead) -> EngineResult<BTreeMap<SchemaKey, BTreeSet<SchemaKey>>> {
    let mut graph: BTreeMap<SchemaKey, BTreeSet<SchemaKey>> = BTreeMap::new();
    for schema in list_schemas(reader)? {
        graph
            .entry(schema.key.clone())
            .or_default()
            .extend(schema.foreign_keys);
    }
    for (key, deps) in &mut graph {
        deps.remove(key);
    }
    Ok(graph)
}

/// Longest-path ranks; `Err(key)` names a key on a cycle.
fn ranks_of(
    graph: &BTreeMap<SchemaKey, BTreeSet<SchemaKey>>,
) -> Result<BTreeMap<SchemaKey, usize>, SchemaKey> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done(usize),
    }

    fn visit(
        key: &SchemaKey,
        graph: &BTreeMap<SchemaKey, BTreeSet<SchemaKey>>,
        marks: &mut BTreeMap<SchemaKey, Mark>,
    ) -> Result<usize, SchemaKey> {
        match marks.get(key) {
            Some(Mark::Done(rank)) => return Ok(*rank),
            Some(Mark::Visiting) => return Err(key.clone()),
            None => {}
        }
        marks.insert(key.clone(), Mark::Visiting);
        let mut rank = 0;
        for dep in graph.get(key).into_iter().flatten() {
            if dep == key {
                continue;
            }
            rank = rank.max(visit(dep, graph, marks)? + 1);
        }
        marks.insert(key.clone(), Mark::Done(rank));
        Ok(rank)
    }

    let mut marks = BTreeMap::new();
    let mut ranks = BTreeMap::new();
    for key in graph.keys() {
        ranks.insert(key.clone(), visit(key, graph, &mut marks)?);
    }
    Ok(ranks)
}
