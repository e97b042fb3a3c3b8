//! Labels attached to change sets.

use crate::context;
use crate::error::{EngineError, EngineResult};
use crate::graph::change_set;
use crate::model::records::{ChangeSetLabel, Label};
use crate::model::types::{ChangeSetId, ErrorKind, LabelId, ValidationError};
use crate::storage::keys::{Table, row_id, row_prefix};
use crate::storage::{StoreRead, Txn};

/// Label attached to every checkpointed change set.
pub const CHECKPOINT_LABEL: &str = "checkpoint";

/// Find a label by name.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn label_by_name(reader: &impl StoreRead, name: &str) -> EngineResult<Option<Label>> {
    Ok(reader
        .scan_rows::<Label>(Table::Label, "")?
        .into_iter()
        .map(|(_, label)| label)
        .find(|label| label.name == name))
}

/// Create a label, or return the existing label with this name.
///
/// # Errors
/// Returns an error if the name is empty or the row cannot be written.
pub fn create_label(tx: &mut Txn<'_>, name: &str) -> EngineResult<Label> {
    if name.trim().is_empty() {
        return Err(ValidationError::new(ErrorKind::RowId, name, "label name must not be empty").into());
    }
    if let Some(existing) = label_by_name(tx, name)? {
        return Ok(existing);
    }
    let label = Label {
        id: LabelId::new(&context::uuid(tx)?)?,
        name: name.to_owned(),
    };
    tx.put_row(Table::Label, label.id.as_str(), &label)?;
    Ok(label)
}

/// Attach a label to a change set. Idempotent.
///
/// # Errors
/// Returns [`EngineError::NotFound`] if the change set or label is missing.
pub fn attach_label(tx: &mut Txn<'_>, change_set: &ChangeSetId, label: &LabelId) -> EngineResult<()> {
    change_set::get_change_set(tx, change_set)?;
    if tx.get_raw(&Table::Label.key(label.as_str()))?.is_none() {
        return Err(EngineError::not_found("label", label));
    }
    let id = row_id(&[change_set.as_str(), label.as_str()]);
    if tx.get_raw(&Table::ChangeSetLabel.key(&id))?.is_none() {
        tx.put_row(
            Table::ChangeSetLabel,
            &id,
            &ChangeSetLabel {
                change_set_id: change_set.clone(),
                label_id: label.clone(),
            },
        )?;
    }
    Ok(())
}

/// Labels attached to a change set.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn labels_of(reader: &impl StoreRead, change_set: &ChangeSetId) -> EngineResult<Vec<Label>> {
    let joins: Vec<(String, ChangeSetLabel)> =
        reader.scan_rows(Table::ChangeSetLabel, &row_prefix(&[change_set.as_str()]))?;
    let mut labels = Vec::with_capacity(joins.len());
    for (_, join) in joins {
        if let Some(label) = reader.get_row::<Label>(Table::Label, join.label_id.as_str())? {
            labels.push(label);
        }
    }
    labels.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(labels)
}

/// Change sets carrying a label.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn change_sets_with_label(reader: &impl StoreRead, label: &LabelId) -> EngineResult<Vec<ChangeSetId>> {
    Ok(reader
        .scan_rows::<ChangeSetLabel>(Table::ChangeSetLabel, "")?
        .into_iter()
        .filter(|(_, join)| &join.label_id == label)
        .map(|(_, join)| join.change_set_id)
        .collect())
}
