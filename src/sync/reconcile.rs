//! Reconciling two replicas' change logs.
//!
//! Every write to a synced table leaves a mutation log entry and points the
//! row's mutation head at it. A replica sends the rows whose log entries the
//! other side's vector clock has not covered, together with those entries.
//! The receiver keeps, per row, the write with the greater
//! `(wall_clock, session, session_time)`; the log itself is merged
//! insert-if-absent, since it is history rather than contested state.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::clock::{self, VectorClock};
use super::wire::{MUTATION_LOG_TABLE, SyncData, SyncRow};
use crate::context;
use crate::error::{EngineError, EngineResult};
use crate::model::records::MutationLogEntry;
use crate::model::types::VersionId;
use crate::state;
use crate::storage::keys::{Table, mutation_head_row_id, mutation_row_id};
use crate::storage::{StoreRead, Txn, decode_row};
use crate::version;

/// What [`merge_their_state`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Rows upserted or deleted.
    pub applied: usize,
    /// Incoming writes that lost to a newer local write.
    pub discarded: usize,
    /// Log entries this replica had not seen.
    pub new_log_entries: usize,
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::Serialization {
        context: "sync data".to_owned(),
        message: message.into(),
    }
}

/// Every mutation log entry `their_clock` has not seen, with the current
/// value of each row those entries touched.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn collect_unseen(reader: &impl StoreRead, their_clock: &VectorClock) -> EngineResult<SyncData> {
    let entries: Vec<MutationLogEntry> = reader
        .scan_rows::<MutationLogEntry>(Table::MutationLog, "")?
        .into_iter()
        .map(|(_, entry)| entry)
        .filter(|entry| !their_clock.has_seen(entry.session.as_str(), entry.session_time))
        .collect();

    let mut touched: BTreeMap<Table, BTreeSet<String>> = BTreeMap::new();
    for entry in &entries {
        let table = Table::synced_from_name(&entry.table_name)
            .ok_or_else(|| EngineError::Corrupted {
                detail: format!("mutation log names unknown table '{}'", entry.table_name),
            })?;
        touched.entry(table).or_default().insert(entry.row_id.clone());
    }

    // Each row travels with its current head entry, so the receiver
    // compares against the write that produced the value being sent.
    let mut log: BTreeMap<String, MutationLogEntry> = entries
        .into_iter()
        .map(|entry| (mutation_row_id(entry.session.as_str(), entry.session_time), entry))
        .collect();
    let mut data = SyncData::new();
    for (table, row_ids) in touched {
        let mut rows = Vec::with_capacity(row_ids.len());
        for row_id in row_ids {
            let value = reader
                .get_raw(&table.key(&row_id))?
                .map(|bytes| decode_row::<Value>(table, &row_id, &bytes))
                .transpose()?;
            let head: Option<MutationLogEntry> =
                reader.get_row(Table::MutationHead, &mutation_head_row_id(table, &row_id))?;
            if let Some(head) = head {
                log.entry(mutation_row_id(head.session.as_str(), head.session_time))
                    .or_insert(head);
            }
            rows.push(SyncRow { row_id, value });
        }
        data.insert(table.name().to_owned(), rows);
    }
    if !log.is_empty() {
        let mut rows = Vec::with_capacity(log.len());
        for (row_id, entry) in log {
            let value = serde_json::to_value(&entry)
                .map_err(|e| EngineError::serialization("mutation log entry", e))?;
            rows.push(SyncRow {
                row_id,
                value: Some(value),
            });
        }
        data.insert(MUTATION_LOG_TABLE.to_owned(), rows);
    }
    Ok(data)
}

/// Apply rows received from another replica.
///
/// # Errors
/// Returns an error if `data` names an unknown table, a row arrives
/// without a log entry, or a value cannot be stored. Nothing is applied in
/// that case.
#[tracing::instrument(skip_all)]
pub fn merge_their_state(
    tx: &mut Txn<'_>,
    their_clock: &VectorClock,
    mut data: SyncData,
) -> EngineResult<ApplyReport> {
    tx.savepoint(|tx| {
        let local_clock = clock::local_clock(tx)?;
        let behind = their_clock
            .sessions()
            .filter(|(session, _)| their_clock.is_ahead_on(&local_clock, session))
            .count();
        tracing::debug!(sessions_behind = behind, "merging remote state");

        let entries = decode_entries(data.remove(MUTATION_LOG_TABLE).unwrap_or_default())?;
        let mut heads: BTreeMap<(Table, &str), &MutationLogEntry> = BTreeMap::new();
        for entry in &entries {
            let table = Table::synced_from_name(&entry.table_name)
                .ok_or_else(|| invalid(format!("unknown table '{}'", entry.table_name)))?;
            let head = heads.entry((table, entry.row_id.as_str())).or_insert(entry);
            if entry.order_key() > head.order_key() {
                *head = entry;
            }
        }
        if let Some(name) = data.keys().find(|name| Table::synced_from_name(name).is_none()) {
            return Err(invalid(format!("unknown table '{name}'")));
        }

        let mut report = ApplyReport::default();
        let mut deleted_versions = Vec::new();
        for table in Table::SYNCED {
            let Some(rows) = data.remove(table.name()) else {
                continue;
            };
            for row in rows {
                let incoming = *heads.get(&(table, row.row_id.as_str())).ok_or_else(|| {
                    invalid(format!("{table} row '{}' has no mutation log entry", row.row_id))
                })?;
                let head_id = mutation_head_row_id(table, &row.row_id);
                let local: Option<MutationLogEntry> = tx.get_row(Table::MutationHead, &head_id)?;
                if let Some(local) = local {
                    if local.order_key() == incoming.order_key() {
                        continue;
                    }
                    if local.order_key() > incoming.order_key() {
                        tracing::warn!(
                            table = %table,
                            row = %row.row_id,
                            local_session = %local.session,
                            remote_session = %incoming.session,
                            "discarded older remote write"
                        );
                        report.discarded += 1;
                        continue;
                    }
                }
                match row.value {
                    Some(value) => {
                        let bytes = serde_json::to_vec(&value)
                            .map_err(|e| EngineError::serialization(format!("{table} row {}", row.row_id), e))?;
                        tx.put_raw(table.key(&row.row_id), bytes);
                    }
                    None => {
                        tx.delete_raw(table.key(&row.row_id));
                        if table == Table::Version {
                            deleted_versions.push(row.row_id.clone());
                        }
                    }
                }
                tx.put_row_unlogged(Table::MutationHead, &head_id, incoming)?;
                report.applied += 1;
            }
        }

        let mut max_wall_clock = 0;
        for entry in &entries {
            let id = mutation_row_id(entry.session.as_str(), entry.session_time);
            if tx.get_raw(&Table::MutationLog.key(&id))?.is_none() {
                tx.put_row_unlogged(Table::MutationLog, &id, entry)?;
                report.new_log_entries += 1;
            }
            clock::observe_session(tx, entry.session.as_str(), entry.session_time)?;
            max_wall_clock = max_wall_clock.max(entry.wall_clock);
        }
        context::observe_wall_clock(tx, max_wall_clock)?;

        if report.applied > 0 {
            for id in deleted_versions {
                state::drop_version_state(tx, &VersionId::new(&id)?)?;
            }
            for v in version::list_versions(tx)? {
                state::mark_stale(tx, &v.id)?;
            }
        }
        tracing::info!(
            applied = report.applied,
            discarded = report.discarded,
            new_log_entries = report.new_log_entries,
            "merged remote state"
        );
        Ok(report)
    })
}

fn decode_entries(rows: Vec<SyncRow>) -> EngineResult<Vec<MutationLogEntry>> {
    rows.into_iter()
        .map(|row| {
            let value = row
                .value
                .ok_or_else(|| invalid(format!("mutation log row '{}' has no value", row.row_id)))?;
            serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
        })
        .collect()
}
