//! Engine context and deterministic replay.
//!
//! [`Env`] is the per-engine context every operation receives (through
//! [`StoreRead::env`]): the writer session, the configuration and the plugin
//! registry. There is no process-global state, so several engines can live in
//! one process.
//!
//! The replay functions hand out ids, timestamps and sequence numbers. In
//! deterministic mode they derive everything from one persisted counter, so
//! two runs of the same operations produce byte-identical stores and a
//! reopened store continues the sequence without gaps. Outside deterministic
//! mode they use the wall clock and UUIDv7.
//!
//! The mode flag and the counter are untracked key/value rows in the global
//! version, read and written directly here rather than through the state
//! materializer.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::file::plugin::PluginRegistry;
use crate::key_value::{self, DETERMINISTIC_MODE_KEY, SEQUENCE_NUMBER_KEY};
use crate::model::types::SessionId;
use crate::storage::keys::{CLOCK_FLOOR_ROW, Table};
use crate::storage::{StoreRead, Txn};

// ---------------------------------------------------------------------------
// Env
// ---------------------------------------------------------------------------

/// Context shared by every operation of one engine instance.
#[derive(Clone)]
pub struct Env {
    /// Writer session stamped on every mutation log entry.
    pub session: SessionId,
    pub config: EngineConfig,
    pub plugins: PluginRegistry,
}

impl Env {
    pub(crate) const fn new(
        session: SessionId,
        config: EngineConfig,
        plugins: PluginRegistry,
    ) -> Self {
        Self {
            session,
            config,
            plugins,
        }
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used)]
    pub(crate) fn for_tests(session: &str) -> Self {
        Self::new(
            SessionId::new(session).unwrap(),
            EngineConfig::default(),
            PluginRegistry::new(),
        )
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("session", &self.session)
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Deterministic mode
// ---------------------------------------------------------------------------

/// Whether deterministic mode is enabled.
///
/// # Errors
/// Returns an error if the setting row cannot be read.
pub fn is_deterministic(reader: &impl StoreRead) -> EngineResult<bool> {
    Ok(matches!(
        key_value::read_setting(reader, DETERMINISTIC_MODE_KEY)?,
        Some(Value::Bool(true))
    ))
}

/// Enable or disable deterministic mode. The sequence counter is kept, so
/// re-enabling resumes where the previous run stopped.
///
/// # Errors
/// Returns an error if the setting row cannot be written.
pub fn set_deterministic_mode(tx: &mut Txn<'_>, enabled: bool) -> EngineResult<()> {
    key_value::write_setting(tx, DETERMINISTIC_MODE_KEY, Value::Bool(enabled))?;
    tracing::info!(enabled, "deterministic mode changed");
    Ok(())
}

/// The next value the sequence counter will hand out, without consuming it.
///
/// # Errors
/// Returns an error if the counter row cannot be read or is malformed.
pub fn peek_sequence_number(reader: &impl StoreRead) -> EngineResult<u64> {
    match key_value::read_setting(reader, SEQUENCE_NUMBER_KEY)? {
        None => Ok(0),
        Some(value) => value.as_u64().ok_or_else(|| EngineError::Corrupted {
            detail: format!("sequence counter is not an unsigned integer: {value}"),
        }),
    }
}

/// Consume and return the next sequence number: `0, 1, 2, ...`.
///
/// # Errors
/// Returns [`EngineError::DeterministicModeDisabled`] when the mode is off.
pub fn next_sequence_number(tx: &mut Txn<'_>) -> EngineResult<u64> {
    if !is_deterministic(tx)? {
        return Err(EngineError::DeterministicModeDisabled);
    }
    take_sequence_number(tx)
}

fn take_sequence_number(tx: &mut Txn<'_>) -> EngineResult<u64> {
    let n = peek_sequence_number(tx)?;
    key_value::write_setting(tx, SEQUENCE_NUMBER_KEY, Value::from(n + 1))?;
    Ok(n)
}

/// An RFC 3339 UTC timestamp with millisecond precision.
///
/// Deterministic mode yields the Unix epoch plus one millisecond per
/// sequence number.
///
/// # Errors
/// Returns an error if the counter cannot be read or written.
pub fn timestamp(tx: &mut Txn<'_>) -> EngineResult<String> {
    let at = if is_deterministic(tx)? {
        let n = take_sequence_number(tx)?;
        let millis = i64::try_from(n).map_err(|_| EngineError::Corrupted {
            detail: format!("sequence counter {n} out of range"),
        })?;
        DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| EngineError::Corrupted {
            detail: format!("sequence counter {n} out of range"),
        })?
    } else {
        Utc::now()
    };
    Ok(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// A fresh unique id.
///
/// Deterministic mode yields a UUIDv7-shaped id whose last group is the
/// sequence number.
///
/// # Errors
/// Returns an error if the counter cannot be read or written.
pub fn uuid(tx: &mut Txn<'_>) -> EngineResult<String> {
    if is_deterministic(tx)? {
        let n = take_sequence_number(tx)?;
        Ok(deterministic_uuid(n))
    } else {
        Ok(uuid::Uuid::now_v7().to_string())
    }
}

fn deterministic_uuid(n: u64) -> String {
    format!("01920000-0000-7000-8000-{:012x}", n & 0xffff_ffff_ffff)
}

/// Session id for an engine opening `reader`'s store.
///
/// In deterministic mode the id is derived from the counter without
/// consuming it, so opening a store does not perturb the sequence.
///
/// # Errors
/// Returns an error if the settings cannot be read.
pub fn session_for(reader: &impl StoreRead) -> EngineResult<SessionId> {
    let id = if is_deterministic(reader)? {
        format!("deterministic-session-{}", peek_sequence_number(reader)?)
    } else {
        uuid::Uuid::now_v7().to_string()
    };
    Ok(SessionId::new(&id)?)
}

// ---------------------------------------------------------------------------
// Hybrid logical wall clock
// ---------------------------------------------------------------------------

/// Highest wall clock observed by this replica.
///
/// # Errors
/// Returns an error if the floor row cannot be read.
pub fn clock_floor(reader: &impl StoreRead) -> EngineResult<u64> {
    Ok(reader
        .get_row::<u64>(Table::ClockFloor, CLOCK_FLOOR_ROW)?
        .unwrap_or(0))
}

/// Wall clock for a new mutation log entry: `max(now, floor + 1)`.
///
/// Deterministic mode ignores the real clock, so entries count up from the
/// floor.
pub(crate) fn next_wall_clock(tx: &mut Txn<'_>) -> EngineResult<u64> {
    let now = if is_deterministic(tx)? {
        0
    } else {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    };
    let next = now.max(clock_floor(tx)? + 1);
    tx.put_row_unlogged(Table::ClockFloor, CLOCK_FLOOR_ROW, &next)?;
    Ok(next)
}

/// Raise the floor to at least `wall_clock` (after importing remote writes).
pub(crate) fn observe_wall_clock(tx: &mut Txn<'_>, wall_clock: u64) -> EngineResult<()> {
    if wall_clock > clock_floor(tx)? {
        tx.put_row_unlogged(Table::ClockFloor, CLOCK_FLOOR_ROW, &wall_clock)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
