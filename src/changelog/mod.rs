//! The append-only change log.
//!
//! Changes are never updated or deleted. Each append also appends a mutation
//! log entry (see [`crate::storage::txn`]), which is what sync exchanges.

pub mod read;
pub mod write;

pub use read::{change_exists, get_change, leaf_changes_for, leaf_map_for};
pub use write::{NewChange, append};
