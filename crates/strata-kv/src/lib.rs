//! Key/blob store abstraction for strata.
//!
//! This crate defines the [`KvStore`] trait, the single interface through
//! which the strata engine reads and writes persistent bytes. The engine never
//! depends on a concrete store; it programs against the trait so that an
//! embedding application can back it with whatever ordered key/value store it
//! already has.
//!
//! # Crate layout
//!
//! - [`store`]: the [`KvStore`] trait definition.
//! - [`batch`]: [`WriteBatch`], the unit of atomic mutation.
//! - [`memory`]: [`MemoryKv`], an ordered in-memory backend.
//! - [`error`]: the [`KvError`] enum returned by all trait methods.

pub mod batch;
pub mod error;
pub mod memory;
pub mod store;

pub use batch::{BatchOp, WriteBatch};
pub use error::KvError;
pub use memory::MemoryKv;
pub use store::{KvPair, KvStore};
