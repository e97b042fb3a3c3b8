//! strata: an embeddable change-control engine.
//!
//! Structured entities are versioned the way a distributed version-control
//! system versions files: writes append immutable changes, changes are
//! bundled into commits, versions are named pointers into the commit graph,
//! and divergent versions are merged three-way. Replicas exchange their
//! change logs over a small JSON push/pull protocol and converge.
//!
//! Start with [`Engine`]:
//!
//! ```no_run
//! use strata::{Engine, OpenOptions};
//!
//! # fn main() -> strata::EngineResult<()> {
//! let engine = Engine::new(OpenOptions::new())?;
//! let main = engine.active_version()?;
//! # let _ = main;
//! # Ok(())
//! # }
//! ```
//!
//! Persistence goes through the [`strata_kv::KvStore`] trait; the whole store
//! can also be exported with [`Engine::to_blob`] and reopened with
//! [`Engine::open`].

pub mod changelog;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod file;
pub mod graph;
pub mod key_value;
pub mod label;
pub mod merge;
pub mod model;
pub mod schema;
pub mod snapshot;
pub mod state;
pub mod storage;
pub mod sync;
pub mod telemetry;
pub mod version;

pub use config::EngineConfig;
pub use engine::{Engine, OpenOptions};
pub use error::{EngineError, EngineResult};
pub use model::types::{ChangeId, CommitId, EntityKey, SchemaKey, SessionId, VersionId};
pub use state::{EntityState, EntityWrite, StateFilter};
