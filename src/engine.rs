//! The [`Engine`]: one store, one writer at a time.
//!
//! Every mutation runs inside [`Engine::transaction`]. Transactions are
//! admitted one at a time in arrival order; each one buffers its writes,
//! rebuilds the cached state of any version it left stale, and lands in the
//! store as a single atomic batch. Read views ([`Engine::read`]) never see a
//! partially applied transaction.
//!
//! Calling `transaction` from inside a transaction closure deadlocks; use
//! [`Txn::savepoint`] for nested work.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use strata_kv::{KvStore, MemoryKv};

use crate::config::EngineConfig;
use crate::context::{self, Env};
use crate::error::{EngineError, EngineResult};
use crate::file::{self, FileWrite, Plugin, PluginRegistry};
use crate::key_value::{self, STORE_ID_KEY};
use crate::merge::{self, MergeOutcome};
use crate::model::records::{Commit, Version};
use crate::model::types::{ChangeId, EntityKey, SessionId, VersionId};
use crate::state::{self, EntityState, EntityWrite, StateFilter};
use crate::storage::blob;
use crate::storage::lock::WriterLock;
use crate::storage::verify::{self, VerifyReport};
use crate::storage::{ReadView, Txn};
use crate::version::{self, CreateVersion};

/// How to open or create a store.
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    pub config: EngineConfig,
    pub plugins: PluginRegistry,
    /// Writer session to use instead of the one derived from the store.
    pub session_id: Option<SessionId>,
}

impl OpenOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.register(plugin);
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// A change-controlled entity store.
pub struct Engine {
    kv: Box<dyn KvStore>,
    env: Env,
    writer: WriterLock,
    /// Held shared by read views and exclusively while a batch is applied.
    visibility: RwLock<()>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// A fresh in-memory store.
    ///
    /// # Errors
    /// Returns an error if bootstrapping fails.
    pub fn new(options: OpenOptions) -> EngineResult<Self> {
        Self::with_store(Box::new(MemoryKv::new()), options)
    }

    /// Open a store exported with [`Engine::to_blob`].
    ///
    /// # Errors
    /// Returns [`EngineError::Corrupted`] if the blob fails its checksum or
    /// the store fails verification.
    pub fn open(blob: &[u8], options: OpenOptions) -> EngineResult<Self> {
        let pairs = blob::decode(blob)?;
        let kv = MemoryKv::from_pairs(pairs)?;
        Self::with_store(Box::new(kv), options)
    }

    /// Run on an existing key/value store. An empty store is bootstrapped;
    /// a non-empty one is verified.
    ///
    /// # Errors
    /// Returns an error if bootstrapping or verification fails.
    #[tracing::instrument(skip_all)]
    pub fn with_store(kv: Box<dyn KvStore>, options: OpenOptions) -> EngineResult<Self> {
        let OpenOptions {
            config,
            plugins,
            session_id,
        } = options;
        let fresh = kv.is_empty()?;

        // Settings are untracked rows and never logged, so the placeholder
        // session never reaches the store.
        let probe = Env::new(SessionId::new("bootstrap")?, config.clone(), plugins.clone());
        if fresh && config.engine.deterministic_mode {
            let mut tx = Txn::new(kv.as_ref(), &probe);
            context::set_deterministic_mode(&mut tx, true)?;
            kv.apply(tx.into_batch())?;
        }
        let session = match session_id {
            Some(session) => session,
            None => context::session_for(&ReadView::new(kv.as_ref(), &probe))?,
        };

        let engine = Self {
            kv,
            env: Env::new(session, config, plugins),
            writer: WriterLock::new(),
            visibility: RwLock::new(()),
        };
        if fresh {
            let main_name = engine.env.config.engine.main_version_name.clone();
            engine.transaction(|tx| version::bootstrap(tx, &main_name))?;
        } else {
            engine.read(|view| verify::verify(view))?;
        }
        tracing::info!(session = %engine.env.session, fresh, "opened store");
        Ok(engine)
    }

    /// Export the whole store as one blob.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub fn to_blob(&self) -> EngineResult<Vec<u8>> {
        let _visible = self.visibility.read();
        blob::encode(&self.kv.export()?)
    }

    #[must_use]
    pub const fn env(&self) -> &Env {
        &self.env
    }

    #[must_use]
    pub const fn session(&self) -> &SessionId {
        &self.env.session
    }

    /// Run `f` as one atomic transaction.
    ///
    /// Blocks until every earlier transaction has finished. If `f` fails,
    /// nothing it wrote is kept.
    ///
    /// # Errors
    /// Returns the error of `f`, or a storage error if the batch cannot be
    /// applied.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Txn<'_>) -> EngineResult<T>) -> EngineResult<T> {
        let guard = self.writer.acquire();
        let mut tx = Txn::new(self.kv.as_ref(), &self.env);
        let value = f(&mut tx)?;
        state::refresh_stale_all(&mut tx)?;
        let batch = tx.into_batch();
        let ops = batch.len();
        {
            let _visible = self.visibility.write();
            self.kv.apply(batch)?;
        }
        tracing::trace!(ticket = guard.ticket(), ops, "committed transaction");
        drop(guard);
        Ok(value)
    }

    /// Run `f` against committed state. No transaction commits while `f`
    /// runs.
    ///
    /// # Errors
    /// Returns the error of `f`.
    pub fn read<T>(&self, f: impl FnOnce(&ReadView<'_>) -> EngineResult<T>) -> EngineResult<T> {
        let _visible = self.visibility.read();
        f(&ReadView::new(self.kv.as_ref(), &self.env))
    }

    /// The store id assigned at bootstrap.
    ///
    /// # Errors
    /// Returns [`EngineError::Corrupted`] if the id is missing.
    pub fn store_id(&self) -> EngineResult<String> {
        self.read(|view| match key_value::read_setting(view, STORE_ID_KEY)? {
            Some(Value::String(id)) => Ok(id),
            other => Err(EngineError::Corrupted {
                detail: format!("store id setting is {other:?}"),
            }),
        })
    }

    /// Check every reference between history rows.
    ///
    /// # Errors
    /// Returns [`EngineError::Corrupted`] on the first dangling reference.
    pub fn verify(&self) -> EngineResult<VerifyReport> {
        self.read(|view| verify::verify(view))
    }

    // -----------------------------------------------------------------------
    // Shorthands for single-operation transactions
    // -----------------------------------------------------------------------

    /// # Errors
    /// Returns an error if the active version cannot be read.
    pub fn active_version(&self) -> EngineResult<Version> {
        self.read(|view| version::active_version(view))
    }

    /// # Errors
    /// Returns [`EngineError::NotFound`] if no version has that name.
    pub fn version_named(&self, name: &str) -> EngineResult<Version> {
        self.read(|view| {
            version::version_by_name(view, name)?
                .ok_or_else(|| EngineError::not_found("version", name))
        })
    }

    /// # Errors
    /// See [`version::create_version`].
    pub fn create_version(&self, options: CreateVersion) -> EngineResult<Version> {
        self.transaction(|tx| version::create_version(tx, options))
    }

    /// # Errors
    /// See [`state::write_entity`].
    pub fn write_entity(&self, version: &VersionId, write: EntityWrite) -> EngineResult<Option<ChangeId>> {
        self.transaction(|tx| state::write_entity(tx, version, write))
    }

    /// # Errors
    /// See [`state::get`].
    pub fn get_entity(&self, version: &VersionId, key: &EntityKey) -> EngineResult<Option<EntityState>> {
        self.read(|view| state::get(view, version, key))
    }

    /// # Errors
    /// See [`state::list`].
    pub fn list_entities(&self, version: &VersionId, filter: &StateFilter) -> EngineResult<Vec<EntityState>> {
        self.read(|view| state::list(view, version, filter))
    }

    /// # Errors
    /// See [`version::checkpoint`].
    pub fn checkpoint(&self, version: &VersionId) -> EngineResult<Commit> {
        self.transaction(|tx| version::checkpoint(tx, version))
    }

    /// # Errors
    /// See [`merge::merge`].
    pub fn merge(&self, target: &VersionId, incoming: &VersionId) -> EngineResult<MergeOutcome> {
        self.transaction(|tx| merge::merge(tx, target, incoming))
    }

    /// # Errors
    /// See [`file::write_file`].
    pub fn write_file(&self, version: &VersionId, write: FileWrite) -> EngineResult<Vec<ChangeId>> {
        self.transaction(|tx| file::write_file(tx, version, write))
    }

    /// # Errors
    /// See [`file::materialize_file`].
    pub fn materialize_file(&self, version: &VersionId, file_id: &str) -> EngineResult<Vec<u8>> {
        self.read(|view| file::materialize_file(view, version, file_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_store_has_main_active() {
        let engine = Engine::new(OpenOptions::new()).unwrap();
        assert_eq!(engine.active_version().unwrap().name, "main");
        assert!(!engine.store_id().unwrap().is_empty());
    }

    #[test]
    fn failed_transaction_leaves_no_trace() {
        let engine = Engine::new(OpenOptions::new()).unwrap();
        let before = engine.to_blob().unwrap();
        let result: EngineResult<()> = engine.transaction(|tx| {
            version::create_version(
                tx,
                CreateVersion {
                    name: Some("doomed".to_owned()),
                    ..CreateVersion::default()
                },
            )?;
            Err(EngineError::not_found("thing", "x"))
        });
        assert!(result.is_err());
        assert_eq!(engine.to_blob().unwrap(), before);
    }

    #[test]
    fn blob_reopen_keeps_store_id() {
        let engine = Engine::new(OpenOptions::new()).unwrap();
        let reopened = Engine::open(&engine.to_blob().unwrap(), OpenOptions::new()).unwrap();
        assert_eq!(reopened.store_id().unwrap(), engine.store_id().unwrap());
        assert_ne!(reopened.session(), engine.session());
    }

    #[test]
    fn configured_deterministic_mode_applies_at_bootstrap() {
        let mut config = EngineConfig::default();
        config.engine.deterministic_mode = true;
        config.engine.main_version_name = "trunk".to_owned();
        let engine = Engine::new(OpenOptions::new().with_config(config)).unwrap();
        assert_eq!(engine.session().as_str(), "deterministic-session-0");
        assert_eq!(engine.active_version().unwrap().name, "trunk");
        assert!(engine.read(|view| context::is_deterministic(view)).unwrap());
    }
}
