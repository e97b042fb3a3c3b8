//! Sync Coordinator: replicating change logs between stores.
//!
//! A round is pull then push. The pull sends the local vector clock and
//! applies whatever the server has that this replica has not seen; the pull
//! response carries the server's clock, so the push can send exactly the
//! entries the server is missing. Both requests are idempotent, and
//! retryable transport failures are retried with jittered backoff up to
//! `sync.max_attempts` times.
//!
//! Requests are built and responses applied inside ordinary engine
//! transactions; no transaction is held open across a network call.

pub mod clock;
#[cfg(feature = "http")]
pub mod http;
pub mod reconcile;
pub mod server;
pub mod transport;
pub mod wire;

use std::time::Duration;

use rand::Rng;

pub use clock::{VectorClock, local_clock};
#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use reconcile::{ApplyReport, collect_unseen, merge_their_state};
pub use server::SyncServer;
pub use transport::{LoopbackTransport, RawResponse, Transport, TransportError};
pub use wire::{PullRequest, PullResponse, PushRequest, SyncData, SyncRow};

use crate::engine::Engine;
use crate::error::EngineResult;

const BASE_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Outcome of one sync round.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// What applying the pulled rows did locally.
    pub pulled: ApplyReport,
    /// Rows sent to the server, log entries excluded.
    pub pushed_rows: usize,
    /// The server's clock as of the pull.
    pub server_clock: VectorClock,
}

/// Drives pull/push rounds for one engine against one transport.
pub struct SyncCoordinator<'e, T: Transport> {
    engine: &'e Engine,
    transport: T,
    store_id: String,
    max_attempts: u32,
}

impl<T: Transport> std::fmt::Debug for SyncCoordinator<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("store_id", &self.store_id)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl<'e, T: Transport> SyncCoordinator<'e, T> {
    /// Coordinator presenting `sync.store_id` from the configuration, or the
    /// engine's own store id when none is configured.
    ///
    /// # Errors
    /// Returns an error if the store id cannot be read.
    pub fn new(engine: &'e Engine, transport: T) -> EngineResult<Self> {
        let sync = &engine.env().config.sync;
        let store_id = match &sync.store_id {
            Some(id) => id.clone(),
            None => engine.store_id()?,
        };
        Ok(Self {
            engine,
            transport,
            max_attempts: sync.max_attempts.max(1),
            store_id,
        })
    }

    /// Present a different store id to the server.
    #[must_use]
    pub fn with_store_id(mut self, store_id: impl Into<String>) -> Self {
        self.store_id = store_id.into();
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Pull what the server has and this replica has not seen, and apply
    /// it in one transaction. Returns the apply report and the server clock.
    ///
    /// # Errors
    /// Returns a transport error after the last failed attempt, or the
    /// error that made applying the rows fail.
    #[tracing::instrument(skip(self), fields(store = %self.store_id))]
    pub fn pull(&self) -> EngineResult<(ApplyReport, VectorClock)> {
        let request = PullRequest {
            store_id: self.store_id.clone(),
            vector_clock: self.engine.read(|view| local_clock(view))?,
        };
        let body = wire::encode(&request)?;
        let response = self.with_retry("pull", || {
            let raw = self.transport.post(wire::PULL_PATH, &body)?;
            wire::read_pull_response(&raw, &self.store_id)
        })?;
        let PullResponse { data, vector_clock } = response;
        let rows = wire::row_count(&data);
        let report = if data.is_empty() {
            ApplyReport::default()
        } else {
            self.engine
                .transaction(|tx| merge_their_state(tx, &vector_clock, data))?
        };
        tracing::info!(rows, applied = report.applied, "pulled");
        Ok((report, vector_clock))
    }

    /// Push every local entry `server_clock` has not seen. Returns the
    /// number of rows sent; nothing is sent when the server is up to date.
    ///
    /// # Errors
    /// Returns a transport error after the last failed attempt.
    #[tracing::instrument(skip(self, server_clock), fields(store = %self.store_id))]
    pub fn push(&self, server_clock: &VectorClock) -> EngineResult<usize> {
        let (data, vector_clock) = self.engine.read(|view| {
            Ok((collect_unseen(view, server_clock)?, local_clock(view)?))
        })?;
        if data.is_empty() {
            tracing::debug!("server is up to date");
            return Ok(0);
        }
        let rows = wire::row_count(&data);
        let request = PushRequest {
            store_id: self.store_id.clone(),
            vector_clock,
            data,
        };
        let body = wire::encode(&request)?;
        self.with_retry("push", || {
            let raw = self.transport.post(wire::PUSH_PATH, &body)?;
            wire::read_push_response(&raw, &self.store_id)
        })?;
        tracing::info!(rows, "pushed");
        Ok(rows)
    }

    /// One full round: pull, then push what the server is missing.
    ///
    /// # Errors
    /// Returns the first pull or push error.
    pub fn sync(&self) -> EngineResult<SyncReport> {
        let (pulled, server_clock) = self.pull()?;
        let pushed_rows = self.push(&server_clock)?;
        Ok(SyncReport {
            pulled,
            pushed_rows,
            server_clock,
        })
    }

    fn with_retry<R>(
        &self,
        what: &str,
        mut attempt: impl FnMut() -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let mut n = 1;
        loop {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && n < self.max_attempts => {
                    let delay = backoff(n);
                    tracing::warn!(
                        what,
                        attempt = n,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "sync request failed, retrying"
                    );
                    std::thread::sleep(delay);
                    n += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Exponential backoff with up to 10% jitter.
fn backoff(attempt: u32) -> Duration {
    let base = BASE_BACKOFF
        .saturating_mul(1 << attempt.saturating_sub(1).min(16))
        .min(MAX_BACKOFF);
    let jitter_ms = rand::rng().random_range(0..=base.as_millis() / 10);
    base + Duration::from_millis(u64::try_from(jitter_ms).unwrap_or(0))
}
