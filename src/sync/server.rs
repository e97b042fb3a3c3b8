//! Server side of the sync protocol, independent of any HTTP stack.
//!
//! An HTTP host forwards `POST /pull` and `POST /push` bodies to
//! [`SyncServer::handle`] and writes back the returned status and body.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::clock;
use super::reconcile;
use super::transport::RawResponse;
use super::wire::{
    self, ErrorBody, FAILED_TO_INSERT_DATA, FAILED_TO_READ_STORE, INVALID_REQUEST, PULL_PATH,
    PUSH_PATH, PullRequest, PullResponse, PushRequest,
};
use crate::engine::Engine;
use crate::error::EngineResult;

/// Hosts stores by store id.
#[derive(Default)]
pub struct SyncServer {
    stores: RwLock<BTreeMap<String, Arc<Engine>>>,
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("stores", &self.stores.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

fn error_response(status: u16, code: &str, message: impl Into<String>) -> RawResponse {
    let body = ErrorBody {
        code: code.to_owned(),
        message: message.into(),
    };
    RawResponse::new(status, serde_json::to_vec(&body).unwrap_or_default())
}

impl SyncServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `engine` under its store id. Returns the id.
    ///
    /// # Errors
    /// Returns an error if the store id cannot be read.
    pub fn host(&self, engine: Arc<Engine>) -> EngineResult<String> {
        let store_id = engine.store_id()?;
        tracing::info!(store = %store_id, "hosting store");
        self.stores.write().insert(store_id.clone(), engine);
        Ok(store_id)
    }

    fn store(&self, store_id: &str) -> Option<Arc<Engine>> {
        self.stores.read().get(store_id).cloned()
    }

    /// Dispatch one protocol request.
    #[tracing::instrument(skip(self, body), fields(bytes = body.len()))]
    pub fn handle(&self, path: &str, body: &[u8]) -> RawResponse {
        match path {
            PULL_PATH => self.pull(body),
            PUSH_PATH => self.push(body),
            _ => error_response(404, "UNKNOWN_PATH", format!("no handler for '{path}'")),
        }
    }

    fn pull(&self, body: &[u8]) -> RawResponse {
        let request: PullRequest = match wire::decode(body) {
            Ok(request) => request,
            Err(e) => return error_response(400, INVALID_REQUEST, e.to_string()),
        };
        let Some(engine) = self.store(&request.store_id) else {
            return RawResponse::new(404, Vec::new());
        };
        let result = engine.read(|view| {
            let data = reconcile::collect_unseen(view, &request.vector_clock)?;
            let vector_clock = clock::local_clock(view)?;
            Ok(PullResponse { data, vector_clock })
        });
        match result.map(|response| wire::encode(&response)) {
            Ok(Ok(bytes)) => {
                tracing::debug!(store = %request.store_id, "served pull");
                RawResponse::new(200, bytes)
            }
            Ok(Err(e)) => error_response(500, FAILED_TO_READ_STORE, e.to_string()),
            Err(e) => {
                tracing::warn!(store = %request.store_id, error = %e, "pull failed");
                error_response(500, FAILED_TO_READ_STORE, e.to_string())
            }
        }
    }

    fn push(&self, body: &[u8]) -> RawResponse {
        let request: PushRequest = match wire::decode(body) {
            Ok(request) => request,
            Err(e) => return error_response(400, INVALID_REQUEST, e.to_string()),
        };
        let Some(engine) = self.store(&request.store_id) else {
            return RawResponse::new(404, Vec::new());
        };
        let PushRequest {
            store_id,
            vector_clock,
            data,
        } = request;
        match engine.transaction(|tx| reconcile::merge_their_state(tx, &vector_clock, data)) {
            Ok(report) => {
                tracing::debug!(store = %store_id, applied = report.applied, "accepted push");
                RawResponse::new(201, Vec::new())
            }
            Err(e) => {
                tracing::warn!(store = %store_id, error = %e, "push rejected");
                error_response(400, FAILED_TO_INSERT_DATA, e.to_string())
            }
        }
    }
}
