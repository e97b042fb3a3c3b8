//! JSON wire contract of the sync protocol.
//!
//! ```text
//! POST /pull {store_id, vector_clock}        → 200 {data, vector_clock} | 404 | 500 {code, message}
//! POST /push {store_id, vector_clock, data}  → 201 | 404 | 400 {code: "FAILED_TO_INSERT_DATA", message}
//! ```
//!
//! `data` maps table names to rows. Mutation log entries travel under
//! `mutation_log` next to the synced tables they describe.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::clock::VectorClock;
use super::transport::{RawResponse, TransportError};

pub const PULL_PATH: &str = "/pull";
pub const PUSH_PATH: &str = "/push";

/// Table name carrying mutation log entries in [`SyncData`].
pub const MUTATION_LOG_TABLE: &str = "mutation_log";

pub const FAILED_TO_INSERT_DATA: &str = "FAILED_TO_INSERT_DATA";
pub const FAILED_TO_READ_STORE: &str = "FAILED_TO_READ_STORE";
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

/// One row on the wire. `value: None` is a deletion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRow {
    pub row_id: String,
    pub value: Option<Value>,
}

/// Rows by table name.
pub type SyncData = BTreeMap<String, Vec<SyncRow>>;

/// Number of rows in `data`, log entries excluded.
#[must_use]
pub fn row_count(data: &SyncData) -> usize {
    data.iter()
        .filter(|(table, _)| table.as_str() != MUTATION_LOG_TABLE)
        .map(|(_, rows)| rows.len())
        .sum()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub store_id: String,
    pub vector_clock: VectorClock,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    pub data: SyncData,
    /// The server's clock after the pull, so the client knows what to push.
    #[serde(default)]
    pub vector_clock: VectorClock,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub store_id: String,
    pub vector_clock: VectorClock,
    pub data: SyncData,
}

/// Error body of 400 and 500 responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, TransportError> {
    serde_json::to_vec(value).map_err(|e| TransportError::Decode {
        message: e.to_string(),
    })
}

pub(crate) fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(body).map_err(|e| TransportError::Decode {
        message: e.to_string(),
    })
}

fn error_body(response: &RawResponse) -> ErrorBody {
    serde_json::from_slice(&response.body).unwrap_or_else(|_| ErrorBody {
        code: "UNKNOWN".to_owned(),
        message: String::from_utf8_lossy(&response.body).into_owned(),
    })
}

/// Map a non-success status onto a [`TransportError`].
fn failure(response: &RawResponse, store_id: &str) -> TransportError {
    match response.status {
        404 => TransportError::StoreNotFound {
            store_id: store_id.to_owned(),
        },
        status if status >= 500 => {
            let ErrorBody { code, message } = error_body(response);
            TransportError::Server {
                status,
                code,
                message,
            }
        }
        status => {
            let ErrorBody { code, message } = error_body(response);
            TransportError::Rejected {
                status,
                code,
                message,
            }
        }
    }
}

/// Interpret the response to a pull.
///
/// # Errors
/// Returns the [`TransportError`] matching a non-200 status, or
/// [`TransportError::Decode`] for a malformed body.
pub fn read_pull_response(response: &RawResponse, store_id: &str) -> Result<PullResponse, TransportError> {
    if response.status == 200 {
        decode(&response.body)
    } else {
        Err(failure(response, store_id))
    }
}

/// Interpret the response to a push.
///
/// # Errors
/// Returns the [`TransportError`] matching a non-201 status.
pub fn read_push_response(response: &RawResponse, store_id: &str) -> Result<(), TransportError> {
    if response.status == 201 {
        Ok(())
    } else {
        Err(failure(response, store_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let not_found = RawResponse::new(404, Vec::new());
        assert_eq!(
            read_push_response(&not_found, "s"),
            Err(TransportError::StoreNotFound {
                store_id: "s".to_owned()
            })
        );

        let body = br#"{"code":"FAILED_TO_INSERT_DATA","message":"bad row"}"#.to_vec();
        let rejected = RawResponse::new(400, body);
        match read_push_response(&rejected, "s") {
            Err(TransportError::Rejected { status, code, .. }) => {
                assert_eq!(status, 400);
                assert_eq!(code, FAILED_TO_INSERT_DATA);
            }
            other => panic!("unexpected: {other:?}"),
        }

        let broken = RawResponse::new(500, b"boom".to_vec());
        assert!(matches!(
            read_pull_response(&broken, "s"),
            Err(TransportError::Server { status: 500, .. })
        ));
        assert_eq!(read_push_response(&RawResponse::new(201, Vec::new()), "s"), Ok(()));
    }
}
