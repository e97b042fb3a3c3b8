//! Transport abstraction for the sync protocol.
//!
//! A transport posts one JSON body to one protocol path and hands back the
//! status and body. It knows nothing about stores or clocks; the coordinator
//! builds requests and applies responses on its own.

use std::fmt;

use super::server::SyncServer;

/// A raw protocol response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    #[must_use]
    pub const fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }
}

/// Sync transport failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint could not be reached.
    Unavailable { message: String },
    /// The request timed out.
    Timeout { message: String },
    /// The server does not host the store (HTTP 404).
    StoreNotFound { store_id: String },
    /// The server failed to read its store (HTTP 5xx).
    Server {
        status: u16,
        code: String,
        message: String,
    },
    /// The server refused the request (HTTP 4xx other than 404).
    Rejected {
        status: u16,
        code: String,
        message: String,
    },
    /// A response body did not decode.
    Decode { message: String },
}

impl TransportError {
    /// Unavailable, timed-out, not-found and server errors may go away on
    /// retry; a rejected push or an undecodable response will not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. }
                | Self::Timeout { .. }
                | Self::StoreNotFound { .. }
                | Self::Server { .. }
        )
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "sync endpoint unavailable: {message}"),
            Self::Timeout { message } => write!(f, "sync request timed out: {message}"),
            Self::StoreNotFound { store_id } => {
                write!(f, "store '{store_id}' is not hosted by the sync server")
            }
            Self::Server {
                status,
                code,
                message,
            } => write!(f, "sync server error {status} ({code}): {message}"),
            Self::Rejected {
                status,
                code,
                message,
            } => write!(f, "sync request rejected {status} ({code}): {message}"),
            Self::Decode { message } => write!(f, "malformed sync response: {message}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Posts protocol requests.
pub trait Transport {
    /// POST `body` to `path` (`/pull` or `/push`).
    ///
    /// # Errors
    /// Returns a [`TransportError`] when no response was received. HTTP
    /// error statuses are responses, not errors.
    fn post(&self, path: &str, body: &[u8]) -> Result<RawResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn post(&self, path: &str, body: &[u8]) -> Result<RawResponse, TransportError> {
        (**self).post(path, body)
    }
}

/// Drives a [`SyncServer`] in process.
#[derive(Clone, Copy, Debug)]
pub struct LoopbackTransport<'s> {
    server: &'s SyncServer,
}

impl<'s> LoopbackTransport<'s> {
    #[must_use]
    pub const fn new(server: &'s SyncServer) -> Self {
        Self { server }
    }
}

impl Transport for LoopbackTransport<'_> {
    fn post(&self, path: &str, body: &[u8]) -> Result<RawResponse, TransportError> {
        Ok(self.server.handle(path, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability() {
        assert!(TransportError::Timeout { message: "t".into() }.is_retryable());
        assert!(TransportError::StoreNotFound { store_id: "s".into() }.is_retryable());
        assert!(!TransportError::Decode { message: "d".into() }.is_retryable());
        assert!(
            !TransportError::Rejected {
                status: 400,
                code: "FAILED_TO_INSERT_DATA".into(),
                message: "m".into()
            }
            .is_retryable()
        );
    }
}
