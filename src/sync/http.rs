//! HTTP transport backed by a blocking `reqwest` client.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

use super::transport::{RawResponse, Transport, TransportError};

/// Posts protocol requests to `{endpoint}{path}`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    /// Build a transport for `endpoint` (e.g. `https://sync.example.com`).
    ///
    /// # Errors
    /// Returns [`TransportError::Unavailable`] if the client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("strata/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Unavailable {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        let endpoint = endpoint.into().trim_end_matches('/').to_owned();
        Ok(Self { client, endpoint })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn classify(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            message: err.to_string(),
        }
    } else {
        TransportError::Unavailable {
            message: err.to_string(),
        }
    }
}

impl Transport for HttpTransport {
    fn post(&self, path: &str, body: &[u8]) -> Result<RawResponse, TransportError> {
        let url = format!("{}{path}", self.endpoint);
        tracing::debug!(%url, bytes = body.len(), "sync request");
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .map_err(|e| classify(&e))?;
        let status = response.status().as_u16();
        let bytes = response.bytes().map_err(|e| classify(&e))?;
        Ok(RawResponse::new(status, bytes.to_vec()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_drops_trailing_slash() {
        let transport = HttpTransport::new("http://localhost:3005/", Duration::from_secs(1)).unwrap();
        assert_eq!(transport.endpoint(), "http://localhost:3005");
    }

    #[test]
    fn unreachable_endpoint_is_retryable() {
        // Port 9 (discard) on localhost is closed in test environments.
        let transport = HttpTransport::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = transport.post("/pull", b"{}").unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }
}
