//! Whole-store export and import.
//!
//! A blob is a JSON envelope:
//!
//! ```text
//! {
//!   "format": "strata-store",
//!   "format_version": 1,
//!   "checksum": "<sha256 hex over the entries>",
//!   "entries": [["<base64 key>", "<base64 value>"], ...]
//! }
//! ```
//!
//! Entries are in key order, so exporting the same store twice yields the
//! same bytes.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strata_kv::KvPair;

use crate::error::{EngineError, EngineResult};

pub const BLOB_FORMAT: &str = "strata-store";
pub const BLOB_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    format: String,
    format_version: u32,
    checksum: String,
    entries: Vec<(String, String)>,
}

fn corrupted(detail: impl Into<String>) -> EngineError {
    EngineError::Corrupted {
        detail: detail.into(),
    }
}

/// SHA-256 over length-prefixed keys and values, hex-encoded.
fn checksum(pairs: &[KvPair]) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in pairs {
        hasher.update((key.len() as u64).to_le_bytes());
        hasher.update(key);
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value);
    }
    format!("{:x}", hasher.finalize())
}

/// Serialize exported pairs into a blob.
///
/// # Errors
/// Returns [`EngineError::Serialization`] if the envelope cannot be encoded.
pub fn encode(pairs: &[KvPair]) -> EngineResult<Vec<u8>> {
    let envelope = Envelope {
        format: BLOB_FORMAT.to_owned(),
        format_version: BLOB_FORMAT_VERSION,
        checksum: checksum(pairs),
        entries: pairs
            .iter()
            .map(|(k, v)| (STANDARD.encode(k), STANDARD.encode(v)))
            .collect(),
    };
    serde_json::to_vec(&envelope).map_err(|e| EngineError::serialization("store blob", e))
}

/// Parse a blob back into pairs, checking format and checksum.
///
/// # Errors
/// Returns [`EngineError::Corrupted`] if the blob is not a strata store, has
/// an unsupported format version, or fails its checksum.
pub fn decode(blob: &[u8]) -> EngineResult<Vec<KvPair>> {
    let envelope: Envelope =
        serde_json::from_slice(blob).map_err(|e| corrupted(format!("blob does not parse: {e}")))?;
    if envelope.format != BLOB_FORMAT {
        return Err(corrupted(format!(
            "blob format is '{}', expected '{BLOB_FORMAT}'",
            envelope.format
        )));
    }
    if envelope.format_version != BLOB_FORMAT_VERSION {
        return Err(corrupted(format!(
            "unsupported blob format version {}",
            envelope.format_version
        )));
    }
    let pairs = envelope
        .entries
        .iter()
        .map(|(k, v)| {
            let key = STANDARD
                .decode(k)
                .map_err(|e| corrupted(format!("entry key is not base64: {e}")))?;
            let value = STANDARD
                .decode(v)
                .map_err(|e| corrupted(format!("entry value is not base64: {e}")))?;
            Ok((key, value))
        })
        .collect::<EngineResult<Vec<KvPair>>>()?;
    let actual = checksum(&pairs);
    if actual != envelope.checksum {
        return Err(corrupted(format!(
            "checksum mismatch: blob says {}, entries hash to {actual}",
            envelope.checksum
        )));
    }
    tracing::debug!(entries = pairs.len(), "decoded store blob");
    Ok(pairs)
}
