//! Request and result payloads for the upload endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chunk size substituted when the client omits `chunk_size` (1 MiB).
pub const DEFAULT_CHUNK_SIZE: i64 = 1024 * 1024;

fn default_chunk_size() -> i64 {
    DEFAULT_CHUNK_SIZE
}

/// Body of `POST /uploads` (initiate).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InitiateUploadReq {
    pub file_name: String,
    pub total_size: u64,
    pub mime_type: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,
}

/// Outcome of a successful assembly.
///
/// Once returned, the final blob at `path` belongs to the caller; the engine
/// never deletes it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadResult {
    /// Client-declared file name.
    pub original_name: String,

    /// Size of the assembled object in bytes.
    pub size: u64,

    /// Client-declared content type.
    pub mime_type: String,

    /// Public URL of the final blob, empty when the store has none.
    pub url: String,

    /// Canonical blob name returned by the store.
    pub path: String,

    /// SHA-256 of the assembled object, lowercase hex.
    pub digest: String,

    pub completed_at: DateTime<Utc>,
}
