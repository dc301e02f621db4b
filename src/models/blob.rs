//! Represents a blob tracked by the disk store's SQLite index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Index row for a single stored blob.
///
/// The payload itself lives on disk at `base_path/<name>`; this row only
/// carries what `list`, `get_size` and `get_bucket_info` need without
/// touching the filesystem.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct BlobRecord {
    /// Blob name (slash-separated, relative to the store root).
    pub name: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload, lowercase hex.
    pub etag: String,

    /// When the blob was last written.
    pub created_at: DateTime<Utc>,
}
