//! Blob store capability consumed by the upload engine.
//!
//! The engine treats the store as a black box: named blobs written from and
//! read back as byte streams. Adapters live next to this module
//! (`disk_store`, `memory_store`).

use async_trait::async_trait;
use std::{collections::HashMap, io, pin::Pin, time::Duration};
use thiserror::Error;
use tokio::io::AsyncRead;

/// Owned, boxed reader handed to and returned from a store.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("invalid blob name `{0}`")]
    InvalidName(String),
    #[error("{0} is not supported by this store")]
    Unsupported(&'static str),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobStoreError>;

const MAX_BLOB_NAME_LEN: usize = 1024;

/// Object sink the engine persists chunks and assembled objects into.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Short adapter name reported with storage events (e.g. `disk`).
    fn kind(&self) -> &'static str;

    /// Drain `reader` into the blob `name`, replacing any previous content.
    /// Returns the canonical name the blob is stored under.
    async fn store(&self, name: &str, reader: BlobReader) -> BlobResult<String>;

    /// Open a reader over an existing blob.
    async fn get_reader(&self, name: &str) -> BlobResult<BlobReader>;

    /// Remove a blob, or an empty prefix directory where the store has them.
    async fn delete(&self, name: &str) -> BlobResult<()>;

    /// Remove every blob whose name starts with `prefix/`, plus the prefix
    /// itself where the store has directories. Returns how many blobs were
    /// removed; a prefix with nothing under it is not an error.
    async fn delete_prefix(&self, prefix: &str) -> BlobResult<u64> {
        validate_blob_name(prefix)?;
        let scope = format!("{}/", prefix.trim_end_matches('/'));
        let mut removed = 0;
        for name in self.list().await? {
            if !name.starts_with(&scope) {
                continue;
            }
            match self.delete(&name).await {
                Ok(()) => removed += 1,
                Err(BlobStoreError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(removed)
    }

    async fn exists(&self, name: &str) -> bool;

    async fn get_size(&self, name: &str) -> BlobResult<u64>;

    /// Public URL for `name`, empty when the store is not publicly reachable.
    fn get_url(&self, name: &str) -> String;

    /// Time-bounded URL for `name`.
    fn get_signed_url(&self, name: &str, ttl: Duration) -> BlobResult<String>;

    /// All blob names, sorted.
    async fn list(&self) -> BlobResult<Vec<String>>;

    async fn get_bucket_info(&self) -> BlobResult<HashMap<String, String>>;

    async fn close(&self) -> BlobResult<()>;
}

/// Basic name validation to avoid trivial path traversal vectors.
///
/// Rejects empty or overlong names, names that begin or end with `/`,
/// contain `..` or a `.` segment, backslashes or control characters.
pub fn validate_blob_name(name: &str) -> BlobResult<()> {
    let invalid = name.is_empty()
        || name.len() > MAX_BLOB_NAME_LEN
        || name.starts_with('/')
        || name.ends_with('/')
        || name.contains("..")
        || name.split('/').any(|segment| segment == ".")
        || name.contains("//")
        || name
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(BlobStoreError::InvalidName(name.to_string()));
    }
    Ok(())
}
