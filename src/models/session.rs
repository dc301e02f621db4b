//! Represents an in-flight chunked upload session and its chunks.

use crate::models::upload::UploadResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Lifecycle of a session.
///
/// `AssemblyPending` means every chunk has arrived but nothing has been
/// assembled yet; only `Completed` guarantees the final blob exists.
/// `Failed` is terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Uploading,
    AssemblyPending,
    Completed,
    Failed,
}

/// Metadata recorded for each accepted chunk.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChunkMetadata {
    /// Zero-based position of the chunk within the object.
    pub index: u64,

    /// Bytes stored for this chunk.
    pub size: u64,

    /// MD5 of the chunk payload, lowercase hex.
    pub digest: String,

    pub uploaded_at: DateTime<Utc>,
}

/// Mutable part of a session, guarded by the session's own lock.
#[derive(Debug)]
pub struct SessionState {
    pub status: UploadStatus,

    /// Accepted chunks keyed by index; iteration order is ascending.
    pub chunks: BTreeMap<u64, ChunkMetadata>,

    pub updated_at: DateTime<Utc>,

    /// Result of the successful assembly, replayed on repeated completion.
    pub result: Option<UploadResult>,

    /// Set once the session has been torn down (abort or eviction).
    /// Writers holding a stale handle must not record anything after this.
    pub closed: bool,
}

impl SessionState {
    /// Refresh `updated_at`, never moving it backwards.
    pub fn touch(&mut self) {
        self.updated_at = self.updated_at.max(Utc::now());
    }
}

/// One chunked upload.
///
/// The immutable declaration sits outside the lock so the registry and the
/// sweeper can read identity and sizes without contending with writers.
#[derive(Debug)]
pub struct UploadSession {
    /// 32 lowercase hex characters.
    pub id: String,
    pub file_name: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    state: RwLock<SessionState>,
}

impl UploadSession {
    /// Build a fresh session in the `Uploading` state.
    ///
    /// `chunk_size` must be non-zero; admission guarantees it.
    pub fn new(
        id: String,
        file_name: String,
        total_size: u64,
        chunk_size: u64,
        mime_type: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            file_name,
            total_size,
            chunk_size,
            total_chunks: total_size.div_ceil(chunk_size),
            mime_type,
            created_at: now,
            state: RwLock::new(SessionState {
                status: UploadStatus::Uploading,
                chunks: BTreeMap::new(),
                updated_at: now,
                result: None,
                closed: false,
            }),
        }
    }

    pub fn state(&self) -> &RwLock<SessionState> {
        &self.state
    }

    /// Exact byte length chunk `index` must have.
    ///
    /// Every chunk is `chunk_size` long except the last, which carries the
    /// remainder of `total_size`.
    pub fn expected_chunk_size(&self, index: u64) -> u64 {
        if index + 1 == self.total_chunks {
            self.total_size - index * self.chunk_size
        } else {
            self.chunk_size
        }
    }

    /// Serializable view of the session as seen under `state`'s lock.
    pub fn snapshot(&self, state: &SessionState) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            file_name: self.file_name.clone(),
            total_size: self.total_size,
            chunk_size: self.chunk_size,
            total_chunks: self.total_chunks,
            mime_type: self.mime_type.clone(),
            status: state.status,
            chunks: state.chunks.clone(),
            created_at: self.created_at,
            updated_at: state.updated_at,
        }
    }
}

/// JSON representation of a session returned by initiate and status.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SessionSnapshot {
    pub id: String,
    pub file_name: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub mime_type: String,
    pub status: UploadStatus,
    pub chunks: BTreeMap<u64, ChunkMetadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Staging blob name for one chunk: `chunks/<session>/chunk_<index>`.
pub fn chunk_blob_name(session_id: &str, index: u64) -> String {
    format!("{}/chunk_{}", chunk_prefix(session_id), index)
}

/// Prefix under which all of a session's chunks are staged.
pub fn chunk_prefix(session_id: &str) -> String {
    format!("chunks/{}", session_id)
}

/// Name of the assembled object: `uploads/<session>/<file name>`.
pub fn final_blob_name(session_id: &str, file_name: &str) -> String {
    format!("uploads/{}/{}", session_id, file_name)
}
