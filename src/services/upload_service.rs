//! src/services/upload_service.rs
//!
//! UploadService, the resumable upload engine. Sessions live in an
//! in-memory registry; chunk payloads and assembled objects go to a
//! pluggable `BlobStore` under `chunks/<id>/chunk_<n>` and
//! `uploads/<id>/<file name>`.
//!
//! Locking: the registry lock covers only the id map. Chunk writes and
//! assembly hold the session's write lock for their whole duration, which
//! makes duplicate detection and insertion atomic and serializes them with
//! status promotion.

use crate::{
    config::UploadConfig,
    models::{
        session::{
            ChunkMetadata, SessionSnapshot, SessionState, UploadSession, UploadStatus,
            chunk_blob_name, chunk_prefix,
        },
        upload::UploadResult,
    },
    services::{
        admission, assembler,
        blob_store::{BlobResult, BlobStore, BlobStoreError},
        observer::{NoopObserver, Observer, UploadHook},
        registry::SessionRegistry,
    },
};
use chrono::Utc;
use std::{
    future::Future,
    io::{self, Cursor},
    sync::Arc,
    time::Instant,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Largest up-front allocation made while draining a chunk body.
const MAX_PREALLOC: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("file size {size} exceeds the maximum of {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("mime type `{0}` is not allowed")]
    TypeNotAllowed(String),
    #[error("upload session `{0}` not found")]
    SessionNotFound(String),
    #[error("chunk index {index} out of range (total chunks {total})")]
    BadIndex { index: i64, total: u64 },
    #[error("chunk {0} has already been uploaded")]
    Duplicate(u64),
    #[error("chunk {index} has the wrong size: expected {expected} bytes, got {actual}")]
    ChunkSizeMismatch {
        index: u64,
        expected: u64,
        actual: u64,
    },
    #[error("upload incomplete: {received} of {total} chunks received")]
    Incomplete { received: u64, total: u64 },
    #[error("failed to read chunk body: {0}")]
    ReadError(#[source] io::Error),
    #[error("blob store error: {0}")]
    Store(#[from] BlobStoreError),
    #[error("assembly failed: {0}")]
    Assembly(String),
    #[error("operation cancelled")]
    Cancelled,
}

pub type UploadOutcome<T> = Result<T, UploadError>;

/// Resumable upload engine shared by all request handlers.
///
/// Cheap to clone; every clone shares the same registry, store and
/// background task tracker.
#[derive(Clone)]
pub struct UploadService {
    store: Arc<dyn BlobStore>,
    registry: Arc<SessionRegistry>,
    config: Arc<UploadConfig>,
    observer: Arc<dyn Observer>,
    hooks: Arc<Vec<Arc<dyn UploadHook>>>,
    background: TaskTracker,
}

impl UploadService {
    pub fn new(store: Arc<dyn BlobStore>, config: UploadConfig) -> Self {
        Self {
            store,
            registry: Arc::new(SessionRegistry::new()),
            config: Arc::new(config),
            observer: Arc::new(NoopObserver),
            hooks: Arc::new(Vec::new()),
            background: TaskTracker::new(),
        }
    }

    /// Replace the event sink (defaults to `NoopObserver`).
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Register a success/failure hook. Hooks run in registration order.
    pub fn with_hook(mut self, hook: Arc<dyn UploadHook>) -> Self {
        Arc::make_mut(&mut self.hooks).push(hook);
        self
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub async fn active_sessions(&self) -> usize {
        self.registry.len().await
    }

    /// Admit a new upload and register its session.
    pub async fn initiate_upload(
        &self,
        ctx: &CancellationToken,
        file_name: &str,
        total_size: u64,
        mime_type: &str,
        chunk_size: i64,
    ) -> UploadOutcome<SessionSnapshot> {
        let chunk_size =
            match admission::admit(&self.config, file_name, total_size, mime_type, chunk_size) {
                Ok(size) => size,
                Err(err) => {
                    self.observer
                        .upload_errored(ctx, file_name, &err.to_string());
                    return Err(err);
                }
            };

        let id = Uuid::new_v4().simple().to_string();
        let session = Arc::new(UploadSession::new(
            id,
            file_name.to_string(),
            total_size,
            chunk_size,
            mime_type.to_string(),
        ));
        let snapshot = {
            let state = session.state().read().await;
            session.snapshot(&state)
        };
        self.registry.create(session).await;

        info!(
            session_id = %snapshot.id,
            file_name,
            total_size,
            chunk_size,
            total_chunks = snapshot.total_chunks,
            "upload session created"
        );
        self.observer.upload_started(ctx, file_name, total_size);
        Ok(snapshot)
    }

    /// Persist chunk `index` of `session_id` from `body`.
    ///
    /// The body is drained fully into memory (at most one byte past the
    /// expected chunk length) before anything is written, so a failed or
    /// cancelled read records nothing.
    pub async fn upload_chunk<R>(
        &self,
        ctx: &CancellationToken,
        session_id: &str,
        index: i64,
        body: R,
    ) -> UploadOutcome<ChunkMetadata>
    where
        R: AsyncRead + Send + Unpin,
    {
        let session = self.session(session_id).await?;
        let mut state = session.state().write().await;
        if state.closed {
            return Err(UploadError::SessionNotFound(session_id.to_string()));
        }

        let index = admission::check_chunk_index(session.total_chunks, index)?;
        if state.chunks.contains_key(&index) {
            return Err(UploadError::Duplicate(index));
        }

        let expected = session.expected_chunk_size(index);
        let data = cancellable(ctx, drain_body(body, expected))
            .await?
            .map_err(UploadError::ReadError)?;
        let actual = data.len() as u64;
        if actual != expected {
            return Err(UploadError::ChunkSizeMismatch {
                index,
                expected,
                actual,
            });
        }

        let digest = format!("{:x}", md5::compute(&data));
        let name = chunk_blob_name(&session.id, index);
        self.blob_op(ctx, "store", self.store.store(&name, Box::pin(Cursor::new(data))))
            .await?;

        let meta = ChunkMetadata {
            index,
            size: actual,
            digest,
            uploaded_at: Utc::now(),
        };
        state.chunks.insert(index, meta.clone());
        state.touch();

        debug!(
            session_id,
            index,
            size = actual,
            received = state.chunks.len(),
            total = session.total_chunks,
            "chunk stored"
        );
        Ok(meta)
    }

    /// Current view of a session.
    ///
    /// Once every chunk has arrived an `Uploading` session is promoted to
    /// `AssemblyPending`; nothing is assembled until `complete_upload`.
    pub async fn get_status(
        &self,
        _ctx: &CancellationToken,
        session_id: &str,
    ) -> UploadOutcome<SessionSnapshot> {
        let session = self.session(session_id).await?;
        {
            let state = session.state().read().await;
            if !needs_promotion(&session, &state) {
                return Ok(session.snapshot(&state));
            }
        }

        let mut state = session.state().write().await;
        if needs_promotion(&session, &state) {
            state.status = UploadStatus::AssemblyPending;
            state.touch();
            debug!(session_id, "all chunks received, assembly pending");
        }
        Ok(session.snapshot(&state))
    }

    /// Assemble all chunks of `session_id` into the final blob.
    ///
    /// Completing an already completed session replays the stored result.
    /// Any assembly failure, cancellation included, marks the session
    /// `Failed` for good.
    pub async fn complete_upload(
        &self,
        ctx: &CancellationToken,
        session_id: &str,
    ) -> UploadOutcome<UploadResult> {
        let session = self.session(session_id).await?;
        let mut state = session.state().write().await;
        if state.closed {
            return Err(UploadError::SessionNotFound(session_id.to_string()));
        }

        match state.status {
            UploadStatus::Completed => {
                if let Some(result) = &state.result {
                    return Ok(result.clone());
                }
            }
            UploadStatus::Failed => {
                return Err(UploadError::Assembly(
                    "upload previously failed and cannot be completed".into(),
                ));
            }
            UploadStatus::Uploading | UploadStatus::AssemblyPending => {}
        }

        let received = state.chunks.len() as u64;
        if received != session.total_chunks {
            return Err(UploadError::Incomplete {
                received,
                total: session.total_chunks,
            });
        }

        let outcome = assembler::assemble(self, ctx, &session, &state).await;
        let elapsed = (Utc::now() - session.created_at)
            .to_std()
            .unwrap_or_default();

        match outcome {
            Ok(result) => {
                state.status = UploadStatus::Completed;
                state.result = Some(result.clone());
                state.touch();
                drop(state);

                info!(
                    session_id,
                    path = %result.path,
                    size = result.size,
                    digest = %result.digest,
                    "upload assembled"
                );
                self.schedule_chunk_cleanup(session.id.clone());
                self.observer
                    .upload_finished(ctx, &session.file_name, session.total_size, elapsed, true);
                self.run_success_hooks(ctx, &result).await;
                Ok(result)
            }
            Err(err) => {
                state.status = UploadStatus::Failed;
                state.touch();
                drop(state);

                error!(session_id, "upload assembly failed: {}", err);
                self.observer
                    .upload_errored(ctx, &session.file_name, &err.to_string());
                self.observer
                    .upload_finished(ctx, &session.file_name, session.total_size, elapsed, false);
                self.run_failure_hooks(ctx, session_id, &err).await;
                Err(err)
            }
        }
    }

    /// Drop a session and reclaim its chunks in the background.
    pub async fn abort_upload(&self, ctx: &CancellationToken, session_id: &str) -> UploadOutcome<()> {
        let session = self
            .registry
            .remove(session_id)
            .await
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;

        info!(session_id, "upload session aborted");
        let elapsed = (Utc::now() - session.created_at)
            .to_std()
            .unwrap_or_default();
        self.observer
            .upload_finished(ctx, &session.file_name, session.total_size, elapsed, false);
        self.schedule_teardown(session);
        Ok(())
    }

    /// Evict every session idle for at least the configured TTL.
    ///
    /// Sessions whose lock is currently held are in active use and skipped.
    /// Returns the number of sessions evicted.
    pub async fn evict_expired(&self, _ctx: &CancellationToken) -> usize {
        let ttl = chrono::Duration::from_std(self.config.session_ttl)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let now = Utc::now();

        let mut evicted = 0;
        for session in self.registry.all().await {
            let expired = match session.state().try_read() {
                Ok(state) => now.signed_duration_since(state.updated_at) >= ttl,
                Err(_) => false,
            };
            if !expired {
                continue;
            }
            if let Some(session) = self.registry.remove(&session.id).await {
                info!(session_id = %session.id, "evicting idle upload session");
                self.schedule_teardown(session);
                evicted += 1;
            }
        }
        evicted
    }

    /// Wait until every scheduled cleanup has finished.
    pub async fn wait_for_background(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    async fn session(&self, session_id: &str) -> UploadOutcome<Arc<UploadSession>> {
        self.registry
            .get(session_id)
            .await
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))
    }

    /// Run a blob store call under `ctx`, timing it for the observer.
    pub(crate) async fn blob_op<T, F>(
        &self,
        ctx: &CancellationToken,
        op: &'static str,
        fut: F,
    ) -> UploadOutcome<T>
    where
        F: Future<Output = BlobResult<T>>,
    {
        let started = Instant::now();
        let outcome = cancellable(ctx, fut).await;
        let success = matches!(outcome, Ok(Ok(_)));
        self.observer
            .storage_op(ctx, op, self.store.kind(), started.elapsed(), success);
        Ok(outcome??)
    }

    /// Mark `session` closed once in-flight writers release it, then delete
    /// everything staged under its chunk prefix.
    fn schedule_teardown(&self, session: Arc<UploadSession>) {
        let service = self.clone();
        self.background.spawn(async move {
            session.state().write().await.closed = true;
            service.delete_chunks(&session.id).await;
        });
    }

    fn schedule_chunk_cleanup(&self, session_id: String) {
        let service = self.clone();
        self.background.spawn(async move {
            service.delete_chunks(&session_id).await;
        });
    }

    /// Best-effort removal of a session's chunk prefix; failures are logged,
    /// never surfaced.
    ///
    /// Works from the prefix rather than the recorded chunks so that a write
    /// cut short after the store persisted it is reclaimed too.
    async fn delete_chunks(&self, session_id: &str) {
        let ctx = CancellationToken::new();
        let prefix = chunk_prefix(session_id);
        match self
            .blob_op(&ctx, "delete_prefix", self.store.delete_prefix(&prefix))
            .await
        {
            Ok(removed) => debug!(session_id, removed, "deleted chunk blobs"),
            Err(err) => {
                warn!(session_id, blob = %prefix, "chunk cleanup failed: {}", err);
                self.observer
                    .upload_errored(&ctx, &prefix, &format!("cleanup failed: {}", err));
            }
        }
    }

    async fn run_success_hooks(&self, ctx: &CancellationToken, result: &UploadResult) {
        for hook in self.hooks.iter() {
            let call = hook.on_success(ctx, result);
            if tokio::time::timeout(self.config.hook_timeout, call)
                .await
                .is_err()
            {
                warn!(path = %result.path, "success hook timed out");
            }
        }
    }

    async fn run_failure_hooks(&self, ctx: &CancellationToken, session_id: &str, err: &UploadError) {
        for hook in self.hooks.iter() {
            let call = hook.on_failure(ctx, session_id, err);
            if tokio::time::timeout(self.config.hook_timeout, call)
                .await
                .is_err()
            {
                warn!(session_id, "failure hook timed out");
            }
        }
    }
}

fn needs_promotion(session: &UploadSession, state: &SessionState) -> bool {
    state.status == UploadStatus::Uploading && state.chunks.len() as u64 == session.total_chunks
}

/// Race `fut` against cancellation of `ctx`.
pub(crate) async fn cancellable<F, T>(ctx: &CancellationToken, fut: F) -> UploadOutcome<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(UploadError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Read at most `expected + 1` bytes so an oversized body is detected
/// without buffering all of it.
async fn drain_body<R>(body: R, expected: u64) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(expected.min(MAX_PREALLOC) as usize);
    body.take(expected.saturating_add(1))
        .read_to_end(&mut buf)
        .await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_body_stops_one_byte_past_expected() {
        let body = vec![7u8; 100];
        let drained = drain_body(&body[..], 10).await.unwrap();
        assert_eq!(drained.len(), 11);

        let drained = drain_body(&body[..10], 10).await.unwrap();
        assert_eq!(drained.len(), 10);
    }

    #[tokio::test]
    async fn cancellable_prefers_cancellation() {
        let ctx = CancellationToken::new();
        assert!(matches!(cancellable(&ctx, async { 1 }).await, Ok(1)));

        ctx.cancel();
        assert!(matches!(
            cancellable(&ctx, async { 1 }).await,
            Err(UploadError::Cancelled)
        ));
    }
}
