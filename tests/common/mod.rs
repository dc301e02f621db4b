//! Shared test utilities.
//! Note: #[allow(dead_code)] because each test file compiles common/ separately.

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use resumable_upload::{
    app,
    config::UploadConfig,
    models::upload::UploadResult,
    services::{
        blob_store::{BlobReader, BlobResult, BlobStore, BlobStoreError},
        memory_store::MemoryBlobStore,
        observer::{Observer, UploadHook},
        upload_service::{UploadError, UploadService},
    },
};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

#[allow(dead_code)]
pub const MIB: usize = 1024 * 1024;

/// Deterministic, non-repeating-looking payload of `len` bytes.
#[allow(dead_code)]
pub fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 251) as u8).collect()
}

/// Split `data` into `chunk_size` pieces, last one possibly shorter.
#[allow(dead_code)]
pub fn split_into_chunks(data: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    data.chunks(chunk_size).map(<[u8]>::to_vec).collect()
}

/// Deterministic permutation of `0..n` driven by a small LCG.
#[allow(dead_code)]
pub fn shuffled(n: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    for i in (1..n).rev() {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let j = (state >> 33) as usize % (i + 1);
        order.swap(i, j);
    }
    order
}

#[allow(dead_code)]
pub async fn read_blob(store: &dyn BlobStore, name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    store
        .get_reader(name)
        .await
        .expect("blob should exist")
        .read_to_end(&mut out)
        .await
        .expect("blob should be readable");
    out
}

/// Engine over a fresh memory store.
#[allow(dead_code)]
pub fn memory_service(config: UploadConfig) -> (UploadService, Arc<MemoryBlobStore>) {
    let store = Arc::new(MemoryBlobStore::default());
    let service = UploadService::new(store.clone(), config);
    (service, store)
}

/// Memory store whose reads and/or writes can be made to fail on demand.
/// With `stall_writes` set, writes land but the call never returns.
#[allow(dead_code)]
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryBlobStore,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub stall_writes: AtomicBool,
}

#[async_trait]
impl BlobStore for FlakyStore {
    fn kind(&self) -> &'static str {
        "flaky"
    }

    async fn store(&self, name: &str, reader: BlobReader) -> BlobResult<String> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BlobStoreError::Io(std::io::Error::other("write refused")));
        }
        let stored = self.inner.store(name, reader).await?;
        if self.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(stored)
    }

    async fn get_reader(&self, name: &str) -> BlobResult<BlobReader> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BlobStoreError::Io(std::io::Error::other("read refused")));
        }
        self.inner.get_reader(name).await
    }

    async fn delete(&self, name: &str) -> BlobResult<()> {
        self.inner.delete(name).await
    }

    async fn exists(&self, name: &str) -> bool {
        self.inner.exists(name).await
    }

    async fn get_size(&self, name: &str) -> BlobResult<u64> {
        self.inner.get_size(name).await
    }

    fn get_url(&self, name: &str) -> String {
        self.inner.get_url(name)
    }

    fn get_signed_url(&self, name: &str, ttl: Duration) -> BlobResult<String> {
        self.inner.get_signed_url(name, ttl)
    }

    async fn list(&self) -> BlobResult<Vec<String>> {
        self.inner.list().await
    }

    async fn get_bucket_info(&self) -> BlobResult<HashMap<String, String>> {
        self.inner.get_bucket_info().await
    }

    async fn close(&self) -> BlobResult<()> {
        Ok(())
    }
}

/// Observer that records a compact line per event.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl Observer for RecordingObserver {
    fn upload_started(&self, _ctx: &CancellationToken, name: &str, size: u64) {
        self.push(format!("start {} {}", name, size));
    }

    fn upload_finished(
        &self,
        _ctx: &CancellationToken,
        name: &str,
        size: u64,
        _duration: Duration,
        success: bool,
    ) {
        self.push(format!("end {} {} {}", name, size, success));
    }

    fn upload_errored(&self, _ctx: &CancellationToken, name: &str, _message: &str) {
        self.push(format!("error {}", name));
    }

    fn storage_op(
        &self,
        _ctx: &CancellationToken,
        op: &str,
        adapter: &str,
        _duration: Duration,
        success: bool,
    ) {
        self.push(format!("op {} {} {}", op, adapter, success));
    }
}

/// Hook that records what it was called with, optionally stalling first.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingHook {
    pub successes: Mutex<Vec<UploadResult>>,
    pub failures: Mutex<Vec<(String, String)>>,
    pub stall: Option<Duration>,
}

#[async_trait]
impl UploadHook for RecordingHook {
    async fn on_success(&self, _ctx: &CancellationToken, result: &UploadResult) {
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        self.successes.lock().unwrap().push(result.clone());
    }

    async fn on_failure(&self, _ctx: &CancellationToken, session_id: &str, error: &UploadError) {
        self.failures
            .lock()
            .unwrap()
            .push((session_id.to_string(), error.to_string()));
    }
}

/// Router plus handles to the engine and its memory store.
#[allow(dead_code)]
pub struct TestServer {
    pub router: Router,
    pub service: UploadService,
    pub store: Arc<MemoryBlobStore>,
}

#[allow(dead_code)]
impl TestServer {
    pub fn new() -> Self {
        Self::with_config(UploadConfig::default())
    }

    pub fn with_config(config: UploadConfig) -> Self {
        let (service, store) = memory_service(config);
        Self::from_parts(service, store)
    }

    pub fn with_observer(observer: Arc<dyn Observer>) -> Self {
        let (service, store) = memory_service(UploadConfig::default());
        Self::from_parts(service.with_observer(observer), store)
    }

    fn from_parts(service: UploadService, store: Arc<MemoryBlobStore>) -> Self {
        Self {
            router: app(service.clone()),
            service,
            store,
        }
    }

    /// Send a request and decode the JSON response (Null when empty).
    pub async fn request(&self, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let json: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        (status, json)
    }

    pub async fn json(&self, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(method, uri, Body::from(serde_json::to_vec(&body).unwrap()))
            .await
    }

    pub async fn put_chunk(&self, file_id: &str, index: i64, data: &[u8]) -> (StatusCode, Value) {
        self.request(
            "PUT",
            &format!("/uploads?file_id={}&chunk_number={}", file_id, index),
            Body::from(data.to_vec()),
        )
        .await
    }
}
