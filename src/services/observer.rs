//! Passive sinks for upload lifecycle events and success/failure hooks.

use crate::{models::upload::UploadResult, services::upload_service::UploadError};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives lifecycle and storage events. Implementations must return
/// quickly; they run inline on request paths.
pub trait Observer: Send + Sync + 'static {
    fn upload_started(&self, _ctx: &CancellationToken, _name: &str, _size: u64) {}

    fn upload_finished(
        &self,
        _ctx: &CancellationToken,
        _name: &str,
        _size: u64,
        _duration: Duration,
        _success: bool,
    ) {
    }

    fn upload_errored(&self, _ctx: &CancellationToken, _name: &str, _message: &str) {}

    fn storage_op(
        &self,
        _ctx: &CancellationToken,
        _op: &str,
        _adapter: &str,
        _duration: Duration,
        _success: bool,
    ) {
    }
}

/// Discards everything. The engine's default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn upload_started(&self, _ctx: &CancellationToken, name: &str, size: u64) {
        info!(file_name = name, size, "upload started");
    }

    fn upload_finished(
        &self,
        _ctx: &CancellationToken,
        name: &str,
        size: u64,
        duration: Duration,
        success: bool,
    ) {
        info!(
            file_name = name,
            size,
            duration_ms = duration.as_millis() as u64,
            success,
            "upload finished"
        );
    }

    fn upload_errored(&self, _ctx: &CancellationToken, name: &str, message: &str) {
        warn!(file_name = name, error = message, "upload error");
    }

    fn storage_op(
        &self,
        _ctx: &CancellationToken,
        op: &str,
        adapter: &str,
        duration: Duration,
        success: bool,
    ) {
        debug!(
            op,
            adapter,
            duration_us = duration.as_micros() as u64,
            success,
            "blob store op"
        );
    }
}

/// Caller-registered callbacks around assembly.
///
/// Each call is bounded by the engine's hook timeout; a hook that overruns is
/// abandoned and logged.
#[async_trait]
pub trait UploadHook: Send + Sync + 'static {
    /// Runs after a successful `complete_upload`.
    async fn on_success(&self, _ctx: &CancellationToken, _result: &UploadResult) {}

    /// Runs after an assembly attempt failed and the session was marked failed.
    async fn on_failure(&self, _ctx: &CancellationToken, _session_id: &str, _error: &UploadError) {}
}
