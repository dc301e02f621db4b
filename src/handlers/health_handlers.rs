//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that round-trips a probe blob through the store

use crate::services::upload_service::UploadService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, io::Cursor};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe; always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that performs a best-effort write/read/delete of a small
/// probe blob against the configured store.
///
/// Returns JSON describing the check. HTTP 200 when it passes,
/// HTTP 503 when it fails.
pub async fn readyz(State(service): State<UploadService>) -> impl IntoResponse {
    let ctx = CancellationToken::new();
    let _guard = ctx.clone().drop_guard();
    let store = service.store();
    let probe = format!(".readyz-{}", Uuid::new_v4());

    let blob_check = match service
        .blob_op(
            &ctx,
            "store",
            store.store(&probe, Box::pin(Cursor::new(b"readyz".to_vec()))),
        )
        .await
    {
        Ok(name) => {
            let mut bytes = Vec::new();
            let read = match service
                .blob_op(&ctx, "get_reader", store.get_reader(&name))
                .await
            {
                Ok(mut reader) => reader.read_to_end(&mut bytes).await.map(|_| ()),
                Err(e) => Err(std::io::Error::other(e.to_string())),
            };
            let check = match read {
                Ok(()) if bytes == b"readyz" => (true, None::<String>),
                Ok(()) => (false, Some("blob content mismatch".to_string())),
                Err(e) => (false, Some(format!("could not read probe blob: {}", e))),
            };
            // best-effort cleanup; report but do not fail on removal errors
            match service.blob_op(&ctx, "delete", store.delete(&name)).await {
                Ok(_) => check,
                Err(e) if check.0 => (true, Some(format!("could not remove probe blob: {}", e))),
                Err(_) => check,
            }
        }
        Err(e) => (false, Some(format!("could not write probe blob: {}", e))),
    };

    let overall_ok = blob_check.0;
    let mut checks = HashMap::new();
    checks.insert(
        "blob_store",
        CheckStatus {
            ok: blob_check.0,
            error: blob_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        backend: store.kind(),
        active_sessions: service.active_sessions().await,
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    backend: &'static str,
    active_sessions: usize,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
