//! Resumable chunked upload service.
//!
//! Clients declare an upload, stream chunks in any order, then ask for
//! assembly; the engine persists chunks and the final object through a
//! pluggable blob store.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

use axum::Router;
use services::upload_service::UploadService;

/// Full application router with `service` as shared state.
pub fn app(service: UploadService) -> Router {
    routes::routes::routes().with_state(service)
}
