//! Defines routes for the resumable upload service.
//!
//! ## Structure
//! - **Health endpoints**
//!   - `GET    /healthz` -> liveness
//!   - `GET    /readyz`  -> readiness (blob store round trip)
//!
//! - **Upload endpoint** (`/uploads`, demultiplexed by method)
//!   - `POST   /uploads`               -> initiate (JSON body)
//!   - `POST   /uploads?file_id=`      -> complete / assemble
//!   - `PUT    /uploads?file_id=&chunk_number=` -> upload one chunk
//!   - `GET    /uploads?file_id=`      -> session status
//!   - `DELETE /uploads?file_id=`      -> abort
//!
//! Any other method on `/uploads` answers 405.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{abort_upload, create_or_complete, get_status, upload_chunk},
    },
    services::upload_service::UploadService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for the upload service.
///
/// The router carries shared state (`UploadService`) to all handlers.
pub fn routes() -> Router<UploadService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/uploads",
            post(create_or_complete)
                .put(upload_chunk)
                .get(get_status)
                .delete(abort_upload),
        )
}
