//! HTTP handlers for the resumable upload endpoint.
//!
//! One path, demultiplexed by method:
//! - `POST`   -> initiate (JSON body), or complete when `?file_id=` is given
//! - `PUT`    -> upload chunk `?file_id=&chunk_number=`, raw body
//! - `GET`    -> session status `?file_id=`
//! - `DELETE` -> abort `?file_id=`
//!
//! Each request carries a `CancellationToken` that is cancelled when the
//! handler future is dropped (client disconnect) or finishes.

use crate::{
    errors::AppError,
    models::{
        session::SessionSnapshot,
        upload::{InitiateUploadReq, UploadResult},
    },
    services::upload_service::UploadService,
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tokio_util::{io::StreamReader, sync::CancellationToken};

/// Query params shared by all verbs.
#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub file_id: Option<String>,
    pub chunk_number: Option<String>,
}

impl UploadQuery {
    fn file_id(&self) -> Result<&str, AppError> {
        self.file_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::bad_request("missing file_id query parameter"))
    }

    fn chunk_number(&self) -> Result<i64, AppError> {
        let raw = self
            .chunk_number
            .as_deref()
            .ok_or_else(|| AppError::bad_request("missing chunk_number query parameter"))?;
        raw.trim()
            .parse::<i64>()
            .map_err(|_| AppError::bad_request(format!("invalid chunk_number `{}`", raw)))
    }
}

/// `POST /uploads` initiates; `POST /uploads?file_id=` completes.
pub async fn create_or_complete(
    State(service): State<UploadService>,
    Query(q): Query<UploadQuery>,
    body: Bytes,
) -> Result<Response, AppError> {
    let ctx = CancellationToken::new();
    let _guard = ctx.clone().drop_guard();

    if q.file_id.is_some() {
        let result: UploadResult = service.complete_upload(&ctx, q.file_id()?).await?;
        return Ok(Json(result).into_response());
    }

    let req: InitiateUploadReq = serde_json::from_slice(&body)
        .map_err(|err| AppError::bad_request(format!("invalid upload request: {}", err)))?;
    let session: SessionSnapshot = service
        .initiate_upload(
            &ctx,
            &req.file_name,
            req.total_size,
            &req.mime_type,
            req.chunk_size,
        )
        .await?;
    Ok(Json(session).into_response())
}

/// `PUT /uploads?file_id=&chunk_number=`: store one chunk from the raw body.
pub async fn upload_chunk(
    State(service): State<UploadService>,
    Query(q): Query<UploadQuery>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let ctx = CancellationToken::new();
    let _guard = ctx.clone().drop_guard();

    let file_id = q.file_id()?;
    let index = q.chunk_number()?;

    let stream = body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other));
    let reader = StreamReader::new(stream);

    service.upload_chunk(&ctx, file_id, index, reader).await?;
    Ok(StatusCode::OK)
}

/// `GET /uploads?file_id=`: session status.
pub async fn get_status(
    State(service): State<UploadService>,
    Query(q): Query<UploadQuery>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let ctx = CancellationToken::new();
    let _guard = ctx.clone().drop_guard();

    let session = service.get_status(&ctx, q.file_id()?).await?;
    Ok(Json(session))
}

/// `DELETE /uploads?file_id=`: abort and reclaim chunks.
pub async fn abort_upload(
    State(service): State<UploadService>,
    Query(q): Query<UploadQuery>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = CancellationToken::new();
    let _guard = ctx.clone().drop_guard();

    service.abort_upload(&ctx, q.file_id()?).await?;
    Ok(StatusCode::OK)
}
