//! Chunk assembler: concatenates a session's chunks into the final blob.
//!
//! Chunks are copied in ascending index order into an anonymous temporary
//! file (removed by the OS on every exit path), which is then streamed into
//! the blob store. The SHA-256 digest is computed by reading the stored
//! blob back, so it reflects what the store actually holds.

use crate::{
    models::{
        session::{SessionState, UploadSession, chunk_blob_name, final_blob_name},
        upload::UploadResult,
    },
    services::upload_service::{UploadError, UploadOutcome, UploadService, cancellable},
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::{fmt::Display, io::SeekFrom};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Build the final object for `session` from the chunks recorded in `state`.
///
/// The caller holds the session's write lock and has already checked that
/// every chunk is present.
pub(crate) async fn assemble(
    service: &UploadService,
    ctx: &CancellationToken,
    session: &UploadSession,
    state: &SessionState,
) -> UploadOutcome<UploadResult> {
    let store = service.store();
    let final_name = final_blob_name(&session.id, &session.file_name);

    let staging = tokio::task::spawn_blocking(tempfile::tempfile)
        .await
        .map_err(|e| assembly("spawning staging file task", e))?
        .map_err(|e| assembly("creating staging file", e))?;
    let mut staging = File::from_std(staging);

    for (index, meta) in &state.chunks {
        let name = chunk_blob_name(&session.id, *index);
        let mut reader = service
            .blob_op(ctx, "get_reader", store.get_reader(&name))
            .await
            .map_err(|e| wrap(e, format!("opening chunk {}", index)))?;
        let copied = cancellable(ctx, tokio::io::copy(&mut reader, &mut staging))
            .await?
            .map_err(|e| assembly(format!("reading chunk {}", index), e))?;
        if copied != meta.size {
            return Err(UploadError::Assembly(format!(
                "chunk {} size mismatch: recorded {} bytes, read {}",
                index, meta.size, copied
            )));
        }
        debug!(session_id = %session.id, index, bytes = copied, "chunk staged");
    }

    staging
        .flush()
        .await
        .map_err(|e| assembly("flushing staging file", e))?;
    staging
        .seek(SeekFrom::Start(0))
        .await
        .map_err(|e| assembly("rewinding staging file", e))?;

    let path = service
        .blob_op(ctx, "store", store.store(&final_name, Box::pin(staging)))
        .await
        .map_err(|e| wrap(e, "writing final blob"))?;

    let (digest, size) = digest_blob(service, ctx, &path).await?;
    if size != session.total_size {
        return Err(UploadError::Assembly(format!(
            "assembled {} bytes, expected {}",
            size, session.total_size
        )));
    }

    Ok(UploadResult {
        original_name: session.file_name.clone(),
        size: session.total_size,
        mime_type: session.mime_type.clone(),
        url: store.get_url(&path),
        path,
        digest,
        completed_at: Utc::now(),
    })
}

/// SHA-256 (lowercase hex) and byte length of a stored blob.
async fn digest_blob(
    service: &UploadService,
    ctx: &CancellationToken,
    name: &str,
) -> UploadOutcome<(String, u64)> {
    let mut reader = service
        .blob_op(ctx, "get_reader", service.store().get_reader(name))
        .await
        .map_err(|e| wrap(e, "reopening final blob"))?;

    let hashing = async {
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        Ok::<_, std::io::Error>((format!("{:x}", hasher.finalize()), size))
    };

    cancellable(ctx, hashing)
        .await?
        .map_err(|e| assembly("hashing final blob", e))
}

fn assembly(what: impl Display, err: impl Display) -> UploadError {
    UploadError::Assembly(format!("{}: {}", what, err))
}

/// Fold an engine error into an assembly error, keeping cancellation as is.
fn wrap(err: UploadError, what: impl Display) -> UploadError {
    match err {
        UploadError::Cancelled => UploadError::Cancelled,
        other => assembly(what, other),
    }
}
