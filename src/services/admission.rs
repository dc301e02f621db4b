//! Admission checks applied before a session exists and per chunk.

use crate::{config::UploadConfig, services::upload_service::UploadError};

const MAX_FILE_NAME_LEN: usize = 255;

/// Validate an initiation request against `config`.
///
/// Checks run in order: size cap, MIME allow-list, chunk size, file name.
/// Returns the chunk size as an unsigned value on success.
pub fn admit(
    config: &UploadConfig,
    file_name: &str,
    total_size: u64,
    mime_type: &str,
    chunk_size: i64,
) -> Result<u64, UploadError> {
    if let Some(max) = config.max_file_size {
        if total_size > max {
            return Err(UploadError::TooLarge {
                size: total_size,
                max,
            });
        }
    }

    if !mime_allowed(&config.allowed_mime_types, mime_type) {
        return Err(UploadError::TypeNotAllowed(mime_type.to_string()));
    }

    if chunk_size <= 0 {
        return Err(UploadError::BadRequest(format!(
            "chunk_size must be positive, got {}",
            chunk_size
        )));
    }

    validate_file_name(file_name)?;
    Ok(chunk_size as u64)
}

/// True when `mime_type` matches an entry exactly, or falls in a `family/*`
/// rule's family. An empty list admits everything.
pub fn mime_allowed(allowed: &[String], mime_type: &str) -> bool {
    if allowed.is_empty() {
        return true;
    }
    allowed.iter().any(|rule| match rule.strip_suffix('*') {
        Some(family) if family.ends_with('/') => mime_type
            .get(..family.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(family)),
        _ => rule.eq_ignore_ascii_case(mime_type),
    })
}

/// The file name becomes the last segment of the final blob name, so it
/// must be a single safe path component.
pub fn validate_file_name(name: &str) -> Result<(), UploadError> {
    let reason = if name.trim().is_empty() {
        Some("must not be empty")
    } else if name.len() > MAX_FILE_NAME_LEN {
        Some("must be at most 255 bytes")
    } else if name.contains('/') || name.contains('\\') {
        Some("must not contain path separators")
    } else if name == "." || name.contains("..") {
        Some("must not be `.` or contain `..`")
    } else if name.chars().any(char::is_control) {
        Some("must not contain control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(UploadError::BadRequest(format!(
            "file_name {}",
            reason
        ))),
        None => Ok(()),
    }
}

/// Bounds-check a client-supplied chunk index against `total_chunks`.
pub fn check_chunk_index(total_chunks: u64, index: i64) -> Result<u64, UploadError> {
    match u64::try_from(index) {
        Ok(i) if i < total_chunks => Ok(i),
        _ => Err(UploadError::BadIndex {
            index,
            total: total_chunks,
        }),
    }
}
