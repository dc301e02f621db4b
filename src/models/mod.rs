//! Core data models for the resumable upload engine.
//!
//! Sessions live in memory only; blob records map to the SQLite index kept
//! by the disk blob store via `sqlx::FromRow`. Everything that crosses the
//! HTTP boundary serializes as lower-snake-case JSON via `serde`.

pub mod blob;
pub mod session;
pub mod upload;
