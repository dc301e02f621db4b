//! Upload engine and the blob store adapters it persists into.

pub mod admission;
pub mod assembler;
pub mod blob_store;
pub mod disk_store;
pub mod memory_store;
pub mod observer;
pub mod registry;
pub mod sweeper;
pub mod upload_service;
pub mod url_signer;
