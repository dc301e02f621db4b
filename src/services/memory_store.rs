//! Process-local blob store keeping payloads in a `HashMap`.

use crate::services::{
    blob_store::{BlobReader, BlobResult, BlobStore, BlobStoreError, validate_blob_name},
    url_signer::UrlSigner,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    io::Cursor,
    sync::{PoisonError, RwLock},
    time::Duration,
};
use tokio::io::AsyncReadExt;

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Bytes>>,
    signer: UrlSigner,
}

impl MemoryBlobStore {
    pub fn new(signer: UrlSigner) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            signer,
        }
    }

    fn read(&self, name: &str) -> Option<Bytes> {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn store(&self, name: &str, mut reader: BlobReader) -> BlobResult<String> {
        validate_blob_name(name)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Bytes::from(buf));
        Ok(name.to_string())
    }

    async fn get_reader(&self, name: &str) -> BlobResult<BlobReader> {
        let data = self
            .read(name)
            .ok_or_else(|| BlobStoreError::NotFound(name.to_string()))?;
        Ok(Box::pin(Cursor::new(data)))
    }

    async fn delete(&self, name: &str) -> BlobResult<()> {
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BlobStoreError::NotFound(name.to_string()))
    }

    async fn exists(&self, name: &str) -> bool {
        self.read(name).is_some()
    }

    async fn get_size(&self, name: &str) -> BlobResult<u64> {
        self.read(name)
            .map(|b| b.len() as u64)
            .ok_or_else(|| BlobStoreError::NotFound(name.to_string()))
    }

    fn get_url(&self, name: &str) -> String {
        self.signer.url(name)
    }

    fn get_signed_url(&self, name: &str, ttl: Duration) -> BlobResult<String> {
        self.signer.signed_url(name, ttl)
    }

    async fn list(&self) -> BlobResult<Vec<String>> {
        let mut names: Vec<String> = self
            .blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn get_bucket_info(&self) -> BlobResult<HashMap<String, String>> {
        let blobs = self.blobs.read().unwrap_or_else(PoisonError::into_inner);
        let total: usize = blobs.values().map(Bytes::len).sum();
        Ok(HashMap::from([
            ("backend".to_string(), self.kind().to_string()),
            ("blob_count".to_string(), blobs.len().to_string()),
            ("total_bytes".to_string(), total.to_string()),
        ]))
    }

    async fn close(&self) -> BlobResult<()> {
        Ok(())
    }
}
