//! src/services/disk_store.rs
//!
//! DiskBlobStore: blob payloads on local disk beneath `base_path/<name>`,
//! with a SQLite index (`blobs` table) for sizes, etags and listing.
//! Writes stream into a hidden temp file next to the target, are fsynced and
//! then renamed into place, so readers never observe a partial blob.

use crate::{
    models::blob::BlobRecord,
    services::{
        blob_store::{BlobReader, BlobResult, BlobStore, BlobStoreError, validate_blob_name},
        url_signer::UrlSigner,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use md5::Context;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

/// Index schema, also applied by `--migrate`.
pub const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

const COPY_BUF_SIZE: usize = 64 * 1024;

#[derive(Clone)]
pub struct DiskBlobStore {
    /// Shared SQLite connection pool holding the blob index.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where blob payloads are stored.
    pub base_path: PathBuf,

    signer: UrlSigner,
}

impl DiskBlobStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            signer,
        }
    }

    /// Open the index at `database_url`, apply the schema and make sure
    /// `base_path` exists.
    ///
    /// In-memory SQLite URLs get a single long-lived connection, since every
    /// new connection would otherwise see its own empty database.
    pub async fn connect(
        database_url: &str,
        base_path: impl Into<PathBuf>,
        signer: UrlSigner,
    ) -> BlobResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };
        run_migrations(&pool).await?;

        Ok(Self::new(Arc::new(pool), base_path, signer))
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    /// Fetch the index row for `name`.
    ///
    /// Returns NotFound if missing.
    async fn fetch_record(&self, name: &str) -> BlobResult<BlobRecord> {
        sqlx::query_as::<_, BlobRecord>(
            "SELECT name, size_bytes, etag, created_at FROM blobs WHERE name = ?",
        )
        .bind(name)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => BlobStoreError::NotFound(name.to_string()),
            other => BlobStoreError::Sqlx(other),
        })
    }

    /// Recursively remove empty directories up to the store root.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    fn kind(&self) -> &'static str {
        "disk"
    }

    /// Stream a blob to disk and upsert its index row.
    ///
    /// Computes MD5 and size while streaming; cleans up the temp file on
    /// every error path.
    async fn store(&self, name: &str, mut reader: BlobReader) -> BlobResult<String> {
        validate_blob_name(name)?;

        let file_path = self.blob_path(name);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            BlobStoreError::Io(io::Error::other("blob path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(BlobStoreError::Io(err));
                }
            };
            size_bytes += n as i64;
            digest.consume(&buf[..n]);
            if let Err(err) = file.write_all(&buf[..n]).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BlobStoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobStoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobStoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobStoreError::Io(err));
        }

        let etag = format!("{:x}", digest.compute());
        let upsert = sqlx::query(
            r#"
            INSERT INTO blobs (name, size_bytes, etag, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                created_at = excluded.created_at
            "#,
        )
        .bind(name)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .execute(&*self.db)
        .await;

        match upsert {
            Ok(_) => {
                debug!(blob = name, size_bytes, %etag, "stored blob");
                Ok(name.to_string())
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(BlobStoreError::Sqlx(err))
            }
        }
    }

    async fn get_reader(&self, name: &str) -> BlobResult<BlobReader> {
        validate_blob_name(name)?;
        let file = File::open(self.blob_path(name)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobStoreError::NotFound(name.to_string())
            } else {
                BlobStoreError::Io(err)
            }
        })?;
        Ok(Box::pin(file))
    }

    /// Remove a blob and its index row, then prune empty directories.
    ///
    /// A name that resolves to a directory is treated as a prefix and removed
    /// only if empty.
    async fn delete(&self, name: &str) -> BlobResult<()> {
        validate_blob_name(name)?;
        let result = sqlx::query("DELETE FROM blobs WHERE name = ?")
            .bind(name)
            .execute(&*self.db)
            .await?;

        let path = self.blob_path(name);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir(&path).await?,
            Ok(_) => fs::remove_file(&path).await?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if result.rows_affected() == 0 {
                    return Err(BlobStoreError::NotFound(name.to_string()));
                }
                debug!("file {} already missing", path.display());
            }
            Err(err) => return Err(BlobStoreError::Io(err)),
        }

        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Drop the index rows under `prefix/` and the whole directory, which
    /// also catches files that were renamed into place but never indexed.
    async fn delete_prefix(&self, prefix: &str) -> BlobResult<u64> {
        validate_blob_name(prefix)?;
        let scope = format!("{}/", prefix);
        let result = sqlx::query("DELETE FROM blobs WHERE substr(name, 1, length(?)) = ?")
            .bind(&scope)
            .bind(&scope)
            .execute(&*self.db)
            .await?;

        let dir = self.blob_path(prefix);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(BlobStoreError::Io(err)),
        }
        if let Some(parent) = dir.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(result.rows_affected())
    }

    async fn exists(&self, name: &str) -> bool {
        match self.fetch_record(name).await {
            Ok(_) => true,
            Err(BlobStoreError::NotFound(_)) => false,
            Err(err) => {
                debug!(blob = name, "exists check failed: {}", err);
                false
            }
        }
    }

    async fn get_size(&self, name: &str) -> BlobResult<u64> {
        let record = self.fetch_record(name).await?;
        Ok(record.size_bytes.max(0) as u64)
    }

    fn get_url(&self, name: &str) -> String {
        self.signer.url(name)
    }

    fn get_signed_url(&self, name: &str, ttl: Duration) -> BlobResult<String> {
        validate_blob_name(name)?;
        self.signer.signed_url(name, ttl)
    }

    async fn list(&self) -> BlobResult<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>("SELECT name FROM blobs ORDER BY name ASC")
            .fetch_all(&*self.db)
            .await?;
        Ok(names)
    }

    async fn get_bucket_info(&self) -> BlobResult<HashMap<String, String>> {
        let (count, total): (i64, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), SUM(size_bytes) FROM blobs")
                .fetch_one(&*self.db)
                .await?;
        Ok(HashMap::from([
            ("backend".to_string(), self.kind().to_string()),
            ("root".to_string(), self.base_path.display().to_string()),
            ("blob_count".to_string(), count.to_string()),
            ("total_bytes".to_string(), total.unwrap_or(0).to_string()),
        ]))
    }

    async fn close(&self) -> BlobResult<()> {
        self.db.close().await;
        Ok(())
    }
}

/// Apply the embedded index schema statement by statement.
pub async fn run_migrations(db: &SqlitePool) -> BlobResult<()> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    debug!("Running {} migration statements...", statements.len());

    for stmt in statements {
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    async fn store() -> (DiskBlobStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlobStore::connect("sqlite::memory:", dir.path(), UrlSigner::default())
            .await
            .unwrap();
        (store, dir)
    }

    fn reader(data: &[u8]) -> BlobReader {
        Box::pin(Cursor::new(data.to_vec()))
    }

    async fn read_all(store: &DiskBlobStore, name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        store
            .get_reader(name)
            .await
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        out
    }

    #[tokio::test]
    async fn stores_payload_and_index_row() {
        let (store, dir) = store().await;
        let name = store
            .store("chunks/abc/chunk_0", reader(b"payload"))
            .await
            .unwrap();

        assert!(dir.path().join("chunks/abc/chunk_0").is_file());
        assert_eq!(read_all(&store, &name).await, b"payload");
        assert_eq!(store.get_size(&name).await.unwrap(), 7);
        assert!(store.exists(&name).await);

        let record = store.fetch_record(&name).await.unwrap();
        assert_eq!(record.etag, format!("{:x}", md5::compute(b"payload")));
    }

    #[tokio::test]
    async fn overwrite_replaces_content() {
        let (store, _dir) = store().await;
        store.store("a/b", reader(b"first")).await.unwrap();
        store.store("a/b", reader(b"second!")).await.unwrap();
        assert_eq!(read_all(&store, "a/b").await, b"second!");
        assert_eq!(store.get_size("a/b").await.unwrap(), 7);
        assert_eq!(store.list().await.unwrap(), vec!["a/b"]);
    }

    #[tokio::test]
    async fn delete_prunes_empty_prefix_directories() {
        let (store, dir) = store().await;
        store.store("chunks/abc/chunk_0", reader(b"x")).await.unwrap();
        store.store("chunks/abc/chunk_1", reader(b"y")).await.unwrap();

        store.delete("chunks/abc/chunk_0").await.unwrap();
        assert!(dir.path().join("chunks/abc").is_dir());

        store.delete("chunks/abc/chunk_1").await.unwrap();
        assert!(!dir.path().join("chunks").exists());
        assert!(matches!(
            store.delete("chunks/abc").await,
            Err(BlobStoreError::NotFound(_))
        ));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_prefix_removes_indexed_and_stray_files() {
        let (store, dir) = store().await;
        store.store("chunks/abc/chunk_0", reader(b"x")).await.unwrap();
        store.store("chunks/abc_d/chunk_0", reader(b"z")).await.unwrap();
        std::fs::write(dir.path().join("chunks/abc/chunk_1"), b"unindexed").unwrap();

        assert_eq!(store.delete_prefix("chunks/abc").await.unwrap(), 1);
        assert!(!dir.path().join("chunks/abc").exists());
        assert_eq!(store.list().await.unwrap(), vec!["chunks/abc_d/chunk_0"]);

        assert_eq!(store.delete_prefix("chunks/abc").await.unwrap(), 0);
        assert_eq!(store.delete_prefix("chunks/abc_d").await.unwrap(), 1);
        assert!(!dir.path().join("chunks").exists());
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let (store, _dir) = store().await;
        assert!(matches!(
            store.get_reader("nope/x").await,
            Err(BlobStoreError::NotFound(_))
        ));
        assert!(matches!(
            store.get_size("nope/x").await,
            Err(BlobStoreError::NotFound(_))
        ));
        assert!(!store.exists("nope/x").await);
    }

    #[tokio::test]
    async fn rejects_traversal_names() {
        let (store, _dir) = store().await;
        assert!(matches!(
            store.store("../escape", reader(b"x")).await,
            Err(BlobStoreError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn bucket_info_reports_totals() {
        let (store, _dir) = store().await;
        let info = store.get_bucket_info().await.unwrap();
        assert_eq!(info["blob_count"], "0");
        assert_eq!(info["total_bytes"], "0");

        store.store("x/1", reader(&[1; 10])).await.unwrap();
        store.store("x/2", reader(&[2; 5])).await.unwrap();
        let info = store.get_bucket_info().await.unwrap();
        assert_eq!(info["backend"], "disk");
        assert_eq!(info["blob_count"], "2");
        assert_eq!(info["total_bytes"], "15");
    }
}
