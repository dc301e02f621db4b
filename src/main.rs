use anyhow::Result;
use resumable_upload::{
    app,
    config::{self, Backend},
    services::{
        blob_store::BlobStore,
        disk_store::{self, DiskBlobStore},
        memory_store::MemoryBlobStore,
        observer::TracingObserver,
        sweeper::spawn_sweeper,
        upload_service::UploadService,
        url_signer::UrlSigner,
    },
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting resumable-upload with config: {:?}", cfg);

    let signer = UrlSigner::new(cfg.public_base_url.clone(), cfg.signing_secret.clone());

    // --- Initialize blob store ---
    let store: Arc<dyn BlobStore> = match cfg.backend {
        Backend::Disk => {
            if !Path::new(&cfg.storage_dir).exists() {
                fs::create_dir_all(&cfg.storage_dir)?;
                tracing::info!("Created storage directory at {}", cfg.storage_dir);
            }

            // Create the index database's parent directory if needed
            let db_path = cfg
                .database_url
                .trim_start_matches("sqlite://")
                .trim_start_matches("sqlite:")
                .trim_start_matches("file:");
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)?;
                    tracing::info!("Created missing directory {:?}", parent);
                }
            }

            let disk =
                DiskBlobStore::connect(&cfg.database_url, cfg.storage_dir.clone(), signer).await?;

            // --- Handle migration mode ---
            if migrate {
                disk_store::run_migrations(&disk.db).await?;
                tracing::info!("Blob index migration complete.");
                return Ok(()); // exit after migration
            }
            Arc::new(disk)
        }
        Backend::Memory => {
            if migrate {
                tracing::info!("Memory backend has no index; nothing to migrate.");
                return Ok(());
            }
            Arc::new(MemoryBlobStore::new(signer))
        }
    };

    // --- Initialize engine ---
    let service = UploadService::new(store.clone(), cfg.upload_config())
        .with_observer(Arc::new(TracingObserver));

    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(service.clone(), cfg.sweep_interval(), shutdown.clone());

    // --- Build router ---
    let router = app(service.clone());

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // --- Drain background work ---
    shutdown.cancel();
    if let Err(err) = sweeper.await {
        tracing::warn!("session sweeper ended abnormally: {}", err);
    }
    service.wait_for_background().await;
    store.close().await?;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Resolve on Ctrl-C or when `shutdown` is cancelled elsewhere.
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                tracing::warn!("failed to listen for Ctrl-C: {}", err);
                shutdown.cancelled().await;
            }
        }
        _ = shutdown.cancelled() => {}
    }
    tracing::info!("Shutdown signal received");
}
