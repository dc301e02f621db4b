use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

/// Seconds of inactivity after which a session is evicted (24 h).
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// Which blob store adapter backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Local disk payloads with a SQLite index.
    Disk,
    /// Process memory; contents vanish on restart.
    Memory,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disk" => Ok(Self::Disk),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("unknown backend `{}` (expected disk or memory)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub storage_dir: String,
    pub database_url: String,
    pub max_file_size: Option<u64>,
    pub allowed_mime_types: Vec<String>,
    pub session_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub hook_timeout_secs: u64,
    pub public_base_url: Option<String>,
    pub signing_secret: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable chunked upload service")]
pub struct Args {
    /// Host to bind to (overrides RESUMABLE_UPLOAD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides RESUMABLE_UPLOAD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Blob store backend (overrides RESUMABLE_UPLOAD_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Directory where blobs are stored (overrides RESUMABLE_UPLOAD_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Blob index database URL (overrides RESUMABLE_UPLOAD_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Largest accepted upload in bytes (overrides RESUMABLE_UPLOAD_MAX_FILE_SIZE)
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Comma-separated MIME allow-list, `family/*` allowed
    /// (overrides RESUMABLE_UPLOAD_ALLOWED_MIME_TYPES)
    #[arg(long, value_delimiter = ',')]
    pub allowed_mime_types: Option<Vec<String>>,

    /// Idle seconds before a session is evicted (overrides RESUMABLE_UPLOAD_SESSION_TTL_SECS)
    #[arg(long)]
    pub session_ttl_secs: Option<u64>,

    /// Seconds between eviction sweeps (overrides RESUMABLE_UPLOAD_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Upper bound for a single hook call (overrides RESUMABLE_UPLOAD_HOOK_TIMEOUT_SECS)
    #[arg(long)]
    pub hook_timeout_secs: Option<u64>,

    /// Base URL blobs are publicly served from (overrides RESUMABLE_UPLOAD_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Secret for signed URLs (overrides RESUMABLE_UPLOAD_SIGNING_SECRET)
    #[arg(long)]
    pub signing_secret: Option<String>,

    /// Run blob index migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("RESUMABLE_UPLOAD_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parsed("RESUMABLE_UPLOAD_PORT")?.unwrap_or(3000);
        let env_backend = env_parsed("RESUMABLE_UPLOAD_BACKEND")?.unwrap_or(Backend::Disk);
        let env_storage =
            env::var("RESUMABLE_UPLOAD_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = env::var("RESUMABLE_UPLOAD_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/blobs.db".into());
        let env_max = env_parsed("RESUMABLE_UPLOAD_MAX_FILE_SIZE")?;
        let env_mimes = env::var("RESUMABLE_UPLOAD_ALLOWED_MIME_TYPES")
            .map(|v| split_list(&v))
            .unwrap_or_default();
        let env_ttl =
            env_parsed("RESUMABLE_UPLOAD_SESSION_TTL_SECS")?.unwrap_or(DEFAULT_SESSION_TTL_SECS);
        let env_sweep = env_parsed("RESUMABLE_UPLOAD_SWEEP_INTERVAL_SECS")?.unwrap_or(300);
        let env_hook = env_parsed("RESUMABLE_UPLOAD_HOOK_TIMEOUT_SECS")?.unwrap_or(30);

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            backend: args.backend.unwrap_or(env_backend),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            max_file_size: args.max_file_size.or(env_max),
            allowed_mime_types: args
                .allowed_mime_types
                .map(|v| v.into_iter().map(|m| m.trim().to_string()).collect())
                .unwrap_or(env_mimes),
            session_ttl_secs: args.session_ttl_secs.unwrap_or(env_ttl),
            sweep_interval_secs: args.sweep_interval_secs.unwrap_or(env_sweep).max(1),
            hook_timeout_secs: args.hook_timeout_secs.unwrap_or(env_hook),
            public_base_url: args
                .public_base_url
                .or_else(|| env::var("RESUMABLE_UPLOAD_PUBLIC_BASE_URL").ok()),
            signing_secret: args
                .signing_secret
                .or_else(|| env::var("RESUMABLE_UPLOAD_SIGNING_SECRET").ok()),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Engine-facing subset of the configuration.
    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            max_file_size: self.max_file_size,
            allowed_mime_types: self.allowed_mime_types.clone(),
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            hook_timeout: Duration::from_secs(self.hook_timeout_secs),
        }
    }
}

/// Admission limits and timing knobs for the upload engine.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Reject uploads whose declared size exceeds this many bytes.
    pub max_file_size: Option<u64>,
    /// Exact types or `family/*` rules; empty admits everything.
    pub allowed_mime_types: Vec<String>,
    pub session_ttl: Duration,
    pub hook_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: None,
            allowed_mime_types: Vec::new(),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            hook_timeout: Duration::from_secs(30),
        }
    }
}

/// Read and parse an optional environment variable.
fn env_parsed<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
