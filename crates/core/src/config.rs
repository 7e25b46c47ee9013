use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::SkusyncError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.as_str(), "true" | "1"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub postgres: PostgresConfig,
    pub ingest: IngestConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SKUSYNC_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("SKUSYNC_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            storage: StorageConfig::from_env_profiled(p),
            remote: RemoteConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            ingest: IngestConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Check that the selected remote provider has what it needs.
    pub fn validate(&self) -> Result<(), SkusyncError> {
        match self.remote.provider {
            RemoteProvider::Azure => {
                if !self.remote.azure.is_configured() {
                    return Err(SkusyncError::Config(
                        "azure remote needs AZURE_STORAGE_CONNECTION_STRING or AZURE_STORAGE_ACCOUNT".into(),
                    ));
                }
            }
            RemoteProvider::S3 => {
                if self.remote.aws.s3_bucket.is_none() {
                    return Err(SkusyncError::Config("s3 remote needs S3_BUCKET".into()));
                }
            }
            RemoteProvider::Local => {
                if self.remote.local_root.is_none() {
                    return Err(SkusyncError::Config(
                        "local remote needs REMOTE_LOCAL_ROOT".into(),
                    ));
                }
            }
        }
        if self.ingest.table.is_empty() {
            return Err(SkusyncError::Config("INGEST_TABLE must not be empty".into()));
        }
        // staging is walked recursively, an archive below it would be re-ingested
        if self.storage.archive_dir.starts_with(&self.storage.data_dir) {
            return Err(SkusyncError::Config(format!(
                "ARCHIVE_DIR ({}) must not be inside DATA_DIR ({})",
                self.storage.archive_dir.display(),
                self.storage.data_dir.display()
            )));
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  storage:     staging={}, archive={}",
            self.storage.data_dir.display(),
            self.storage.archive_dir.display()
        );
        tracing::info!(
            "  remote:      provider={}, location={}",
            self.remote.provider,
            self.remote.location_label()
        );
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!(
            "  ingest:      table={}, concurrency={}, fetch_timeout={}s",
            self.ingest.table,
            self.ingest.fetch_concurrency,
            self.ingest.fetch_timeout_secs
        );
    }
}

// ── Storage (local directories) ───────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Staging area for fetched objects.
    pub data_dir: PathBuf,
    /// Where processed files are moved.
    pub archive_dir: PathBuf,
    /// Where `cycles.jsonl` is appended.
    pub run_log_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
            archive_dir: PathBuf::from(profiled_env_or(p, "ARCHIVE_DIR", "processed_data")),
            run_log_dir: PathBuf::from(profiled_env_or(p, "RUN_LOG_DIR", "runs")),
        }
    }
}

// ── Remote object store ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteProvider {
    Azure,
    S3,
    Local,
}

impl RemoteProvider {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "azure" | "blob" => Some(Self::Azure),
            "s3" | "aws" => Some(Self::S3),
            "local" | "file" => Some(Self::Local),
            _ => None,
        }
    }
}

impl std::fmt::Display for RemoteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteProvider::Azure => write!(f, "azure"),
            RemoteProvider::S3 => write!(f, "s3"),
            RemoteProvider::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub provider: RemoteProvider,
    /// Only keys under this prefix are listed.
    pub prefix: Option<String>,
    pub azure: AzureConfig,
    pub aws: AwsConfig,
    pub local_root: Option<PathBuf>,
}

impl RemoteConfig {
    fn from_env_profiled(p: &str) -> Self {
        let provider_raw = profiled_env_or(p, "REMOTE_PROVIDER", "azure");
        let provider = RemoteProvider::parse(&provider_raw).unwrap_or_else(|| {
            tracing::warn!(provider = %provider_raw, "unknown REMOTE_PROVIDER, using azure");
            RemoteProvider::Azure
        });
        Self {
            provider,
            prefix: profiled_env_opt(p, "REMOTE_PREFIX"),
            azure: AzureConfig::from_env_profiled(p),
            aws: AwsConfig::from_env_profiled(p),
            local_root: profiled_env_opt(p, "REMOTE_LOCAL_ROOT").map(PathBuf::from),
        }
    }

    /// Container, bucket or directory being read, for logs.
    pub fn location_label(&self) -> String {
        match self.provider {
            RemoteProvider::Azure => self.azure.container.clone(),
            RemoteProvider::S3 => self.aws.s3_bucket.clone().unwrap_or_else(|| "(none)".into()),
            RemoteProvider::Local => self
                .local_root
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".into()),
        }
    }
}

// ── Azure Blob ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    pub connection_string: Option<String>,
    pub account: Option<String>,
    pub access_key: Option<String>,
    pub container: String,
    pub use_emulator: bool,
}

impl AzureConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            connection_string: profiled_env_opt(p, "AZURE_STORAGE_CONNECTION_STRING")
                .or_else(|| profiled_env_opt(p, "BLOB_CONN_STRING")),
            account: profiled_env_opt(p, "AZURE_STORAGE_ACCOUNT"),
            access_key: profiled_env_opt(p, "AZURE_STORAGE_ACCESS_KEY"),
            container: profiled_env_or(p, "AZURE_CONTAINER", "defaultcontainerpython"),
            use_emulator: profiled_env_bool(p, "AZURE_USE_EMULATOR", false),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.connection_string.is_some() || self.account.is_some() || self.use_emulator
    }
}

// ── AWS / S3 ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub s3_bucket: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_or(p, "AWS_REGION", "us-east-1"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
            s3_bucket: profiled_env_opt(p, "S3_BUCKET"),
            endpoint_url: profiled_env_opt(p, "AWS_ENDPOINT_URL"),
        }
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Full URL; wins over the individual fields when set.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_opt(p, "DATABASE_URL"),
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "skusync"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 4),
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

// ── Ingestion cycle ───────────────────────────────────────────

pub const DEFAULT_FETCH_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Destination table.
    pub table: String,
    pub fetch_concurrency: usize,
    pub fetch_timeout_secs: u64,
}

impl IngestConfig {
    fn from_env_profiled(p: &str) -> Self {
        let concurrency = profiled_env_u32(p, "FETCH_CONCURRENCY", DEFAULT_FETCH_CONCURRENCY as u32);
        Self {
            table: profiled_env_or(p, "INGEST_TABLE", "data"),
            fetch_concurrency: (concurrency as usize).max(1),
            fetch_timeout_secs: profiled_env_u64(p, "FETCH_TIMEOUT_SECS", 300),
        }
    }
}
