use anyhow::ensure;
use serde::Deserialize;
use std::time::Duration;

/// Smallest part S3 accepts for any but the last part of a multipart upload
pub const MIN_PART_SIZE_BYTES: usize = 5 * 1024 * 1024;

/// Main configuration for the catalog service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Poster asset store configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// API configuration
    pub api: ApiConfig,
    /// Orphan reconciliation configuration
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Poster storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding poster images
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, Supabase storage, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Base of the public object namespace, e.g.
    /// `https://<project>.supabase.co/storage/v1/object`.
    /// Public URLs are `{public_base_url}/public/{bucket}/{key}`.
    pub public_base_url: String,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Largest accepted request body (poster upload included)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Orphan reconciliation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Posters younger than this are never swept; their record may still be in flight
    #[serde(default = "default_orphan_grace_secs")]
    pub orphan_grace_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "catalog-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_bucket() -> String {
    "movie-posters".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024 // 20MB
}

fn default_orphan_grace_secs() -> u64 {
    900 // 15 minutes
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "catalog-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/catalog").required(false))
            .add_source(config::File::with_name("/etc/nier/catalog").required(false))
            // CATALOG__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("CATALOG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.s3.validate()?;
        Ok(config)
    }
}

impl S3Config {
    /// Reject multipart settings S3 would refuse or that cannot be chunked
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.part_size_bytes >= MIN_PART_SIZE_BYTES,
            "s3.part_size_bytes must be at least {MIN_PART_SIZE_BYTES} (got {})",
            self.part_size_bytes
        );
        ensure!(
            self.multipart_threshold_bytes >= self.part_size_bytes,
            "s3.multipart_threshold_bytes ({}) must not be below s3.part_size_bytes ({})",
            self.multipart_threshold_bytes,
            self.part_size_bytes
        );
        Ok(())
    }
}

impl DatabaseConfig {
    /// Get connection acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle connection timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl ReconcileConfig {
    /// Get orphan grace window as Duration
    pub fn orphan_grace(&self) -> Duration {
        Duration::from_secs(self.orphan_grace_secs)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            orphan_grace_secs: default_orphan_grace_secs(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}
