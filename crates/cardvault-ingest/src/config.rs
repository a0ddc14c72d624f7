//! Configuration management

use crate::error::{IngestError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Path Defaults
// ============================================================================

/// Default location of the raw bulk catalog.
pub const DEFAULT_BULK_FILE: &str = "./data/bulk/all-cards.json";

/// Default output directory for partition files and the index.
pub const DEFAULT_DATA_DIR: &str = "./data/sets";

/// Temp directory name under the data directory.
pub const TEMP_DIR_NAME: &str = ".tmp";

/// Index file name under the data directory.
pub const INDEX_FILE_NAME: &str = "index.json";

/// Checkpoint file name under the data directory.
pub const CHECKPOINT_FILE_NAME: &str = "seed-checkpoint.json";

/// Error log file name under the data directory.
pub const ERROR_LOG_FILE_NAME: &str = "seed-errors.json";

// ============================================================================
// Split Defaults
// ============================================================================

/// Languages split out when none are requested.
pub const DEFAULT_LANGUAGES: &str = "en,es,fr,de,it,pt,ja,ko,ru,zhs,zht";

/// Set types never split out.
pub const DEFAULT_EXCLUDED_SET_TYPES: &str = "token,memorabilia,art_series,minigame";

/// Maximum partition files open at once during the write pass.
pub const DEFAULT_MAX_OPEN_FILES: usize = 200;

/// Handles closed together when the pool is full.
pub const DEFAULT_EVICT_BATCH: usize = 50;

/// Records between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100_000;

/// Records pulled from the input per write batch.
pub const DEFAULT_WRITE_BATCH: usize = 1_000;

// ============================================================================
// Seed Defaults
// ============================================================================

/// Records between mid-partition checkpoint saves.
pub const DEFAULT_CHECKPOINT_EVERY: u64 = 50;

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default key prefix for uploaded card images.
pub const DEFAULT_ASSET_PREFIX: &str = "cards";

/// Default asset download timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub paths: PathConfig,
    pub split: SplitConfig,
    pub seed: SeedConfig,
    pub retry: RetryConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
}

/// File locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    pub bulk_file: PathBuf,
    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub checkpoint_file: PathBuf,
    pub error_log: PathBuf,
}

impl PathConfig {
    /// Derive every path from a data directory
    pub fn under(bulk_file: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            bulk_file: bulk_file.into(),
            temp_dir: data_dir.join(TEMP_DIR_NAME),
            checkpoint_file: data_dir.join(CHECKPOINT_FILE_NAME),
            error_log: data_dir.join(ERROR_LOG_FILE_NAME),
            data_dir,
        }
    }

    pub fn index_file(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE_NAME)
    }
}

/// Split pass tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    pub languages: Vec<String>,
    pub excluded_set_types: Vec<String>,
    pub max_open_files: usize,
    pub evict_batch: usize,
    pub progress_interval: u64,
    pub write_batch: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            languages: split_list(DEFAULT_LANGUAGES),
            excluded_set_types: split_list(DEFAULT_EXCLUDED_SET_TYPES),
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            evict_batch: DEFAULT_EVICT_BATCH,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            write_batch: DEFAULT_WRITE_BATCH,
        }
    }
}

/// Seed run tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConfig {
    pub checkpoint_every: u64,
    pub asset_prefix: String,
    pub http_timeout_secs: u64,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            asset_prefix: DEFAULT_ASSET_PREFIX.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

/// Backoff settings, in milliseconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Only required for a seed run that writes
    pub url: Option<String>,
    pub max_connections: u32,
}

/// Object storage for card images (S3 or MinIO)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub path_style: bool,
    /// Base for public object URLs; derived from endpoint/bucket when unset
    pub public_url: Option<String>,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "cardvault-images".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            public_url: env::var("S3_PUBLIC_URL").ok(),
        }
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
            public_url: None,
        }
    }

    /// URL under which an uploaded key is publicly reachable
    pub fn object_url(&self, key: &str) -> String {
        if let Some(base) = &self.public_url {
            return format!("{}/{}", base.trim_end_matches('/'), key);
        }

        match &self.endpoint {
            Some(endpoint) => {
                format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key)
            },
            None => format!("https://{}.s3.{}.amazonaws.com/{}", self.bucket, self.region, key),
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment (and `.env`) over defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let data_dir = PathBuf::from(
            env::var("CARDVAULT_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string()),
        );
        let bulk_file =
            env::var("CARDVAULT_BULK_FILE").unwrap_or_else(|_| DEFAULT_BULK_FILE.to_string());

        let mut paths = PathConfig::under(bulk_file, &data_dir);
        if let Ok(dir) = env::var("CARDVAULT_TEMP_DIR") {
            paths.temp_dir = PathBuf::from(dir);
        }
        if let Ok(file) = env::var("CARDVAULT_CHECKPOINT_FILE") {
            paths.checkpoint_file = PathBuf::from(file);
        }
        if let Ok(file) = env::var("CARDVAULT_ERROR_LOG") {
            paths.error_log = PathBuf::from(file);
        }

        let split_defaults = SplitConfig::default();
        let split = SplitConfig {
            languages: env::var("CARDVAULT_LANGUAGES")
                .map(|v| split_list(&v))
                .unwrap_or(split_defaults.languages),
            excluded_set_types: env::var("CARDVAULT_EXCLUDED_SET_TYPES")
                .map(|v| split_list(&v))
                .unwrap_or(split_defaults.excluded_set_types),
            max_open_files: parse_env("CARDVAULT_MAX_OPEN_FILES")?
                .unwrap_or(split_defaults.max_open_files),
            evict_batch: parse_env("CARDVAULT_EVICT_BATCH")?.unwrap_or(split_defaults.evict_batch),
            progress_interval: parse_env("CARDVAULT_PROGRESS_INTERVAL")?
                .unwrap_or(split_defaults.progress_interval),
            write_batch: parse_env("CARDVAULT_WRITE_BATCH")?.unwrap_or(split_defaults.write_batch),
        };

        let seed_defaults = SeedConfig::default();
        let seed = SeedConfig {
            checkpoint_every: parse_env("CARDVAULT_CHECKPOINT_EVERY")?
                .unwrap_or(seed_defaults.checkpoint_every),
            asset_prefix: env::var("CARDVAULT_ASSET_PREFIX").unwrap_or(seed_defaults.asset_prefix),
            http_timeout_secs: parse_env("CARDVAULT_HTTP_TIMEOUT")?
                .unwrap_or(seed_defaults.http_timeout_secs),
        };

        let retry_defaults = RetryConfig::default();
        let retry = RetryConfig {
            max_retries: parse_env("INGEST_MAX_RETRIES")?.unwrap_or(retry_defaults.max_retries),
            initial_delay_ms: parse_env("INGEST_INITIAL_DELAY_MS")?
                .unwrap_or(retry_defaults.initial_delay_ms),
            max_delay_ms: parse_env("INGEST_MAX_DELAY_MS")?.unwrap_or(retry_defaults.max_delay_ms),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").ok().filter(|u| !u.trim().is_empty()),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
        };

        let config = IngestConfig {
            paths,
            split,
            seed,
            retry,
            database,
            storage: StorageConfig::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Defaults rooted at `data_dir`, without reading the environment
    pub fn with_paths(bulk_file: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathConfig::under(bulk_file, data_dir),
            split: SplitConfig::default(),
            seed: SeedConfig::default(),
            retry: RetryConfig::default(),
            database: DatabaseConfig {
                url: None,
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            },
            storage: StorageConfig::for_minio("http://localhost:9000", "cardvault-images"),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.split.max_open_files == 0 {
            return Err(IngestError::Config(
                "max_open_files must be greater than 0".to_string(),
            ));
        }

        if self.split.evict_batch == 0 {
            return Err(IngestError::Config("evict_batch must be greater than 0".to_string()));
        }

        if self.split.write_batch == 0 {
            return Err(IngestError::Config("write_batch must be greater than 0".to_string()));
        }

        if self.seed.checkpoint_every == 0 {
            return Err(IngestError::Config(
                "checkpoint_every must be greater than 0".to_string(),
            ));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(IngestError::Config(format!(
                "initial retry delay ({}ms) exceeds max delay ({}ms)",
                self.retry.initial_delay_ms, self.retry.max_delay_ms
            )));
        }

        if self.database.max_connections == 0 {
            return Err(IngestError::Config(
                "database max_connections must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Split a comma-separated list, trimming and lowercasing entries
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| IngestError::Config(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(None),
    }
}
