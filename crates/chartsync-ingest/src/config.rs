//! Run configuration

use crate::error::{IngestError, Result};
use crate::providers::{NeteaseConfig, QqConfig};
use crate::rehost::RehostConfig;
use chartsync_common::types::Stage;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Ingestion Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/chartsync";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default Redis URL for local development.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";

/// Default cache entry lifetime in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 600;

/// Cache key of the aggregated homepage document.
pub const DEFAULT_HOME_CACHE_KEY: &str = "home:index";

/// Default checkpoint location.
pub const DEFAULT_CHECKPOINT_PATH: &str = "./data/chartsync_progress.json";

/// Records processed between two checkpoint saves.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 3;

/// Provider calls between two throttle pauses.
pub const DEFAULT_THROTTLE_EVERY: u32 = 5;

/// Throttle pause in milliseconds.
pub const DEFAULT_THROTTLE_DELAY_MS: u64 = 1000;

/// Per-request HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;

/// Upper bound on chart rows read back when refreshing a cache entry.
pub const DEFAULT_CHART_ROW_LIMIT: i64 = 200;

/// Default fixture directory for replay mode.
pub const DEFAULT_FIXTURES_DIR: &str = "./fixtures";

/// Where provider payloads come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlerMode {
    Live,
    Fixture(PathBuf),
}

impl CrawlerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlerMode::Live => "live",
            CrawlerMode::Fixture(_) => "fixture",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            auto_migrate: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub url: String,
    pub ttl_secs: u64,
    pub home_key: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            home_key: DEFAULT_HOME_CACHE_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub every: u32,
    pub delay: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            every: DEFAULT_THROTTLE_EVERY,
            delay: Duration::from_millis(DEFAULT_THROTTLE_DELAY_MS),
        }
    }
}

/// Everything one `run` needs
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub mode: CrawlerMode,
    pub dry_run: bool,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub checkpoint_path: PathBuf,
    pub checkpoint_interval: usize,
    pub netease_cookie: Option<PathBuf>,
    pub qq_cookie: Option<PathBuf>,
    pub netease: NeteaseConfig,
    pub qq: QqConfig,
    pub rehost: RehostConfig,
    pub rehost_home_covers: bool,
    pub throttle: ThrottleConfig,
    pub http_timeout: Duration,
    pub chart_row_limit: i64,
    /// Empty means every stage
    pub stages: Vec<Stage>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mode: CrawlerMode::Live,
            dry_run: false,
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            netease_cookie: None,
            qq_cookie: None,
            netease: NeteaseConfig::default(),
            qq: QqConfig::default(),
            rehost: RehostConfig::default(),
            rehost_home_covers: false,
            throttle: ThrottleConfig::default(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            chart_row_limit: DEFAULT_CHART_ROW_LIMIT,
            stages: Vec::new(),
        }
    }
}

impl IngestConfig {
    /// Selected stages in run order, deduplicated
    pub fn selected_stages(&self) -> Vec<Stage> {
        if self.stages.is_empty() {
            return Stage::all();
        }
        Stage::all()
            .into_iter()
            .filter(|stage| self.stages.contains(stage))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if let CrawlerMode::Fixture(dir) = &self.mode {
            if dir.as_os_str().is_empty() {
                return Err(IngestError::config("Fixture mode needs a fixtures directory"));
            }
        }

        if self.dry_run {
            return Ok(());
        }

        if self.database.url.is_empty() {
            return Err(IngestError::config("Database URL cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(IngestError::config("Database max_connections must be greater than 0"));
        }
        if self.cache.url.is_empty() {
            return Err(IngestError::config("Redis URL cannot be empty"));
        }
        if self.cache.home_key.is_empty() {
            return Err(IngestError::config("Homepage cache key cannot be empty"));
        }
        if self.checkpoint_path.as_os_str().is_empty() {
            return Err(IngestError::config("Checkpoint path cannot be empty"));
        }
        if self.checkpoint_interval == 0 {
            return Err(IngestError::config("Checkpoint interval must be greater than 0"));
        }
        if self.rehost.upload_url.is_empty() {
            return Err(IngestError::config("Upload URL cannot be empty"));
        }
        if self.cache.ttl_secs == 0 {
            tracing::warn!("Cache TTL is 0 - entries will never expire");
        }

        Ok(())
    }
}
