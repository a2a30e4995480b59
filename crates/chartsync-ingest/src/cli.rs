//! Command-line interface
//!
//! Every option can also be set through an environment variable; a `.env`
//! file in the working directory is honored.

use crate::config::{
    CacheConfig, CrawlerMode, DatabaseConfig, IngestConfig, ThrottleConfig, DEFAULT_CACHE_TTL_SECS,
    DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_CHECKPOINT_PATH, DEFAULT_DATABASE_MAX_CONNECTIONS, DEFAULT_DATABASE_URL,
    DEFAULT_FIXTURES_DIR, DEFAULT_HOME_CACHE_KEY, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_REDIS_URL,
    DEFAULT_THROTTLE_DELAY_MS, DEFAULT_THROTTLE_EVERY,
};
use crate::rehost::{RehostConfig, DEFAULT_DEPRECATED_HOST, DEFAULT_UPLOAD_FIELD, DEFAULT_UPLOAD_URL};
use crate::status::DEFAULT_TAIL_LINES;
use chartsync_common::logging::{DEFAULT_LOG_DIR, DEFAULT_LOG_FILE_PREFIX};
use chartsync_common::types::Stage;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Chart and homepage ingestion for QQ Music and NetEase Cloud Music
#[derive(Parser, Debug)]
#[command(name = "chartsync-ingest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Debug-level console logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl, rehost covers, and publish to the store and cache
    Run(RunArgs),

    /// Print the checkpoint summary and the recent log lines
    Status(StatusArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum CrawlerModeArg {
    /// Call the platforms
    Live,
    /// Replay captured payloads from --fixtures-dir
    Fixture,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Crawl and count only; no store, cache or checkpoint writes
    #[arg(long, env = "CHARTSYNC_DRY_RUN")]
    pub dry_run: bool,

    #[arg(long, value_enum, env = "CHARTSYNC_CRAWLER_MODE", default_value_t = CrawlerModeArg::Live)]
    pub crawler_mode: CrawlerModeArg,

    /// Capture directory used by `--crawler-mode fixture`
    #[arg(long, env = "CHARTSYNC_FIXTURES_DIR", default_value = DEFAULT_FIXTURES_DIR)]
    pub fixtures_dir: PathBuf,

    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    pub database_url: String,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = DEFAULT_DATABASE_MAX_CONNECTIONS)]
    pub db_max_connections: u32,

    /// Apply pending migrations before the run
    #[arg(long, env = "CHARTSYNC_AUTO_MIGRATE")]
    pub auto_migrate: bool,

    #[arg(long, env = "REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    pub redis_url: String,

    /// Cache entry lifetime in seconds (0 = no expiry)
    #[arg(long, env = "CHARTSYNC_CACHE_TTL", default_value_t = DEFAULT_CACHE_TTL_SECS)]
    pub cache_ttl: u64,

    #[arg(long, env = "CHARTSYNC_HOME_CACHE_KEY", default_value = DEFAULT_HOME_CACHE_KEY)]
    pub home_cache_key: String,

    /// Progress file shared with `status`
    #[arg(long, env = "CHARTSYNC_CHECKPOINT", default_value = DEFAULT_CHECKPOINT_PATH)]
    pub checkpoint: PathBuf,

    #[arg(long, env = "CHARTSYNC_CHECKPOINT_INTERVAL", default_value_t = DEFAULT_CHECKPOINT_INTERVAL)]
    pub checkpoint_interval: usize,

    /// NetEase cookie file (`k=v; k=v`); optional
    #[arg(long, env = "CHARTSYNC_NETEASE_COOKIE")]
    pub netease_cookie: Option<PathBuf>,

    /// QQ Music cookie file (`k=v; k=v`); required in live mode
    #[arg(long, env = "CHARTSYNC_QQ_COOKIE")]
    pub qq_cookie: Option<PathBuf>,

    #[arg(long, env = "CHARTSYNC_UPLOAD_URL", default_value = DEFAULT_UPLOAD_URL)]
    pub upload_url: String,

    #[arg(long, env = "CHARTSYNC_UPLOAD_FIELD", default_value = DEFAULT_UPLOAD_FIELD)]
    pub upload_field: String,

    /// Where covers are staged before upload (defaults to the system temp dir)
    #[arg(long, env = "CHARTSYNC_TMP_DIR")]
    pub tmp_dir: Option<PathBuf>,

    /// Hosted URLs on this host are never reused or published
    #[arg(long, env = "CHARTSYNC_DEPRECATED_HOST", default_value = DEFAULT_DEPRECATED_HOST)]
    pub deprecated_host: String,

    /// Also rehost homepage covers
    #[arg(long, env = "CHARTSYNC_REHOST_HOME_COVERS")]
    pub rehost_home_covers: bool,

    /// Provider calls between two pauses (0 disables)
    #[arg(long, env = "CHARTSYNC_THROTTLE_EVERY", default_value_t = DEFAULT_THROTTLE_EVERY)]
    pub throttle_every: u32,

    #[arg(long, env = "CHARTSYNC_THROTTLE_DELAY_MS", default_value_t = DEFAULT_THROTTLE_DELAY_MS)]
    pub throttle_delay_ms: u64,

    #[arg(long, env = "CHARTSYNC_HTTP_TIMEOUT", default_value_t = DEFAULT_HTTP_TIMEOUT_SECS)]
    pub http_timeout: u64,

    /// Only run these stages, e.g. `qq:hot` or `wyy:home` (repeatable)
    #[arg(long = "stage", env = "CHARTSYNC_STAGES", value_delimiter = ',', value_parser = parse_stage)]
    pub stages: Vec<Stage>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[arg(long, env = "CHARTSYNC_CHECKPOINT", default_value = DEFAULT_CHECKPOINT_PATH)]
    pub checkpoint: PathBuf,

    #[arg(long, env = "LOG_DIR", default_value = DEFAULT_LOG_DIR)]
    pub log_dir: PathBuf,

    #[arg(long, env = "LOG_FILE_PREFIX", default_value = DEFAULT_LOG_FILE_PREFIX)]
    pub log_prefix: String,

    /// Log lines to include
    #[arg(long, default_value_t = DEFAULT_TAIL_LINES)]
    pub lines: usize,
}

fn parse_stage(raw: &str) -> Result<Stage, String> {
    raw.trim().parse().map_err(|e: chartsync_common::Error| e.to_string())
}

impl RunArgs {
    pub fn crawler_mode(&self) -> CrawlerMode {
        match self.crawler_mode {
            CrawlerModeArg::Live => CrawlerMode::Live,
            CrawlerModeArg::Fixture => CrawlerMode::Fixture(self.fixtures_dir.clone()),
        }
    }

    pub fn to_config(&self) -> IngestConfig {
        let defaults = IngestConfig::default();
        IngestConfig {
            mode: self.crawler_mode(),
            dry_run: self.dry_run,
            database: DatabaseConfig {
                url: self.database_url.clone(),
                max_connections: self.db_max_connections,
                auto_migrate: self.auto_migrate,
                ..DatabaseConfig::default()
            },
            cache: CacheConfig {
                url: self.redis_url.clone(),
                ttl_secs: self.cache_ttl,
                home_key: self.home_cache_key.clone(),
            },
            checkpoint_path: self.checkpoint.clone(),
            checkpoint_interval: self.checkpoint_interval,
            netease_cookie: self.netease_cookie.clone(),
            qq_cookie: self.qq_cookie.clone(),
            rehost: RehostConfig {
                upload_url: self.upload_url.clone(),
                field_name: self.upload_field.clone(),
                tmp_dir: self.tmp_dir.clone().unwrap_or_else(std::env::temp_dir),
                deprecated_host: self.deprecated_host.clone(),
            },
            rehost_home_covers: self.rehost_home_covers,
            throttle: ThrottleConfig {
                every: self.throttle_every,
                delay: Duration::from_millis(self.throttle_delay_ms),
            },
            http_timeout: Duration::from_secs(self.http_timeout),
            stages: self.stages.clone(),
            ..defaults
        }
    }
}
