//! Chartsync Ingest - entry point
//!
//! Prints exactly one `{code, msg, data}` JSON document on stdout; all logs
//! go to stderr and the rotating log file.

use anyhow::{Context, Result};
use chartsync_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use chartsync_common::types::{Source, Stage};
use chartsync_ingest::checkpoint::CheckpointFile;
use chartsync_ingest::cli::{RunArgs, StatusArgs};
use chartsync_ingest::cookie::CookieJar;
use chartsync_ingest::providers::{build_client, ChartProvider, FixtureProvider, NeteaseProvider, QqProvider};
use chartsync_ingest::rehost::ImageRehoster;
use chartsync_ingest::storage::{PgChartStore, RedisCache};
use chartsync_ingest::throttle::Throttle;
use chartsync_ingest::{
    dry_run, status, Cli, Commands, CoordinatorOptions, CrawlerMode, Envelope, IngestConfig, IngestionCoordinator,
};
use clap::Parser;
use serde_json::Value;
use std::path::Path;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose { LogLevel::Debug } else { LogLevel::Info };
    // `status` only reads; it should not create log files of its own.
    let output = match cli.command {
        Commands::Run(_) => LogOutput::Both,
        Commands::Status(_) => LogOutput::Console,
    };
    let log_config = LogConfig::builder()
        .level(level)
        .output(output)
        .build()
        .merge_env()
        .unwrap_or_else(|e| {
            eprintln!("Ignoring invalid LOG_* settings: {e}");
            LogConfig::builder().level(level).output(output).build()
        });
    let log_guard = init_logging(&log_config).unwrap_or_else(|e| {
        eprintln!("Logging disabled: {e:#}");
        None
    });

    let result = match &cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Status(args) => show_status(args).await,
    };

    let envelope = result.unwrap_or_else(|e| {
        error!(error = %format!("{e:#}"), "Command failed");
        Envelope::error(format!("{e:#}"), Value::Null)
    });

    info!(code = envelope.code, msg = %envelope.msg, "chartsync-ingest finished");
    println!("{}", envelope.to_json());

    // Flush the file appender; `process::exit` skips destructors.
    drop(log_guard);
    if !envelope.is_success() {
        process::exit(1);
    }
}

async fn run(args: &RunArgs) -> Result<Envelope> {
    let config = args.to_config();
    config.validate()?;
    let stages = config.selected_stages();
    info!(
        mode = config.mode.as_str(),
        dry_run = config.dry_run,
        stages = ?stages.iter().map(Stage::key).collect::<Vec<_>>(),
        "Starting chartsync-ingest"
    );

    let providers = build_providers(&config, &stages).await?;
    if config.dry_run {
        return Ok(dry_run(&providers, &stages, config.mode.as_str()).await);
    }

    let store = PgChartStore::connect(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;
    if config.database.auto_migrate {
        store.migrate().await?;
    }
    let cache = RedisCache::connect(&config.cache.url)
        .await
        .context("Failed to connect to Redis")?;
    let rehoster = ImageRehoster::new(build_client(config.http_timeout)?, config.rehost.clone());
    let checkpoint = CheckpointFile::load(&config.checkpoint_path).await?;

    let mut coordinator = IngestionCoordinator::new(
        providers,
        Arc::new(store),
        Arc::new(cache),
        Arc::new(rehoster),
        checkpoint,
        CoordinatorOptions::from(&config),
    );
    let report = coordinator.run(&stages).await;
    Ok(report.to_envelope())
}

async fn show_status(args: &StatusArgs) -> Result<Envelope> {
    let snapshot = status::snapshot(&args.checkpoint, &args.log_dir, &args.log_prefix, args.lines).await?;
    Ok(snapshot.to_envelope())
}

async fn build_providers(config: &IngestConfig, stages: &[Stage]) -> Result<Vec<Arc<dyn ChartProvider>>> {
    let needed: Vec<Source> = Source::ALL
        .iter()
        .copied()
        .filter(|source| stages.iter().any(|stage| stage.source == *source))
        .collect();

    if let CrawlerMode::Fixture(dir) = &config.mode {
        return Ok(needed
            .into_iter()
            .map(|source| Arc::new(FixtureProvider::new(source, dir.clone())) as Arc<dyn ChartProvider>)
            .collect());
    }

    let client = build_client(config.http_timeout)?;
    let throttle = Arc::new(if config.throttle.every == 0 {
        Throttle::disabled()
    } else {
        Throttle::new(config.throttle.every, config.throttle.delay)
    });

    let mut providers: Vec<Arc<dyn ChartProvider>> = Vec::with_capacity(needed.len());
    for source in needed {
        match source {
            Source::Netease => {
                let cookie = load_cookie(config.netease_cookie.as_deref()).await?;
                providers.push(Arc::new(NeteaseProvider::new(
                    client.clone(),
                    config.netease.clone(),
                    cookie,
                    throttle.clone(),
                )));
            },
            Source::Qq => {
                let cookie = load_cookie(config.qq_cookie.as_deref()).await?;
                providers.push(Arc::new(QqProvider::new(
                    client.clone(),
                    config.qq.clone(),
                    cookie,
                    throttle.clone(),
                )?));
            },
        }
    }
    Ok(providers)
}

async fn load_cookie(path: Option<&Path>) -> Result<Option<CookieJar>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let jar = CookieJar::from_file(path)
        .await
        .with_context(|| format!("Failed to read cookie file {}", path.display()))?;
    if jar.is_none() {
        warn!(path = %path.display(), "Cookie file missing or empty");
    }
    Ok(jar)
}
