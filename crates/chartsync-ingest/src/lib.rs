//! Chartsync Ingest
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Crawls trending charts and homepage content from QQ Music and NetEase
//! Cloud Music, rehosts cover images, and publishes the results to
//! PostgreSQL and Redis.
//!
//! # Overview
//!
//! - **Codecs**: request signing for both platforms (`weapi`, `musicu`)
//! - **Providers**: live and fixture adapters producing canonical records
//! - **Rehost**: cover download and upload to the image host
//! - **Checkpoint**: durable per-stage and per-record progress
//! - **Coordinator**: the per-stage state machine tying it all together
//! - **Status**: read-only view of the checkpoint and recent logs

pub mod checkpoint;
pub mod cli;
pub mod codec;
pub mod config;
pub mod cookie;
pub mod coordinator;
pub mod envelope;
pub mod error;
pub mod providers;
pub mod rehost;
pub mod status;
pub mod storage;
pub mod throttle;

pub use cli::{Cli, Commands};
pub use config::{CrawlerMode, IngestConfig};
pub use coordinator::{dry_run, CoordinatorOptions, IngestionCoordinator, RunReport, StageReport};
pub use envelope::Envelope;
pub use error::{IngestError, Result};
