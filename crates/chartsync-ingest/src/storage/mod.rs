//! Storage gateway
//!
//! The relational store is the source of truth; the cache only ever holds
//! documents that can be regenerated from it.

pub mod cache;
pub mod postgres;

use crate::error::Result;
use async_trait::async_trait;
use chartsync_common::types::{ChartType, HomeItem, SongRecord, Source};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

pub use cache::RedisCache;
pub use postgres::PgChartStore;

/// Relational partitions owned by the stages.
///
/// Each `replace_*` call swaps a whole partition inside one transaction, so
/// concurrent readers see either the old or the new set.
#[async_trait]
pub trait ChartStore: Send + Sync {
    /// Rows of one chart in insertion order
    async fn load_chart(&self, source: Source, chart: ChartType, limit: i64) -> Result<Vec<SongRecord>>;

    /// canonical URL -> hosted cover for rows that have one
    async fn chart_hosted_covers(&self, source: Source, chart: ChartType) -> Result<HashMap<String, String>>;

    async fn replace_chart(&self, source: Source, chart: ChartType, records: &[SongRecord]) -> Result<u64>;

    async fn load_home(&self, source: Source) -> Result<Vec<HomeItem>>;

    async fn home_hosted_covers(&self, source: Source) -> Result<HashMap<String, String>>;

    async fn replace_home(&self, source: Source, items: &[HomeItem]) -> Result<u64>;
}

/// Key-value cache with per-key expiry
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Store `value` under `key`; a zero TTL stores without expiry.
    async fn set_json(&self, key: &str, value: &Value, ttl_secs: u64) -> Result<()>;
}

/// Cache document of one chart stage
#[derive(Debug, Serialize)]
pub struct ChartCacheEntry<'a> {
    pub source: Source,
    #[serde(rename = "type")]
    pub chart: ChartType,
    pub updated_at: DateTime<Utc>,
    pub list: &'a [SongRecord],
}
