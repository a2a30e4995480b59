//! Shared fakes for coordinator and HTTP tests
//!
//! In-memory implementations of the storage and cover-host seams, plus a
//! provider whose output the test controls.

#![allow(dead_code)]

use async_trait::async_trait;
use chartsync_common::types::{ChartType, HomeItem, ItemKind, SongRecord, Source};
use chartsync_ingest::error::{IngestError, Result};
use chartsync_ingest::providers::ChartProvider;
use chartsync_ingest::rehost::{CoverHost, RehostError};
use chartsync_ingest::storage::{CacheStore, ChartStore};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Initialize tracing for tests
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,chartsync_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn song(n: usize, source: Source) -> SongRecord {
    let url = match source {
        Source::Netease => format!("https://music.163.com/song?id={n}"),
        Source::Qq => format!("https://y.qq.com/n/ryqq/songDetail/mid{n}"),
    };
    SongRecord::new(
        format!("Song {n}"),
        format!("Artist {n}"),
        url,
        format!("https://p1.music.126.net/cover/{n}.jpg"),
    )
}

pub fn songs(range: std::ops::Range<usize>, source: Source) -> Vec<SongRecord> {
    range.map(|n| song(n, source)).collect()
}

pub fn home_item(source: Source, section: &str, kind: ItemKind, id: &str) -> HomeItem {
    HomeItem {
        source,
        section: section.to_string(),
        kind,
        item_id: id.to_string(),
        record: SongRecord::new(
            format!("{section} {id}"),
            "",
            format!("https://music.163.com/playlist?id={id}"),
            format!("https://p1.music.126.net/home/{id}.jpg"),
        ),
        metric: 1000,
        payload: serde_json::json!({ "id": id }),
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Provider serving whatever the test put in it
pub struct ScriptedProvider {
    source: Source,
    charts: Mutex<HashMap<ChartType, Vec<SongRecord>>>,
    home: Mutex<Vec<HomeItem>>,
    failing: Mutex<HashSet<ChartType>>,
    pub fetches: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            charts: Mutex::new(HashMap::new()),
            home: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_chart(self, chart: ChartType, records: Vec<SongRecord>) -> Self {
        self.set_chart(chart, records);
        self
    }

    pub fn with_home(self, items: Vec<HomeItem>) -> Self {
        *self.home.lock().unwrap() = items;
        self
    }

    pub fn set_chart(&self, chart: ChartType, records: Vec<SongRecord>) {
        self.charts.lock().unwrap().insert(chart, records);
    }

    /// Make `fetch_chart(chart)` fail the way an unresolvable QQ period does
    pub fn fail_chart(&self, chart: ChartType) {
        self.failing.lock().unwrap().insert(chart);
    }
}

#[async_trait]
impl ChartProvider for ScriptedProvider {
    fn source(&self) -> Source {
        self.source
    }

    async fn fetch_chart(&self, chart: ChartType) -> Result<Vec<SongRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&chart) {
            return Err(IngestError::PeriodUnresolved { top_id: 26 });
        }
        Ok(self.charts.lock().unwrap().get(&chart).cloned().unwrap_or_default())
    }

    async fn fetch_home(&self) -> Result<Vec<HomeItem>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.home.lock().unwrap().clone())
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    charts: Mutex<HashMap<(Source, ChartType), Vec<SongRecord>>>,
    home: Mutex<HashMap<Source, Vec<HomeItem>>>,
    fail_writes: AtomicBool,
    pub replace_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn chart(&self, source: Source, chart: ChartType) -> Vec<SongRecord> {
        self.charts
            .lock()
            .unwrap()
            .get(&(source, chart))
            .cloned()
            .unwrap_or_default()
    }

    pub fn seed_chart(&self, source: Source, chart: ChartType, records: Vec<SongRecord>) {
        self.charts.lock().unwrap().insert((source, chart), records);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(IngestError::Database(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }
}

fn hosted_map<'a>(records: impl Iterator<Item = &'a SongRecord>) -> HashMap<String, String> {
    records
        .filter_map(|r| {
            r.hosted_cover_url
                .as_ref()
                .filter(|url| !url.is_empty())
                .map(|url| (r.canonical_url.clone(), url.clone()))
        })
        .collect()
}

#[async_trait]
impl ChartStore for MemoryStore {
    async fn load_chart(&self, source: Source, chart: ChartType, limit: i64) -> Result<Vec<SongRecord>> {
        let mut rows = self.chart(source, chart);
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }

    async fn chart_hosted_covers(&self, source: Source, chart: ChartType) -> Result<HashMap<String, String>> {
        Ok(hosted_map(self.chart(source, chart).iter()))
    }

    async fn replace_chart(&self, source: Source, chart: ChartType, records: &[SongRecord]) -> Result<u64> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        self.charts.lock().unwrap().insert((source, chart), records.to_vec());
        Ok(records.len() as u64)
    }

    async fn load_home(&self, source: Source) -> Result<Vec<HomeItem>> {
        Ok(self.home.lock().unwrap().get(&source).cloned().unwrap_or_default())
    }

    async fn home_hosted_covers(&self, source: Source) -> Result<HashMap<String, String>> {
        let items = self.load_home(source).await?;
        Ok(hosted_map(items.iter().map(|item| &item.record)))
    }

    async fn replace_home(&self, source: Source, items: &[HomeItem]) -> Result<u64> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        self.home.lock().unwrap().insert(source, items.to_vec());
        Ok(items.len() as u64)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Value, u64)>>,
    pub writes: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().unwrap().get(key).map(|(value, _)| value.clone())
    }

    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.entries.lock().unwrap().get(key).map(|(_, ttl)| *ttl)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn set_json(&self, key: &str, value: &Value, ttl_secs: u64) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.clone(), ttl_secs));
        Ok(())
    }
}

// ============================================================================
// Cover host
// ============================================================================

/// Hands out `https://img.example.com/{n}.jpg` and counts uploads
#[derive(Default)]
pub struct CountingHost {
    pub calls: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    hang_after: Mutex<Option<usize>>,
    /// Signalled when a call starts hanging
    pub hung: Notify,
}

impl CountingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, source_url: &str) {
        self.failing.lock().unwrap().insert(source_url.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// After `uploads` completed calls, every further call never returns,
    /// like a process killed mid-upload. `None` lifts the hang.
    pub fn hang_after(&self, uploads: Option<usize>) {
        *self.hang_after.lock().unwrap() = uploads;
    }
}

#[async_trait]
impl CoverHost for CountingHost {
    async fn rehost(&self, source_url: &str) -> std::result::Result<String, RehostError> {
        let limit = *self.hang_after.lock().unwrap();
        if limit.is_some_and(|limit| self.calls() >= limit) {
            self.hung.notify_one();
            std::future::pending::<()>().await;
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.lock().unwrap().contains(source_url) {
            return Err(RehostError::UploadStatus(502));
        }
        Ok(format!("https://img.example.com/{n}.jpg"))
    }
}
