//! Ingestion coordinator
//!
//! Drives every selected stage through
//!
//! ```text
//! pending -> running -> writing -> done
//! pending -> up_to_date
//! any     -> error
//! ```
//!
//! Stages run one after another. A provider or payload failure only fails its
//! own stage; a storage or checkpoint failure fails the stage and aborts the
//! rest of the run. Progress is checkpointed while covers are rehosted so an
//! interrupted run resumes without uploading the same cover twice.

use crate::checkpoint::{CheckpointFile, StageStatus};
use crate::config::{IngestConfig, DEFAULT_CHART_ROW_LIMIT, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_HOME_CACHE_KEY};
use crate::envelope::Envelope;
use crate::error::{IngestError, Result};
use crate::providers::ChartProvider;
use crate::rehost::{CoverHost, DEFAULT_DEPRECATED_HOST};
use crate::storage::{CacheStore, ChartCacheEntry, ChartStore};
use chartsync_common::fingerprint::{fingerprint, fingerprint_urls, record_key};
use chartsync_common::types::{chart_cache_key, is_on_host, ChartType, HomeItem, SongRecord, Source, Stage, StageKind};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub cache_ttl_secs: u64,
    /// Records between two checkpoint saves
    pub checkpoint_interval: usize,
    pub home_cache_key: String,
    pub deprecated_host: String,
    pub rehost_home_covers: bool,
    pub chart_row_limit: i64,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            cache_ttl_secs: crate::config::DEFAULT_CACHE_TTL_SECS,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            home_cache_key: DEFAULT_HOME_CACHE_KEY.to_string(),
            deprecated_host: DEFAULT_DEPRECATED_HOST.to_string(),
            rehost_home_covers: false,
            chart_row_limit: DEFAULT_CHART_ROW_LIMIT,
        }
    }
}

impl From<&IngestConfig> for CoordinatorOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            cache_ttl_secs: config.cache.ttl_secs,
            checkpoint_interval: config.checkpoint_interval.max(1),
            home_cache_key: config.cache.home_key.clone(),
            deprecated_host: config.rehost.deprecated_host.clone(),
            rehost_home_covers: config.rehost_home_covers,
            chart_row_limit: config.chart_row_limit,
        }
    }
}

/// Outcome of one stage
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    #[serde(skip)]
    pub stage: Stage,
    pub status: StageStatus,
    pub rows: usize,
    pub uploads: usize,
    pub reused: usize,
    /// Heavy work was skipped because the record set did not change
    pub skipped: bool,
    /// Crawled records dropped for missing fields
    pub dropped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageReport {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            rows: 0,
            uploads: 0,
            reused: 0,
            skipped: false,
            dropped: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub stages: Vec<StageReport>,
    /// Set when a storage or checkpoint failure stopped the run early
    pub aborted: Option<String>,
    pub cache_ttl_secs: u64,
}

impl RunReport {
    pub fn stage(&self, key: &str) -> Option<&StageReport> {
        self.stages.iter().find(|report| report.stage.key() == key)
    }

    pub fn failed(&self) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(|r| r.status == StageStatus::Error)
    }

    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.failed().next().is_none()
    }

    /// `ok` when something changed, `up_to_date` when every stage was unchanged
    pub fn message(&self) -> String {
        if let Some(reason) = &self.aborted {
            return reason.clone();
        }
        let failed: Vec<String> = self.failed().map(|r| r.stage.key()).collect();
        if !failed.is_empty() {
            return format!("stage(s) failed: {}", failed.join(", "));
        }
        let all_up_to_date =
            !self.stages.is_empty() && self.stages.iter().all(|r| r.status == StageStatus::UpToDate);
        let msg = if all_up_to_date { "up_to_date" } else { "ok" };
        msg.to_string()
    }

    pub fn to_envelope(&self) -> Envelope {
        let keys_with = |status: StageStatus| -> Vec<String> {
            self.stages
                .iter()
                .filter(|r| r.status == status)
                .map(|r| r.stage.key())
                .collect()
        };
        let processed: BTreeMap<String, &StageReport> =
            self.stages.iter().map(|r| (r.stage.key(), r)).collect();

        let data = json!({
            "run_id": self.run_id,
            "processed": processed,
            "cache_ttl": self.cache_ttl_secs,
            "changed": keys_with(StageStatus::Done),
            "skipped": keys_with(StageStatus::UpToDate),
            "failed": keys_with(StageStatus::Error),
            "checked_at": Utc::now(),
        });

        if self.is_success() {
            Envelope::ok(self.message(), data)
        } else {
            Envelope::error(self.message(), data)
        }
    }
}

/// Reader-facing homepage entry inside the aggregated document
#[derive(Debug, Serialize)]
struct HomeItemView<'a> {
    item_type: &'a str,
    item_id: &'a str,
    title: &'a str,
    subtitle: &'a str,
    url: &'a str,
    cover: &'a str,
    metric: i64,
}

pub struct IngestionCoordinator {
    providers: HashMap<Source, Arc<dyn ChartProvider>>,
    store: Arc<dyn ChartStore>,
    cache: Arc<dyn CacheStore>,
    covers: Arc<dyn CoverHost>,
    checkpoint: CheckpointFile,
    options: CoordinatorOptions,
}

impl IngestionCoordinator {
    pub fn new(
        providers: Vec<Arc<dyn ChartProvider>>,
        store: Arc<dyn ChartStore>,
        cache: Arc<dyn CacheStore>,
        covers: Arc<dyn CoverHost>,
        checkpoint: CheckpointFile,
        options: CoordinatorOptions,
    ) -> Self {
        let providers = providers.into_iter().map(|p| (p.source(), p)).collect();
        Self {
            providers,
            store,
            cache,
            covers,
            checkpoint,
            options,
        }
    }

    pub fn checkpoint(&self) -> &CheckpointFile {
        &self.checkpoint
    }

    /// Run `stages` in order and report every outcome
    pub async fn run(&mut self, stages: &[Stage]) -> RunReport {
        let run_id = self.checkpoint.state_mut().begin_run();
        info!(%run_id, stages = stages.len(), "Starting ingestion run");

        let mut report = RunReport {
            run_id,
            stages: Vec::with_capacity(stages.len()),
            aborted: None,
            cache_ttl_secs: self.options.cache_ttl_secs,
        };

        if let Err(e) = self.checkpoint.save().await {
            error!(error = %e, "Cannot write checkpoint, aborting run");
            report.aborted = Some(e.to_string());
            report.stages.extend(stages.iter().copied().map(StageReport::new));
            return report;
        }

        for &stage in stages {
            let mut stage_report = StageReport::new(stage);
            if report.aborted.is_some() {
                report.stages.push(stage_report);
                continue;
            }

            if let Err(err) = self.run_stage(stage, &mut stage_report).await {
                let key = stage.key();
                let message = err.to_string();
                error!(stage = %key, error = %message, "Stage failed");
                stage_report.status = StageStatus::Error;
                stage_report.error = Some(message.clone());
                self.checkpoint.state_mut().fail_stage(&key, &message);
                if let Err(save_err) = self.checkpoint.save().await {
                    warn!(stage = %key, error = %save_err, "Could not persist stage failure");
                }
                if err.aborts_run() {
                    report.aborted = Some(message);
                }
            }
            report.stages.push(stage_report);
        }

        let run_error = (!report.is_success()).then(|| report.message());
        self.checkpoint.state_mut().finish_run(run_error);
        if let Err(e) = self.checkpoint.save().await {
            error!(error = %e, "Could not persist final checkpoint");
            report.aborted.get_or_insert_with(|| e.to_string());
        }

        info!(
            %run_id,
            success = report.is_success(),
            msg = %report.message(),
            "Ingestion run finished"
        );
        report
    }

    #[instrument(skip_all, fields(stage = %stage))]
    async fn run_stage(&mut self, stage: Stage, report: &mut StageReport) -> Result<()> {
        let provider = self
            .providers
            .get(&stage.source)
            .cloned()
            .ok_or_else(|| IngestError::config(format!("no provider configured for {}", stage.source)))?;

        match stage.kind {
            StageKind::Chart(chart) => self.run_chart(provider.as_ref(), stage, chart, report).await,
            StageKind::Home => self.run_home(provider.as_ref(), stage, report).await,
        }
    }

    async fn run_chart(
        &mut self,
        provider: &dyn ChartProvider,
        stage: Stage,
        chart: ChartType,
        report: &mut StageReport,
    ) -> Result<()> {
        let key = stage.key();
        let crawled = provider.fetch_chart(chart).await?;
        let crawled_len = crawled.len();
        let mut records: Vec<SongRecord> = crawled.into_iter().filter(SongRecord::is_complete).collect();
        report.dropped = crawled_len - records.len();
        let total = records.len();
        let current = fingerprint(&records);
        debug!(stage = %key, total, dropped = report.dropped, fingerprint = %current, "Chart crawled");

        if self.checkpoint.state().is_unchanged(&key, &current) {
            info!(stage = %key, "Chart unchanged since last success, refreshing cache only");
            self.mark_up_to_date(&key, total, report).await?;
            let stored = self
                .store
                .load_chart(stage.source, chart, self.options.chart_row_limit)
                .await?;
            report.rows = stored.len();
            self.publish_chart(stage.source, chart, stored).await?;
            return Ok(());
        }

        self.set_stage(&key, StageStatus::Running, total, 0).await?;
        let known = self.store.chart_hosted_covers(stage.source, chart).await?;
        self.attach_covers(&key, records.iter_mut().collect(), &known, true, report)
            .await?;

        self.set_stage(&key, StageStatus::Writing, total, total).await?;
        let written = self.store.replace_chart(stage.source, chart, &records).await?;
        report.rows = usize::try_from(written).unwrap_or(total);
        self.publish_chart(stage.source, chart, records).await?;

        self.mark_done(&key, total, current, report).await?;
        info!(
            stage = %key,
            rows = report.rows,
            uploads = report.uploads,
            reused = report.reused,
            "Chart stage done"
        );
        Ok(())
    }

    async fn run_home(&mut self, provider: &dyn ChartProvider, stage: Stage, report: &mut StageReport) -> Result<()> {
        let key = stage.key();
        let crawled = provider.fetch_home().await?;
        let crawled_len = crawled.len();
        let mut items: Vec<HomeItem> = crawled.into_iter().filter(HomeItem::is_complete).collect();
        report.dropped = crawled_len - items.len();
        let total = items.len();
        let current = fingerprint_urls(items.iter().map(|item| item.record.canonical_url.as_str()));
        debug!(stage = %key, total, dropped = report.dropped, fingerprint = %current, "Homepage crawled");

        if self.checkpoint.state().is_unchanged(&key, &current) {
            info!(stage = %key, "Homepage unchanged since last success, refreshing cache only");
            self.mark_up_to_date(&key, total, report).await?;
            report.rows = self.publish_home(stage.source).await?;
            return Ok(());
        }

        self.set_stage(&key, StageStatus::Running, total, 0).await?;
        let known = self.store.home_hosted_covers(stage.source).await?;
        let allow_upload = self.options.rehost_home_covers;
        let records = items.iter_mut().map(|item| &mut item.record).collect();
        self.attach_covers(&key, records, &known, allow_upload, report).await?;

        self.set_stage(&key, StageStatus::Writing, total, total).await?;
        let written = self.store.replace_home(stage.source, &items).await?;
        report.rows = usize::try_from(written).unwrap_or(total);
        self.publish_home(stage.source).await?;

        self.mark_done(&key, total, current, report).await?;
        info!(
            stage = %key,
            rows = report.rows,
            uploads = report.uploads,
            reused = report.reused,
            "Homepage stage done"
        );
        Ok(())
    }

    /// Give every record a hosted cover: the checkpoint's earlier result, else
    /// the store's, else a fresh upload when `allow_upload` is set.
    async fn attach_covers(
        &mut self,
        key: &str,
        records: Vec<&mut SongRecord>,
        known: &HashMap<String, String>,
        allow_upload: bool,
        report: &mut StageReport,
    ) -> Result<()> {
        let total = records.len();
        let interval = self.options.checkpoint_interval.max(1);
        let deprecated = self.options.deprecated_host.clone();

        for (index, record) in records.into_iter().enumerate() {
            let entry_key = record_key(key, &record.canonical_url);
            let from_checkpoint = self
                .checkpoint
                .state()
                .reusable_cover(&entry_key, &deprecated)
                .map(str::to_string);
            let from_store = known
                .get(&record.canonical_url)
                .filter(|url| !url.is_empty() && !is_on_host(url, &deprecated))
                .cloned();

            let mut uploaded = false;
            record.hosted_cover_url = match from_checkpoint.or(from_store) {
                Some(url) => {
                    report.reused += 1;
                    Some(url)
                },
                None if allow_upload && !record.cover_url.is_empty() => {
                    match self.covers.rehost(&record.cover_url).await {
                        Ok(url) => {
                            report.uploads += 1;
                            uploaded = true;
                            Some(url)
                        },
                        Err(e) => {
                            warn!(stage = %key, cover = %record.cover_url, error = %e, "Cover rehost failed");
                            None
                        },
                    }
                },
                None => None,
            };

            let state = self.checkpoint.state_mut();
            state.record_cover(&entry_key, &record.canonical_url, record.hosted_cover_url.as_deref());
            let processed = index + 1;
            state.set_stage(key, StageStatus::Running, total, processed);
            if uploaded || processed % interval == 0 {
                self.checkpoint.save().await?;
            }
        }
        Ok(())
    }

    async fn publish_chart(&self, source: Source, chart: ChartType, mut records: Vec<SongRecord>) -> Result<()> {
        for record in &mut records {
            record.scrub_hosted_cover(&self.options.deprecated_host);
        }
        let entry = ChartCacheEntry {
            source,
            chart,
            updated_at: Utc::now(),
            list: &records,
        };
        let key = chart_cache_key(source, chart);
        self.cache
            .set_json(&key, &serde_json::to_value(&entry)?, self.options.cache_ttl_secs)
            .await?;
        debug!(key = %key, rows = records.len(), "Chart cache refreshed");
        Ok(())
    }

    /// Rebuild the aggregated homepage document from the store.
    /// Returns how many items `source` contributed.
    async fn publish_home(&self, source: Source) -> Result<usize> {
        let deprecated = self.options.deprecated_host.as_str();
        let mut per_source = Vec::with_capacity(Source::ALL.len());
        for &each in Source::ALL.iter() {
            per_source.push((each, self.store.load_home(each).await?));
        }

        let mut sources: BTreeMap<&str, BTreeMap<&str, Vec<HomeItemView<'_>>>> = BTreeMap::new();
        for (each, items) in &per_source {
            let sections = sources.entry(each.as_str()).or_default();
            for item in items {
                sections.entry(item.section.as_str()).or_default().push(HomeItemView {
                    item_type: item.kind.as_str(),
                    item_id: &item.item_id,
                    title: &item.record.title,
                    subtitle: &item.record.artist,
                    url: &item.record.canonical_url,
                    cover: item.record.display_cover(deprecated),
                    metric: item.metric,
                });
            }
        }

        let document = json!({
            "generated_at": Utc::now(),
            "sources": sources,
        });
        self.cache
            .set_json(&self.options.home_cache_key, &document, self.options.cache_ttl_secs)
            .await?;

        let contributed = per_source
            .iter()
            .find(|(each, _)| *each == source)
            .map_or(0, |(_, items)| items.len());
        debug!(key = %self.options.home_cache_key, contributed, "Homepage cache refreshed");
        Ok(contributed)
    }

    async fn set_stage(&mut self, key: &str, status: StageStatus, total: usize, processed: usize) -> Result<()> {
        self.checkpoint.state_mut().set_stage(key, status, total, processed);
        self.checkpoint.save().await
    }

    async fn mark_up_to_date(&mut self, key: &str, total: usize, report: &mut StageReport) -> Result<()> {
        report.status = StageStatus::UpToDate;
        report.skipped = true;
        self.set_stage(key, StageStatus::UpToDate, total, total).await
    }

    async fn mark_done(&mut self, key: &str, total: usize, fingerprint: String, report: &mut StageReport) -> Result<()> {
        report.status = StageStatus::Done;
        let state = self.checkpoint.state_mut();
        state.record_fingerprint(key, fingerprint);
        state.set_stage(key, StageStatus::Done, total, total);
        self.checkpoint.save().await
    }
}

/// Crawl every stage and report record counts without touching storage,
/// cache or checkpoint.
pub async fn dry_run(providers: &[Arc<dyn ChartProvider>], stages: &[Stage], crawler_mode: &str) -> Envelope {
    let mut counts = BTreeMap::new();
    let mut errors = BTreeMap::new();

    for &stage in stages {
        let key = stage.key();
        let Some(provider) = providers.iter().find(|p| p.source() == stage.source) else {
            errors.insert(key, format!("no provider configured for {}", stage.source));
            continue;
        };
        let crawled = match stage.kind {
            StageKind::Chart(chart) => provider.fetch_chart(chart).await.map(|records| records.len()),
            StageKind::Home => provider.fetch_home().await.map(|items| items.len()),
        };
        match crawled {
            Ok(count) => {
                debug!(stage = %key, count, "Dry run crawl");
                counts.insert(key, count);
            },
            Err(e) => {
                warn!(stage = %key, error = %e, "Dry run crawl failed");
                errors.insert(key, e.to_string());
            },
        }
    }

    let mut data = json!({
        "crawler_mode": crawler_mode,
        "counts": counts,
    });
    if errors.is_empty() {
        Envelope::ok("dry_run_ok", data)
    } else {
        data["errors"] = serde_json::to_value(&errors).unwrap_or(Value::Null);
        Envelope::error("dry_run_failed", data)
    }
}
