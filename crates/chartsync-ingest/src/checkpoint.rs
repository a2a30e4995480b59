//! Durable run progress
//!
//! One JSON document records per-stage status and progress, the fingerprint
//! of each stage's last successful record set, and the rehost result of
//! every processed record. Saves go to a temp file in the same directory
//! which is then renamed over the target, so a status reader sees either the
//! previous or the next document and never a torn write.
//!
//! There is no lock: a single runner per checkpoint file is assumed.

use crate::error::{IngestError, Result};
use chartsync_common::types::is_on_host;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-stage state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Writing,
    Done,
    UpToDate,
    Error,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Writing => "writing",
            StageStatus::Done => "done",
            StageStatus::UpToDate => "up_to_date",
            StageStatus::Error => "error",
        }
    }

    /// The stage's stored fingerprint describes data that reached the store.
    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Done | StageStatus::UpToDate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Done,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    pub status: StageStatus,
    pub total: usize,
    pub processed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Side effect of processing one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordProgress {
    pub share_url: String,
    /// Empty when the record has no cover or its rehost failed
    #[serde(default)]
    pub hosted_cover_url: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub run_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub stages: BTreeMap<String, StageProgress>,
    #[serde(default)]
    pub fingerprints: BTreeMap<String, String>,
    #[serde(default)]
    pub records: BTreeMap<String, RecordProgress>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            run_id: None,
            created_at: now,
            started_at: None,
            updated_at: now,
            status: RunStatus::Idle,
            error: None,
            stages: BTreeMap::new(),
            fingerprints: BTreeMap::new(),
            records: BTreeMap::new(),
        }
    }
}

impl Checkpoint {
    /// Mark the start of a new run and return its id
    pub fn begin_run(&mut self) -> Uuid {
        let run_id = Uuid::new_v4();
        self.run_id = Some(run_id);
        self.started_at = Some(Utc::now());
        self.status = RunStatus::Running;
        self.error = None;
        run_id
    }

    pub fn finish_run(&mut self, error: Option<String>) {
        self.status = if error.is_some() {
            RunStatus::Error
        } else {
            RunStatus::Done
        };
        self.error = error;
    }

    pub fn stage(&self, key: &str) -> Option<&StageProgress> {
        self.stages.get(key)
    }

    pub fn set_stage(&mut self, key: &str, status: StageStatus, total: usize, processed: usize) {
        let stage = self.stages.entry(key.to_string()).or_default();
        stage.status = status;
        stage.total = total;
        stage.processed = processed;
        stage.updated_at = Some(Utc::now());
        if status != StageStatus::Error {
            stage.error = None;
        }
    }

    pub fn fail_stage(&mut self, key: &str, message: impl Into<String>) {
        let stage = self.stages.entry(key.to_string()).or_default();
        stage.status = StageStatus::Error;
        stage.error = Some(message.into());
        stage.updated_at = Some(Utc::now());
    }

    /// True when `fingerprint` matches the last successful set of the stage
    /// and the stage's latest outcome was a success.
    pub fn is_unchanged(&self, key: &str, fingerprint: &str) -> bool {
        self.fingerprints.get(key).map(String::as_str) == Some(fingerprint)
            && self.stage(key).is_some_and(|s| s.status.is_success())
    }

    pub fn record_fingerprint(&mut self, key: &str, fingerprint: impl Into<String>) {
        self.fingerprints.insert(key.to_string(), fingerprint.into());
    }

    /// Previously rehosted cover for a record, unless it is empty or deprecated
    pub fn reusable_cover(&self, record_key: &str, deprecated_host: &str) -> Option<&str> {
        self.records
            .get(record_key)
            .map(|r| r.hosted_cover_url.as_str())
            .filter(|url| !url.is_empty() && !is_on_host(url, deprecated_host))
    }

    pub fn record_cover(&mut self, record_key: &str, share_url: &str, hosted: Option<&str>) {
        self.records.insert(
            record_key.to_string(),
            RecordProgress {
                share_url: share_url.to_string(),
                hosted_cover_url: hosted.unwrap_or_default().to_string(),
                updated_at: Utc::now(),
            },
        );
    }
}

/// A checkpoint bound to its file. Without a path it lives in memory only.
#[derive(Debug, Default)]
pub struct CheckpointFile {
    path: Option<PathBuf>,
    state: Checkpoint,
}

impl CheckpointFile {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load `path`, starting fresh when it does not exist yet.
    /// A file that exists but cannot be decoded is an error.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                IngestError::checkpoint(format!("{} is not a valid checkpoint: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No checkpoint yet, starting fresh");
                Checkpoint::default()
            },
            Err(e) => {
                return Err(IngestError::checkpoint(format!("read {}: {e}", path.display())))
            },
        };
        Ok(Self {
            path: Some(path),
            state,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn state(&self) -> &Checkpoint {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut Checkpoint {
        &mut self.state
    }

    pub async fn save(&mut self) -> Result<()> {
        self.state.updated_at = Utc::now();
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&self.state)?;

        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes).map_err(|e| (path, e)))
            .await
            .map_err(|e| IngestError::checkpoint(format!("save task failed: {e}")))?
            .map_err(|(path, e)| {
                warn!(path = %path.display(), error = %e, "Checkpoint save failed");
                IngestError::checkpoint(format!("write {}: {e}", path.display()))
            })
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".checkpoint")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
