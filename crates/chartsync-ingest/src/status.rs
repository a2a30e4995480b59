//! Read-only status snapshot
//!
//! Reads the checkpoint and the tail of the newest log file. Never writes,
//! so it is safe to call while a run is in progress.

use crate::checkpoint::{Checkpoint, CheckpointFile, RunStatus, StageProgress};
use crate::envelope::Envelope;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_TAIL_LINES: usize = 200;

/// Bytes read from the end of the log file at most
pub const TAIL_WINDOW_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub checkpoint_path: PathBuf,
    pub checkpoint_exists: bool,
    pub run_id: Option<Uuid>,
    pub status: RunStatus,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub stages: BTreeMap<String, StageProgress>,
    pub fingerprints: BTreeMap<String, String>,
    pub records: usize,
    pub log_file: Option<PathBuf>,
    pub log_tail: Vec<String>,
}

impl StatusSnapshot {
    fn from_checkpoint(path: &Path, exists: bool, state: &Checkpoint) -> Self {
        Self {
            checkpoint_path: path.to_path_buf(),
            checkpoint_exists: exists,
            run_id: state.run_id,
            status: state.status,
            error: state.error.clone(),
            started_at: state.started_at,
            updated_at: exists.then_some(state.updated_at),
            stages: state.stages.clone(),
            fingerprints: state.fingerprints.clone(),
            records: state.records.len(),
            log_file: None,
            log_tail: Vec::new(),
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        match serde_json::to_value(self) {
            Ok(data) => Envelope::ok("ok", data),
            Err(e) => Envelope::error(e.to_string(), serde_json::Value::Null),
        }
    }
}

/// Snapshot of `checkpoint_path` plus the last `tail_lines` lines of the
/// newest `{log_prefix}*` file in `log_dir`.
pub async fn snapshot(
    checkpoint_path: &Path,
    log_dir: &Path,
    log_prefix: &str,
    tail_lines: usize,
) -> Result<StatusSnapshot> {
    let exists = tokio::fs::try_exists(checkpoint_path).await.unwrap_or(false);
    let checkpoint = CheckpointFile::load(checkpoint_path).await?;
    let mut snapshot = StatusSnapshot::from_checkpoint(checkpoint_path, exists, checkpoint.state());

    if let Some(log_file) = newest_log_file(log_dir, log_prefix).await? {
        snapshot.log_tail = tail(&log_file, tail_lines).await?;
        snapshot.log_file = Some(log_file);
    }
    Ok(snapshot)
}

/// Most recently modified regular file in `dir` whose name starts with `prefix`
pub async fn newest_log_file(dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "Log directory does not exist");
            return Ok(None);
        },
        Err(e) => return Err(e.into()),
    };

    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_name().to_string_lossy().starts_with(prefix) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified()?;
        if newest.as_ref().is_none_or(|(best, _)| modified > *best) {
            newest = Some((modified, entry.path()));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

/// Last `lines` lines of `path`, reading at most [`TAIL_WINDOW_BYTES`]
pub async fn tail(path: &Path, lines: usize) -> Result<Vec<String>> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(TAIL_WINDOW_BYTES);
    file.seek(SeekFrom::Start(start)).await?;

    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf).await?;
    let text = String::from_utf8_lossy(&buf);

    let mut all: Vec<&str> = text.lines().collect();
    // The first line is likely cut in half when reading from the middle.
    if start > 0 && !all.is_empty() {
        all.remove(0);
    }
    let skip = all.len().saturating_sub(lines);
    Ok(all[skip..].iter().map(|line| line.to_string()).collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::checkpoint::StageStatus;

    #[tokio::test]
    async fn test_tail_keeps_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chartsync.log");
        let content: String = (1..=10).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&path, content).unwrap();

        let lines = tail(&path, 3).await.unwrap();
        assert_eq!(lines, vec!["line 8", "line 9", "line 10"]);
        assert_eq!(tail(&path, 50).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_tail_of_large_file_drops_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chartsync.log");
        let line = "x".repeat(99);
        let content: String = (0..2000).map(|_| format!("{line}\n")).collect();
        std::fs::write(&path, content).unwrap();

        let lines = tail(&path, usize::MAX).await.unwrap();
        assert!(lines.len() < 2000);
        assert!(lines.iter().all(|l| l.len() == 99));
    }

    #[tokio::test]
    async fn test_newest_log_file_filters_prefix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("other.log"), "x").unwrap();
        assert!(newest_log_file(dir.path(), "chartsync").await.unwrap().is_none());

        std::fs::write(dir.path().join("chartsync.2024-10-18"), "a").unwrap();
        let found = newest_log_file(dir.path(), "chartsync").await.unwrap().unwrap();
        assert!(found.ends_with("chartsync.2024-10-18"));

        let missing = dir.path().join("nope");
        assert!(newest_log_file(&missing, "chartsync").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_reads_checkpoint_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        let empty = snapshot(&path, dir.path(), "chartsync", 10).await.unwrap();
        assert!(!empty.checkpoint_exists);
        assert!(!path.exists());

        let mut file = CheckpointFile::load(&path).await.unwrap();
        file.state_mut().begin_run();
        file.state_mut().set_stage("wyy:hot", StageStatus::Done, 5, 5);
        file.save().await.unwrap();
        std::fs::write(dir.path().join("chartsync.log"), "started\nfinished\n").unwrap();

        let snap = snapshot(&path, dir.path(), "chartsync", 10).await.unwrap();
        assert!(snap.checkpoint_exists);
        assert_eq!(snap.stages["wyy:hot"].status, StageStatus::Done);
        assert_eq!(snap.log_tail, vec!["started", "finished"]);
        let envelope = snap.to_envelope();
        assert_eq!(envelope.code, 200);
        assert_eq!(envelope.data["stages"]["wyy:hot"]["status"], "done");
    }
}
