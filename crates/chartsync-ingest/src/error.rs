//! Error types for ingestion

use crate::codec::CodecError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Non-2xx response from a provider
    #[error("HTTP {status} from {url}")]
    Transport { url: String, status: u16 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Missing marker or field in a provider payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// Provider answered 2xx but rejected the call in its own envelope
    #[error("Provider rejected {call}: code {code}")]
    Rejected { call: String, code: i64 },

    #[error("Could not resolve chart period for top id {top_id}")]
    PeriodUnresolved { top_id: u32 },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] chartsync_common::Error),
}

impl IngestError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Storage and checkpoint failures abort the whole run; everything else
    /// only fails the current stage.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            IngestError::Database(_)
                | IngestError::Migration(_)
                | IngestError::Cache(_)
                | IngestError::Checkpoint(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_abort_the_run() {
        assert!(IngestError::Database(sqlx::Error::PoolTimedOut).aborts_run());
        assert!(IngestError::checkpoint("rename failed").aborts_run());
        assert!(!IngestError::parse("missing textarea").aborts_run());
        assert!(!IngestError::PeriodUnresolved { top_id: 26 }.aborts_run());
    }

    #[test]
    fn test_error_messages() {
        let err = IngestError::Transport {
            url: "https://u.y.qq.com/cgi-bin/musicu.fcg".to_string(),
            status: 503,
        };
        assert_eq!(err.to_string(), "HTTP 503 from https://u.y.qq.com/cgi-bin/musicu.fcg");
        let err = IngestError::Rejected {
            call: "toplist".to_string(),
            code: 500001,
        };
        assert!(err.to_string().contains("500001"));
    }
}
