//! Provider adapters
//!
//! Each adapter turns one platform's undocumented web API into canonical
//! [`SongRecord`] and [`HomeItem`] lists. Payloads are decoded into
//! provider-specific structs inside the adapter module; only canonical
//! records cross this boundary.
//!
//! Adapters never retry and never sleep, except through the shared
//! [`Throttle`](crate::throttle::Throttle).

pub mod fixture;
pub mod netease;
pub mod qq;

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use chartsync_common::types::{ChartType, HomeItem, SongRecord, Source};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub use fixture::FixtureProvider;
pub use netease::{NeteaseConfig, NeteaseProvider};
pub use qq::{QqConfig, QqProvider};

/// Browser user agent sent to both platforms
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Homepage section names shared by both platforms
pub mod sections {
    pub const HOT_RECOMMEND: &str = "hotRecommend";
    pub const NEW_SONGLIST: &str = "newSonglist";
    pub const HOT_CATEGORY: &str = "hotCategory";
    pub const NEW_LAN_LIST: &str = "newLanList";
}

#[async_trait]
pub trait ChartProvider: Send + Sync {
    fn source(&self) -> Source;

    /// Current entries of one chart, in provider order
    async fn fetch_chart(&self, chart: ChartType) -> Result<Vec<SongRecord>>;

    /// Current homepage items across all sections
    async fn fetch_home(&self) -> Result<Vec<HomeItem>>;
}

/// Shared HTTP client for live adapters
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

/// Turn a non-2xx response into a transport error
pub(crate) fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(IngestError::Transport {
            url: response.url().to_string(),
            status: status.as_u16(),
        })
    }
}

/// Provider ids arrive either as JSON numbers or as strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawId {
    Int(i64),
    Text(String),
}

impl RawId {
    pub(crate) fn into_string(self) -> Option<String> {
        let id = match self {
            RawId::Int(n) => n.to_string(),
            RawId::Text(s) => s.trim().to_string(),
        };
        (!id.is_empty()).then_some(id)
    }
}

/// `{ "name": ... }` reference used for artists and singers
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct NamedRef {
    #[serde(default)]
    pub name: Option<String>,
}

pub(crate) fn names(refs: &[NamedRef]) -> impl Iterator<Item = &str> {
    refs.iter().filter_map(|r| r.name.as_deref())
}

/// Decode each element of an optional JSON array, keeping the raw element
/// alongside. Missing sections and malformed elements are skipped.
pub(crate) fn decode_entries<T: DeserializeOwned>(section: &str, value: Option<&Value>) -> Vec<(T, Value)> {
    let Some(entries) = value.and_then(Value::as_array) else {
        debug!(section, "Section missing from payload");
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|raw| match serde_json::from_value::<T>(raw.clone()) {
            Ok(entry) => Some((entry, raw.clone())),
            Err(e) => {
                debug!(section, error = %e, "Skipping malformed entry");
                None
            },
        })
        .collect()
}

/// Parse JSON, reporting failures as payload errors rather than serde errors
pub(crate) fn parse_json(context: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text.trim())
        .map_err(|e| IngestError::parse(format!("{context}: invalid JSON: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Entry {
        id: RawId,
    }

    #[test]
    fn test_raw_id_forms() {
        let ids: Vec<RawId> = serde_json::from_str(r#"[186016, "003aAYrm3GE0Ac", " "]"#).unwrap();
        let ids: Vec<Option<String>> = ids.into_iter().map(RawId::into_string).collect();
        assert_eq!(
            ids,
            vec![Some("186016".to_string()), Some("003aAYrm3GE0Ac".to_string()), None]
        );
    }

    #[test]
    fn test_decode_entries_skips_bad_elements() {
        let value = serde_json::json!([{"id": 1}, {"name": "no id"}, {"id": "x"}]);
        let entries: Vec<(Entry, Value)> = decode_entries("test", Some(&value));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].1["id"], "x");

        let missing: Vec<(Entry, Value)> = decode_entries("test", None);
        assert!(missing.is_empty());
    }

    #[test]
    fn test_parse_json_reports_context() {
        let err = parse_json("qq detail", "<html>").unwrap_err();
        assert!(err.to_string().contains("qq detail"));
    }
}
