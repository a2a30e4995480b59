//! Fixture replay
//!
//! Serves captured provider payloads from disk through the same decoders as
//! the live adapters. Layout under the fixture root:
//!
//! ```text
//! wyy/hot.html  wyy/rising.html  wyy/home.json
//! qq/hot.json   qq/rising.json   qq/home.html
//! ```
//!
//! `wyy/home.json` bundles the three weapi responses as
//! `{"personalized": ..., "newsong": ..., "hottags": ...}`; `qq/*.json` hold raw
//! `GetDetail` responses.

use super::{netease, parse_json, qq, ChartProvider};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use chartsync_common::types::{ChartType, HomeItem, SongRecord, Source};
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

pub struct FixtureProvider {
    source: Source,
    dir: PathBuf,
}

impl FixtureProvider {
    pub fn new(source: Source, root: impl Into<PathBuf>) -> Self {
        Self {
            source,
            dir: root.into().join(source.as_str()),
        }
    }

    async fn read(&self, name: &str) -> Result<String> {
        let path = self.dir.join(name);
        debug!(path = %path.display(), "Reading fixture");
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| IngestError::parse(format!("fixture {}: {e}", path.display())))
    }
}

#[async_trait]
impl ChartProvider for FixtureProvider {
    fn source(&self) -> Source {
        self.source
    }

    async fn fetch_chart(&self, chart: ChartType) -> Result<Vec<SongRecord>> {
        match self.source {
            Source::Netease => {
                let html = self.read(&format!("{chart}.html")).await?;
                netease::parse_toplist_page(&html)
            },
            Source::Qq => {
                let text = self.read(&format!("{chart}.json")).await?;
                qq::parse_detail(&parse_json("qq fixture", &text)?)
            },
        }
    }

    async fn fetch_home(&self) -> Result<Vec<HomeItem>> {
        match self.source {
            Source::Netease => {
                let bundle = parse_json("wyy home fixture", &self.read("home.json").await?)?;
                Ok(netease::parse_home(
                    bundle.get("personalized").unwrap_or(&Value::Null),
                    bundle.get("newsong").unwrap_or(&Value::Null),
                    bundle.get("hottags").unwrap_or(&Value::Null),
                ))
            },
            Source::Qq => {
                let html = self.read("home.html").await?;
                Ok(qq::parse_home(&qq::extract_initial_data(&html)?))
            },
        }
    }
}
