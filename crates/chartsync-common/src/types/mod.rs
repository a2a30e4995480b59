//! Canonical domain types
//!
//! Provider adapters decode platform payloads into these types; nothing past
//! the adapter boundary sees provider-specific field names.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator used when joining artist names into one display string
pub const ARTIST_SEPARATOR: &str = ", ";

/// Music platform a record was crawled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Source {
    /// QQ Music
    #[serde(rename = "qq")]
    Qq,
    /// NetEase Cloud Music
    #[serde(rename = "wyy")]
    Netease,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Qq, Source::Netease];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Qq => "qq",
            Source::Netease => "wyy",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qq" => Ok(Source::Qq),
            "wyy" | "netease" | "163" => Ok(Source::Netease),
            other => Err(Error::UnknownSource(other.to_string())),
        }
    }
}

/// Chart flavour published by both platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Hot,
    #[serde(alias = "soaring")]
    Rising,
}

impl ChartType {
    pub const ALL: [ChartType; 2] = [ChartType::Hot, ChartType::Rising];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Hot => "hot",
            ChartType::Rising => "rising",
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(ChartType::Hot),
            "rising" | "soaring" => Ok(ChartType::Rising),
            other => Err(Error::UnknownChartType(other.to_string())),
        }
    }
}

/// What a stage ingests for its source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Chart(ChartType),
    Home,
}

/// One unit of ingestion work with its own checkpoint entry and cache target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stage {
    pub source: Source,
    pub kind: StageKind,
}

impl Stage {
    pub fn chart(source: Source, chart: ChartType) -> Self {
        Self {
            source,
            kind: StageKind::Chart(chart),
        }
    }

    pub fn home(source: Source) -> Self {
        Self {
            source,
            kind: StageKind::Home,
        }
    }

    /// Every stage in the order a full run processes them: charts first, then homepages.
    pub fn all() -> Vec<Stage> {
        let mut stages: Vec<Stage> = Source::ALL
            .iter()
            .flat_map(|&source| ChartType::ALL.iter().map(move |&chart| Stage::chart(source, chart)))
            .collect();
        stages.extend(Source::ALL.iter().map(|&source| Stage::home(source)));
        stages
    }

    /// Checkpoint key, e.g. `qq:hot` or `wyy:home`
    pub fn key(&self) -> String {
        match self.kind {
            StageKind::Chart(chart) => format!("{}:{}", self.source, chart),
            StageKind::Home => format!("{}:home", self.source),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, kind) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidStage(s.to_string()))?;
        let source: Source = source.parse()?;
        if kind.trim().eq_ignore_ascii_case("home") {
            return Ok(Stage::home(source));
        }
        Ok(Stage::chart(source, kind.parse()?))
    }
}

/// Cache key of one chart, e.g. `chart:qq:rising`.
/// Homepage stages share a single aggregated document instead.
pub fn chart_cache_key(source: Source, chart: ChartType) -> String {
    format!("chart:{source}:{chart}")
}

/// True when `url` points at `host`. An empty host never matches.
pub fn is_on_host(url: &str, host: &str) -> bool {
    !host.is_empty() && url.to_ascii_lowercase().contains(&host.to_ascii_lowercase())
}

/// Trim artist names, drop blanks, and join with [`ARTIST_SEPARATOR`].
pub fn join_artists<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter_map(|name| {
            let name = name.as_ref().trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect::<Vec<_>>()
        .join(ARTIST_SEPARATOR)
}

/// Canonical chart entry. Identity is (source, canonical URL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongRecord {
    pub title: String,
    pub artist: String,
    #[serde(rename = "original_share_url")]
    pub canonical_url: String,
    #[serde(rename = "original_cover_url", default)]
    pub cover_url: String,
    #[serde(default)]
    pub hosted_cover_url: Option<String>,
}

impl SongRecord {
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        canonical_url: impl Into<String>,
        cover_url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into().trim().to_string(),
            artist: artist.into().trim().to_string(),
            canonical_url: canonical_url.into().trim().to_string(),
            cover_url: cover_url.into().trim().to_string(),
            hosted_cover_url: None,
        }
    }

    /// Chart rows need a title, an artist and a canonical URL to be persisted.
    pub fn is_complete(&self) -> bool {
        !self.title.is_empty() && !self.artist.is_empty() && !self.canonical_url.is_empty()
    }

    /// The rehosted cover, unless it is empty or served from `deprecated_host`.
    pub fn usable_hosted_cover(&self, deprecated_host: &str) -> Option<&str> {
        self.hosted_cover_url
            .as_deref()
            .filter(|url| !url.is_empty() && !is_on_host(url, deprecated_host))
    }

    /// Drop a hosted cover that must not be surfaced to readers.
    pub fn scrub_hosted_cover(&mut self, deprecated_host: &str) {
        if self.usable_hosted_cover(deprecated_host).is_none() {
            self.hosted_cover_url = None;
        }
    }

    /// Cover shown to readers: the rehosted copy, else the provider original.
    pub fn display_cover(&self, deprecated_host: &str) -> &str {
        match self.usable_hosted_cover(deprecated_host) {
            Some(url) => url,
            None if !is_on_host(&self.cover_url, deprecated_host) => &self.cover_url,
            None => "",
        }
    }
}

/// Homepage entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Playlist,
    Song,
    Tag,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Playlist => "playlist",
            ItemKind::Song => "song",
            ItemKind::Tag => "tag",
        }
    }
}

impl FromStr for ItemKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "playlist" => Ok(ItemKind::Playlist),
            "song" => Ok(ItemKind::Song),
            "tag" => Ok(ItemKind::Tag),
            other => Err(Error::UnknownItemKind(other.to_string())),
        }
    }
}

/// Homepage entry. Identity is (source, section, kind, item id).
///
/// `record.artist` carries the subtitle (artists for songs, empty for tags).
/// `payload` keeps the raw provider object so new fields survive without a
/// schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeItem {
    pub source: Source,
    pub section: String,
    #[serde(rename = "item_type")]
    pub kind: ItemKind,
    pub item_id: String,
    #[serde(flatten)]
    pub record: SongRecord,
    #[serde(default)]
    pub metric: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl HomeItem {
    pub fn is_complete(&self) -> bool {
        !self.section.is_empty()
            && !self.item_id.is_empty()
            && !self.record.title.is_empty()
            && !self.record.canonical_url.is_empty()
    }
}
