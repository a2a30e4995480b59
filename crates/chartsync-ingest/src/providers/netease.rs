//! NetEase Cloud Music adapter
//!
//! Charts come from the public toplist page, which embeds the track list as
//! HTML-escaped JSON inside `<textarea id="song-list-pre-data">`. Homepage
//! sections come from weapi endpoints. Each section is fetched on its own and
//! a failed one is logged and left empty; the stage fails only when every
//! homepage call fails.

use super::{
    decode_entries, ensure_success, names, parse_json, sections, ChartProvider, NamedRef, RawId,
};
use crate::codec::weapi::WeapiCodec;
use crate::cookie::CookieJar;
use crate::error::{IngestError, Result};
use crate::throttle::Throttle;
use async_trait::async_trait;
use chartsync_common::types::{join_artists, ChartType, HomeItem, ItemKind, SongRecord, Source};
use rand::Rng;
use reqwest::header::{COOKIE, REFERER};
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Host used for canonical song and playlist links
pub const CANONICAL_BASE: &str = "https://music.163.com";

pub const DEFAULT_BASE_URL: &str = "https://music.163.com";
pub const DEFAULT_HOT_CHART_ID: u64 = 3778678;
pub const DEFAULT_RISING_CHART_ID: u64 = 19723756;
pub const DEFAULT_HOME_LIMIT: u32 = 30;

/// Below this many personalized playlists the hot playlist list is queried too
pub const DEFAULT_MIN_HOME_PLAYLISTS: usize = 10;

/// Category sent to `playlist/list` for the fallback query
pub const FALLBACK_PLAYLIST_CATEGORY: &str = "全部";

const CHART_MARKER: &str = "textarea#song-list-pre-data";

#[derive(Debug, Clone)]
pub struct NeteaseConfig {
    /// Origin requests are sent to; canonical URLs always use [`CANONICAL_BASE`]
    pub base_url: String,
    pub hot_chart_id: u64,
    pub rising_chart_id: u64,
    pub home_limit: u32,
    pub min_home_playlists: usize,
}

impl Default for NeteaseConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            hot_chart_id: DEFAULT_HOT_CHART_ID,
            rising_chart_id: DEFAULT_RISING_CHART_ID,
            home_limit: DEFAULT_HOME_LIMIT,
            min_home_playlists: DEFAULT_MIN_HOME_PLAYLISTS,
        }
    }
}

impl NeteaseConfig {
    pub fn chart_id(&self, chart: ChartType) -> u64 {
        match chart {
            ChartType::Hot => self.hot_chart_id,
            ChartType::Rising => self.rising_chart_id,
        }
    }
}

pub struct NeteaseProvider {
    client: reqwest::Client,
    config: NeteaseConfig,
    cookie: CookieJar,
    codec: WeapiCodec,
    throttle: Arc<Throttle>,
}

impl NeteaseProvider {
    /// Without a cookie file the adapter browses with a random anonymous session.
    pub fn new(
        client: reqwest::Client,
        config: NeteaseConfig,
        cookie: Option<CookieJar>,
        throttle: Arc<Throttle>,
    ) -> Self {
        let cookie = cookie.unwrap_or_else(|| {
            info!("No NetEase cookie configured, using an anonymous session");
            anonymous_cookie()
        });
        Self {
            client,
            config,
            cookie,
            codec: WeapiCodec::new(),
            throttle,
        }
    }

    pub fn with_codec(mut self, codec: WeapiCodec) -> Self {
        self.codec = codec;
        self
    }

    fn referer(&self) -> String {
        format!("{}/", self.config.base_url.trim_end_matches('/'))
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header(REFERER, self.referer())
            .header(COOKIE, self.cookie.header_value())
            .send()
            .await?;
        self.throttle.tick().await;
        Ok(ensure_success(response)?.text().await?)
    }

    async fn weapi(&self, endpoint: &str, mut payload: Value) -> Result<Value> {
        let csrf = self.cookie.get("__csrf").unwrap_or("").to_string();
        if let Some(object) = payload.as_object_mut() {
            object.insert("csrf_token".to_string(), json!(csrf));
        }
        let envelope = self.codec.encode(&payload)?;
        let url = format!(
            "{}/weapi/{}?csrf_token={}",
            self.config.base_url.trim_end_matches('/'),
            endpoint,
            csrf
        );

        let response = self
            .client
            .post(&url)
            .header(REFERER, self.referer())
            .header(COOKIE, self.cookie.header_value())
            .form(&envelope)
            .send()
            .await?;
        self.throttle.tick().await;

        let text = ensure_success(response)?.text().await?;
        let value = parse_json(endpoint, &text)?;
        ensure_code_ok(endpoint, &value)?;
        Ok(value)
    }
}

#[async_trait]
impl ChartProvider for NeteaseProvider {
    fn source(&self) -> Source {
        Source::Netease
    }

    async fn fetch_chart(&self, chart: ChartType) -> Result<Vec<SongRecord>> {
        let url = format!(
            "{}/discover/toplist?id={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.chart_id(chart)
        );
        debug!(%url, "Fetching NetEase chart page");
        let html = self.get_text(&url).await?;
        parse_toplist_page(&html)
    }

    async fn fetch_home(&self) -> Result<Vec<HomeItem>> {
        let limit = self.config.home_limit;
        let mut last_error = None;

        let playlists = tolerate(
            "personalized/playlist",
            self.weapi("personalized/playlist", json!({"limit": limit, "total": true, "n": 1000}))
                .await,
            &mut last_error,
        );
        let songs = tolerate(
            "personalized/newsong",
            self.weapi("personalized/newsong", json!({"type": "recommend", "limit": limit, "areaId": 0}))
                .await,
            &mut last_error,
        );
        let tags = tolerate(
            "playlist/hottags",
            self.weapi("playlist/hottags", json!({})).await,
            &mut last_error,
        );

        let mut items = parse_home(
            playlists.as_ref().unwrap_or(&Value::Null),
            songs.as_ref().unwrap_or(&Value::Null),
            tags.as_ref().unwrap_or(&Value::Null),
        );

        let personalized = items.iter().filter(|item| item.kind == ItemKind::Playlist).count();
        let mut fallback_ok = false;
        if personalized < self.config.min_home_playlists {
            info!(
                personalized,
                minimum = self.config.min_home_playlists,
                "Few personalized playlists, querying the hot playlist list"
            );
            let payload = json!({
                "cat": FALLBACK_PLAYLIST_CATEGORY,
                "order": "hot",
                "limit": limit,
                "offset": 0,
                "total": true
            });
            if let Some(list) =
                tolerate("playlist/list", self.weapi("playlist/list", payload).await, &mut last_error)
            {
                fallback_ok = true;
                for item in parse_playlist_list(&list) {
                    let known = items
                        .iter()
                        .any(|seen| seen.kind == ItemKind::Playlist && seen.item_id == item.item_id);
                    if !known {
                        items.push(item);
                    }
                }
            }
        }

        if playlists.is_none() && songs.is_none() && tags.is_none() && !fallback_ok {
            return Err(last_error
                .unwrap_or_else(|| IngestError::parse("every NetEase homepage call failed")));
        }
        Ok(items)
    }
}

/// Keep a successful section response; log and remember a failed one
fn tolerate(call: &str, result: Result<Value>, last_error: &mut Option<IngestError>) -> Option<Value> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(call, error = %e, "NetEase homepage section failed, leaving it empty");
            *last_error = Some(e);
            None
        },
    }
}

/// Random session cookie used when no cookie file is configured
pub fn anonymous_cookie() -> CookieJar {
    let mut rng = rand::thread_rng();
    CookieJar::from_pairs([
        ("NMTID", random_hex(&mut rng, 32)),
        ("_ntes_nuid", random_hex(&mut rng, 32)),
        ("os", "pc".to_string()),
    ])
}

fn random_hex(rng: &mut impl Rng, len: usize) -> String {
    (0..len)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect()
}

fn ensure_code_ok(call: &str, value: &Value) -> Result<()> {
    match value.get("code").and_then(Value::as_i64) {
        Some(code) if code != 200 => Err(IngestError::Rejected {
            call: call.to_string(),
            code,
        }),
        _ => Ok(()),
    }
}

#[derive(Debug, Default, Deserialize)]
struct Album {
    #[serde(rename = "picUrl", default)]
    pic_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Track {
    id: RawId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "ar")]
    artists: Vec<NamedRef>,
    #[serde(default, alias = "al")]
    album: Option<Album>,
}

impl Track {
    fn into_record(self) -> Option<SongRecord> {
        let id = self.id.into_string()?;
        Some(SongRecord::new(
            self.name.unwrap_or_default(),
            join_artists(names(&self.artists)),
            song_url(&id),
            self.album.and_then(|a| a.pic_url).unwrap_or_default(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct Playlist {
    id: RawId,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "picUrl", alias = "coverImgUrl", default)]
    pic_url: Option<String>,
    #[serde(rename = "playCount", default)]
    play_count: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct NewSongDetail {
    #[serde(default, alias = "ar")]
    artists: Vec<NamedRef>,
    #[serde(default, alias = "al")]
    album: Option<Album>,
}

#[derive(Debug, Deserialize)]
struct NewSong {
    id: RawId,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "picUrl", default)]
    pic_url: Option<String>,
    #[serde(default)]
    song: Option<NewSongDetail>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    id: RawId,
    #[serde(default)]
    name: Option<String>,
}

pub fn song_url(id: &str) -> String {
    format!("{CANONICAL_BASE}/song?id={id}")
}

pub fn playlist_url(id: &str) -> String {
    format!("{CANONICAL_BASE}/playlist?id={id}")
}

/// Extract the chart from a toplist page. A page without the embedded
/// track list is a hard parse failure.
pub fn parse_toplist_page(html: &str) -> Result<Vec<SongRecord>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(CHART_MARKER)
        .map_err(|e| IngestError::parse(format!("bad selector {CHART_MARKER}: {e:?}")))?;
    let blob: String = document
        .select(&selector)
        .next()
        .ok_or_else(|| IngestError::parse(format!("chart page has no {CHART_MARKER}")))?
        .text()
        .collect();

    let tracks: Vec<Track> = serde_json::from_str(blob.trim())
        .map_err(|e| IngestError::parse(format!("{CHART_MARKER}: {e}")))?;
    Ok(tracks.into_iter().filter_map(Track::into_record).collect())
}

fn playlist_items(entries: Option<&Value>) -> Vec<HomeItem> {
    decode_entries::<Playlist>(sections::HOT_RECOMMEND, entries)
        .into_iter()
        .filter_map(|(playlist, raw)| {
            let id = playlist.id.into_string()?;
            Some(HomeItem {
                source: Source::Netease,
                section: sections::HOT_RECOMMEND.to_string(),
                kind: ItemKind::Playlist,
                record: SongRecord::new(
                    playlist.name.unwrap_or_default(),
                    "",
                    playlist_url(&id),
                    playlist.pic_url.unwrap_or_default(),
                ),
                item_id: id,
                metric: playlist.play_count.unwrap_or(0.0) as i64,
                payload: raw,
            })
        })
        .collect()
}

/// Playlists from a `playlist/list` response (`playlists[]`, `coverImgUrl`)
pub fn parse_playlist_list(response: &Value) -> Vec<HomeItem> {
    playlist_items(response.get("playlists"))
}

/// Build homepage items from the three weapi responses. Absent sections
/// produce no items.
pub fn parse_home(playlists: &Value, songs: &Value, tags: &Value) -> Vec<HomeItem> {
    let mut items = playlist_items(playlists.get("result"));

    for (song, raw) in decode_entries::<NewSong>(sections::NEW_SONGLIST, songs.get("result")) {
        let Some(id) = song.id.into_string() else {
            continue;
        };
        let detail = song.song.unwrap_or_default();
        let cover = song
            .pic_url
            .filter(|url| !url.is_empty())
            .or_else(|| detail.album.and_then(|a| a.pic_url))
            .unwrap_or_default();
        items.push(HomeItem {
            source: Source::Netease,
            section: sections::NEW_SONGLIST.to_string(),
            kind: ItemKind::Song,
            record: SongRecord::new(
                song.name.unwrap_or_default(),
                join_artists(names(&detail.artists)),
                song_url(&id),
                cover,
            ),
            item_id: id,
            metric: 0,
            payload: raw,
        });
    }

    for (tag, raw) in decode_entries::<Tag>(sections::HOT_CATEGORY, tags.get("tags")) {
        let Some(id) = tag.id.into_string() else {
            continue;
        };
        let encoded: String = url::form_urlencoded::byte_serialize(id.as_bytes()).collect();
        items.push(HomeItem {
            source: Source::Netease,
            section: sections::HOT_CATEGORY.to_string(),
            kind: ItemKind::Tag,
            record: SongRecord::new(tag.name.unwrap_or_default(), "", format!("wyy://tag/{encoded}"), ""),
            item_id: id,
            metric: 0,
            payload: raw,
        });
    }

    items
}
