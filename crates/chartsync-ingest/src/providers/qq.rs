//! QQ Music adapter
//!
//! Charts go through `musicu.fcg`: `GetAll` resolves the current period of
//! a top list, then `GetDetail` fetches its songs for that period. The two
//! calls are strictly sequential. The homepage is rendered server side with
//! its data assigned to `window.__INITIAL_DATA__`.

use super::{decode_entries, ensure_success, names, parse_json, sections, ChartProvider, NamedRef, RawId};
use crate::codec::musicu::{Comm, MusicuRequest};
use crate::cookie::CookieJar;
use crate::error::{IngestError, Result};
use crate::throttle::Throttle;
use async_trait::async_trait;
use chartsync_common::types::{join_artists, ChartType, HomeItem, ItemKind, SongRecord, Source};
use reqwest::header::{COOKIE, ORIGIN, REFERER};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://u.y.qq.com/cgi-bin/musicu.fcg";
pub const DEFAULT_HOME_URL: &str = "https://y.qq.com/";
pub const DEFAULT_HOT_TOP_ID: u32 = 26;
pub const DEFAULT_RISING_TOP_ID: u32 = 62;
pub const DEFAULT_DETAIL_LIMIT: u32 = 100;

const TOPLIST_MODULE: &str = "musicToplist.ToplistInfoServer";
const INITIAL_DATA_MARKER: &str = "window.__INITIAL_DATA__";
const SITE_ORIGIN: &str = "https://y.qq.com";

#[derive(Debug, Clone)]
pub struct QqConfig {
    pub api_url: String,
    pub home_url: String,
    pub hot_top_id: u32,
    pub rising_top_id: u32,
    pub detail_limit: u32,
}

impl Default for QqConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            home_url: DEFAULT_HOME_URL.to_string(),
            hot_top_id: DEFAULT_HOT_TOP_ID,
            rising_top_id: DEFAULT_RISING_TOP_ID,
            detail_limit: DEFAULT_DETAIL_LIMIT,
        }
    }
}

impl QqConfig {
    pub fn top_id(&self, chart: ChartType) -> u32 {
        match chart {
            ChartType::Hot => self.hot_top_id,
            ChartType::Rising => self.rising_top_id,
        }
    }
}

pub struct QqProvider {
    client: reqwest::Client,
    config: QqConfig,
    cookie: CookieJar,
    throttle: Arc<Throttle>,
}

impl QqProvider {
    /// QQ Music rejects anonymous chart calls, so a session cookie is required.
    pub fn new(
        client: reqwest::Client,
        config: QqConfig,
        cookie: Option<CookieJar>,
        throttle: Arc<Throttle>,
    ) -> Result<Self> {
        let cookie = cookie
            .filter(|jar| !jar.is_empty())
            .ok_or_else(|| IngestError::config("QQ Music cookie file is missing or empty"))?;
        Ok(Self {
            client,
            config,
            cookie,
            throttle,
        })
    }

    fn comm(&self) -> Comm {
        Comm::from_cookie(&self.cookie)
    }

    async fn call(&self, request: MusicuRequest) -> Result<Value> {
        let response = self
            .client
            .post(&self.config.api_url)
            .query(&request.query())
            .header(REFERER, format!("{SITE_ORIGIN}/"))
            .header(ORIGIN, SITE_ORIGIN)
            .header(COOKIE, self.cookie.header_value())
            .json(&request.body())
            .send()
            .await?;
        self.throttle.tick().await;

        let text = ensure_success(response)?.text().await?;
        let value = parse_json("musicu", &text)?;
        match value.get("code").and_then(Value::as_i64) {
            Some(code) if code != 0 => Err(IngestError::Rejected {
                call: "musicu".to_string(),
                code,
            }),
            _ => Ok(value),
        }
    }

    async fn resolve_period(&self, top_id: u32) -> Result<String> {
        let request = MusicuRequest::new(self.comm()).call("topList", TOPLIST_MODULE, "GetAll", json!({}));
        let response = self.call(request).await?;
        find_period(&response, top_id)
    }
}

#[async_trait]
impl ChartProvider for QqProvider {
    fn source(&self) -> Source {
        Source::Qq
    }

    async fn fetch_chart(&self, chart: ChartType) -> Result<Vec<SongRecord>> {
        let top_id = self.config.top_id(chart);
        let period = self.resolve_period(top_id).await?;
        debug!(top_id, %period, "Resolved QQ chart period");

        let request = MusicuRequest::new(self.comm()).call(
            "toplist",
            TOPLIST_MODULE,
            "GetDetail",
            json!({"topid": top_id, "num": self.config.detail_limit, "period": period}),
        );
        let response = self.call(request).await?;
        parse_detail(&response)
    }

    async fn fetch_home(&self) -> Result<Vec<HomeItem>> {
        let response = self
            .client
            .get(&self.config.home_url)
            .header(REFERER, format!("{SITE_ORIGIN}/"))
            .header(COOKIE, self.cookie.header_value())
            .send()
            .await?;
        self.throttle.tick().await;

        let html = ensure_success(response)?.text().await?;
        let data = extract_initial_data(&html)?;
        Ok(parse_home(&data))
    }
}

/// `data` of one aliased call, failing when the call is absent or rejected
fn call_data<'a>(response: &'a Value, alias: &str) -> Result<&'a Value> {
    let call = response
        .get(alias)
        .ok_or_else(|| IngestError::parse(format!("musicu response has no `{alias}` call")))?;
    match call.get("code").and_then(Value::as_i64) {
        Some(code) if code != 0 => Err(IngestError::Rejected {
            call: alias.to_string(),
            code,
        }),
        _ => call
            .get("data")
            .ok_or_else(|| IngestError::parse(format!("`{alias}` call has no data"))),
    }
}

/// Period of `top_id` from a `GetAll` response
pub fn find_period(response: &Value, top_id: u32) -> Result<String> {
    let data = call_data(response, "topList")?;
    let groups = data.get("group").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);

    groups
        .iter()
        .filter_map(|group| group.get("toplist").and_then(Value::as_array))
        .flatten()
        .find(|toplist| {
            toplist
                .get("topId")
                .or_else(|| toplist.get("id"))
                .and_then(Value::as_u64)
                == Some(u64::from(top_id))
        })
        .and_then(|toplist| toplist.get("period").and_then(Value::as_str))
        .filter(|period| !period.is_empty())
        .map(str::to_string)
        .ok_or(IngestError::PeriodUnresolved { top_id })
}

#[derive(Debug, Default, Deserialize)]
struct AlbumRef {
    #[serde(default)]
    mid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Song {
    #[serde(default)]
    mid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    singer: Vec<NamedRef>,
    #[serde(default)]
    album: Option<AlbumRef>,
}

impl Song {
    fn into_record(self) -> Option<(String, SongRecord)> {
        let mid = self.mid.filter(|m| !m.trim().is_empty())?;
        let cover = self
            .album
            .and_then(|a| a.mid)
            .filter(|m| !m.is_empty())
            .map(|m| album_cover_url(&m))
            .unwrap_or_default();
        let title = self.title.filter(|t| !t.is_empty()).or(self.name).unwrap_or_default();
        let record = SongRecord::new(title, join_artists(names(&self.singer)), song_url(&mid), cover);
        Some((mid, record))
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistEntry {
    dissid: RawId,
    #[serde(default)]
    dissname: Option<String>,
    #[serde(default)]
    imgurl: Option<String>,
    #[serde(default)]
    listennum: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    id: RawId,
    #[serde(default)]
    name: Option<String>,
}

pub fn song_url(mid: &str) -> String {
    format!("https://y.qq.com/n/ryqq/songDetail/{mid}")
}

pub fn playlist_url(dissid: &str) -> String {
    format!("https://y.qq.com/n/ryqq/playlist/{dissid}")
}

pub fn album_cover_url(album_mid: &str) -> String {
    format!("https://y.gtimg.cn/music/photo_new/T002R500x500M000{album_mid}.jpg")
}

/// Songs of a `GetDetail` response
pub fn parse_detail(response: &Value) -> Result<Vec<SongRecord>> {
    let data = call_data(response, "toplist")?;
    let list = data
        .get("songInfoList")
        .or_else(|| data.get("data").and_then(|inner| inner.get("songInfoList")))
        .ok_or_else(|| IngestError::parse("toplist detail has no songInfoList"))?;

    Ok(decode_entries::<Song>("songInfoList", Some(list))
        .into_iter()
        .filter_map(|(song, _)| song.into_record().map(|(_, record)| record))
        .collect())
}

/// Cut the object literal assigned to `window.__INITIAL_DATA__` out of the
/// homepage and decode it. Bare `undefined` tokens become `null`.
pub fn extract_initial_data(html: &str) -> Result<Value> {
    let marker = html
        .find(INITIAL_DATA_MARKER)
        .ok_or_else(|| IngestError::parse("homepage has no window.__INITIAL_DATA__"))?;
    let tail = &html[marker + INITIAL_DATA_MARKER.len()..];
    let open = tail
        .find('{')
        .ok_or_else(|| IngestError::parse("window.__INITIAL_DATA__ is not an object"))?;
    let literal = balanced_object(&tail[open..])
        .ok_or_else(|| IngestError::parse("window.__INITIAL_DATA__ object is not terminated"))?;
    parse_json("window.__INITIAL_DATA__", &undefined_to_null(literal))
}

/// The `{ ... }` prefix of `text`, honoring string literals and escapes.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, byte) in text.bytes().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {},
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            },
            _ => {},
        }
    }
    None
}

fn undefined_to_null(literal: &str) -> String {
    const TOKEN: &str = "undefined";
    let bytes = literal.as_bytes();
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_' || b == b'$';

    let mut out = String::with_capacity(literal.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
        } else if byte == b'"' {
            in_string = true;
        } else if literal[i..].starts_with(TOKEN)
            && (i == 0 || !is_ident(bytes[i - 1]))
            && bytes.get(i + TOKEN.len()).map_or(true, |&b| !is_ident(b))
        {
            out.push_str("null");
            i += TOKEN.len();
            continue;
        }
        // Copy one whole UTF-8 character starting at `i`.
        let width = literal[i..].chars().next().map_or(1, char::len_utf8);
        out.push_str(&literal[i..i + width]);
        i += width;
    }
    out
}

/// Homepage items from the decoded `__INITIAL_DATA__`
pub fn parse_home(data: &Value) -> Vec<HomeItem> {
    let mut items = Vec::new();

    for (entry, raw) in decode_entries::<PlaylistEntry>(sections::HOT_RECOMMEND, data.get(sections::HOT_RECOMMEND)) {
        let Some(dissid) = entry.dissid.into_string() else {
            continue;
        };
        items.push(HomeItem {
            source: Source::Qq,
            section: sections::HOT_RECOMMEND.to_string(),
            kind: ItemKind::Playlist,
            record: SongRecord::new(
                entry.dissname.unwrap_or_default(),
                "",
                playlist_url(&dissid),
                entry.imgurl.unwrap_or_default(),
            ),
            item_id: dissid,
            metric: entry.listennum.unwrap_or(0.0) as i64,
            payload: raw,
        });
    }

    for (song, raw) in decode_entries::<Song>(sections::NEW_SONGLIST, data.get(sections::NEW_SONGLIST)) {
        let Some((mid, record)) = song.into_record() else {
            continue;
        };
        items.push(HomeItem {
            source: Source::Qq,
            section: sections::NEW_SONGLIST.to_string(),
            kind: ItemKind::Song,
            item_id: mid,
            record,
            metric: 0,
            payload: raw,
        });
    }

    for (section, scheme) in [(sections::HOT_CATEGORY, "category"), (sections::NEW_LAN_LIST, "newLan")] {
        for (tag, raw) in decode_entries::<TagEntry>(section, data.get(section)) {
            let Some(id) = tag.id.into_string() else {
                continue;
            };
            let encoded: String = url::form_urlencoded::byte_serialize(id.as_bytes()).collect();
            items.push(HomeItem {
                source: Source::Qq,
                section: section.to_string(),
                kind: ItemKind::Tag,
                record: SongRecord::new(tag.name.unwrap_or_default(), "", format!("qq://{scheme}/{encoded}"), ""),
                item_id: id,
                metric: 0,
                payload: raw,
            });
        }
    }

    items
}
