//! Live adapters against a mock provider API

mod common;

use chartsync_common::types::{ChartType, ItemKind};
use chartsync_ingest::codec::musicu::compute_token;
use chartsync_ingest::cookie::CookieJar;
use chartsync_ingest::providers::netease::{NeteaseConfig, NeteaseProvider};
use chartsync_ingest::providers::qq::{QqConfig, QqProvider};
use chartsync_ingest::providers::ChartProvider;
use chartsync_ingest::throttle::Throttle;
use chartsync_ingest::IngestError;
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::{
    matchers::{body_partial_json, body_string_contains, header_exists, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const QQ_SESSION_KEY: &str = "Q_H_L_5abcdef";
const QQ_API_PATH: &str = "/cgi-bin/musicu.fcg";

/// NetEase adapter with the hot playlist fallback switched off
fn netease(server: &MockServer) -> NeteaseProvider {
    netease_with_fallback(server, 0)
}

fn netease_with_fallback(server: &MockServer, min_home_playlists: usize) -> NeteaseProvider {
    let config = NeteaseConfig {
        base_url: server.uri(),
        min_home_playlists,
        ..NeteaseConfig::default()
    };
    NeteaseProvider::new(reqwest::Client::new(), config, None, Arc::new(Throttle::disabled()))
}

async fn mount_home_part(server: &MockServer, endpoint: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(endpoint))
        .respond_with(response)
        .mount(server)
        .await;
}

fn qq(server: &MockServer) -> QqProvider {
    let config = QqConfig {
        api_url: format!("{}{QQ_API_PATH}", server.uri()),
        home_url: format!("{}/", server.uri()),
        ..QqConfig::default()
    };
    let cookie = CookieJar::parse(&format!("uin=o0123456; qqmusic_key={QQ_SESSION_KEY}"));
    QqProvider::new(reqwest::Client::new(), config, Some(cookie), Arc::new(Throttle::disabled())).unwrap()
}

fn home_part(name: &str) -> Value {
    let bundle: Value = serde_json::from_str(include_str!("../fixtures/wyy/home.json")).unwrap();
    bundle[name].clone()
}

fn get_all(top_id: u64, period: &str) -> Value {
    json!({
        "code": 0,
        "topList": {
            "code": 0,
            "data": {
                "group": [
                    {"groupId": 0, "toplist": [{"topId": 4, "period": "2024-10-18"}]},
                    {"groupId": 1, "toplist": [{"topId": top_id, "period": period}]}
                ]
            }
        }
    })
}

// ============================================================================
// NetEase
// ============================================================================

#[tokio::test]
async fn test_netease_chart_page() {
    common::init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/discover/toplist"))
        .and(query_param("id", "3778678"))
        .and(header_exists("cookie"))
        .respond_with(ResponseTemplate::new(200).set_body_string(include_str!("../fixtures/wyy/hot.html")))
        .expect(1)
        .mount(&server)
        .await;

    let records = netease(&server).fetch_chart(ChartType::Hot).await.unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(records[0].canonical_url, "https://music.163.com/song?id=2124385868");
    assert_eq!(records[0].title, "若月亮没来");
    assert!(records.iter().all(|r| r.is_complete()));
    assert!(records.iter().all(|r| r.canonical_url.starts_with("https://music.163.com/song?id=")));
}

#[tokio::test]
async fn test_netease_chart_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/discover/toplist"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = netease(&server).fetch_chart(ChartType::Rising).await.unwrap_err();
    assert!(matches!(err, IngestError::Transport { status: 503, .. }));
}

#[tokio::test]
async fn test_netease_home_uses_encrypted_calls() {
    common::init_test_tracing();
    let server = MockServer::start().await;
    for (endpoint, part) in [
        ("/weapi/personalized/playlist", "personalized"),
        ("/weapi/personalized/newsong", "newsong"),
        ("/weapi/playlist/hottags", "hottags"),
    ] {
        Mock::given(method("POST"))
            .and(path(endpoint))
            .and(body_string_contains("params="))
            .and(body_string_contains("encSecKey="))
            .respond_with(ResponseTemplate::new(200).set_body_json(home_part(part)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let items = netease(&server).fetch_home().await.unwrap();
    let count = |kind: ItemKind| items.iter().filter(|item| item.kind == kind).count();
    assert_eq!(count(ItemKind::Playlist), 2);
    assert_eq!(count(ItemKind::Song), 2);
    assert_eq!(count(ItemKind::Tag), 2);

    let playlist = items.iter().find(|item| item.kind == ItemKind::Playlist).unwrap();
    assert_eq!(playlist.item_id, "2829816518");
    assert_eq!(playlist.record.canonical_url, "https://music.163.com/playlist?id=2829816518");
    assert_eq!(playlist.metric, 58_230_000);
}

#[tokio::test]
async fn test_netease_rejected_section_is_left_empty() {
    let server = MockServer::start().await;
    mount_home_part(
        &server,
        "/weapi/personalized/playlist",
        ResponseTemplate::new(200).set_body_json(json!({"code": 301, "msg": "login required"})),
    )
    .await;
    mount_home_part(
        &server,
        "/weapi/personalized/newsong",
        ResponseTemplate::new(200).set_body_json(home_part("newsong")),
    )
    .await;
    mount_home_part(
        &server,
        "/weapi/playlist/hottags",
        ResponseTemplate::new(200).set_body_json(home_part("hottags")),
    )
    .await;

    let items = netease(&server).fetch_home().await.unwrap();
    assert!(items.iter().all(|item| item.kind != ItemKind::Playlist));
    assert_eq!(items.iter().filter(|item| item.kind == ItemKind::Song).count(), 2);
    assert_eq!(items.iter().filter(|item| item.kind == ItemKind::Tag).count(), 2);
}

#[tokio::test]
async fn test_netease_failed_section_keeps_the_others() {
    let server = MockServer::start().await;
    mount_home_part(
        &server,
        "/weapi/personalized/playlist",
        ResponseTemplate::new(200).set_body_json(home_part("personalized")),
    )
    .await;
    mount_home_part(
        &server,
        "/weapi/personalized/newsong",
        ResponseTemplate::new(200).set_body_json(home_part("newsong")),
    )
    .await;
    mount_home_part(&server, "/weapi/playlist/hottags", ResponseTemplate::new(500)).await;

    let items = netease(&server).fetch_home().await.unwrap();
    assert_eq!(items.len(), 4);
    assert_eq!(items.iter().filter(|item| item.kind == ItemKind::Playlist).count(), 2);
    assert_eq!(items.iter().filter(|item| item.kind == ItemKind::Song).count(), 2);
    assert!(items.iter().all(|item| item.kind != ItemKind::Tag));
}

#[tokio::test]
async fn test_netease_short_playlist_section_uses_hot_list() {
    let server = MockServer::start().await;
    mount_home_part(
        &server,
        "/weapi/personalized/playlist",
        ResponseTemplate::new(200).set_body_json(home_part("personalized")),
    )
    .await;
    mount_home_part(&server, "/weapi/personalized/newsong", ResponseTemplate::new(503)).await;
    mount_home_part(&server, "/weapi/playlist/hottags", ResponseTemplate::new(503)).await;
    Mock::given(method("POST"))
        .and(path("/weapi/playlist/list"))
        .and(body_string_contains("encSecKey="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "playlists": [
                {"id": 2829816518_u64, "name": "already listed", "coverImgUrl": "https://p1.music.126.net/dup.jpg", "playCount": 1},
                {"id": 7001, "name": "热门歌单", "coverImgUrl": "https://p1.music.126.net/hot.jpg", "playCount": 9000}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let items = netease_with_fallback(&server, 10).fetch_home().await.unwrap();
    let ids: Vec<&str> = items.iter().map(|item| item.item_id.as_str()).collect();
    assert_eq!(ids, ["2829816518", "3136952023", "7001"]);

    let hot = &items[2];
    assert_eq!(hot.section, "hotRecommend");
    assert_eq!(hot.record.canonical_url, "https://music.163.com/playlist?id=7001");
    assert_eq!(hot.record.cover_url, "https://p1.music.126.net/hot.jpg");
    assert_eq!(hot.metric, 9000);
}

#[tokio::test]
async fn test_netease_home_fails_when_every_call_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = netease_with_fallback(&server, 10).fetch_home().await.unwrap_err();
    assert!(matches!(err, IngestError::Transport { status: 503, .. }));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4, "three sections plus the playlist fallback");
}

// ============================================================================
// QQ Music
// ============================================================================

#[tokio::test]
async fn test_qq_chart_resolves_period_then_fetches_detail() {
    common::init_test_tracing();
    let server = MockServer::start().await;
    let token = compute_token(QQ_SESSION_KEY).to_string();

    Mock::given(method("POST"))
        .and(path(QQ_API_PATH))
        .and(query_param("g_tk", token.as_str()))
        .and(body_partial_json(json!({"topList": {"method": "GetAll"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(get_all(26, "2024_42")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(QQ_API_PATH))
        .and(body_partial_json(json!({
            "toplist": {"method": "GetDetail", "param": {"topid": 26, "period": "2024_42"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(include_str!("../fixtures/qq/hot.json")))
        .expect(1)
        .mount(&server)
        .await;

    let records = qq(&server).fetch_chart(ChartType::Hot).await.unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].canonical_url, "https://y.qq.com/n/ryqq/songDetail/0039MnYb0qxYhV");
    assert!(records[0].cover_url.starts_with("https://y.gtimg.cn/music/photo_new/"));
}

#[tokio::test]
async fn test_qq_unknown_period_skips_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QQ_API_PATH))
        .and(body_partial_json(json!({"topList": {"method": "GetAll"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(get_all(62, "2024-10-18")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(QQ_API_PATH))
        .and(body_partial_json(json!({"toplist": {"method": "GetDetail"}})))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = qq(&server).fetch_chart(ChartType::Hot).await.unwrap_err();
    assert!(matches!(err, IngestError::PeriodUnresolved { top_id: 26 }));
}

#[tokio::test]
async fn test_qq_rejected_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QQ_API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 500001})))
        .mount(&server)
        .await;

    let err = qq(&server).fetch_chart(ChartType::Rising).await.unwrap_err();
    assert!(matches!(err, IngestError::Rejected { code: 500001, .. }));
}

#[tokio::test]
async fn test_qq_home_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header_exists("cookie"))
        .respond_with(ResponseTemplate::new(200).set_body_string(include_str!("../fixtures/qq/home.html")))
        .expect(1)
        .mount(&server)
        .await;

    let items = qq(&server).fetch_home().await.unwrap();
    assert_eq!(items.len(), 8);
    let playlist = items.iter().find(|item| item.item_id == "7039542340").unwrap();
    assert_eq!(playlist.kind, ItemKind::Playlist);
    assert_eq!(playlist.record.canonical_url, "https://y.qq.com/n/ryqq/playlist/7039542340");
    assert_eq!(playlist.metric, 2_345_678);
}

#[tokio::test]
async fn test_qq_requires_cookie() {
    let result = QqProvider::new(
        reqwest::Client::new(),
        QqConfig::default(),
        Some(CookieJar::parse("")),
        Arc::new(Throttle::disabled()),
    );
    assert!(matches!(result, Err(IngestError::Config(_))));
    let result = QqProvider::new(reqwest::Client::new(), QqConfig::default(), None, Arc::new(Throttle::disabled()));
    assert!(result.is_err());
}
