//! Change detection for crawled record sets

use crate::types::SongRecord;

/// md5 hex digest of arbitrary bytes
pub fn md5_hex(data: impl AsRef<[u8]>) -> String {
    format!("{:x}", md5::compute(data))
}

/// Fingerprint of an ordered list of canonical URLs.
///
/// URLs are joined with `\n`; empty ones are skipped. Order matters, so a
/// pure reordering upstream yields a different fingerprint.
pub fn fingerprint_urls<'a, I>(urls: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ctx = md5::Context::new();
    let mut first = true;
    for url in urls.into_iter().filter(|url| !url.is_empty()) {
        if !first {
            ctx.consume(b"\n");
        }
        ctx.consume(url.as_bytes());
        first = false;
    }
    format!("{:x}", ctx.compute())
}

/// Fingerprint of a crawled chart
pub fn fingerprint(records: &[SongRecord]) -> String {
    fingerprint_urls(records.iter().map(|r| r.canonical_url.as_str()))
}

/// Checkpoint key of one record's side effects: `"{stage}|{md5(url)}"`
pub fn record_key(stage_key: &str, canonical_url: &str) -> String {
    format!("{}|{}", stage_key, md5_hex(canonical_url))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn song(id: u32) -> SongRecord {
        SongRecord::new(
            format!("song {id}"),
            "artist",
            format!("https://music.163.com/song?id={id}"),
            "",
        )
    }

    #[test]
    fn test_fingerprint_matches_joined_md5() {
        let records = vec![song(1), song(2)];
        assert_eq!(fingerprint(&records), "8288f6e2834b844dffb09191bbc7afb6");
        assert_eq!(
            fingerprint(&records),
            md5_hex("https://music.163.com/song?id=1\nhttps://music.163.com/song?id=2")
        );
    }

    #[test]
    fn test_fingerprint_empty_set() {
        assert_eq!(fingerprint(&[]), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(fingerprint_urls(["", ""]), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_fingerprint_detects_single_url_change() {
        let before = vec![song(1), song(2), song(3)];
        let mut after = before.clone();
        after[1].canonical_url = "https://music.163.com/song?id=20".to_string();
        assert_ne!(fingerprint(&before), fingerprint(&after));
    }

    #[test]
    fn test_fingerprint_is_order_sensitive() {
        let before = vec![song(1), song(2), song(3)];
        let mut after = before.clone();
        after.swap(0, 2);
        assert_ne!(fingerprint(&before), fingerprint(&after));
    }

    #[test]
    fn test_fingerprint_ignores_metadata() {
        let before = vec![song(1)];
        let mut after = before.clone();
        after[0].title = "renamed".to_string();
        after[0].hosted_cover_url = Some("https://img.example/x.jpg".to_string());
        assert_eq!(fingerprint(&before), fingerprint(&after));
    }

    #[test]
    fn test_record_key_format() {
        let key = record_key("wyy:hot", "");
        assert_eq!(key, "wyy:hot|d41d8cd98f00b204e9800998ecf8427e");
    }
}
