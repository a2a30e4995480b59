//! Provider session cookies
//!
//! Cookie files hold a single `k=v; k=v` line copied from a browser session.

use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    pairs: BTreeMap<String, String>,
}

impl CookieJar {
    /// Parse a `k=v; k=v` header string. Segments without `=` are ignored.
    pub fn parse(raw: &str) -> Self {
        let pairs = raw
            .split(';')
            .filter_map(|segment| {
                let (key, value) = segment.split_once('=')?;
                let key = key.trim();
                (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
            })
            .collect();
        Self { pairs }
    }

    /// Read and parse a cookie file. A missing or blank file yields `None`.
    pub async fn from_file(path: &Path) -> std::io::Result<Option<Self>> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(None),
            Ok(raw) => Ok(Some(Self::parse(raw.trim()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// First non-empty value among `keys`
    pub fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Value for the `Cookie` request header
    pub fn header_value(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
