//! QQ Music `musicu.fcg` request envelope
//!
//! Every call carries a `comm` block (numeric uin and the `g_tk` token) and
//! any number of logical RPC calls keyed by an alias. The response echoes
//! the aliases, each with its own `code` and `data`.

use crate::cookie::CookieJar;
use serde::Serialize;
use serde_json::{Map, Value};

/// Seed of the `g_tk` rolling hash; also the token of an empty key
pub const TOKEN_SEED: i64 = 5381;

/// Cookie names that may carry the music session key, in preference order
pub const SESSION_KEY_COOKIES: [&str; 2] = ["qqmusic_key", "qm_keyst"];

/// Cookie names that may carry the account number
pub const UIN_COOKIES: [&str; 2] = ["uin", "p_uin"];

/// `g_tk` token: `h += (h << 5) + byte`, masked to 31 bits after each byte.
pub fn compute_token(key: &str) -> i64 {
    key.bytes().fold(TOKEN_SEED, |hash, byte| {
        (hash + (hash << 5) + i64::from(byte)) & 0x7fff_ffff
    })
}

/// Numeric uin from a cookie value such as `o0123456`; `0` when absent.
pub fn parse_uin(raw: Option<&str>) -> u64 {
    raw.map(|value| value.chars().filter(char::is_ascii_digit).collect::<String>())
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

/// Shared `comm` block of every musicu request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comm {
    pub uin: u64,
    pub format: &'static str,
    pub ct: u32,
    pub cv: u32,
    pub g_tk: i64,
}

impl Comm {
    pub fn new(uin: u64, g_tk: i64) -> Self {
        Self {
            uin,
            format: "json",
            ct: 24,
            cv: 0,
            g_tk,
        }
    }

    pub fn from_cookie(jar: &CookieJar) -> Self {
        let uin = parse_uin(jar.first_of(&UIN_COOKIES));
        let token = compute_token(jar.first_of(&SESSION_KEY_COOKIES).unwrap_or(""));
        Self::new(uin, token)
    }
}

/// One logical RPC call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MusicuCall {
    pub module: String,
    pub method: String,
    pub param: Value,
}

/// A bundle of calls sent in one round trip
#[derive(Debug, Clone)]
pub struct MusicuRequest {
    comm: Comm,
    calls: Vec<(String, MusicuCall)>,
}

impl MusicuRequest {
    pub fn new(comm: Comm) -> Self {
        Self {
            comm,
            calls: Vec::new(),
        }
    }

    pub fn call(
        mut self,
        alias: impl Into<String>,
        module: impl Into<String>,
        method: impl Into<String>,
        param: Value,
    ) -> Self {
        self.calls.push((
            alias.into(),
            MusicuCall {
                module: module.into(),
                method: method.into(),
                param,
            },
        ));
        self
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.calls.iter().map(|(alias, _)| alias.as_str())
    }

    /// JSON body: `{"comm": {...}, "<alias>": {"module", "method", "param"}, ...}`
    pub fn body(&self) -> Value {
        let mut body = Map::new();
        body.insert("comm".to_string(), serde_json::json!(self.comm));
        for (alias, call) in &self.calls {
            body.insert(alias.clone(), serde_json::json!(call));
        }
        Value::Object(body)
    }

    /// Query string expected next to the body
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let token = self.comm.g_tk.to_string();
        vec![
            ("format", "json".to_string()),
            ("inCharset", "utf8".to_string()),
            ("outCharset", "utf-8".to_string()),
            ("platform", "yqq.json".to_string()),
            ("needNewCode", "0".to_string()),
            ("g_tk", token.clone()),
            ("g_tk_new_20200303", token),
        ]
    }
}
