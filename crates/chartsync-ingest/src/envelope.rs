//! `{code, msg, data}` result document printed on stdout

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CODE_OK: u16 = 200;
pub const CODE_ERROR: u16 = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub code: u16,
    pub msg: String,
    pub data: Value,
}

impl Envelope {
    pub fn ok(msg: impl Into<String>, data: Value) -> Self {
        Self {
            code: CODE_OK,
            msg: msg.into(),
            data,
        }
    }

    pub fn error(msg: impl Into<String>, data: Value) -> Self {
        Self {
            code: CODE_ERROR,
            msg: msg.into(),
            data,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_OK
    }

    /// Compact single-line JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"code":{CODE_ERROR},"msg":"envelope serialization failed: {e}","data":null}}"#)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let envelope = Envelope::ok("dry_run_ok", json!({"counts": {"qq:hot": 4}}));
        let parsed: Value = serde_json::from_str(&envelope.to_json()).unwrap();
        assert_eq!(parsed["code"], 200);
        assert_eq!(parsed["msg"], "dry_run_ok");
        assert_eq!(parsed["data"]["counts"]["qq:hot"], 4);

        let failed = Envelope::error("connection refused", Value::Null);
        assert!(!failed.is_success());
        assert!(failed.to_json().contains("\"data\":null"));
    }
}
