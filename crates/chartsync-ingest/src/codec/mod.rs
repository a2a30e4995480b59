//! Request signing for the two provider APIs
//!
//! - [`weapi`]: NetEase double AES + RSA form envelope
//! - [`musicu`]: QQ Music `g_tk` token and bundled RPC body

pub mod musicu;
pub mod weapi;

use thiserror::Error;

/// Codec failures are programming errors (bad constants, bad key length).
/// They are never retried and never swallowed.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("AES key must be 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("RSA public key constant is not valid hex")]
    InvalidPublicKey,

    #[error("session key generator lock poisoned")]
    RngPoisoned,

    #[error("failed to serialize request payload: {0}")]
    Payload(#[from] serde_json::Error),
}
