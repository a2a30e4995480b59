//! NetEase `weapi` envelope
//!
//! The plaintext JSON is AES-128-CBC encrypted twice (fixed nonce key, then a
//! random 16 character session key) and the session key is RSA encrypted
//! with raw modular exponentiation. The result is posted as the form fields
//! `params` and `encSecKey`.

use super::CodecError;
use aes::Aes128;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use num_bigint::BigUint;
use rand::{distributions::Alphanumeric, rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::sync::Mutex;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

const NONCE_KEY: &[u8] = b"0CoJUm6Qyw8W8jud";
const IV: &[u8] = b"0102030405060708";
const PUBLIC_EXPONENT: &str = "010001";
const MODULUS: &str = "00e0b509f6259df8642dbc35662901477df22677ec152b5ff68ace615bb7b725152b3ab17a876aea8a5aa76d2e417629ec4ee341f56135fccf695280104e0312ecbda92557c93870114af6c9d05c4f7f0c3685b7a46bee255932575cce10b424d813cfe4875d3e82047b97ddef52741d546b8e289dc6935b3ece0462db0a22b8e7";

/// Length of the random session key
pub const SESSION_KEY_LEN: usize = 16;

/// Width of the hex encoded `encSecKey`
pub const ENC_SEC_KEY_WIDTH: usize = 256;

/// Encrypted form body for a weapi call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeapiEnvelope {
    pub params: String,
    #[serde(rename = "encSecKey")]
    pub enc_sec_key: String,
}

/// Builds weapi envelopes. Owns its session key generator so tests can seed it.
pub struct WeapiCodec {
    rng: Mutex<StdRng>,
}

impl Default for WeapiCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl WeapiCodec {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic session keys for reproducible envelopes
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn session_key(&self) -> Result<String, CodecError> {
        let mut rng = self.rng.lock().map_err(|_| CodecError::RngPoisoned)?;
        Ok((0..SESSION_KEY_LEN)
            .map(|_| char::from(rng.sample(Alphanumeric)))
            .collect())
    }

    /// Encrypt a JSON payload under a fresh session key
    pub fn encode<T: Serialize + ?Sized>(&self, payload: &T) -> Result<WeapiEnvelope, CodecError> {
        let plaintext = serde_json::to_string(payload)?;
        let key = self.session_key()?;
        encode_with_key(&plaintext, &key)
    }
}

/// Deterministic core of the envelope: `plaintext` under the given session key.
pub fn encode_with_key(plaintext: &str, session_key: &str) -> Result<WeapiEnvelope, CodecError> {
    let first = aes_base64(plaintext.as_bytes(), NONCE_KEY)?;
    let params = aes_base64(first.as_bytes(), session_key.as_bytes())?;
    let enc_sec_key = rsa_encrypt_key(session_key)?;
    Ok(WeapiEnvelope {
        params,
        enc_sec_key,
    })
}

fn aes_base64(data: &[u8], key: &[u8]) -> Result<String, CodecError> {
    let cipher = Aes128CbcEnc::new_from_slices(key, IV)
        .map_err(|_| CodecError::InvalidKeyLength(key.len()))?;
    Ok(STANDARD.encode(cipher.encrypt_padded_vec_mut::<Pkcs7>(data)))
}

fn rsa_encrypt_key(session_key: &str) -> Result<String, CodecError> {
    let modulus =
        BigUint::parse_bytes(MODULUS.as_bytes(), 16).ok_or(CodecError::InvalidPublicKey)?;
    let exponent =
        BigUint::parse_bytes(PUBLIC_EXPONENT.as_bytes(), 16).ok_or(CodecError::InvalidPublicKey)?;

    let reversed: Vec<u8> = session_key.bytes().rev().collect();
    let digest = BigUint::from_bytes_be(&reversed)
        .modpow(&exponent, &modulus)
        .to_str_radix(16);

    Ok(if digest.len() >= ENC_SEC_KEY_WIDTH {
        digest[digest.len() - ENC_SEC_KEY_WIDTH..].to_string()
    } else {
        format!("{:0>width$}", digest, width = ENC_SEC_KEY_WIDTH)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_golden_vector_song_detail() {
        let envelope =
            encode_with_key(r#"{"id":"186016","csrf_token":""}"#, "a8LsNHqPi5xGy7Tz").unwrap();
        assert_eq!(
            envelope.params,
            "swQMKSHsYLRlAfjqJ7StZWCw2brIIzzG1Gs1jhxn52e9DkqmJsuMTzBgrHgZJAjq"
        );
        assert_eq!(
            envelope.enc_sec_key,
            "191d8712ed25acd668ec584a2c43c7174f96885ca9e7218540fbac5ecb50bf24fed9b452b471aa53d57e3213b029bf539ba45b84b89425b3a4ac0a037eb4d09c68607a486b8d20f3f173a497ee8ec64b8daec7c14fbdcce00d6f209b328547610003d3c5fc79d21559bfe8a04d9adaa7e5df61ff9aa3ce51dadbb8194774b4cd"
        );
    }

    #[test]
    fn test_golden_vector_personalized() {
        let envelope =
            encode_with_key(r#"{"limit":30,"total":true,"n":1000}"#, "0123456789abcdef").unwrap();
        assert_eq!(
            envelope.params,
            "NKiN+kDZXpEZUexpeib8hiDhWVTpQloSIq36Sn+ip+MMywMh6ZdUocvkKpRs+2Qvw0dSXRIXPa8J7ikOCCZGP3xARvTpOJGJRRKe2z9QL/w="
        );
        assert_eq!(
            envelope.enc_sec_key,
            "35701388baf89fed412e11269b9c76625d095ecaf17f03fa018abe19ea2d38b949debf242ee39a71ca1f6cda71b1b86a45aa909ee27f7e78e267d34e732f0de948206c3340a788d0003372183e2f753c1f78b66ac23d134ac1fc9b993156520ea826b8aa89a962d4491b4b8d7e08738e1da9b07aa39bf4a7ef0b1c210728cd52"
        );
    }

    #[test]
    fn test_seeded_codec_is_reproducible() {
        let payload = serde_json::json!({"limit": 30});
        let a = WeapiCodec::with_seed(42).encode(&payload).unwrap();
        let b = WeapiCodec::with_seed(42).encode(&payload).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.enc_sec_key.len(), ENC_SEC_KEY_WIDTH);
    }

    #[test]
    fn test_session_keys_are_alphanumeric() {
        let codec = WeapiCodec::with_seed(1);
        let first = codec.session_key().unwrap();
        let second = codec.session_key().unwrap();
        assert_eq!(first.len(), SESSION_KEY_LEN);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first, second);
    }

    #[test]
    fn test_bad_session_key_length_is_an_error() {
        let err = encode_with_key("{}", "short").unwrap_err();
        assert!(matches!(err, CodecError::InvalidKeyLength(5)));
    }
}
