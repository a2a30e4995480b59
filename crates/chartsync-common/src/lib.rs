//! Chartsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, hashing, and logging for the chartsync workspace.
//!
//! # Overview
//!
//! - **Types**: canonical records (`SongRecord`, `HomeItem`) and stage identifiers
//! - **Fingerprint**: change detection hashes for crawled record sets
//! - **Logging**: tracing subscriber setup shared by every binary
//!
//! # Example
//!
//! ```
//! use chartsync_common::fingerprint::fingerprint;
//! use chartsync_common::types::SongRecord;
//!
//! let records = vec![SongRecord::new("Song", "Artist", "https://music.163.com/song?id=1", "")];
//! assert_eq!(fingerprint(&records).len(), 32);
//! ```

pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
