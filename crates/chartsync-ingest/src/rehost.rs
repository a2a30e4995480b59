//! Cover image rehosting
//!
//! Provider CDNs block hotlinking, so covers are copied to a controlled image
//! host. A cover is streamed into a temp file, uploaded as multipart form
//! data, and the host's JSON envelope is parsed for the final URL. The temp
//! file is removed when the call returns, whatever the outcome.
//!
//! URLs on the deprecated host are never handed out.

use async_trait::async_trait;
use chartsync_common::types::is_on_host;
use futures::StreamExt;
use reqwest::header::{ACCEPT, ORIGIN, REFERER};
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use serde_json::Value;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};
use url::Url;

pub const DEFAULT_UPLOAD_URL: &str = "http://www.jiketianqi.com/weatapi/file/upload";
pub const DEFAULT_UPLOAD_FIELD: &str = "files";
pub const DEFAULT_DEPRECATED_HOST: &str = "oilgasgpts.com";
pub const DEFAULT_EXTENSION: &str = "jpg";

#[derive(Error, Debug)]
pub enum RehostError {
    #[error("invalid cover URL: {0}")]
    InvalidUrl(String),

    #[error("download of {url} failed with HTTP {status}")]
    DownloadStatus { url: String, status: u16 },

    #[error("download of {0} returned no data")]
    EmptyDownload(String),

    #[error("upload failed with HTTP {0}")]
    UploadStatus(u16),

    #[error("upload response carries no URL: {0}")]
    Envelope(String),

    #[error("upload returned a deprecated host URL: {0}")]
    DeprecatedHost(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that can turn a provider cover URL into a hosted one
#[async_trait]
pub trait CoverHost: Send + Sync {
    async fn rehost(&self, source_url: &str) -> Result<String, RehostError>;
}

#[derive(Debug, Clone)]
pub struct RehostConfig {
    pub upload_url: String,
    pub field_name: String,
    pub tmp_dir: PathBuf,
    pub deprecated_host: String,
}

impl Default for RehostConfig {
    fn default() -> Self {
        Self {
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            field_name: DEFAULT_UPLOAD_FIELD.to_string(),
            tmp_dir: std::env::temp_dir(),
            deprecated_host: DEFAULT_DEPRECATED_HOST.to_string(),
        }
    }
}

pub struct ImageRehoster {
    client: reqwest::Client,
    config: RehostConfig,
}

impl ImageRehoster {
    pub fn new(client: reqwest::Client, config: RehostConfig) -> Self {
        Self { client, config }
    }

    async fn download(&self, url: &Url) -> Result<NamedTempFile, RehostError> {
        tokio::fs::create_dir_all(&self.config.tmp_dir).await?;
        let temp = tempfile::Builder::new()
            .prefix("cover_")
            .suffix(&format!(".{}", sniff_extension(url)))
            .tempfile_in(&self.config.tmp_dir)?;

        let response = self
            .client
            .get(url.clone())
            .header(REFERER, origin_of(url))
            .header(ACCEPT, "image/avif,image/webp,image/apng,image/*,*/*;q=0.8")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RehostError::DownloadStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut file = tokio::fs::File::from_std(temp.reopen()?);
        let mut stream = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;

        if written == 0 {
            return Err(RehostError::EmptyDownload(url.to_string()));
        }
        debug!(url = %url, bytes = written, path = %temp.path().display(), "Downloaded cover");
        Ok(temp)
    }

    async fn upload(&self, temp: &NamedTempFile) -> Result<String, RehostError> {
        let file_name = temp
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("cover.{DEFAULT_EXTENSION}"));
        let mime = mime_for(&file_name);
        let file = tokio::fs::File::open(temp.path()).await?;
        let length = file.metadata().await?.len();

        // Known length keeps the request's Content-Length; the image itself is
        // streamed from disk rather than buffered.
        let body = Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, length)
            .file_name(file_name)
            .mime_str(mime)?;
        let form = Form::new().part(self.config.field_name.clone(), part);

        let mut request = self
            .client
            .post(&self.config.upload_url)
            .header(ACCEPT, "application/json, text/plain, */*");
        if let Ok(upload_url) = Url::parse(&self.config.upload_url) {
            request = request
                .header(REFERER, origin_of(&upload_url))
                .header(ORIGIN, upload_url.origin().ascii_serialization());
        }

        let response = request.multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RehostError::UploadStatus(status.as_u16()));
        }
        let body = response.text().await?;
        let envelope: Value = serde_json::from_str(&body)
            .map_err(|_| RehostError::Envelope(truncate(&body, 200)))?;
        parse_upload_envelope(&envelope)
    }
}

#[async_trait]
impl CoverHost for ImageRehoster {
    #[instrument(skip(self))]
    async fn rehost(&self, source_url: &str) -> Result<String, RehostError> {
        let url = Url::parse(source_url).map_err(|_| RehostError::InvalidUrl(source_url.to_string()))?;

        let temp = self.download(&url).await?;
        let uploaded = self.upload(&temp).await;
        drop(temp);

        let hosted = uploaded?;
        if is_on_host(&hosted, &self.config.deprecated_host) {
            return Err(RehostError::DeprecatedHost(hosted));
        }
        Ok(hosted)
    }
}

/// File extension from the last path segment, lowercase `[a-z0-9]{1,6}`,
/// falling back to `jpg`.
pub fn sniff_extension(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|last| last.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| (1..=6).contains(&ext.len()) && ext.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Hosted URL from `{"data": ["<url>", ...]}`; a bare string or `{"url": ...}`
/// under `data` is accepted too.
pub fn parse_upload_envelope(envelope: &Value) -> Result<String, RehostError> {
    let data = envelope.get("data");
    let url = match data {
        Some(Value::Array(items)) => items.first().and_then(Value::as_str),
        Some(Value::String(url)) => Some(url.as_str()),
        Some(Value::Object(object)) => object.get("url").and_then(Value::as_str),
        _ => None,
    };
    url.map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RehostError::Envelope(truncate(&envelope.to_string(), 200)))
}

fn origin_of(url: &Url) -> String {
    format!("{}/", url.origin().ascii_serialization())
}

fn mime_for(file_name: &str) -> &'static str {
    match file_name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
