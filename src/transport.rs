//! The transport contract consumed by [`crate::transfer::ResumableTransfer`]
//! and [`crate::probe::LightProbe`].
//!
//! The core never talks to `reqwest` directly outside this module — every
//! other component depends on the [`Transport`] trait, so tests can swap in
//! a scripted fake instead of a live server.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::error::TransportError;

const CONNECT_TIMEOUT_SECS: u64 = 15;
const READ_TIMEOUT_SECS: u64 = 600;
const PROBE_TIMEOUT_SECS: u64 = 5;

/// Response to a `HEAD` request, with the headers the core reads already
/// pulled out and lowercased per spec §6.
#[derive(Debug, Clone, Default)]
pub struct HeadResponse {
    /// HTTP status code.
    pub status: u16,
    /// `true` iff `accept-ranges: bytes` was present.
    pub accept_ranges: bool,
    /// `content-length`, if present and parseable.
    pub content_length: Option<u64>,
    /// `etag`, if present.
    pub etag: Option<String>,
    /// `last-modified`, if present.
    pub last_modified: Option<String>,
}

/// Result of a whole-file `GET`.
#[derive(Debug, Clone, Copy)]
pub struct WholeGetResult {
    /// Wall-clock time spent on the request.
    pub elapsed_s: f64,
    /// Bytes written to `dst`.
    pub size: u64,
}

/// Result of a Range `GET`.
#[derive(Debug, Clone, Copy)]
pub struct RangeGetResult {
    /// Wall-clock time spent on the request.
    pub elapsed_s: f64,
    /// Bytes appended to `dst` in this call.
    pub size: u64,
    /// HTTP status code (`206` normally, `200` if the server ignored Range).
    pub status: u16,
}

/// Connect/read timeout pair for a Range GET, per spec §6.
#[derive(Debug, Clone, Copy)]
pub struct RangeTimeouts {
    /// Connect timeout.
    pub connect_ms: u64,
    /// Read timeout.
    pub read_ms: u64,
}

impl Default for RangeTimeouts {
    fn default() -> Self {
        Self {
            connect_ms: CONNECT_TIMEOUT_SECS * 1_000,
            read_ms: READ_TIMEOUT_SECS * 1_000,
        }
    }
}

/// HEAD/GET/Range GET against a destination file. Everything the core needs
/// from the network goes through this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a `HEAD` request. Implementations that cannot reach the server
    /// should surface a [`TransportError`]; the caller (per spec §4.1 step 1)
    /// treats any HEAD failure as `accept_ranges=false, content_length=None`.
    async fn head(&self, url: &str) -> Result<HeadResponse, TransportError>;

    /// Issues a whole-file `GET`, overwriting `dst` from offset 0.
    async fn get_whole(&self, url: &str, dst: &Path) -> Result<WholeGetResult, TransportError>;

    /// Issues a Range `GET` for `bytes=start_byte-`, appending the response
    /// body to `dst`.
    async fn get_range_append(
        &self,
        url: &str,
        dst: &Path,
        start_byte: u64,
        timeouts: RangeTimeouts,
    ) -> Result<RangeGetResult, TransportError>;
}

/// Live [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestTransport {
    /// Builds a transport with the spec's default connect/read timeouts.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client with static configuration");
        Self { client }
    }

    /// Builds a transport tuned for probe-sized requests (short timeouts).
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_for_probes() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest probe client with static configuration");
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self), fields(url = %url))]
    async fn head(&self, url: &str) -> Result<HeadResponse, TransportError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| TransportError::network(url, e))?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_ascii_lowercase(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        let accept_ranges = headers
            .get("accept-ranges")
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
        let content_length = headers.get("content-length").and_then(|v| v.parse().ok());

        Ok(HeadResponse {
            status,
            accept_ranges,
            content_length,
            etag: headers.get("etag").cloned(),
            last_modified: headers.get("last-modified").cloned(),
        })
    }

    #[instrument(skip(self), fields(url = %url, dst = %dst.display()))]
    async fn get_whole(&self, url: &str, dst: &Path) -> Result<WholeGetResult, TransportError> {
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::network(url, e))?;

        if !response.status().is_success() {
            return Err(TransportError::http_status(url, response.status().as_u16()));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dst)
            .await
            .map_err(|e| TransportError::io(dst.display().to_string(), e))?;

        let size = stream_to_file(&mut file, response, url, dst).await?;

        Ok(WholeGetResult {
            elapsed_s: start.elapsed().as_secs_f64(),
            size,
        })
    }

    #[instrument(skip(self), fields(url = %url, dst = %dst.display(), start_byte))]
    async fn get_range_append(
        &self,
        url: &str,
        dst: &Path,
        start_byte: u64,
        timeouts: RangeTimeouts,
    ) -> Result<RangeGetResult, TransportError> {
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .header(reqwest::header::RANGE, format!("bytes={start_byte}-"))
            .timeout(Duration::from_millis(timeouts.read_ms))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::timeout(url)
                } else {
                    TransportError::network(url, e)
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(TransportError::http_status(url, status));
        }

        // A server that ignores Range answers 200 with the whole object in
        // the body. Deciding the open mode here, before any byte of this
        // response is written, is what keeps an ignored Range request from
        // being appended onto whatever already sits at `dst` (spec's O1).
        let mut open_opts = OpenOptions::new();
        open_opts.create(true);
        if status == 200 {
            open_opts.write(true).truncate(true);
        } else {
            open_opts.append(true);
        }
        let mut file = open_opts
            .open(dst)
            .await
            .map_err(|e| TransportError::io(dst.display().to_string(), e))?;

        let size = stream_to_file(&mut file, response, url, dst).await?;

        Ok(RangeGetResult {
            elapsed_s: start.elapsed().as_secs_f64(),
            size,
            status,
        })
    }
}

async fn stream_to_file(
    file: &mut tokio::fs::File,
    response: reqwest::Response,
    url: &str,
    dst: &Path,
) -> Result<u64, TransportError> {
    use futures_util::StreamExt;

    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TransportError::network(url, e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| TransportError::io(dst.display().to_string(), e))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| TransportError::io(dst.display().to_string(), e))?;
    Ok(written)
}
