//! Error types for the adaptive downloader core.
//!
//! Two error enums exist at different layers: [`TransportError`] covers a
//! single network/filesystem operation (HEAD, GET, Range GET, scratch-file
//! I/O) and carries the context (URL, path) the underlying library errors
//! don't. [`BatchError`] covers only configuration-level faults that fail a
//! batch before any work starts — per-URL failures never reach this type,
//! they are folded into [`crate::orchestrator::PerFileRecord`] instead.

use thiserror::Error;

/// Errors from a single transport or filesystem operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS, connection refused, TLS, etc.)
    #[error("network error for {url}: {source}")]
    Network {
        /// The URL the request targeted.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout for {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx/5xx) on a request that expected success.
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Filesystem error while reading/writing the destination file.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path the error occurred on.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// Note on From impls: we intentionally do not implement `From<reqwest::Error>`
// or `From<std::io::Error>` — our variants require the url/path context those
// source errors don't carry. Constructor helpers are the correct seam here.

/// Errors that fail a batch before any URL is processed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    /// `count` was not a positive integer.
    #[error("invalid count {0}: must be positive")]
    InvalidCount(i64),

    /// The base URL was empty after trimming.
    #[error("base_url must not be empty")]
    EmptyBaseUrl,

    /// The probe cadence was below the spec's minimum (`everyN >= 2`).
    #[error("invalid probe_every_n {0}: must be >= 2")]
    InvalidProbeEveryN(u32),
}
