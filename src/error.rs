//! Typed error hierarchy for the abm-client crate.
//!
//! Every variant maps to one stage of a run so that a fatal error tells the
//! operator where it happened:
//! - `Config` — missing settings or an unusable private key, raised before
//!   any network activity.
//! - `Assertion` — the client assertion could not be signed.
//! - `Auth` — the token endpoint rejected the exchange or answered with a
//!   body that lacks `access_token` / `expires_in`.
//! - `ExhaustedRetries` — a page kept returning a non-success status after
//!   the retry budget was spent.
//! - `Pagination` — the `links.next` chain is unusable (cycle, page limit,
//!   unparseable link).
//! - `Parse` / `Network` — malformed bodies and transport failures.
//! - `CacheWrite` — a freshly issued token could not be persisted.
//!
//! A cache that cannot be *read* is not an error: the cache layer reports it
//! as a miss.

use std::path::PathBuf;

use reqwest::StatusCode;

/// Unified error type for all abm-client library operations.
#[derive(Debug, thiserror::Error)]
pub enum AbmError {
    /// Missing or invalid configuration: unset identity fields, unreadable
    /// key file, or a key that is not a PKCS#8 P-256 private key.
    #[error("configuration error: {message}")]
    Config {
        /// What is wrong with the configuration.
        message: String,
        /// The underlying I/O or key-parsing error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Signing the client assertion failed.
    #[error("assertion build failed: {0}")]
    Assertion(#[source] jsonwebtoken::errors::Error),

    /// The token exchange failed.
    ///
    /// This covers non-2xx responses from the token endpoint (the `message`
    /// carries the status and raw body) and success responses that are
    /// missing `access_token` or `expires_in`. The exchange is attempted
    /// exactly once per acquisition, so this is always fatal.
    #[error("token exchange failed: {message}")]
    Auth {
        /// Human-readable description including status and body when available.
        message: String,
        /// The underlying transport or parse error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A page request still returned a non-success status after every retry.
    #[error("page fetch failed after {attempts} attempts with status {status} for {url}: {body}")]
    ExhaustedRetries {
        /// The status code of the final attempt.
        status: StatusCode,
        /// Total number of requests sent for the page (initial + retries).
        attempts: u32,
        /// The page URL that kept failing.
        url: String,
        /// Raw body of the final response. Empty if it could not be read.
        body: String,
    },

    /// The `links.next` chain could not be followed safely.
    #[error("page fetch failed: {message}")]
    Pagination {
        /// Why the chain was abandoned.
        message: String,
    },

    /// A response body was not the JSON shape we expected.
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// Transport-level failure (DNS, TCP, TLS, timeout). No status code
    /// is available because the request never completed.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The token cache file could not be written. Fatal, because running
    /// on without a durable cache would request a new token every run.
    #[error("cache write failed for {}: {source}", .path.display())]
    CacheWrite {
        /// The cache file that was being replaced.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl AbmError {
    /// Shorthand for a `Config` error without an underlying cause.
    pub(crate) fn config(message: impl Into<String>) -> Self {
        AbmError::Config {
            message: message.into(),
            source: None,
        }
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, AbmError>;
