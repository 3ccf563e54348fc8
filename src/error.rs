//! Error type shared by every store operation.
//!
//! Remote failures are never retried here. Whatever the tracker or proxy
//! reports surfaces immediately to the operation that issued the request.

use thiserror::Error;

/// Failure reported by a [`crate::secret::Cipher`].
///
/// Ciphers are opaque, so the only payload is a human-readable message.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CryptoError {
    message: String,
}

impl CryptoError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The remote answered with a non-success status.
    #[error("{method} {url} failed with status {status}: {body}")]
    Transport {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response (DNS, TLS, connection reset).
    #[cfg(feature = "remote")]
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    #[error("revision {rev} of '{key}' does not exist")]
    RevisionNotFound { key: String, rev: u64 },

    /// More than one open issue carries the key as its title.
    #[error("'{key}' is backed by {count} issues, expected exactly one")]
    DuplicateIssues { key: String, count: usize },

    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A stored value is not valid JSON.
    #[error("malformed value under '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for the "absent" family: missing key or revision.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::KeyNotFound { .. } | Error::RevisionNotFound { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
