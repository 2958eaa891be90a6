//! # Error Taxonomy
//!
//! Every collaborator in Kindred (metadata provider, media oracle, tag
//! service, feature store) reports failures through one [`Error`] enum so the
//! pipeline can tell *expected* outcomes apart from *run-level* ones:
//!
//! - [`Error::NotFound`]: a 404-equivalent. Callers skip the item.
//! - [`Error::Throttled`]: a 429-equivalent from an HTTP service. Retried with
//!   backoff by [`crate::retry::RetryPolicy`].
//! - [`Error::RateLimited`]: the media oracle refused further work. Never
//!   retried, never swallowed; the orchestrator aborts and reports.
//! - [`Error::Unresolvable`]: no media match or extraction failed. The caller
//!   tries another seed.
//! - [`Error::StoreUnavailable`]: similarity matching is disabled for the run.
//!
//! Binary glue keeps using `anyhow` on top of this.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Resource does not exist (HTTP 404 or missing row)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Service asked us to slow down (HTTP 429)
    #[error("Throttled by {service}")]
    Throttled {
        service: &'static str,
        retry_after: Option<Duration>,
    },

    /// Media oracle rate limit; aborts the current batch or run
    #[error("Media rate limit reached: {0}")]
    RateLimited(String),

    /// Track could not be matched or analysed
    #[error("Track {track_id} is unresolvable: {reason}")]
    Unresolvable { track_id: String, reason: String },

    /// Feature database cannot be used
    #[error("Feature store unavailable: {0}")]
    StoreUnavailable(String),

    /// Network hiccup or 5xx; worth another attempt
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Payload did not match the expected record shape
    #[error("Malformed payload from {service}: {message}")]
    Malformed {
        service: &'static str,
        message: String,
    },

    /// Feature extraction ran but produced nothing usable
    #[error("Feature extraction failed: {0}")]
    Extraction(String),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a [`crate::retry::RetryPolicy`] may attempt the call again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Throttled { .. })
    }

    /// Shorthand used by resolver and oracle code paths.
    pub fn unresolvable(track_id: &str, reason: impl Into<String>) -> Self {
        Self::Unresolvable {
            track_id: track_id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

/// Convenience Result type using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Transient("reset".into()).is_retryable());
        assert!(Error::Throttled { service: "spotify", retry_after: None }.is_retryable());

        assert!(!Error::NotFound("track".into()).is_retryable());
        assert!(!Error::RateLimited("429".into()).is_retryable());
        assert!(!Error::StoreUnavailable("locked".into()).is_retryable());
        assert!(!Error::unresolvable("t1", "no match").is_retryable());
    }

    #[test]
    fn test_sqlite_errors_map_to_store_unavailable() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }
}
