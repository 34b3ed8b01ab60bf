//! Typed error definitions for the dominance broadcast engine.
//!
//! [`SourceError`] is the closed set of failures a market-data fetch can end
//! in. Every variant is transient: the scheduler falls back to the cached
//! reading and tries again next cycle. [`DxError`] is the crate-wide wrapper
//! used at component boundaries; it integrates with `anyhow::Result` in the
//! runner.

use std::time::Duration;

use thiserror::Error;

/// Failure kinds of one snapshot fetch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// Non-2xx status or a transport-level failure (DNS, TLS, reset).
    #[error("source unavailable (status={status:?}): {reason}")]
    Unavailable {
        /// HTTP status, if a response was received at all.
        status: Option<u16>,
        reason: String,
    },

    /// HTTP 429 from the source.
    #[error("source rate limited (retry_after={retry_after:?})")]
    RateLimited {
        /// Parsed `Retry-After` header, when the source sent one.
        retry_after: Option<Duration>,
    },

    /// The body was not JSON, or a required numeric field was missing.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// No response within the configured bound.
    #[error("source timed out after {0:?}")]
    Timeout(Duration),
}

impl SourceError {
    /// Build an error from a non-success HTTP status.
    ///
    /// 429 maps to [`SourceError::RateLimited`]; every other status maps to
    /// [`SourceError::Unavailable`].
    pub fn from_status(status: u16, retry_after: Option<Duration>, reason: impl Into<String>) -> Self {
        if status == 429 {
            Self::RateLimited { retry_after }
        } else {
            Self::Unavailable {
                status: Some(status),
                reason: reason.into(),
            }
        }
    }

    /// `true` for the rate-limit sub-kind of "source unavailable".
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Short stable label for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "source_unavailable",
            Self::RateLimited { .. } => "rate_limited",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Timeout(_) => "timeout",
        }
    }
}

/// Domain-specific errors for the dominance broadcast engine.
#[derive(Debug, Error)]
pub enum DxError {
    /// Configuration parsing or validation error. Fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// Market-data fetch or estimation failure.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Gateway session failure (handshake, authentication).
    #[error("gateway error: {0}")]
    Gateway(String),
}
