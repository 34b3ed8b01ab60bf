//! Errors raised by the broadcast surface.

use std::time::Duration;

use thiserror::Error;

/// Failure of one broadcast-surface call (listing, lookup, or write).
///
/// None of these are fatal: the enumerator drops the affected guild and the
/// distributor turns a failed write into a per-target outcome.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CastError {
    /// 401/403: missing permission, role hierarchy conflict, bad token.
    #[error("forbidden (HTTP {status}): {message}")]
    Forbidden { status: u16, message: String },

    /// 404: guild or member no longer visible.
    #[error("not found: {0}")]
    NotFound(String),

    /// 429 from the platform.
    #[error("rate limited (retry_after={retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Any other non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection-level failure or undecodable body.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call exceeded its time bound.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Gateway session not connected or its task has exited.
    #[error("gateway error: {0}")]
    Gateway(String),
}

impl CastError {
    /// Map a non-success status and response body to an error.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => Self::Forbidden {
                status,
                message: body,
            },
            404 => Self::NotFound(body),
            429 => Self::RateLimited { retry_after },
            _ => Self::Http { status, body },
        }
    }
}
