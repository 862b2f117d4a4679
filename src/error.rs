//! Error taxonomy for the request surface.
//!
//! Only structurally invalid requests and authorization failures are fatal
//! to a calling request. Model and runtime availability conditions never
//! appear here — the speech pipeline and advisor degrade to their documented
//! fallbacks instead of failing.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed or oversized input, rejected before any model or index call.
    #[error("{0}")]
    InvalidInput(String),

    /// A path escaped the configured sandbox boundary, rejected before I/O.
    #[error("path not allowed: {0}")]
    PathNotAllowed(String),

    /// Missing or invalid identity claim, rejected before any tenant-scoped work.
    #[error("{0}")]
    Unauthorized(String),

    /// Too many requests in the current window. No partial work was performed.
    #[error("rate limit exceeded for '{class}', retry in {retry_after_secs}s")]
    RateLimited { class: String, retry_after_secs: u64 },

    #[error("{0}")]
    NotFound(String),

    /// A required backend (e.g. the embedding provider) is not configured.
    #[error("{0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Machine-readable error code, matching the HTTP error body contract.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "invalid_input",
            ApiError::PathNotAllowed(_) => "path_not_allowed",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::NotFound(_) => "not_found",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::Storage(_) | ApiError::Internal(_) => "internal",
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
