//! Error Taxonomy
//!
//! This module defines the error types produced by the session core. Resolver
//! failures (malformed tokens, expired records, invalid JWTs) are handled by
//! callers degrading to an anonymous session rather than propagating an
//! error, see [`crate::resolver::resolve`]. CSRF and configuration failures
//! propagate to the caller.

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};

/// Standard error response body, shared with any host handler that wants to
/// surface a [`SessionError`] to a client.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// The error message.
    pub error: String,
}

/// Errors raised by the [`crate::store::SessionStore`] trait. Boxed so that
/// store implementations can wrap whatever underlying error type they have
/// (`sqlx::Error`, an HTTP client error, ...) without this crate depending on
/// it.
pub type StoreError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Semantic error kinds for the session core.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No authenticated identity when one is required.
    #[error("authentication required")]
    Authentication,

    /// Identity present but the `isAuthorized` predicate denied it.
    #[error("authorization denied")]
    Authorization,

    /// Anti-CSRF token missing or mismatched on a state-changing method.
    #[error("CSRF token mismatch")]
    CsrfTokenMismatch,

    /// Internal parse failure; resolver callers should treat this as "no
    /// credential" rather than surfacing it.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Missing/short secret, or an unknown `method` configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The `advanced` (rotating-refresh-token) method is recognized but its
    /// state machine is not implemented.
    #[error("method not implemented: {0}")]
    NotImplemented(String),

    /// Propagated failure from the pluggable session store.
    #[error("session store error: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    fn status_code(&self) -> StatusCode {
        match self {
            SessionError::Authentication => StatusCode::UNAUTHORIZED,
            SessionError::Authorization => StatusCode::FORBIDDEN,
            SessionError::CsrfTokenMismatch => StatusCode::FORBIDDEN,
            SessionError::MalformedToken(_) => StatusCode::BAD_REQUEST,
            SessionError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SessionError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            SessionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Lets host handlers return a `SessionError` directly from an axum handler,
/// matching the `(StatusCode, Json<ErrorResponse>)` convention used
/// throughout the handlers this crate's host framework exposes.
impl From<SessionError> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: SessionError) -> Self {
        let status = err.status_code();
        (
            status,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
    }
}
