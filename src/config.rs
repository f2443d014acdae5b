//! Configuration
//!
//! The process-wide `sessionConfig` and cookie prefix are modeled as an
//! injected value constructed once at startup and threaded through the
//! request pipeline, not as module-global mutable state. Only the raw
//! secret bytes (`SESSION_SECRET_KEY`) keep an `OnceLock`-backed static, in
//! `crate::secrets`, since they are genuinely process-wide and read-only
//! after initialization.

use axum_extra::extract::cookie::SameSite;
use std::env;

/// Which session method is in effect. The "advanced" (rotating-refresh)
/// method is recognized but unimplemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMethod {
    Essential,
    Advanced,
}

impl SessionMethod {
    pub fn parse(value: &str) -> Result<Self, crate::error::SessionError> {
        match value {
            "essential" => Ok(SessionMethod::Essential),
            "advanced" => Ok(SessionMethod::Advanced),
            other => Err(crate::error::SessionError::InvalidConfig(format!(
                "unknown session method '{other}'"
            ))),
        }
    }
}

/// Injected, read-only-after-construction configuration for the session
/// core. One instance is built at startup and shared (typically behind an
/// `Arc`) across every request.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rolling expiry window for authenticated sessions, in minutes.
    pub session_expiry_minutes: i64,
    /// Expiry window for anonymous sessions, in minutes.
    pub anon_session_expiry_minutes: i64,
    /// `essential` (implemented) or `advanced` (recognized, not implemented).
    pub method: SessionMethod,
    /// Public-data keys synchronized across every session owned by a user
    /// whenever one of them is set.
    pub public_data_keys_to_sync_across_sessions: Vec<String>,
    /// Whether cookies carry the `Secure` attribute (see
    /// [`crate::cookie::effective_secure`] for the localhost override).
    pub secure_cookies: bool,
    /// `SameSite` attribute applied to every cookie this crate writes.
    pub same_site: SameSite,
    /// Optional cookie `Domain` attribute.
    pub domain: Option<String>,
    /// Process-wide prefix prepended to every cookie name this crate writes.
    pub cookie_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            session_expiry_minutes: 30 * 24 * 60,
            anon_session_expiry_minutes: 30 * 24 * 60,
            method: SessionMethod::Essential,
            public_data_keys_to_sync_across_sessions: Vec::new(),
            secure_cookies: true,
            same_site: SameSite::Lax,
            domain: None,
            cookie_prefix: String::new(),
        }
    }
}

/// Returns `true` when `NODE_ENV=production`. Strict secret checks in
/// [`crate::secrets`] only apply in this mode.
pub fn is_production() -> bool {
    env::var("NODE_ENV")
        .map(|v| v == "production")
        .unwrap_or(false)
}

/// Returns `true` if `DANGEROUSLY_DISABLE_CSRF_PROTECTION` is set to any
/// truthy value.
pub fn csrf_protection_disabled() -> bool {
    env::var("DANGEROUSLY_DISABLE_CSRF_PROTECTION")
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Returns `true` if the given `Host` header value names a local development
/// host. Used by `secure = config.secureCookies AND NOT
/// host-is-localhost(headers)`.
pub fn host_is_localhost(host: Option<&str>) -> bool {
    match host {
        Some(h) => {
            let host_only = h.split(':').next().unwrap_or(h);
            host_only == "localhost" || host_only == "127.0.0.1" || host_only == "::1"
        }
        None => false,
    }
}
