//! Secret Registry
//!
//! A process-wide secret, validated once at startup and stored in a
//! `OnceLock`, never mutated after. This crate has exactly one secret
//! (`SESSION_SECRET_KEY`) used for both the opaque-token hashing namespace
//! and the anonymous JWT's HS256 signature.

use std::env;
use std::sync::OnceLock;

use crate::config::is_production;
use crate::error::SessionError;

/// Minimum secret length required in production.
const MIN_SECRET_LEN: usize = 32;

/// Fixed development default, used only when `NODE_ENV != production`.
const DEV_DEFAULT_SECRET: &str = "blitzjs-development-secret-do-not-use-in-prod!!";

static SESSION_SECRET: OnceLock<String> = OnceLock::new();

/// Initializes the session secret from the environment.
///
/// # Errors
/// - In production: `SESSION_SECRET_KEY` missing or shorter than 32 bytes.
/// - In production: `SECRET_SESSION_KEY` (legacy name) set instead of
///   `SESSION_SECRET_KEY`, which fails with a clear rename error.
/// - Already initialized.
pub fn init_secret() -> Result<(), SessionError> {
    let secret = resolve_secret()?;
    SESSION_SECRET
        .set(secret)
        .map_err(|_| SessionError::InvalidConfig("session secret already initialized".into()))
}

fn resolve_secret() -> Result<String, SessionError> {
    let production = is_production();
    let current = env::var("SESSION_SECRET_KEY").ok();
    let legacy = env::var("SECRET_SESSION_KEY").ok();

    if let Some(secret) = current {
        if production && secret.len() < MIN_SECRET_LEN {
            return Err(SessionError::InvalidConfig(format!(
                "SESSION_SECRET_KEY must be at least {MIN_SECRET_LEN} bytes in production"
            )));
        }
        return Ok(secret);
    }

    if production {
        if legacy.is_some() {
            return Err(SessionError::InvalidConfig(
                "SECRET_SESSION_KEY has been renamed to SESSION_SECRET_KEY; set the new variable"
                    .into(),
            ));
        }
        return Err(SessionError::InvalidConfig(
            "SESSION_SECRET_KEY is required in production".into(),
        ));
    }

    Ok(legacy.unwrap_or_else(|| DEV_DEFAULT_SECRET.to_string()))
}

/// Retrieves the initialized secret bytes.
///
/// # Panics
/// Panics if [`init_secret`] has not been called yet.
pub fn secret_bytes() -> &'static [u8] {
    SESSION_SECRET
        .get()
        .expect("session secret not initialized; call secrets::init_secret() first")
        .as_bytes()
}

/// Test-only escape hatch: some integration tests need a fresh secret value
/// without fighting the process-wide `OnceLock`. Not part of the public API.
#[cfg(test)]
pub(crate) fn test_secret_or_init(value: &str) -> &'static [u8] {
    let _ = SESSION_SECRET.set(value.to_string());
    secret_bytes()
}
