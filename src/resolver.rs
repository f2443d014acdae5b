//! Kernel Resolver
//!
//! Implements the branch logic that turns request cookies/headers into a
//! [`SessionKernel`]: reads cookies and the anti-CSRF header, validates, and
//! fails closed on CSRF, across the three credential branches this crate
//! distinguishes.

use axum::http::{HeaderMap, Method};
use chrono::Utc;

use crate::config::SessionConfig;
use crate::cookie;
use crate::error::SessionError;
use crate::factory;
use crate::models::SessionKernel;
use crate::store::SessionStore;
use crate::token;

fn csrf_required(method: &Method) -> bool {
    !matches!(method, &Method::GET | &Method::OPTIONS | &Method::HEAD)
        && !crate::config::csrf_protection_disabled()
}

fn check_csrf(
    out_headers: &mut HeaderMap,
    required: bool,
    presented: Option<&str>,
    expected: &str,
) -> Result<(), SessionError> {
    if !required {
        return Ok(());
    }
    match presented {
        Some(presented_token) if token::constant_time_eq(presented_token, expected) => Ok(()),
        Some(_) => {
            tracing::warn!("anti-csrf-token header present but mismatched");
            cookie::set_csrf_error_header(out_headers);
            Err(SessionError::CsrfTokenMismatch)
        }
        None => {
            tracing::warn!("anti-csrf-token header missing on state-changing request");
            cookie::set_csrf_error_header(out_headers);
            Err(SessionError::CsrfTokenMismatch)
        }
    }
}

/// Resolves the session kernel for one request.
///
/// `request_headers` is the read view (request `Cookie`/`anti-csrf-token`
/// headers); `out_headers` is the outgoing, mutable header set that cookie
/// rewrites (rolling refresh) are appended to. Returns `Ok(None)` when no
/// valid credential is present, at which point the caller mints a fresh
/// anonymous session. CSRF failures propagate rather than degrading.
pub async fn resolve(
    config: &SessionConfig,
    store: &dyn SessionStore,
    request_headers: &HeaderMap,
    out_headers: &mut HeaderMap,
    method: &Method,
) -> Result<Option<SessionKernel>, SessionError> {
    let session_token = cookie::read_cookie(request_headers, &cookie::session_cookie_name(config));
    let anonymous_session_token =
        cookie::read_cookie(request_headers, &cookie::anonymous_session_cookie_name(config));
    let id_refresh_token =
        cookie::read_cookie(request_headers, &cookie::id_refresh_cookie_name(config));
    let anti_csrf_header = cookie::read_anti_csrf_header(request_headers);

    let required = csrf_required(method);
    let secure = cookie::effective_secure(config, request_headers);

    // Branch A: essential-method authenticated session token.
    if let Some(session_token) = session_token {
        let parts = match token::parse_session_token(session_token) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::debug!(error = %e, "session token malformed, degrading to no-credential");
                return Ok(None);
            }
        };
        if parts.version != token::TOKEN_VERSION {
            tracing::debug!(version = %parts.version, "unknown session token version");
            return Ok(None);
        }

        let record = match store.get_session(&parts.handle).await? {
            Some(record) => record,
            None => {
                tracing::debug!(handle = %parts.handle, "no session record for handle");
                return Ok(None);
            }
        };

        let expected_hash = record.hashed_session_token.as_deref().unwrap_or("");
        if !token::constant_time_eq(&token::sha256_hex(session_token), expected_hash) {
            tracing::debug!("session token hash mismatch");
            return Ok(None);
        }

        let now = Utc::now();
        if record.is_expired(now) {
            tracing::debug!(handle = %parts.handle, "session record expired");
            return Ok(None);
        }

        check_csrf(out_headers, required, anti_csrf_header, &record.anti_csrf_token)?;

        let stored_public_data = record.public_data();

        if method != Method::GET {
            let public_data_changed = token::sha256_hex(&stored_public_data.to_json_string())
                != parts.hashed_public_data;
            let quarter_elapsed = record
                .expires_at
                .map(|exp| {
                    let remaining = exp - now;
                    remaining < chrono::Duration::seconds(
                        (config.session_expiry_minutes as f64 * 0.75 * 60.0) as i64,
                    )
                })
                .unwrap_or(false);

            if public_data_changed || quarter_elapsed {
                let kernel = SessionKernel::Authenticated {
                    handle: parts.handle.clone(),
                    public_data: stored_public_data.clone(),
                    anti_csrf_token: record.anti_csrf_token.clone(),
                    session_token: session_token.to_string(),
                };
                factory::refresh_session(
                    config,
                    store,
                    out_headers,
                    secure,
                    &kernel,
                    public_data_changed,
                )
                .await?;
            }
        }

        return Ok(Some(SessionKernel::Authenticated {
            handle: parts.handle,
            public_data: stored_public_data,
            anti_csrf_token: record.anti_csrf_token,
            session_token: session_token.to_string(),
        }));
    }

    // Branch B: "advanced" method refresh-token cookie. Recognized, unimplemented.
    if id_refresh_token.is_some() {
        tracing::debug!("idRefreshToken present; advanced method not implemented");
        return Ok(None);
    }

    // Branch C: anonymous JWT.
    if let Some(anonymous_session_token) = anonymous_session_token {
        let payload = match token::parse_anonymous_jwt(anonymous_session_token) {
            Some(payload) => payload,
            None => return Ok(None),
        };

        check_csrf(out_headers, required, anti_csrf_header, &payload.anti_csrf_token)?;

        let anti_csrf_token = payload.anti_csrf_token.clone();
        return Ok(Some(SessionKernel::Anonymous {
            handle: payload.handle.clone(),
            public_data: payload.public_data.clone(),
            jwt_payload: payload,
            anti_csrf_token,
            anonymous_session_token: anonymous_session_token.to_string(),
        }));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PublicData, SessionRecord};
    use crate::store::InMemorySessionStore;
    use axum::http::HeaderValue;

    fn config() -> SessionConfig {
        SessionConfig {
            session_expiry_minutes: 60,
            ..SessionConfig::default()
        }
    }

    fn cookie_header(pairs: &[(String, String)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let joined = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");
        headers.insert(axum::http::header::COOKIE, HeaderValue::from_str(&joined).unwrap());
        headers
    }

    #[tokio::test]
    async fn no_credential_resolves_to_none() {
        let cfg = config();
        let store = InMemorySessionStore::new();
        let req = HeaderMap::new();
        let mut out = HeaderMap::new();
        let result = resolve(&cfg, &store, &req, &mut out, &Method::GET).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn valid_session_token_resolves_authenticated_kernel() {
        let cfg = config();
        let store = InMemorySessionStore::new();
        let pd = PublicData::authenticated(serde_json::json!(1), Default::default()).unwrap();
        let token_str = token::new_session_token("h1-opaque-token-simple", &pd);

        store
            .create_session(SessionRecord {
                handle: "h1-opaque-token-simple".into(),
                user_id: Some("1".into()),
                expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
                hashed_session_token: Some(token::sha256_hex(&token_str)),
                anti_csrf_token: "csrf-abc".into(),
                public_data: pd.to_json_string(),
                private_data: "{}".into(),
            })
            .await
            .unwrap();

        let req = cookie_header(&[(
            cookie::session_cookie_name(&cfg),
            token_str.clone(),
        )]);
        let mut out = HeaderMap::new();
        let kernel = resolve(&cfg, &store, &req, &mut out, &Method::GET)
            .await
            .unwrap()
            .unwrap();
        assert!(kernel.is_authenticated());
        assert_eq!(kernel.handle(), "h1-opaque-token-simple");
    }

    #[tokio::test]
    async fn csrf_mismatch_on_post_propagates_error() {
        let cfg = config();
        let store = InMemorySessionStore::new();
        let pd = PublicData::authenticated(serde_json::json!(1), Default::default()).unwrap();
        let token_str = token::new_session_token("h2-opaque-token-simple", &pd);

        store
            .create_session(SessionRecord {
                handle: "h2-opaque-token-simple".into(),
                user_id: Some("1".into()),
                expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
                hashed_session_token: Some(token::sha256_hex(&token_str)),
                anti_csrf_token: "csrf-correct".into(),
                public_data: pd.to_json_string(),
                private_data: "{}".into(),
            })
            .await
            .unwrap();

        let mut req = cookie_header(&[(cookie::session_cookie_name(&cfg), token_str)]);
        req.insert(
            "anti-csrf-token",
            HeaderValue::from_static("wrong"),
        );
        let mut out = HeaderMap::new();
        let err = resolve(&cfg, &store, &req, &mut out, &Method::POST)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::CsrfTokenMismatch));
        assert!(out.get(cookie::CSRF_ERROR_HEADER).is_some());
    }

    #[tokio::test]
    async fn tampered_session_token_degrades_to_none() {
        let cfg = config();
        let store = InMemorySessionStore::new();
        let pd = PublicData::anonymous();
        let mut token_str = token::new_session_token("h3-opaque-token-simple", &pd);
        token_str.push('z');

        let req = cookie_header(&[(cookie::session_cookie_name(&cfg), token_str)]);
        let mut out = HeaderMap::new();
        let result = resolve(&cfg, &store, &req, &mut out, &Method::GET).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn expired_record_degrades_to_none() {
        let cfg = config();
        let store = InMemorySessionStore::new();
        let pd = PublicData::anonymous();
        let token_str = token::new_session_token("h4-opaque-token-simple", &pd);
        store
            .create_session(SessionRecord {
                handle: "h4-opaque-token-simple".into(),
                user_id: None,
                expires_at: Some(Utc::now() - chrono::Duration::minutes(1)),
                hashed_session_token: Some(token::sha256_hex(&token_str)),
                anti_csrf_token: "csrf".into(),
                public_data: pd.to_json_string(),
                private_data: "{}".into(),
            })
            .await
            .unwrap();

        let req = cookie_header(&[(cookie::session_cookie_name(&cfg), token_str)]);
        let mut out = HeaderMap::new();
        let result = resolve(&cfg, &store, &req, &mut out, &Method::GET).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn rolling_refresh_advances_expiry_past_quarter_threshold() {
        let cfg = config();
        let store = InMemorySessionStore::new();
        let pd = PublicData::authenticated(serde_json::json!(7), Default::default()).unwrap();
        let token_str = token::new_session_token("h5-opaque-token-simple", &pd);

        store
            .create_session(SessionRecord {
                handle: "h5-opaque-token-simple".into(),
                user_id: Some("7".into()),
                expires_at: Some(Utc::now() + chrono::Duration::minutes(5)),
                hashed_session_token: Some(token::sha256_hex(&token_str)),
                anti_csrf_token: "csrf-7".into(),
                public_data: pd.to_json_string(),
                private_data: "{}".into(),
            })
            .await
            .unwrap();

        let mut req = cookie_header(&[(cookie::session_cookie_name(&cfg), token_str)]);
        req.insert("anti-csrf-token", HeaderValue::from_static("csrf-7"));
        let mut out = HeaderMap::new();
        let kernel = resolve(&cfg, &store, &req, &mut out, &Method::PUT)
            .await
            .unwrap();
        assert!(kernel.is_some());

        let record = store
            .get_session("h5-opaque-token-simple")
            .await
            .unwrap()
            .unwrap();
        let remaining = record.expires_at.unwrap() - Utc::now();
        assert!(remaining > chrono::Duration::minutes(50));
    }
}
