//! Cookie/Header Writer
//!
//! Uniform cookie attributes and the four named cookie setters this crate
//! writes, built on `axum_extra::extract::cookie::Cookie`. Every setter
//! funnels through a single parameterized `build_cookie` helper so the
//! attributes (path, `SameSite`, domain, secure) stay consistent across all
//! four cookies.

use axum::http::{header::SET_COOKIE, HeaderMap, HeaderName, HeaderValue};
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Utc};
use time::{Duration as TimeDuration, OffsetDateTime};

use crate::config::{host_is_localhost, SessionConfig};

const SESSION_COOKIE_BASE: &str = "sSessionToken";
const ANONYMOUS_SESSION_COOKIE_BASE: &str = "sAnonymousSessionToken";
const CSRF_COOKIE_BASE: &str = "sAntiCsrfToken";
const PUBLIC_DATA_COOKIE_BASE: &str = "sPublicDataToken";
const ID_REFRESH_COOKIE_BASE: &str = "sIdRefreshToken";

/// Request header carrying the double-submit anti-CSRF token.
pub const ANTI_CSRF_REQUEST_HEADER: &str = "anti-csrf-token";

/// Response signalling headers clients can watch for instead of parsing
/// cookies. See DESIGN.md for why `csrf-error` was chosen as the name over
/// `anti-csrf-token-error`.
pub const SESSION_CREATED_HEADER: &str = "session-created";
pub const PUBLIC_DATA_TOKEN_HEADER: &str = "public-data-token";
pub const CSRF_ERROR_HEADER: &str = "csrf-error";

pub fn session_cookie_name(config: &SessionConfig) -> String {
    format!("{}{}", config.cookie_prefix, SESSION_COOKIE_BASE)
}

pub fn anonymous_session_cookie_name(config: &SessionConfig) -> String {
    format!("{}{}", config.cookie_prefix, ANONYMOUS_SESSION_COOKIE_BASE)
}

pub fn csrf_cookie_name(config: &SessionConfig) -> String {
    format!("{}{}", config.cookie_prefix, CSRF_COOKIE_BASE)
}

pub fn public_data_cookie_name(config: &SessionConfig) -> String {
    format!("{}{}", config.cookie_prefix, PUBLIC_DATA_COOKIE_BASE)
}

/// Recognized but unused: the "advanced" method's refresh-token cookie name.
pub fn id_refresh_cookie_name(config: &SessionConfig) -> String {
    format!("{}{}", config.cookie_prefix, ID_REFRESH_COOKIE_BASE)
}

/// A cookie is secure only when the config asks for it and the request
/// isn't hitting a local development host.
pub fn effective_secure(config: &SessionConfig, request_headers: &HeaderMap) -> bool {
    let host = request_headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok());
    config.secure_cookies && !host_is_localhost(host)
}

fn build_cookie(
    config: &SessionConfig,
    secure: bool,
    name: String,
    value: String,
    expires: OffsetDateTime,
    max_age: TimeDuration,
) -> Cookie<'static> {
    let mut builder = Cookie::build((name, value))
        .path("/")
        .same_site(config.same_site)
        .expires(expires)
        .max_age(max_age)
        .secure(secure);

    if let Some(domain) = config.domain.clone() {
        builder = builder.domain(domain);
    }

    builder.build()
}

fn append_set_cookie(headers: &mut HeaderMap, cookie: Cookie<'static>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => headers.append(SET_COOKIE, value),
        Err(_) => tracing::error!(cookie = %cookie.name(), "failed to serialize cookie"),
    }
}

/// Removes every existing `Set-Cookie` entry named `name` from `headers`,
/// guaranteeing the setter that follows is the only value present. Used by
/// the last three of the four setters.
fn remove_existing(headers: &mut HeaderMap, name: &str) {
    let existing: Vec<HeaderValue> = headers.get_all(SET_COOKIE).iter().cloned().collect();
    headers.remove(SET_COOKIE);
    let prefix = format!("{name}=");
    for value in existing {
        let keep = value
            .to_str()
            .ok()
            .map(|s| !s.trim_start().starts_with(&prefix))
            .unwrap_or(true);
        if keep {
            headers.append(SET_COOKIE, value);
        }
    }
}

fn to_offset(dt: DateTime<Utc>) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(dt.timestamp()).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

fn max_age_until(expires: DateTime<Utc>) -> TimeDuration {
    let seconds = (expires - Utc::now()).num_seconds().max(0);
    TimeDuration::seconds(seconds)
}

/// Sets the authenticated session-token cookie. Does not clear any prior
/// value first (only the anonymous/CSRF/public-data setters do).
pub fn set_session_cookie(
    headers: &mut HeaderMap,
    config: &SessionConfig,
    secure: bool,
    token: &str,
    expires_at: DateTime<Utc>,
) {
    let cookie = build_cookie(
        config,
        secure,
        session_cookie_name(config),
        token.to_string(),
        to_offset(expires_at),
        max_age_until(expires_at),
    );
    append_set_cookie(headers, cookie);
}

pub fn set_anonymous_session_cookie(
    headers: &mut HeaderMap,
    config: &SessionConfig,
    secure: bool,
    token: &str,
    expires_at: DateTime<Utc>,
) {
    let name = anonymous_session_cookie_name(config);
    remove_existing(headers, &name);
    let cookie = build_cookie(
        config,
        secure,
        name,
        token.to_string(),
        to_offset(expires_at),
        max_age_until(expires_at),
    );
    append_set_cookie(headers, cookie);
}

pub fn set_csrf_cookie(
    headers: &mut HeaderMap,
    config: &SessionConfig,
    secure: bool,
    token: &str,
    expires_at: DateTime<Utc>,
) {
    let name = csrf_cookie_name(config);
    remove_existing(headers, &name);
    let cookie = build_cookie(
        config,
        secure,
        name,
        token.to_string(),
        to_offset(expires_at),
        max_age_until(expires_at),
    );
    append_set_cookie(headers, cookie);
}

/// Sets the public-data cookie and the `public-data-token: updated`
/// signalling header.
pub fn set_public_data_cookie(
    headers: &mut HeaderMap,
    config: &SessionConfig,
    secure: bool,
    public_data_token: &str,
    expires_at: DateTime<Utc>,
) {
    let name = public_data_cookie_name(config);
    remove_existing(headers, &name);
    let cookie = build_cookie(
        config,
        secure,
        name,
        public_data_token.to_string(),
        to_offset(expires_at),
        max_age_until(expires_at),
    );
    append_set_cookie(headers, cookie);
    headers.insert(
        HeaderName::from_static(PUBLIC_DATA_TOKEN_HEADER),
        HeaderValue::from_static("updated"),
    );
}

fn clear(headers: &mut HeaderMap, config: &SessionConfig, secure: bool, name: String) {
    remove_existing(headers, &name);
    let cookie = build_cookie(
        config,
        secure,
        name,
        String::new(),
        OffsetDateTime::UNIX_EPOCH,
        TimeDuration::seconds(0),
    );
    append_set_cookie(headers, cookie);
}

pub fn clear_session_cookie(headers: &mut HeaderMap, config: &SessionConfig, secure: bool) {
    clear(headers, config, secure, session_cookie_name(config));
}

pub fn clear_anonymous_session_cookie(headers: &mut HeaderMap, config: &SessionConfig, secure: bool) {
    clear(headers, config, secure, anonymous_session_cookie_name(config));
}

pub fn clear_csrf_cookie(headers: &mut HeaderMap, config: &SessionConfig, secure: bool) {
    clear(headers, config, secure, csrf_cookie_name(config));
}

pub fn clear_public_data_cookie(headers: &mut HeaderMap, config: &SessionConfig, secure: bool) {
    clear(headers, config, secure, public_data_cookie_name(config));
}

pub fn set_session_created_header(headers: &mut HeaderMap) {
    headers.insert(
        HeaderName::from_static(SESSION_CREATED_HEADER),
        HeaderValue::from_static("true"),
    );
}

pub fn set_csrf_error_header(headers: &mut HeaderMap) {
    headers.insert(
        HeaderName::from_static(CSRF_ERROR_HEADER),
        HeaderValue::from_static("true"),
    );
}

/// Reads `name=value` cookie pairs out of the request's `Cookie` header.
pub fn read_cookie<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let pair = pair.trim();
        if let Some((k, v)) = pair.split_once('=') {
            if k == name {
                return Some(v);
            }
        }
    }
    None
}

/// Reads the `anti-csrf-token` request header.
pub fn read_anti_csrf_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(HeaderName::from_static(ANTI_CSRF_REQUEST_HEADER))
        .and_then(|v| v.to_str().ok())
}
