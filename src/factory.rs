//! Kernel Factory & Refresh
//!
//! Mints fresh kernels, performs anonymous-to-authenticated promotion, and
//! handles rolling-expiry refresh and revocation. The shape is "mint
//! credential, write cookies, touch the store, set a signalling header"
//! across both the anonymous and authenticated kernel variants.

use axum::http::HeaderMap;
use chrono::Utc;
use serde_json::Map;

use crate::config::{SessionConfig, SessionMethod};
use crate::cookie;
use crate::error::SessionError;
use crate::models::{
    AnonymousSessionPayload, HandleKind, PrivateData, PublicData, SessionKernel, SessionPatch,
    SessionRecord,
};
use crate::store::SessionStore;
use crate::token;

/// Input public/private data for [`create_new_session`]. `None` for
/// `public_data` mints an anonymous kernel; `Some` mints (or promotes to) an
/// authenticated one.
pub struct NewSessionRequest {
    pub public_data: Option<PublicData>,
    pub private_data: Option<PrivateData>,
    /// The kernel being superseded, if any. Drives anonymous-to-authenticated
    /// promotion carry-over.
    pub previous_kernel: Option<SessionKernel>,
}

/// Mints a new anonymous or authenticated kernel, writing the relevant
/// cookies/headers to `out_headers` and (for the authenticated branch)
/// persisting a record via `store`.
pub async fn create_new_session(
    config: &SessionConfig,
    store: &dyn SessionStore,
    out_headers: &mut HeaderMap,
    secure: bool,
    request: NewSessionRequest,
) -> Result<SessionKernel, SessionError> {
    let NewSessionRequest {
        public_data,
        private_data,
        previous_kernel,
    } = request;

    match public_data {
        None => create_anonymous(config, out_headers, secure).await,
        Some(public_data) => match config.method {
            SessionMethod::Essential => {
                create_authenticated(
                    config,
                    store,
                    out_headers,
                    secure,
                    public_data,
                    private_data,
                    previous_kernel,
                )
                .await
            }
            SessionMethod::Advanced => Err(SessionError::NotImplemented(
                "advanced session method is not implemented".into(),
            )),
        },
    }
}

async fn create_anonymous(
    config: &SessionConfig,
    out_headers: &mut HeaderMap,
    secure: bool,
) -> Result<SessionKernel, SessionError> {
    let anti_csrf_token = token::new_random_token(32);
    let handle = format!(
        "{}-{}",
        token::new_random_token(32),
        HandleKind::AnonymousJwt.suffix()
    );
    let public_data = PublicData::anonymous();
    let payload = AnonymousSessionPayload {
        is_anonymous: true,
        handle: handle.clone(),
        public_data: public_data.clone(),
        anti_csrf_token: anti_csrf_token.clone(),
    };

    let jwt = token::new_anonymous_jwt(payload.clone(), config.anon_session_expiry_minutes)?;
    let public_data_token = token::new_public_data_token(&public_data);
    let expires_at = Utc::now() + chrono::Duration::minutes(config.anon_session_expiry_minutes);

    cookie::set_anonymous_session_cookie(out_headers, config, secure, &jwt, expires_at);
    cookie::set_csrf_cookie(out_headers, config, secure, &anti_csrf_token, expires_at);
    cookie::set_public_data_cookie(out_headers, config, secure, &public_data_token, expires_at);
    cookie::clear_session_cookie(out_headers, config, secure);
    cookie::set_session_created_header(out_headers);

    Ok(SessionKernel::Anonymous {
        handle,
        public_data,
        jwt_payload: payload,
        anti_csrf_token,
        anonymous_session_token: jwt,
    })
}

async fn create_authenticated(
    config: &SessionConfig,
    store: &dyn SessionStore,
    out_headers: &mut HeaderMap,
    secure: bool,
    new_public_data: PublicData,
    private_data: Option<PrivateData>,
    previous_kernel: Option<SessionKernel>,
) -> Result<SessionKernel, SessionError> {
    if new_public_data.user_id().is_none() {
        return Err(SessionError::InvalidConfig(
            "publicData.userId is required to create an authenticated session".into(),
        ));
    }

    let mut merged_public_data = new_public_data.clone();
    let mut merged_private_data = private_data.unwrap_or_default();

    if let Some(SessionKernel::Anonymous {
        handle: old_handle,
        public_data: old_public_data,
        ..
    }) = &previous_kernel
    {
        let mut base = old_public_data.clone();
        base.merge_from(&merged_public_data.0);
        merged_public_data = base;
        merged_public_data.0.insert(
            "userId".to_string(),
            new_public_data.user_id().cloned().unwrap_or(serde_json::Value::Null),
        );

        if let Some(old_record) = store.get_session(old_handle).await? {
            let mut old_private = old_record.private_data();
            old_private.merge_from(&merged_private_data.0);
            merged_private_data = old_private;
            store.delete_session(old_handle).await.ok();
        }
    }

    let anti_csrf_token = token::new_random_token(32);
    let handle = format!(
        "{}-{}",
        token::new_random_token(32),
        HandleKind::OpaqueTokenSimple.suffix()
    );
    let session_token = token::new_session_token(&handle, &merged_public_data);
    let public_data_token = token::new_public_data_token(&merged_public_data);
    let expires_at = Utc::now() + chrono::Duration::minutes(config.session_expiry_minutes);

    let user_id = merged_public_data
        .user_id()
        .map(|v| v.to_string().trim_matches('"').to_string());

    store
        .create_session(SessionRecord {
            handle: handle.clone(),
            user_id,
            expires_at: Some(expires_at),
            hashed_session_token: Some(token::sha256_hex(&session_token)),
            anti_csrf_token: anti_csrf_token.clone(),
            public_data: merged_public_data.to_json_string(),
            private_data: merged_private_data.to_json_string(),
        })
        .await?;

    cookie::set_session_cookie(out_headers, config, secure, &session_token, expires_at);
    cookie::set_csrf_cookie(out_headers, config, secure, &anti_csrf_token, expires_at);
    cookie::set_public_data_cookie(out_headers, config, secure, &public_data_token, expires_at);
    cookie::clear_anonymous_session_cookie(out_headers, config, secure);
    cookie::set_session_created_header(out_headers);

    Ok(SessionKernel::Authenticated {
        handle,
        public_data: merged_public_data,
        anti_csrf_token,
        session_token,
    })
}

/// Renews `kernel`'s credential. Called from the resolver's rolling-refresh
/// decision and from [`crate::context`] when public data changes between
/// resolves. `hashedSessionToken` is never rotated here, so a leaked
/// authenticated session token remains valid until `expiresAt`.
///
/// Returns the freshly minted anonymous JWT when `kernel` is
/// `SessionKernel::Anonymous`, so callers can carry the real token forward
/// into their own copy of the kernel instead of guessing at it. Returns
/// `None` for the authenticated branch, which has no equivalent credential
/// to hand back (the session token itself is never rotated here).
pub async fn refresh_session(
    config: &SessionConfig,
    store: &dyn SessionStore,
    out_headers: &mut HeaderMap,
    secure: bool,
    kernel: &SessionKernel,
    public_data_changed: bool,
) -> Result<Option<String>, SessionError> {
    match kernel {
        SessionKernel::Anonymous {
            handle,
            public_data,
            anti_csrf_token,
            ..
        } => {
            let payload = AnonymousSessionPayload {
                is_anonymous: true,
                handle: handle.clone(),
                public_data: public_data.clone(),
                anti_csrf_token: anti_csrf_token.clone(),
            };
            // Long-lived: an anonymous session refreshed due to activity is
            // extended far past its original expiry.
            let thirty_years_minutes = 30 * 365 * 24 * 60;
            let jwt = token::new_anonymous_jwt(payload, thirty_years_minutes)?;
            let public_data_token = token::new_public_data_token(public_data);
            let expires_at = Utc::now() + chrono::Duration::minutes(thirty_years_minutes);

            cookie::set_anonymous_session_cookie(out_headers, config, secure, &jwt, expires_at);
            cookie::set_public_data_cookie(out_headers, config, secure, &public_data_token, expires_at);
            Ok(Some(jwt))
        }
        SessionKernel::Authenticated {
            handle, public_data, ..
        } => {
            let expires_at = Utc::now() + chrono::Duration::minutes(config.session_expiry_minutes);

            if public_data_changed {
                let public_data_token = token::new_public_data_token(public_data);
                cookie::set_public_data_cookie(out_headers, config, secure, &public_data_token, expires_at);
                store
                    .update_session(
                        handle,
                        SessionPatch {
                            expires_at: Some(expires_at),
                            public_data: Some(public_data.to_json_string()),
                            private_data: None,
                        },
                    )
                    .await?;
            } else {
                store
                    .update_session(
                        handle,
                        SessionPatch {
                            expires_at: Some(expires_at),
                            public_data: None,
                            private_data: None,
                        },
                    )
                    .await?;
            }
            Ok(None)
        }
    }
}

/// Deletes `handle`'s record, swallowing NotFound and any other store error,
/// and synthesizes a replacement anonymous session in its place,
/// synchronously, so concurrent requests never race to mint distinct
/// anonymous sessions after a logout.
pub async fn revoke_session(
    config: &SessionConfig,
    store: &dyn SessionStore,
    out_headers: &mut HeaderMap,
    secure: bool,
    handle: &str,
) -> Result<SessionKernel, SessionError> {
    if let Err(e) = store.delete_session(handle).await {
        tracing::debug!(handle = %handle, error = %e, "delete_session failed during revoke, ignoring");
    }
    create_anonymous(config, out_headers, secure).await
}

/// Revokes every session owned by `user_id`, swallowing per-handle errors,
/// and returns the handles that were targeted.
pub async fn revoke_all_sessions_for_user(
    store: &dyn SessionStore,
    user_id: &str,
) -> Result<Vec<String>, SessionError> {
    let records = store.get_sessions(user_id).await?;
    let handles: Vec<String> = records.into_iter().map(|r| r.handle).collect();
    for handle in &handles {
        if let Err(e) = store.delete_session(handle).await {
            tracing::debug!(handle = %handle, error = %e, "delete_session failed during revoke_all, ignoring");
        }
    }
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySessionStore;
    use axum::http::header::SET_COOKIE;

    fn config() -> SessionConfig {
        SessionConfig {
            session_expiry_minutes: 60,
            anon_session_expiry_minutes: 30,
            ..SessionConfig::default()
        }
    }

    fn init_secret() {
        let _ = crate::secrets::test_secret_or_init(
            "unit-test-secret-value-at-least-32-bytes-long!!",
        );
    }

    #[tokio::test]
    async fn create_anonymous_sets_expected_cookies() {
        init_secret();
        let cfg = config();
        let store = InMemorySessionStore::new();
        let mut out = HeaderMap::new();
        let kernel = create_new_session(
            &cfg,
            &store,
            &mut out,
            true,
            NewSessionRequest {
                public_data: None,
                private_data: None,
                previous_kernel: None,
            },
        )
        .await
        .unwrap();

        assert!(!kernel.is_authenticated());
        assert_eq!(out.get_all(SET_COOKIE).iter().count(), 4);
        assert!(out.get(cookie::SESSION_CREATED_HEADER).is_some());
    }

    #[tokio::test]
    async fn create_authenticated_requires_user_id() {
        let cfg = config();
        let store = InMemorySessionStore::new();
        let mut out = HeaderMap::new();
        let err = create_new_session(
            &cfg,
            &store,
            &mut out,
            true,
            NewSessionRequest {
                public_data: Some(PublicData(Map::new())),
                private_data: None,
                previous_kernel: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn promotion_carries_private_data_and_deletes_anonymous_record() {
        init_secret();
        let cfg = config();
        let store = InMemorySessionStore::new();
        let mut out = HeaderMap::new();

        let anon_kernel = create_new_session(
            &cfg,
            &store,
            &mut out,
            true,
            NewSessionRequest {
                public_data: None,
                private_data: None,
                previous_kernel: None,
            },
        )
        .await
        .unwrap();

        store
            .create_session(SessionRecord {
                handle: anon_kernel.handle().to_string(),
                user_id: None,
                expires_at: Some(Utc::now() + chrono::Duration::minutes(30)),
                hashed_session_token: None,
                anti_csrf_token: anon_kernel.anti_csrf_token().to_string(),
                public_data: anon_kernel.public_data().to_json_string(),
                private_data: PrivateData::from_json_str("{\"cart\":[1,2]}").to_json_string(),
            })
            .await
            .unwrap();

        let mut fields = Map::new();
        fields.insert("role".to_string(), serde_json::Value::String("user".into()));
        let new_public = PublicData::authenticated(serde_json::json!(42), fields).unwrap();

        let mut out2 = HeaderMap::new();
        let authenticated = create_new_session(
            &cfg,
            &store,
            &mut out2,
            true,
            NewSessionRequest {
                public_data: Some(new_public),
                private_data: Some(PrivateData::from_json_str("{\"lastLogin\":\"t\"}")),
                previous_kernel: Some(anon_kernel.clone()),
            },
        )
        .await
        .unwrap();

        assert!(authenticated.is_authenticated());
        assert!(store
            .get_session(anon_kernel.handle())
            .await
            .unwrap()
            .is_none());

        let record = store
            .get_session(authenticated.handle())
            .await
            .unwrap()
            .unwrap();
        let private = record.private_data();
        assert_eq!(private.0.get("cart"), Some(&serde_json::json!([1, 2])));
        assert_eq!(private.0.get("lastLogin"), Some(&serde_json::json!("t")));
    }

    #[tokio::test]
    async fn revoke_session_deletes_record_and_mints_anonymous() {
        init_secret();
        let cfg = config();
        let store = InMemorySessionStore::new();
        store
            .create_session(SessionRecord {
                handle: "h-opaque-token-simple".into(),
                user_id: Some("1".into()),
                expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
                hashed_session_token: Some("hash".into()),
                anti_csrf_token: "csrf".into(),
                public_data: "{}".into(),
                private_data: "{}".into(),
            })
            .await
            .unwrap();

        let mut out = HeaderMap::new();
        let kernel = revoke_session(&cfg, &store, &mut out, true, "h-opaque-token-simple")
            .await
            .unwrap();

        assert!(!kernel.is_authenticated());
        assert!(store
            .get_session("h-opaque-token-simple")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn revoke_all_deletes_every_handle_for_user() {
        let store = InMemorySessionStore::new();
        for h in ["h1", "h2", "h3"] {
            store
                .create_session(SessionRecord {
                    handle: h.into(),
                    user_id: Some("7".into()),
                    expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
                    hashed_session_token: None,
                    anti_csrf_token: "csrf".into(),
                    public_data: "{}".into(),
                    private_data: "{}".into(),
                })
                .await
                .unwrap();
        }

        let handles = revoke_all_sessions_for_user(&store, "7").await.unwrap();
        assert_eq!(handles.len(), 3);
        for h in handles {
            assert!(store.get_session(&h).await.unwrap().is_none());
        }
    }
}
