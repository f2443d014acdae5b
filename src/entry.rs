//! Entry Point
//!
//! Rust has no response-object bag-of-state to memoize onto, so per-request
//! memoization is modeled explicitly: the host inserts a [`SessionCache`]
//! into the request's extensions once (for example in a middleware layer,
//! the same way auth middleware typically inserts parsed claims into
//! `req.extensions_mut()`), and every handler that needs the session calls
//! `get_session` against that same cache.

use std::sync::Arc;

use axum::http::{HeaderMap, Method};
use tokio::sync::OnceCell;

use crate::authorizer::Authorizer;
use crate::config::SessionConfig;
use crate::context::SessionContext;
use crate::error::SessionError;
use crate::factory::{self, NewSessionRequest};
use crate::resolver;
use crate::store::SessionStore;

/// Per-request memoization slot. One instance lives in the request's
/// extensions; the first `get_session` call resolves and stores the
/// context, subsequent calls return the same one untouched. The context is
/// not required to be safe for concurrent use by multiple tasks within one
/// request, so `OnceCell` gives us at-most-one-resolve without a lock held
/// across awaits.
#[derive(Default)]
pub struct SessionCache {
    inner: OnceCell<()>,
    context: std::sync::Mutex<Option<SessionContext>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resolves (or returns the memoized) session context for this request.
///
/// `request_headers` is the read view of the incoming request's headers.
/// Returns a mutable-reference-free snapshot is not possible since mutating
/// operations (`create`, `revoke`, ...) require `&mut SessionContext`; call
/// this once per request via the cache, then clone the `Arc`-backed handles
/// held internally for as long as the request needs them. Call
/// [`SessionContext::take_headers`] before the response is sent to flush
/// any cookie/header writes.
pub async fn get_session(
    cache: &SessionCache,
    config: Arc<SessionConfig>,
    store: Arc<dyn SessionStore>,
    authorizer: Arc<dyn Authorizer>,
    request_headers: &HeaderMap,
    method: &Method,
) -> Result<(), SessionError> {
    cache
        .inner
        .get_or_try_init(|| async {
            let mut out_headers = HeaderMap::new();
            let secure = crate::cookie::effective_secure(&config, request_headers);

            let resolved = resolver::resolve(
                &config,
                store.as_ref(),
                request_headers,
                &mut out_headers,
                method,
            )
            .await?;

            let kernel = match resolved {
                Some(kernel) => kernel,
                None => {
                    factory::create_new_session(
                        &config,
                        store.as_ref(),
                        &mut out_headers,
                        secure,
                        NewSessionRequest {
                            public_data: None,
                            private_data: None,
                            previous_kernel: None,
                        },
                    )
                    .await?
                }
            };

            let context = SessionContext::new(config, store, authorizer, secure, kernel, out_headers);
            *cache.context.lock().unwrap_or_else(|e| e.into_inner()) = Some(context);
            Ok::<(), SessionError>(())
        })
        .await
        .map(|_| ())
}

/// Takes the memoized context out of the cache so the caller can mutate it
/// and eventually drain its headers. Must be called after [`get_session`]
/// has populated the cache; callers that need the context again within the
/// same request are responsible for putting it back with
/// [`SessionCache::put_back`].
impl SessionCache {
    pub fn take(&self) -> Option<SessionContext> {
        self.context.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn put_back(&self, context: SessionContext) {
        *self.context.lock().unwrap_or_else(|e| e.into_inner()) = Some(context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorizer::DenyAll;
    use crate::store::InMemorySessionStore;
    use axum::http::header::SET_COOKIE;

    fn init_secret() {
        let _ = crate::secrets::test_secret_or_init(
            "unit-test-secret-value-at-least-32-bytes-long!!",
        );
    }

    #[tokio::test]
    async fn cold_start_mints_anonymous_with_four_cookies() {
        init_secret();
        let cache = SessionCache::new();
        let config = Arc::new(SessionConfig::default());
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let authorizer: Arc<dyn Authorizer> = Arc::new(DenyAll);
        let req = HeaderMap::new();

        get_session(&cache, config, store, authorizer, &req, &Method::GET)
            .await
            .unwrap();

        let mut ctx = cache.take().unwrap();
        assert_eq!(ctx.user_id(), None);
        let headers = ctx.take_headers();
        assert_eq!(headers.get_all(SET_COOKIE).iter().count(), 4);
        assert!(headers.get(crate::cookie::SESSION_CREATED_HEADER).is_some());
    }

    #[tokio::test]
    async fn memoization_resolves_only_once() {
        init_secret();
        let cache = SessionCache::new();
        let config = Arc::new(SessionConfig::default());
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let authorizer: Arc<dyn Authorizer> = Arc::new(DenyAll);
        let req = HeaderMap::new();

        get_session(&cache, config.clone(), store.clone(), authorizer.clone(), &req, &Method::GET)
            .await
            .unwrap();
        let first_handle = cache.take().unwrap().handle().to_string();
        cache.put_back(
            SessionContext::new(
                config.clone(),
                store.clone(),
                authorizer.clone(),
                true,
                crate::models::SessionKernel::Anonymous {
                    handle: first_handle.clone(),
                    public_data: crate::models::PublicData::anonymous(),
                    jwt_payload: crate::models::AnonymousSessionPayload {
                        is_anonymous: true,
                        handle: first_handle.clone(),
                        public_data: crate::models::PublicData::anonymous(),
                        anti_csrf_token: "x".into(),
                    },
                    anti_csrf_token: "x".into(),
                    anonymous_session_token: "tok".into(),
                },
                HeaderMap::new(),
            ),
        );

        // A second get_session call against the same cache is a no-op: the
        // OnceCell is already populated, so the handle is unchanged.
        get_session(&cache, config, store, authorizer, &req, &Method::GET)
            .await
            .unwrap();
        let second_handle = cache.take().unwrap().handle().to_string();
        assert_eq!(first_handle, second_handle);
    }
}
