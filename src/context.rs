//! Session Context
//!
//! The façade handlers actually interact with. Wraps a [`SessionKernel`] plus
//! the collaborators (config, store, authorizer) needed to service its
//! mutating operations, and accumulates outgoing cookie/header writes in an
//! owned buffer that the host flushes onto the real response, the same way a
//! handler builds up a response via `CookieJar`/`HeaderMap` and returns it
//! rather than writing through a live connection.

use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::Utc;
use serde_json::{Map, Value};

use crate::authorizer::Authorizer;
use crate::config::SessionConfig;
use crate::cookie;
use crate::error::SessionError;
use crate::factory::{self, NewSessionRequest};
use crate::models::{PrivateData, PublicData, SessionKernel, SessionRecord};
use crate::store::SessionStore;
use crate::sync;

pub struct SessionContext {
    config: Arc<SessionConfig>,
    store: Arc<dyn SessionStore>,
    authorizer: Arc<dyn Authorizer>,
    secure: bool,
    kernel: SessionKernel,
    pending_headers: HeaderMap,
}

impl SessionContext {
    /// Constructs a context directly from a resolved kernel. Normally called
    /// only by [`crate::entry::get_session`]; exposed publicly so hosts and
    /// tests can build a context around a kernel assembled out-of-band (for
    /// example, a background job acting on behalf of a known session).
    pub fn new(
        config: Arc<SessionConfig>,
        store: Arc<dyn SessionStore>,
        authorizer: Arc<dyn Authorizer>,
        secure: bool,
        kernel: SessionKernel,
        pending_headers: HeaderMap,
    ) -> Self {
        Self {
            config,
            store,
            authorizer,
            secure,
            kernel,
            pending_headers,
        }
    }

    pub fn user_id(&self) -> Option<&Value> {
        self.kernel.user_id()
    }

    pub fn handle(&self) -> &str {
        self.kernel.handle()
    }

    pub fn public_data(&self) -> &PublicData {
        self.kernel.public_data()
    }

    /// Explicit accessor replacing the dynamically-typed host's projection
    /// of public-data keys onto the context's own surface.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.kernel.public_data().get(key)
    }

    pub fn is_authenticated(&self) -> bool {
        self.kernel.is_authenticated()
    }

    /// `false` if anonymous; else delegates to the configured authorizer.
    pub fn is_authorized(&self, args: &[Value]) -> bool {
        if !self.kernel.is_authenticated() {
            return false;
        }
        self.authorizer.is_authorized(self.kernel.public_data(), args)
    }

    pub fn authorize(&self, args: &[Value]) -> Result<(), SessionError> {
        if !self.kernel.is_authenticated() {
            return Err(SessionError::Authentication);
        }
        if !self.authorizer.is_authorized(self.kernel.public_data(), args) {
            return Err(SessionError::Authorization);
        }
        Ok(())
    }

    /// Drains the accumulated cookie/header writes for this request. The
    /// host MUST apply the returned headers to the outgoing response; they
    /// are the sole channel for session-state delivery.
    pub fn take_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.pending_headers)
    }

    /// Promotes to an authenticated session (or rotates identity if already
    /// authenticated), carrying forward private data from an anonymous
    /// predecessor.
    pub async fn create(
        &mut self,
        public_data: PublicData,
        private_data: Option<PrivateData>,
    ) -> Result<(), SessionError> {
        let previous = self.kernel.clone();
        let kernel = factory::create_new_session(
            &self.config,
            self.store.as_ref(),
            &mut self.pending_headers,
            self.secure,
            NewSessionRequest {
                public_data: Some(public_data),
                private_data,
                previous_kernel: Some(previous),
            },
        )
        .await?;
        self.kernel = kernel;
        Ok(())
    }

    /// Revokes the current session; an anonymous session takes its place.
    pub async fn revoke(&mut self) -> Result<(), SessionError> {
        let handle = self.kernel.handle().to_string();
        let kernel = factory::revoke_session(
            &self.config,
            self.store.as_ref(),
            &mut self.pending_headers,
            self.secure,
            &handle,
        )
        .await?;
        self.kernel = kernel;
        Ok(())
    }

    /// Revokes the current session then every other session for this user.
    pub async fn revoke_all(&mut self) -> Result<Vec<String>, SessionError> {
        let user_id = self.kernel.user_id().map(|v| v.to_string());
        self.revoke().await?;
        if let Some(user_id) = user_id {
            let user_id = user_id.trim_matches('"').to_string();
            return factory::revoke_all_sessions_for_user(self.store.as_ref(), &user_id).await;
        }
        Ok(Vec::new())
    }

    /// Merges `data` into current public data (`userId` silently dropped),
    /// syncs configured keys across the user's other sessions, persists, and
    /// refreshes the client-visible public-data cookie.
    pub async fn set_public_data(&mut self, mut data: Map<String, Value>) -> Result<(), SessionError> {
        data.remove("userId");

        let mut new_public_data = self.kernel.public_data().clone();
        new_public_data.merge_from(&data);
        new_public_data.validate()?;

        if let Some(user_id) = self.kernel.user_id() {
            let user_id = user_id.to_string().trim_matches('"').to_string();
            sync::sync_public_data_keys(
                self.store.as_ref(),
                &self.config,
                &user_id,
                &data,
                self.kernel.handle(),
            )
            .await?;
        }

        self.apply_public_data(new_public_data).await
    }

    async fn apply_public_data(&mut self, new_public_data: PublicData) -> Result<(), SessionError> {
        let mut refreshed_kernel = match &self.kernel {
            SessionKernel::Anonymous {
                handle,
                jwt_payload,
                anti_csrf_token,
                anonymous_session_token,
                ..
            } => SessionKernel::Anonymous {
                handle: handle.clone(),
                public_data: new_public_data,
                jwt_payload: jwt_payload.clone(),
                anti_csrf_token: anti_csrf_token.clone(),
                anonymous_session_token: anonymous_session_token.clone(),
            },
            SessionKernel::Authenticated {
                handle,
                anti_csrf_token,
                session_token,
                ..
            } => {
                self.store
                    .update_session(
                        handle,
                        crate::models::SessionPatch {
                            expires_at: None,
                            public_data: Some(new_public_data.to_json_string()),
                            private_data: None,
                        },
                    )
                    .await?;
                SessionKernel::Authenticated {
                    handle: handle.clone(),
                    public_data: new_public_data,
                    anti_csrf_token: anti_csrf_token.clone(),
                    session_token: session_token.clone(),
                }
            }
        };

        let minted_jwt = factory::refresh_session(
            &self.config,
            self.store.as_ref(),
            &mut self.pending_headers,
            self.secure,
            &refreshed_kernel,
            true,
        )
        .await?;
        if let (
            SessionKernel::Anonymous {
                anonymous_session_token,
                ..
            },
            Some(jwt),
        ) = (&mut refreshed_kernel, minted_jwt)
        {
            *anonymous_session_token = jwt;
        }
        self.kernel = refreshed_kernel;
        Ok(())
    }

    /// Loads the server-only private data blob for the current session,
    /// lazily creating a store record for an anonymous kernel that doesn't
    /// have one yet.
    pub async fn get_private_data(&mut self) -> Result<PrivateData, SessionError> {
        match self.store.get_session(self.kernel.handle()).await? {
            Some(record) => Ok(record.private_data()),
            None => {
                self.create_lazy_record(PrivateData::empty()).await?;
                Ok(PrivateData::empty())
            }
        }
    }

    /// Merge-writes the private data blob, lazily creating a record for an
    /// anonymous kernel that doesn't have one yet.
    pub async fn set_private_data(&mut self, data: Map<String, Value>) -> Result<(), SessionError> {
        match self.store.get_session(self.kernel.handle()).await? {
            Some(record) => {
                let mut private_data = record.private_data();
                private_data.merge_from(&data);
                self.store
                    .update_session(
                        self.kernel.handle(),
                        crate::models::SessionPatch {
                            expires_at: None,
                            public_data: None,
                            private_data: Some(private_data.to_json_string()),
                        },
                    )
                    .await
            }
            None => {
                let mut private_data = PrivateData::empty();
                private_data.merge_from(&data);
                self.create_lazy_record(private_data).await
            }
        }
    }

    async fn create_lazy_record(&self, private_data: PrivateData) -> Result<(), SessionError> {
        let expires_at = Utc::now()
            + chrono::Duration::minutes(match &self.kernel {
                SessionKernel::Anonymous { .. } => self.config.anon_session_expiry_minutes,
                SessionKernel::Authenticated { .. } => self.config.session_expiry_minutes,
            });

        self.store
            .create_session(SessionRecord {
                handle: self.kernel.handle().to_string(),
                user_id: self.kernel.user_id().map(|v| v.to_string().trim_matches('"').to_string()),
                expires_at: Some(expires_at),
                hashed_session_token: None,
                anti_csrf_token: self.kernel.anti_csrf_token().to_string(),
                public_data: self.kernel.public_data().to_json_string(),
                private_data: private_data.to_json_string(),
            })
            .await
    }
}
