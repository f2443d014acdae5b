//! Data Model
//!
//! `PublicData`/`PrivateData` are validating newtypes over a JSON object.
//! Deriving `FromRow`/`Serialize` directly on a plain struct doesn't fit here
//! because both blobs carry arbitrary, caller-defined keys plus a small set
//! of invariants this crate must enforce itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;

use crate::error::SessionError;

/// JSON object exposed to the client. Carries a required `userId` key
/// (`null` for anonymous) and, for authenticated sessions, `role` XOR
/// `roles` for authorization. Never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct PublicData(pub Map<String, Value>);

impl PublicData {
    /// Builds an anonymous `PublicData` (`userId: null`).
    pub fn anonymous() -> Self {
        let mut map = Map::new();
        map.insert("userId".to_string(), Value::Null);
        PublicData(map)
    }

    /// Builds an authenticated `PublicData` from caller-supplied fields,
    /// forcing `userId` to the given value regardless of what the caller
    /// passed in. `userId` is the authoritative discriminant, set by the
    /// factory, not by handler-supplied data.
    pub fn authenticated(user_id: Value, mut fields: Map<String, Value>) -> Result<Self, SessionError> {
        fields.insert("userId".to_string(), user_id);
        let data = PublicData(fields);
        data.validate()?;
        Ok(data)
    }

    /// Enforces the `role` XOR `roles` invariant.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.0.contains_key("role") && self.0.contains_key("roles") {
            return Err(SessionError::InvalidConfig(
                "publicData must not carry both `role` and `roles`".into(),
            ));
        }
        Ok(())
    }

    pub fn user_id(&self) -> Option<&Value> {
        self.0.get("userId").filter(|v| !v.is_null())
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }

    /// Explicit accessor replacing the dynamically-typed host's property
    /// projection.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Merges `other` into `self`, with `other`'s values winning on key
    /// collision. Used for anonymous-to-authenticated promotion and for
    /// `setPublicData`, which additionally drops any `userId` key the caller
    /// tried to sneak in before calling this.
    pub fn merge_from(&mut self, other: &Map<String, Value>) {
        for (k, v) in other {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json_str(s: &str) -> Self {
        serde_json::from_str::<Map<String, Value>>(s)
            .map(PublicData)
            .unwrap_or_else(|_| PublicData::anonymous())
    }
}

/// JSON object held only server-side, never sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct PrivateData(pub Map<String, Value>);

impl PrivateData {
    pub fn empty() -> Self {
        PrivateData(Map::new())
    }

    pub fn merge_from(&mut self, other: &Map<String, Value>) {
        for (k, v) in other {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json_str(s: &str) -> Self {
        serde_json::from_str::<Map<String, Value>>(s)
            .map(PrivateData)
            .unwrap_or_else(|_| PrivateData::empty())
    }
}

/// Row stored by the session store.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub handle: String,
    pub user_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub hashed_session_token: Option<String>,
    pub anti_csrf_token: String,
    pub public_data: String,
    pub private_data: String,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp < now)
    }

    pub fn public_data(&self) -> PublicData {
        PublicData::from_json_str(&self.public_data)
    }

    pub fn private_data(&self) -> PrivateData {
        PrivateData::from_json_str(&self.private_data)
    }
}

/// Patch applied by `SessionStore::update_session`. Any subset of fields may
/// be set; `None` means "leave unchanged".
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub expires_at: Option<DateTime<Utc>>,
    pub public_data: Option<String>,
    pub private_data: Option<String>,
}

/// Session handle type tag suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    OpaqueTokenSimple,
    AnonymousJwt,
}

impl HandleKind {
    pub fn suffix(self) -> &'static str {
        match self {
            HandleKind::OpaqueTokenSimple => "opaque-token-simple",
            HandleKind::AnonymousJwt => "anonymous-jwt",
        }
    }

    pub fn from_handle(handle: &str) -> Option<Self> {
        if handle.ends_with("-opaque-token-simple") {
            Some(HandleKind::OpaqueTokenSimple)
        } else if handle.ends_with("-anonymous-jwt") {
            Some(HandleKind::AnonymousJwt)
        } else {
            None
        }
    }
}

/// Claims body nested under the `blitzjs` namespace key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymousSessionPayload {
    #[serde(rename = "isAnonymous")]
    pub is_anonymous: bool,
    pub handle: String,
    #[serde(rename = "publicData")]
    pub public_data: PublicData,
    #[serde(rename = "antiCSRFToken")]
    pub anti_csrf_token: String,
}

/// Full JWT claim set: standard registered claims plus the namespaced body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymousJwtClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub exp: usize,
    pub blitzjs: AnonymousSessionPayload,
}

/// The in-memory distillation of a session for one request: a tagged
/// variant, not an inheritance hierarchy.
#[derive(Debug, Clone)]
pub enum SessionKernel {
    Anonymous {
        handle: String,
        public_data: PublicData,
        jwt_payload: AnonymousSessionPayload,
        anti_csrf_token: String,
        anonymous_session_token: String,
    },
    Authenticated {
        handle: String,
        public_data: PublicData,
        anti_csrf_token: String,
        session_token: String,
    },
}

impl SessionKernel {
    pub fn handle(&self) -> &str {
        match self {
            SessionKernel::Anonymous { handle, .. } => handle,
            SessionKernel::Authenticated { handle, .. } => handle,
        }
    }

    pub fn public_data(&self) -> &PublicData {
        match self {
            SessionKernel::Anonymous { public_data, .. } => public_data,
            SessionKernel::Authenticated { public_data, .. } => public_data,
        }
    }

    pub fn anti_csrf_token(&self) -> &str {
        match self {
            SessionKernel::Anonymous { anti_csrf_token, .. } => anti_csrf_token,
            SessionKernel::Authenticated { anti_csrf_token, .. } => anti_csrf_token,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionKernel::Authenticated { .. })
    }

    pub fn user_id(&self) -> Option<&Value> {
        self.public_data().user_id()
    }
}
