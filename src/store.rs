//! Session Store Contract
//!
//! The pluggable persistence seam this crate's session core needs. Shaped
//! like the `async-session` crate's `SessionStore` trait: one async trait,
//! implementors own their storage. `SqliteSessionStore` follows a
//! `db::pool`/`repositories::users`-style convention (`SqlitePool`,
//! `sqlx::query_as`, UPSERT via `ON CONFLICT DO UPDATE`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::{SessionPatch, SessionRecord};

/// Persistence contract every session backend must implement. Methods return
/// `Result<_, StoreError>` so callers can wrap backend-specific failures
/// (`sqlx::Error`, a Redis client error, ...) uniformly.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, handle: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// All non-expired sessions owned by `user_id`. Used by
    /// `revokeAllSessionsForUser` and by cross-session public-data sync.
    async fn get_sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>, StoreError>;

    async fn create_session(&self, record: SessionRecord) -> Result<(), StoreError>;

    async fn update_session(&self, handle: &str, patch: SessionPatch) -> Result<(), StoreError>;

    async fn delete_session(&self, handle: &str) -> Result<(), StoreError>;
}

/// In-memory store for tests and single-process deployments. Mirrors the
/// shape of `async_session::MemoryStore` in intent, not in code.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    records: Arc<Mutex<HashMap<String, SessionRecord>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_session(&self, handle: &str) -> Result<Option<SessionRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(handle).cloned())
    }

    async fn get_sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        Ok(records
            .values()
            .filter(|r| r.user_id.as_deref() == Some(user_id) && !r.is_expired(now))
            .cloned()
            .collect())
    }

    async fn create_session(&self, record: SessionRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(record.handle.clone(), record);
        Ok(())
    }

    async fn update_session(&self, handle: &str, patch: SessionPatch) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = records.get_mut(handle) {
            if let Some(expires_at) = patch.expires_at {
                record.expires_at = Some(expires_at);
            }
            if let Some(public_data) = patch.public_data {
                record.public_data = public_data;
            }
            if let Some(private_data) = patch.private_data {
                record.private_data = private_data;
            }
        }
        Ok(())
    }

    async fn delete_session(&self, handle: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.remove(handle);
        Ok(())
    }
}

/// `sqlx`-backed store, following a `db::pool::create_pool`-style
/// (WAL mode, busy timeout) and `repositories::users` (UPSERT) pattern.
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the `sessions` table if absent. Called once at startup,
    /// alongside `db::migrations::run_migrations`.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                handle TEXT PRIMARY KEY,
                user_id TEXT,
                expires_at TEXT,
                hashed_session_token TEXT,
                anti_csrf_token TEXT NOT NULL,
                public_data TEXT NOT NULL,
                private_data TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Box::new(e) as StoreError)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| Box::new(e) as StoreError)?;

        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get_session(&self, handle: &str) -> Result<Option<SessionRecord>, StoreError> {
        sqlx::query_as::<_, SessionRecord>("SELECT * FROM sessions WHERE handle = ?")
            .bind(handle)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Box::new(e) as StoreError)
    }

    async fn get_sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>, StoreError> {
        let now = Utc::now();
        sqlx::query_as::<_, SessionRecord>(
            "SELECT * FROM sessions WHERE user_id = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Box::new(e) as StoreError)
    }

    async fn create_session(&self, record: SessionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions
                (handle, user_id, expires_at, hashed_session_token, anti_csrf_token, public_data, private_data)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(handle) DO UPDATE SET
                user_id = excluded.user_id,
                expires_at = excluded.expires_at,
                hashed_session_token = excluded.hashed_session_token,
                anti_csrf_token = excluded.anti_csrf_token,
                public_data = excluded.public_data,
                private_data = excluded.private_data
            "#,
        )
        .bind(&record.handle)
        .bind(&record.user_id)
        .bind(record.expires_at)
        .bind(&record.hashed_session_token)
        .bind(&record.anti_csrf_token)
        .bind(&record.public_data)
        .bind(&record.private_data)
        .execute(&self.pool)
        .await
        .map_err(|e| Box::new(e) as StoreError)?;
        Ok(())
    }

    async fn update_session(&self, handle: &str, patch: SessionPatch) -> Result<(), StoreError> {
        if let Some(expires_at) = patch.expires_at {
            sqlx::query("UPDATE sessions SET expires_at = ? WHERE handle = ?")
                .bind(expires_at)
                .bind(handle)
                .execute(&self.pool)
                .await
                .map_err(|e| Box::new(e) as StoreError)?;
        }
        if let Some(public_data) = patch.public_data {
            sqlx::query("UPDATE sessions SET public_data = ? WHERE handle = ?")
                .bind(public_data)
                .bind(handle)
                .execute(&self.pool)
                .await
                .map_err(|e| Box::new(e) as StoreError)?;
        }
        if let Some(private_data) = patch.private_data {
            sqlx::query("UPDATE sessions SET private_data = ? WHERE handle = ?")
                .bind(private_data)
                .bind(handle)
                .execute(&self.pool)
                .await
                .map_err(|e| Box::new(e) as StoreError)?;
        }
        Ok(())
    }

    async fn delete_session(&self, handle: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE handle = ?")
            .bind(handle)
            .execute(&self.pool)
            .await
            .map_err(|e| Box::new(e) as StoreError)?;
        Ok(())
    }
}
