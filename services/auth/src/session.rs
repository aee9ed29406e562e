//! Refresh session registry
//!
//! Every refresh token handed out has a server-side record keyed by its jti.
//! A refresh token is only honoured while that record is active, which is what
//! makes logout, rotation and revoke-all effective before the token expires.

use async_trait::async_trait;
use chrono::Utc;
use common::{StoreResult, cache::RedisPool};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{RefreshSession, UserId};

/// Storage of refresh sessions
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Register a freshly issued refresh token
    async fn save(&self, session: &RefreshSession) -> StoreResult<()>;

    /// Whether `jti` belongs to `user_id` and is neither revoked nor expired
    async fn is_valid(&self, jti: Uuid, user_id: UserId) -> StoreResult<bool>;

    /// Revoke one session; returns whether an active session was revoked
    async fn revoke(&self, jti: Uuid) -> StoreResult<bool>;

    /// Revoke every session of a user; returns how many were revoked
    async fn revoke_all(&self, user_id: UserId) -> StoreResult<u64>;

    /// Retire `old` and register `new` in one step
    ///
    /// Returns false without registering `new` when `old` was no longer
    /// active, so of two concurrent rotations of the same token only one wins.
    async fn rotate(&self, old: Uuid, new: &RefreshSession) -> StoreResult<bool>;

    async fn ping(&self) -> StoreResult<bool> {
        Ok(true)
    }
}

const SESSION_PREFIX: &str = "refresh_session:";

/// Session registry backed by Redis key expiry
///
/// Each session is a `refresh_session:<jti>` key holding the owner id, listed
/// in the owner's `user_sessions:<id>` set. Writes touching both go through a
/// single transaction or script.
#[derive(Clone)]
pub struct RedisSessionRegistry {
    redis_pool: RedisPool,
}

impl RedisSessionRegistry {
    pub fn new(redis_pool: RedisPool) -> Self {
        Self { redis_pool }
    }

    fn session_key(jti: Uuid) -> String {
        format!("{}{}", SESSION_PREFIX, jti)
    }

    fn user_key(user_id: UserId) -> String {
        format!("user_sessions:{}", user_id)
    }

    fn ttl_seconds(session: &RefreshSession) -> u64 {
        (session.expires_at - Utc::now()).num_seconds().max(1) as u64
    }
}

#[async_trait]
impl SessionRegistry for RedisSessionRegistry {
    async fn save(&self, session: &RefreshSession) -> StoreResult<()> {
        debug!("Saving refresh session {} for user {}", session.jti, session.user_id);

        self.redis_pool
            .set_with_membership(
                &Self::session_key(session.jti),
                &session.user_id.to_string(),
                &Self::user_key(session.user_id),
                &session.jti.to_string(),
                Self::ttl_seconds(session),
            )
            .await
    }

    async fn is_valid(&self, jti: Uuid, user_id: UserId) -> StoreResult<bool> {
        let owner = self.redis_pool.get(&Self::session_key(jti)).await?;
        Ok(owner.and_then(|v| v.parse::<UserId>().ok()) == Some(user_id))
    }

    async fn revoke(&self, jti: Uuid) -> StoreResult<bool> {
        let key = Self::session_key(jti);
        let Some(user_id) = self
            .redis_pool
            .get(&key)
            .await?
            .and_then(|v| v.parse::<UserId>().ok())
        else {
            return Ok(false);
        };

        self.redis_pool
            .delete_with_membership(&key, &Self::user_key(user_id), &jti.to_string())
            .await
    }

    async fn revoke_all(&self, user_id: UserId) -> StoreResult<u64> {
        let revoked = self
            .redis_pool
            .delete_set_and_members(&Self::user_key(user_id), SESSION_PREFIX)
            .await?;

        info!("Revoked {} sessions for user {}", revoked, user_id);
        Ok(revoked)
    }

    async fn rotate(&self, old: Uuid, new: &RefreshSession) -> StoreResult<bool> {
        self.redis_pool
            .replace_with_membership(
                &Self::session_key(old),
                &old.to_string(),
                &Self::session_key(new.jti),
                &new.jti.to_string(),
                &new.user_id.to_string(),
                &Self::user_key(new.user_id),
                Self::ttl_seconds(new),
            )
            .await
    }

    async fn ping(&self) -> StoreResult<bool> {
        self.redis_pool.health_check().await
    }
}

/// Process-local session registry
#[derive(Clone, Default)]
pub struct InMemorySessionRegistry {
    sessions: Arc<Mutex<HashMap<Uuid, RefreshSession>>>,
}

impl InMemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions of a user that are still active
    pub async fn active_count(&self, user_id: UserId) -> usize {
        let now = Utc::now();
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| s.user_id == user_id && s.is_active(now))
            .count()
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn save(&self, session: &RefreshSession) -> StoreResult<()> {
        self.sessions.lock().await.insert(session.jti, session.clone());
        Ok(())
    }

    async fn is_valid(&self, jti: Uuid, user_id: UserId) -> StoreResult<bool> {
        let now = Utc::now();
        Ok(self
            .sessions
            .lock()
            .await
            .get(&jti)
            .is_some_and(|s| s.user_id == user_id && s.is_active(now)))
    }

    async fn revoke(&self, jti: Uuid) -> StoreResult<bool> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&jti) {
            Some(session) if session.is_active(now) => {
                session.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all(&self, user_id: UserId) -> StoreResult<u64> {
        let now = Utc::now();
        let mut revoked = 0;
        for session in self.sessions.lock().await.values_mut() {
            if session.user_id == user_id && session.is_active(now) {
                session.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn rotate(&self, old: Uuid, new: &RefreshSession) -> StoreResult<bool> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&old) {
            Some(session) if session.is_active(now) => session.revoked = true,
            _ => return Ok(false),
        }
        sessions.insert(new.jti, new.clone());
        Ok(true)
    }
}
