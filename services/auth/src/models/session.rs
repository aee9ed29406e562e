//! Refresh session model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::UserId;

/// Server-side record of an issued refresh token, keyed by its jti
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSession {
    pub jti: Uuid,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl RefreshSession {
    /// A fresh, unrevoked session
    pub fn new(jti: Uuid, user_id: UserId, expires_at: DateTime<Utc>) -> Self {
        Self {
            jti,
            user_id,
            expires_at,
            revoked: false,
        }
    }

    /// Active means neither revoked nor expired
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }
}
