//! Password reset token model

use chrono::{DateTime, Utc};
use std::fmt;

use crate::models::UserId;

/// Where a reset token stands at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTokenState {
    Usable,
    Used,
    Expired,
}

/// Single-use password reset token
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordResetToken {
    pub token: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl PasswordResetToken {
    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Consumption wins over expiry when both apply
    pub fn state(&self, now: DateTime<Utc>) -> ResetTokenState {
        if self.is_used() {
            ResetTokenState::Used
        } else if self.is_expired(now) {
            ResetTokenState::Expired
        } else {
            ResetTokenState::Usable
        }
    }
}

impl fmt::Debug for PasswordResetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordResetToken")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("used_at", &self.used_at)
            .finish()
    }
}
