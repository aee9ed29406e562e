//! Password reset with single-use, short-lived tokens

use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::{Rng, rngs::OsRng};
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditLog};
use crate::error::{AuthError, AuthResult};
use crate::metrics::Metrics;
use crate::models::{Identifier, PasswordResetToken, ResetTokenState, UserId};
use crate::notification::Notifier;
use crate::password::PasswordHasher;
use crate::repositories::{Redemption, ResetTokenRepository, UserRepository};
use crate::session::SessionRegistry;
use crate::validation::PasswordPolicy;

/// 64 alphanumeric characters, roughly 381 bits of entropy
pub const RESET_TOKEN_LENGTH: usize = 64;

/// Default lifetime of a reset token
pub const RESET_TOKEN_TTL_MINUTES: i64 = 15;

pub fn generate_reset_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(RESET_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Request and redemption of password reset tokens
#[derive(Clone)]
pub struct PasswordResetFlow {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn ResetTokenRepository>,
    sessions: Arc<dyn SessionRegistry>,
    hasher: Arc<dyn PasswordHasher>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLog>,
    metrics: Arc<Metrics>,
    policy: PasswordPolicy,
    ttl: Duration,
}

pub struct ResetFlowDeps {
    pub users: Arc<dyn UserRepository>,
    pub tokens: Arc<dyn ResetTokenRepository>,
    pub sessions: Arc<dyn SessionRegistry>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditLog>,
    pub metrics: Arc<Metrics>,
}

impl PasswordResetFlow {
    pub fn new(deps: ResetFlowDeps, policy: PasswordPolicy, ttl: Duration) -> Self {
        Self {
            users: deps.users,
            tokens: deps.tokens,
            sessions: deps.sessions,
            hasher: deps.hasher,
            notifier: deps.notifier,
            audit: deps.audit,
            metrics: deps.metrics,
            policy,
            ttl,
        }
    }

    /// Issue a reset token for the account and deliver it to the user
    pub async fn request_reset(&self, identifier: &str) -> AuthResult<()> {
        let identifier = Identifier::parse(identifier).map_err(AuthError::Validation)?;

        let user = self
            .users
            .find_by_identifier(&identifier)
            .await?
            .ok_or(AuthError::NotFound("user"))?;

        if !user.identifier.is_reachable() {
            return Err(AuthError::validation("Account has no deliverable address"));
        }

        let now = Utc::now();
        let token = PasswordResetToken {
            token: generate_reset_token(),
            user_id: user.id,
            created_at: now,
            expires_at: now + self.ttl,
            used_at: None,
        };
        self.tokens.create(&token).await?;
        self.metrics.record_token_generated();

        self.notifier
            .send_reset_token(&user.identifier, &token.token)
            .await?;
        self.metrics.record_password_reset();

        info!("Password reset requested for user {}", user.id);
        self.audit
            .record(AuditEvent::PasswordResetRequested {
                user_id: user.id,
                at: now,
            })
            .await;

        Ok(())
    }

    /// Redeem a reset token, set the new password and end every session
    pub async fn reset(&self, token: &str, new_password: &str) -> AuthResult<UserId> {
        if token.is_empty() {
            return Err(AuthError::validation("Reset token is required"));
        }

        let stored = self
            .tokens
            .find(token)
            .await?
            .ok_or(AuthError::NotFound("reset token"))?;
        let user_id = stored.user_id;

        let now = Utc::now();
        match stored.state(now) {
            ResetTokenState::Used => return Err(self.reused(user_id).await),
            ResetTokenState::Expired => return Err(self.expired(user_id).await),
            ResetTokenState::Usable => {}
        }

        self.policy
            .validate(new_password)
            .map_err(AuthError::Validation)?;
        let password_hash = self.hasher.hash(new_password)?;

        let user_id = match self.tokens.redeem(token, &password_hash, now).await? {
            Redemption::Redeemed(user_id) => user_id,
            Redemption::Used(user_id) => return Err(self.reused(user_id).await),
            Redemption::Expired(user_id) => return Err(self.expired(user_id).await),
            Redemption::Missing => return Err(AuthError::NotFound("reset token")),
            Redemption::UnknownUser(_) => return Err(AuthError::NotFound("user")),
        };
        self.metrics.record_token_used();

        let revoked = self.sessions.revoke_all(user_id).await?;
        info!(
            "Password reset completed for user {}, {} sessions revoked",
            user_id, revoked
        );
        self.audit
            .record(AuditEvent::PasswordResetCompleted { user_id, at: now })
            .await;

        Ok(user_id)
    }

    async fn expired(&self, user_id: UserId) -> AuthError {
        self.metrics.record_token_expired();
        warn!("Expired reset token presented for user {}", user_id);
        self.audit
            .record(AuditEvent::PasswordResetTokenExpired {
                user_id,
                at: Utc::now(),
            })
            .await;
        AuthError::Expired
    }

    async fn reused(&self, user_id: UserId) -> AuthError {
        self.metrics.record_token_invalidated();
        warn!("Used reset token presented again for user {}", user_id);
        self.audit
            .record(AuditEvent::PasswordResetTokenReused {
                user_id,
                at: Utc::now(),
            })
            .await;
        AuthError::AlreadyUsed
    }
}
