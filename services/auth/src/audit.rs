//! Security audit trail
//!
//! Events are structured and carry identifiers, timestamps and error classes
//! only. Tokens, passwords, hashes and init-data never appear in an event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::models::{RoleName, UserId};

/// A security-relevant occurrence
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    UserCreated {
        user_id: UserId,
        role: Option<RoleName>,
        at: DateTime<Utc>,
    },
    PasswordResetRequested {
        user_id: UserId,
        at: DateTime<Utc>,
    },
    PasswordResetCompleted {
        user_id: UserId,
        at: DateTime<Utc>,
    },
    PasswordResetTokenExpired {
        user_id: UserId,
        at: DateTime<Utc>,
    },
    PasswordResetTokenReused {
        user_id: UserId,
        at: DateTime<Utc>,
    },
    PasswordChanged {
        user_id: UserId,
        at: DateTime<Utc>,
    },
    MaxUserCreated {
        user_id: UserId,
        external_id: i64,
        username: String,
        at: DateTime<Utc>,
    },
    MaxUserUpdated {
        user_id: UserId,
        external_id: i64,
        username: String,
        at: DateTime<Utc>,
    },
    MaxAuthenticationSuccessful {
        user_id: UserId,
        external_id: i64,
        username: String,
        at: DateTime<Utc>,
    },
    MaxAuthValidationFailed {
        error_class: &'static str,
        at: DateTime<Utc>,
    },
    MaxUserUpsertFailed {
        error_class: &'static str,
        at: DateTime<Utc>,
    },
    MaxJwtGenerationFailed {
        error_class: &'static str,
        at: DateTime<Utc>,
    },
    MaxRefreshTokenSaveFailed {
        error_class: &'static str,
        at: DateTime<Utc>,
    },
    RoleAssigned {
        user_id: UserId,
        role: RoleName,
        scope: String,
        at: DateTime<Utc>,
    },
    RolesRevoked {
        user_id: UserId,
        grants_removed: u64,
        at: DateTime<Utc>,
    },
}

impl AuditEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuditEvent::UserCreated { .. } => "user_created",
            AuditEvent::PasswordResetRequested { .. } => "password_reset_requested",
            AuditEvent::PasswordResetCompleted { .. } => "password_reset_completed",
            AuditEvent::PasswordResetTokenExpired { .. } => "password_reset_token_expired",
            AuditEvent::PasswordResetTokenReused { .. } => "password_reset_token_reused",
            AuditEvent::PasswordChanged { .. } => "password_changed",
            AuditEvent::MaxUserCreated { .. } => "max_user_created",
            AuditEvent::MaxUserUpdated { .. } => "max_user_updated",
            AuditEvent::MaxAuthenticationSuccessful { .. } => "max_authentication_successful",
            AuditEvent::MaxAuthValidationFailed { .. } => "max_auth_validation_failed",
            AuditEvent::MaxUserUpsertFailed { .. } => "max_user_upsert_failed",
            AuditEvent::MaxJwtGenerationFailed { .. } => "max_jwt_generation_failed",
            AuditEvent::MaxRefreshTokenSaveFailed { .. } => "max_refresh_token_save_failed",
            AuditEvent::RoleAssigned { .. } => "role_assigned",
            AuditEvent::RolesRevoked { .. } => "roles_revoked",
        }
    }

    fn is_failure(&self) -> bool {
        matches!(
            self,
            AuditEvent::PasswordResetTokenExpired { .. }
                | AuditEvent::PasswordResetTokenReused { .. }
                | AuditEvent::MaxAuthValidationFailed { .. }
                | AuditEvent::MaxUserUpsertFailed { .. }
                | AuditEvent::MaxJwtGenerationFailed { .. }
                | AuditEvent::MaxRefreshTokenSaveFailed { .. }
        )
    }
}

/// Sink for audit events
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Emits events as JSON on the `audit` tracing target
#[derive(Debug, Clone, Default)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn record(&self, event: AuditEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        if event.is_failure() {
            warn!(target: "audit", event = event.name(), "{}", payload);
        } else {
            info!(target: "audit", event = event.name(), "{}", payload);
        }
    }
}

/// Keeps events in memory, for tests
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(AuditEvent::name).collect()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
