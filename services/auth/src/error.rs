//! Error taxonomy of the credential core
//!
//! Business failures (bad password, expired token, ...) are ordinary values of
//! [`AuthError`]; only the two infrastructure variants describe faults the
//! transport may surface as a server error.

use common::StoreError;
use std::fmt;
use thiserror::Error;

use crate::jwt::TokenError;
use crate::max_auth::InitDataError;
use crate::notification::NotificationError;
use crate::password::HashError;

/// Errors returned by credential operations
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing or malformed input, including password policy violations
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Wrong password or unknown account
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Unknown user or reset token
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Reset token past its expiry
    #[error("Reset token expired")]
    Expired,

    /// Reset token already consumed
    #[error("Reset token already used")]
    AlreadyUsed,

    /// Refresh token unknown, revoked, expired or already rotated
    #[error("Invalid or expired session")]
    InvalidOrExpiredSession,

    /// Access token verification failure
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Mini-App init-data verification failure
    #[error(transparent)]
    InitData(#[from] InitDataError),

    /// Duplicate unique value
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Infrastructure failure that may succeed on retry
    #[error("Temporary infrastructure failure: {0}")]
    TransientInfra(String),

    /// Infrastructure failure that will not go away by retrying
    #[error("Infrastructure failure: {0}")]
    PermanentInfra(String),
}

impl AuthError {
    /// Stable error class, safe for audit payloads and RPC error fields
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "validation",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::NotFound(_) => "not_found",
            AuthError::Expired => "expired",
            AuthError::AlreadyUsed => "already_used",
            AuthError::InvalidOrExpiredSession => "invalid_or_expired_session",
            AuthError::Token(e) => e.kind(),
            AuthError::InitData(e) => e.kind(),
            AuthError::Conflict(_) => "conflict",
            AuthError::TransientInfra(_) => "transient_infra",
            AuthError::PermanentInfra(_) => "permanent_infra",
        }
    }

    /// Whether the failure is an infrastructure fault rather than a business outcome
    pub fn is_infrastructure(&self) -> bool {
        match self {
            AuthError::TransientInfra(_) | AuthError::PermanentInfra(_) => true,
            AuthError::Token(e) => e.is_infrastructure(),
            _ => false,
        }
    }

    pub fn validation(message: impl fmt::Display) -> Self {
        AuthError::Validation(message.to_string())
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(constraint) => AuthError::Conflict(constraint),
            e if e.is_transient() => AuthError::TransientInfra(e.to_string()),
            e => AuthError::PermanentInfra(e.to_string()),
        }
    }
}

impl From<NotificationError> for AuthError {
    fn from(err: NotificationError) -> Self {
        if err.is_transient() {
            AuthError::TransientInfra(err.to_string())
        } else {
            AuthError::PermanentInfra(err.to_string())
        }
    }
}

impl From<HashError> for AuthError {
    fn from(err: HashError) -> Self {
        AuthError::PermanentInfra(err.to_string())
    }
}

/// Type alias for results of credential operations
pub type AuthResult<T> = Result<T, AuthError>;
