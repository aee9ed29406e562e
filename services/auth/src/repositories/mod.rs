//! Persistence ports and their PostgreSQL and in-memory adapters

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::StoreResult;

use crate::models::{
    ExternalAccount, Identifier, NewRoleGrant, NewUser, PasswordResetToken, RoleGrant, RoleName,
    User, UserId,
};

pub mod memory;
pub mod reset_token;
pub mod role;
pub mod user;

pub use memory::{InMemoryResetTokenRepository, InMemoryRoleRepository, InMemoryUserRepository};
pub use reset_token::PgResetTokenRepository;
pub use role::PgRoleRepository;
pub use user::PgUserRepository;

/// User storage
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user; a taken identifier or external id is a `Conflict`
    async fn create(&self, new_user: &NewUser) -> StoreResult<User>;

    async fn find_by_id(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn find_by_identifier(&self, identifier: &Identifier) -> StoreResult<Option<User>>;

    /// Insert or refresh the account of a Mini-App user in one statement
    ///
    /// `default_role` only applies when the row is created. Returns the
    /// stored user and whether it was created by this call.
    async fn upsert_external(
        &self,
        account: &ExternalAccount,
        default_role: Option<RoleName>,
    ) -> StoreResult<(User, bool)>;

    /// Returns false when the user does not exist
    async fn update_password(&self, id: UserId, password_hash: &str) -> StoreResult<bool>;

    /// Returns false when the user does not exist
    async fn set_role(&self, id: UserId, role: Option<RoleName>) -> StoreResult<bool>;

    async fn ping(&self) -> StoreResult<bool> {
        Ok(true)
    }
}

/// Scoped role grants
#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Store a grant; granting the same role and scope twice returns the existing grant
    async fn create_grant(&self, grant: &NewRoleGrant) -> StoreResult<RoleGrant>;

    async fn list_by_user(&self, user_id: UserId) -> StoreResult<Vec<RoleGrant>>;

    /// Remove every grant of a user, returning how many were removed
    async fn delete_by_user(&self, user_id: UserId) -> StoreResult<u64>;
}

/// Outcome of redeeming a password reset token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    /// The password was replaced and the token marked used
    Redeemed(UserId),
    Missing,
    Used(UserId),
    Expired(UserId),
    /// The token points at a user that no longer exists; nothing was written
    UnknownUser(UserId),
}

/// Password reset tokens
#[async_trait]
pub trait ResetTokenRepository: Send + Sync {
    async fn create(&self, token: &PasswordResetToken) -> StoreResult<()>;

    async fn find(&self, token: &str) -> StoreResult<Option<PasswordResetToken>>;

    /// Store the new password hash and mark the token used as one unit
    ///
    /// Either both writes land or neither does, so a failed password update
    /// leaves the token usable. Of two concurrent calls at most one returns
    /// `Redeemed`.
    async fn redeem(
        &self,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Redemption>;
}
