//! Scoped role grants and permission checks

use common::StoreResult;
use std::sync::Arc;
use tracing::info;

use crate::models::{NewRoleGrant, RoleGrant, RoleName, Scope, TokenContext, UserId};
use crate::repositories::RoleRepository;

/// Grants, lists and revokes roles within the organizational hierarchy
#[derive(Clone)]
pub struct RoleAssigner {
    roles: Arc<dyn RoleRepository>,
}

impl RoleAssigner {
    pub fn new(roles: Arc<dyn RoleRepository>) -> Self {
        Self { roles }
    }

    /// Levels below a missing one are dropped before the grant is stored
    pub async fn assign(&self, user_id: UserId, role: RoleName, scope: Scope) -> StoreResult<RoleGrant> {
        self.roles
            .create_grant(&NewRoleGrant {
                user_id,
                role,
                scope: scope.effective(),
            })
            .await
    }

    pub async fn list(&self, user_id: UserId) -> StoreResult<Vec<RoleGrant>> {
        self.roles.list_by_user(user_id).await
    }

    pub async fn revoke_all(&self, user_id: UserId) -> StoreResult<u64> {
        let removed = self.roles.delete_by_user(user_id).await?;
        info!("Revoked {} role grants of user {}", removed, user_id);
        Ok(removed)
    }

    /// Whether the user holds a grant reaching `target`
    ///
    /// With `role` set only grants of that role count. A `super_admin` grant
    /// reaches everything regardless of `role`.
    pub async fn permits(
        &self,
        user_id: UserId,
        role: Option<RoleName>,
        target: &Scope,
    ) -> StoreResult<bool> {
        let grants = self.roles.list_by_user(user_id).await?;
        Ok(grants.iter().any(|grant| {
            grant.role == RoleName::SuperAdmin
                || (role.is_none_or(|r| grant.role == r) && grant.scope.covers(target))
        }))
    }

    /// Scoping to embed in the user's access tokens
    ///
    /// Taken from the grant of the user's primary role, falling back to the
    /// oldest grant. Global grants yield no context.
    pub async fn token_context(
        &self,
        user_id: UserId,
        primary: Option<RoleName>,
    ) -> StoreResult<Option<TokenContext>> {
        let grants = self.roles.list_by_user(user_id).await?;
        let grant = primary
            .and_then(|role| grants.iter().find(|g| g.role == role))
            .or_else(|| grants.first());

        Ok(grant
            .map(|g| g.scope)
            .filter(|scope| !scope.is_global()))
    }
}
