//! In-memory repositories for tests and single-process deployments

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{StoreError, StoreResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{Redemption, ResetTokenRepository, RoleRepository, UserRepository};
use crate::models::{
    ExternalAccount, Identifier, NewRoleGrant, NewUser, PasswordResetToken, ResetTokenState,
    RoleGrant, RoleName, User, UserId,
};

#[derive(Default)]
struct UserTable {
    next_id: UserId,
    rows: HashMap<UserId, User>,
}

impl UserTable {
    fn by_identifier(&self, identifier: &Identifier) -> Option<&User> {
        self.rows.values().find(|u| &u.identifier == identifier)
    }

    fn by_external_id(&mut self, external_id: i64) -> Option<&mut User> {
        self.rows
            .values_mut()
            .find(|u| u.external_id == Some(external_id))
    }

    fn insert(&mut self, new_user: &NewUser) -> StoreResult<User> {
        if self.by_identifier(&new_user.identifier).is_some() {
            return Err(StoreError::Conflict("users_identifier_key".to_string()));
        }
        if let Some(external_id) = new_user.external_id {
            if self.by_external_id(external_id).is_some() {
                return Err(StoreError::Conflict("users_external_id_key".to_string()));
            }
        }

        self.next_id += 1;
        let now = Utc::now();
        let user = User {
            id: self.next_id,
            identifier: new_user.identifier.clone(),
            password_hash: new_user.password_hash.clone(),
            role: new_user.role,
            external_id: new_user.external_id,
            username: new_user.username.clone(),
            display_name: new_user.display_name.clone(),
            created_at: now,
            updated_at: now,
        };
        self.rows.insert(user.id, user.clone());
        Ok(user)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryUserRepository {
    table: Arc<Mutex<UserTable>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.table.lock().await.rows.len()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, new_user: &NewUser) -> StoreResult<User> {
        self.table.lock().await.insert(new_user)
    }

    async fn find_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.table.lock().await.rows.get(&id).cloned())
    }

    async fn find_by_identifier(&self, identifier: &Identifier) -> StoreResult<Option<User>> {
        Ok(self.table.lock().await.by_identifier(identifier).cloned())
    }

    async fn upsert_external(
        &self,
        account: &ExternalAccount,
        default_role: Option<RoleName>,
    ) -> StoreResult<(User, bool)> {
        let mut table = self.table.lock().await;

        if let Some(user) = table.by_external_id(account.external_id) {
            user.username = Some(account.username.clone());
            user.display_name = Some(account.display_name.clone());
            user.updated_at = Utc::now();
            return Ok((user.clone(), false));
        }

        let user = table.insert(&NewUser {
            identifier: Identifier::External(account.external_id),
            password_hash: None,
            role: default_role,
            external_id: Some(account.external_id),
            username: Some(account.username.clone()),
            display_name: Some(account.display_name.clone()),
        })?;
        Ok((user, true))
    }

    async fn update_password(&self, id: UserId, password_hash: &str) -> StoreResult<bool> {
        let mut table = self.table.lock().await;
        match table.rows.get_mut(&id) {
            Some(user) => {
                user.password_hash = Some(password_hash.to_string());
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_role(&self, id: UserId, role: Option<RoleName>) -> StoreResult<bool> {
        let mut table = self.table.lock().await;
        match table.rows.get_mut(&id) {
            Some(user) => {
                user.role = role;
                user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
struct GrantTable {
    next_id: i64,
    rows: Vec<RoleGrant>,
}

#[derive(Clone, Default)]
pub struct InMemoryRoleRepository {
    table: Arc<Mutex<GrantTable>>,
}

impl InMemoryRoleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleRepository for InMemoryRoleRepository {
    async fn create_grant(&self, grant: &NewRoleGrant) -> StoreResult<RoleGrant> {
        let mut table = self.table.lock().await;

        if let Some(existing) = table.rows.iter().find(|g| {
            g.user_id == grant.user_id && g.role == grant.role && g.scope == grant.scope
        }) {
            return Ok(existing.clone());
        }

        table.next_id += 1;
        let stored = RoleGrant {
            id: table.next_id,
            user_id: grant.user_id,
            role: grant.role,
            scope: grant.scope,
            assigned_at: Utc::now(),
        };
        table.rows.push(stored.clone());
        Ok(stored)
    }

    async fn list_by_user(&self, user_id: UserId) -> StoreResult<Vec<RoleGrant>> {
        Ok(self
            .table
            .lock()
            .await
            .rows
            .iter()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_by_user(&self, user_id: UserId) -> StoreResult<u64> {
        let mut table = self.table.lock().await;
        let before = table.rows.len();
        table.rows.retain(|g| g.user_id != user_id);
        Ok((before - table.rows.len()) as u64)
    }
}

/// Reset tokens kept beside the user store their redemption writes to
#[derive(Clone)]
pub struct InMemoryResetTokenRepository {
    tokens: Arc<Mutex<HashMap<String, PasswordResetToken>>>,
    users: Arc<dyn UserRepository>,
}

impl InMemoryResetTokenRepository {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self {
            tokens: Arc::default(),
            users,
        }
    }
}

#[async_trait]
impl ResetTokenRepository for InMemoryResetTokenRepository {
    async fn create(&self, token: &PasswordResetToken) -> StoreResult<()> {
        let mut tokens = self.tokens.lock().await;
        if tokens.contains_key(&token.token) {
            return Err(StoreError::Conflict("password_reset_tokens_pkey".to_string()));
        }
        tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn find(&self, token: &str) -> StoreResult<Option<PasswordResetToken>> {
        Ok(self.tokens.lock().await.get(token).cloned())
    }

    async fn redeem(
        &self,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Redemption> {
        // Held across the password write so redemptions are serialized.
        let mut tokens = self.tokens.lock().await;
        let Some(stored) = tokens.get_mut(token) else {
            return Ok(Redemption::Missing);
        };
        let user_id = stored.user_id;

        match stored.state(now) {
            ResetTokenState::Used => return Ok(Redemption::Used(user_id)),
            ResetTokenState::Expired => return Ok(Redemption::Expired(user_id)),
            ResetTokenState::Usable => {}
        }

        if !self.users.update_password(user_id, password_hash).await? {
            return Ok(Redemption::UnknownUser(user_id));
        }
        stored.used_at = Some(now);
        Ok(Redemption::Redeemed(user_id))
    }
}
