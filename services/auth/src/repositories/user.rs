//! User repository for database operations

use async_trait::async_trait;
use common::{StoreError, StoreResult, database};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{debug, info};

use super::UserRepository;
use crate::models::{ExternalAccount, Identifier, NewUser, RoleName, User, UserId};

const USER_COLUMNS: &str = "id, identifier, password_hash, role, external_id, username, \
                            display_name, created_at, updated_at";

/// User repository
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn decode_error(message: impl Into<String>) -> StoreError {
    let message: String = message.into();
    StoreError::Query(sqlx::Error::Decode(message.into()))
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    let id: UserId = row.get("id");

    let stored: String = row.get("identifier");
    let identifier = Identifier::from_stored(&stored)
        .ok_or_else(|| decode_error(format!("unrecognised identifier for user {}", id)))?;

    let role: Option<String> = row.get("role");
    let role = role
        .map(|r| r.parse::<RoleName>())
        .transpose()
        .map_err(decode_error)?;

    Ok(User {
        id,
        identifier,
        password_hash: row.get("password_hash"),
        role,
        external_id: row.get("external_id"),
        username: row.get("username"),
        display_name: row.get("display_name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, new_user: &NewUser) -> StoreResult<User> {
        info!("Creating new user: {}", new_user.identifier.masked());

        let sql = format!(
            r#"
            INSERT INTO users (identifier, password_hash, role, external_id, username, display_name)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(new_user.identifier.to_string())
            .bind(&new_user.password_hash)
            .bind(new_user.role.map(|r| r.as_str()))
            .bind(new_user.external_id)
            .bind(&new_user.username)
            .bind(&new_user.display_name)
            .fetch_one(&self.pool)
            .await?;

        user_from_row(&row)
    }

    async fn find_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        debug!("Finding user by ID: {}", id);

        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_identifier(&self, identifier: &Identifier) -> StoreResult<Option<User>> {
        debug!("Finding user by identifier: {}", identifier.masked());

        let sql = format!("SELECT {} FROM users WHERE identifier = $1", USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(identifier.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn upsert_external(
        &self,
        account: &ExternalAccount,
        default_role: Option<RoleName>,
    ) -> StoreResult<(User, bool)> {
        // xmax is zero only for rows created by this statement
        let sql = format!(
            r#"
            INSERT INTO users (identifier, role, external_id, username, display_name)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (external_id) DO UPDATE
            SET username = EXCLUDED.username,
                display_name = EXCLUDED.display_name,
                updated_at = NOW()
            RETURNING {}, (xmax = 0) AS inserted
            "#,
            USER_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(Identifier::External(account.external_id).to_string())
            .bind(default_role.map(|r| r.as_str()))
            .bind(account.external_id)
            .bind(&account.username)
            .bind(&account.display_name)
            .fetch_one(&self.pool)
            .await?;

        let inserted: bool = row.get("inserted");
        Ok((user_from_row(&row)?, inserted))
    }

    async fn update_password(&self, id: UserId, password_hash: &str) -> StoreResult<bool> {
        info!("Updating password for user: {}", id);

        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(password_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_role(&self, id: UserId, role: Option<RoleName>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET role = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(role.map(|r| r.as_str()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> StoreResult<bool> {
        database::health_check(&self.pool).await
    }
}
