//! Password reset token repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::StoreResult;
use sqlx::{PgPool, Row};

use super::{Redemption, ResetTokenRepository};
use crate::models::{PasswordResetToken, UserId};

#[derive(Clone)]
pub struct PgResetTokenRepository {
    pool: PgPool,
}

impl PgResetTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResetTokenRepository for PgResetTokenRepository {
    async fn create(&self, token: &PasswordResetToken) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (token, user_id, created_at, expires_at, used_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&token.token)
        .bind(token.user_id)
        .bind(token.created_at)
        .bind(token.expires_at)
        .bind(token.used_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, token: &str) -> StoreResult<Option<PasswordResetToken>> {
        let row = sqlx::query(
            r#"
            SELECT token, user_id, created_at, expires_at, used_at
            FROM password_reset_tokens
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| PasswordResetToken {
            token: row.get("token"),
            user_id: row.get("user_id"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
            used_at: row.get("used_at"),
        }))
    }

    async fn redeem(
        &self,
        token: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Redemption> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT user_id, expires_at, used_at
            FROM password_reset_tokens
            WHERE token = $1
            FOR UPDATE
            "#,
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(Redemption::Missing);
        };
        let user_id: UserId = row.get("user_id");
        let expires_at: DateTime<Utc> = row.get("expires_at");
        let used_at: Option<DateTime<Utc>> = row.get("used_at");

        if used_at.is_some() {
            return Ok(Redemption::Used(user_id));
        }
        if now >= expires_at {
            return Ok(Redemption::Expired(user_id));
        }

        let updated = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(password_hash)
        .bind(now)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(Redemption::UnknownUser(user_id));
        }

        sqlx::query("UPDATE password_reset_tokens SET used_at = $1 WHERE token = $2")
            .bind(now)
            .bind(token)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Redemption::Redeemed(user_id))
    }
}
