//! Role grant repository

use async_trait::async_trait;
use common::StoreResult;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::info;

use super::{RoleRepository, user::decode_error};
use crate::models::{NewRoleGrant, RoleGrant, RoleName, Scope, UserId};

#[derive(Clone)]
pub struct PgRoleRepository {
    pool: PgPool,
}

impl PgRoleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn grant_from_row(row: &PgRow) -> StoreResult<RoleGrant> {
    let role: String = row.get("role");
    Ok(RoleGrant {
        id: row.get("id"),
        user_id: row.get("user_id"),
        role: role.parse::<RoleName>().map_err(decode_error)?,
        scope: Scope::new(
            row.get("unit_id"),
            row.get("sub_unit_id"),
            row.get("leaf_unit_id"),
        ),
        assigned_at: row.get("assigned_at"),
    })
}

#[async_trait]
impl RoleRepository for PgRoleRepository {
    async fn create_grant(&self, grant: &NewRoleGrant) -> StoreResult<RoleGrant> {
        info!(
            "Granting {} to user {} ({})",
            grant.role,
            grant.user_id,
            grant.scope.label()
        );

        // The no-op update makes RETURNING yield the existing row on a repeat grant
        let row = sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role, unit_id, sub_unit_id, leaf_unit_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (
                user_id,
                role,
                COALESCE(unit_id, -1),
                COALESCE(sub_unit_id, -1),
                COALESCE(leaf_unit_id, -1)
            )
            DO UPDATE SET assigned_at = user_roles.assigned_at
            RETURNING id, user_id, role, unit_id, sub_unit_id, leaf_unit_id, assigned_at
            "#,
        )
        .bind(grant.user_id)
        .bind(grant.role.as_str())
        .bind(grant.scope.unit)
        .bind(grant.scope.sub_unit)
        .bind(grant.scope.leaf_unit)
        .fetch_one(&self.pool)
        .await?;

        grant_from_row(&row)
    }

    async fn list_by_user(&self, user_id: UserId) -> StoreResult<Vec<RoleGrant>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, role, unit_id, sub_unit_id, leaf_unit_id, assigned_at
            FROM user_roles
            WHERE user_id = $1
            ORDER BY assigned_at, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(grant_from_row).collect()
    }

    async fn delete_by_user(&self, user_id: UserId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        info!("Removed {} grants of user {}", result.rows_affected(), user_id);
        Ok(result.rows_affected())
    }
}
