use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::auth::domain::aggregates::{Identity, IdentityStatus};
use crate::auth::domain::repositories::IdentityRepository;
use crate::rbac::RoleSet;

use super::{from_db_count, from_db_version, to_db_count, to_db_version};

const SELECT_IDENTITY: &str = r#"
    SELECT
        id,
        identifier,
        credential_hash,
        roles,
        status,
        failed_login_attempts,
        locked_until,
        last_login,
        created_at,
        updated_at,
        version
    FROM identities
"#;

pub struct PostgresIdentityRepository {
    pool: PgPool,
}

impl fmt::Debug for PostgresIdentityRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresIdentityRepository").finish()
    }
}

impl PostgresIdentityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn hydrate(row: PgRow) -> Result<Identity> {
    let roles: Vec<String> = row.try_get("roles")?;
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<IdentityStatus>()
        .map_err(anyhow::Error::msg)?;

    Ok(Identity::hydrate(
        row.try_get("id")?,
        row.try_get("identifier")?,
        row.try_get("credential_hash")?,
        RoleSet::from_names(roles),
        status,
        from_db_count(
            row.try_get("failed_login_attempts")?,
            "failed_login_attempts",
        )?,
        row.try_get("locked_until")?,
        row.try_get("last_login")?,
        row.try_get("created_at")?,
        row.try_get("updated_at")?,
        from_db_version(row.try_get("version")?)?,
    ))
}

#[async_trait]
impl IdentityRepository for PostgresIdentityRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
        let row = sqlx::query(&format!("{SELECT_IDENTITY} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(hydrate).transpose()
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Identity>> {
        let row =
            sqlx::query(&format!("{SELECT_IDENTITY} WHERE identifier = $1"))
                .bind(identifier)
                .fetch_optional(&self.pool)
                .await?;
        row.map(hydrate).transpose()
    }

    async fn insert(&self, identity: &Identity) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO identities (
                id,
                identifier,
                credential_hash,
                roles,
                status,
                failed_login_attempts,
                locked_until,
                last_login,
                created_at,
                updated_at,
                version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (identifier) DO NOTHING
            "#,
        )
        .bind(identity.id())
        .bind(identity.identifier())
        .bind(identity.credential_hash())
        .bind(identity.roles().names())
        .bind(identity.status().as_str())
        .bind(to_db_count(
            identity.failed_login_attempts(),
            "failed_login_attempts",
        )?)
        .bind(identity.locked_until())
        .bind(identity.last_login())
        .bind(identity.created_at())
        .bind(identity.updated_at())
        .bind(to_db_version(identity.version())?)
        .execute(&self.pool)
        .await
        .context("failed to insert identity")?;

        Ok(result.rows_affected() == 1)
    }

    async fn save(&self, identity: &Identity) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET credential_hash = $2,
                roles = $3,
                status = $4,
                failed_login_attempts = $5,
                locked_until = $6,
                last_login = $7,
                updated_at = $8,
                version = version + 1
            WHERE id = $1 AND version = $9
            "#,
        )
        .bind(identity.id())
        .bind(identity.credential_hash())
        .bind(identity.roles().names())
        .bind(identity.status().as_str())
        .bind(to_db_count(
            identity.failed_login_attempts(),
            "failed_login_attempts",
        )?)
        .bind(identity.locked_until())
        .bind(identity.last_login())
        .bind(identity.updated_at())
        .bind(to_db_version(identity.version())?)
        .execute(&self.pool)
        .await
        .context("failed to update identity")?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM identities WHERE id = $1")
            .bind(identity.id())
            .fetch_optional(&self.pool)
            .await
            .context("failed to check identity")?;
        if exists.is_none() {
            anyhow::bail!("identity {} does not exist", identity.id());
        }
        Ok(false)
    }
}
