use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::auth::domain::aggregates::TokenFamily;
use crate::auth::domain::repositories::TokenFamilyRepository;
use crate::auth::domain::value_objects::RevocationReason;

use super::{from_db_count, to_db_count};

const FAMILY_COLUMNS: &str = r#"
    id,
    subject_id,
    current_hash,
    previous_hash,
    generation,
    issued_at,
    rotated_at,
    expires_at,
    revoked,
    revoked_reason,
    revoked_at
"#;

pub struct PostgresTokenFamilyRepository {
    pool: PgPool,
}

impl fmt::Debug for PostgresTokenFamilyRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresTokenFamilyRepository").finish()
    }
}

impl PostgresTokenFamilyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn hydrate(row: PgRow) -> Result<TokenFamily> {
    let revoked_reason = row
        .try_get::<Option<String>, _>("revoked_reason")?
        .map(|reason| reason.parse::<RevocationReason>())
        .transpose()
        .map_err(anyhow::Error::msg)?;

    Ok(TokenFamily {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        current_hash: row.try_get("current_hash")?,
        previous_hash: row.try_get("previous_hash")?,
        generation: from_db_count(row.try_get("generation")?, "generation")?,
        issued_at: row.try_get("issued_at")?,
        rotated_at: row.try_get("rotated_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked: row.try_get("revoked")?,
        revoked_reason,
        revoked_at: row.try_get("revoked_at")?,
    })
}

#[async_trait]
impl TokenFamilyRepository for PostgresTokenFamilyRepository {
    async fn insert(&self, family: &TokenFamily) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO token_families (
                id,
                subject_id,
                current_hash,
                previous_hash,
                generation,
                issued_at,
                rotated_at,
                expires_at,
                revoked,
                revoked_reason,
                revoked_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(family.id)
        .bind(family.subject_id)
        .bind(&family.current_hash)
        .bind(&family.previous_hash)
        .bind(to_db_count(family.generation, "generation")?)
        .bind(family.issued_at)
        .bind(family.rotated_at)
        .bind(family.expires_at)
        .bind(family.revoked)
        .bind(family.revoked_reason.map(|reason| reason.as_str()))
        .bind(family.revoked_at)
        .execute(&mut *tx)
        .await
        .context("failed to insert token family")?;

        for hash in
            std::iter::once(&family.current_hash).chain(&family.previous_hash)
        {
            sqlx::query(
                r#"
                INSERT INTO token_family_hashes (token_hash, family_id)
                VALUES ($1, $2)
                "#,
            )
            .bind(hash)
            .bind(family.id)
            .execute(&mut *tx)
            .await
            .context("failed to index token family hash")?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, family_id: Uuid) -> Result<Option<TokenFamily>> {
        let row = sqlx::query(&format!(
            "SELECT {FAMILY_COLUMNS} FROM token_families WHERE id = $1"
        ))
        .bind(family_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(hydrate).transpose()
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<TokenFamily>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {FAMILY_COLUMNS}
            FROM token_families
            WHERE id = (
                SELECT family_id
                FROM token_family_hashes
                WHERE token_hash = $1
            )
            "#
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(hydrate).transpose()
    }

    async fn compare_and_rotate(
        &self,
        expected_current_hash: &str,
        next: &TokenFamily,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // The row lock taken by this UPDATE serializes concurrent rotations;
        // a loser re-evaluates the predicate against the winner's row.
        let result = sqlx::query(
            r#"
            UPDATE token_families
            SET current_hash = $3,
                previous_hash = $4,
                generation = $5,
                rotated_at = $6,
                expires_at = $7
            WHERE id = $1
              AND current_hash = $2
              AND revoked = FALSE
            "#,
        )
        .bind(next.id)
        .bind(expected_current_hash)
        .bind(&next.current_hash)
        .bind(&next.previous_hash)
        .bind(to_db_count(next.generation, "generation")?)
        .bind(next.rotated_at)
        .bind(next.expires_at)
        .execute(&mut *tx)
        .await
        .context("failed to rotate token family")?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO token_family_hashes (token_hash, family_id)
            VALUES ($1, $2)
            "#,
        )
        .bind(&next.current_hash)
        .bind(next.id)
        .execute(&mut *tx)
        .await
        .context("failed to index rotated token hash")?;

        tx.commit().await?;
        Ok(true)
    }

    async fn revoke(
        &self,
        family_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Option<TokenFamily>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE token_families
            SET revoked = TRUE,
                revoked_at = $3,
                revoked_reason = COALESCE(revoked_reason, $2)
            WHERE id = $1 AND revoked = FALSE
            RETURNING {FAMILY_COLUMNS}
            "#
        ))
        .bind(family_id)
        .bind(reason.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(hydrate).transpose()
    }

    async fn revoke_for_subject(
        &self,
        subject_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            UPDATE token_families
            SET revoked = TRUE,
                revoked_at = $3,
                revoked_reason = COALESCE(revoked_reason, $2)
            WHERE subject_id = $1
              AND revoked = FALSE
            RETURNING id
            "#,
        )
        .bind(subject_id)
        .bind(reason.as_str())
        .bind(at)
        .fetch_all(&self.pool)
        .await?;

        let mut revoked = Vec::with_capacity(rows.len());
        for row in rows {
            revoked.push(row.try_get::<Uuid, _>("id")?);
        }
        Ok(revoked)
    }
}
