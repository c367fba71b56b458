use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::auth::domain::aggregates::OtpChallenge;
use crate::auth::domain::repositories::OtpChallengeRepository;
use crate::auth::domain::value_objects::OtpPurpose;

use super::{from_db_count, to_db_count};

pub struct PostgresOtpChallengeRepository {
    pool: PgPool,
}

impl fmt::Debug for PostgresOtpChallengeRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresOtpChallengeRepository").finish()
    }
}

impl PostgresOtpChallengeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn hydrate(row: PgRow) -> Result<OtpChallenge> {
    let purpose: String = row.try_get("purpose")?;
    Ok(OtpChallenge {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        purpose: purpose.parse::<OtpPurpose>()?,
        code_hash: row.try_get("code_hash")?,
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
        attempts: from_db_count(row.try_get("attempts")?, "attempts")?,
        consumed: row.try_get("consumed")?,
        consumed_at: row.try_get("consumed_at")?,
    })
}

#[async_trait]
impl OtpChallengeRepository for PostgresOtpChallengeRepository {
    async fn find(&self, subject_id: Uuid, purpose: OtpPurpose) -> Result<Option<OtpChallenge>> {
        let row = sqlx::query(
            r#"
            SELECT
                id,
                subject_id,
                purpose,
                code_hash,
                issued_at,
                expires_at,
                attempts,
                consumed,
                consumed_at
            FROM otp_challenges
            WHERE subject_id = $1 AND purpose = $2
            "#,
        )
        .bind(subject_id)
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(hydrate).transpose()
    }

    async fn replace(&self, challenge: &OtpChallenge) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO otp_challenges (
                subject_id,
                purpose,
                id,
                code_hash,
                issued_at,
                expires_at,
                attempts,
                consumed,
                consumed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (subject_id, purpose) DO UPDATE
            SET id = EXCLUDED.id,
                code_hash = EXCLUDED.code_hash,
                issued_at = EXCLUDED.issued_at,
                expires_at = EXCLUDED.expires_at,
                attempts = EXCLUDED.attempts,
                consumed = EXCLUDED.consumed,
                consumed_at = EXCLUDED.consumed_at
            "#,
        )
        .bind(challenge.subject_id)
        .bind(challenge.purpose.as_str())
        .bind(challenge.id)
        .bind(&challenge.code_hash)
        .bind(challenge.issued_at)
        .bind(challenge.expires_at)
        .bind(to_db_count(challenge.attempts, "attempts")?)
        .bind(challenge.consumed)
        .bind(challenge.consumed_at)
        .execute(&self.pool)
        .await
        .context("failed to store otp challenge")?;
        Ok(())
    }

    async fn compare_and_update(
        &self,
        expected_attempts: u32,
        next: &OtpChallenge,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE otp_challenges
            SET attempts = $4,
                consumed = $5,
                consumed_at = $6
            WHERE subject_id = $1
              AND purpose = $2
              AND id = $3
              AND attempts = $7
              AND consumed = FALSE
            "#,
        )
        .bind(next.subject_id)
        .bind(next.purpose.as_str())
        .bind(next.id)
        .bind(to_db_count(next.attempts, "attempts")?)
        .bind(next.consumed)
        .bind(next.consumed_at)
        .bind(to_db_count(expected_attempts, "attempts")?)
        .execute(&self.pool)
        .await
        .context("failed to update otp challenge")?;

        Ok(result.rows_affected() == 1)
    }
}
