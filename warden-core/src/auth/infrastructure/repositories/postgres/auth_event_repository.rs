use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;

use crate::auth::domain::events::AuthEvent;
use crate::auth::domain::repositories::AuthEventRepository;

pub struct PostgresAuthEventRepository {
    pool: PgPool,
}

impl fmt::Debug for PostgresAuthEventRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresAuthEventRepository").finish()
    }
}

impl PostgresAuthEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthEventRepository for PostgresAuthEventRepository {
    async fn record(&self, events: Vec<AuthEvent>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO auth_events (
                    subject_id,
                    event_type,
                    payload,
                    occurred_at
                )
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(event.subject_id())
            .bind(event.event_type())
            .bind(Json(&event))
            .bind(event.timestamp())
            .execute(&mut *tx)
            .await
            .context("failed to record auth event")?;
        }
        tx.commit().await?;
        Ok(())
    }
}
