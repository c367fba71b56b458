use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::domain::aggregates::OtpChallenge;
use crate::auth::domain::repositories::OtpChallengeRepository;
use crate::auth::domain::value_objects::OtpPurpose;

#[derive(Clone, Debug, Default)]
pub struct InMemoryOtpChallengeRepository {
    challenges: Arc<Mutex<HashMap<(Uuid, OtpPurpose), OtpChallenge>>>,
}

#[async_trait]
impl OtpChallengeRepository for InMemoryOtpChallengeRepository {
    async fn find(&self, subject_id: Uuid, purpose: OtpPurpose) -> Result<Option<OtpChallenge>> {
        let guard = self.challenges.lock().await;
        Ok(guard.get(&(subject_id, purpose)).cloned())
    }

    async fn replace(&self, challenge: &OtpChallenge) -> Result<()> {
        let mut guard = self.challenges.lock().await;
        guard.insert((challenge.subject_id, challenge.purpose), challenge.clone());
        Ok(())
    }

    async fn compare_and_update(
        &self,
        expected_attempts: u32,
        next: &OtpChallenge,
    ) -> Result<bool> {
        let mut guard = self.challenges.lock().await;
        let Some(stored) = guard.get_mut(&(next.subject_id, next.purpose))
        else {
            return Ok(false);
        };
        if stored.id != next.id
            || stored.consumed
            || stored.attempts != expected_attempts
        {
            return Ok(false);
        }
        *stored = next.clone();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn challenge(subject_id: Uuid) -> OtpChallenge {
        let now = Utc::now();
        OtpChallenge::new(
            subject_id,
            OtpPurpose::EmailVerification,
            "digest".into(),
            now,
            now + Duration::minutes(10),
        )
    }

    #[tokio::test]
    async fn update_misses_after_reissue() {
        let repo = InMemoryOtpChallengeRepository::default();
        let subject = Uuid::now_v7();
        let first = challenge(subject);
        repo.replace(&first).await.unwrap();
        repo.replace(&challenge(subject)).await.unwrap();

        let stale = first.with_failed_attempt();
        assert!(!repo.compare_and_update(0, &stale).await.unwrap());
    }

    #[tokio::test]
    async fn update_requires_matching_attempt_count() {
        let repo = InMemoryOtpChallengeRepository::default();
        let first = challenge(Uuid::now_v7());
        repo.replace(&first).await.unwrap();

        let once = first.with_failed_attempt();
        assert!(repo.compare_and_update(0, &once).await.unwrap());
        assert!(!repo.compare_and_update(0, &once).await.unwrap());

        let consumed = once.mark_consumed(Utc::now());
        assert!(repo.compare_and_update(1, &consumed).await.unwrap());
        assert!(
            !repo
                .compare_and_update(1, &consumed.with_failed_attempt())
                .await
                .unwrap()
        );
    }
}
