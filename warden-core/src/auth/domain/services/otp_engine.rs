use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::auth::crypto::{TokenDigester, digests_match};
use crate::auth::domain::aggregates::OtpChallenge;
use crate::auth::domain::repositories::OtpChallengeRepository;
use crate::auth::domain::value_objects::{OtpCode, OtpPurpose};
use crate::auth::error::AuthError;
use crate::auth::policy::OtpPolicy;

/// Plaintext code returned once at issue time.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub code: OtpCode,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies purpose-bound one-time codes. Only an HMAC of
/// (subject, purpose, code) is ever persisted.
pub struct OtpEngine {
    repo: Arc<dyn OtpChallengeRepository>,
    digester: Arc<TokenDigester>,
    policy: OtpPolicy,
}

impl fmt::Debug for OtpEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtpEngine")
            .field("repo_refs", &Arc::strong_count(&self.repo))
            .field("policy", &self.policy)
            .finish()
    }
}

impl OtpEngine {
    pub fn new(
        repo: Arc<dyn OtpChallengeRepository>,
        digester: Arc<TokenDigester>,
        policy: OtpPolicy,
    ) -> Self {
        Self {
            repo,
            digester,
            policy,
        }
    }

    pub fn policy(&self) -> &OtpPolicy {
        &self.policy
    }

    /// Start a challenge, replacing any outstanding one for the same
    /// subject and purpose.
    pub async fn issue(
        &self,
        subject_id: Uuid,
        purpose: OtpPurpose,
        now: DateTime<Utc>,
    ) -> Result<IssuedChallenge, AuthError> {
        let code = OtpCode::generate(self.policy.code_length)
            .map_err(|err| AuthError::Hashing(err.to_string()))?;
        let expires_at = now + self.policy.ttl;

        let challenge = OtpChallenge::new(
            subject_id,
            purpose,
            self.code_hash(subject_id, purpose, &code),
            now,
            expires_at,
        );
        self.repo.replace(&challenge).await?;

        debug!(%subject_id, %purpose, %expires_at, "issued otp challenge");
        Ok(IssuedChallenge { code, expires_at })
    }

    /// Check a presented code. Succeeds at most once per challenge.
    ///
    /// Failure order: expired, consumed, attempt ceiling reached, wrong
    /// code. A wrong code is counted before the error is returned.
    pub async fn verify(
        &self,
        subject_id: Uuid,
        purpose: OtpPurpose,
        presented: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let presented = OtpCode::presented(presented);
        let presented_hash = self.code_hash(subject_id, purpose, &presented);

        // Short of a reissue, a lost compare-and-swap means another
        // verification counted an attempt or consumed the challenge. That
        // happens at most `max_attempts + 1` times before callers stop early.
        for _ in 0..=self.policy.max_attempts.saturating_add(1) {
            let challenge = self
                .repo
                .find(subject_id, purpose)
                .await?
                .ok_or(AuthError::NoActiveChallenge)?;

            if challenge.is_expired_at(now) {
                return Err(AuthError::ExpiredChallenge);
            }
            if challenge.consumed {
                return Err(AuthError::ChallengeConsumed);
            }
            if challenge.attempts >= self.policy.max_attempts {
                return Err(AuthError::MaxAttemptsExceeded);
            }

            let matched = digests_match(&challenge.code_hash, &presented_hash);
            let next = if matched {
                challenge.mark_consumed(now)
            } else {
                challenge.with_failed_attempt()
            };

            if !self.repo.compare_and_update(challenge.attempts, &next).await? {
                debug!(%subject_id, %purpose, "otp challenge changed underneath; retrying");
                continue;
            }

            if matched {
                debug!(%subject_id, %purpose, "otp challenge consumed");
                return Ok(());
            }
            return Err(AuthError::InvalidCode);
        }

        Err(AuthError::Contention("otp challenge"))
    }

    fn code_hash(&self, subject_id: Uuid, purpose: OtpPurpose, code: &OtpCode) -> String {
        self.digester.digest_parts(&[
            subject_id.as_bytes(),
            purpose.as_str().as_bytes(),
            code.as_str().as_bytes(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::infrastructure::repositories::InMemoryOtpChallengeRepository;
    use chrono::Duration;

    fn engine() -> OtpEngine {
        OtpEngine::new(
            Arc::new(InMemoryOtpChallengeRepository::default()),
            Arc::new(TokenDigester::new("otp-key").unwrap()),
            OtpPolicy::default(),
        )
    }

    fn wrong_code(code: &OtpCode) -> String {
        code.as_str()
            .chars()
            .map(|c| if c == '0' { '1' } else { '0' })
            .collect()
    }

    #[tokio::test]
    async fn correct_code_succeeds_once() {
        let engine = engine();
        let now = Utc::now();
        let subject = Uuid::now_v7();
        let issued = engine
            .issue(subject, OtpPurpose::EmailVerification, now)
            .await
            .unwrap();

        let purpose = OtpPurpose::EmailVerification;
        let code = issued.code.as_str();
        assert!(engine.verify(subject, purpose, code, now).await.is_ok());
        assert!(matches!(
            engine.verify(subject, purpose, code, now).await,
            Err(AuthError::ChallengeConsumed)
        ));
    }

    #[tokio::test]
    async fn wrong_codes_hit_ceiling_on_the_attempt_after_the_limit() {
        let engine = engine();
        let now = Utc::now();
        let subject = Uuid::now_v7();
        let purpose = OtpPurpose::LoginStepUp;
        let issued = engine.issue(subject, purpose, now).await.unwrap();
        let wrong = wrong_code(&issued.code);

        for _ in 0..5 {
            assert!(matches!(
                engine.verify(subject, purpose, &wrong, now).await,
                Err(AuthError::InvalidCode)
            ));
        }
        assert!(matches!(
            engine.verify(subject, purpose, &wrong, now).await,
            Err(AuthError::MaxAttemptsExceeded)
        ));
        // Burned challenges stay burned even for the right code.
        assert!(matches!(
            engine
                .verify(subject, purpose, issued.code.as_str(), now)
                .await,
            Err(AuthError::MaxAttemptsExceeded)
        ));
    }

    #[tokio::test]
    async fn expired_challenge_rejects_correct_code() {
        let engine = engine();
        let now = Utc::now();
        let subject = Uuid::now_v7();
        let purpose = OtpPurpose::PasswordReset;
        let issued = engine.issue(subject, purpose, now).await.unwrap();

        let later = now + OtpPolicy::default().ttl + Duration::seconds(1);
        assert!(matches!(
            engine
                .verify(subject, purpose, issued.code.as_str(), later)
                .await,
            Err(AuthError::ExpiredChallenge)
        ));
    }

    #[tokio::test]
    async fn codes_are_bound_to_purpose_and_subject() {
        let engine = engine();
        let now = Utc::now();
        let subject = Uuid::now_v7();
        let issued = engine
            .issue(subject, OtpPurpose::EmailVerification, now)
            .await
            .unwrap();
        engine
            .issue(subject, OtpPurpose::PasswordReset, now)
            .await
            .unwrap();

        let code = issued.code.as_str();
        assert!(matches!(
            engine
                .verify(subject, OtpPurpose::PasswordReset, code, now)
                .await,
            Err(AuthError::InvalidCode)
        ));
        let stranger = Uuid::now_v7();
        assert!(matches!(
            engine
                .verify(stranger, OtpPurpose::EmailVerification, code, now)
                .await,
            Err(AuthError::NoActiveChallenge)
        ));
    }

    #[tokio::test]
    async fn reissue_invalidates_previous_code() {
        let engine = engine();
        let now = Utc::now();
        let subject = Uuid::now_v7();
        let purpose = OtpPurpose::LoginStepUp;
        let first = engine.issue(subject, purpose, now).await.unwrap();
        let second = engine.issue(subject, purpose, now).await.unwrap();

        if first.code.as_str() != second.code.as_str() {
            assert!(matches!(
                engine
                    .verify(subject, purpose, first.code.as_str(), now)
                    .await,
                Err(AuthError::InvalidCode)
            ));
        }
        assert!(
            engine
                .verify(subject, purpose, second.code.as_str(), now)
                .await
                .is_ok()
        );
    }
}
