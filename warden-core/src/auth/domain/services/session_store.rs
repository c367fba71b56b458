use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::crypto::{TokenDigester, digests_match};
use crate::auth::domain::aggregates::TokenFamily;
use crate::auth::domain::repositories::TokenFamilyRepository;
use crate::auth::domain::value_objects::{RefreshToken, RevocationReason};
use crate::auth::error::AuthError;
use crate::auth::policy::TokenPolicy;

use super::token_codec::TokenCodec;

/// Upper bound on compare-and-swap retries for one rotation. Each retry
/// re-reads the family, so a lost race is reclassified rather than repeated.
const MAX_ROTATION_ATTEMPTS: usize = 4;

/// Family plus the refresh token that currently unlocks it.
#[derive(Debug, Clone)]
pub struct IssuedRefresh {
    pub family: TokenFamily,
    pub token: RefreshToken,
}

#[derive(Debug, Clone)]
pub enum RotationOutcome {
    /// Presented token was current; a new one replaced it.
    Rotated(IssuedRefresh),
    /// Presented token was the one just superseded and came back inside the
    /// grace window. Nothing changed and no new token was minted.
    Replayed(TokenFamily),
}

impl RotationOutcome {
    pub fn family(&self) -> &TokenFamily {
        match self {
            Self::Rotated(issued) => &issued.family,
            Self::Replayed(family) => family,
        }
    }
}

/// Where a presented hash sits in its family's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainPosition {
    Current,
    Previous,
    Superseded,
}

fn locate(family: &TokenFamily, token_hash: &str) -> ChainPosition {
    if digests_match(&family.current_hash, token_hash) {
        ChainPosition::Current
    } else if family
        .previous_hash
        .as_deref()
        .is_some_and(|previous| digests_match(previous, token_hash))
    {
        ChainPosition::Previous
    } else {
        ChainPosition::Superseded
    }
}

/// Sole owner of refresh-token family state and revocation.
pub struct SessionStore {
    repo: Arc<dyn TokenFamilyRepository>,
    codec: Arc<TokenCodec>,
    digester: Arc<TokenDigester>,
    policy: TokenPolicy,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("repo_refs", &Arc::strong_count(&self.repo))
            .field("policy", &self.policy)
            .finish()
    }
}

impl SessionStore {
    pub fn new(
        repo: Arc<dyn TokenFamilyRepository>,
        codec: Arc<TokenCodec>,
        digester: Arc<TokenDigester>,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            repo,
            codec,
            digester,
            policy,
        }
    }

    pub async fn create_family(
        &self,
        subject_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<IssuedRefresh, AuthError> {
        let family_id = Uuid::now_v7();
        let token = self.codec.issue_refresh_token(subject_id, family_id, 1, now)?;
        let family = TokenFamily::start(
            family_id,
            subject_id,
            self.digester.digest(token.as_str()),
            now,
            &self.policy,
        );

        self.repo.insert(&family).await?;
        debug!(%subject_id, %family_id, "started refresh token family");

        Ok(IssuedRefresh { family, token })
    }

    /// Exchange a presented refresh token for its successor.
    ///
    /// Current token: swapped atomically for a new one. Previous token inside
    /// the grace window: [`RotationOutcome::Replayed`]. Previous token
    /// outside the window, or anything older: the family is revoked and the
    /// call fails with [`AuthError::TokenReuseDetected`].
    pub async fn rotate(
        &self,
        presented: &str,
        now: DateTime<Utc>,
    ) -> Result<RotationOutcome, AuthError> {
        let presented_hash = self.presented_hash(presented)?;

        for _ in 0..MAX_ROTATION_ATTEMPTS {
            let family = self
                .repo
                .find_by_token_hash(&presented_hash)
                .await?
                .ok_or(AuthError::UnknownToken)?;

            if family.revoked {
                return Err(AuthError::RevokedToken);
            }
            if family.is_expired_at(now) {
                return Err(AuthError::ExpiredToken);
            }

            match locate(&family, &presented_hash) {
                ChainPosition::Current => {
                    let token = self.codec.issue_refresh_token(
                        family.subject_id,
                        family.id,
                        family.generation.saturating_add(1),
                        now,
                    )?;
                    let next = family.rotated(
                        self.digester.digest(token.as_str()),
                        now,
                        &self.policy,
                    );

                    if self
                        .repo
                        .compare_and_rotate(&presented_hash, &next)
                        .await?
                    {
                        debug!(
                            family_id = %next.id,
                            generation = next.generation,
                            "rotated refresh token"
                        );
                        return Ok(RotationOutcome::Rotated(IssuedRefresh {
                            family: next,
                            token,
                        }));
                    }

                    debug!(
                        family_id = %family.id,
                        "lost rotation race; re-reading family"
                    );
                }
                ChainPosition::Previous
                    if family.within_grace(now, self.policy.rotation_grace) =>
                {
                    debug!(
                        family_id = %family.id,
                        "previous refresh token replayed inside grace window"
                    );
                    return Ok(RotationOutcome::Replayed(family));
                }
                ChainPosition::Previous | ChainPosition::Superseded => {
                    warn!(
                        family_id = %family.id,
                        subject_id = %family.subject_id,
                        "superseded refresh token replayed; revoking family"
                    );
                    self.repo
                        .revoke(family.id, RevocationReason::ReuseDetected, now)
                        .await?;
                    return Err(AuthError::TokenReuseDetected {
                        family_id: family.id,
                    });
                }
            }
        }

        Err(AuthError::Contention("token family"))
    }

    /// Idempotent. Returns the family only when this call revoked it.
    pub async fn revoke(
        &self,
        family_id: Uuid,
        reason: RevocationReason,
        now: DateTime<Utc>,
    ) -> Result<Option<TokenFamily>, AuthError> {
        let revoked = self.repo.revoke(family_id, reason, now).await?;
        if revoked.is_some() {
            debug!(%family_id, %reason, "revoked refresh token family");
        }
        Ok(revoked)
    }

    pub async fn revoke_subject(
        &self,
        subject_id: Uuid,
        reason: RevocationReason,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AuthError> {
        let revoked = self.repo.revoke_for_subject(subject_id, reason, now).await?;
        debug!(
            %subject_id,
            %reason,
            count = revoked.len(),
            "revoked refresh token families for subject"
        );
        Ok(revoked)
    }

    pub async fn find_family(&self, family_id: Uuid) -> Result<Option<TokenFamily>, AuthError> {
        Ok(self.repo.find_by_id(family_id).await?)
    }

    /// Resolve the family a presented refresh token belongs to, whatever its
    /// position in the chain. Read only.
    pub async fn find_presented(&self, presented: &str) -> Result<TokenFamily, AuthError> {
        let presented_hash = self.presented_hash(presented)?;
        self.repo
            .find_by_token_hash(&presented_hash)
            .await?
            .ok_or(AuthError::UnknownToken)
    }

    fn presented_hash(&self, presented: &str) -> Result<String, AuthError> {
        RefreshToken::validate_format(presented).map_err(|_| AuthError::MalformedToken)?;
        Ok(self.digester.digest(presented))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::infrastructure::repositories::InMemoryTokenFamilyRepository;
    use chrono::Duration;

    fn store(policy: TokenPolicy) -> SessionStore {
        SessionStore::new(
            Arc::new(InMemoryTokenFamilyRepository::default()),
            Arc::new(TokenCodec::new("codec-key", &policy).unwrap()),
            Arc::new(TokenDigester::new("digest-key").unwrap()),
            policy,
        )
    }

    #[tokio::test]
    async fn rotates_current_token() {
        let store = store(TokenPolicy::default());
        let now = Utc::now();
        let issued = store.create_family(Uuid::now_v7(), now).await.unwrap();

        let outcome = store.rotate(issued.token.as_str(), now).await.unwrap();
        let RotationOutcome::Rotated(next) = outcome else {
            panic!("expected rotation, got {outcome:?}");
        };
        assert_eq!(next.family.id, issued.family.id);
        assert_eq!(next.family.generation, 2);
        assert_ne!(next.token.as_str(), issued.token.as_str());
    }

    #[tokio::test]
    async fn unknown_and_malformed_tokens_are_distinguished() {
        let store = store(TokenPolicy::default());
        let never_issued =
            RefreshToken::generate(Uuid::now_v7(), Uuid::now_v7(), 1, Utc::now()).unwrap();

        assert!(matches!(
            store.rotate(never_issued.as_str(), Utc::now()).await,
            Err(AuthError::UnknownToken)
        ));
        assert!(matches!(
            store.rotate("definitely not a token", Utc::now()).await,
            Err(AuthError::MalformedToken)
        ));
    }

    #[tokio::test]
    async fn previous_token_inside_grace_is_a_no_op() {
        let store = store(TokenPolicy::default());
        let now = Utc::now();
        let first = store.create_family(Uuid::now_v7(), now).await.unwrap();
        store.rotate(first.token.as_str(), now).await.unwrap();

        let retry = store
            .rotate(first.token.as_str(), now + Duration::seconds(2))
            .await
            .unwrap();
        assert!(matches!(retry, RotationOutcome::Replayed(_)));
        assert_eq!(retry.family().generation, 2);
    }

    #[tokio::test]
    async fn previous_token_after_grace_revokes_family() {
        let store = store(TokenPolicy::default());
        let now = Utc::now();
        let first = store.create_family(Uuid::now_v7(), now).await.unwrap();
        let RotationOutcome::Rotated(second) =
            store.rotate(first.token.as_str(), now).await.unwrap()
        else {
            panic!("expected rotation");
        };

        let later = now + Duration::seconds(30);
        assert!(matches!(
            store.rotate(first.token.as_str(), later).await,
            Err(AuthError::TokenReuseDetected { .. })
        ));
        assert!(matches!(
            store.rotate(second.token.as_str(), later).await,
            Err(AuthError::RevokedToken)
        ));
    }

    #[tokio::test]
    async fn zero_grace_treats_any_replay_as_reuse() {
        let store = store(TokenPolicy {
            rotation_grace: Duration::zero(),
            ..TokenPolicy::default()
        });
        let now = Utc::now();
        let first = store.create_family(Uuid::now_v7(), now).await.unwrap();
        store.rotate(first.token.as_str(), now).await.unwrap();

        assert!(matches!(
            store.rotate(first.token.as_str(), now).await,
            Err(AuthError::TokenReuseDetected { .. })
        ));
    }

    #[tokio::test]
    async fn expired_family_is_rejected() {
        let policy = TokenPolicy::default();
        let store = store(policy.clone());
        let now = Utc::now();
        let first = store.create_family(Uuid::now_v7(), now).await.unwrap();

        assert!(matches!(
            store
                .rotate(first.token.as_str(), now + policy.refresh_ttl)
                .await,
            Err(AuthError::ExpiredToken)
        ));
    }

    #[tokio::test]
    async fn find_presented_does_not_rotate() {
        let store = store(TokenPolicy::default());
        let now = Utc::now();
        let subject = Uuid::now_v7();
        let first = store.create_family(subject, now).await.unwrap();

        let found = store.find_presented(first.token.as_str()).await.unwrap();
        assert_eq!(found.subject_id, subject);
        assert_eq!(found.generation, 1);

        store.rotate(first.token.as_str(), now).await.unwrap();
        let stale = store.find_presented(first.token.as_str()).await.unwrap();
        assert_eq!(stale.id, first.family.id);
        assert_eq!(stale.generation, 2);

        assert!(matches!(
            store.find_presented("definitely not a token").await,
            Err(AuthError::MalformedToken)
        ));
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = store(TokenPolicy::default());
        let now = Utc::now();
        let issued = store.create_family(Uuid::now_v7(), now).await.unwrap();

        let id = issued.family.id;
        let first = store.revoke(id, RevocationReason::UserLogout, now).await;
        assert!(first.unwrap().is_some());
        let second = store.revoke(id, RevocationReason::UserLogout, now).await;
        assert!(second.unwrap().is_none());
        let missing = store
            .revoke(Uuid::now_v7(), RevocationReason::UserLogout, now)
            .await;
        assert!(missing.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_subject_ends_every_family() {
        let store = store(TokenPolicy::default());
        let now = Utc::now();
        let subject = Uuid::now_v7();
        let a = store.create_family(subject, now).await.unwrap();
        let b = store.create_family(subject, now).await.unwrap();
        let other = store.create_family(Uuid::now_v7(), now).await.unwrap();

        let revoked = store
            .revoke_subject(subject, RevocationReason::PasswordChange, now)
            .await
            .unwrap();
        assert_eq!(revoked.len(), 2);

        for token in [&a.token, &b.token] {
            assert!(matches!(
                store.rotate(token.as_str(), now).await,
                Err(AuthError::RevokedToken)
            ));
        }
        assert!(store.rotate(other.token.as_str(), now).await.is_ok());
    }
}
