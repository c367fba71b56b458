use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::domain::aggregates::{Identity, OtpChallenge, TokenFamily};
use crate::auth::domain::events::AuthEvent;
use crate::auth::domain::value_objects::{OtpCode, OtpPurpose, RevocationReason};

#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>>;
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Identity>>;
    /// Insert a new identity. Returns `false` when the identifier is already
    /// taken.
    async fn insert(&self, identity: &Identity) -> Result<bool>;
    /// Persist `identity` only if the stored copy is still at
    /// `identity.version()`, storing it one version higher. Returns `false`
    /// when another writer got there first; errors when the identity does
    /// not exist.
    async fn save(&self, identity: &Identity) -> Result<bool>;
}

/// Storage port for refresh-token families.
///
/// Every hash a family has ever held stays resolvable through
/// [`find_by_token_hash`](Self::find_by_token_hash), so a replay several
/// rotations old still lands on its family.
#[async_trait]
pub trait TokenFamilyRepository: Send + Sync {
    async fn insert(&self, family: &TokenFamily) -> Result<()>;

    async fn find_by_id(&self, family_id: Uuid) -> Result<Option<TokenFamily>>;

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<TokenFamily>>;

    /// Replace the family with `next` only if its stored current hash is
    /// still `expected_current_hash` and it is not revoked. Must be a single
    /// atomic step; returns whether the swap happened.
    async fn compare_and_rotate(
        &self,
        expected_current_hash: &str,
        next: &TokenFamily,
    ) -> Result<bool>;

    /// Idempotent. Returns the family when this call revoked it, `None` when
    /// it was already revoked or does not exist.
    async fn revoke(
        &self,
        family_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Option<TokenFamily>>;

    /// Revoke every live family of a subject, returning the ids revoked.
    async fn revoke_for_subject(
        &self,
        subject_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>>;
}

#[async_trait]
pub trait OtpChallengeRepository: Send + Sync {
    async fn find(&self, subject_id: Uuid, purpose: OtpPurpose) -> Result<Option<OtpChallenge>>;

    /// Store `challenge`, replacing any outstanding one for the same
    /// (subject, purpose).
    async fn replace(&self, challenge: &OtpChallenge) -> Result<()>;

    /// Write `next` only if the stored challenge for its (subject, purpose)
    /// still has id `next.id`, `expected_attempts` attempts and is not
    /// consumed. Returns whether the write happened.
    async fn compare_and_update(&self, expected_attempts: u32, next: &OtpChallenge) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPurpose {
    OneTimeCode(OtpPurpose),
    LoginAlert,
}

#[derive(Debug, Clone)]
pub enum NotificationPayload {
    OneTimeCode {
        code: OtpCode,
        expires_at: DateTime<Utc>,
    },
    LoginAlert {
        family_id: Uuid,
        occurred_at: DateTime<Utc>,
    },
}

/// Delivery channel for codes and alerts. Transport and retries are the
/// implementor's concern.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send(
        &self,
        subject_id: Uuid,
        purpose: NotificationPurpose,
        payload: NotificationPayload,
    ) -> Result<()>;
}

#[async_trait]
pub trait AuthEventRepository: Send + Sync {
    async fn record(&self, events: Vec<AuthEvent>) -> Result<()>;
}
