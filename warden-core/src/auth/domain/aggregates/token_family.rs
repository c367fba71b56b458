use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::auth::domain::value_objects::RevocationReason;
use crate::auth::policy::TokenPolicy;

/// One login session's chain of refresh-token rotations.
///
/// Only digests are held. `previous_hash` is the token superseded by the most
/// recent rotation; anything older is known to storage only through its
/// superseded-hash index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFamily {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub current_hash: String,
    pub previous_hash: Option<String>,
    /// 1 for the token minted at login, incremented per rotation
    pub generation: u32,
    pub issued_at: DateTime<Utc>,
    pub rotated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_reason: Option<RevocationReason>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl TokenFamily {
    pub fn start(
        id: Uuid,
        subject_id: Uuid,
        token_hash: String,
        now: DateTime<Utc>,
        policy: &TokenPolicy,
    ) -> Self {
        Self {
            id,
            subject_id,
            current_hash: token_hash,
            previous_hash: None,
            generation: 1,
            issued_at: now,
            rotated_at: now,
            expires_at: Self::sliding_expiry(now, now, policy),
            revoked: false,
            revoked_reason: None,
            revoked_at: None,
        }
    }

    /// State after rotating to `next_hash` at `now`.
    pub fn rotated(&self, next_hash: String, now: DateTime<Utc>, policy: &TokenPolicy) -> Self {
        Self {
            current_hash: next_hash,
            previous_hash: Some(self.current_hash.clone()),
            generation: self.generation.saturating_add(1),
            rotated_at: now,
            expires_at: Self::sliding_expiry(self.issued_at, now, policy),
            ..self.clone()
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether a replay of `previous_hash` at `now` is still tolerated.
    pub fn within_grace(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.previous_hash.is_some()
            && grace > Duration::zero()
            && now < self.rotated_at + grace
    }

    pub fn revoke(&mut self, reason: RevocationReason, now: DateTime<Utc>) {
        if self.revoked {
            return;
        }
        self.revoked = true;
        self.revoked_reason = Some(reason);
        self.revoked_at = Some(now);
    }

    fn sliding_expiry(
        issued_at: DateTime<Utc>,
        now: DateTime<Utc>,
        policy: &TokenPolicy,
    ) -> DateTime<Utc> {
        let sliding = now + policy.refresh_ttl;
        let ceiling = issued_at + policy.family_max_lifetime;
        sliding.min(ceiling)
    }
}
