use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::domain::value_objects::OtpPurpose;

/// Outstanding one-time-code challenge for a (subject, purpose) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpChallenge {
    /// Changes on every re-issue so stale compare-and-swaps miss.
    pub id: Uuid,
    pub subject_id: Uuid,
    pub purpose: OtpPurpose,
    /// HMAC bound to subject, purpose and code
    pub code_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
    pub consumed: bool,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl OtpChallenge {
    pub fn new(
        subject_id: Uuid,
        purpose: OtpPurpose,
        code_hash: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            subject_id,
            purpose,
            code_hash,
            issued_at,
            expires_at,
            attempts: 0,
            consumed: false,
            consumed_at: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn with_failed_attempt(&self) -> Self {
        Self {
            attempts: self.attempts.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn mark_consumed(&self, now: DateTime<Utc>) -> Self {
        Self {
            consumed: true,
            consumed_at: Some(now),
            ..self.clone()
        }
    }
}
