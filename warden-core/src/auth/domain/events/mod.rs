use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::domain::value_objects::{OtpPurpose, RevocationReason};
use crate::rbac::RoleSet;

/// Domain events for the authentication bounded context
///
/// Emitted by aggregates and the orchestrator, then handed to the optional
/// [`AuthEventRepository`](crate::auth::domain::repositories::AuthEventRepository)
/// as an audit trail. No event ever carries a secret, token or code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    IdentityRegistered {
        subject_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    LoginSucceeded {
        subject_id: Uuid,
        family_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// `subject_id` is `None` when the identifier matched nothing.
    LoginFailed {
        subject_id: Option<Uuid>,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    SessionRefreshed {
        subject_id: Uuid,
        family_id: Uuid,
        generation: u32,
        timestamp: DateTime<Utc>,
    },

    /// The previous token came back inside the grace window.
    RefreshReplayed {
        subject_id: Uuid,
        family_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    TokenReuseDetected {
        subject_id: Uuid,
        family_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    FamilyRevoked {
        subject_id: Uuid,
        family_id: Uuid,
        reason: RevocationReason,
        timestamp: DateTime<Utc>,
    },

    OtpIssued {
        subject_id: Uuid,
        purpose: OtpPurpose,
        expires_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    OtpVerified {
        subject_id: Uuid,
        purpose: OtpPurpose,
        timestamp: DateTime<Utc>,
    },

    OtpFailed {
        subject_id: Uuid,
        purpose: OtpPurpose,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    PasswordChanged {
        subject_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// `locked_until` is `None` for an indefinite administrative lock.
    AccountLocked {
        subject_id: Uuid,
        locked_until: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },

    AccountUnlocked {
        subject_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    RolesChanged {
        subject_id: Uuid,
        roles: RoleSet,
        timestamp: DateTime<Utc>,
    },
}

impl AuthEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::IdentityRegistered { timestamp, .. }
            | Self::LoginSucceeded { timestamp, .. }
            | Self::LoginFailed { timestamp, .. }
            | Self::SessionRefreshed { timestamp, .. }
            | Self::RefreshReplayed { timestamp, .. }
            | Self::TokenReuseDetected { timestamp, .. }
            | Self::FamilyRevoked { timestamp, .. }
            | Self::OtpIssued { timestamp, .. }
            | Self::OtpVerified { timestamp, .. }
            | Self::OtpFailed { timestamp, .. }
            | Self::PasswordChanged { timestamp, .. }
            | Self::AccountLocked { timestamp, .. }
            | Self::AccountUnlocked { timestamp, .. }
            | Self::RolesChanged { timestamp, .. } => *timestamp,
        }
    }

    pub fn subject_id(&self) -> Option<Uuid> {
        match self {
            Self::LoginFailed { subject_id, .. } => *subject_id,
            Self::IdentityRegistered { subject_id, .. }
            | Self::LoginSucceeded { subject_id, .. }
            | Self::SessionRefreshed { subject_id, .. }
            | Self::RefreshReplayed { subject_id, .. }
            | Self::TokenReuseDetected { subject_id, .. }
            | Self::FamilyRevoked { subject_id, .. }
            | Self::OtpIssued { subject_id, .. }
            | Self::OtpVerified { subject_id, .. }
            | Self::OtpFailed { subject_id, .. }
            | Self::PasswordChanged { subject_id, .. }
            | Self::AccountLocked { subject_id, .. }
            | Self::AccountUnlocked { subject_id, .. }
            | Self::RolesChanged { subject_id, .. } => Some(*subject_id),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::IdentityRegistered { .. } => "identity_registered",
            Self::LoginSucceeded { .. } => "login_succeeded",
            Self::LoginFailed { .. } => "login_failed",
            Self::SessionRefreshed { .. } => "session_refreshed",
            Self::RefreshReplayed { .. } => "refresh_replayed",
            Self::TokenReuseDetected { .. } => "token_reuse_detected",
            Self::FamilyRevoked { .. } => "family_revoked",
            Self::OtpIssued { .. } => "otp_issued",
            Self::OtpVerified { .. } => "otp_verified",
            Self::OtpFailed { .. } => "otp_failed",
            Self::PasswordChanged { .. } => "password_changed",
            Self::AccountLocked { .. } => "account_locked",
            Self::AccountUnlocked { .. } => "account_unlocked",
            Self::RolesChanged { .. } => "roles_changed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::LoginFailed { .. }
                | Self::TokenReuseDetected { .. }
                | Self::OtpFailed { .. }
        )
    }
}
