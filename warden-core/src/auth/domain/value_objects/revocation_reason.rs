use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Enumerates the canonical reasons for revoking a refresh-token family.
///
/// Having a strongly typed list keeps logging, audit records and storage
/// consistent across repositories and services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    /// User explicitly logged out of a session.
    UserLogout,
    /// A superseded refresh token was presented again.
    ReuseDetected,
    /// Credential changed; every session of the subject ends.
    PasswordChange,
    /// Administrator locked the identity or ended its sessions.
    AdminAction,
    /// The identity behind the family vanished or became locked.
    IdentityUnavailable,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserLogout => "user_logout",
            Self::ReuseDetected => "reuse_detected",
            Self::PasswordChange => "password_change",
            Self::AdminAction => "admin_action",
            Self::IdentityUnavailable => "identity_unavailable",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevocationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_logout" => Ok(Self::UserLogout),
            "reuse_detected" => Ok(Self::ReuseDetected),
            "password_change" => Ok(Self::PasswordChange),
            "admin_action" => Ok(Self::AdminAction),
            "identity_unavailable" => Ok(Self::IdentityUnavailable),
            other => Err(format!("unknown revocation reason: {other}")),
        }
    }
}
