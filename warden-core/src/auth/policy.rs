use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::auth::crypto::HasherParams;

/// Every tunable the auth core consults, injected once at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthPolicy {
    pub token: TokenPolicy,
    pub otp: OtpPolicy,
    pub lockout: LockoutPolicy,
    pub password: PasswordPolicy,
    pub hasher: HasherParams,
}

/// Lifetimes for access tokens and refresh-token families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPolicy {
    /// Lifetime of a signed access token.
    pub access_ttl: Duration,
    /// Sliding lifetime of a refresh token, restarted on each rotation.
    pub refresh_ttl: Duration,
    /// Hard cap on a family measured from login. Rotation never extends a
    /// family past this point.
    pub family_max_lifetime: Duration,
    /// How long the immediately previous refresh token may be replayed
    /// without being treated as reuse. Zero disables the tolerance.
    pub rotation_grace: Duration,
    /// `iss` claim stamped into and required from access tokens.
    pub issuer: String,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(30),
            family_max_lifetime: Duration::days(90),
            rotation_grace: Duration::seconds(5),
            issuer: "warden".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpPolicy {
    pub ttl: Duration,
    /// Wrong codes accepted before the challenge is burned.
    pub max_attempts: u32,
    pub code_length: u8,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(10),
            max_attempts: 5,
            code_length: 6,
        }
    }
}

/// Consecutive failed logins tolerated before an identity is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_failed_logins: u32,
    pub lockout_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_logins: 5,
            lockout_duration: Duration::minutes(15),
        }
    }
}

/// Password policy describing optional enforcement rules.
///
/// When `enforce` is false the policy is advisory: `check` reports nothing
/// and registration accepts any secret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PasswordPolicy {
    pub enforce: bool,
    /// Minimum length in characters, not bytes.
    pub min_length: u16,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_number: bool,
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            enforce: true,
            min_length: 12,
            require_uppercase: false,
            require_lowercase: false,
            require_number: false,
            require_special: false,
        }
    }
}

impl PasswordPolicy {
    pub fn advisory() -> Self {
        Self {
            enforce: false,
            ..Self::default()
        }
    }

    /// Evaluate a password against the policy returning failed rule labels.
    pub fn check(&self, password: &str) -> PasswordPolicyCheck {
        let mut failures = Vec::new();

        if self.enforce {
            if password.chars().count() < self.min_length as usize {
                failures.push(PasswordPolicyRule::MinLength(self.min_length));
            }
            if self.require_uppercase
                && !password.chars().any(|c| c.is_uppercase())
            {
                failures.push(PasswordPolicyRule::Uppercase);
            }
            if self.require_lowercase
                && !password.chars().any(|c| c.is_lowercase())
            {
                failures.push(PasswordPolicyRule::Lowercase);
            }
            if self.require_number
                && !password.chars().any(|c| c.is_ascii_digit())
            {
                failures.push(PasswordPolicyRule::Number);
            }
            if self.require_special
                && !password.chars().any(|c| !c.is_alphanumeric())
            {
                failures.push(PasswordPolicyRule::Special);
            }
        }

        PasswordPolicyCheck { failures }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PasswordPolicyRule {
    MinLength(u16),
    Uppercase,
    Lowercase,
    Number,
    Special,
}

impl fmt::Display for PasswordPolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MinLength(len) => write!(f, "minimum length of {} characters", len),
            Self::Uppercase => write!(f, "at least one uppercase letter"),
            Self::Lowercase => write!(f, "at least one lowercase letter"),
            Self::Number => write!(f, "at least one number"),
            Self::Special => write!(f, "at least one special character"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicyCheck {
    pub failures: Vec<PasswordPolicyRule>,
}

impl PasswordPolicyCheck {
    pub fn is_satisfied(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_policy_accepts_anything() {
        let policy = PasswordPolicy::advisory();
        assert!(policy.check("").is_satisfied());
    }

    #[test]
    fn enforced_policy_reports_every_failed_rule() {
        let policy = PasswordPolicy {
            enforce: true,
            min_length: 10,
            require_uppercase: true,
            require_lowercase: true,
            require_number: true,
            require_special: true,
        };

        let check = policy.check("short");
        assert_eq!(
            check.failures,
            vec![
                PasswordPolicyRule::MinLength(10),
                PasswordPolicyRule::Uppercase,
                PasswordPolicyRule::Number,
                PasswordPolicyRule::Special,
            ]
        );

        assert!(policy.check("Longer-pass1").is_satisfied());
    }

    #[test]
    fn length_counts_characters() {
        let policy = PasswordPolicy {
            min_length: 4,
            ..PasswordPolicy::default()
        };
        // Four characters, eight bytes.
        assert!(policy.check("ĳĳĳĳ").is_satisfied());
        assert!(!policy.check("ĳĳĳ").is_satisfied());
    }

    #[test]
    fn defaults_are_conservative() {
        let tokens = TokenPolicy::default();
        assert!(tokens.rotation_grace < tokens.access_ttl);
        assert!(tokens.refresh_ttl <= tokens.family_max_lifetime);
        assert_eq!(OtpPolicy::default().max_attempts, 5);
    }
}
