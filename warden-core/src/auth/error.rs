use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::auth::crypto::CryptoError;
use crate::auth::policy::PasswordPolicyRule;

/// Detailed failure taxonomy used inside the core.
///
/// These distinctions are for server-side logs and tests. Callers outside the
/// core only ever see the coalesced [`AuthFailure`].
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token has expired")]
    ExpiredToken,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token is malformed")]
    MalformedToken,

    #[error("refresh token was never issued")]
    UnknownToken,

    #[error("token family has been revoked")]
    RevokedToken,

    #[error("superseded refresh token replayed for family {family_id}")]
    TokenReuseDetected { family_id: Uuid },

    #[error("no active challenge")]
    NoActiveChallenge,

    #[error("challenge has expired")]
    ExpiredChallenge,

    #[error("challenge already consumed")]
    ChallengeConsumed,

    #[error("maximum verification attempts exceeded")]
    MaxAttemptsExceeded,

    #[error("invalid code")]
    InvalidCode,

    #[error("authentication required")]
    Unauthorized,

    #[error("insufficient role")]
    Forbidden,

    #[error("identifier already registered")]
    IdentifierTaken,

    #[error("secret does not satisfy the password policy")]
    PasswordPolicy(Vec<PasswordPolicyRule>),

    #[error("hashing failed: {0}")]
    Hashing(String),

    #[error("stored hash could not be verified: {0}")]
    Verification(String),

    #[error("concurrent update contention on {0}")]
    Contention(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<CryptoError> for AuthError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Verification(message) => Self::Verification(message),
            other => Self::Hashing(other.to_string()),
        }
    }
}

impl AuthError {
    /// Collapse into the minimal caller-visible category.
    pub fn classify(&self) -> AuthFailure {
        match self {
            Self::InvalidCredentials
            | Self::ExpiredToken
            | Self::InvalidSignature
            | Self::MalformedToken
            | Self::UnknownToken
            | Self::RevokedToken
            | Self::TokenReuseDetected { .. }
            | Self::NoActiveChallenge
            | Self::ExpiredChallenge
            | Self::ChallengeConsumed
            | Self::MaxAttemptsExceeded
            | Self::InvalidCode
            | Self::Unauthorized => AuthFailure::Unauthorized,
            Self::Forbidden => AuthFailure::Forbidden,
            Self::IdentifierTaken => AuthFailure::Conflict,
            Self::PasswordPolicy(rules) => AuthFailure::PolicyViolation(rules.clone()),
            Self::Hashing(_)
            | Self::Verification(_)
            | Self::Contention(_)
            | Self::Storage(_) => AuthFailure::Internal,
        }
    }

    /// Stable label for logs and audit records.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::ExpiredToken => "expired_token",
            Self::InvalidSignature => "invalid_signature",
            Self::MalformedToken => "malformed_token",
            Self::UnknownToken => "unknown_token",
            Self::RevokedToken => "revoked_token",
            Self::TokenReuseDetected { .. } => "token_reuse_detected",
            Self::NoActiveChallenge => "no_active_challenge",
            Self::ExpiredChallenge => "expired_challenge",
            Self::ChallengeConsumed => "challenge_consumed",
            Self::MaxAttemptsExceeded => "max_attempts_exceeded",
            Self::InvalidCode => "invalid_code",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::IdentifierTaken => "identifier_taken",
            Self::PasswordPolicy(_) => "password_policy",
            Self::Hashing(_) => "hashing_error",
            Self::Verification(_) => "verification_error",
            Self::Contention(_) => "contention",
            Self::Storage(_) => "storage_error",
        }
    }
}

/// What the presentation layer gets to see. It maps these onto transport
/// responses (401, 403, 409, 422, 500 for HTTP).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("conflict")]
    Conflict,

    #[error("password policy violated: {}", DisplayRules(.0))]
    PolicyViolation(Vec<PasswordPolicyRule>),

    #[error("internal error")]
    Internal,
}

impl From<AuthError> for AuthFailure {
    fn from(err: AuthError) -> Self {
        err.classify()
    }
}

struct DisplayRules<'a>(&'a [PasswordPolicyRule]);

impl fmt::Display for DisplayRules<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, rule) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{rule}")?;
        }
        Ok(())
    }
}
