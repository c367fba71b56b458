use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use constant_time_eq::constant_time_eq;
use rand::{TryRngCore, rngs::OsRng};
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum RefreshTokenError {
    #[error("invalid token format")]
    InvalidFormat,
    #[error("token generation failed")]
    GenerationFailed,
}

/// Opaque refresh token plus the rotation metadata it was minted with.
///
/// The value is 32 random bytes, base64url without padding. Nothing about the
/// subject or roles is encoded in it; the server resolves everything from
/// the stored family.
#[derive(Clone)]
pub struct RefreshToken {
    value: Zeroizing<String>,
    subject_id: Uuid,
    family_id: Uuid,
    generation: u32,
    issued_at: DateTime<Utc>,
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshToken")
            .field("value", &"<redacted>")
            .field("subject_id", &self.subject_id)
            .field("family_id", &self.family_id)
            .field("generation", &self.generation)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

impl RefreshToken {
    pub const BYTE_LENGTH: usize = 32;

    pub fn generate(
        subject_id: Uuid,
        family_id: Uuid,
        generation: u32,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, RefreshTokenError> {
        let mut token_bytes = Zeroizing::new([0u8; Self::BYTE_LENGTH]);
        OsRng
            .try_fill_bytes(&mut token_bytes[..])
            .map_err(|_| RefreshTokenError::GenerationFailed)?;

        Ok(Self {
            value: Zeroizing::new(URL_SAFE_NO_PAD.encode(&token_bytes[..])),
            subject_id,
            family_id,
            generation,
            issued_at,
        })
    }

    /// Check that a presented value has the shape of a token this system
    /// mints. Says nothing about whether it was ever issued.
    pub fn validate_format(value: &str) -> Result<(), RefreshTokenError> {
        let decoded = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| RefreshTokenError::InvalidFormat)?;
        if decoded.len() != Self::BYTE_LENGTH {
            return Err(RefreshTokenError::InvalidFormat);
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn subject_id(&self) -> Uuid {
        self.subject_id
    }

    pub fn family_id(&self) -> Uuid {
        self.family_id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn secure_compare(&self, other: &str) -> bool {
        let self_bytes = self.value.as_bytes();
        let other_bytes = other.as_bytes();

        if self_bytes.len() != other_bytes.len() {
            return false;
        }

        constant_time_eq(self_bytes, other_bytes)
    }
}
