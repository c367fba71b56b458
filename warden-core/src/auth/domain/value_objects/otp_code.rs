use std::fmt;

use rand::{TryRngCore, rngs::OsRng};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, Error)]
pub enum OtpCodeError {
    #[error("code length must be between {min} and {max} digits, got {got}")]
    InvalidLength { min: u8, max: u8, got: u8 },

    #[error("code generation failed")]
    GenerationFailed,
}

/// Plaintext one-time code. Exists only between generation and hand-off to
/// the notification collaborator; only its digest is stored.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct OtpCode(String);

impl fmt::Debug for OtpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OtpCode").field(&"<redacted>").finish()
    }
}

impl OtpCode {
    pub const MIN_LENGTH: u8 = 4;
    pub const MAX_LENGTH: u8 = 10;

    /// Draw `length` uniformly distributed decimal digits from the OS RNG.
    pub fn generate(length: u8) -> Result<Self, OtpCodeError> {
        if !(Self::MIN_LENGTH..=Self::MAX_LENGTH).contains(&length) {
            return Err(OtpCodeError::InvalidLength {
                min: Self::MIN_LENGTH,
                max: Self::MAX_LENGTH,
                got: length,
            });
        }

        let mut digits = String::with_capacity(length as usize);
        let mut pool = [0u8; 16];

        while digits.len() < length as usize {
            OsRng
                .try_fill_bytes(&mut pool)
                .map_err(|_| OtpCodeError::GenerationFailed)?;

            // 250 is the largest multiple of 10 below 256; anything at or
            // above it would bias the low digits.
            for byte in pool.iter().copied().filter(|b| *b < 250) {
                if digits.len() == length as usize {
                    break;
                }
                digits.push(char::from(b'0' + byte % 10));
            }
        }

        pool.zeroize();
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a presented value for comparison.
    pub fn presented(value: &str) -> Self {
        Self(value.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_numeric_codes_of_requested_length() {
        for length in [4u8, 6, 8, 10] {
            let code = OtpCode::generate(length).unwrap();
            assert_eq!(code.as_str().len(), length as usize);
            assert!(code.as_str().chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn rejects_unreasonable_lengths() {
        assert!(matches!(
            OtpCode::generate(2),
            Err(OtpCodeError::InvalidLength { got: 2, .. })
        ));
        assert!(OtpCode::generate(11).is_err());
    }

    #[test]
    fn digit_distribution_covers_every_digit() {
        let mut seen = [false; 10];
        for _ in 0..200 {
            let code = OtpCode::generate(10).unwrap();
            for c in code.as_str().bytes() {
                seen[(c - b'0') as usize] = true;
            }
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn presented_codes_are_trimmed() {
        assert_eq!(OtpCode::presented(" 123456\n").as_str(), "123456");
    }
}
