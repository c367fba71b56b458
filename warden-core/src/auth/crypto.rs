use std::fmt;

use argon2::{
    Algorithm, Argon2, Params, ParamsBuilder, Version,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
};
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use password_hash::Error as PasswordHashError;
use rand::{TryRngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("password pepper must not be empty")]
    EmptyPasswordPepper,
    #[error("token digest key must not be empty")]
    EmptyTokenKey,
    #[error("invalid Argon2 parameters: {0}")]
    InvalidArgon2Params(String),
    #[error("hashing failed: {0}")]
    Hashing(String),
    #[error("stored hash could not be verified: {0}")]
    Verification(String),
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HasherParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HasherParams {
    /// ~64 MiB and 3 passes, a solid baseline for servers without dedicated
    /// tuning.
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl HasherParams {
    /// Cheapest parameters Argon2 accepts. Only for tests.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn build(&self) -> Result<Params, CryptoError> {
        ParamsBuilder::new()
            .m_cost(self.memory_kib)
            .t_cost(self.iterations)
            .p_cost(self.parallelism)
            .output_len(32)
            .build()
            .map_err(|err| CryptoError::InvalidArgon2Params(err.to_string()))
    }
}

/// One-way, salted, peppered hashing of user secrets (passwords, PINs).
///
/// Output is a PHC string so parameters travel with the hash and can be
/// upgraded later without invalidating stored credentials.
pub struct CredentialHasher {
    argon2: Argon2<'static>,
    params: HasherParams,
    pepper: Zeroizing<Vec<u8>>,
    dummy_hash: String,
}

impl fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialHasher")
            .field("params", &self.params)
            .field("pepper", &"<redacted>")
            .finish()
    }
}

impl CredentialHasher {
    const SALT_LENGTH: usize = password_hash::Salt::RECOMMENDED_LENGTH;

    pub fn new(pepper: impl AsRef<[u8]>, params: HasherParams) -> Result<Self, CryptoError> {
        let pepper = pepper.as_ref();
        if pepper.is_empty() {
            return Err(CryptoError::EmptyPasswordPepper);
        }

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::default(), params.build()?);

        let mut hasher = Self {
            argon2,
            params,
            pepper: Zeroizing::new(pepper.to_vec()),
            dummy_hash: String::new(),
        };

        // Login for unknown identifiers verifies against this so both paths
        // pay the same Argon2 cost.
        let mut filler = Zeroizing::new([0u8; 32]);
        OsRng
            .try_fill_bytes(&mut filler[..])
            .map_err(|err| CryptoError::Hashing(err.to_string()))?;
        hasher.dummy_hash = hasher.hash(&filler[..])?;

        Ok(hasher)
    }

    pub fn params(&self) -> HasherParams {
        self.params
    }

    /// Hash a secret with a fresh random salt. Any byte sequence is accepted.
    pub fn hash(&self, secret: impl AsRef<[u8]>) -> Result<String, CryptoError> {
        let material = self.peppered(secret.as_ref());

        let mut salt_bytes = [0u8; Self::SALT_LENGTH];
        OsRng
            .try_fill_bytes(&mut salt_bytes)
            .map_err(|err| CryptoError::Hashing(err.to_string()))?;
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|err| CryptoError::Hashing(err.to_string()))?;

        let hash = self
            .argon2
            .hash_password(&material, &salt)
            .map_err(|err| CryptoError::Hashing(err.to_string()))?
            .to_string();
        Ok(hash)
    }

    /// Verify a secret against a stored PHC string.
    ///
    /// A mismatch is `Ok(false)`; only a stored value that cannot be parsed
    /// or evaluated is an error. The digest comparison inside the Argon2
    /// verifier is constant time.
    pub fn verify(&self, secret: impl AsRef<[u8]>, stored_hash: &str) -> Result<bool, CryptoError> {
        let parsed = PasswordHash::new(stored_hash)
            .map_err(|err| CryptoError::Verification(err.to_string()))?;
        let material = self.peppered(secret.as_ref());

        match self.argon2.verify_password(&material, &parsed) {
            Ok(()) => Ok(true),
            Err(PasswordHashError::Password) => Ok(false),
            Err(err) => Err(CryptoError::Verification(err.to_string())),
        }
    }

    /// Burn one verification worth of work without a real stored hash.
    pub fn verify_dummy(&self, secret: impl AsRef<[u8]>) {
        let _ = self.verify(secret, &self.dummy_hash);
    }

    /// Whether a stored hash was produced with weaker parameters than the
    /// ones currently configured.
    pub fn needs_rehash(&self, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        let Ok(stored) = Params::try_from(&parsed) else {
            return false;
        };

        stored.m_cost() < self.params.memory_kib
            || stored.t_cost() < self.params.iterations
            || stored.p_cost() < self.params.parallelism
    }

    fn peppered(&self, secret: &[u8]) -> Zeroizing<Vec<u8>> {
        let capacity = secret.len() + self.pepper.len();
        let mut material = Zeroizing::new(Vec::with_capacity(capacity));
        material.extend_from_slice(secret);
        material.extend_from_slice(&self.pepper);
        material
    }
}

/// Keyed digest for opaque bearer values (refresh tokens, OTP codes) before
/// they are persisted. Only digests ever reach storage.
#[derive(Clone)]
pub struct TokenDigester {
    mac: HmacSha256,
}

impl fmt::Debug for TokenDigester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenDigester").finish_non_exhaustive()
    }
}

impl TokenDigester {
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, CryptoError> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(CryptoError::EmptyTokenKey);
        }

        let mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|_| CryptoError::EmptyTokenKey)?;
        Ok(Self { mac })
    }

    /// HMAC-SHA-256 of a single token, hex encoded.
    pub fn digest(&self, token: &str) -> String {
        self.digest_parts(&[token.as_bytes()])
    }

    /// HMAC-SHA-256 over several length-prefixed parts, hex encoded. Binding
    /// context (subject, purpose) into the digest keeps a value from one
    /// context from matching in another.
    pub fn digest_parts(&self, parts: &[&[u8]]) -> String {
        let mut mac = self.mac.clone();
        for part in parts {
            mac.update(&(part.len() as u64).to_be_bytes());
            mac.update(part);
        }
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Constant-time equality for stored digests.
pub fn digests_match(left: &str, right: &str) -> bool {
    let left = left.as_bytes();
    let right = right.as_bytes();

    if left.len() != right.len() {
        return false;
    }

    constant_time_eq(left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine, engine::general_purpose::STANDARD_NO_PAD};

    fn hasher() -> CredentialHasher {
        CredentialHasher::new("pepper", HasherParams::insecure_fast()).unwrap()
    }

    #[test]
    fn hashes_secrets_and_verifies() {
        let hasher = hasher();
        let hash = hasher.hash("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse", &hash).unwrap());
        assert!(!hasher.verify("battery staple", &hash).unwrap());
    }

    #[test]
    fn same_secret_hashes_differently() {
        let hasher = hasher();
        let first = hasher.hash("repeatable").unwrap();
        let second = hasher.hash("repeatable").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn accepts_arbitrary_bytes() {
        let hasher = hasher();
        let secret = [0u8, 159, 146, 150, 255];
        let hash = hasher.hash(secret).unwrap();
        assert!(hasher.verify(secret, &hash).unwrap());
    }

    #[test]
    fn flipped_digest_bit_fails_verification() {
        let hasher = hasher();
        let hash = hasher.hash("tamper me").unwrap();

        // PHC layout: $argon2id$v=19$m=..,t=..,p=..$<salt>$<digest>
        let (prefix, digest) = hash.rsplit_once('$').unwrap();
        let raw = STANDARD_NO_PAD.decode(digest).unwrap();

        for bit in [0usize, 7, 100, raw.len() * 8 - 1] {
            let mut mutated = raw.clone();
            mutated[bit / 8] ^= 1 << (bit % 8);
            let tampered = format!("{prefix}${}", STANDARD_NO_PAD.encode(&mutated));
            assert!(!hasher.verify("tamper me", &tampered).unwrap());
        }
    }

    #[test]
    fn malformed_stored_hash_is_an_error() {
        let hasher = hasher();
        assert!(matches!(
            hasher.verify("anything", "not-a-phc-string"),
            Err(CryptoError::Verification(_))
        ));
    }

    #[test]
    fn pepper_changes_outcome() {
        let hash = hasher().hash("secret").unwrap();
        let other =
            CredentialHasher::new("other-pepper", HasherParams::insecure_fast()).unwrap();
        assert!(!other.verify("secret", &hash).unwrap());
    }

    #[test]
    fn detects_weaker_parameters() {
        let weak = hasher();
        let hash = weak.hash("secret").unwrap();
        let strong = CredentialHasher::new(
            "pepper",
            HasherParams {
                memory_kib: 16,
                iterations: 2,
                parallelism: 1,
            },
        )
        .unwrap();
        assert!(strong.needs_rehash(&hash));
        assert!(!weak.needs_rehash(&hash));
    }

    #[test]
    fn digests_tokens_to_hex() {
        let digester = TokenDigester::new("token-key").unwrap();
        let digest = digester.digest("opaque-token");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(digests_match(&digest, &digester.digest("opaque-token")));
        assert!(!digests_match(&digest, &digester.digest("opaque-tokem")));
    }

    #[test]
    fn part_boundaries_are_significant() {
        let digester = TokenDigester::new("token-key").unwrap();
        assert_ne!(
            digester.digest_parts(&[b"ab", b"c"]),
            digester.digest_parts(&[b"a", b"bc"])
        );
    }

    #[test]
    fn rejects_empty_inputs() {
        assert!(matches!(
            CredentialHasher::new("", HasherParams::insecure_fast()),
            Err(CryptoError::EmptyPasswordPepper)
        ));
        assert!(matches!(
            TokenDigester::new(""),
            Err(CryptoError::EmptyTokenKey)
        ));
    }
}
