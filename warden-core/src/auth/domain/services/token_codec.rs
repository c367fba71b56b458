use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::auth::crypto::CryptoError;
use crate::auth::domain::value_objects::RefreshToken;
use crate::auth::error::AuthError;
use crate::auth::policy::TokenPolicy;
use crate::rbac::RoleSet;

pub const ACCESS_TOKEN_TYPE: &str = "access";

/// Claims carried by an access token.
///
/// Roles travel as plain names so a token minted with a role this build does
/// not know still decodes; [`AccessClaims::role_set`] drops the unknown ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub typ: String,
    pub iss: String,
    pub jti: Uuid,
}

impl AccessClaims {
    pub fn role_set(&self) -> RoleSet {
        RoleSet::from_names(&self.roles)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}

/// Freshly signed access token together with what went into it.
#[derive(Debug, Clone)]
pub struct SignedAccessToken {
    pub token: String,
    pub claims: AccessClaims,
    pub expires_at: DateTime<Utc>,
}

struct KeyEntry {
    kid: String,
    decoding: DecodingKey,
}

/// Signs and verifies access tokens (HS256 JWT) and mints opaque refresh
/// tokens.
///
/// Verification is pure: it needs only the key material held here and the
/// caller's `now`. Signing always uses the active key; retired keys stay
/// around for verification while tokens signed with them age out.
pub struct TokenCodec {
    active_kid: String,
    encoding: EncodingKey,
    keys: Vec<KeyEntry>,
    access_ttl: chrono::Duration,
    issuer: String,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("active_kid", &self.active_kid)
            .field(
                "verification_kids",
                &self.keys.iter().map(|k| k.kid.as_str()).collect::<Vec<_>>(),
            )
            .field("access_ttl", &self.access_ttl)
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl TokenCodec {
    pub fn new(signing_key: impl AsRef<[u8]>, policy: &TokenPolicy) -> Result<Self, CryptoError> {
        let secret = signing_key.as_ref();
        if secret.is_empty() {
            return Err(CryptoError::EmptyTokenKey);
        }

        let kid = key_id(secret);
        Ok(Self {
            active_kid: kid.clone(),
            encoding: EncodingKey::from_secret(secret),
            keys: vec![KeyEntry {
                kid,
                decoding: DecodingKey::from_secret(secret),
            }],
            access_ttl: policy.access_ttl,
            issuer: policy.issuer.clone(),
        })
    }

    /// Accept tokens signed with a previous key. Never used for signing.
    pub fn with_retired_key(mut self, key: impl AsRef<[u8]>) -> Result<Self, CryptoError> {
        let secret = key.as_ref();
        if secret.is_empty() {
            return Err(CryptoError::EmptyTokenKey);
        }

        let kid = key_id(secret);
        if !self.keys.iter().any(|entry| entry.kid == kid) {
            self.keys.push(KeyEntry {
                kid,
                decoding: DecodingKey::from_secret(secret),
            });
        }
        Ok(self)
    }

    pub fn active_key_id(&self) -> &str {
        &self.active_kid
    }

    pub fn issue_access_token(
        &self,
        subject_id: Uuid,
        roles: &RoleSet,
        now: DateTime<Utc>,
    ) -> Result<SignedAccessToken, AuthError> {
        let expires_at = now + self.access_ttl;
        let claims = AccessClaims {
            sub: subject_id,
            roles: roles.names(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            typ: ACCESS_TOKEN_TYPE.to_string(),
            iss: self.issuer.clone(),
            jti: Uuid::now_v7(),
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.active_kid.clone());

        let token = encode(&header, &claims, &self.encoding)
            .map_err(|err| AuthError::Hashing(err.to_string()))?;

        Ok(SignedAccessToken {
            token,
            claims,
            expires_at,
        })
    }

    /// Verify signature, structure and expiry against `now`.
    pub fn verify_access_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessClaims, AuthError> {
        let header = decode_header(token).map_err(|err| {
            debug!(error = %err, "access token header unreadable");
            AuthError::MalformedToken
        })?;

        if header.alg != Algorithm::HS256 {
            return Err(AuthError::InvalidSignature);
        }

        let key = match header.kid.as_deref() {
            Some(kid) => self
                .keys
                .iter()
                .find(|entry| entry.kid == kid)
                .ok_or(AuthError::InvalidSignature)?,
            None => return Err(AuthError::MalformedToken),
        };

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is judged against the injected clock below.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let data = decode::<AccessClaims>(token, &key.decoding, &validation)
            .map_err(|err| match err.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName
                | ErrorKind::InvalidKeyFormat => AuthError::InvalidSignature,
                _ => AuthError::MalformedToken,
            })?;

        let claims = data.claims;
        if claims.typ != ACCESS_TOKEN_TYPE || claims.iss != self.issuer {
            return Err(AuthError::MalformedToken);
        }
        if now.timestamp() >= claims.exp {
            return Err(AuthError::ExpiredToken);
        }

        Ok(claims)
    }

    /// Mint an opaque refresh token. Carries no claims; roles are resolved
    /// from the identity at refresh time.
    pub fn issue_refresh_token(
        &self,
        subject_id: Uuid,
        family_id: Uuid,
        generation: u32,
        now: DateTime<Utc>,
    ) -> Result<RefreshToken, AuthError> {
        RefreshToken::generate(subject_id, family_id, generation, now)
            .map_err(|err| AuthError::Hashing(err.to_string()))
    }
}

fn key_id(secret: &[u8]) -> String {
    let digest = Sha256::digest(secret);
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::Role;
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use chrono::Duration;

    fn codec() -> TokenCodec {
        TokenCodec::new("test-signing-key", &TokenPolicy::default()).unwrap()
    }

    #[test]
    fn round_trips_claims() {
        let codec = codec();
        let now = Utc::now();
        let subject = Uuid::now_v7();
        let roles = RoleSet::from([Role::Admin, Role::User]);

        let signed = codec.issue_access_token(subject, &roles, now).unwrap();
        let claims = codec.verify_access_token(&signed.token, now).unwrap();

        assert_eq!(claims.sub, subject);
        assert_eq!(claims.role_set(), roles);
        assert_eq!(claims.typ, "access");
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let codec = codec();
        let issued = Utc::now();
        let ttl = TokenPolicy::default().access_ttl;
        let signed = codec
            .issue_access_token(Uuid::now_v7(), &RoleSet::new(), issued)
            .unwrap();

        let just_before = issued + ttl - Duration::seconds(1);
        assert!(codec.verify_access_token(&signed.token, just_before).is_ok());

        let just_after = issued + ttl + Duration::seconds(1);
        assert!(matches!(
            codec.verify_access_token(&signed.token, just_after),
            Err(AuthError::ExpiredToken)
        ));
    }

    #[test]
    fn tampered_claims_fail_signature() {
        let codec = codec();
        let now = Utc::now();
        let roles = RoleSet::from([Role::User]);
        let signed = codec
            .issue_access_token(Uuid::now_v7(), &roles, now)
            .unwrap();

        let mut parts: Vec<String> = signed.token.split('.').map(str::to_string).collect();
        let mut claims = signed.claims.clone();
        claims.roles = vec!["admin".into()];
        parts[1] = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let forged = parts.join(".");

        assert!(matches!(
            codec.verify_access_token(&forged, now),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = codec();
        for token in ["", "abc", "a.b.c", "....."] {
            assert!(matches!(
                codec.verify_access_token(token, Utc::now()),
                Err(AuthError::MalformedToken)
            ));
        }
    }

    #[test]
    fn foreign_key_fails_signature() {
        let now = Utc::now();
        let other = TokenCodec::new("another-key", &TokenPolicy::default())
            .unwrap()
            .issue_access_token(Uuid::now_v7(), &RoleSet::new(), now)
            .unwrap();

        assert!(matches!(
            codec().verify_access_token(&other.token, now),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn retired_keys_still_verify() {
        let now = Utc::now();
        let old = TokenCodec::new("old-key", &TokenPolicy::default()).unwrap();
        let signed = old
            .issue_access_token(Uuid::now_v7(), &RoleSet::new(), now)
            .unwrap();

        let rotated = TokenCodec::new("new-key", &TokenPolicy::default())
            .unwrap()
            .with_retired_key("old-key")
            .unwrap();
        assert!(rotated.verify_access_token(&signed.token, now).is_ok());
        assert_ne!(rotated.active_key_id(), old.active_key_id());
    }

    #[test]
    fn issuer_mismatch_is_rejected() {
        let now = Utc::now();
        let policy = TokenPolicy {
            issuer: "someone-else".into(),
            ..TokenPolicy::default()
        };
        let foreign = TokenCodec::new("test-signing-key", &policy)
            .unwrap()
            .issue_access_token(Uuid::now_v7(), &RoleSet::new(), now)
            .unwrap();

        assert!(matches!(
            codec().verify_access_token(&foreign.token, now),
            Err(AuthError::MalformedToken)
        ));
    }

    #[test]
    fn refresh_tokens_carry_no_claims() {
        let subject = Uuid::now_v7();
        let family = Uuid::now_v7();
        let token = codec()
            .issue_refresh_token(subject, family, 1, Utc::now())
            .unwrap();
        assert!(RefreshToken::validate_format(token.as_str()).is_ok());
        assert!(!token.as_str().contains('.'));
        assert_eq!(token.family_id(), family);
    }
}
