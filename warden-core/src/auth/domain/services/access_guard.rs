use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::rbac::{self, Role, RoleSet};

use super::token_codec::TokenCodec;

/// Caller identity established from a verified access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject_id: Uuid,
    pub roles: RoleSet,
    pub token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl Principal {
    pub fn has_role(&self, role: Role) -> bool {
        rbac::authorize(&self.roles, role)
    }
}

/// Request-boundary checks. Stateless: token verification plus role
/// membership, no storage lookups.
#[derive(Debug, Clone)]
pub struct AccessGuard {
    codec: Arc<TokenCodec>,
}

impl AccessGuard {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec }
    }

    pub fn require_auth(
        &self,
        token: &str,
        required_role: Option<Role>,
        now: DateTime<Utc>,
    ) -> Result<Principal, AuthError> {
        let principal = self.authenticate(token, now)?;
        match required_role {
            Some(role) if !principal.has_role(role) => Err(AuthError::Forbidden),
            _ => Ok(principal),
        }
    }

    pub fn require_role(
        &self,
        token: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<Principal, AuthError> {
        self.require_auth(token, Some(role), now)
    }

    pub fn require_any_role(
        &self,
        token: &str,
        roles: &RoleSet,
        now: DateTime<Utc>,
    ) -> Result<Principal, AuthError> {
        let principal = self.authenticate(token, now)?;
        if rbac::authorize_any(&principal.roles, roles) {
            Ok(principal)
        } else {
            Err(AuthError::Forbidden)
        }
    }

    fn authenticate(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, AuthError> {
        let claims = self.codec.verify_access_token(token, now)?;
        let expires_at = claims.expires_at().ok_or(AuthError::MalformedToken)?;
        Ok(Principal {
            subject_id: claims.sub,
            roles: claims.role_set(),
            token_id: claims.jti,
            expires_at,
        })
    }
}
