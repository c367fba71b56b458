use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::clock::{Clock, SystemClock};
use crate::auth::crypto::{CredentialHasher, CryptoError, TokenDigester};
use crate::auth::domain::aggregates::Identity;
use crate::auth::domain::events::AuthEvent;
use crate::auth::domain::repositories::{
    AuthEventRepository, IdentityRepository, NotificationPayload, NotificationPurpose,
    NotificationService, OtpChallengeRepository, TokenFamilyRepository,
};
use crate::auth::domain::value_objects::{OtpPurpose, RefreshToken, RevocationReason};
use crate::auth::error::{AuthError, AuthFailure};
use crate::auth::infrastructure::repositories::LoggingNotificationService;
use crate::auth::policy::{AuthPolicy, LockoutPolicy, PasswordPolicy};
use crate::rbac::{Role, RoleSet};

use super::access_guard::{AccessGuard, Principal};
use super::otp_engine::OtpEngine;
use super::session_store::{IssuedRefresh, RotationOutcome, SessionStore};
use super::token_codec::TokenCodec;

/// Upper bound on conditional identity writes for one operation. Every lost
/// write means another operation on the same identity committed.
const MAX_IDENTITY_WRITE_ATTEMPTS: usize = 8;

/// Signed access token handed to a client.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub access_token: String,
    pub subject_id: Uuid,
    pub roles: RoleSet,
    pub expires_at: DateTime<Utc>,
}

/// Access token plus the refresh token that continues the session.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub access: AccessGrant,
    pub refresh_token: RefreshToken,
    pub family_id: Uuid,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RefreshGrant {
    /// Normal rotation: the client must replace its stored refresh token.
    Rotated(SessionGrant),
    /// Retry of a rotation that already happened. Only a new access token is
    /// issued; the client keeps the refresh token it received the first time.
    Replayed(AccessGrant),
}

impl RefreshGrant {
    pub fn access(&self) -> &AccessGrant {
        match self {
            Self::Rotated(session) => &session.access,
            Self::Replayed(access) => access,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceBuildError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("{0} repository was not configured")]
    MissingRepository(&'static str),
}

/// Collects the collaborators for an [`AuthenticationService`].
pub struct AuthenticationServiceBuilder {
    policy: AuthPolicy,
    password_pepper: Vec<u8>,
    digest_key: Vec<u8>,
    signing_key: Vec<u8>,
    retired_signing_keys: Vec<Vec<u8>>,
    identities: Option<Arc<dyn IdentityRepository>>,
    families: Option<Arc<dyn TokenFamilyRepository>>,
    challenges: Option<Arc<dyn OtpChallengeRepository>>,
    notifier: Option<Arc<dyn NotificationService>>,
    events: Option<Arc<dyn AuthEventRepository>>,
    clock: Option<Arc<dyn Clock>>,
}

impl fmt::Debug for AuthenticationServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationServiceBuilder")
            .field("policy", &self.policy)
            .field("retired_signing_keys", &self.retired_signing_keys.len())
            .field("identities", &self.identities.is_some())
            .field("families", &self.families.is_some())
            .field("challenges", &self.challenges.is_some())
            .finish_non_exhaustive()
    }
}

impl AuthenticationServiceBuilder {
    pub fn new(
        policy: AuthPolicy,
        password_pepper: impl AsRef<[u8]>,
        digest_key: impl AsRef<[u8]>,
        signing_key: impl AsRef<[u8]>,
    ) -> Self {
        Self {
            policy,
            password_pepper: password_pepper.as_ref().to_vec(),
            digest_key: digest_key.as_ref().to_vec(),
            signing_key: signing_key.as_ref().to_vec(),
            retired_signing_keys: Vec::new(),
            identities: None,
            families: None,
            challenges: None,
            notifier: None,
            events: None,
            clock: None,
        }
    }

    pub fn identities(mut self, repo: Arc<dyn IdentityRepository>) -> Self {
        self.identities = Some(repo);
        self
    }

    pub fn families(mut self, repo: Arc<dyn TokenFamilyRepository>) -> Self {
        self.families = Some(repo);
        self
    }

    pub fn challenges(mut self, repo: Arc<dyn OtpChallengeRepository>) -> Self {
        self.challenges = Some(repo);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationService>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn events(mut self, repo: Arc<dyn AuthEventRepository>) -> Self {
        self.events = Some(repo);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Keep verifying access tokens signed with an older key.
    pub fn retired_signing_key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.retired_signing_keys.push(key.as_ref().to_vec());
        self
    }

    pub fn build(self) -> Result<AuthenticationService, ServiceBuildError> {
        let identities = self
            .identities
            .ok_or(ServiceBuildError::MissingRepository("identity"))?;
        let families = self
            .families
            .ok_or(ServiceBuildError::MissingRepository("token family"))?;
        let challenges = self
            .challenges
            .ok_or(ServiceBuildError::MissingRepository("otp challenge"))?;

        let hasher = CredentialHasher::new(&self.password_pepper, self.policy.hasher)?;
        let digester = Arc::new(TokenDigester::new(&self.digest_key)?);

        let mut codec = TokenCodec::new(&self.signing_key, &self.policy.token)?;
        for key in &self.retired_signing_keys {
            codec = codec.with_retired_key(key)?;
        }
        let codec = Arc::new(codec);

        Ok(AuthenticationService {
            identities,
            sessions: SessionStore::new(
                families,
                codec.clone(),
                digester.clone(),
                self.policy.token.clone(),
            ),
            otp: OtpEngine::new(challenges, digester, self.policy.otp),
            guard: AccessGuard::new(codec.clone()),
            codec,
            hasher,
            notifier: self
                .notifier
                .unwrap_or_else(|| Arc::new(LoggingNotificationService)),
            event_repo: self.events,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            lockout: self.policy.lockout,
            password_policy: self.policy.password,
        })
    }
}

/// Auth orchestrator: register, login, refresh, logout, OTP and the
/// request-boundary guards.
///
/// Every public operation returns [`AuthFailure`]. The detailed
/// [`AuthError`] behind it is logged here and goes no further.
pub struct AuthenticationService {
    identities: Arc<dyn IdentityRepository>,
    sessions: SessionStore,
    otp: OtpEngine,
    guard: AccessGuard,
    codec: Arc<TokenCodec>,
    hasher: CredentialHasher,
    notifier: Arc<dyn NotificationService>,
    event_repo: Option<Arc<dyn AuthEventRepository>>,
    clock: Arc<dyn Clock>,
    lockout: LockoutPolicy,
    password_policy: PasswordPolicy,
}

impl fmt::Debug for AuthenticationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationService")
            .field("identity_repo_refs", &Arc::strong_count(&self.identities))
            .field("sessions", &self.sessions)
            .field("otp", &self.otp)
            .field("codec", &self.codec)
            .field("hasher", &self.hasher)
            .field(
                "event_repo_refs",
                &self.event_repo.as_ref().map(Arc::strong_count),
            )
            .field("clock", &self.clock)
            .field("lockout", &self.lockout)
            .finish()
    }
}

impl AuthenticationService {
    pub fn access_guard(&self) -> &AccessGuard {
        &self.guard
    }

    pub async fn register(
        &self,
        identifier: &str,
        secret: &str,
        roles: RoleSet,
    ) -> Result<Identity, AuthFailure> {
        self.register_inner(identifier, secret, roles)
            .await
            .map_err(|err| self.coalesce("register", err))
    }

    pub async fn login(&self, identifier: &str, secret: &str) -> Result<SessionGrant, AuthFailure> {
        self.login_inner(identifier, secret)
            .await
            .map_err(|err| self.coalesce("login", err))
    }

    pub async fn refresh(
        &self,
        presented_refresh_token: &str,
    ) -> Result<RefreshGrant, AuthFailure> {
        self.refresh_inner(presented_refresh_token)
            .await
            .map_err(|err| self.coalesce("refresh", err))
    }

    /// End one session. Unknown or already revoked families are a no-op.
    pub async fn logout(&self, family_id: Uuid) -> Result<(), AuthFailure> {
        self.revoke_family(family_id, RevocationReason::UserLogout)
            .await
            .map_err(|err| self.coalesce("logout", err))
    }

    /// Administrative end of one session.
    pub async fn revoke_session(&self, family_id: Uuid) -> Result<(), AuthFailure> {
        self.revoke_family(family_id, RevocationReason::AdminAction)
            .await
            .map_err(|err| self.coalesce("revoke_session", err))
    }

    /// Change the secret and end every session of the subject.
    pub async fn change_password(
        &self,
        subject_id: Uuid,
        current_secret: &str,
        new_secret: &str,
    ) -> Result<(), AuthFailure> {
        self.change_password_inner(subject_id, current_secret, new_secret)
            .await
            .map_err(|err| self.coalesce("change_password", err))
    }

    /// Lock an identity (indefinitely when `until` is `None`) and end its
    /// sessions.
    pub async fn lock_identity(
        &self,
        subject_id: Uuid,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), AuthFailure> {
        self.lock_identity_inner(subject_id, until)
            .await
            .map_err(|err| self.coalesce("lock_identity", err))
    }

    pub async fn unlock_identity(&self, subject_id: Uuid) -> Result<(), AuthFailure> {
        self.unlock_identity_inner(subject_id)
            .await
            .map_err(|err| self.coalesce("unlock_identity", err))
    }

    /// Replace the roles of an identity. Takes effect at the next refresh;
    /// access tokens already issued keep their snapshot until they expire.
    pub async fn set_roles(&self, subject_id: Uuid, roles: RoleSet) -> Result<(), AuthFailure> {
        self.set_roles_inner(subject_id, roles)
            .await
            .map_err(|err| self.coalesce("set_roles", err))
    }

    /// Issue a code and hand it to the notification service. Returns when
    /// the code expires.
    pub async fn request_otp(
        &self,
        subject_id: Uuid,
        purpose: OtpPurpose,
    ) -> Result<DateTime<Utc>, AuthFailure> {
        self.request_otp_inner(subject_id, purpose)
            .await
            .map_err(|err| self.coalesce("request_otp", err))
    }

    pub async fn verify_otp(
        &self,
        subject_id: Uuid,
        purpose: OtpPurpose,
        code: &str,
    ) -> Result<(), AuthFailure> {
        let now = self.clock.now();
        match self.otp.verify(subject_id, purpose, code, now).await {
            Ok(()) => {
                self.publish_events(vec![AuthEvent::OtpVerified {
                    subject_id,
                    purpose,
                    timestamp: now,
                }])
                .await;
                Ok(())
            }
            Err(err) => {
                if err.classify() == AuthFailure::Unauthorized {
                    self.publish_events(vec![AuthEvent::OtpFailed {
                        subject_id,
                        purpose,
                        reason: err.reason().to_string(),
                        timestamp: now,
                    }])
                    .await;
                }
                Err(self.coalesce("verify_otp", err))
            }
        }
    }

    /// Verify an access token and, when `required_role` is set, that it
    /// carries that role.
    pub fn require_auth(
        &self,
        access_token: &str,
        required_role: Option<Role>,
    ) -> Result<Principal, AuthFailure> {
        self.guard
            .require_auth(access_token, required_role, self.clock.now())
            .map_err(|err| self.coalesce("require_auth", err))
    }

    pub fn require_role(&self, access_token: &str, role: Role) -> Result<Principal, AuthFailure> {
        self.guard
            .require_role(access_token, role, self.clock.now())
            .map_err(|err| self.coalesce("require_role", err))
    }

    pub fn require_any_role(
        &self,
        access_token: &str,
        roles: &RoleSet,
    ) -> Result<Principal, AuthFailure> {
        self.guard
            .require_any_role(access_token, roles, self.clock.now())
            .map_err(|err| self.coalesce("require_any_role", err))
    }

    async fn register_inner(
        &self,
        identifier: &str,
        secret: &str,
        roles: RoleSet,
    ) -> Result<Identity, AuthError> {
        let check = self.password_policy.check(secret);
        if !check.is_satisfied() {
            return Err(AuthError::PasswordPolicy(check.failures));
        }

        let now = self.clock.now();
        let hash = self.hasher.hash(secret)?;
        let mut identity = Identity::new(identifier, hash, roles, now);

        if !self.identities.insert(&identity).await? {
            return Err(AuthError::IdentifierTaken);
        }

        info!(subject_id = %identity.id(), "registered identity");
        self.publish_events(identity.take_events()).await;
        Ok(identity)
    }

    async fn login_inner(&self, identifier: &str, secret: &str) -> Result<SessionGrant, AuthError> {
        let now = self.clock.now();

        let Some(mut identity) = self.identities.find_by_identifier(identifier).await? else {
            self.hasher.verify_dummy(secret);
            self.publish_login_failure(None, "unknown_identifier", now).await;
            return Err(AuthError::InvalidCredentials);
        };
        let subject_id = identity.id();

        if identity.clear_lapsed_lock(now) {
            debug!(%subject_id, "lapsed lock cleared at login");
        }
        if identity.is_locked_at(now) {
            self.hasher.verify_dummy(secret);
            self.publish_login_failure(Some(subject_id), "identity_locked", now).await;
            return Err(AuthError::InvalidCredentials);
        }

        let verified_hash = identity.credential_hash().to_string();
        let verified = self.hasher.verify(secret, &verified_hash)?;
        let upgraded = if verified && self.hasher.needs_rehash(&verified_hash) {
            Some(self.hasher.hash(secret)?)
        } else {
            None
        };

        let written = self
            .update_identity(identity, |identity| {
                identity.clear_lapsed_lock(now);
                if identity.credential_hash() != verified_hash || identity.is_locked_at(now) {
                    return Err(AuthError::InvalidCredentials);
                }
                if !verified {
                    return Ok(identity.record_failed_login(&self.lockout, now));
                }
                identity.record_successful_login(now);
                if let Some(hash) = &upgraded {
                    identity.upgrade_credential_hash(hash.clone(), now);
                    debug!(%subject_id, "upgraded credential hash");
                }
                Ok(false)
            })
            .await;

        let (mut identity, locked) = match written {
            Ok(written) => written,
            Err(AuthError::InvalidCredentials) => {
                debug!(%subject_id, "credential or lock state changed during login");
                self.publish_login_failure(Some(subject_id), "identity_changed", now).await;
                return Err(AuthError::InvalidCredentials);
            }
            Err(err) => return Err(err),
        };

        if !verified {
            if locked {
                warn!(
                    %subject_id,
                    attempts = identity.failed_login_attempts(),
                    "identity locked after repeated login failures"
                );
            }

            let mut events = identity.take_events();
            events.push(AuthEvent::LoginFailed {
                subject_id: Some(subject_id),
                reason: "invalid_secret".to_string(),
                timestamp: now,
            });
            self.publish_events(events).await;
            return Err(AuthError::InvalidCredentials);
        }

        let issued = self.sessions.create_family(subject_id, now).await?;
        let family_id = issued.family.id;

        // A password change or lock that landed after our save revoked the
        // subject's families before this one existed.
        let current = self.identities.find_by_id(subject_id).await?;
        let intact = current.is_some_and(|current| {
            current.credential_hash() == identity.credential_hash() && !current.is_locked_at(now)
        });
        if !intact {
            warn!(%subject_id, %family_id, "identity changed while login was starting a session");
            self.revoke_family(family_id, RevocationReason::IdentityUnavailable).await?;
            self.publish_login_failure(Some(subject_id), "identity_changed", now).await;
            return Err(AuthError::InvalidCredentials);
        }

        let grant = self.session_grant(&identity, issued, now)?;

        let alert = self
            .notifier
            .send(
                subject_id,
                NotificationPurpose::LoginAlert,
                NotificationPayload::LoginAlert {
                    family_id,
                    occurred_at: now,
                },
            )
            .await;
        if let Err(err) = alert {
            warn!(%subject_id, error = %err, "login alert could not be delivered");
        }

        info!(%subject_id, %family_id, "login succeeded");

        let mut events = identity.take_events();
        events.push(AuthEvent::LoginSucceeded {
            subject_id,
            family_id,
            timestamp: now,
        });
        self.publish_events(events).await;

        Ok(grant)
    }

    async fn refresh_inner(&self, presented: &str) -> Result<RefreshGrant, AuthError> {
        let now = self.clock.now();

        // Resolve the subject before rotating so a failure here leaves the
        // presented token current.
        let family = self.sessions.find_presented(presented).await?;
        let identity = match self.identities.find_by_id(family.subject_id).await? {
            Some(identity) if !identity.is_locked_at(now) => identity,
            _ => {
                warn!(
                    subject_id = %family.subject_id,
                    family_id = %family.id,
                    "refresh for missing or locked identity; revoking family"
                );
                self.revoke_family(family.id, RevocationReason::IdentityUnavailable).await?;
                return Err(AuthError::Unauthorized);
            }
        };

        let outcome = match self.sessions.rotate(presented, now).await {
            Ok(outcome) => outcome,
            Err(AuthError::TokenReuseDetected { family_id }) => {
                self.record_reuse(family_id, now).await;
                return Err(AuthError::TokenReuseDetected { family_id });
            }
            Err(err) => return Err(err),
        };
        let family_id = outcome.family().id;

        match outcome {
            RotationOutcome::Rotated(issued) => {
                let generation = issued.family.generation;
                let grant = self.session_grant(&identity, issued, now)?;
                self.publish_events(vec![AuthEvent::SessionRefreshed {
                    subject_id: identity.id(),
                    family_id,
                    generation,
                    timestamp: now,
                }])
                .await;
                Ok(RefreshGrant::Rotated(grant))
            }
            RotationOutcome::Replayed(_) => {
                let access = self.access_grant(&identity, now)?;
                self.publish_events(vec![AuthEvent::RefreshReplayed {
                    subject_id: identity.id(),
                    family_id,
                    timestamp: now,
                }])
                .await;
                Ok(RefreshGrant::Replayed(access))
            }
        }
    }

    async fn change_password_inner(
        &self,
        subject_id: Uuid,
        current_secret: &str,
        new_secret: &str,
    ) -> Result<(), AuthError> {
        let now = self.clock.now();
        let identity = self.load_identity(subject_id).await?;

        let verified_hash = identity.credential_hash().to_string();
        if !self.hasher.verify(current_secret, &verified_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        let check = self.password_policy.check(new_secret);
        if !check.is_satisfied() {
            return Err(AuthError::PasswordPolicy(check.failures));
        }

        let hash = self.hasher.hash(new_secret)?;
        let (mut identity, ()) = self
            .update_identity(identity, |identity| {
                if identity.credential_hash() != verified_hash {
                    return Err(AuthError::InvalidCredentials);
                }
                identity.change_credential(hash.clone(), now);
                Ok(())
            })
            .await?;

        let mut events = identity.take_events();
        let reason = RevocationReason::PasswordChange;
        events.extend(self.revoke_subject(subject_id, reason, now).await?);
        self.publish_events(events).await;

        info!(%subject_id, "password changed; sessions revoked");
        Ok(())
    }

    async fn lock_identity_inner(
        &self,
        subject_id: Uuid,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), AuthError> {
        let now = self.clock.now();
        let identity = self.load_identity(subject_id).await?;
        let (mut identity, ()) = self
            .update_identity(identity, |identity| {
                identity.lock(until, now);
                Ok(())
            })
            .await?;

        let mut events = identity.take_events();
        let reason = RevocationReason::AdminAction;
        events.extend(self.revoke_subject(subject_id, reason, now).await?);
        self.publish_events(events).await;

        info!(%subject_id, ?until, "identity locked");
        Ok(())
    }

    async fn unlock_identity_inner(&self, subject_id: Uuid) -> Result<(), AuthError> {
        let now = self.clock.now();
        let identity = self.load_identity(subject_id).await?;
        let (mut identity, ()) = self
            .update_identity(identity, |identity| {
                identity.unlock(now);
                Ok(())
            })
            .await?;
        self.publish_events(identity.take_events()).await;

        info!(%subject_id, "identity unlocked");
        Ok(())
    }

    async fn set_roles_inner(&self, subject_id: Uuid, roles: RoleSet) -> Result<(), AuthError> {
        let now = self.clock.now();
        let identity = self.load_identity(subject_id).await?;
        let (mut identity, ()) = self
            .update_identity(identity, |identity| {
                identity.set_roles(roles.clone(), now);
                Ok(())
            })
            .await?;
        self.publish_events(identity.take_events()).await;

        info!(%subject_id, roles = %identity.roles(), "roles updated");
        Ok(())
    }

    async fn load_identity(&self, subject_id: Uuid) -> Result<Identity, AuthError> {
        self.identities
            .find_by_id(subject_id)
            .await?
            .ok_or(AuthError::Unauthorized)
    }

    /// Apply `change` and save conditionally, re-reading the identity and
    /// applying `change` again whenever another writer saved first. An error
    /// from `change` aborts without writing.
    async fn update_identity<T>(
        &self,
        mut identity: Identity,
        mut change: impl FnMut(&mut Identity) -> Result<T, AuthError> + Send,
    ) -> Result<(Identity, T), AuthError> {
        for _ in 0..MAX_IDENTITY_WRITE_ATTEMPTS {
            let outcome = change(&mut identity)?;
            if self.identities.save(&identity).await? {
                identity.advance_version();
                return Ok((identity, outcome));
            }

            debug!(subject_id = %identity.id(), "identity changed underneath; re-reading");
            identity = self.load_identity(identity.id()).await?;
        }

        Err(AuthError::Contention("identity"))
    }

    async fn publish_login_failure(
        &self,
        subject_id: Option<Uuid>,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        self.publish_events(vec![AuthEvent::LoginFailed {
            subject_id,
            reason: reason.to_string(),
            timestamp: now,
        }])
        .await;
    }

    async fn request_otp_inner(
        &self,
        subject_id: Uuid,
        purpose: OtpPurpose,
    ) -> Result<DateTime<Utc>, AuthError> {
        let now = self.clock.now();
        if self.identities.find_by_id(subject_id).await?.is_none() {
            return Err(AuthError::Unauthorized);
        }

        let issued = self.otp.issue(subject_id, purpose, now).await?;
        let expires_at = issued.expires_at;

        self.notifier
            .send(
                subject_id,
                NotificationPurpose::OneTimeCode(purpose),
                NotificationPayload::OneTimeCode {
                    code: issued.code,
                    expires_at,
                },
            )
            .await?;

        self.publish_events(vec![AuthEvent::OtpIssued {
            subject_id,
            purpose,
            expires_at,
            timestamp: now,
        }])
        .await;
        Ok(expires_at)
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: RevocationReason,
    ) -> Result<(), AuthError> {
        let now = self.clock.now();
        let revoked = self.sessions.revoke(family_id, reason, now).await?;
        if let Some(family) = revoked {
            self.publish_events(vec![AuthEvent::FamilyRevoked {
                subject_id: family.subject_id,
                family_id,
                reason,
                timestamp: now,
            }])
            .await;
        }
        Ok(())
    }

    async fn revoke_subject(
        &self,
        subject_id: Uuid,
        reason: RevocationReason,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuthEvent>, AuthError> {
        let revoked = self.sessions.revoke_subject(subject_id, reason, now).await?;
        Ok(revoked
            .into_iter()
            .map(|family_id| AuthEvent::FamilyRevoked {
                subject_id,
                family_id,
                reason,
                timestamp: now,
            })
            .collect())
    }

    async fn record_reuse(&self, family_id: Uuid, now: DateTime<Utc>) {
        let family = match self.sessions.find_family(family_id).await {
            Ok(Some(family)) => family,
            Ok(None) => return,
            Err(err) => {
                warn!(%family_id, error = %err, "could not load revoked family");
                return;
            }
        };

        self.publish_events(vec![
            AuthEvent::TokenReuseDetected {
                subject_id: family.subject_id,
                family_id,
                timestamp: now,
            },
            AuthEvent::FamilyRevoked {
                subject_id: family.subject_id,
                family_id,
                reason: RevocationReason::ReuseDetected,
                timestamp: now,
            },
        ])
        .await;
    }

    fn access_grant(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<AccessGrant, AuthError> {
        let signed = self.codec.issue_access_token(identity.id(), identity.roles(), now)?;
        Ok(AccessGrant {
            access_token: signed.token,
            subject_id: identity.id(),
            roles: identity.roles().clone(),
            expires_at: signed.expires_at,
        })
    }

    fn session_grant(
        &self,
        identity: &Identity,
        issued: IssuedRefresh,
        now: DateTime<Utc>,
    ) -> Result<SessionGrant, AuthError> {
        Ok(SessionGrant {
            access: self.access_grant(identity, now)?,
            family_id: issued.family.id,
            refresh_expires_at: issued.family.expires_at,
            refresh_token: issued.token,
        })
    }

    /// Log the detailed failure server-side and reduce it to what a caller
    /// may see.
    fn coalesce(&self, operation: &'static str, err: AuthError) -> AuthFailure {
        let failure = err.classify();
        match (&err, &failure) {
            (AuthError::TokenReuseDetected { family_id }, _) => warn!(
                operation,
                %family_id,
                reason = err.reason(),
                "refresh token reuse detected"
            ),
            (_, AuthFailure::Internal) => error!(
                operation,
                reason = err.reason(),
                error = %err,
                "auth operation failed"
            ),
            _ => info!(operation, reason = err.reason(), "auth request rejected"),
        }
        failure
    }

    /// Audit trail delivery is best effort; a failing sink never fails the
    /// flow that produced the events.
    async fn publish_events(&self, events: Vec<AuthEvent>) {
        if events.is_empty() {
            return;
        }
        if let Some(repo) = self.event_repo.as_ref()
            && let Err(err) = repo.record(events).await
        {
            warn!(error = %err, "failed to record auth events");
        }
    }
}
