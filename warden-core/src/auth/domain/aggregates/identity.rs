use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::domain::events::AuthEvent;
use crate::auth::policy::LockoutPolicy;
use crate::rbac::RoleSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    Active,
    Locked,
}

impl IdentityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Locked => "locked",
        }
    }
}

impl fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "locked" => Ok(Self::Locked),
            other => Err(format!("unknown identity status: {other}")),
        }
    }
}

/// Identity aggregate
///
/// Owns the credential hash, assigned roles and lock state of one account.
/// Mutations record domain events which the orchestrator drains with
/// [`Identity::take_events`] after persisting.
#[derive(Debug, Clone)]
pub struct Identity {
    id: Uuid,

    /// Login identifier (username or email), unique across identities
    identifier: String,

    /// PHC-formatted Argon2id hash
    credential_hash: String,

    roles: RoleSet,

    status: IdentityStatus,

    /// Consecutive failed logins since the last success or unlock
    failed_login_attempts: u32,

    /// When a lockout lapses; `None` while locked means indefinitely
    locked_until: Option<DateTime<Utc>>,

    last_login: Option<DateTime<Utc>>,

    created_at: DateTime<Utc>,

    updated_at: DateTime<Utc>,

    /// Stored revision this copy was read at; saves are conditional on it
    version: u64,

    events: Vec<AuthEvent>,
}

impl Identity {
    pub fn new(
        identifier: impl Into<String>,
        credential_hash: String,
        roles: RoleSet,
        now: DateTime<Utc>,
    ) -> Self {
        let id = Uuid::now_v7();
        Self {
            id,
            identifier: identifier.into(),
            credential_hash,
            roles,
            status: IdentityStatus::Active,
            failed_login_attempts: 0,
            locked_until: None,
            last_login: None,
            created_at: now,
            updated_at: now,
            version: 0,
            events: vec![AuthEvent::IdentityRegistered {
                subject_id: id,
                timestamp: now,
            }],
        }
    }

    /// Rehydrate from persisted storage
    #[allow(clippy::too_many_arguments)]
    pub fn hydrate(
        id: Uuid,
        identifier: String,
        credential_hash: String,
        roles: RoleSet,
        status: IdentityStatus,
        failed_login_attempts: u32,
        locked_until: Option<DateTime<Utc>>,
        last_login: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            id,
            identifier,
            credential_hash,
            roles,
            status,
            failed_login_attempts,
            locked_until,
            last_login,
            created_at,
            updated_at,
            version,
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn credential_hash(&self) -> &str {
        &self.credential_hash
    }

    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    pub fn status(&self) -> IdentityStatus {
        self.status
    }

    pub fn failed_login_attempts(&self) -> u32 {
        self.failed_login_attempts
    }

    pub fn locked_until(&self) -> Option<DateTime<Utc>> {
        self.locked_until
    }

    pub fn last_login(&self) -> Option<DateTime<Utc>> {
        self.last_login
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Move to the revision a successful conditional save stored.
    pub fn advance_version(&mut self) {
        self.version = self.version.saturating_add(1);
    }

    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.locked_until) {
            (IdentityStatus::Active, _) => false,
            (IdentityStatus::Locked, None) => true,
            (IdentityStatus::Locked, Some(until)) => now < until,
        }
    }

    /// Lift a timed lock whose deadline has passed. Returns whether anything
    /// changed.
    pub fn clear_lapsed_lock(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == IdentityStatus::Locked
            && let Some(until) = self.locked_until
            && now >= until
        {
            self.status = IdentityStatus::Active;
            self.locked_until = None;
            self.failed_login_attempts = 0;
            self.updated_at = now;
            self.add_event(AuthEvent::AccountUnlocked {
                subject_id: self.id,
                timestamp: now,
            });
            return true;
        }
        false
    }

    /// Count a failed login, locking the identity once the policy ceiling is
    /// reached. Returns whether this failure caused the lock.
    pub fn record_failed_login(&mut self, policy: &LockoutPolicy, now: DateTime<Utc>) -> bool {
        self.failed_login_attempts = self.failed_login_attempts.saturating_add(1);
        self.updated_at = now;

        if policy.max_failed_logins > 0
            && self.failed_login_attempts >= policy.max_failed_logins
        {
            let until = now + policy.lockout_duration;
            self.status = IdentityStatus::Locked;
            self.locked_until = Some(until);
            self.add_event(AuthEvent::AccountLocked {
                subject_id: self.id,
                locked_until: Some(until),
                timestamp: now,
            });
            return true;
        }
        false
    }

    pub fn record_successful_login(&mut self, now: DateTime<Utc>) {
        self.failed_login_attempts = 0;
        self.last_login = Some(now);
        self.updated_at = now;
    }

    /// Replace the credential after a user-visible password change.
    pub fn change_credential(&mut self, hash: String, now: DateTime<Utc>) {
        self.credential_hash = hash;
        self.updated_at = now;
        self.add_event(AuthEvent::PasswordChanged {
            subject_id: self.id,
            timestamp: now,
        });
    }

    /// Swap in a hash of the same secret produced with stronger parameters.
    pub fn upgrade_credential_hash(&mut self, hash: String, now: DateTime<Utc>) {
        self.credential_hash = hash;
        self.updated_at = now;
    }

    pub fn set_roles(&mut self, roles: RoleSet, now: DateTime<Utc>) {
        if self.roles == roles {
            return;
        }
        self.roles = roles;
        self.updated_at = now;
        self.add_event(AuthEvent::RolesChanged {
            subject_id: self.id,
            roles: self.roles.clone(),
            timestamp: now,
        });
    }

    /// Administrative lock. `until = None` locks until explicitly unlocked.
    pub fn lock(&mut self, until: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        self.status = IdentityStatus::Locked;
        self.locked_until = until;
        self.updated_at = now;
        self.add_event(AuthEvent::AccountLocked {
            subject_id: self.id,
            locked_until: until,
            timestamp: now,
        });
    }

    pub fn unlock(&mut self, now: DateTime<Utc>) {
        if self.status == IdentityStatus::Active
            && self.failed_login_attempts == 0
        {
            return;
        }
        self.status = IdentityStatus::Active;
        self.locked_until = None;
        self.failed_login_attempts = 0;
        self.updated_at = now;
        self.add_event(AuthEvent::AccountUnlocked {
            subject_id: self.id,
            timestamp: now,
        });
    }

    pub fn take_events(&mut self) -> Vec<AuthEvent> {
        std::mem::take(&mut self.events)
    }

    fn add_event(&mut self, event: AuthEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::Role;
    use chrono::Duration;

    fn identity(now: DateTime<Utc>) -> Identity {
        let mut identity = Identity::new(
            "ada@example.com",
            "$argon2id$stub".into(),
            RoleSet::from([Role::User]),
            now,
        );
        identity.take_events();
        identity
    }

    #[test]
    fn locks_after_policy_ceiling() {
        let now = Utc::now();
        let policy = LockoutPolicy {
            max_failed_logins: 3,
            lockout_duration: Duration::minutes(10),
        };
        let mut identity = identity(now);

        assert!(!identity.record_failed_login(&policy, now));
        assert!(!identity.record_failed_login(&policy, now));
        assert!(identity.record_failed_login(&policy, now));

        assert!(identity.is_locked_at(now + Duration::minutes(9)));
        assert!(!identity.is_locked_at(now + Duration::minutes(10)));
        assert!(matches!(
            identity.take_events().as_slice(),
            [AuthEvent::AccountLocked { .. }]
        ));
    }

    #[test]
    fn lapsed_lock_clears_itself() {
        let now = Utc::now();
        let mut identity = identity(now);
        identity.lock(Some(now + Duration::minutes(1)), now);

        assert!(!identity.clear_lapsed_lock(now));
        assert!(identity.clear_lapsed_lock(now + Duration::minutes(1)));
        assert_eq!(identity.status(), IdentityStatus::Active);
        assert_eq!(identity.failed_login_attempts(), 0);
    }

    #[test]
    fn indefinite_lock_needs_explicit_unlock() {
        let now = Utc::now();
        let mut identity = identity(now);
        identity.lock(None, now);

        let much_later = now + Duration::days(365);
        assert!(!identity.clear_lapsed_lock(much_later));
        assert!(identity.is_locked_at(much_later));

        identity.unlock(much_later);
        assert!(!identity.is_locked_at(much_later));
    }

    #[test]
    fn success_resets_failure_counter() {
        let now = Utc::now();
        let mut identity = identity(now);
        identity.record_failed_login(&LockoutPolicy::default(), now);
        identity.record_successful_login(now);
        assert_eq!(identity.failed_login_attempts(), 0);
        assert_eq!(identity.last_login(), Some(now));
    }
}
