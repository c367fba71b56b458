use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use warden_core::auth::domain::aggregates::{Identity, OtpChallenge, TokenFamily};
use warden_core::auth::domain::events::AuthEvent;
use warden_core::auth::domain::repositories::{
    IdentityRepository, NotificationPayload, NotificationPurpose, NotificationService,
    OtpChallengeRepository, TokenFamilyRepository,
};
use warden_core::auth::domain::services::{AuthenticationService, AuthenticationServiceBuilder};
use warden_core::auth::domain::value_objects::OtpPurpose;
use warden_core::auth::infrastructure::repositories::{
    InMemoryAuthEventRepository, InMemoryOtpChallengeRepository,
};
use warden_core::auth::{AuthPolicy, Clock, HasherParams, ManualClock};
use warden_core::rbac::RoleSet;

use super::controlled::{ControlledFamilyRepository, ControlledIdentityRepository};

pub const TEST_IDENTIFIER: &str = "ada@example.com";
pub const TEST_SECRET: &str = "CorrectHorseBattery1!";

/// Argon2 at its cheapest so login-heavy tests stay fast.
pub fn test_policy() -> AuthPolicy {
    AuthPolicy {
        hasher: HasherParams::insecure_fast(),
        ..AuthPolicy::default()
    }
}

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub subject_id: Uuid,
    pub purpose: NotificationPurpose,
    pub payload: NotificationPayload,
}

/// Notification sink that keeps everything it is handed.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentNotification>>>,
}

impl RecordingNotifier {
    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }

    /// Plaintext of the most recent code delivered for `purpose`.
    pub async fn last_code(&self, subject_id: Uuid, purpose: OtpPurpose) -> Option<String> {
        self.sent.lock().await.iter().rev().find_map(|note| {
            match (&note.purpose, &note.payload) {
                (
                    NotificationPurpose::OneTimeCode(sent_for),
                    NotificationPayload::OneTimeCode { code, .. },
                ) if note.subject_id == subject_id && *sent_for == purpose => {
                    Some(code.as_str().to_string())
                }
                _ => None,
            }
        })
    }

    pub async fn login_alerts(&self, subject_id: Uuid) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|note| {
                note.subject_id == subject_id && note.purpose == NotificationPurpose::LoginAlert
            })
            .count()
    }
}

#[async_trait]
impl NotificationService for RecordingNotifier {
    async fn send(
        &self,
        subject_id: Uuid,
        purpose: NotificationPurpose,
        payload: NotificationPayload,
    ) -> Result<()> {
        self.sent.lock().await.push(SentNotification {
            subject_id,
            purpose,
            payload,
        });
        Ok(())
    }
}

/// End-to-end authentication harness over the in-memory adapters and a
/// manual clock. Identity and family storage sit behind controllable
/// wrappers that behave like plain in-memory storage until a test arms them.
pub struct TestAuthHarness {
    service: Arc<AuthenticationService>,
    clock: Arc<ManualClock>,
    notifier: RecordingNotifier,
    events: InMemoryAuthEventRepository,
    identities: ControlledIdentityRepository,
    families: ControlledFamilyRepository,
    challenges: InMemoryOtpChallengeRepository,
    policy: AuthPolicy,
}

impl TestAuthHarness {
    pub fn new() -> Result<Self> {
        Self::with_policy(test_policy())
    }

    pub fn with_policy(policy: AuthPolicy) -> Result<Self> {
        let clock = Arc::new(ManualClock::default());
        let notifier = RecordingNotifier::default();
        let events = InMemoryAuthEventRepository::default();
        let identities = ControlledIdentityRepository::default();
        let families = ControlledFamilyRepository::default();
        let challenges = InMemoryOtpChallengeRepository::default();

        let service = AuthenticationServiceBuilder::new(
            policy.clone(),
            "test-pepper",
            "test-digest-key",
            "test-signing-key",
        )
        .identities(Arc::new(identities.clone()))
        .families(Arc::new(families.clone()))
        .challenges(Arc::new(challenges.clone()))
        .notifier(Arc::new(notifier.clone()))
        .events(Arc::new(events.clone()))
        .clock(clock.clone())
        .build()
        .context("failed to build authentication service")?;

        Ok(Self {
            service: Arc::new(service),
            clock,
            notifier,
            events,
            identities,
            families,
            challenges,
            policy,
        })
    }

    pub fn auth(&self) -> &AuthenticationService {
        &self.service
    }

    /// Shared handle for tests that race the service across tasks.
    pub fn shared(&self) -> Arc<AuthenticationService> {
        self.service.clone()
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn notifier(&self) -> &RecordingNotifier {
        &self.notifier
    }

    pub async fn events(&self) -> Vec<AuthEvent> {
        self.events.events().await
    }

    pub fn identities(&self) -> &ControlledIdentityRepository {
        &self.identities
    }

    pub fn families(&self) -> &ControlledFamilyRepository {
        &self.families
    }

    pub async fn identity(&self, subject_id: Uuid) -> Result<Identity> {
        self.identities
            .find_by_id(subject_id)
            .await?
            .context("identity not found")
    }

    pub async fn family(&self, family_id: Uuid) -> Result<TokenFamily> {
        self.families
            .find_by_id(family_id)
            .await?
            .context("token family not found")
    }

    pub async fn challenge(&self, subject_id: Uuid, purpose: OtpPurpose) -> Result<OtpChallenge> {
        self.challenges
            .find(subject_id, purpose)
            .await?
            .context("otp challenge not found")
    }

    /// Register the standard test identity with `roles`.
    pub async fn register_user(&self, roles: RoleSet) -> Result<Uuid> {
        let identity = self.service.register(TEST_IDENTIFIER, TEST_SECRET, roles).await?;
        Ok(identity.id())
    }
}
