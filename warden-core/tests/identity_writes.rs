//! Writes to an identity that overlap a login in flight. A password change
//! or lock that commits first must survive the login's own write.

use anyhow::Result;
use futures::future::join_all;
use warden_core::auth::AuthFailure;
use warden_core::auth::domain::aggregates::IdentityStatus;
use warden_core::auth::domain::events::AuthEvent;
use warden_core::auth::domain::value_objects::RevocationReason;
use warden_core::rbac::{Role, RoleSet};

#[path = "support/mod.rs"]
mod support;

use support::auth::{TEST_IDENTIFIER, TEST_SECRET, TestAuthHarness, test_policy};

const NEW_SECRET: &str = "BatteryStapleHorse2?";

#[tokio::test]
async fn password_change_during_login_is_not_reverted() -> Result<()> {
    let harness = TestAuthHarness::new()?;
    let subject_id = harness.register_user(RoleSet::from([Role::User])).await?;
    let auth = harness.shared();

    harness.identities().save_gate().arm();
    let login = tokio::spawn({
        let auth = auth.clone();
        async move { auth.login(TEST_IDENTIFIER, TEST_SECRET).await }
    });
    harness.identities().save_gate().reached().await;

    auth.change_password(subject_id, TEST_SECRET, NEW_SECRET).await?;
    harness.identities().save_gate().open();

    assert_eq!(login.await?.unwrap_err(), AuthFailure::Unauthorized);
    assert!(harness.families().inserted().await.is_empty());

    assert_eq!(
        auth.login(TEST_IDENTIFIER, TEST_SECRET).await.unwrap_err(),
        AuthFailure::Unauthorized
    );
    auth.login(TEST_IDENTIFIER, NEW_SECRET).await?;

    assert!(harness.events().await.iter().any(|event| matches!(
        event,
        AuthEvent::LoginFailed { reason, .. } if reason == "identity_changed"
    )));
    Ok(())
}

#[tokio::test]
async fn lock_during_login_is_not_reverted() -> Result<()> {
    let harness = TestAuthHarness::new()?;
    let subject_id = harness.register_user(RoleSet::from([Role::User])).await?;
    let auth = harness.shared();

    harness.identities().save_gate().arm();
    let login = tokio::spawn({
        let auth = auth.clone();
        async move { auth.login(TEST_IDENTIFIER, TEST_SECRET).await }
    });
    harness.identities().save_gate().reached().await;

    auth.lock_identity(subject_id, None).await?;
    harness.identities().save_gate().open();

    assert_eq!(login.await?.unwrap_err(), AuthFailure::Unauthorized);

    let identity = harness.identity(subject_id).await?;
    assert_eq!(identity.status(), IdentityStatus::Locked);
    assert_eq!(identity.last_login(), None);
    Ok(())
}

#[tokio::test]
async fn password_change_while_login_starts_its_session_ends_that_session() -> Result<()> {
    let harness = TestAuthHarness::new()?;
    let subject_id = harness.register_user(RoleSet::from([Role::User])).await?;
    let auth = harness.shared();

    harness.families().insert_gate().arm();
    let login = tokio::spawn({
        let auth = auth.clone();
        async move { auth.login(TEST_IDENTIFIER, TEST_SECRET).await }
    });
    harness.families().insert_gate().reached().await;

    // The login already saved; this revokes nothing because its family does
    // not exist yet.
    auth.change_password(subject_id, TEST_SECRET, NEW_SECRET).await?;
    harness.families().insert_gate().open();

    assert_eq!(login.await?.unwrap_err(), AuthFailure::Unauthorized);

    let inserted = harness.families().inserted().await;
    assert_eq!(inserted.len(), 1);
    let family = harness.family(inserted[0]).await?;
    assert!(family.revoked);
    assert_eq!(family.revoked_reason, Some(RevocationReason::IdentityUnavailable));
    Ok(())
}

#[tokio::test]
async fn overlapping_logins_all_succeed() -> Result<()> {
    let harness = TestAuthHarness::new()?;
    let subject_id = harness.register_user(RoleSet::from([Role::User])).await?;
    let auth = harness.shared();

    harness.identities().save_gate().arm();
    let first = tokio::spawn({
        let auth = auth.clone();
        async move { auth.login(TEST_IDENTIFIER, TEST_SECRET).await }
    });
    harness.identities().save_gate().reached().await;

    let second = auth.login(TEST_IDENTIFIER, TEST_SECRET).await?;
    harness.identities().save_gate().open();
    let first = first.await??;

    assert_ne!(first.family_id, second.family_id);
    assert_eq!(harness.identity(subject_id).await?.version(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_failed_logins_are_all_counted() -> Result<()> {
    let mut policy = test_policy();
    policy.lockout.max_failed_logins = 10;
    let harness = TestAuthHarness::with_policy(policy)?;
    let subject_id = harness.register_user(RoleSet::from([Role::User])).await?;
    let auth = harness.shared();

    let attempts = 4;
    let handles = (0..attempts)
        .map(|_| {
            let auth = auth.clone();
            tokio::spawn(async move { auth.login(TEST_IDENTIFIER, "not the secret").await })
        })
        .collect::<Vec<_>>();

    for joined in join_all(handles).await {
        assert_eq!(joined?.unwrap_err(), AuthFailure::Unauthorized);
    }

    let identity = harness.identity(subject_id).await?;
    assert_eq!(identity.failed_login_attempts(), attempts);
    assert_eq!(identity.status(), IdentityStatus::Active);
    Ok(())
}
