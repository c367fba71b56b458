//! Repository wrappers that let a test pause a write mid-flight or fail a
//! read, to interleave operations deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use warden_core::auth::domain::aggregates::{Identity, TokenFamily};
use warden_core::auth::domain::repositories::{IdentityRepository, TokenFamilyRepository};
use warden_core::auth::domain::value_objects::RevocationReason;
use warden_core::auth::infrastructure::repositories::{
    InMemoryIdentityRepository, InMemoryTokenFamilyRepository,
};

/// One-shot barrier. Once armed, the next caller to pass blocks until the
/// test opens the gate.
#[derive(Debug, Default)]
pub struct Gate {
    armed: AtomicBool,
    reached: Notify,
    released: Notify,
}

impl Gate {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Resolves once a caller is parked at the gate.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    pub fn open(&self) {
        self.released.notify_one();
    }

    async fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.released.notified().await;
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ControlledIdentityRepository {
    inner: InMemoryIdentityRepository,
    save_gate: Arc<Gate>,
    fail_next_lookup: Arc<AtomicBool>,
}

impl ControlledIdentityRepository {
    pub fn save_gate(&self) -> &Gate {
        &self.save_gate
    }

    /// Make the next `find_by_id` fail as if storage were down.
    pub fn fail_next_lookup(&self) {
        self.fail_next_lookup.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityRepository for ControlledIdentityRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
        if self.fail_next_lookup.swap(false, Ordering::SeqCst) {
            anyhow::bail!("identity storage unavailable");
        }
        self.inner.find_by_id(id).await
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Identity>> {
        self.inner.find_by_identifier(identifier).await
    }

    async fn insert(&self, identity: &Identity) -> Result<bool> {
        self.inner.insert(identity).await
    }

    async fn save(&self, identity: &Identity) -> Result<bool> {
        self.save_gate.pass().await;
        self.inner.save(identity).await
    }
}

#[derive(Clone, Debug, Default)]
pub struct ControlledFamilyRepository {
    inner: InMemoryTokenFamilyRepository,
    insert_gate: Arc<Gate>,
    inserted: Arc<Mutex<Vec<Uuid>>>,
}

impl ControlledFamilyRepository {
    pub fn insert_gate(&self) -> &Gate {
        &self.insert_gate
    }

    /// Ids of every family started so far, oldest first.
    pub async fn inserted(&self) -> Vec<Uuid> {
        self.inserted.lock().await.clone()
    }
}

#[async_trait]
impl TokenFamilyRepository for ControlledFamilyRepository {
    async fn insert(&self, family: &TokenFamily) -> Result<()> {
        self.insert_gate.pass().await;
        self.inner.insert(family).await?;
        self.inserted.lock().await.push(family.id);
        Ok(())
    }

    async fn find_by_id(&self, family_id: Uuid) -> Result<Option<TokenFamily>> {
        self.inner.find_by_id(family_id).await
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<TokenFamily>> {
        self.inner.find_by_token_hash(token_hash).await
    }

    async fn compare_and_rotate(
        &self,
        expected_current_hash: &str,
        next: &TokenFamily,
    ) -> Result<bool> {
        self.inner.compare_and_rotate(expected_current_hash, next).await
    }

    async fn revoke(
        &self,
        family_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Option<TokenFamily>> {
        self.inner.revoke(family_id, reason, at).await
    }

    async fn revoke_for_subject(
        &self,
        subject_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        self.inner.revoke_for_subject(subject_id, reason, at).await
    }
}
