use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::domain::aggregates::TokenFamily;
use crate::auth::domain::repositories::TokenFamilyRepository;
use crate::auth::domain::value_objects::RevocationReason;

#[derive(Debug, Default)]
struct FamilyTable {
    families: HashMap<Uuid, TokenFamily>,
    /// Every hash a family has held, current and superseded.
    by_hash: HashMap<String, Uuid>,
}

/// Single-lock family store. Each compare-and-rotate runs entirely under the
/// table lock, which is what makes it atomic.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTokenFamilyRepository {
    table: Arc<Mutex<FamilyTable>>,
}

#[async_trait]
impl TokenFamilyRepository for InMemoryTokenFamilyRepository {
    async fn insert(&self, family: &TokenFamily) -> Result<()> {
        let mut guard = self.table.lock().await;
        if guard.families.contains_key(&family.id) {
            anyhow::bail!("token family {} already exists", family.id);
        }
        guard.by_hash.insert(family.current_hash.clone(), family.id);
        if let Some(previous) = &family.previous_hash {
            guard.by_hash.insert(previous.clone(), family.id);
        }
        guard.families.insert(family.id, family.clone());
        Ok(())
    }

    async fn find_by_id(&self, family_id: Uuid) -> Result<Option<TokenFamily>> {
        let guard = self.table.lock().await;
        Ok(guard.families.get(&family_id).cloned())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<TokenFamily>> {
        let guard = self.table.lock().await;
        Ok(guard
            .by_hash
            .get(token_hash)
            .and_then(|id| guard.families.get(id))
            .cloned())
    }

    async fn compare_and_rotate(
        &self,
        expected_current_hash: &str,
        next: &TokenFamily,
    ) -> Result<bool> {
        let mut guard = self.table.lock().await;
        let Some(stored) = guard.families.get(&next.id) else {
            return Ok(false);
        };
        if stored.revoked || stored.current_hash != expected_current_hash {
            return Ok(false);
        }

        guard.by_hash.insert(next.current_hash.clone(), next.id);
        guard.families.insert(next.id, next.clone());
        Ok(true)
    }

    async fn revoke(
        &self,
        family_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Option<TokenFamily>> {
        let mut guard = self.table.lock().await;
        match guard.families.get_mut(&family_id) {
            Some(family) if !family.revoked => {
                family.revoke(reason, at);
                Ok(Some(family.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn revoke_for_subject(
        &self,
        subject_id: Uuid,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let mut guard = self.table.lock().await;
        let mut revoked = Vec::new();
        for family in guard.families.values_mut() {
            if family.subject_id == subject_id && !family.revoked {
                family.revoke(reason, at);
                revoked.push(family.id);
            }
        }
        Ok(revoked)
    }
}
