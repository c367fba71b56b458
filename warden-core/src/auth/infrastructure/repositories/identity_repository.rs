use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::domain::aggregates::Identity;
use crate::auth::domain::repositories::IdentityRepository;

#[derive(Debug, Default)]
struct IdentityTable {
    by_id: HashMap<Uuid, Identity>,
    by_identifier: HashMap<String, Uuid>,
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryIdentityRepository {
    table: Arc<Mutex<IdentityTable>>,
}

#[async_trait]
impl IdentityRepository for InMemoryIdentityRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
        let guard = self.table.lock().await;
        Ok(guard.by_id.get(&id).cloned())
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Identity>> {
        let guard = self.table.lock().await;
        Ok(guard
            .by_identifier
            .get(identifier)
            .and_then(|id| guard.by_id.get(id))
            .cloned())
    }

    async fn insert(&self, identity: &Identity) -> Result<bool> {
        let mut guard = self.table.lock().await;
        if guard.by_identifier.contains_key(identity.identifier()) {
            return Ok(false);
        }
        guard
            .by_identifier
            .insert(identity.identifier().to_string(), identity.id());
        guard.by_id.insert(identity.id(), identity.clone());
        Ok(true)
    }

    async fn save(&self, identity: &Identity) -> Result<bool> {
        let mut guard = self.table.lock().await;
        let Some(stored) = guard.by_id.get_mut(&identity.id()) else {
            anyhow::bail!("identity {} does not exist", identity.id());
        };
        if stored.version() != identity.version() {
            return Ok(false);
        }

        let mut next = identity.clone();
        next.take_events();
        next.advance_version();
        *stored = next;
        Ok(true)
    }
}
