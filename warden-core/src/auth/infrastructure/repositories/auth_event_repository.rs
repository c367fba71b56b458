use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::auth::domain::events::AuthEvent;
use crate::auth::domain::repositories::AuthEventRepository;

/// Append-only audit log kept in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryAuthEventRepository {
    events: Arc<Mutex<Vec<AuthEvent>>>,
}

impl InMemoryAuthEventRepository {
    /// Snapshot of everything recorded so far, oldest first.
    pub async fn events(&self) -> Vec<AuthEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl AuthEventRepository for InMemoryAuthEventRepository {
    async fn record(&self, events: Vec<AuthEvent>) -> Result<()> {
        self.events.lock().await.extend(events);
        Ok(())
    }
}
