use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::SagaId;
use tokio::sync::RwLock;

use crate::Result;
use crate::record::SagaRecord;
use crate::status::SagaStatus;

/// Persistence port for saga snapshots.
#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Saves a saga snapshot, replacing any previous one with the same ID.
    async fn save(&self, record: &SagaRecord) -> Result<()>;

    /// Retrieves a saga snapshot by ID.
    async fn get(&self, id: SagaId) -> Result<Option<SagaRecord>>;

    /// Returns all sagas currently in the given status.
    async fn get_by_status(&self, status: SagaStatus) -> Result<Vec<SagaRecord>>;

    /// Returns non-terminal sagas with no activity for longer than
    /// `timeout`, oldest first. These are candidates for operator
    /// attention or recovery.
    async fn get_expired(&self, timeout: Duration) -> Result<Vec<SagaRecord>>;

    /// Deletes a saga snapshot. Returns true if one existed.
    async fn delete(&self, id: SagaId) -> Result<bool>;
}

/// In-memory saga repository for testing.
#[derive(Clone, Default)]
pub struct InMemorySagaRepository {
    sagas: Arc<RwLock<HashMap<SagaId, SagaRecord>>>,
}

impl InMemorySagaRepository {
    /// Creates a new empty in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of sagas stored.
    pub async fn saga_count(&self) -> usize {
        self.sagas.read().await.len()
    }
}

#[async_trait]
impl SagaRepository for InMemorySagaRepository {
    async fn save(&self, record: &SagaRecord) -> Result<()> {
        self.sagas.write().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: SagaId) -> Result<Option<SagaRecord>> {
        Ok(self.sagas.read().await.get(&id).cloned())
    }

    async fn get_by_status(&self, status: SagaStatus) -> Result<Vec<SagaRecord>> {
        let sagas = self.sagas.read().await;
        let mut matching: Vec<_> = sagas
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        Ok(matching)
    }

    async fn get_expired(&self, timeout: Duration) -> Result<Vec<SagaRecord>> {
        let cutoff = Utc::now() - timeout;
        let sagas = self.sagas.read().await;
        let mut expired: Vec<_> = sagas
            .values()
            .filter(|r| !r.status.is_terminal() && r.last_activity_at() < cutoff)
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.last_activity_at());
        Ok(expired)
    }

    async fn delete(&self, id: SagaId) -> Result<bool> {
        Ok(self.sagas.write().await.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: SagaStatus) -> SagaRecord {
        SagaRecord {
            id: SagaId::new(),
            name: "order-fulfillment".to_string(),
            status,
            data: serde_json::json!({}),
            created_at: Utc::now(),
            completed_at: None,
            last_updated_at: None,
            steps: vec![],
        }
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let repo = InMemorySagaRepository::new();
        let rec = record(SagaStatus::Running);

        repo.save(&rec).await.unwrap();
        let loaded = repo.get(rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, rec.id);
        assert_eq!(loaded.status, SagaStatus::Running);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_snapshot() {
        let repo = InMemorySagaRepository::new();
        let mut rec = record(SagaStatus::Running);
        repo.save(&rec).await.unwrap();

        rec.status = SagaStatus::Completed;
        repo.save(&rec).await.unwrap();

        let loaded = repo.get(rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SagaStatus::Completed);
        assert_eq!(repo.saga_count().await, 1);
    }

    #[tokio::test]
    async fn test_get_by_status() {
        let repo = InMemorySagaRepository::new();
        repo.save(&record(SagaStatus::Running)).await.unwrap();
        repo.save(&record(SagaStatus::Running)).await.unwrap();
        repo.save(&record(SagaStatus::Completed)).await.unwrap();

        assert_eq!(
            repo.get_by_status(SagaStatus::Running).await.unwrap().len(),
            2
        );
        assert_eq!(
            repo.get_by_status(SagaStatus::Failed).await.unwrap().len(),
            0
        );
    }

    #[tokio::test]
    async fn test_expired_selects_stale_non_terminal_sagas() {
        let repo = InMemorySagaRepository::new();

        let mut stale = record(SagaStatus::Running);
        stale.created_at = Utc::now() - Duration::hours(2);
        repo.save(&stale).await.unwrap();

        let mut stale_terminal = record(SagaStatus::Completed);
        stale_terminal.created_at = Utc::now() - Duration::hours(2);
        repo.save(&stale_terminal).await.unwrap();

        repo.save(&record(SagaStatus::Running)).await.unwrap();

        let expired = repo.get_expired(Duration::hours(1)).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = InMemorySagaRepository::new();
        let rec = record(SagaStatus::Running);
        repo.save(&rec).await.unwrap();

        assert!(repo.delete(rec.id).await.unwrap());
        assert!(!repo.delete(rec.id).await.unwrap());
        assert!(repo.get(rec.id).await.unwrap().is_none());
    }
}
