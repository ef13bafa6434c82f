//! Result-store collaborator seam.
//!
//! The scheduler calls [`ResultStore::store_result`] exactly once per
//! terminal job state. Storage failures are raised to the caller, which logs
//! them; the core never retries storage itself.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::result::{ScanResult, ScanStatus};

/// Result persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Duplicate terminal result for job {0}")]
    Duplicate(Uuid),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Completed/failed totals for queue statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreTotals {
    pub completed: u64,
    pub failed: u64,
}

/// Result persistence interface.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn store_result(&self, result: ScanResult) -> Result<(), StoreError>;
    async fn totals(&self) -> StoreTotals;
    async fn get(&self, job_id: Uuid) -> Option<ScanResult>;
}

/// In-memory store. Rejects duplicate terminal results so tests can assert
/// the exactly-once property.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    results: RwLock<HashMap<Uuid, ScanResult>>,
}

impl InMemoryResultStore {
    pub async fn len(&self) -> usize {
        self.results.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.results.read().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn store_result(&self, result: ScanResult) -> Result<(), StoreError> {
        let mut results = self.results.write().await;
        if results.contains_key(&result.job_id) {
            return Err(StoreError::Duplicate(result.job_id));
        }
        results.insert(result.job_id, result);
        Ok(())
    }

    async fn totals(&self) -> StoreTotals {
        let results = self.results.read().await;
        let mut totals = StoreTotals::default();
        for result in results.values() {
            match result.status {
                ScanStatus::Completed => totals.completed += 1,
                ScanStatus::Failed | ScanStatus::Timeout => totals.failed += 1,
            }
        }
        totals
    }

    async fn get(&self, job_id: Uuid) -> Option<ScanResult> {
        self.results.read().await.get(&job_id).cloned()
    }
}
