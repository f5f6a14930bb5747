//! In-memory request-log store.
//!
//! Used for local development (`database.backend = "memory"`) and tests.
//! Writes can be made to fail or to take a fixed time, to exercise the
//! processor's failure and shutdown paths.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::audit::event::RequestLogRecord;
use crate::audit::store::{Page, RequestLogFilter, RequestLogStore, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryRequestLogStore {
    records: DashMap<Uuid, RequestLogRecord>,
    unavailable: AtomicBool,
    insert_delay_ms: AtomicU64,
}

impl InMemoryRequestLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `StoreError::Unavailable` until reset.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Delay applied before each insert commits.
    pub fn set_insert_delay(&self, delay: Duration) {
        self.insert_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of all records, oldest first.
    pub fn records(&self) -> Vec<RequestLogRecord> {
        let mut all: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|r| r.created_at);
        all
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store marked unavailable".into()))
        } else {
            Ok(())
        }
    }

    fn newest_first<F>(&self, keep: F, page: Page) -> Vec<RequestLogRecord>
    where
        F: Fn(&RequestLogRecord) -> bool,
    {
        let mut matching: Vec<_> = self
            .records
            .iter()
            .filter(|r| keep(r.value()))
            .map(|r| r.value().clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching
            .into_iter()
            .skip(page.skip as usize)
            .take(page.limit as usize)
            .collect()
    }
}

#[async_trait]
impl RequestLogStore for InMemoryRequestLogStore {
    async fn insert(&self, record: RequestLogRecord) -> Result<RequestLogRecord, StoreError> {
        self.check_available()?;

        let delay = self.insert_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        // Availability may have changed while the write was in flight.
        self.check_available()?;
        self.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn list(
        &self,
        filter: &RequestLogFilter,
        page: Page,
    ) -> Result<Vec<RequestLogRecord>, StoreError> {
        self.check_available()?;
        Ok(self.newest_first(|r| filter.matches(r), page))
    }

    async fn count(&self, filter: &RequestLogFilter) -> Result<u64, StoreError> {
        self.check_available()?;
        Ok(self.records.iter().filter(|r| filter.matches(r.value())).count() as u64)
    }

    async fn get(&self, id: Uuid) -> Result<Option<RequestLogRecord>, StoreError> {
        self.check_available()?;
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn list_by_resource(
        &self,
        resource_id: &str,
        page: Page,
    ) -> Result<Vec<RequestLogRecord>, StoreError> {
        self.check_available()?;
        Ok(self.newest_first(|r| r.resource_id.as_deref() == Some(resource_id), page))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.records.remove(&id).is_some())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
