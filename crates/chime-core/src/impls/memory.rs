//! In-memory store implementation.
//!
//! Reference backend: the simplest thing that honors the versioned-document
//! contract. Tests lean on it, and the claim engine was written against it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{CronId, CronOccurrence, CronTicker, HolderId, TickerStatus, WorkItem};
use crate::error::{StoreError, StoreResult};
use crate::ports::{
    CronTickerStore, DueWindow, OccurrenceStore, OverdueCutoffs, StatusCounts, WorkItemStore,
};

/// In-memory work item store, generic over the item kind.
#[derive(Clone)]
pub struct InMemoryStore<T: WorkItem> {
    items: Arc<Mutex<HashMap<T::Id, T>>>,
}

impl<T: WorkItem> InMemoryStore<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: WorkItem> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Claim eligibility: Idle-and-unheld or Queued under any holder. The
/// acquire/steal/no-op decision is the engine's, not the store's.
fn is_claim_candidate<T: WorkItem>(item: &T) -> bool {
    match item.status() {
        TickerStatus::Idle => item.lock().is_none(),
        TickerStatus::Queued => true,
        _ => false,
    }
}

fn is_overdue<T: WorkItem>(item: &T, cutoffs: OverdueCutoffs) -> bool {
    match item.status() {
        TickerStatus::Idle => item.execution_time() < cutoffs.idle_before,
        TickerStatus::Queued => item.execution_time() < cutoffs.queued_before,
        _ => false,
    }
}

fn sorted_by_due<T: WorkItem>(mut items: Vec<T>) -> Vec<T> {
    items.sort_by_key(|item| (item.execution_time(), item.id()));
    items
}

#[async_trait]
impl<T: WorkItem> WorkItemStore<T> for InMemoryStore<T> {
    async fn fetch_due(&self, window: DueWindow, limit: usize) -> StoreResult<Vec<T>> {
        let items = self.items.lock().await;
        let mut due: Vec<T> = items
            .values()
            .filter(|item| is_claim_candidate(*item) && window.contains(item.execution_time()))
            .cloned()
            .collect();
        drop(items);

        due = sorted_by_due(due);
        due.truncate(limit);
        Ok(due)
    }

    async fn fetch_overdue(&self, cutoffs: OverdueCutoffs) -> StoreResult<Vec<T>> {
        let items = self.items.lock().await;
        let overdue: Vec<T> = items
            .values()
            .filter(|item| is_overdue(*item, cutoffs))
            .cloned()
            .collect();
        drop(items);

        Ok(sorted_by_due(overdue))
    }

    async fn fetch_by_ids(&self, ids: &[T::Id]) -> StoreResult<Vec<T>> {
        let items = self.items.lock().await;
        // Input order preserved; unknown ids silently skipped.
        Ok(ids.iter().filter_map(|id| items.get(id).cloned()).collect())
    }

    async fn fetch_by_holder(&self, holder: &HolderId) -> StoreResult<Vec<T>> {
        let items = self.items.lock().await;
        let held: Vec<T> = items
            .values()
            .filter(|item| item.status().is_held() && item.held_by(holder))
            .cloned()
            .collect();
        drop(items);

        Ok(sorted_by_due(held))
    }

    async fn fetch_by_status(&self, statuses: &[TickerStatus]) -> StoreResult<Vec<T>> {
        let items = self.items.lock().await;
        let matched: Vec<T> = items
            .values()
            .filter(|item| statuses.contains(&item.status()))
            .cloned()
            .collect();
        drop(items);

        Ok(sorted_by_due(matched))
    }

    async fn get(&self, id: T::Id) -> StoreResult<Option<T>> {
        let items = self.items.lock().await;
        Ok(items.get(&id).cloned())
    }

    async fn insert(&self, new: Vec<T>) -> StoreResult<()> {
        let mut items = self.items.lock().await;
        for item in &new {
            if items.contains_key(&item.id()) {
                return Err(StoreError::Duplicate(item.id().to_string()));
            }
        }
        for item in new {
            items.insert(item.id(), item);
        }
        Ok(())
    }

    async fn save(&self, batch: Vec<T>) -> StoreResult<Vec<T>> {
        let mut items = self.items.lock().await;

        // Verify the whole batch before touching anything: a guarded save is
        // all-or-nothing.
        for item in &batch {
            match items.get(&item.id()) {
                None => return Err(StoreError::NotFound(item.id().to_string())),
                Some(stored) if stored.version() != item.version() => {
                    return Err(StoreError::VersionConflict);
                }
                Some(_) => {}
            }
        }

        let mut saved = Vec::with_capacity(batch.len());
        for mut item in batch {
            item.lease_mut().version += 1;
            items.insert(item.id(), item.clone());
            saved.push(item);
        }
        Ok(saved)
    }

    async fn counts(&self) -> StoreResult<StatusCounts> {
        let items = self.items.lock().await;
        let mut counts = StatusCounts::default();
        for item in items.values() {
            counts.bump(item.status());
        }
        Ok(counts)
    }
}

#[async_trait]
impl OccurrenceStore for InMemoryStore<CronOccurrence> {
    async fn fetch_by_parent(&self, cron_id: CronId) -> StoreResult<Vec<CronOccurrence>> {
        let items = self.items.lock().await;
        let matched: Vec<CronOccurrence> = items
            .values()
            .filter(|occ| occ.cron_id == cron_id)
            .cloned()
            .collect();
        drop(items);

        Ok(sorted_by_due(matched))
    }
}

/// In-memory cron definition store.
#[derive(Clone, Default)]
pub struct InMemoryCronTickers {
    defs: Arc<Mutex<HashMap<CronId, CronTicker>>>,
}

impl InMemoryCronTickers {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CronTickerStore for InMemoryCronTickers {
    async fn list(&self) -> StoreResult<Vec<CronTicker>> {
        let defs = self.defs.lock().await;
        let mut all: Vec<CronTicker> = defs.values().cloned().collect();
        drop(defs);

        all.sort_by_key(|def| def.id);
        Ok(all)
    }

    async fn upsert(&self, new: Vec<CronTicker>) -> StoreResult<()> {
        let mut defs = self.defs.lock().await;
        for def in new {
            defs.insert(def.id, def);
        }
        Ok(())
    }

    async fn remove(&self, ids: &[CronId]) -> StoreResult<()> {
        let mut defs = self.defs.lock().await;
        for id in ids {
            defs.remove(id);
        }
        Ok(())
    }
}
