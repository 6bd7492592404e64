//! Store port: the versioned-document contract every backend implements.
//!
//! Design:
//! - One generic trait, written once. The engine never sees backend types,
//!   and the two item kinds share the whole contract instead of each backend
//!   growing its own near-duplicate query layer.
//! - The store owns filtering: eligibility predicates, ordering and limits
//!   run here. Callers never post-filter a wider read.
//! - The store owns the version token: `save` checks it and bumps it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{CronId, CronOccurrence, CronTicker, HolderId, TickerStatus, WorkItem};
use crate::error::StoreResult;

/// Half-open window `[from, until)` over ExecutionTime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueWindow {
    pub from: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl DueWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at < self.until
    }
}

/// Strict cutoffs for overdue detection, one per waiting status.
///
/// An item is overdue when its ExecutionTime is strictly before the cutoff
/// for its status. Cutoffs compare against ExecutionTime, not LockedAt: the
/// question is "how far past due", not "how stale is the lock".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverdueCutoffs {
    pub idle_before: DateTime<Utc>,
    pub queued_before: DateTime<Utc>,
}

/// Per-status tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    pub idle: usize,
    pub queued: usize,
    pub inprogress: usize,
    pub done: usize,
    pub due_done: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn bump(&mut self, status: TickerStatus) {
        *self.slot(status) += 1;
    }

    pub fn add(&mut self, status: TickerStatus, n: usize) {
        *self.slot(status) += n;
    }

    pub fn get(&self, status: TickerStatus) -> usize {
        match status {
            TickerStatus::Idle => self.idle,
            TickerStatus::Queued => self.queued,
            TickerStatus::Inprogress => self.inprogress,
            TickerStatus::Done => self.done,
            TickerStatus::DueDone => self.due_done,
            TickerStatus::Failed => self.failed,
            TickerStatus::Cancelled => self.cancelled,
        }
    }

    pub fn total(&self) -> usize {
        TickerStatus::ALL.iter().map(|s| self.get(*s)).sum()
    }

    fn slot(&mut self, status: TickerStatus) -> &mut usize {
        match status {
            TickerStatus::Idle => &mut self.idle,
            TickerStatus::Queued => &mut self.queued,
            TickerStatus::Inprogress => &mut self.inprogress,
            TickerStatus::Done => &mut self.done,
            TickerStatus::DueDone => &mut self.due_done,
            TickerStatus::Failed => &mut self.failed,
            TickerStatus::Cancelled => &mut self.cancelled,
        }
    }
}

/// Versioned document store for one work item kind.
#[async_trait]
pub trait WorkItemStore<T: WorkItem>: Send + Sync {
    /// Claim candidates: items due inside `window` with claim-eligible
    /// status, ordered by ExecutionTime ascending, at most `limit`.
    ///
    /// Eligible means `(Idle and unheld) or Queued` regardless of which
    /// holder stamped the Queued lock; the claim decision between acquire,
    /// steal and no-op belongs to the engine, not the store.
    async fn fetch_due(&self, window: DueWindow, limit: usize) -> StoreResult<Vec<T>>;

    /// Items past their grace cutoffs. Only Idle and Queued items can be
    /// overdue; everything else is never returned.
    async fn fetch_overdue(&self, cutoffs: OverdueCutoffs) -> StoreResult<Vec<T>>;

    /// Fetch by explicit id set. Missing ids are skipped, not errors.
    async fn fetch_by_ids(&self, ids: &[T::Id]) -> StoreResult<Vec<T>>;

    /// Everything `holder` currently holds (Queued or Inprogress).
    async fn fetch_by_holder(&self, holder: &HolderId) -> StoreResult<Vec<T>>;

    async fn fetch_by_status(&self, statuses: &[TickerStatus]) -> StoreResult<Vec<T>>;

    async fn get(&self, id: T::Id) -> StoreResult<Option<T>>;

    /// Insert new documents as given (fresh items carry version 1).
    async fn insert(&self, items: Vec<T>) -> StoreResult<()>;

    /// Guarded batch save. Every item's version must still match the stored
    /// one; on success all items are written with versions bumped by one and
    /// the authoritative copies come back. On any mismatch nothing is
    /// written and the whole batch fails with `VersionConflict`.
    async fn save(&self, items: Vec<T>) -> StoreResult<Vec<T>>;

    /// Per-status tallies for status views.
    async fn counts(&self) -> StoreResult<StatusCounts>;
}

/// Occurrence stores additionally index by parent definition, for orphan
/// cleanup when a definition disappears.
#[async_trait]
pub trait OccurrenceStore: WorkItemStore<CronOccurrence> {
    async fn fetch_by_parent(&self, cron_id: CronId) -> StoreResult<Vec<CronOccurrence>>;
}

/// Cron definition store. Definitions are bootstrap-managed configuration,
/// not claimable work, so they sit outside the versioned-item contract.
#[async_trait]
pub trait CronTickerStore: Send + Sync {
    async fn list(&self) -> StoreResult<Vec<CronTicker>>;

    /// Insert-or-replace by id.
    async fn upsert(&self, defs: Vec<CronTicker>) -> StoreResult<()>;

    async fn remove(&self, ids: &[CronId]) -> StoreResult<()>;
}
