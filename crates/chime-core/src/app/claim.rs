//! Claim engine: acquire, steal and no-op decisions plus the guarded batch
//! save that makes them safe across a fleet.
//!
//! Design:
//! - One read, one write per cycle. Candidates come back from the store
//!   already filtered and limited; the engine only decides per item and
//!   submits the mutated ones as a single all-or-nothing batch.
//! - Losing the version race claims nothing and is not an error. The caller
//!   retries on its next tick; there are no retry loops in here.
//! - Cancellation is checked before the read, raced against the read, and
//!   checked once more before the save. Once the save is submitted it is
//!   awaited to completion, so no write is ever left in flight.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{HolderId, TickerStatus, WorkItem};
use crate::error::{EngineError, EngineResult, StoreError};
use crate::ports::{Clock, DueWindow, WorkItemStore};

/// Claim window around a target instant: `[target - look_back,
/// target + look_ahead)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimWindow {
    pub look_back: Duration,
    pub look_ahead: Duration,
}

impl Default for ClaimWindow {
    /// Protocol default: two seconds of look-back, one second of look-ahead.
    fn default() -> Self {
        Self {
            look_back: Duration::seconds(2),
            look_ahead: Duration::seconds(1),
        }
    }
}

impl ClaimWindow {
    pub fn around(&self, target: DateTime<Utc>) -> DueWindow {
        DueWindow {
            from: target - self.look_back,
            until: target + self.look_ahead,
        }
    }
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Ran inside its due window.
    OnTime,
    /// Ran, but was picked up past its due window.
    Late,
    /// Handler failed; the message lands in `last_error`.
    Failed(String),
}

impl Completion {
    fn target_status(&self) -> TickerStatus {
        match self {
            Completion::OnTime => TickerStatus::Done,
            Completion::Late => TickerStatus::DueDone,
            Completion::Failed(_) => TickerStatus::Failed,
        }
    }
}

/// Per-candidate claim decision.
enum ClaimDecision {
    /// Acquire an idle item, or steal a foreign Queued one.
    Take { stolen_from: Option<HolderId> },
    /// Queued under this holder already; leave the stamp alone.
    AlreadyOurs,
    /// Not claim-eligible (should not normally surface as a candidate).
    Ineligible,
}

fn decide<T: WorkItem>(item: &T, holder: &HolderId) -> ClaimDecision {
    match (item.status(), item.lock()) {
        (TickerStatus::Idle, None) => ClaimDecision::Take { stolen_from: None },
        (TickerStatus::Queued, Some(lock)) if lock.holder == *holder => ClaimDecision::AlreadyOurs,
        (TickerStatus::Queued, Some(lock)) => ClaimDecision::Take {
            stolen_from: Some(lock.holder.clone()),
        },
        _ => ClaimDecision::Ineligible,
    }
}

/// The claim/lease engine for one work item kind.
#[derive(Clone)]
pub struct ClaimEngine<T: WorkItem> {
    store: Arc<dyn WorkItemStore<T>>,
    clock: Arc<dyn Clock>,
    window: ClaimWindow,
}

impl<T: WorkItem> ClaimEngine<T> {
    pub fn new(store: Arc<dyn WorkItemStore<T>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            window: ClaimWindow::default(),
        }
    }

    pub fn with_window(mut self, window: ClaimWindow) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> ClaimWindow {
        self.window
    }

    /// Claim up to `batch` items due around `target` for `holder`.
    ///
    /// Returns the items now held by `holder`, freshly stamped. An empty
    /// result means nothing was eligible or the whole batch lost the version
    /// race; either way the caller just tries again next tick. Items already
    /// Queued under `holder` are left untouched and are not returned.
    pub async fn claim_due(
        &self,
        target: DateTime<Utc>,
        batch: usize,
        holder: &HolderId,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<T>> {
        if batch == 0 {
            return Err(EngineError::InvalidBatchSize);
        }
        self.check_holder(holder)?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let window = self.window.around(target);
        let candidates = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            fetched = self.store.fetch_due(window, batch) => fetched?,
        };

        let now = self.clock.now();
        let mut taken = Vec::new();
        for mut item in candidates {
            match decide(&item, holder) {
                ClaimDecision::Take { stolen_from } => {
                    if let Some(previous) = stolen_from {
                        debug!(
                            kind = T::KIND,
                            item = %item.id(),
                            from = %previous,
                            to = %holder,
                            "stealing queued item"
                        );
                    }
                    item.lease_mut().acquire(holder.clone(), now);
                    taken.push(item);
                }
                ClaimDecision::AlreadyOurs => {
                    debug!(kind = T::KIND, item = %item.id(), "already queued here, leaving stamp");
                }
                ClaimDecision::Ineligible => {
                    warn!(
                        kind = T::KIND,
                        item = %item.id(),
                        status = %item.status(),
                        "ineligible candidate surfaced by store"
                    );
                }
            }
        }

        if taken.is_empty() {
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        match self.store.save(taken).await {
            Ok(saved) => {
                info!(
                    kind = T::KIND,
                    holder = %holder,
                    claimed = saved.len(),
                    "claimed batch"
                );
                Ok(saved)
            }
            Err(StoreError::VersionConflict) => {
                debug!(kind = T::KIND, holder = %holder, "lost claim race, claimed nothing");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Take over the given items regardless of the due window.
    ///
    /// Used for recovery after the timeout detector reports them. Rules are
    /// the claim rules, with one difference: an item already Queued under
    /// `holder` is re-stamped and returned too, so a node can resume its own
    /// stalled lease. Items that moved to ineligible states since detection
    /// are skipped.
    pub async fn reclaim(
        &self,
        ids: &[T::Id],
        holder: &HolderId,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<T>> {
        self.check_holder(holder)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let found = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            fetched = self.store.fetch_by_ids(ids) => fetched?,
        };

        let now = self.clock.now();
        let mut taken = Vec::new();
        for mut item in found {
            match decide(&item, holder) {
                ClaimDecision::Take { .. } | ClaimDecision::AlreadyOurs => {
                    item.lease_mut().acquire(holder.clone(), now);
                    taken.push(item);
                }
                ClaimDecision::Ineligible => {
                    debug!(
                        kind = T::KIND,
                        item = %item.id(),
                        status = %item.status(),
                        "skipping reclaim, no longer eligible"
                    );
                }
            }
        }

        if taken.is_empty() {
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        match self.store.save(taken).await {
            Ok(saved) => {
                info!(
                    kind = T::KIND,
                    holder = %holder,
                    reclaimed = saved.len(),
                    "reclaimed overdue items"
                );
                Ok(saved)
            }
            Err(StoreError::VersionConflict) => {
                debug!(kind = T::KIND, holder = %holder, "lost reclaim race");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move a claimed item into execution: Queued -> Inprogress.
    ///
    /// A version conflict here means the lease was stolen between read and
    /// write, surfaced as [`EngineError::LeaseLost`].
    pub async fn begin(&self, item: T, holder: &HolderId) -> EngineResult<T> {
        self.check_holder(holder)?;
        if item.status() != TickerStatus::Queued {
            return Err(EngineError::IllegalTransition {
                from: item.status(),
                to: TickerStatus::Inprogress,
            });
        }
        if !item.held_by(holder) {
            return Err(EngineError::NotHolder {
                item: item.id().to_string(),
                holder: holder.to_string(),
            });
        }

        let mut item = item;
        item.lease_mut().begin(self.clock.now());
        self.save_one(item).await
    }

    /// Finish an execution: Inprogress -> Done | DueDone | Failed.
    pub async fn complete(
        &self,
        item: T,
        holder: &HolderId,
        completion: Completion,
    ) -> EngineResult<T> {
        self.check_holder(holder)?;
        if item.status() != TickerStatus::Inprogress {
            return Err(EngineError::IllegalTransition {
                from: item.status(),
                to: completion.target_status(),
            });
        }
        if !item.held_by(holder) {
            return Err(EngineError::NotHolder {
                item: item.id().to_string(),
                holder: holder.to_string(),
            });
        }

        let mut item = item;
        let now = self.clock.now();
        match completion {
            Completion::OnTime => item.lease_mut().complete(now),
            Completion::Late => item.lease_mut().complete_late(now),
            Completion::Failed(error) => item.lease_mut().fail(error, now),
        }
        let saved = self.save_one(item).await?;
        info!(
            kind = T::KIND,
            item = %saved.id(),
            status = %saved.status(),
            "execution finished"
        );
        Ok(saved)
    }

    /// Cancel an item that has not started executing.
    ///
    /// Returns whether it was cancelled. Terminal or Inprogress items are
    /// not touched; losing the version race also reports false and the
    /// caller may retry.
    pub async fn cancel_item(&self, id: T::Id) -> EngineResult<bool> {
        let Some(mut item) = self.store.get(id).await? else {
            return Ok(false);
        };
        if !item.status().can_transition(TickerStatus::Cancelled) {
            return Ok(false);
        }

        item.lease_mut().cancel(self.clock.now());
        match self.store.save(vec![item]).await {
            Ok(_) => {
                info!(kind = T::KIND, item = %id, "cancelled");
                Ok(true)
            }
            Err(StoreError::VersionConflict) => {
                debug!(kind = T::KIND, item = %id, "cancel lost the version race");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Release everything `holder` currently holds back to Idle.
    ///
    /// Runs on node startup so a restarted node never strands the leases of
    /// its previous life. Returns how many items were released; a version
    /// conflict releases none this round and the next tick retries.
    pub async fn release_held(
        &self,
        holder: &HolderId,
        cancel: &CancellationToken,
    ) -> EngineResult<usize> {
        self.check_holder(holder)?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let held = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            fetched = self.store.fetch_by_holder(holder) => fetched?,
        };
        if held.is_empty() {
            return Ok(0);
        }

        let now = self.clock.now();
        let mut released = Vec::with_capacity(held.len());
        for mut item in held {
            item.lease_mut().release(now);
            released.push(item);
        }

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        match self.store.save(released).await {
            Ok(saved) => {
                info!(
                    kind = T::KIND,
                    holder = %holder,
                    released = saved.len(),
                    "released held items"
                );
                Ok(saved.len())
            }
            Err(StoreError::VersionConflict) => {
                debug!(kind = T::KIND, holder = %holder, "release lost the version race");
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn check_holder(&self, holder: &HolderId) -> EngineResult<()> {
        if holder.is_empty() {
            return Err(EngineError::EmptyHolder);
        }
        Ok(())
    }

    /// Single-item guarded save; conflict means the lease went elsewhere.
    async fn save_one(&self, item: T) -> EngineResult<T> {
        let id = item.id().to_string();
        match self.store.save(vec![item]).await {
            Ok(mut saved) => saved.pop().ok_or_else(|| {
                EngineError::Store(StoreError::Unavailable(
                    "store returned an empty batch from save".into(),
                ))
            }),
            Err(StoreError::VersionConflict) => Err(EngineError::LeaseLost { item: id }),
            Err(e) => Err(e.into()),
        }
    }
}
