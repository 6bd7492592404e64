//! Timeout detection: find items stuck past their grace period.
//!
//! Detection is read-only. Acting on what it finds (reclaim, release,
//! alerting) is a separate decision made by the caller; nothing here writes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::WorkItem;
use crate::error::{EngineError, EngineResult};
use crate::ports::{OverdueCutoffs, WorkItemStore};

/// Grace periods before a waiting item counts as timed out.
///
/// Queued gets the longer grace: a holder stamped it, so give the in-flight
/// execution path time to move it along before calling it stuck. Both graces
/// measure from ExecutionTime, and overdue means strictly past the cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub idle_grace: Duration,
    pub queued_grace: Duration,
}

impl Default for TimeoutPolicy {
    /// Protocol default: one second for Idle, three for Queued.
    fn default() -> Self {
        Self {
            idle_grace: Duration::seconds(1),
            queued_grace: Duration::seconds(3),
        }
    }
}

impl TimeoutPolicy {
    pub fn cutoffs(&self, now: DateTime<Utc>) -> OverdueCutoffs {
        OverdueCutoffs {
            idle_before: now - self.idle_grace,
            queued_before: now - self.queued_grace,
        }
    }
}

/// Read-only detector for items the fleet has left behind.
#[derive(Clone)]
pub struct TimeoutDetector<T: WorkItem> {
    store: Arc<dyn WorkItemStore<T>>,
    policy: TimeoutPolicy,
}

impl<T: WorkItem> TimeoutDetector<T> {
    pub fn new(store: Arc<dyn WorkItemStore<T>>) -> Self {
        Self {
            store,
            policy: TimeoutPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> TimeoutPolicy {
        self.policy
    }

    /// Items overdue at `now`: Idle past the idle grace, or Queued past the
    /// queued grace. Inprogress and terminal items are never reported.
    pub async fn find_timed_out(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<T>> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let overdue = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            fetched = self.store.fetch_overdue(self.policy.cutoffs(now)) => fetched?,
        };
        if !overdue.is_empty() {
            debug!(kind = T::KIND, overdue = overdue.len(), "found timed out items");
        }
        Ok(overdue)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::domain::{HolderId, TickerStatus, TimeTicker};
    use crate::impls::InMemoryStore;

    fn detector() -> (TimeoutDetector<TimeTicker>, InMemoryStore<TimeTicker>) {
        let store = InMemoryStore::new();
        (TimeoutDetector::new(Arc::new(store.clone())), store)
    }

    fn ticker_due_at(at: DateTime<Utc>) -> TimeTicker {
        TimeTicker::new("noop", serde_json::Value::Null, at, at)
    }

    #[rstest]
    #[case::idle_past_grace(TickerStatus::Idle, -1100, true)]
    #[case::idle_inside_grace(TickerStatus::Idle, -900, false)]
    #[case::queued_past_grace(TickerStatus::Queued, -3100, true)]
    #[case::queued_inside_grace(TickerStatus::Queued, -2900, false)]
    #[tokio::test]
    async fn grace_edges(
        #[case] status: TickerStatus,
        #[case] offset_ms: i64,
        #[case] expect_overdue: bool,
    ) {
        let now = Utc::now();
        let (detector, store) = detector();

        let mut item = ticker_due_at(now + Duration::milliseconds(offset_ms));
        if status == TickerStatus::Queued {
            item.lease.acquire(HolderId::new("worker-a"), now);
        }
        store.insert(vec![item.clone()]).await.unwrap();

        let overdue = detector
            .find_timed_out(now, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(overdue.len(), usize::from(expect_overdue));
    }

    #[tokio::test]
    async fn inprogress_and_terminal_items_never_report() {
        let now = Utc::now();
        let (detector, store) = detector();
        let way_past = now - Duration::seconds(60);

        let mut inprogress = ticker_due_at(way_past);
        inprogress.lease.acquire(HolderId::new("worker-a"), way_past);
        inprogress.lease.begin(way_past);

        let mut done = ticker_due_at(way_past);
        done.lease.acquire(HolderId::new("worker-a"), way_past);
        done.lease.begin(way_past);
        done.lease.complete(way_past);

        let mut cancelled = ticker_due_at(way_past);
        cancelled.lease.cancel(way_past);

        store
            .insert(vec![inprogress, done, cancelled])
            .await
            .unwrap();

        let overdue = detector
            .find_timed_out(now, &CancellationToken::new())
            .await
            .unwrap();
        assert!(overdue.is_empty());
    }

    #[tokio::test]
    async fn detection_never_writes() {
        let now = Utc::now();
        let (detector, store) = detector();
        let item = ticker_due_at(now - Duration::seconds(10));
        store.insert(vec![item.clone()]).await.unwrap();

        let overdue = detector
            .find_timed_out(now, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(overdue.len(), 1);

        let stored = store.get(item.id).await.unwrap().unwrap();
        assert_eq!(stored.version(), 1);
        assert_eq!(stored.status(), TickerStatus::Idle);
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let now = Utc::now();
        let (detector, _store) = detector();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = detector.find_timed_out(now, &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
