//! Bootstrap reconciliation of cron definitions.
//!
//! Seeding is explicit: nothing materializes or repairs definitions behind
//! the scenes. A deployment hands its desired definitions to
//! [`CronBootstrap::sync_cron_tickers`] at startup and gets a report of what
//! changed. Occurrences whose definition disappeared are cancelled here so
//! they never fire for work nobody asked for anymore.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{CronId, CronTicker, TickerStatus, WorkItem};
use crate::error::{EngineResult, StoreError};
use crate::ports::{Clock, CronTickerStore, OccurrenceStore};

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub orphans_cancelled: usize,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        *self == SyncReport::default()
    }
}

pub struct CronBootstrap {
    defs: Arc<dyn CronTickerStore>,
    occurrences: Arc<dyn OccurrenceStore>,
    clock: Arc<dyn Clock>,
}

impl CronBootstrap {
    pub fn new(
        defs: Arc<dyn CronTickerStore>,
        occurrences: Arc<dyn OccurrenceStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            defs,
            occurrences,
            clock,
        }
    }

    /// Reconcile the stored definitions against `desired`, keyed by id.
    ///
    /// New definitions are inserted and changed ones updated with a fresh
    /// `updated_at`. Definitions absent from `desired` are removed, and their
    /// not-yet-started occurrences cancelled so orphaned work never fires.
    /// Inprogress orphans are left to finish. Orphan cancellation is guarded;
    /// occurrences that moved under a concurrent claim stay for the next pass.
    pub async fn sync_cron_tickers(&self, desired: Vec<CronTicker>) -> EngineResult<SyncReport> {
        let now = self.clock.now();
        let existing: HashMap<CronId, CronTicker> = self
            .defs
            .list()
            .await?
            .into_iter()
            .map(|def| (def.id, def))
            .collect();
        let desired_ids: HashSet<CronId> = desired.iter().map(|def| def.id).collect();

        let mut report = SyncReport::default();
        let mut to_upsert = Vec::new();
        for mut def in desired {
            match existing.get(&def.id) {
                None => {
                    report.added += 1;
                    to_upsert.push(def);
                }
                Some(stored) if !stored.same_definition(&def) => {
                    def.created_at = stored.created_at;
                    def.updated_at = now;
                    report.updated += 1;
                    to_upsert.push(def);
                }
                Some(_) => {}
            }
        }
        if !to_upsert.is_empty() {
            self.defs.upsert(to_upsert).await?;
        }

        let to_remove: Vec<CronId> = existing
            .keys()
            .copied()
            .filter(|id| !desired_ids.contains(id))
            .collect();
        for cron_id in &to_remove {
            report.orphans_cancelled += self.cancel_orphans(*cron_id).await?;
        }
        if !to_remove.is_empty() {
            self.defs.remove(&to_remove).await?;
            report.removed = to_remove.len();
        }

        if !report.is_noop() {
            info!(
                added = report.added,
                updated = report.updated,
                removed = report.removed,
                orphans_cancelled = report.orphans_cancelled,
                "cron definitions reconciled"
            );
        }
        Ok(report)
    }

    /// Cancel every occurrence of `cron_id` that has not started executing.
    async fn cancel_orphans(&self, cron_id: CronId) -> EngineResult<usize> {
        let now = self.clock.now();
        let mut cancellable = Vec::new();
        for mut occurrence in self.occurrences.fetch_by_parent(cron_id).await? {
            if occurrence.status().can_transition(TickerStatus::Cancelled) {
                occurrence.lease_mut().cancel(now);
                cancellable.push(occurrence);
            }
        }
        if cancellable.is_empty() {
            return Ok(0);
        }

        let count = cancellable.len();
        match self.occurrences.save(cancellable).await {
            Ok(_) => Ok(count),
            Err(StoreError::VersionConflict) => {
                warn!(
                    cron = %cron_id,
                    "orphaned occurrences moved under a concurrent claim, left for next sync"
                );
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::*;
    use crate::domain::{CronOccurrence, HolderId};
    use crate::impls::{InMemoryCronTickers, InMemoryStore};
    use crate::ports::{FixedClock, WorkItemStore as _};

    struct Fixture {
        bootstrap: CronBootstrap,
        defs: InMemoryCronTickers,
        occurrences: InMemoryStore<CronOccurrence>,
        clock: Arc<FixedClock>,
    }

    fn fixture(now: DateTime<Utc>) -> Fixture {
        let defs = InMemoryCronTickers::new();
        let occurrences: InMemoryStore<CronOccurrence> = InMemoryStore::new();
        let clock = Arc::new(FixedClock::at(now));
        let bootstrap = CronBootstrap::new(
            Arc::new(defs.clone()),
            Arc::new(occurrences.clone()),
            clock.clone(),
        );
        Fixture {
            bootstrap,
            defs,
            occurrences,
            clock,
        }
    }

    fn def(expression: &str, at: DateTime<Utc>) -> CronTicker {
        CronTicker::new(expression, "rollup", serde_json::Value::Null, at)
    }

    #[tokio::test]
    async fn first_sync_adds_every_definition() {
        let now = Utc::now();
        let fx = fixture(now);

        let report = fx
            .bootstrap
            .sync_cron_tickers(vec![def("0 * * * *", now), def("30 * * * *", now)])
            .await
            .unwrap();

        assert_eq!(
            report,
            SyncReport {
                added: 2,
                ..SyncReport::default()
            }
        );
        assert_eq!(fx.defs.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unchanged_definitions_are_left_alone() {
        let now = Utc::now();
        let fx = fixture(now);
        let desired = vec![def("0 * * * *", now)];

        fx.bootstrap
            .sync_cron_tickers(desired.clone())
            .await
            .unwrap();
        fx.clock.advance(Duration::seconds(60));
        let report = fx.bootstrap.sync_cron_tickers(desired).await.unwrap();

        assert!(report.is_noop());
        let stored = fx.defs.list().await.unwrap();
        assert_eq!(stored[0].updated_at, now, "no touch, no timestamp churn");
    }

    #[tokio::test]
    async fn changed_definition_is_updated_in_place() {
        let now = Utc::now();
        let fx = fixture(now);
        let original = def("0 * * * *", now);

        fx.bootstrap
            .sync_cron_tickers(vec![original.clone()])
            .await
            .unwrap();

        fx.clock.advance(Duration::seconds(60));
        let mut changed = original.clone();
        changed.expression = "15 * * * *".into();
        let report = fx.bootstrap.sync_cron_tickers(vec![changed]).await.unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.added, 0);
        let stored = fx.defs.list().await.unwrap();
        assert_eq!(stored[0].expression, "15 * * * *");
        assert_eq!(stored[0].created_at, original.created_at);
        assert_eq!(stored[0].updated_at, now + Duration::seconds(60));
    }

    #[tokio::test]
    async fn removed_definition_cancels_pending_orphans() {
        let now = Utc::now();
        let fx = fixture(now);
        let doomed = def("0 * * * *", now);
        let kept = def("30 * * * *", now);

        fx.bootstrap
            .sync_cron_tickers(vec![doomed.clone(), kept.clone()])
            .await
            .unwrap();

        let idle = CronOccurrence::new(doomed.id, now + Duration::seconds(60), now);
        let mut queued = CronOccurrence::new(doomed.id, now + Duration::seconds(120), now);
        queued.lease.acquire(HolderId::new("worker-a"), now);
        let mut done = CronOccurrence::new(doomed.id, now - Duration::seconds(60), now);
        done.lease.acquire(HolderId::new("worker-a"), now);
        done.lease.begin(now);
        done.lease.complete(now);
        let unrelated = CronOccurrence::new(kept.id, now + Duration::seconds(60), now);
        fx.occurrences
            .insert(vec![idle.clone(), queued.clone(), done.clone(), unrelated.clone()])
            .await
            .unwrap();

        let report = fx
            .bootstrap
            .sync_cron_tickers(vec![kept.clone()])
            .await
            .unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.orphans_cancelled, 2);
        let listed = fx.defs.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, kept.id);

        for id in [idle.id, queued.id] {
            let stored = fx.occurrences.get(id).await.unwrap().unwrap();
            assert_eq!(stored.status(), TickerStatus::Cancelled);
            assert!(stored.lock().is_none());
        }
        let finished = fx.occurrences.get(done.id).await.unwrap().unwrap();
        assert_eq!(finished.status(), TickerStatus::Done);
        let untouched = fx.occurrences.get(unrelated.id).await.unwrap().unwrap();
        assert_eq!(untouched.status(), TickerStatus::Idle);
    }

    #[tokio::test]
    async fn inprogress_orphan_is_left_to_finish() {
        let now = Utc::now();
        let fx = fixture(now);
        let doomed = def("0 * * * *", now);
        fx.bootstrap
            .sync_cron_tickers(vec![doomed.clone()])
            .await
            .unwrap();

        let mut running = CronOccurrence::new(doomed.id, now, now);
        running.lease.acquire(HolderId::new("worker-a"), now);
        running.lease.begin(now);
        fx.occurrences.insert(vec![running.clone()]).await.unwrap();

        let report = fx.bootstrap.sync_cron_tickers(Vec::new()).await.unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.orphans_cancelled, 0);
        let stored = fx.occurrences.get(running.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), TickerStatus::Inprogress);
    }
}
