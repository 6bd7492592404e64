//! Lease state: status + lock + version, and every transition on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::HolderId;
use super::status::TickerStatus;

/// Who holds an item, stamped at acquisition time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub holder: HolderId,
    pub locked_at: DateTime<Utc>,
}

/// Claim-relevant state shared by every work item kind.
///
/// Design:
/// - Status and lock always move together, so they live in one struct and
///   mutate only through the methods below. Call sites never poke fields.
/// - `version` is the optimistic concurrency token. Stores bump it on every
///   successful save; nothing here touches it. It is deliberately not the
///   lock holder (holders churn on steals, the token must not).
/// - Idle implies no lock by construction: `new` and `release` are the only
///   paths into Idle and both leave the lock cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub status: TickerStatus,
    pub lock: Option<LockInfo>,
    pub version: u64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Lease {
    /// Fresh lease: Idle, unheld, version 1.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: TickerStatus::Idle,
            lock: None,
            version: 1,
            last_error: None,
            updated_at: now,
        }
    }

    /// Claim acquisition and steal are the same write: Queued with the lock
    /// stamped to `holder` at `now`. A steal simply overwrites a foreign lock.
    pub fn acquire(&mut self, holder: HolderId, now: DateTime<Utc>) {
        self.status = TickerStatus::Queued;
        self.lock = Some(LockInfo {
            holder,
            locked_at: now,
        });
        self.updated_at = now;
    }

    /// Queued -> Inprogress. The lock stays as stamped at acquisition.
    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.status = TickerStatus::Inprogress;
        self.updated_at = now;
    }

    /// Inprogress -> Done.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = TickerStatus::Done;
        self.updated_at = now;
    }

    /// Inprogress -> DueDone (executed past its due window).
    pub fn complete_late(&mut self, now: DateTime<Utc>) {
        self.status = TickerStatus::DueDone;
        self.updated_at = now;
    }

    /// Inprogress -> Failed, recording the handler error.
    pub fn fail(&mut self, error: String, now: DateTime<Utc>) {
        self.status = TickerStatus::Failed;
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// Idle | Queued -> Cancelled. A cancelled item is held by nobody.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = TickerStatus::Cancelled;
        self.lock = None;
        self.updated_at = now;
    }

    /// Queued | Inprogress -> Idle with the lock cleared. The only path back
    /// into Idle.
    pub fn release(&mut self, now: DateTime<Utc>) {
        self.status = TickerStatus::Idle;
        self.lock = None;
        self.updated_at = now;
    }

    pub fn held_by(&self, holder: &HolderId) -> bool {
        self.lock.as_ref().is_some_and(|l| l.holder == *holder)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    #[test]
    fn fresh_lease_is_idle_and_unheld() {
        let lease = Lease::new(Utc::now());
        assert_eq!(lease.status, TickerStatus::Idle);
        assert!(lease.lock.is_none());
        assert_eq!(lease.version, 1);
        assert!(lease.last_error.is_none());
    }

    #[test]
    fn acquire_stamps_holder_and_time() {
        let now = Utc::now();
        let mut lease = Lease::new(now);
        lease.acquire(HolderId::new("worker-a"), now);

        assert_eq!(lease.status, TickerStatus::Queued);
        let lock = lease.lock.as_ref().unwrap();
        assert_eq!(lock.holder.as_str(), "worker-a");
        assert_eq!(lock.locked_at, now);
        assert!(lease.held_by(&HolderId::new("worker-a")));
        assert!(!lease.held_by(&HolderId::new("worker-b")));
    }

    #[test]
    fn steal_overwrites_a_foreign_lock() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(1);
        let mut lease = Lease::new(t0);
        lease.acquire(HolderId::new("worker-a"), t0);
        lease.acquire(HolderId::new("worker-b"), t1);

        assert_eq!(lease.status, TickerStatus::Queued);
        let lock = lease.lock.as_ref().unwrap();
        assert_eq!(lock.holder.as_str(), "worker-b");
        assert_eq!(lock.locked_at, t1);
    }

    #[test]
    fn release_returns_to_idle_and_clears_the_lock() {
        let now = Utc::now();
        let mut lease = Lease::new(now);
        lease.acquire(HolderId::new("worker-a"), now);
        lease.begin(now);
        lease.release(now);

        assert_eq!(lease.status, TickerStatus::Idle);
        assert!(lease.lock.is_none());
    }

    #[test]
    fn fail_records_the_error() {
        let now = Utc::now();
        let mut lease = Lease::new(now);
        lease.acquire(HolderId::new("worker-a"), now);
        lease.begin(now);
        lease.fail("boom".into(), now);

        assert_eq!(lease.status, TickerStatus::Failed);
        assert_eq!(lease.last_error.as_deref(), Some("boom"));
        // Completion keeps the lock as a record of who executed.
        assert!(lease.lock.is_some());
    }

    #[test]
    fn cancel_clears_the_lock() {
        let now = Utc::now();
        let mut lease = Lease::new(now);
        lease.acquire(HolderId::new("worker-a"), now);
        lease.cancel(now);

        assert_eq!(lease.status, TickerStatus::Cancelled);
        assert!(lease.lock.is_none());
    }
}
