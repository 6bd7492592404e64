//! Work item kinds: one-shot time tickers, cron occurrences, and the cron
//! definitions occurrences are materialized from.

use std::fmt;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CronId, HolderId, OccurrenceId, TickerId};
use super::lease::{Lease, LockInfo};
use super::status::TickerStatus;

/// Anything the claim protocol can schedule.
///
/// Design:
/// - The engine and the stores are generic over this trait; the protocol
///   never needs to know which kind it is moving.
/// - Claim state mutates only through [`Lease`], reached via `lease_mut`.
pub trait WorkItem: Clone + Send + Sync + 'static {
    type Id: Copy + Eq + Ord + Hash + fmt::Display + Send + Sync + 'static;

    /// Kind tag for logs ("time_ticker", "cron_occurrence").
    const KIND: &'static str;

    fn id(&self) -> Self::Id;
    fn execution_time(&self) -> DateTime<Utc>;
    fn lease(&self) -> &Lease;
    fn lease_mut(&mut self) -> &mut Lease;

    fn status(&self) -> TickerStatus {
        self.lease().status
    }

    fn version(&self) -> u64 {
        self.lease().version
    }

    fn lock(&self) -> Option<&LockInfo> {
        self.lease().lock.as_ref()
    }

    fn held_by(&self, holder: &HolderId) -> bool {
        self.lease().held_by(holder)
    }
}

/// A one-shot ticker: run `function(payload)` once at `execution_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeTicker {
    pub id: TickerId,
    /// Handler name dispatched at execution time.
    pub function: String,
    /// Opaque request payload handed to the handler.
    pub payload: serde_json::Value,
    pub execution_time: DateTime<Utc>,
    pub lease: Lease,
    pub created_at: DateTime<Utc>,
}

impl TimeTicker {
    pub fn new(
        function: impl Into<String>,
        payload: serde_json::Value,
        execution_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TickerId::generate(),
            function: function.into(),
            payload,
            execution_time,
            lease: Lease::new(now),
            created_at: now,
        }
    }
}

impl WorkItem for TimeTicker {
    type Id = TickerId;

    const KIND: &'static str = "time_ticker";

    fn id(&self) -> TickerId {
        self.id
    }

    fn execution_time(&self) -> DateTime<Utc> {
        self.execution_time
    }

    fn lease(&self) -> &Lease {
        &self.lease
    }

    fn lease_mut(&mut self) -> &mut Lease {
        &mut self.lease
    }
}

/// One materialized firing of a cron definition.
///
/// Carries no function/payload of its own; executors resolve those through
/// the parent definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronOccurrence {
    pub id: OccurrenceId,
    pub cron_id: CronId,
    pub execution_time: DateTime<Utc>,
    pub lease: Lease,
    pub created_at: DateTime<Utc>,
}

impl CronOccurrence {
    pub fn new(cron_id: CronId, execution_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: OccurrenceId::generate(),
            cron_id,
            execution_time,
            lease: Lease::new(now),
            created_at: now,
        }
    }
}

impl WorkItem for CronOccurrence {
    type Id = OccurrenceId;

    const KIND: &'static str = "cron_occurrence";

    fn id(&self) -> OccurrenceId {
        self.id
    }

    fn execution_time(&self) -> DateTime<Utc> {
        self.execution_time
    }

    fn lease(&self) -> &Lease {
        &self.lease
    }

    fn lease_mut(&mut self) -> &mut Lease {
        &mut self.lease
    }
}

/// A recurring ticker definition. Not claimable; occurrences are.
///
/// The cron `expression` stays an opaque string here. Parsing it and
/// computing fire times belongs to whoever materializes occurrences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronTicker {
    pub id: CronId,
    pub expression: String,
    pub function: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CronTicker {
    pub fn new(
        expression: impl Into<String>,
        function: impl Into<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CronId::generate(),
            expression: expression.into(),
            function: function.into(),
            payload,
            created_at: now,
            updated_at: now,
        }
    }

    /// Same schedule and work? Used by the bootstrap reconciler to decide
    /// between upsert-as-update and leave-alone.
    pub fn same_definition(&self, other: &CronTicker) -> bool {
        self.expression == other.expression
            && self.function == other.function
            && self.payload == other.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn new_items_start_idle_and_unheld() {
        let at = now();
        let ticker = TimeTicker::new("send_report", serde_json::json!({"to": "ops"}), at, at);
        assert_eq!(ticker.status(), TickerStatus::Idle);
        assert!(ticker.lock().is_none());
        assert_eq!(ticker.version(), 1);

        let occurrence = CronOccurrence::new(CronId::generate(), at, at);
        assert_eq!(occurrence.status(), TickerStatus::Idle);
        assert!(occurrence.lock().is_none());
    }

    #[test]
    fn held_by_goes_through_the_lease() {
        let at = now();
        let mut ticker = TimeTicker::new("noop", serde_json::Value::Null, at, at);
        ticker.lease_mut().acquire(HolderId::new("worker-a"), at);
        assert!(ticker.held_by(&HolderId::new("worker-a")));
        assert!(!ticker.held_by(&HolderId::new("worker-b")));
    }

    #[test]
    fn same_definition_ignores_timestamps() {
        let at = now();
        let a = CronTicker::new("0 * * * *", "rollup", serde_json::Value::Null, at);
        let mut b = a.clone();
        b.updated_at = at + chrono::Duration::seconds(5);
        assert!(a.same_definition(&b));

        b.expression = "5 * * * *".into();
        assert!(!a.same_definition(&b));
    }
}
