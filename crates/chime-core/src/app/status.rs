//! Status view: per-kind tallies assembled for operators.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::domain::{CronOccurrence, TimeTicker};
use crate::error::EngineResult;
use crate::ports::{StatusCounts, WorkItemStore};

/// A point-in-time tally of both work item kinds.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EngineStatus {
    pub time_tickers: StatusCounts,
    pub cron_occurrences: StatusCounts,
}

impl EngineStatus {
    /// Items still waiting to run.
    pub fn pending(&self) -> usize {
        let waiting = |c: &StatusCounts| c.idle + c.queued + c.inprogress;
        waiting(&self.time_tickers) + waiting(&self.cron_occurrences)
    }
}

fn fmt_counts(f: &mut fmt::Formatter<'_>, label: &str, c: &StatusCounts) -> fmt::Result {
    writeln!(
        f,
        "{label:<17} idle={} queued={} inprogress={} done={} due_done={} failed={} cancelled={}",
        c.idle, c.queued, c.inprogress, c.done, c.due_done, c.failed, c.cancelled
    )
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_counts(f, "time tickers", &self.time_tickers)?;
        fmt_counts(f, "cron occurrences", &self.cron_occurrences)
    }
}

/// Reads tallies from both stores.
pub struct StatusView {
    tickers: Arc<dyn WorkItemStore<TimeTicker>>,
    occurrences: Arc<dyn WorkItemStore<CronOccurrence>>,
}

impl StatusView {
    pub fn new(
        tickers: Arc<dyn WorkItemStore<TimeTicker>>,
        occurrences: Arc<dyn WorkItemStore<CronOccurrence>>,
    ) -> Self {
        Self {
            tickers,
            occurrences,
        }
    }

    pub async fn snapshot(&self) -> EngineResult<EngineStatus> {
        Ok(EngineStatus {
            time_tickers: self.tickers.counts().await?,
            cron_occurrences: self.occurrences.counts().await?,
        })
    }
}
