//! Runner: the poll/claim/execute cycle, and the group handle that runs a
//! fleet of them.
//!
//! Design:
//! - Each runner is one holder. It releases whatever its holder name still
//!   held on startup, then polls: claim due items, execute them, then sweep
//!   for timed out items and take those over.
//! - Shutdown stops taking new leases; in-flight handler execution finishes.
//!   Anything claimed but not finished comes back via the startup release or
//!   the timeout sweep of another node.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::claim::{ClaimEngine, Completion};
use crate::app::timeout::TimeoutDetector;
use crate::domain::{HolderId, WorkItem};
use crate::error::{EngineError, EngineResult};
use crate::ports::{Clock, WorkHandler};

#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    /// How often to poll for due work.
    pub poll_interval: Duration,
    /// Upper bound on the random startup delay that staggers a fleet.
    pub jitter: Duration,
    /// Claim batch size per poll.
    pub batch: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            jitter: Duration::from_millis(250),
            batch: 100,
        }
    }
}

/// One polling executor under one holder name.
pub struct Runner<T: WorkItem> {
    engine: ClaimEngine<T>,
    detector: TimeoutDetector<T>,
    handler: Arc<dyn WorkHandler<T>>,
    clock: Arc<dyn Clock>,
    holder: HolderId,
    config: RunnerConfig,
}

impl<T: WorkItem> Runner<T> {
    pub fn new(
        engine: ClaimEngine<T>,
        detector: TimeoutDetector<T>,
        handler: Arc<dyn WorkHandler<T>>,
        clock: Arc<dyn Clock>,
        holder: HolderId,
    ) -> Self {
        Self {
            engine,
            detector,
            handler,
            clock,
            holder,
            config: RunnerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    /// Run until shutdown is requested or `cancel` fires.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>, cancel: CancellationToken) {
        self.release_previous(&cancel).await;

        let jitter_ms = self.config.jitter.as_millis() as u64;
        if jitter_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..=jitter_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown_rx.borrow() || cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // A dropped sender means nobody can ask us to stop later.
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = cancel.cancelled() => break,
                _ = poll.tick() => {}
            }

            if let Err(e) = self.tick(&cancel).await {
                match e {
                    EngineError::Cancelled => break,
                    e => {
                        warn!(kind = T::KIND, holder = %self.holder, error = %e, "poll cycle failed")
                    }
                }
            }
        }
        info!(kind = T::KIND, holder = %self.holder, "runner stopped");
    }

    /// Return any leases a previous life of this holder left behind.
    async fn release_previous(&self, cancel: &CancellationToken) {
        match self.engine.release_held(&self.holder, cancel).await {
            Ok(0) => {}
            Ok(released) => {
                info!(
                    kind = T::KIND,
                    holder = %self.holder,
                    released,
                    "released leases from a previous run"
                );
            }
            Err(e) => {
                warn!(kind = T::KIND, holder = %self.holder, error = %e, "startup release failed");
            }
        }
    }

    /// One poll cycle: claim what is due, execute it, then sweep for items
    /// the fleet left behind and take those over.
    async fn tick(&self, cancel: &CancellationToken) -> EngineResult<()> {
        let target = self.clock.now();
        let claimed = self
            .engine
            .claim_due(target, self.config.batch, &self.holder, cancel)
            .await?;
        for item in claimed {
            self.execute(item, false).await;
        }

        let overdue = self.detector.find_timed_out(self.clock.now(), cancel).await?;
        let ids: Vec<T::Id> = overdue.iter().map(|item| item.id()).collect();
        let recovered = self.engine.reclaim(&ids, &self.holder, cancel).await?;
        for item in recovered {
            self.execute(item, true).await;
        }
        Ok(())
    }

    /// Begin, run the handler, complete. Recovered items that still succeed
    /// finish as DueDone rather than Done.
    async fn execute(&self, item: T, recovered: bool) {
        let id = item.id();
        let running = match self.engine.begin(item, &self.holder).await {
            Ok(running) => running,
            Err(EngineError::LeaseLost { .. }) => {
                debug!(kind = T::KIND, item = %id, "lease moved before begin, skipping");
                return;
            }
            Err(e) => {
                warn!(kind = T::KIND, item = %id, error = %e, "begin failed");
                return;
            }
        };

        let completion = match self.handler.run(&running).await {
            Ok(()) if recovered => Completion::Late,
            Ok(()) => Completion::OnTime,
            Err(message) => Completion::Failed(message),
        };
        if let Err(e) = self.engine.complete(running, &self.holder, completion).await {
            warn!(kind = T::KIND, item = %id, error = %e, "completion failed");
        }
    }
}

/// Handle over a spawned fleet of runners sharing one shutdown signal.
pub struct RunnerGroup {
    shutdown_tx: watch::Sender<bool>,
    cancel: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl RunnerGroup {
    /// Spawn `n` runners named `{holder_prefix}-0` through `{holder_prefix}-{n-1}`.
    pub fn spawn<T: WorkItem>(
        n: usize,
        holder_prefix: &str,
        engine: ClaimEngine<T>,
        detector: TimeoutDetector<T>,
        handler: Arc<dyn WorkHandler<T>>,
        clock: Arc<dyn Clock>,
        config: RunnerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        let mut joins = Vec::with_capacity(n);
        for i in 0..n {
            let runner = Runner::new(
                engine.clone(),
                detector.clone(),
                Arc::clone(&handler),
                Arc::clone(&clock),
                HolderId::new(format!("{holder_prefix}-{i}")),
            )
            .with_config(config);
            let rx = shutdown_rx.clone();
            let token = cancel.clone();
            joins.push(tokio::spawn(runner.run(rx, token)));
        }

        Self {
            shutdown_tx,
            cancel,
            joins,
        }
    }

    /// Stop taking new leases. In-flight executions finish.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Token that aborts waiting engine calls, for hard stops.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}
