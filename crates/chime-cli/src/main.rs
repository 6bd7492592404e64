use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tokio::time::sleep;
use tracing::info;

use chime_core::app::{
    ClaimEngine, CronBootstrap, RunnerConfig, RunnerGroup, StatusView, TimeoutDetector,
};
use chime_core::domain::{CronOccurrence, CronTicker, TimeTicker};
use chime_core::impls::SqliteStore;
use chime_core::ports::{
    Clock, CronTickerStore, OccurrenceStore, SystemClock, WorkHandler, WorkItemStore,
};

/// Routes a ticker to its function by name.
struct TickerFunctions;

#[async_trait]
impl WorkHandler<TimeTicker> for TickerFunctions {
    async fn run(&self, item: &TimeTicker) -> Result<(), String> {
        match item.function.as_str() {
            "greet" => {
                let name = item
                    .payload
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("world");
                println!("[ticker] hello, {name}!");
                Ok(())
            }
            "explode" => Err("intentional failure".into()),
            other => Err(format!("no handler for function: {other}")),
        }
    }
}

/// Occurrences carry no function of their own; resolve it through the
/// parent definition.
struct OccurrenceFunctions {
    defs: Arc<dyn CronTickerStore>,
}

#[async_trait]
impl WorkHandler<CronOccurrence> for OccurrenceFunctions {
    async fn run(&self, item: &CronOccurrence) -> Result<(), String> {
        let defs = self.defs.list().await.map_err(|e| e.to_string())?;
        let Some(def) = defs.into_iter().find(|d| d.id == item.cron_id) else {
            return Err(format!("definition {} not found", item.cron_id));
        };
        println!(
            "[cron] {} fired (schedule: {})",
            def.function, def.expression
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chime_core=info,chime_cli=info".into()),
        )
        .init();

    // (A) One shared SQLite store plays every role; a fleet of holders
    // coordinates through it with nothing but version checks.
    let store = SqliteStore::open_in_memory()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let now = clock.now();

    let tickers: Arc<dyn WorkItemStore<TimeTicker>> = Arc::new(store.clone());
    let occurrences: Arc<dyn WorkItemStore<CronOccurrence>> = Arc::new(store.clone());
    let occurrences_by_parent: Arc<dyn OccurrenceStore> = Arc::new(store.clone());
    let defs: Arc<dyn CronTickerStore> = Arc::new(store.clone());

    // (B) Reconcile cron definitions, then seed the occurrences we want
    // materialized. Nothing materializes implicitly.
    let rollup = CronTicker::new("* * * * *", "minute_rollup", serde_json::json!({}), now);
    let bootstrap = CronBootstrap::new(defs.clone(), occurrences_by_parent, clock.clone());
    let report = bootstrap.sync_cron_tickers(vec![rollup.clone()]).await?;
    info!(added = report.added, "cron definitions synced");

    occurrences
        .insert(vec![
            CronOccurrence::new(rollup.id, now + Duration::seconds(1), now),
            CronOccurrence::new(rollup.id, now + Duration::seconds(62), now),
        ])
        .await?;

    // (C) Seed one-shot tickers: two that succeed, one that fails, one
    // already overdue (recovered as DueDone), one we cancel before it runs.
    let overdue = TimeTicker::new("greet", serde_json::json!({"name": "early bird"}), now - Duration::seconds(10), now);
    let doomed = TimeTicker::new("greet", serde_json::json!({"name": "nobody"}), now + Duration::seconds(3600), now);
    tickers
        .insert(vec![
            TimeTicker::new("greet", serde_json::json!({"name": "chime"}), now, now),
            TimeTicker::new("greet", serde_json::json!({"name": "ops"}), now + Duration::seconds(2), now),
            TimeTicker::new("explode", serde_json::json!({}), now + Duration::seconds(1), now),
            overdue,
            doomed.clone(),
        ])
        .await?;

    let ticker_engine = ClaimEngine::new(tickers.clone(), clock.clone());
    if ticker_engine.cancel_item(doomed.id).await? {
        info!(item = %doomed.id, "cancelled the far-future ticker");
    }

    // (D) Run two fleets over the shared store, one per kind.
    let ticker_group = RunnerGroup::spawn(
        3,
        "ticker-node",
        ticker_engine.clone(),
        TimeoutDetector::new(tickers.clone()),
        Arc::new(TickerFunctions),
        clock.clone(),
        RunnerConfig::default(),
    );
    let cron_group = RunnerGroup::spawn(
        2,
        "cron-node",
        ClaimEngine::new(occurrences.clone(), clock.clone()),
        TimeoutDetector::new(occurrences.clone()),
        Arc::new(OccurrenceFunctions { defs }),
        clock.clone(),
        RunnerConfig::default(),
    );

    // (E) Wait until everything seeded for the near term is terminal, then
    // report and shut down. The far-out occurrence stays Idle on purpose.
    let view = StatusView::new(tickers, occurrences);
    let mut status = view.snapshot().await?;
    for _ in 0..60 {
        status = view.snapshot().await?;
        let t = &status.time_tickers;
        let settled = t.done + t.due_done + t.failed + t.cancelled == 5;
        if settled && status.cron_occurrences.done == 1 {
            break;
        }
        sleep(std::time::Duration::from_millis(250)).await;
    }

    println!("{status}");
    ticker_group.shutdown_and_join().await;
    cron_group.shutdown_and_join().await;
    Ok(())
}
