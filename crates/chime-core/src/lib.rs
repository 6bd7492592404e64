//! chime-core
//!
//! Claim/lease engine for distributed tickers. A fleet of nodes schedules
//! one-shot time tickers and recurring cron occurrences through a shared
//! store, coordinated by nothing but per-document version checks.
//!
//! # Modules
//! - **domain**: the work item model (ids, lease, status, item kinds)
//! - **ports**: abstraction seams (WorkItemStore, Clock, WorkHandler)
//! - **app**: protocol logic (ClaimEngine, TimeoutDetector, CronBootstrap, Runner, StatusView)
//! - **impls**: store backends (InMemoryStore, SqliteStore)
//! - **error**: StoreError and EngineError

pub mod domain;
pub mod ports;
pub mod app;
pub mod impls;
pub mod error;
