//! App: the protocol logic, assembled from ports.
//!
//! Components:
//! - **ClaimEngine**: claim/steal decisions and the lease lifecycle writes
//! - **TimeoutDetector**: read-only sweep for items left behind
//! - **CronBootstrap**: explicit definition reconciliation at startup
//! - **Runner / RunnerGroup**: the poll/claim/execute fleet
//! - **StatusView**: per-kind tallies for operators

pub mod bootstrap;
pub mod claim;
pub mod runner;
pub mod status;
pub mod timeout;

pub use self::bootstrap::{CronBootstrap, SyncReport};
pub use self::claim::{ClaimEngine, ClaimWindow, Completion};
pub use self::runner::{Runner, RunnerConfig, RunnerGroup};
pub use self::status::{EngineStatus, StatusView};
pub use self::timeout::{TimeoutDetector, TimeoutPolicy};
