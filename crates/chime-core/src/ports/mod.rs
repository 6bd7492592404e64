//! Ports: the abstraction seams of the engine.
//!
//! Hexagonal layering. The engine talks to a versioned document store, a
//! clock and a work handler only through these traits; backends plug in
//! underneath without the protocol noticing.

pub mod clock;
pub mod handler;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::handler::WorkHandler;
pub use self::store::{
    CronTickerStore, DueWindow, OccurrenceStore, OverdueCutoffs, StatusCounts, WorkItemStore,
};
