//! Domain model (IDs, status machine, lease state, item kinds).

pub mod ids;
pub mod item;
pub mod lease;
pub mod status;

pub use ids::{CronId, HolderId, Id, IdMarker, OccurrenceId, TickerId};
pub use item::{CronOccurrence, CronTicker, TimeTicker, WorkItem};
pub use lease::{Lease, LockInfo};
pub use status::TickerStatus;
