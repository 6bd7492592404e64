//! Impls: store backends behind the ports.
//!
//! - `InMemoryStore` / `InMemoryCronTickers`: reference backend, test
//!   substrate.
//! - `SqliteStore`: file-or-memory persistence; one handle implements every
//!   store trait a node needs.

pub mod memory;
pub mod sqlite;

pub use self::memory::{InMemoryCronTickers, InMemoryStore};
pub use self::sqlite::SqliteStore;
