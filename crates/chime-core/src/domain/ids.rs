//! Domain identifiers (strongly-typed IDs).
//!
//! Item ids are ULIDs behind a phantom-typed wrapper so a ticker id and a
//! cron definition id can never be mixed up at compile time. Holder ids are
//! operator-assigned node names, so they stay plain strings with a newtype.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each id type. Provides the Display prefix.
pub trait IdMarker: Send + Sync + 'static {
    /// Display prefix (e.g. "tick-", "cron-").
    fn prefix() -> &'static str;
}

/// Generic id type.
///
/// `T` is a zero-sized marker; the wire and memory representation is exactly
/// one ULID. ULIDs sort by creation time, which keeps store scans ordered
/// even before the execution-time index kicks in.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// Mint a fresh id.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Parse the bare ULID form stores persist (no prefix).
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ulid::from_string(s).map(Self::from_ulid)
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Marker for one-shot time tickers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ticker {}

impl IdMarker for Ticker {
    fn prefix() -> &'static str {
        "tick-"
    }
}

/// Marker for materialized cron occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Occurrence {}

impl IdMarker for Occurrence {
    fn prefix() -> &'static str {
        "occ-"
    }
}

/// Marker for cron ticker definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cron {}

impl IdMarker for Cron {
    fn prefix() -> &'static str {
        "cron-"
    }
}

/// Identifier of a one-shot time ticker.
pub type TickerId = Id<Ticker>;

/// Identifier of one materialized firing of a cron definition.
pub type OccurrenceId = Id<Occurrence>;

/// Identifier of a cron ticker definition.
pub type CronId = Id<Cron>;

/// Identity of a claiming node.
///
/// Holder ids are stable operator-assigned names ("worker-a"), not minted
/// ids. Emptiness is rejected at the engine boundary, not here, so the
/// engine's input contract stays in one place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderId(String);

impl HolderId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HolderId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
