//! SQLite store implementation.
//!
//! Design:
//! - One file (or `:memory:`) holds all three tables; the struct implements
//!   the item-store contract for both claimable kinds plus the definition
//!   store, so a single handle wires a whole node.
//! - Times are fixed-width RFC 3339 UTC text, so string comparison in SQL
//!   matches chronological comparison and the due index stays usable.
//! - The guarded batch save runs in one transaction: verify every version,
//!   then replace every row with the version bumped. Any mismatch rolls the
//!   whole batch back.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{
    CronId, CronOccurrence, CronTicker, HolderId, Lease, LockInfo, OccurrenceId, TickerId,
    TickerStatus, TimeTicker, WorkItem,
};
use crate::error::{StoreError, StoreResult};
use crate::ports::{
    CronTickerStore, DueWindow, OccurrenceStore, OverdueCutoffs, StatusCounts, WorkItemStore,
};

/// SQLite-backed store for tickers, occurrences and cron definitions.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and initialize the schema.
    pub fn open(path: &str) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private in-memory database. Used by tests and demos.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

/// Create all tables and indexes. Idempotent.
fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS time_tickers (
            id             TEXT    NOT NULL PRIMARY KEY,
            function       TEXT    NOT NULL,
            payload        TEXT    NOT NULL,   -- opaque JSON
            execution_time TEXT    NOT NULL,   -- RFC 3339 UTC, fixed width
            status         TEXT    NOT NULL,
            lock_holder    TEXT,
            locked_at      TEXT,
            last_error     TEXT,
            version        INTEGER NOT NULL,
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_time_tickers_due
            ON time_tickers (status, execution_time);

        CREATE TABLE IF NOT EXISTS cron_occurrences (
            id             TEXT    NOT NULL PRIMARY KEY,
            cron_id        TEXT    NOT NULL,
            execution_time TEXT    NOT NULL,
            status         TEXT    NOT NULL,
            lock_holder    TEXT,
            locked_at      TEXT,
            last_error     TEXT,
            version        INTEGER NOT NULL,
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_cron_occurrences_due
            ON cron_occurrences (status, execution_time);
        CREATE INDEX IF NOT EXISTS idx_cron_occurrences_parent
            ON cron_occurrences (cron_id);

        CREATE TABLE IF NOT EXISTS cron_tickers (
            id         TEXT NOT NULL PRIMARY KEY,
            expression TEXT NOT NULL,
            function   TEXT NOT NULL,
            payload    TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Fixed-width RFC 3339 (9 fractional digits, Z suffix): lexicographic order
/// equals chronological order, and nothing is lost on the round trip.
fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_time(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

fn decode_status(s: &str) -> StoreResult<TickerStatus> {
    s.parse::<TickerStatus>().map_err(StoreError::Corrupt)
}

fn decode_payload(s: &str) -> StoreResult<serde_json::Value> {
    serde_json::from_str(s).map_err(|e| StoreError::Corrupt(format!("bad payload: {e}")))
}

fn decode_ulid(s: &str) -> StoreResult<ulid::Ulid> {
    ulid::Ulid::from_string(s).map_err(|e| StoreError::Corrupt(format!("bad id {s:?}: {e}")))
}

fn decode_lease(
    status: &str,
    lock_holder: Option<String>,
    locked_at: Option<String>,
    last_error: Option<String>,
    version: i64,
    updated_at: &str,
) -> StoreResult<Lease> {
    let lock = match (lock_holder, locked_at) {
        (None, None) => None,
        (Some(holder), Some(at)) => Some(LockInfo {
            holder: HolderId::new(holder),
            locked_at: decode_time(&at)?,
        }),
        _ => {
            return Err(StoreError::Corrupt(
                "lock_holder and locked_at must be set together".into(),
            ));
        }
    };
    Ok(Lease {
        status: decode_status(status)?,
        lock,
        version: version as u64,
        last_error,
        updated_at: decode_time(updated_at)?,
    })
}

fn lock_columns(lease: &Lease) -> (Option<String>, Option<String>) {
    match &lease.lock {
        Some(lock) => (
            Some(lock.holder.as_str().to_string()),
            Some(encode_time(lock.locked_at)),
        ),
        None => (None, None),
    }
}

/// `WHERE` fragment for claim candidates; binds `?1 = from`, `?2 = until`.
const DUE_PREDICATE: &str = "((status = 'idle' AND lock_holder IS NULL) OR status = 'queued')
     AND execution_time >= ?1 AND execution_time < ?2";

/// `WHERE` fragment for overdue items; binds `?1 = idle_before`,
/// `?2 = queued_before`.
const OVERDUE_PREDICATE: &str = "(status = 'idle' AND execution_time < ?1)
     OR (status = 'queued' AND execution_time < ?2)";

// Raw column tuples, decoded outside the row closure so parse failures map
// to Corrupt instead of contorting through rusqlite's error type.

type TickerRow = (
    String,         // id
    String,         // function
    String,         // payload
    String,         // execution_time
    String,         // status
    Option<String>, // lock_holder
    Option<String>, // locked_at
    Option<String>, // last_error
    i64,            // version
    String,         // created_at
    String,         // updated_at
);

const TICKER_COLS: &str = "id, function, payload, execution_time, status, lock_holder, locked_at,
     last_error, version, created_at, updated_at";

fn ticker_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TickerRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn decode_ticker(raw: TickerRow) -> StoreResult<TimeTicker> {
    let (id, function, payload, exec, status, holder, locked_at, last_error, version, created, updated) =
        raw;
    Ok(TimeTicker {
        id: TickerId::from_ulid(decode_ulid(&id)?),
        function,
        payload: decode_payload(&payload)?,
        execution_time: decode_time(&exec)?,
        lease: decode_lease(&status, holder, locked_at, last_error, version, &updated)?,
        created_at: decode_time(&created)?,
    })
}

fn replace_ticker(tx: &rusqlite::Transaction<'_>, ticker: &TimeTicker) -> StoreResult<()> {
    let (holder, locked_at) = lock_columns(&ticker.lease);
    tx.execute(
        "INSERT OR REPLACE INTO time_tickers
         (id, function, payload, execution_time, status, lock_holder, locked_at,
          last_error, version, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
        params![
            ticker.id.as_ulid().to_string(),
            ticker.function,
            ticker.payload.to_string(),
            encode_time(ticker.execution_time),
            ticker.lease.status.as_str(),
            holder,
            locked_at,
            ticker.lease.last_error,
            ticker.lease.version as i64,
            encode_time(ticker.created_at),
            encode_time(ticker.lease.updated_at),
        ],
    )?;
    Ok(())
}

type OccurrenceRow = (
    String,         // id
    String,         // cron_id
    String,         // execution_time
    String,         // status
    Option<String>, // lock_holder
    Option<String>, // locked_at
    Option<String>, // last_error
    i64,            // version
    String,         // created_at
    String,         // updated_at
);

const OCCURRENCE_COLS: &str = "id, cron_id, execution_time, status, lock_holder, locked_at,
     last_error, version, created_at, updated_at";

fn occurrence_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OccurrenceRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn decode_occurrence(raw: OccurrenceRow) -> StoreResult<CronOccurrence> {
    let (id, cron_id, exec, status, holder, locked_at, last_error, version, created, updated) = raw;
    Ok(CronOccurrence {
        id: OccurrenceId::from_ulid(decode_ulid(&id)?),
        cron_id: CronId::from_ulid(decode_ulid(&cron_id)?),
        execution_time: decode_time(&exec)?,
        lease: decode_lease(&status, holder, locked_at, last_error, version, &updated)?,
        created_at: decode_time(&created)?,
    })
}

fn replace_occurrence(tx: &rusqlite::Transaction<'_>, occ: &CronOccurrence) -> StoreResult<()> {
    let (holder, locked_at) = lock_columns(&occ.lease);
    tx.execute(
        "INSERT OR REPLACE INTO cron_occurrences
         (id, cron_id, execution_time, status, lock_holder, locked_at,
          last_error, version, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
        params![
            occ.id.as_ulid().to_string(),
            occ.cron_id.as_ulid().to_string(),
            encode_time(occ.execution_time),
            occ.lease.status.as_str(),
            holder,
            locked_at,
            occ.lease.last_error,
            occ.lease.version as i64,
            encode_time(occ.created_at),
            encode_time(occ.lease.updated_at),
        ],
    )?;
    Ok(())
}

/// Shared skeleton for the guarded batch save.
///
/// Verifies every stored version inside the transaction, then replaces every
/// row with its version bumped. Dropping the transaction without commit rolls
/// everything back, so a conflict return leaves the table untouched.
fn guarded_save<T: WorkItem>(
    conn: &mut Connection,
    table: &str,
    mut batch: Vec<T>,
    id_of: impl Fn(&T) -> String,
    replace: impl Fn(&rusqlite::Transaction<'_>, &T) -> StoreResult<()>,
) -> StoreResult<Vec<T>> {
    let tx = conn.transaction()?;
    {
        let sql = format!("SELECT version FROM {table} WHERE id = ?1");
        let mut stmt = tx.prepare(&sql)?;
        for item in &batch {
            let stored: Option<i64> = stmt
                .query_row(params![id_of(item)], |row| row.get(0))
                .optional()?;
            match stored {
                None => return Err(StoreError::NotFound(item.id().to_string())),
                Some(v) if v as u64 != item.version() => {
                    return Err(StoreError::VersionConflict);
                }
                Some(_) => {}
            }
        }
    }
    for item in &mut batch {
        item.lease_mut().version += 1;
        replace(&tx, item)?;
    }
    tx.commit()?;
    Ok(batch)
}

/// Shared skeleton for insert: reject duplicates, then write all rows in one
/// transaction.
fn guarded_insert<T: WorkItem>(
    conn: &mut Connection,
    table: &str,
    batch: Vec<T>,
    id_of: impl Fn(&T) -> String,
    replace: impl Fn(&rusqlite::Transaction<'_>, &T) -> StoreResult<()>,
) -> StoreResult<()> {
    let tx = conn.transaction()?;
    {
        let sql = format!("SELECT 1 FROM {table} WHERE id = ?1");
        let mut stmt = tx.prepare(&sql)?;
        for item in &batch {
            let exists: Option<i64> = stmt
                .query_row(params![id_of(item)], |row| row.get(0))
                .optional()?;
            if exists.is_some() {
                return Err(StoreError::Duplicate(item.id().to_string()));
            }
        }
    }
    for item in &batch {
        replace(&tx, item)?;
    }
    tx.commit()?;
    Ok(())
}

fn table_counts(conn: &Connection, table: &str) -> StoreResult<StatusCounts> {
    let sql = format!("SELECT status, COUNT(*) FROM {table} GROUP BY status");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut counts = StatusCounts::default();
    for row in rows {
        let (status, n) = row?;
        counts.add(decode_status(&status)?, n as usize);
    }
    Ok(counts)
}

#[async_trait]
impl WorkItemStore<TimeTicker> for SqliteStore {
    async fn fetch_due(&self, window: DueWindow, limit: usize) -> StoreResult<Vec<TimeTicker>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {TICKER_COLS} FROM time_tickers WHERE {DUE_PREDICATE}
             ORDER BY execution_time ASC, id ASC LIMIT ?3"
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw: Vec<TickerRow> = stmt
            .query_map(
                params![
                    encode_time(window.from),
                    encode_time(window.until),
                    limit as i64
                ],
                ticker_row,
            )?
            .collect::<rusqlite::Result<_>>()?;
        raw.into_iter().map(decode_ticker).collect()
    }

    async fn fetch_overdue(&self, cutoffs: OverdueCutoffs) -> StoreResult<Vec<TimeTicker>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {TICKER_COLS} FROM time_tickers WHERE {OVERDUE_PREDICATE}
             ORDER BY execution_time ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw: Vec<TickerRow> = stmt
            .query_map(
                params![
                    encode_time(cutoffs.idle_before),
                    encode_time(cutoffs.queued_before)
                ],
                ticker_row,
            )?
            .collect::<rusqlite::Result<_>>()?;
        raw.into_iter().map(decode_ticker).collect()
    }

    async fn fetch_by_ids(&self, ids: &[TickerId]) -> StoreResult<Vec<TimeTicker>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {TICKER_COLS} FROM time_tickers WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            let raw: Option<TickerRow> = stmt
                .query_row(params![id.as_ulid().to_string()], ticker_row)
                .optional()?;
            if let Some(raw) = raw {
                found.push(decode_ticker(raw)?);
            }
        }
        Ok(found)
    }

    async fn fetch_by_holder(&self, holder: &HolderId) -> StoreResult<Vec<TimeTicker>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {TICKER_COLS} FROM time_tickers
             WHERE status IN ('queued', 'inprogress') AND lock_holder = ?1
             ORDER BY execution_time ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw: Vec<TickerRow> = stmt
            .query_map(params![holder.as_str()], ticker_row)?
            .collect::<rusqlite::Result<_>>()?;
        raw.into_iter().map(decode_ticker).collect()
    }

    async fn fetch_by_status(&self, statuses: &[TickerStatus]) -> StoreResult<Vec<TimeTicker>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {TICKER_COLS} FROM time_tickers WHERE status = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut found = Vec::new();
        for status in statuses {
            let raw: Vec<TickerRow> = stmt
                .query_map(params![status.as_str()], ticker_row)?
                .collect::<rusqlite::Result<_>>()?;
            for row in raw {
                found.push(decode_ticker(row)?);
            }
        }
        found.sort_by_key(|t| (t.execution_time, t.id));
        Ok(found)
    }

    async fn get(&self, id: TickerId) -> StoreResult<Option<TimeTicker>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {TICKER_COLS} FROM time_tickers WHERE id = ?1");
        let raw: Option<TickerRow> = conn
            .query_row(&sql, params![id.as_ulid().to_string()], ticker_row)
            .optional()?;
        raw.map(decode_ticker).transpose()
    }

    async fn insert(&self, items: Vec<TimeTicker>) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        guarded_insert(
            &mut conn,
            "time_tickers",
            items,
            |t| t.id.as_ulid().to_string(),
            |tx, t| replace_ticker(tx, t),
        )
    }

    async fn save(&self, items: Vec<TimeTicker>) -> StoreResult<Vec<TimeTicker>> {
        let mut conn = self.conn.lock().unwrap();
        guarded_save(
            &mut conn,
            "time_tickers",
            items,
            |t| t.id.as_ulid().to_string(),
            |tx, t| replace_ticker(tx, t),
        )
    }

    async fn counts(&self) -> StoreResult<StatusCounts> {
        let conn = self.conn.lock().unwrap();
        table_counts(&conn, "time_tickers")
    }
}

#[async_trait]
impl WorkItemStore<CronOccurrence> for SqliteStore {
    async fn fetch_due(&self, window: DueWindow, limit: usize) -> StoreResult<Vec<CronOccurrence>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {OCCURRENCE_COLS} FROM cron_occurrences WHERE {DUE_PREDICATE}
             ORDER BY execution_time ASC, id ASC LIMIT ?3"
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw: Vec<OccurrenceRow> = stmt
            .query_map(
                params![
                    encode_time(window.from),
                    encode_time(window.until),
                    limit as i64
                ],
                occurrence_row,
            )?
            .collect::<rusqlite::Result<_>>()?;
        raw.into_iter().map(decode_occurrence).collect()
    }

    async fn fetch_overdue(&self, cutoffs: OverdueCutoffs) -> StoreResult<Vec<CronOccurrence>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {OCCURRENCE_COLS} FROM cron_occurrences WHERE {OVERDUE_PREDICATE}
             ORDER BY execution_time ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw: Vec<OccurrenceRow> = stmt
            .query_map(
                params![
                    encode_time(cutoffs.idle_before),
                    encode_time(cutoffs.queued_before)
                ],
                occurrence_row,
            )?
            .collect::<rusqlite::Result<_>>()?;
        raw.into_iter().map(decode_occurrence).collect()
    }

    async fn fetch_by_ids(&self, ids: &[OccurrenceId]) -> StoreResult<Vec<CronOccurrence>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {OCCURRENCE_COLS} FROM cron_occurrences WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            let raw: Option<OccurrenceRow> = stmt
                .query_row(params![id.as_ulid().to_string()], occurrence_row)
                .optional()?;
            if let Some(raw) = raw {
                found.push(decode_occurrence(raw)?);
            }
        }
        Ok(found)
    }

    async fn fetch_by_holder(&self, holder: &HolderId) -> StoreResult<Vec<CronOccurrence>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {OCCURRENCE_COLS} FROM cron_occurrences
             WHERE status IN ('queued', 'inprogress') AND lock_holder = ?1
             ORDER BY execution_time ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw: Vec<OccurrenceRow> = stmt
            .query_map(params![holder.as_str()], occurrence_row)?
            .collect::<rusqlite::Result<_>>()?;
        raw.into_iter().map(decode_occurrence).collect()
    }

    async fn fetch_by_status(
        &self,
        statuses: &[TickerStatus],
    ) -> StoreResult<Vec<CronOccurrence>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {OCCURRENCE_COLS} FROM cron_occurrences WHERE status = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut found = Vec::new();
        for status in statuses {
            let raw: Vec<OccurrenceRow> = stmt
                .query_map(params![status.as_str()], occurrence_row)?
                .collect::<rusqlite::Result<_>>()?;
            for row in raw {
                found.push(decode_occurrence(row)?);
            }
        }
        found.sort_by_key(|o| (o.execution_time, o.id));
        Ok(found)
    }

    async fn get(&self, id: OccurrenceId) -> StoreResult<Option<CronOccurrence>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {OCCURRENCE_COLS} FROM cron_occurrences WHERE id = ?1");
        let raw: Option<OccurrenceRow> = conn
            .query_row(&sql, params![id.as_ulid().to_string()], occurrence_row)
            .optional()?;
        raw.map(decode_occurrence).transpose()
    }

    async fn insert(&self, items: Vec<CronOccurrence>) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        guarded_insert(
            &mut conn,
            "cron_occurrences",
            items,
            |o| o.id.as_ulid().to_string(),
            |tx, o| replace_occurrence(tx, o),
        )
    }

    async fn save(&self, items: Vec<CronOccurrence>) -> StoreResult<Vec<CronOccurrence>> {
        let mut conn = self.conn.lock().unwrap();
        guarded_save(
            &mut conn,
            "cron_occurrences",
            items,
            |o| o.id.as_ulid().to_string(),
            |tx, o| replace_occurrence(tx, o),
        )
    }

    async fn counts(&self) -> StoreResult<StatusCounts> {
        let conn = self.conn.lock().unwrap();
        table_counts(&conn, "cron_occurrences")
    }
}

#[async_trait]
impl OccurrenceStore for SqliteStore {
    async fn fetch_by_parent(&self, cron_id: CronId) -> StoreResult<Vec<CronOccurrence>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {OCCURRENCE_COLS} FROM cron_occurrences WHERE cron_id = ?1
             ORDER BY execution_time ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw: Vec<OccurrenceRow> = stmt
            .query_map(params![cron_id.as_ulid().to_string()], occurrence_row)?
            .collect::<rusqlite::Result<_>>()?;
        raw.into_iter().map(decode_occurrence).collect()
    }
}

#[async_trait]
impl CronTickerStore for SqliteStore {
    async fn list(&self) -> StoreResult<Vec<CronTicker>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, expression, function, payload, created_at, updated_at
             FROM cron_tickers ORDER BY id ASC",
        )?;
        let raw: Vec<(String, String, String, String, String, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<rusqlite::Result<_>>()?;

        raw.into_iter()
            .map(|(id, expression, function, payload, created, updated)| {
                Ok(CronTicker {
                    id: CronId::from_ulid(decode_ulid(&id)?),
                    expression,
                    function,
                    payload: decode_payload(&payload)?,
                    created_at: decode_time(&created)?,
                    updated_at: decode_time(&updated)?,
                })
            })
            .collect()
    }

    async fn upsert(&self, defs: Vec<CronTicker>) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for def in &defs {
            tx.execute(
                "INSERT OR REPLACE INTO cron_tickers
                 (id, expression, function, payload, created_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6)",
                params![
                    def.id.as_ulid().to_string(),
                    def.expression,
                    def.function,
                    def.payload.to_string(),
                    encode_time(def.created_at),
                    encode_time(def.updated_at),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn remove(&self, ids: &[CronId]) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute(
                "DELETE FROM cron_tickers WHERE id = ?1",
                params![id.as_ulid().to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::domain::WorkItem;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn holder(name: &str) -> HolderId {
        HolderId::new(name)
    }

    #[tokio::test]
    async fn ticker_round_trips_with_lock_and_payload() {
        let t = Utc::now();
        let store = store();

        let mut ticker = TimeTicker::new(
            "send_report",
            serde_json::json!({"to": "ops", "retries": 3}),
            t + Duration::seconds(30),
            t,
        );
        ticker.lease.acquire(holder("worker-a"), t);
        store.insert(vec![ticker.clone()]).await.unwrap();

        let read: TimeTicker = store.get(ticker.id).await.unwrap().unwrap();
        assert_eq!(read, ticker);
    }

    #[tokio::test]
    async fn fetch_due_honors_window_edges_in_sql() {
        let t = Utc::now();
        let store = store();

        let claimable = TimeTicker::new(
            "noop",
            serde_json::Value::Null,
            t - Duration::milliseconds(1900),
            t,
        );
        let too_old = TimeTicker::new(
            "noop",
            serde_json::Value::Null,
            t - Duration::milliseconds(2500),
            t,
        );
        let at_upper_bound =
            TimeTicker::new("noop", serde_json::Value::Null, t + Duration::seconds(1), t);
        store
            .insert(vec![claimable.clone(), too_old, at_upper_bound])
            .await
            .unwrap();

        let window = DueWindow {
            from: t - Duration::seconds(2),
            until: t + Duration::seconds(1),
        };
        let due: Vec<TimeTicker> = store.fetch_due(window, 10).await.unwrap();
        assert_eq!(due.iter().map(|t| t.id).collect::<Vec<_>>(), vec![claimable.id]);
    }

    #[tokio::test]
    async fn fetch_overdue_uses_strict_cutoffs_per_status_in_sql() {
        let now = Utc::now();
        let store = store();

        let idle_overdue = TimeTicker::new(
            "noop",
            serde_json::Value::Null,
            now - Duration::milliseconds(1100),
            now,
        );
        let idle_on_cutoff = TimeTicker::new(
            "noop",
            serde_json::Value::Null,
            now - Duration::milliseconds(900),
            now,
        );
        let mut queued_overdue = TimeTicker::new(
            "noop",
            serde_json::Value::Null,
            now - Duration::milliseconds(3100),
            now,
        );
        queued_overdue.lease.acquire(holder("worker-a"), now);
        let mut queued_fresh = TimeTicker::new(
            "noop",
            serde_json::Value::Null,
            now - Duration::milliseconds(2900),
            now,
        );
        queued_fresh.lease.acquire(holder("worker-a"), now);
        let mut inprogress = TimeTicker::new(
            "noop",
            serde_json::Value::Null,
            now - Duration::seconds(60),
            now,
        );
        inprogress.lease.acquire(holder("worker-a"), now);
        inprogress.lease.begin(now);

        store
            .insert(vec![
                idle_overdue.clone(),
                idle_on_cutoff,
                queued_overdue.clone(),
                queued_fresh,
                inprogress,
            ])
            .await
            .unwrap();

        let cutoffs = OverdueCutoffs {
            idle_before: now - Duration::seconds(1),
            queued_before: now - Duration::seconds(3),
        };
        let overdue: Vec<TimeTicker> = store.fetch_overdue(cutoffs).await.unwrap();

        assert_eq!(
            overdue.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![queued_overdue.id, idle_overdue.id],
            "strict per-status cutoffs; Inprogress never surfaces"
        );
    }

    #[tokio::test]
    async fn fetch_by_holder_returns_held_items_only() {
        let t = Utc::now();
        let store = store();

        let mut held_queued = TimeTicker::new("noop", serde_json::Value::Null, t, t);
        held_queued.lease.acquire(holder("worker-a"), t);
        let mut held_inprogress =
            TimeTicker::new("noop", serde_json::Value::Null, t + Duration::seconds(1), t);
        held_inprogress.lease.acquire(holder("worker-a"), t);
        held_inprogress.lease.begin(t);
        let mut other_holder = TimeTicker::new("noop", serde_json::Value::Null, t, t);
        other_holder.lease.acquire(holder("worker-b"), t);
        let idle = TimeTicker::new("noop", serde_json::Value::Null, t, t);

        store
            .insert(vec![
                held_queued.clone(),
                held_inprogress.clone(),
                other_holder,
                idle,
            ])
            .await
            .unwrap();

        let held: Vec<TimeTicker> = store.fetch_by_holder(&holder("worker-a")).await.unwrap();
        assert_eq!(
            held.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![held_queued.id, held_inprogress.id]
        );
    }

    #[tokio::test]
    async fn fetch_by_ids_skips_missing_entries() {
        let t = Utc::now();
        let store = store();
        let a = TimeTicker::new("noop", serde_json::Value::Null, t, t);
        let b = TimeTicker::new("noop", serde_json::Value::Null, t + Duration::seconds(1), t);
        store.insert(vec![a.clone(), b.clone()]).await.unwrap();

        let ghost = TickerId::generate();
        let found: Vec<TimeTicker> = store.fetch_by_ids(&[a.id, ghost, b.id]).await.unwrap();
        assert_eq!(
            found.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![a.id, b.id],
            "unknown ids are skipped, input order kept"
        );
    }

    #[tokio::test]
    async fn fetch_by_status_matches_any_of_the_given_set() {
        let t = Utc::now();
        let store = store();

        let idle = TimeTicker::new("noop", serde_json::Value::Null, t, t);
        let mut queued =
            TimeTicker::new("noop", serde_json::Value::Null, t + Duration::seconds(1), t);
        queued.lease.acquire(holder("worker-a"), t);
        let mut failed =
            TimeTicker::new("noop", serde_json::Value::Null, t + Duration::seconds(2), t);
        failed.lease.acquire(holder("worker-a"), t);
        failed.lease.begin(t);
        failed.lease.fail("boom".into(), t);

        store
            .insert(vec![idle.clone(), queued.clone(), failed.clone()])
            .await
            .unwrap();

        let waiting: Vec<TimeTicker> = store
            .fetch_by_status(&[TickerStatus::Idle, TickerStatus::Queued])
            .await
            .unwrap();
        assert_eq!(
            waiting.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![idle.id, queued.id]
        );

        let broken: Vec<TimeTicker> =
            store.fetch_by_status(&[TickerStatus::Failed]).await.unwrap();
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].id, failed.id);
        assert_eq!(broken[0].lease.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn save_conflict_rolls_back_the_whole_batch() {
        let t = Utc::now();
        let store = store();
        let a = TimeTicker::new("noop", serde_json::Value::Null, t, t);
        let b = TimeTicker::new("noop", serde_json::Value::Null, t, t);
        store.insert(vec![a.clone(), b.clone()]).await.unwrap();

        let mut winner_a: TimeTicker = store.get(a.id).await.unwrap().unwrap();
        let mut winner_b: TimeTicker = store.get(b.id).await.unwrap().unwrap();
        let mut loser_a: TimeTicker = store.get(a.id).await.unwrap().unwrap();
        let mut loser_b: TimeTicker = store.get(b.id).await.unwrap().unwrap();

        winner_a.lease.acquire(holder("worker-a"), t);
        winner_b.lease.acquire(holder("worker-a"), t);
        let saved = store.save(vec![winner_a, winner_b]).await.unwrap();
        assert!(saved.iter().all(|t| t.version() == 2));

        loser_a.lease.acquire(holder("worker-b"), t);
        loser_b.lease.acquire(holder("worker-b"), t);
        let err = store.save(vec![loser_a, loser_b]).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict));

        for id in [a.id, b.id] {
            let stored: TimeTicker = store.get(id).await.unwrap().unwrap();
            assert!(stored.held_by(&holder("worker-a")));
            assert_eq!(stored.version(), 2);
        }
    }

    #[tokio::test]
    async fn save_of_unknown_id_is_not_found() {
        let t = Utc::now();
        let store = store();
        let ghost = TimeTicker::new("noop", serde_json::Value::Null, t, t);
        let err = store.save(vec![ghost]).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn occurrences_and_parent_index() {
        let t = Utc::now();
        let store = store();
        let cron = CronId::generate();

        let occ_1 = CronOccurrence::new(cron, t, t);
        let occ_2 = CronOccurrence::new(cron, t + Duration::seconds(60), t);
        let stray = CronOccurrence::new(CronId::generate(), t, t);
        store
            .insert(vec![occ_1.clone(), occ_2.clone(), stray])
            .await
            .unwrap();

        let of_parent = store.fetch_by_parent(cron).await.unwrap();
        assert_eq!(
            of_parent.iter().map(|o| o.id).collect::<Vec<_>>(),
            vec![occ_1.id, occ_2.id]
        );
    }

    #[tokio::test]
    async fn cron_definitions_round_trip() {
        let t = Utc::now();
        let store = store();

        let mut def = CronTicker::new("0 9 * * *", "daily_digest", serde_json::json!({}), t);
        store.upsert(vec![def.clone()]).await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec![def.clone()]);

        def.expression = "0 10 * * *".into();
        store.upsert(vec![def.clone()]).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed[0].expression, "0 10 * * *");

        store.remove(&[def.id]).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn counts_group_by_status() {
        let t = Utc::now();
        let store = store();

        let idle = TimeTicker::new("noop", serde_json::Value::Null, t, t);
        let mut queued = TimeTicker::new("noop", serde_json::Value::Null, t, t);
        queued.lease.acquire(holder("worker-a"), t);
        let mut done = TimeTicker::new("noop", serde_json::Value::Null, t, t);
        done.lease.acquire(holder("worker-a"), t);
        done.lease.begin(t);
        done.lease.complete(t);
        store.insert(vec![idle, queued, done]).await.unwrap();

        let counts = WorkItemStore::<TimeTicker>::counts(&store).await.unwrap();
        assert_eq!(counts.idle, 1);
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.done, 1);
        assert_eq!(counts.total(), 3);
    }
}
