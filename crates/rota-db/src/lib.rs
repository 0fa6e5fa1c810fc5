//! Storage layer and allocation engine for the rota slot pool.
//!
//! Provides persistence for cycles, slots, the activity feed and participant
//! counters using `rusqlite`, plus the [`AllocationEngine`] that runs every
//! claim, completion and rollover as one SQLite transaction.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A `Database` (and an engine built on it) can be moved to a thread but not shared.
//!
//! For concurrent access, give every thread its own `Database` opened on the same
//! file. Mutating operations begin with `BEGIN IMMEDIATE`, so SQLite hands the write
//! lock to one connection at a time; the others wait in the busy handler for up to
//! the configured busy timeout.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in ISO 8601 format with millisecond precision
//! (e.g., `2024-01-15T10:30:00.000Z`). Lexicographic ordering matches chronological
//! ordering, which the due-soon and history queries rely on.
//!
//! ## Slot State Encoding
//!
//! Slot state is stored as nullable columns (`holder`, `reserved_at`, `expires_at`,
//! `completed_by`, `completed_at`). CHECK constraints keep the combinations
//! consistent and [`slot_from_columns`] is the only place that turns them back into
//! a [`SlotState`].

mod activity;
mod engine;
mod store;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;

use rota_core::{Cycle, CycleStatus, HolderName, Slot, SlotNumber, SlotState};

pub use activity::{ActivityEntry, ActivityLog, ParticipantLedger, ParticipantProgress};
pub use engine::{
    AllocationEngine, AllocationError, ClaimResult, CompleteResult, CycleSnapshot, PoolStats,
};

/// How long a connection waits for a competing writer by default.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp in {column}: {timestamp}")]
    TimestampParse {
        column: &'static str,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored row does not describe a valid record.
    #[error("invalid {table} row {key}: {message}")]
    InvalidRow {
        table: &'static str,
        key: String,
        message: String,
    },
    /// The active cycle could not be resolved or created.
    #[error("could not determine or create the active cycle after {attempts} attempts")]
    ActiveCycleUnavailable { attempts: u32 },
    /// A write matched no row although the transaction held the write lock.
    #[error("slot {cycle_number}/{slot_number} changed underneath the transaction")]
    SlotConflict { cycle_number: u32, slot_number: u8 },
    /// A connection mutex was poisoned by a panicking thread.
    #[error("connection lock poisoned")]
    Poisoned,
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// Summary of one cycle, for history listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub number: u32,
    pub status: CycleStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_slots: u32,
    pub participants: u32,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Opens a database, waiting up to `busy_timeout` for competing writers.
    pub fn open_with_busy_timeout(path: &Path, busy_timeout: Duration) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cycles (
                number INTEGER PRIMARY KEY CHECK (number >= 1),
                status TEXT NOT NULL CHECK (status IN ('open', 'completed')),
                created_at TEXT NOT NULL,
                completed_at TEXT,
                CHECK ((status = 'completed') = (completed_at IS NOT NULL))
            );

            -- At most one open cycle, enforced by storage
            CREATE UNIQUE INDEX IF NOT EXISTS idx_cycles_single_open
                ON cycles(status) WHERE status = 'open';

            -- Slot state lives in nullable columns:
            -- free: all NULL; reserved: holder, reserved_at, expires_at;
            -- done: holder, reserved_at, completed_by, completed_at (expires_at cleared)
            CREATE TABLE IF NOT EXISTS slots (
                cycle_number INTEGER NOT NULL,
                slot_number INTEGER NOT NULL CHECK (slot_number BETWEEN 1 AND 30),
                holder TEXT,
                reserved_at TEXT,
                expires_at TEXT,
                completed_by TEXT,
                completed_at TEXT,
                PRIMARY KEY (cycle_number, slot_number),
                FOREIGN KEY (cycle_number) REFERENCES cycles(number) ON DELETE CASCADE,
                CHECK ((holder IS NULL) = (reserved_at IS NULL)),
                CHECK ((completed_by IS NULL) = (completed_at IS NULL)),
                CHECK (completed_at IS NULL OR (holder IS NOT NULL AND expires_at IS NULL)),
                CHECK (completed_at IS NOT NULL OR (holder IS NULL) = (expires_at IS NULL))
            );

            CREATE INDEX IF NOT EXISTS idx_slots_expires ON slots(cycle_number, expires_at);

            -- Activity feed, appended by the activity log sink
            CREATE TABLE IF NOT EXISTS activity_events (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                actor_name TEXT,
                cycle_number INTEGER,
                slot_number INTEGER,
                message TEXT NOT NULL,
                occurred_at TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_activity_occurred ON activity_events(occurred_at);
            CREATE INDEX IF NOT EXISTS idx_activity_type ON activity_events(type, occurred_at);

            -- Per-participant counters; name_key is the lowercased name
            CREATE TABLE IF NOT EXISTS participants (
                name_key TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                claims_count INTEGER NOT NULL DEFAULT 0,
                completions_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Lists cycles newest first, at most `limit` of them.
    pub fn recent_cycles(&self, limit: usize) -> Result<Vec<CycleSummary>, DbError> {
        store::recent_cycles(&self.conn, limit)
    }

    /// Loads a cycle and its slots, ordered by slot number.
    ///
    /// This is a plain read: expired claims are reported as stored.
    pub fn cycle_with_slots(&self, number: u32) -> Result<Option<(Cycle, Vec<Slot>)>, DbError> {
        let Some(cycle) = store::cycle(&self.conn, number)? else {
            return Ok(None);
        };
        let slots = store::cycle_slots(&self.conn, number)?;
        Ok(Some((cycle, slots)))
    }
}

/// Raw slot columns as stored.
#[derive(Debug)]
struct SlotColumns {
    cycle_number: u32,
    slot_number: u32,
    holder: Option<String>,
    reserved_at: Option<String>,
    expires_at: Option<String>,
    completed_by: Option<String>,
    completed_at: Option<String>,
}

/// Derives a [`Slot`] from its stored columns.
///
/// This is the single place where the nullable-column encoding is interpreted.
fn slot_from_columns(columns: SlotColumns) -> Result<Slot, DbError> {
    let key = format!("{}/{}", columns.cycle_number, columns.slot_number);
    let invalid = |message: &str| DbError::InvalidRow {
        table: "slots",
        key: key.clone(),
        message: message.to_string(),
    };
    let number = SlotNumber::new(columns.slot_number).map_err(|err| invalid(&err.to_string()))?;
    let holder = columns
        .holder
        .map(HolderName::new)
        .transpose()
        .map_err(|err| invalid(&err.to_string()))?;

    let state = match (holder, columns.completed_at, columns.expires_at) {
        (Some(holder), Some(completed_at), _) => {
            let completed_by = columns
                .completed_by
                .ok_or_else(|| invalid("completed without completed_by"))
                .and_then(|name| HolderName::new(name).map_err(|err| invalid(&err.to_string())))?;
            SlotState::Done {
                holder,
                completed_by,
                completed_at: parse_timestamp(&completed_at, "slots.completed_at")?,
            }
        }
        (None, Some(_), _) => return Err(invalid("completed without holder")),
        (Some(holder), None, Some(expires_at)) => {
            let reserved_at = columns
                .reserved_at
                .ok_or_else(|| invalid("reserved without reserved_at"))?;
            SlotState::Reserved {
                holder,
                reserved_at: parse_timestamp(&reserved_at, "slots.reserved_at")?,
                expires_at: parse_timestamp(&expires_at, "slots.expires_at")?,
            }
        }
        (Some(_), None, None) => return Err(invalid("reserved without expires_at")),
        (None, None, Some(_)) => return Err(invalid("expiry without holder")),
        (None, None, None) => SlotState::Free,
    };

    Ok(Slot {
        cycle_number: columns.cycle_number,
        number,
        state,
    })
}

fn cycle_from_columns(
    number: u32,
    status: &str,
    created_at: &str,
    completed_at: Option<&str>,
) -> Result<Cycle, DbError> {
    let status = status.parse::<CycleStatus>().map_err(|err| DbError::InvalidRow {
        table: "cycles",
        key: number.to_string(),
        message: err.to_string(),
    })?;
    Ok(Cycle {
        number,
        status,
        created_at: parse_timestamp(created_at, "cycles.created_at")?,
        completed_at: completed_at
            .map(|ts| parse_timestamp(ts, "cycles.completed_at"))
            .transpose()?,
    })
}

fn parse_timestamp(timestamp: &str, column: &'static str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            column,
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
