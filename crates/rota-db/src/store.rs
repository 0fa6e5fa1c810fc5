//! Cycle and slot tables.
//!
//! Every function takes a plain `Connection`; callers pass a `Transaction` (or a
//! `Savepoint`) so that lock, read, decide and write happen under one write lock.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, ffi, params};

use rota_core::{Cycle, CycleStatus, HolderName, Release, Slot, SlotNumber, sweep};

use crate::{
    CycleSummary, DbError, SlotColumns, cycle_from_columns, format_timestamp, slot_from_columns,
};

/// How many times the read-then-create sequence for a cycle is attempted.
pub(crate) const CREATE_ATTEMPTS: u32 = 2;

const SLOT_COLUMNS: &str =
    "cycle_number, slot_number, holder, reserved_at, expires_at, completed_by, completed_at";

/// Returns the open cycle, creating the next one if none is open.
///
/// Creation runs inside a savepoint. A uniqueness conflict (another writer created
/// the same number first) rolls the savepoint back and the lookup is retried.
pub(crate) fn get_or_create_active_cycle(
    tx: &mut Transaction<'_>,
    now: DateTime<Utc>,
) -> Result<Cycle, DbError> {
    for attempt in 1..=CREATE_ATTEMPTS {
        if let Some(cycle) = open_cycle(tx)? {
            return Ok(cycle);
        }

        let number = last_cycle_number(tx)? + 1;
        let savepoint = tx.savepoint()?;
        match insert_cycle(&savepoint, number, now) {
            Ok(cycle) => {
                savepoint.commit()?;
                tracing::info!(cycle = number, "opened cycle");
                return Ok(cycle);
            }
            Err(err) if is_unique_violation(&err) => {
                tracing::warn!(cycle = number, attempt, error = %err, "cycle creation conflict");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(DbError::ActiveCycleUnavailable {
        attempts: CREATE_ATTEMPTS,
    })
}

/// Inserts a cycle with all of its slots free.
fn insert_cycle(conn: &Connection, number: u32, now: DateTime<Utc>) -> rusqlite::Result<Cycle> {
    conn.execute(
        "INSERT INTO cycles (number, status, created_at) VALUES (?, ?, ?)",
        params![number, CycleStatus::Open.as_str(), format_timestamp(now)],
    )?;
    let mut stmt = conn.prepare("INSERT INTO slots (cycle_number, slot_number) VALUES (?, ?)")?;
    for slot in SlotNumber::all() {
        stmt.execute(params![number, slot.get()])?;
    }
    Ok(Cycle {
        number,
        status: CycleStatus::Open,
        created_at: now,
        completed_at: None,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// The open cycle with the highest number, if any.
pub(crate) fn open_cycle(conn: &Connection) -> Result<Option<Cycle>, DbError> {
    let row = conn
        .query_row(
            "
            SELECT number, status, created_at, completed_at
            FROM cycles
            WHERE status = 'open'
            ORDER BY number DESC
            LIMIT 1
            ",
            [],
            cycle_row,
        )
        .optional()?;
    row.map(|(number, status, created_at, completed_at)| {
        cycle_from_columns(number, &status, &created_at, completed_at.as_deref())
    })
    .transpose()
}

pub(crate) fn cycle(conn: &Connection, number: u32) -> Result<Option<Cycle>, DbError> {
    let row = conn
        .query_row(
            "SELECT number, status, created_at, completed_at FROM cycles WHERE number = ?",
            [number],
            cycle_row,
        )
        .optional()?;
    row.map(|(number, status, created_at, completed_at)| {
        cycle_from_columns(number, &status, &created_at, completed_at.as_deref())
    })
    .transpose()
}

type CycleRow = (u32, String, String, Option<String>);

fn cycle_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CycleRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn last_cycle_number(conn: &Connection) -> Result<u32, DbError> {
    let last: u32 = conn.query_row("SELECT COALESCE(MAX(number), 0) FROM cycles", [], |row| {
        row.get(0)
    })?;
    Ok(last)
}

/// Marks a cycle completed. Returns `false` if it was not open.
pub(crate) fn close_cycle(conn: &Connection, number: u32, now: DateTime<Utc>) -> Result<bool, DbError> {
    let changed = conn.execute(
        "UPDATE cycles SET status = 'completed', completed_at = ? WHERE number = ? AND status = 'open'",
        params![format_timestamp(now), number],
    )?;
    Ok(changed == 1)
}

fn slot_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SlotColumns> {
    Ok(SlotColumns {
        cycle_number: row.get(0)?,
        slot_number: row.get(1)?,
        holder: row.get(2)?,
        reserved_at: row.get(3)?,
        expires_at: row.get(4)?,
        completed_by: row.get(5)?,
        completed_at: row.get(6)?,
    })
}

/// All slots of a cycle, ordered by slot number.
pub(crate) fn cycle_slots(conn: &Connection, cycle_number: u32) -> Result<Vec<Slot>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SLOT_COLUMNS} FROM slots WHERE cycle_number = ? ORDER BY slot_number ASC"
    ))?;
    let rows = stmt.query_map([cycle_number], slot_row)?;
    let mut slots = Vec::new();
    for row in rows {
        slots.push(slot_from_columns(row?)?);
    }
    Ok(slots)
}

pub(crate) fn slot(
    conn: &Connection,
    cycle_number: u32,
    number: SlotNumber,
) -> Result<Option<Slot>, DbError> {
    let columns = conn
        .query_row(
            &format!("SELECT {SLOT_COLUMNS} FROM slots WHERE cycle_number = ? AND slot_number = ?"),
            params![cycle_number, number.get()],
            slot_row,
        )
        .optional()?;
    columns.map(slot_from_columns).transpose()
}

/// Frees every lapsed claim in a cycle and returns what was released.
pub(crate) fn sweep_cycle(
    conn: &Connection,
    cycle_number: u32,
    now: DateTime<Utc>,
) -> Result<Vec<Release>, DbError> {
    let slots = cycle_slots(conn, cycle_number)?;
    let released = sweep(now, &slots);
    if released.is_empty() {
        return Ok(released);
    }

    let mut stmt = conn.prepare(
        "
        UPDATE slots
        SET holder = NULL, reserved_at = NULL, expires_at = NULL
        WHERE cycle_number = ? AND slot_number = ? AND completed_at IS NULL
        ",
    )?;
    for release in &released {
        stmt.execute(params![cycle_number, release.slot.number.get()])?;
    }
    tracing::debug!(
        cycle = cycle_number,
        released = released.len(),
        "swept expired claims"
    );
    Ok(released)
}

pub(crate) fn reserve_slot(
    conn: &Connection,
    cycle_number: u32,
    number: SlotNumber,
    holder: &HolderName,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<(), DbError> {
    let changed = conn.execute(
        "
        UPDATE slots
        SET holder = ?, reserved_at = ?, expires_at = ?
        WHERE cycle_number = ? AND slot_number = ? AND holder IS NULL AND completed_at IS NULL
        ",
        params![
            holder.as_str(),
            format_timestamp(now),
            format_timestamp(expires_at),
            cycle_number,
            number.get(),
        ],
    )?;
    expect_one_row(changed, cycle_number, number)
}

pub(crate) fn complete_slot(
    conn: &Connection,
    cycle_number: u32,
    number: SlotNumber,
    holder: &HolderName,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    let changed = conn.execute(
        "
        UPDATE slots
        SET completed_by = ?, completed_at = ?, expires_at = NULL
        WHERE cycle_number = ? AND slot_number = ? AND holder IS NOT NULL AND completed_at IS NULL
        ",
        params![
            holder.as_str(),
            format_timestamp(now),
            cycle_number,
            number.get()
        ],
    )?;
    expect_one_row(changed, cycle_number, number)
}

fn expect_one_row(changed: usize, cycle_number: u32, number: SlotNumber) -> Result<(), DbError> {
    if changed == 1 {
        Ok(())
    } else {
        Err(DbError::SlotConflict {
            cycle_number,
            slot_number: number.get(),
        })
    }
}

pub(crate) fn count_done(conn: &Connection, cycle_number: u32) -> Result<u32, DbError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM slots WHERE cycle_number = ? AND completed_at IS NOT NULL",
        [cycle_number],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub(crate) fn count_completed_cycles(conn: &Connection) -> Result<u32, DbError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM cycles WHERE status = 'completed'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Reserved claims in a cycle that lapse within `window` after `now`.
pub(crate) fn count_due_soon(
    conn: &Connection,
    cycle_number: u32,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<u32, DbError> {
    let count = conn.query_row(
        "
        SELECT COUNT(*) FROM slots
        WHERE cycle_number = ? AND completed_at IS NULL AND expires_at > ? AND expires_at <= ?
        ",
        params![
            cycle_number,
            format_timestamp(now),
            format_timestamp(now + window)
        ],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Distinct holder names across all cycles, compared case-insensitively.
pub(crate) fn count_participants(conn: &Connection) -> Result<u32, DbError> {
    let mut stmt = conn.prepare("SELECT DISTINCT holder FROM slots WHERE holder IS NOT NULL")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut names = HashSet::new();
    for row in rows {
        names.insert(row?.to_lowercase());
    }
    Ok(u32::try_from(names.len()).unwrap_or(u32::MAX))
}

pub(crate) fn recent_cycles(conn: &Connection, limit: usize) -> Result<Vec<CycleSummary>, DbError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "
        SELECT number, status, created_at, completed_at
        FROM cycles
        ORDER BY number DESC
        LIMIT ?
        ",
    )?;
    let rows = stmt.query_map([limit], cycle_row)?;
    let mut cycles = Vec::new();
    for row in rows {
        let (number, status, created_at, completed_at) = row?;
        cycles.push(cycle_from_columns(
            number,
            &status,
            &created_at,
            completed_at.as_deref(),
        )?);
    }

    let mut summaries = Vec::with_capacity(cycles.len());
    for cycle in cycles {
        let slots = cycle_slots(conn, cycle.number)?;
        let completed_slots = slots.iter().filter(|slot| slot.is_done()).count();
        let participants: HashSet<String> = slots
            .iter()
            .filter_map(Slot::holder)
            .map(|holder| holder.as_str().to_lowercase())
            .collect();
        summaries.push(CycleSummary {
            number: cycle.number,
            status: cycle.status,
            created_at: cycle.created_at,
            completed_at: cycle.completed_at,
            completed_slots: u32::try_from(completed_slots).unwrap_or(u32::MAX),
            participants: u32::try_from(participants.len()).unwrap_or(u32::MAX),
        });
    }
    Ok(summaries)
}
