//! Default observer implementations backed by their own connection.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use uuid::Uuid;

use rota_core::{
    AllocationEvent, CollaboratorError, EventSink, EventType, HolderName, ParticipantAction,
    ParticipantStats, UnknownEventType,
};

use crate::{Database, DbError, format_timestamp, parse_timestamp};

/// One row of the activity feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub event_type: EventType,
    pub actor_name: Option<String>,
    pub cycle_number: u32,
    pub slot_number: Option<u8>,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Appends every event to the `activity_events` table.
pub struct ActivityLog {
    db: Mutex<Database>,
}

impl ActivityLog {
    pub const fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Stores an event. Returns `false` if an event with the same id was already stored.
    pub fn record(&self, event: &AllocationEvent) -> Result<bool, DbError> {
        let data = serde_json::to_string(&event.kind).map_err(|err| DbError::InvalidRow {
            table: "activity_events",
            key: event.id.to_string(),
            message: err.to_string(),
        })?;
        let db = lock(&self.db)?;
        let inserted = db.conn.execute(
            "
            INSERT OR IGNORE INTO activity_events
            (id, type, actor_name, cycle_number, slot_number, message, occurred_at, data)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                event.id.to_string(),
                event.event_type().to_string(),
                event.actor().map(HolderName::as_str),
                event.cycle_number(),
                event.slot_number().map(|slot| slot.get()),
                event.message(),
                format_timestamp(event.occurred_at),
                data,
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Lists the newest entries first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ActivityEntry>, DbError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let db = lock(&self.db)?;
        let mut stmt = db.conn.prepare(
            "
            SELECT id, type, actor_name, cycle_number, slot_number, message, occurred_at
            FROM activity_events
            ORDER BY occurred_at DESC, rowid DESC
            LIMIT ?
            ",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Option<u8>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, event_type, actor_name, cycle_number, slot_number, message, occurred_at) =
                row?;
            let invalid = |message: String| DbError::InvalidRow {
                table: "activity_events",
                key: id.clone(),
                message,
            };
            entries.push(ActivityEntry {
                id: Uuid::parse_str(&id).map_err(|err| invalid(err.to_string()))?,
                event_type: event_type
                    .parse()
                    .map_err(|err: UnknownEventType| invalid(err.to_string()))?,
                actor_name,
                cycle_number,
                slot_number,
                message,
                occurred_at: parse_timestamp(&occurred_at, "activity_events.occurred_at")?,
            });
        }
        Ok(entries)
    }
}

impl EventSink for ActivityLog {
    fn emit(&self, event: &AllocationEvent) -> Result<(), CollaboratorError> {
        match self.record(event) {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::debug!(event_id = %event.id, "duplicate activity event ignored");
                Ok(())
            }
            Err(err) => Err(CollaboratorError::new("activity log", err)),
        }
    }
}

/// Per-participant counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantProgress {
    /// The name as last written by the participant.
    pub name: String,
    pub claims_count: u32,
    pub completions_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Keeps claim and completion counts per participant.
///
/// Names are matched case-insensitively.
pub struct ParticipantLedger {
    db: Mutex<Database>,
}

impl ParticipantLedger {
    pub const fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn record_at(
        &self,
        holder: &HolderName,
        action: ParticipantAction,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let (claims, completions) = match action {
            ParticipantAction::Claim => (1, 0),
            ParticipantAction::Complete => (0, 1),
        };
        let now = format_timestamp(now);
        let db = lock(&self.db)?;
        db.conn.execute(
            "
            INSERT INTO participants
            (name_key, name, claims_count, completions_count, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(name_key) DO UPDATE SET
                name = excluded.name,
                claims_count = claims_count + excluded.claims_count,
                completions_count = completions_count + excluded.completions_count,
                updated_at = excluded.updated_at
            ",
            params![
                holder.as_str().to_lowercase(),
                holder.as_str(),
                claims,
                completions,
                now
            ],
        )?;
        Ok(())
    }

    /// Counters for a participant, or `None` if they never claimed or completed.
    pub fn profile(&self, name: &HolderName) -> Result<Option<ParticipantProgress>, DbError> {
        let db = lock(&self.db)?;
        let row = db
            .conn
            .query_row(
                "
                SELECT name, claims_count, completions_count, created_at, updated_at
                FROM participants
                WHERE name_key = ?
                ",
                [name.as_str().to_lowercase()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(
            |(name, claims_count, completions_count, created_at, updated_at)| {
                Ok::<_, DbError>(ParticipantProgress {
                    name,
                    claims_count,
                    completions_count,
                    created_at: parse_timestamp(&created_at, "participants.created_at")?,
                    updated_at: parse_timestamp(&updated_at, "participants.updated_at")?,
                })
            },
        )
        .transpose()
    }
}

impl ParticipantStats for ParticipantLedger {
    fn record_action(
        &self,
        holder: &HolderName,
        action: ParticipantAction,
    ) -> Result<(), CollaboratorError> {
        self.record_at(holder, action, Utc::now())
            .map_err(|err| CollaboratorError::new("participant ledger", err))
    }
}

fn lock(db: &Mutex<Database>) -> Result<MutexGuard<'_, Database>, DbError> {
    db.lock().map_err(|_| DbError::Poisoned)
}
