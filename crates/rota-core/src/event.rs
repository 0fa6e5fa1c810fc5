//! Domain events raised by the allocation engine.
//!
//! Events are collected while a transaction runs and handed to observers only
//! after it commits. An event therefore always describes a durable change.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{HolderName, SlotNumber};

/// Canonical event type strings, the single source of truth for storage and
/// fan-out routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    SlotClaimed,
    ClaimReleased,
    SlotCompleted,
    CycleRolledOver,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SlotClaimed => "slot_claimed",
            Self::ClaimReleased => "claim_released",
            Self::SlotCompleted => "slot_completed",
            Self::CycleRolledOver => "cycle_rolled_over",
        };
        write!(f, "{s}")
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slot_claimed" => Ok(Self::SlotClaimed),
            "claim_released" => Ok(Self::ClaimReleased),
            "slot_completed" => Ok(Self::SlotCompleted),
            "cycle_rolled_over" => Ok(Self::CycleRolledOver),
            _ => Err(UnknownEventType(s.to_string())),
        }
    }
}

impl Serialize for EventType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for unknown event type strings.
#[derive(Debug, Clone)]
pub struct UnknownEventType(String);

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for UnknownEventType {}

/// A committed change to the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEvent {
    /// Unique identifier, stable across redelivery.
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub kind: EventKind,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A free slot was claimed.
    SlotClaimed {
        cycle_number: u32,
        slot_number: SlotNumber,
        holder: HolderName,
        expires_at: DateTime<Utc>,
    },
    /// A lapsed claim was swept back to free.
    ClaimReleased {
        cycle_number: u32,
        slot_number: SlotNumber,
        holder: HolderName,
        expired_at: DateTime<Utc>,
    },
    /// A reserved slot was marked done by its claimant.
    SlotCompleted {
        cycle_number: u32,
        slot_number: SlotNumber,
        holder: HolderName,
    },
    /// The last slot of a cycle was completed and the next cycle opened.
    CycleRolledOver {
        completed_cycle: u32,
        next_cycle: u32,
    },
}

impl AllocationEvent {
    /// Creates an event with a fresh identifier.
    pub fn new(occurred_at: DateTime<Utc>, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at,
            kind,
        }
    }

    pub const fn event_type(&self) -> EventType {
        match self.kind {
            EventKind::SlotClaimed { .. } => EventType::SlotClaimed,
            EventKind::ClaimReleased { .. } => EventType::ClaimReleased,
            EventKind::SlotCompleted { .. } => EventType::SlotCompleted,
            EventKind::CycleRolledOver { .. } => EventType::CycleRolledOver,
        }
    }

    /// The cycle the event concerns. For rollovers, the cycle that closed.
    pub const fn cycle_number(&self) -> u32 {
        match self.kind {
            EventKind::SlotClaimed { cycle_number, .. }
            | EventKind::ClaimReleased { cycle_number, .. }
            | EventKind::SlotCompleted { cycle_number, .. } => cycle_number,
            EventKind::CycleRolledOver {
                completed_cycle, ..
            } => completed_cycle,
        }
    }

    pub const fn slot_number(&self) -> Option<SlotNumber> {
        match self.kind {
            EventKind::SlotClaimed { slot_number, .. }
            | EventKind::ClaimReleased { slot_number, .. }
            | EventKind::SlotCompleted { slot_number, .. } => Some(slot_number),
            EventKind::CycleRolledOver { .. } => None,
        }
    }

    /// The holder the event is about, if any.
    pub const fn actor(&self) -> Option<&HolderName> {
        match &self.kind {
            EventKind::SlotClaimed { holder, .. }
            | EventKind::ClaimReleased { holder, .. }
            | EventKind::SlotCompleted { holder, .. } => Some(holder),
            EventKind::CycleRolledOver { .. } => None,
        }
    }

    /// One-line human-readable summary.
    pub fn message(&self) -> String {
        match &self.kind {
            EventKind::SlotClaimed {
                cycle_number,
                slot_number,
                holder,
                ..
            } => format!("{holder} claimed slot {slot_number} of cycle {cycle_number}"),
            EventKind::ClaimReleased {
                cycle_number,
                slot_number,
                holder,
                ..
            } => format!("claim by {holder} on slot {slot_number} of cycle {cycle_number} expired"),
            EventKind::SlotCompleted {
                cycle_number,
                slot_number,
                holder,
            } => format!("{holder} completed slot {slot_number} of cycle {cycle_number}"),
            EventKind::CycleRolledOver {
                completed_cycle,
                next_cycle,
            } => format!("cycle {completed_cycle} completed, cycle {next_cycle} opened"),
        }
    }
}
