//! Cycles and the slots they hold.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{HolderName, SlotNumber, ValidationError};

/// Lifecycle state of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    /// Accepting claims. At most one cycle is open at a time.
    Open,
    /// All slots done; a successor cycle has been opened.
    Completed,
}

impl CycleStatus {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CycleStatus {
    type Err = UnknownCycleStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "completed" => Ok(Self::Completed),
            _ => Err(UnknownCycleStatus(s.to_string())),
        }
    }
}

/// Error type for unknown cycle status strings.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown cycle status: {0}")]
pub struct UnknownCycleStatus(String);

/// One round of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    /// Sequential number, starting at 1.
    pub number: u32,
    pub status: CycleStatus,
    pub created_at: DateTime<Utc>,
    /// Set only once the cycle is completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Cycle {
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == CycleStatus::Open
    }
}

/// The state of a single slot.
///
/// `Done` is terminal. A `Reserved` slot returns to `Free` only through an
/// expiry sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotState {
    Free,
    Reserved {
        holder: HolderName,
        reserved_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    Done {
        holder: HolderName,
        completed_by: HolderName,
        completed_at: DateTime<Utc>,
    },
}

/// A slot within a specific cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub cycle_number: u32,
    pub number: SlotNumber,
    #[serde(flatten)]
    pub state: SlotState,
}

impl Slot {
    /// A fresh, unclaimed slot.
    #[must_use]
    pub const fn free(cycle_number: u32, number: SlotNumber) -> Self {
        Self {
            cycle_number,
            number,
            state: SlotState::Free,
        }
    }

    #[must_use]
    pub const fn is_free(&self) -> bool {
        matches!(self.state, SlotState::Free)
    }

    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        matches!(self.state, SlotState::Reserved { .. })
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.state, SlotState::Done { .. })
    }

    /// The claimant, for reserved and done slots.
    pub const fn holder(&self) -> Option<&HolderName> {
        match &self.state {
            SlotState::Free => None,
            SlotState::Reserved { holder, .. } | SlotState::Done { holder, .. } => Some(holder),
        }
    }

    /// When the current claim lapses, for reserved slots.
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            SlotState::Reserved { expires_at, .. } => Some(*expires_at),
            _ => None,
        }
    }

    /// Checks that the slot is open for a new claim.
    pub fn check_claimable(&self) -> Result<(), ValidationError> {
        match self.state {
            SlotState::Free => Ok(()),
            SlotState::Reserved { .. } => Err(ValidationError::AlreadyReserved { slot: self.number }),
            SlotState::Done { .. } => Err(ValidationError::AlreadyCompleted { slot: self.number }),
        }
    }

    /// Checks whether `holder` may complete this slot.
    pub fn check_completable(&self, holder: &HolderName) -> Result<(), ValidationError> {
        match &self.state {
            SlotState::Free => Err(ValidationError::NotReserved { slot: self.number }),
            SlotState::Done { .. } => Err(ValidationError::AlreadyCompleted { slot: self.number }),
            SlotState::Reserved { holder: claimant, .. } if !claimant.matches(holder) => {
                Err(ValidationError::WrongHolder { slot: self.number })
            }
            SlotState::Reserved { .. } => Ok(()),
        }
    }
}
