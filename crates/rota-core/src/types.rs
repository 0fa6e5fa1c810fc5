//! Core type definitions with validation.

use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of slots in every cycle.
pub const SLOTS_PER_CYCLE: u8 = 30;

/// Maximum length of a holder name, in characters, after trimming.
pub const MAX_HOLDER_NAME_LEN: usize = 120;

/// Validation errors for user input and allocation rules.
///
/// These are rejections: the caller asked for something the pool cannot do.
/// None of them are worth retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The holder name was empty after trimming.
    #[error("name required")]
    NameRequired,

    /// The holder name exceeded [`MAX_HOLDER_NAME_LEN`].
    #[error("name must be at most {max} characters, got {len}")]
    NameTooLong { max: usize, len: usize },

    /// The slot number was outside 1..=30.
    #[error("slot number must be between 1 and 30, got {value}")]
    SlotOutOfRange { value: u32 },

    /// The claim TTL was outside the supported range.
    #[error("claim TTL must be between {min} and {max} hours, got {value}")]
    ClaimTtlOutOfRange { value: u32, min: u32, max: u32 },

    /// The slot does not exist in the active cycle.
    #[error("slot {slot} not found in active cycle")]
    SlotNotFound { slot: SlotNumber },

    /// The slot is held by someone else.
    #[error("slot {slot} is already reserved")]
    AlreadyReserved { slot: SlotNumber },

    /// The slot has already been completed.
    #[error("slot {slot} is already completed")]
    AlreadyCompleted { slot: SlotNumber },

    /// Completion was attempted on a free slot.
    #[error("cannot complete an unreserved slot ({slot})")]
    NotReserved { slot: SlotNumber },

    /// Completion was attempted by someone other than the claimant.
    #[error("only the original claimant may complete slot {slot}")]
    WrongHolder { slot: SlotNumber },
}

/// A slot position within a cycle, always in 1..=30.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SlotNumber(u8);

impl SlotNumber {
    /// Creates a slot number after range validation.
    pub fn new(value: u32) -> Result<Self, ValidationError> {
        match u8::try_from(value) {
            Ok(n) if (1..=SLOTS_PER_CYCLE).contains(&n) => Ok(Self(n)),
            _ => Err(ValidationError::SlotOutOfRange { value }),
        }
    }

    /// Every slot number of a cycle, in order.
    pub fn all() -> impl Iterator<Item = Self> {
        (1..=SLOTS_PER_CYCLE).map(Self)
    }

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u32> for SlotNumber {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SlotNumber> for u32 {
    fn from(slot: SlotNumber) -> Self {
        Self::from(slot.0)
    }
}

impl fmt::Display for SlotNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated holder name.
///
/// Names are stored trimmed, exactly as entered otherwise. Ownership checks
/// compare them case-insensitively via [`HolderName::matches`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HolderName(String);

impl HolderName {
    /// Trims and validates a holder name.
    pub fn new(name: impl AsRef<str>) -> Result<Self, ValidationError> {
        let trimmed = name.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ValidationError::NameRequired);
        }
        let len = trimmed.chars().count();
        if len > MAX_HOLDER_NAME_LEN {
            return Err(ValidationError::NameTooLong {
                max: MAX_HOLDER_NAME_LEN,
                len,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive identity comparison.
    pub fn matches(&self, other: &Self) -> bool {
        self.0.to_lowercase() == other.0.to_lowercase()
    }
}

impl TryFrom<String> for HolderName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<HolderName> for String {
    fn from(name: HolderName) -> Self {
        name.0
    }
}

impl fmt::Display for HolderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for HolderName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// How long a claim stays valid, in whole hours within \[1, 168\].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimTtl(u32);

impl ClaimTtl {
    /// The shortest supported TTL (one hour).
    pub const MIN: Self = Self(1);

    /// The longest supported TTL (one week).
    pub const MAX: Self = Self(168);

    /// Creates a TTL after validation.
    pub const fn new(hours: u32) -> Result<Self, ValidationError> {
        if hours < Self::MIN.0 || hours > Self::MAX.0 {
            return Err(ValidationError::ClaimTtlOutOfRange {
                value: hours,
                min: Self::MIN.0,
                max: Self::MAX.0,
            });
        }
        Ok(Self(hours))
    }

    /// Creates a TTL, clamping to \[1, 168\].
    #[must_use]
    pub const fn clamped(hours: u32) -> Self {
        if hours < Self::MIN.0 {
            Self::MIN
        } else if hours > Self::MAX.0 {
            Self::MAX
        } else {
            Self(hours)
        }
    }

    #[must_use]
    pub const fn hours(self) -> u32 {
        self.0
    }

    /// The TTL as a duration to add to a claim time.
    #[must_use]
    pub fn duration(self) -> Duration {
        Duration::hours(i64::from(self.0))
    }
}

impl Default for ClaimTtl {
    fn default() -> Self {
        Self(18)
    }
}

impl fmt::Display for ClaimTtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h", self.0)
    }
}
