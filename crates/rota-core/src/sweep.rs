//! Lazy expiry of abandoned claims.
//!
//! There is no background timer. Whoever next touches a cycle sweeps it inside
//! their own transaction, before deciding anything about its slots.

use chrono::{DateTime, Utc};

use crate::slot::{Slot, SlotState};
use crate::types::HolderName;

/// A claim that lapsed and was returned to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// The slot after release (always free).
    pub slot: Slot,
    /// Who held the claim.
    pub previous_holder: HolderName,
    /// When the claim lapsed.
    pub expired_at: DateTime<Utc>,
}

/// Returns every reserved slot whose claim has lapsed at `now`, freed.
///
/// A claim lapses when `now >= expires_at`. Free and done slots are never
/// released. The input is left untouched; callers persist the result.
pub fn sweep(now: DateTime<Utc>, slots: &[Slot]) -> Vec<Release> {
    slots
        .iter()
        .filter_map(|slot| match &slot.state {
            SlotState::Reserved {
                holder, expires_at, ..
            } if now >= *expires_at => Some(Release {
                slot: Slot::free(slot.cycle_number, slot.number),
                previous_holder: holder.clone(),
                expired_at: *expires_at,
            }),
            _ => None,
        })
        .collect()
}
