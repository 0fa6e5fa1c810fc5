//! Core domain logic for the rota slot pool.
//!
//! This crate contains the storage-independent pieces:
//! - Types: validated slot numbers, holder names and claim TTLs
//! - Cycles and slots, with slot state as an explicit sum type
//! - The expiry sweeper, a pure function over a cycle's slots
//! - Domain events and the observer traits the engine notifies

pub mod event;
pub mod observer;
pub mod slot;
mod sweep;
pub mod types;

pub use event::{AllocationEvent, EventKind, EventType, UnknownEventType};
pub use observer::{CollaboratorError, EventSink, ParticipantAction, ParticipantStats};
pub use slot::{Cycle, CycleStatus, Slot, SlotState, UnknownCycleStatus};
pub use sweep::{Release, sweep};
pub use types::{
    ClaimTtl, HolderName, MAX_HOLDER_NAME_LEN, SLOTS_PER_CYCLE, SlotNumber, ValidationError,
};
