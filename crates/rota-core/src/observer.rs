//! Collaborator interfaces the engine calls after a successful commit.
//!
//! Both are best-effort. The engine logs their failures, including panics, and
//! carries on; a failing observer never changes the outcome of an operation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::AllocationEvent;
use crate::types::HolderName;

/// Failure reported by an observer.
#[derive(Debug, Error)]
#[error("{collaborator}: {message}")]
pub struct CollaboratorError {
    pub collaborator: &'static str,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: &'static str, message: impl fmt::Display) -> Self {
        Self {
            collaborator,
            message: message.to_string(),
        }
    }
}

/// Receives domain events (notification fan-out, activity feeds).
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &AllocationEvent) -> Result<(), CollaboratorError>;
}

/// An action a participant performed, for per-participant counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Claim,
    Complete,
}

/// Tracks per-participant statistics.
///
/// Called exactly once per committed claim or completion.
pub trait ParticipantStats: Send + Sync {
    fn record_action(
        &self,
        holder: &HolderName,
        action: ParticipantAction,
    ) -> Result<(), CollaboratorError>;
}
