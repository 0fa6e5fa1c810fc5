//! CLI subcommand implementations.

pub mod activity;
pub mod claim;
pub mod complete;
pub mod history;
pub mod profile;
pub mod stats;
pub mod status;
mod util;
