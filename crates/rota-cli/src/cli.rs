//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Shared rota of 30 slots per cycle.
///
/// Participants claim a slot, complete it, and when every slot in the cycle is
/// done the next cycle opens automatically. Unfinished claims lapse after the
/// configured TTL.
#[derive(Debug, Parser)]
#[command(name = "rota", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the open cycle and its slots.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Claim a free slot.
    Claim {
        /// Slot number (1-30).
        slot: u32,
        /// Name to hold the slot under.
        name: String,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Mark a claimed slot as done.
    Complete {
        /// Slot number (1-30).
        slot: u32,
        /// Name the slot was claimed under.
        name: String,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show pool-wide counters.
    Stats {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List recent cycles.
    History {
        /// Number of cycles to show (1-100).
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the activity feed.
    Activity {
        /// Number of entries to show (5-100).
        #[arg(long, default_value_t = 30)]
        limit: usize,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show claim and completion counts for a participant.
    Profile {
        /// Participant name (case-insensitive).
        name: String,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}
