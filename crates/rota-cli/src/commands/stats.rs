//! Stats command: pool-wide counters.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::util::write_json;
use crate::Pool;

pub fn run<W: Write>(writer: &mut W, pool: &mut Pool, now: DateTime<Utc>, json: bool) -> Result<()> {
    let stats = pool.engine.stats_at(now)?;
    if json {
        return write_json(writer, &stats);
    }

    writeln!(writer, "Current cycle:      {}", stats.current_cycle_number)?;
    writeln!(writer, "Completed cycles:   {}", stats.total_completed_cycles)?;
    writeln!(writer, "Reserved slots:     {}", stats.reserved_count)?;
    writeln!(writer, "Completed slots:    {}", stats.completed_count)?;
    writeln!(writer, "Participants:       {}", stats.total_participants)?;
    writeln!(writer, "Due within an hour: {}", stats.due_soon_count)?;
    Ok(())
}
