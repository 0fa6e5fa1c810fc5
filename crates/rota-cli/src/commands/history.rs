//! History command: recent cycles, newest first.

use std::io::Write;

use anyhow::Result;

use rota_core::SLOTS_PER_CYCLE;

use super::util::{format_time, write_json};
use crate::Pool;

/// Bounds applied to `--limit`.
const MIN_LIMIT: usize = 1;
const MAX_LIMIT: usize = 100;

pub fn run<W: Write>(writer: &mut W, pool: &Pool, limit: usize, json: bool) -> Result<()> {
    let cycles = pool
        .engine
        .history(limit.clamp(MIN_LIMIT, MAX_LIMIT))?;
    if json {
        return write_json(writer, &cycles);
    }

    if cycles.is_empty() {
        writeln!(writer, "No cycles yet.")?;
        return Ok(());
    }

    writeln!(
        writer,
        "{:>5}  {:<9}  {:>5}  {:>6}  {:<20}  Closed",
        "Cycle", "Status", "Done", "People", "Opened"
    )?;
    for cycle in cycles {
        let closed = cycle
            .completed_at
            .map_or_else(|| "-".to_string(), format_time);
        writeln!(
            writer,
            "{:>5}  {:<9}  {:>5}  {:>6}  {:<20}  {}",
            cycle.number,
            cycle.status.as_str(),
            format!("{}/{SLOTS_PER_CYCLE}", cycle.completed_slots),
            cycle.participants,
            format_time(cycle.created_at),
            closed
        )?;
    }
    Ok(())
}
