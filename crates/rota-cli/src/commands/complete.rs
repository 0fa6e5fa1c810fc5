//! Complete command.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::util::write_json;
use crate::Pool;

pub fn run<W: Write>(
    writer: &mut W,
    pool: &mut Pool,
    slot: u32,
    name: &str,
    now: DateTime<Utc>,
    json: bool,
) -> Result<()> {
    let result = pool.engine.complete_at(slot, name, now)?;
    if json {
        return write_json(writer, &result);
    }

    writeln!(
        writer,
        "Completed slot {} of cycle {}.",
        result.slot.number, result.cycle_number
    )?;
    if let Some(next) = result.next_cycle_number {
        writeln!(
            writer,
            "Cycle {} is complete. Cycle {next} is now open.",
            result.cycle_number
        )?;
    }
    Ok(())
}
