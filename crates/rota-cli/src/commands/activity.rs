//! Activity command: the feed of recent events.

use std::io::Write;

use anyhow::Result;

use super::util::{format_time, write_json};
use crate::Pool;

const MIN_LIMIT: usize = 5;
const MAX_LIMIT: usize = 100;

pub fn run<W: Write>(writer: &mut W, pool: &Pool, limit: usize, json: bool) -> Result<()> {
    let entries = pool.activity.recent(limit.clamp(MIN_LIMIT, MAX_LIMIT))?;
    if json {
        return write_json(writer, &entries);
    }

    if entries.is_empty() {
        writeln!(writer, "No activity yet.")?;
        return Ok(());
    }
    for entry in entries {
        writeln!(
            writer,
            "{}  {}",
            format_time(entry.occurred_at),
            entry.message
        )?;
    }
    Ok(())
}
