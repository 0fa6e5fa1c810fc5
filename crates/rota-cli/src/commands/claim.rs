//! Claim command.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::util::{format_time, write_json};
use crate::Pool;

pub fn run<W: Write>(
    writer: &mut W,
    pool: &mut Pool,
    slot: u32,
    name: &str,
    now: DateTime<Utc>,
    json: bool,
) -> Result<()> {
    let result = pool.engine.claim_at(slot, name, now)?;
    if json {
        return write_json(writer, &result);
    }

    let holder = result.slot.holder().map_or(name, |holder| holder.as_str());
    match result.slot.expires_at() {
        Some(expires_at) => writeln!(
            writer,
            "Claimed slot {} of cycle {} for {} until {}.",
            result.slot.number,
            result.cycle_number,
            holder,
            format_time(expires_at)
        )?,
        None => writeln!(
            writer,
            "Claimed slot {} of cycle {} for {}.",
            result.slot.number, result.cycle_number, holder
        )?,
    }
    Ok(())
}
