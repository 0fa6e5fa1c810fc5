//! Profile command: counters for one participant.

use std::io::Write;

use anyhow::Result;

use rota_core::HolderName;

use super::util::{format_time, write_json};
use crate::Pool;

pub fn run<W: Write>(writer: &mut W, pool: &Pool, name: &str, json: bool) -> Result<()> {
    let name = HolderName::new(name)?;
    let progress = pool.ledger.profile(&name)?;
    if json {
        return write_json(writer, &progress);
    }

    let Some(progress) = progress else {
        writeln!(writer, "No activity recorded for {name}.")?;
        return Ok(());
    };
    writeln!(writer, "{}", progress.name)?;
    writeln!(writer, "Claims:      {}", progress.claims_count)?;
    writeln!(writer, "Completions: {}", progress.completions_count)?;
    writeln!(writer, "First seen:  {}", format_time(progress.created_at))?;
    writeln!(writer, "Last active: {}", format_time(progress.updated_at))?;
    Ok(())
}
