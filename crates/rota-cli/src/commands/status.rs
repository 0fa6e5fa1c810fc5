//! Status command: the open cycle and its slots.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};

use rota_core::SlotState;
use rota_db::CycleSnapshot;

use super::util::{format_ranges, format_time, write_json};
use crate::Pool;

const HOLDER_WIDTH: usize = 20;

pub fn run<W: Write>(writer: &mut W, pool: &mut Pool, now: DateTime<Utc>, json: bool) -> Result<()> {
    let snapshot = pool.engine.snapshot_at(now)?;
    if json {
        return write_json(writer, &snapshot);
    }
    write_snapshot(writer, &snapshot)
}

fn write_snapshot<W: Write>(writer: &mut W, snapshot: &CycleSnapshot) -> Result<()> {
    writeln!(
        writer,
        "Cycle {} (open since {})",
        snapshot.cycle.number,
        format_time(snapshot.cycle.created_at)
    )?;
    writeln!(
        writer,
        "{} done, {} reserved, {} free of {} (claims last {}h)",
        snapshot.completed_count,
        snapshot.reserved_count,
        snapshot.free_count,
        snapshot.total_slots,
        snapshot.claim_ttl_hours
    )?;
    writeln!(writer)?;

    if snapshot.free_count == snapshot.slots.len() {
        writeln!(writer, "All {} slots are free.", snapshot.total_slots)?;
        return Ok(());
    }

    writeln!(
        writer,
        "{:>4}  {:<8}  {:<HOLDER_WIDTH$}  When",
        "Slot", "State", "Holder"
    )?;
    for slot in &snapshot.slots {
        let (state, holder, when) = match &slot.state {
            SlotState::Free => continue,
            SlotState::Reserved {
                holder, expires_at, ..
            } => (
                "reserved",
                holder,
                format!("until {}", format_time(*expires_at)),
            ),
            SlotState::Done {
                holder,
                completed_at,
                ..
            } => ("done", holder, format_time(*completed_at)),
        };
        writeln!(
            writer,
            "{:>4}  {:<8}  {:<HOLDER_WIDTH$}  {}",
            slot.number.get(),
            state,
            truncate(holder.as_str()),
            when
        )?;
    }

    let free: Vec<u8> = snapshot
        .slots
        .iter()
        .filter(|slot| slot.is_free())
        .map(|slot| slot.number.get())
        .collect();
    if !free.is_empty() {
        writeln!(writer)?;
        writeln!(writer, "Free: {}", format_ranges(&free))?;
    }
    Ok(())
}

/// Truncates by characters, not bytes, so multi-byte names never split.
fn truncate(name: &str) -> String {
    if name.chars().count() > HOLDER_WIDTH {
        format!(
            "{}...",
            name.chars().take(HOLDER_WIDTH - 3).collect::<String>()
        )
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{pool, ts};

    use insta::assert_snapshot;

    #[test]
    fn status_lists_held_slots_and_free_ranges() {
        let temp = tempfile::tempdir().unwrap();
        let mut pool = pool(temp.path());
        let t0 = ts("2025-03-01T08:00:00Z");
        pool.engine.claim_at(1, "Ali", t0).unwrap();
        pool.engine.claim_at(2, "Sara", t0).unwrap();
        pool.engine
            .complete_at(2, "Sara", ts("2025-03-01T09:00:00Z"))
            .unwrap();
        pool.engine.claim_at(10, "Omar", t0).unwrap();

        let mut output = Vec::new();
        run(&mut output, &mut pool, ts("2025-03-01T10:00:00Z"), false).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_snapshot!(output, @r"
        Cycle 1 (open since 2025-03-01 08:00 UTC)
        1 done, 2 reserved, 27 free of 30 (claims last 18h)

        Slot  State     Holder                When
           1  reserved  Ali                   until 2025-03-02 02:00 UTC
           2  done      Sara                  2025-03-01 09:00 UTC
          10  reserved  Omar                  until 2025-03-02 02:00 UTC

        Free: 3-9, 11-30
        ");
    }

    #[test]
    fn status_on_fresh_pool_opens_first_cycle() {
        let temp = tempfile::tempdir().unwrap();
        let mut pool = pool(temp.path());

        let mut output = Vec::new();
        run(&mut output, &mut pool, ts("2025-03-01T08:00:00Z"), false).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_snapshot!(output, @r"
        Cycle 1 (open since 2025-03-01 08:00 UTC)
        0 done, 0 reserved, 30 free of 30 (claims last 18h)

        All 30 slots are free.
        ");
    }

    #[test]
    fn status_json_includes_every_slot() {
        let temp = tempfile::tempdir().unwrap();
        let mut pool = pool(temp.path());
        let t0 = ts("2025-03-01T08:00:00Z");
        pool.engine.claim_at(4, "Noor", t0).unwrap();

        let mut output = Vec::new();
        run(&mut output, &mut pool, t0, true).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["cycle"]["number"], 1);
        assert_eq!(value["slots"].as_array().unwrap().len(), 30);
        assert_eq!(value["slots"][3]["state"], "reserved");
        assert_eq!(value["slots"][3]["holder"], "Noor");
        assert_eq!(value["reserved_count"], 1);
    }

    #[test]
    fn truncate_keeps_short_names() {
        assert_eq!(truncate("Ali"), "Ali");
        assert_eq!(
            truncate("Abdurrahman ibn Abdullah"),
            "Abdurrahman ibn A..."
        );
    }
}
