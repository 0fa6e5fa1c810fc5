//! The allocation engine: claim, complete and rollover as SQLite transactions.
//!
//! Every mutating operation follows the same shape:
//!
//! 1. open a `BEGIN IMMEDIATE` transaction (takes the write lock up front)
//! 2. resolve or create the open cycle
//! 3. sweep lapsed claims in that cycle
//! 4. read the target slot, validate, write
//! 5. commit, then notify observers
//!
//! Observers only ever see committed changes. Their failures and panics are
//! logged and otherwise ignored.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rusqlite::TransactionBehavior;
use serde::Serialize;
use thiserror::Error;

use rota_core::{
    AllocationEvent, ClaimTtl, CollaboratorError, Cycle, EventKind, EventSink, HolderName,
    ParticipantAction, ParticipantStats, Release, SLOTS_PER_CYCLE, Slot, SlotNumber,
    ValidationError,
};

use crate::{CycleSummary, Database, DbError, store};

/// Claims lapsing within this many minutes count as "due soon".
const DUE_SOON_MINUTES: i64 = 60;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// The request was invalid or conflicts with the slot's state.
    #[error(transparent)]
    Rejected(#[from] ValidationError),
    /// The open cycle could not be resolved or created; retry later.
    #[error("could not determine or create the active cycle after {attempts} attempts")]
    ActiveCycleUnavailable { attempts: u32 },
    /// Storage failure, including lock wait timeouts.
    #[error(transparent)]
    Storage(DbError),
}

impl AllocationError {
    /// Whether the caller did something wrong, as opposed to an operational fault.
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl From<DbError> for AllocationError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::ActiveCycleUnavailable { attempts } => {
                tracing::error!(attempts, "active cycle unavailable");
                Self::ActiveCycleUnavailable { attempts }
            }
            other => Self::Storage(other),
        }
    }
}

impl From<rusqlite::Error> for AllocationError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(DbError::Sqlite(err))
    }
}

/// Outcome of a successful claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimResult {
    pub slot: Slot,
    pub cycle_number: u32,
    /// Always `false`: claiming never completes a cycle.
    pub cycle_completed_now: bool,
    /// Always `None`.
    pub next_cycle_number: Option<u32>,
}

/// Outcome of a successful completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompleteResult {
    pub slot: Slot,
    pub cycle_number: u32,
    /// Whether this completion closed the cycle.
    pub cycle_completed_now: bool,
    /// The cycle opened by the rollover, if one happened.
    pub next_cycle_number: Option<u32>,
}

/// The active cycle with all of its slots, after sweeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSnapshot {
    pub cycle: Cycle,
    pub slots: Vec<Slot>,
    pub free_count: usize,
    pub reserved_count: usize,
    pub completed_count: usize,
    pub total_slots: u8,
    pub claim_ttl_hours: u32,
}

impl CycleSnapshot {
    fn new(cycle: Cycle, slots: Vec<Slot>, claim_ttl: ClaimTtl) -> Self {
        let reserved_count = slots.iter().filter(|slot| slot.is_reserved()).count();
        let completed_count = slots.iter().filter(|slot| slot.is_done()).count();
        Self {
            free_count: slots.len() - reserved_count - completed_count,
            reserved_count,
            completed_count,
            cycle,
            slots,
            total_slots: SLOTS_PER_CYCLE,
            claim_ttl_hours: claim_ttl.hours(),
        }
    }
}

/// Pool-wide counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_completed_cycles: u32,
    pub current_cycle_number: u32,
    pub reserved_count: u32,
    pub completed_count: u32,
    pub total_participants: u32,
    pub due_soon_count: u32,
}

/// Runs allocation operations against one database connection.
///
/// Give each thread its own engine; they coordinate through SQLite locking.
pub struct AllocationEngine {
    db: Database,
    claim_ttl: ClaimTtl,
    sinks: Vec<Arc<dyn EventSink>>,
    participant_stats: Option<Arc<dyn ParticipantStats>>,
}

impl AllocationEngine {
    pub fn new(db: Database, claim_ttl: ClaimTtl) -> Self {
        Self {
            db,
            claim_ttl,
            sinks: Vec::new(),
            participant_stats: None,
        }
    }

    /// Adds an observer notified after every committed change.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Sets the collaborator told about each claim and completion.
    #[must_use]
    pub fn with_participant_stats(mut self, stats: Arc<dyn ParticipantStats>) -> Self {
        self.participant_stats = Some(stats);
        self
    }

    pub const fn claim_ttl(&self) -> ClaimTtl {
        self.claim_ttl
    }

    /// Read access to the underlying database.
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Returns the open cycle, creating it if none exists.
    pub fn active_cycle(&mut self, for_write: bool) -> Result<Cycle, AllocationError> {
        self.active_cycle_at(Utc::now(), for_write)
    }

    /// Returns the open cycle as of `now`, creating it if none exists.
    ///
    /// Without `for_write` an existing open cycle is returned from a plain read.
    /// Creation always happens under the write lock, so concurrent callers queue
    /// instead of racing to create.
    pub fn active_cycle_at(
        &mut self,
        now: DateTime<Utc>,
        for_write: bool,
    ) -> Result<Cycle, AllocationError> {
        if !for_write {
            if let Some(cycle) = store::open_cycle(&self.db.conn)? {
                return Ok(cycle);
            }
        }
        let mut tx = self
            .db
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let cycle = store::get_or_create_active_cycle(&mut tx, now)?;
        tx.commit()?;
        Ok(cycle)
    }

    pub fn claim(&mut self, slot: u32, holder: &str) -> Result<ClaimResult, AllocationError> {
        self.claim_at(slot, holder, Utc::now())
    }

    /// Claims a free slot of the open cycle for `holder`.
    pub fn claim_at(
        &mut self,
        slot: u32,
        holder: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimResult, AllocationError> {
        let holder = HolderName::new(holder)?;
        let number = SlotNumber::new(slot)?;
        let expires_at = now + self.claim_ttl.duration();

        let mut tx = self
            .db
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let cycle = store::get_or_create_active_cycle(&mut tx, now)?;
        let released = store::sweep_cycle(&tx, cycle.number, now)?;
        let mut events = release_events(&released, now);

        let checked = store::slot(&tx, cycle.number, number)?
            .ok_or(ValidationError::SlotNotFound { slot: number })
            .and_then(|slot| slot.check_claimable());
        if let Err(rejection) = checked {
            // Keep the sweep even though the claim is refused.
            tx.commit()?;
            self.notify(&events);
            tracing::debug!(cycle = cycle.number, slot = %number, %rejection, "claim rejected");
            return Err(rejection.into());
        }

        store::reserve_slot(&tx, cycle.number, number, &holder, now, expires_at)?;
        let reserved = store::slot(&tx, cycle.number, number)?.ok_or(DbError::SlotConflict {
            cycle_number: cycle.number,
            slot_number: number.get(),
        })?;
        tx.commit()?;

        tracing::info!(
            cycle = cycle.number,
            slot = %number,
            holder = %holder,
            %expires_at,
            "slot claimed"
        );
        events.push(AllocationEvent::new(
            now,
            EventKind::SlotClaimed {
                cycle_number: cycle.number,
                slot_number: number,
                holder: holder.clone(),
                expires_at,
            },
        ));
        self.notify(&events);
        self.record_action(&holder, ParticipantAction::Claim);

        Ok(ClaimResult {
            slot: reserved,
            cycle_number: cycle.number,
            cycle_completed_now: false,
            next_cycle_number: None,
        })
    }

    pub fn complete(&mut self, slot: u32, holder: &str) -> Result<CompleteResult, AllocationError> {
        self.complete_at(slot, holder, Utc::now())
    }

    /// Marks a slot done. Only the claimant may complete it.
    ///
    /// Completing the last open slot closes the cycle and opens the next one in
    /// the same transaction.
    pub fn complete_at(
        &mut self,
        slot: u32,
        holder: &str,
        now: DateTime<Utc>,
    ) -> Result<CompleteResult, AllocationError> {
        let holder = HolderName::new(holder)?;
        let number = SlotNumber::new(slot)?;

        let mut tx = self
            .db
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let cycle = store::get_or_create_active_cycle(&mut tx, now)?;
        let released = store::sweep_cycle(&tx, cycle.number, now)?;
        let mut events = release_events(&released, now);

        let checked = store::slot(&tx, cycle.number, number)?
            .ok_or(ValidationError::SlotNotFound { slot: number })
            .and_then(|slot| slot.check_completable(&holder));
        if let Err(rejection) = checked {
            tx.commit()?;
            self.notify(&events);
            tracing::debug!(cycle = cycle.number, slot = %number, %rejection, "completion rejected");
            return Err(rejection.into());
        }

        store::complete_slot(&tx, cycle.number, number, &holder, now)?;
        let completed = store::slot(&tx, cycle.number, number)?.ok_or(DbError::SlotConflict {
            cycle_number: cycle.number,
            slot_number: number.get(),
        })?;

        let done = store::count_done(&tx, cycle.number)?;
        let mut next_cycle_number = None;
        if done == u32::from(SLOTS_PER_CYCLE)
            && cycle.is_open()
            && store::close_cycle(&tx, cycle.number, now)?
        {
            let next = store::get_or_create_active_cycle(&mut tx, now)?;
            next_cycle_number = Some(next.number);
        }
        tx.commit()?;

        tracing::info!(cycle = cycle.number, slot = %number, holder = %holder, "slot completed");
        events.push(AllocationEvent::new(
            now,
            EventKind::SlotCompleted {
                cycle_number: cycle.number,
                slot_number: number,
                holder: holder.clone(),
            },
        ));
        if let Some(next_cycle) = next_cycle_number {
            tracing::info!(completed = cycle.number, next = next_cycle, "cycle rolled over");
            events.push(AllocationEvent::new(
                now,
                EventKind::CycleRolledOver {
                    completed_cycle: cycle.number,
                    next_cycle,
                },
            ));
        }
        self.notify(&events);
        self.record_action(&holder, ParticipantAction::Complete);

        Ok(CompleteResult {
            slot: completed,
            cycle_number: cycle.number,
            cycle_completed_now: next_cycle_number.is_some(),
            next_cycle_number,
        })
    }

    pub fn snapshot(&mut self) -> Result<CycleSnapshot, AllocationError> {
        self.snapshot_at(Utc::now())
    }

    /// The open cycle and its slots, with lapsed claims already released.
    pub fn snapshot_at(&mut self, now: DateTime<Utc>) -> Result<CycleSnapshot, AllocationError> {
        let mut tx = self
            .db
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let cycle = store::get_or_create_active_cycle(&mut tx, now)?;
        let released = store::sweep_cycle(&tx, cycle.number, now)?;
        let slots = store::cycle_slots(&tx, cycle.number)?;
        tx.commit()?;

        self.notify(&release_events(&released, now));
        Ok(CycleSnapshot::new(cycle, slots, self.claim_ttl))
    }

    pub fn stats(&mut self) -> Result<PoolStats, AllocationError> {
        self.stats_at(Utc::now())
    }

    /// Pool-wide counters as of `now`, after sweeping the open cycle.
    pub fn stats_at(&mut self, now: DateTime<Utc>) -> Result<PoolStats, AllocationError> {
        let mut tx = self
            .db
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let cycle = store::get_or_create_active_cycle(&mut tx, now)?;
        let released = store::sweep_cycle(&tx, cycle.number, now)?;
        let slots = store::cycle_slots(&tx, cycle.number)?;
        let stats = PoolStats {
            total_completed_cycles: store::count_completed_cycles(&tx)?,
            current_cycle_number: cycle.number,
            reserved_count: count_u32(slots.iter().filter(|slot| slot.is_reserved()).count()),
            completed_count: count_u32(slots.iter().filter(|slot| slot.is_done()).count()),
            total_participants: store::count_participants(&tx)?,
            due_soon_count: store::count_due_soon(
                &tx,
                cycle.number,
                now,
                Duration::minutes(DUE_SOON_MINUTES),
            )?,
        };
        tx.commit()?;

        self.notify(&release_events(&released, now));
        Ok(stats)
    }

    /// Most recent cycles first.
    pub fn history(&self, limit: usize) -> Result<Vec<CycleSummary>, AllocationError> {
        Ok(self.db.recent_cycles(limit)?)
    }

    fn notify(&self, events: &[AllocationEvent]) {
        for event in events {
            for sink in &self.sinks {
                if let Err(err) = contained("event sink", || sink.emit(event)) {
                    tracing::warn!(
                        event_id = %event.id,
                        event_type = %event.event_type(),
                        error = %err,
                        "event sink failed"
                    );
                }
            }
        }
    }

    fn record_action(&self, holder: &HolderName, action: ParticipantAction) {
        let Some(stats) = &self.participant_stats else {
            return;
        };
        let recorded = contained("participant stats", || stats.record_action(holder, action));
        if let Err(err) = recorded {
            tracing::warn!(holder = %holder, ?action, error = %err, "participant stats failed");
        }
    }
}

/// Runs an observer call, turning a panic into an ordinary failure.
fn contained<F>(collaborator: &'static str, call: F) -> Result<(), CollaboratorError>
where
    F: FnOnce() -> Result<(), CollaboratorError>,
{
    panic::catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|_| Err(CollaboratorError::new(collaborator, "panicked")))
}

fn release_events(released: &[Release], now: DateTime<Utc>) -> Vec<AllocationEvent> {
    released
        .iter()
        .map(|release| {
            AllocationEvent::new(
                now,
                EventKind::ClaimReleased {
                    cycle_number: release.slot.cycle_number,
                    slot_number: release.slot.number,
                    holder: release.previous_holder.clone(),
                    expired_at: release.expired_at,
                },
            )
        })
        .collect()
}

fn count_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use rota_core::{CycleStatus, EventType, SlotState};

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn t0() -> DateTime<Utc> {
        ts("2025-03-01T08:00:00Z")
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<AllocationEvent>>,
    }

    impl RecordingSink {
        fn types(&self) -> Vec<EventType> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(AllocationEvent::event_type)
                .collect()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &AllocationEvent) -> Result<(), CollaboratorError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn emit(&self, _event: &AllocationEvent) -> Result<(), CollaboratorError> {
            Err(CollaboratorError::new("push", "gateway down"))
        }
    }

    struct PanickingSink;

    impl EventSink for PanickingSink {
        fn emit(&self, _event: &AllocationEvent) -> Result<(), CollaboratorError> {
            panic!("sink exploded");
        }
    }

    struct PanickingStats;

    impl ParticipantStats for PanickingStats {
        fn record_action(
            &self,
            _holder: &HolderName,
            _action: ParticipantAction,
        ) -> Result<(), CollaboratorError> {
            panic!("stats exploded");
        }
    }

    #[derive(Default)]
    struct RecordingStats {
        actions: Mutex<Vec<(String, ParticipantAction)>>,
    }

    impl ParticipantStats for RecordingStats {
        fn record_action(
            &self,
            holder: &HolderName,
            action: ParticipantAction,
        ) -> Result<(), CollaboratorError> {
            self.actions
                .lock()
                .unwrap()
                .push((holder.as_str().to_string(), action));
            Ok(())
        }
    }

    struct FailingStats;

    impl ParticipantStats for FailingStats {
        fn record_action(
            &self,
            _holder: &HolderName,
            _action: ParticipantAction,
        ) -> Result<(), CollaboratorError> {
            Err(CollaboratorError::new("stats", "unavailable"))
        }
    }

    fn engine() -> AllocationEngine {
        let db = Database::open_in_memory().expect("open in-memory db");
        AllocationEngine::new(db, ClaimTtl::default())
    }

    fn engine_with_sink() -> (AllocationEngine, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine().with_sink(sink.clone());
        (engine, sink)
    }

    fn rejection(result: Result<impl std::fmt::Debug, AllocationError>) -> ValidationError {
        match result {
            Err(AllocationError::Rejected(err)) => err,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    /// Claims and completes every slot except `leave_open` in the open cycle.
    fn complete_all_but(engine: &mut AllocationEngine, leave_open: &[u32], now: DateTime<Utc>) {
        for slot in 1..=30 {
            if leave_open.contains(&slot) {
                continue;
            }
            let name = format!("reader-{slot}");
            engine.claim_at(slot, &name, now).unwrap();
            engine.complete_at(slot, &name, now).unwrap();
        }
    }

    #[test]
    fn empty_store_opens_cycle_one_with_free_slots() {
        let mut engine = engine();
        let cycle = engine.active_cycle_at(t0(), true).unwrap();
        assert_eq!(cycle.number, 1);
        assert_eq!(cycle.status, CycleStatus::Open);

        let snapshot = engine.snapshot_at(t0()).unwrap();
        assert_eq!(snapshot.cycle.number, 1);
        assert_eq!(snapshot.slots.len(), 30);
        assert_eq!(snapshot.free_count, 30);
        assert_eq!(snapshot.total_slots, 30);
        assert_eq!(snapshot.claim_ttl_hours, 18);
    }

    #[test]
    fn active_cycle_is_idempotent() {
        let mut engine = engine();
        let first = engine.active_cycle_at(t0(), false).unwrap();
        let second = engine.active_cycle_at(t0() + Duration::hours(1), true).unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.history(100).unwrap().len(), 1);
    }

    #[test]
    fn second_claim_on_same_slot_is_rejected() {
        let (mut engine, sink) = engine_with_sink();

        let result = engine.claim_at(5, "Ali", t0()).unwrap();
        assert_eq!(result.cycle_number, 1);
        assert!(!result.cycle_completed_now);
        assert_eq!(result.next_cycle_number, None);
        assert_eq!(
            result.slot.state,
            SlotState::Reserved {
                holder: HolderName::new("Ali").unwrap(),
                reserved_at: t0(),
                expires_at: t0() + Duration::hours(18),
            }
        );

        let err = rejection(engine.claim_at(5, "Sara", t0()));
        assert_eq!(
            err,
            ValidationError::AlreadyReserved {
                slot: SlotNumber::new(5).unwrap()
            }
        );
        assert_eq!(sink.types(), vec![EventType::SlotClaimed]);
    }

    #[test]
    fn claim_validates_input_before_touching_storage() {
        let mut engine = engine();
        assert_eq!(
            rejection(engine.claim_at(3, "   ", t0())),
            ValidationError::NameRequired
        );
        assert_eq!(
            rejection(engine.claim_at(31, "Ali", t0())),
            ValidationError::SlotOutOfRange { value: 31 }
        );
        assert!(engine.history(10).unwrap().is_empty());
    }

    #[test]
    fn claim_trims_holder_name() {
        let mut engine = engine();
        let result = engine.claim_at(9, "  Noor ", t0()).unwrap();
        assert_eq!(result.slot.holder().map(HolderName::as_str), Some("Noor"));
    }

    #[test]
    fn only_claimant_may_complete() {
        let (mut engine, sink) = engine_with_sink();
        engine.claim_at(3, "Sara", t0()).unwrap();

        let err = rejection(engine.complete_at(3, "Omar", t0()));
        assert_eq!(
            err,
            ValidationError::WrongHolder {
                slot: SlotNumber::new(3).unwrap()
            }
        );

        let done = engine.complete_at(3, " sara ", t0() + Duration::hours(1)).unwrap();
        assert!(done.slot.is_done());
        assert!(!done.cycle_completed_now);
        match done.slot.state {
            SlotState::Done {
                holder,
                completed_by,
                completed_at,
            } => {
                assert_eq!(holder.as_str(), "Sara");
                assert_eq!(completed_by.as_str(), "sara");
                assert_eq!(completed_at, t0() + Duration::hours(1));
            }
            other => panic!("expected done slot, got {other:?}"),
        }
        assert_eq!(
            sink.types(),
            vec![EventType::SlotClaimed, EventType::SlotCompleted]
        );
    }

    #[test]
    fn completing_unreserved_or_done_slot_is_rejected() {
        let mut engine = engine();
        assert_eq!(
            rejection(engine.complete_at(4, "Ali", t0())),
            ValidationError::NotReserved {
                slot: SlotNumber::new(4).unwrap()
            }
        );

        engine.claim_at(4, "Ali", t0()).unwrap();
        engine.complete_at(4, "Ali", t0()).unwrap();
        assert_eq!(
            rejection(engine.complete_at(4, "Ali", t0())),
            ValidationError::AlreadyCompleted {
                slot: SlotNumber::new(4).unwrap()
            }
        );
        assert_eq!(
            rejection(engine.claim_at(4, "Sara", t0())),
            ValidationError::AlreadyCompleted {
                slot: SlotNumber::new(4).unwrap()
            }
        );
    }

    #[test]
    fn expired_claim_is_swept_before_next_claim() {
        let db = Database::open_in_memory().expect("open in-memory db");
        let sink = Arc::new(RecordingSink::default());
        let mut engine =
            AllocationEngine::new(db, ClaimTtl::new(1).unwrap()).with_sink(sink.clone());

        engine.claim_at(7, "Hind", t0()).unwrap();
        let later = t0() + Duration::hours(2);
        let result = engine.claim_at(7, "Noor", later).unwrap();

        assert_eq!(result.slot.holder().map(HolderName::as_str), Some("Noor"));
        assert_eq!(result.slot.expires_at(), Some(later + Duration::hours(1)));
        assert_eq!(
            sink.types(),
            vec![
                EventType::SlotClaimed,
                EventType::ClaimReleased,
                EventType::SlotClaimed
            ]
        );
        let events = sink.events.lock().unwrap();
        assert_eq!(events[1].actor().map(HolderName::as_str), Some("Hind"));
    }

    #[test]
    fn expired_claimant_cannot_complete() {
        let mut engine = AllocationEngine::new(
            Database::open_in_memory().unwrap(),
            ClaimTtl::new(1).unwrap(),
        );
        engine.claim_at(2, "Hind", t0()).unwrap();
        assert_eq!(
            rejection(engine.complete_at(2, "Hind", t0() + Duration::hours(1))),
            ValidationError::NotReserved {
                slot: SlotNumber::new(2).unwrap()
            }
        );
    }

    #[test]
    fn rejected_request_still_commits_sweep() {
        let db = Database::open_in_memory().expect("open in-memory db");
        let sink = Arc::new(RecordingSink::default());
        let mut engine =
            AllocationEngine::new(db, ClaimTtl::new(1).unwrap()).with_sink(sink.clone());
        engine.claim_at(1, "Hind", t0()).unwrap();
        engine.claim_at(2, "Noor", t0() + Duration::minutes(30)).unwrap();

        // Slot 2 is still held, but the sweep of slot 1 must survive the rejection.
        let later = t0() + Duration::minutes(70);
        rejection(engine.claim_at(2, "Omar", later));

        let (_, slots) = engine.database().cycle_with_slots(1).unwrap().unwrap();
        assert!(slots[0].is_free());
        assert!(slots[1].is_reserved());
        assert_eq!(
            sink.types(),
            vec![
                EventType::SlotClaimed,
                EventType::SlotClaimed,
                EventType::ClaimReleased
            ]
        );
    }

    #[test]
    fn snapshot_reports_swept_state() {
        let mut engine = AllocationEngine::new(
            Database::open_in_memory().unwrap(),
            ClaimTtl::new(1).unwrap(),
        );
        engine.claim_at(1, "A", t0()).unwrap();
        engine.claim_at(2, "B", t0() + Duration::minutes(50)).unwrap();
        engine.complete_at(2, "B", t0() + Duration::minutes(55)).unwrap();
        engine.claim_at(3, "C", t0() + Duration::minutes(59)).unwrap();

        let snapshot = engine.snapshot_at(t0() + Duration::minutes(61)).unwrap();
        assert_eq!(snapshot.reserved_count, 1);
        assert_eq!(snapshot.completed_count, 1);
        assert_eq!(snapshot.free_count, 28);
        assert!(snapshot.slots[0].is_free());
        assert_eq!(snapshot.claim_ttl_hours, 1);
    }

    #[test]
    fn completing_twenty_ninth_slot_does_not_roll_over() {
        let mut engine = engine();
        complete_all_but(&mut engine, &[29, 30], t0());

        engine.claim_at(29, "Omar", t0()).unwrap();
        let result = engine.complete_at(29, "Omar", t0()).unwrap();
        assert!(!result.cycle_completed_now);
        assert_eq!(result.next_cycle_number, None);
        assert_eq!(engine.history(10).unwrap().len(), 1);
    }

    #[test]
    fn completing_thirtieth_slot_rolls_over_once() {
        let (mut engine, sink) = engine_with_sink();
        complete_all_but(&mut engine, &[30], t0());

        let finish = t0() + Duration::hours(3);
        engine.claim_at(30, "Khalid", finish).unwrap();
        let result = engine.complete_at(30, "Khalid", finish).unwrap();

        assert!(result.cycle_completed_now);
        assert_eq!(result.cycle_number, 1);
        assert_eq!(result.next_cycle_number, Some(2));

        let history = engine.history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].number, 2);
        assert_eq!(history[0].status, CycleStatus::Open);
        assert_eq!(history[1].status, CycleStatus::Completed);
        assert_eq!(history[1].completed_at, Some(finish));
        assert_eq!(history[1].completed_slots, 30);

        let snapshot = engine.snapshot_at(finish).unwrap();
        assert_eq!(snapshot.cycle.number, 2);
        assert_eq!(snapshot.free_count, 30);

        let types = sink.types();
        assert_eq!(
            types.iter().filter(|t| **t == EventType::CycleRolledOver).count(),
            1
        );
        assert_eq!(types.last(), Some(&EventType::CycleRolledOver));
    }

    #[test]
    fn claims_after_rollover_land_in_new_cycle() {
        let mut engine = engine();
        complete_all_but(&mut engine, &[], t0());

        let result = engine.claim_at(1, "Ali", t0()).unwrap();
        assert_eq!(result.cycle_number, 2);
        assert_eq!(result.slot.cycle_number, 2);
    }

    #[test]
    fn participant_stats_see_each_committed_action_once() {
        let stats = Arc::new(RecordingStats::default());
        let mut engine = engine().with_participant_stats(stats.clone());

        engine.claim_at(1, "Ali", t0()).unwrap();
        rejection(engine.claim_at(1, "Sara", t0()));
        engine.complete_at(1, "ali", t0()).unwrap();

        let actions = stats.actions.lock().unwrap();
        assert_eq!(
            *actions,
            vec![
                ("Ali".to_string(), ParticipantAction::Claim),
                ("ali".to_string(), ParticipantAction::Complete),
            ]
        );
    }

    #[test]
    fn collaborator_failures_do_not_fail_operations() {
        let mut engine = engine()
            .with_sink(Arc::new(FailingSink))
            .with_participant_stats(Arc::new(FailingStats));

        assert!(engine.claim_at(6, "Ali", t0()).is_ok());
        assert!(engine.complete_at(6, "Ali", t0()).is_ok());
        let (_, slots) = engine.database().cycle_with_slots(1).unwrap().unwrap();
        assert!(slots[5].is_done());
    }

    #[test]
    fn panicking_collaborators_do_not_fail_operations() {
        let sink = Arc::new(RecordingSink::default());
        let mut engine = engine()
            .with_sink(Arc::new(PanickingSink))
            .with_sink(sink.clone())
            .with_participant_stats(Arc::new(PanickingStats));

        let claimed = engine.claim_at(1, "Ali", t0()).unwrap();
        assert!(claimed.slot.is_reserved());
        assert!(engine.complete_at(1, "Ali", t0()).is_ok());

        // Later sinks still hear about every event.
        assert_eq!(
            sink.types(),
            vec![EventType::SlotClaimed, EventType::SlotCompleted]
        );
        let (_, slots) = engine.database().cycle_with_slots(1).unwrap().unwrap();
        assert!(slots[0].is_done());
    }

    #[test]
    fn contained_reports_panic_as_failure() {
        let err = contained("push", || panic!("boom")).unwrap_err();
        assert_eq!(err.to_string(), "push: panicked");
        assert!(contained("push", || Ok(())).is_ok());
    }

    #[test]
    fn stats_count_current_cycle_and_due_soon() {
        let mut engine = engine();
        complete_all_but(&mut engine, &[], t0());
        engine.claim_at(1, "Ali", t0()).unwrap();
        engine.claim_at(2, "Sara", t0() + Duration::hours(10)).unwrap();
        engine.claim_at(3, "sara", t0() + Duration::hours(10)).unwrap();
        engine.complete_at(3, "Sara", t0() + Duration::hours(10)).unwrap();

        // Ali's claim lapses at t0 + 18h.
        let stats = engine.stats_at(t0() + Duration::minutes(17 * 60 + 30)).unwrap();
        assert_eq!(
            stats,
            PoolStats {
                total_completed_cycles: 1,
                current_cycle_number: 2,
                reserved_count: 2,
                completed_count: 1,
                total_participants: 32,
                due_soon_count: 1,
            }
        );
    }

    #[test]
    fn rejection_classification() {
        let rejected = AllocationError::from(ValidationError::NameRequired);
        assert!(rejected.is_rejection());

        let fault = AllocationError::from(DbError::ActiveCycleUnavailable { attempts: 2 });
        assert!(!fault.is_rejection());
        assert!(matches!(
            fault,
            AllocationError::ActiveCycleUnavailable { attempts: 2 }
        ));
        assert_eq!(
            fault.to_string(),
            "could not determine or create the active cycle after 2 attempts"
        );
    }
}
