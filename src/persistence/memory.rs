//! In-memory ledger store.
//!
//! Used when persistence is disabled and as the store behind the service
//! tests. A commit applies its ops to a copy of the user's ledger under the
//! write lock and swaps the copy in only if every op succeeded.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{ChangeOp, ChangeSet, LedgerStore};
use crate::domain::{AuditId, EventId, MeterEvent, RecalculationAudit, UserId, chronology};
use crate::error::LedgerError;

/// Sentinel meaning "no fault armed".
const NO_FAULT: usize = usize::MAX;

#[derive(Debug, Clone, Default)]
struct UserLedger {
    events: Vec<MeterEvent>,
    audits: Vec<RecalculationAudit>,
}

/// Ledger store kept in process memory.
#[derive(Debug)]
pub struct MemoryLedgerStore {
    ledgers: RwLock<HashMap<UserId, UserLedger>>,
    fail_commit_after: AtomicUsize,
    fail_dated_reads: AtomicBool,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ledgers: RwLock::new(HashMap::new()),
            fail_commit_after: AtomicUsize::new(NO_FAULT),
            fail_dated_reads: AtomicBool::new(false),
        }
    }

    /// Makes the next commit fail after `ops` of its ops were applied.
    /// The fault fires once.
    pub fn fail_next_commit_after(&self, ops: usize) {
        self.fail_commit_after.store(ops, Ordering::SeqCst);
    }

    /// Makes [`LedgerStore::fetch_before`] fail with a transient error
    /// while `fail` is set.
    pub fn fail_dated_reads(&self, fail: bool) {
        self.fail_dated_reads.store(fail, Ordering::SeqCst);
    }

    async fn with_ledger<T>(&self, user_id: UserId, f: impl FnOnce(&UserLedger) -> T) -> T {
        let map = self.ledgers.read().await;
        match map.get(&user_id) {
            Some(ledger) => f(ledger),
            None => f(&UserLedger::default()),
        }
    }
}

fn find_event_mut<'a>(
    ledger: &'a mut UserLedger,
    event_id: EventId,
) -> Result<&'a mut MeterEvent, LedgerError> {
    ledger
        .events
        .iter_mut()
        .find(|e| e.id == event_id)
        .ok_or_else(|| LedgerError::TransactionFailure(format!("event {event_id} not found")))
}

fn apply_op(ledger: &mut UserLedger, user_id: UserId, op: ChangeOp) -> Result<(), LedgerError> {
    match op {
        ChangeOp::InsertEvent(event) => {
            if event.user_id != user_id {
                return Err(LedgerError::TransactionFailure(format!(
                    "event {} belongs to another user",
                    event.id
                )));
            }
            if ledger.events.iter().any(|e| e.id == event.id) {
                return Err(LedgerError::TransactionFailure(format!(
                    "event {} already exists",
                    event.id
                )));
            }
            if event.is_active()
                && let Some(clash) = chronology::event_at(&ledger.events, event.event_date)
            {
                return Err(LedgerError::TransactionFailure(format!(
                    "event {} is already active at {}",
                    clash.id, event.event_date
                )));
            }
            ledger.events.push(event);
        }
        ChangeOp::VoidEvent {
            event_id,
            reason,
            at,
        } => find_event_mut(ledger, event_id)?.void(&reason, at)?,
        ChangeOp::LinkSuperseded {
            event_id,
            superseded_by,
        } => find_event_mut(ledger, event_id)?.superseded_by = Some(superseded_by),
        ChangeOp::ShiftBalances { event_ids, offset } => {
            let mut seen = HashSet::with_capacity(event_ids.len());
            for event_id in event_ids {
                if !seen.insert(event_id) {
                    return Err(LedgerError::TransactionFailure(format!(
                        "event {event_id} listed twice in one shift"
                    )));
                }
                let event = find_event_mut(ledger, event_id)?;
                if !event.is_active() {
                    return Err(LedgerError::TransactionFailure(format!(
                        "event {event_id} is voided"
                    )));
                }
                event.balance_kwh = event.balance_kwh.try_add(offset)?;
            }
        }
        ChangeOp::InsertAudit(audit) => {
            if let Some(key) = audit.idempotency_key.as_deref()
                && let Some(existing) = ledger
                    .audits
                    .iter()
                    .find(|a| a.idempotency_key.as_deref() == Some(key))
            {
                return Err(LedgerError::DuplicateRequest {
                    audit_id: *existing.id.as_uuid(),
                });
            }
            ledger.audits.push(audit);
        }
        ChangeOp::MarkAuditUndone { audit_id, at } => {
            let audit = ledger
                .audits
                .iter_mut()
                .find(|a| a.id == audit_id)
                .ok_or_else(|| {
                    LedgerError::TransactionFailure(format!("audit {audit_id} not found"))
                })?;
            audit.undone_at = Some(at);
        }
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn fetch_before(
        &self,
        user_id: UserId,
        date: DateTime<Utc>,
    ) -> Result<Option<MeterEvent>, LedgerError> {
        if self.fail_dated_reads.load(Ordering::SeqCst) {
            return Err(LedgerError::PersistenceError(
                "dated lookup unavailable".to_string(),
            ));
        }
        Ok(self
            .with_ledger(user_id, |l| {
                chronology::last_event_before(&l.events, date).cloned()
            })
            .await)
    }

    async fn fetch_after(
        &self,
        user_id: UserId,
        date: DateTime<Utc>,
    ) -> Result<Vec<MeterEvent>, LedgerError> {
        Ok(self
            .with_ledger(user_id, |l| {
                chronology::events_after(&l.events, date)
                    .into_iter()
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn fetch_at(
        &self,
        user_id: UserId,
        date: DateTime<Utc>,
    ) -> Result<Option<MeterEvent>, LedgerError> {
        Ok(self
            .with_ledger(user_id, |l| chronology::event_at(&l.events, date).cloned())
            .await)
    }

    async fn latest(&self, user_id: UserId) -> Result<Option<MeterEvent>, LedgerError> {
        Ok(self
            .with_ledger(user_id, |l| chronology::latest(&l.events).cloned())
            .await)
    }

    async fn get_event(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> Result<Option<MeterEvent>, LedgerError> {
        Ok(self
            .with_ledger(user_id, |l| {
                l.events.iter().find(|e| e.id == event_id).cloned()
            })
            .await)
    }

    async fn list_events(
        &self,
        user_id: UserId,
        include_voided: bool,
    ) -> Result<Vec<MeterEvent>, LedgerError> {
        let mut events: Vec<MeterEvent> = self
            .with_ledger(user_id, |l| {
                l.events
                    .iter()
                    .filter(|e| include_voided || e.is_active())
                    .cloned()
                    .collect()
            })
            .await;
        events.sort_by_key(|e| (e.event_date, e.created_at));
        Ok(events)
    }

    async fn get_audit(
        &self,
        user_id: UserId,
        audit_id: AuditId,
    ) -> Result<Option<RecalculationAudit>, LedgerError> {
        Ok(self
            .with_ledger(user_id, |l| {
                l.audits.iter().find(|a| a.id == audit_id).cloned()
            })
            .await)
    }

    async fn find_audit_by_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<RecalculationAudit>, LedgerError> {
        Ok(self
            .with_ledger(user_id, |l| {
                l.audits
                    .iter()
                    .find(|a| a.idempotency_key.as_deref() == Some(key))
                    .cloned()
            })
            .await)
    }

    async fn list_audits(&self, user_id: UserId) -> Result<Vec<RecalculationAudit>, LedgerError> {
        let mut audits: Vec<RecalculationAudit> =
            self.with_ledger(user_id, |l| l.audits.clone()).await;
        audits.sort_by(|a, b| b.applied_at.cmp(&a.applied_at));
        Ok(audits)
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), LedgerError> {
        let fail_after = self.fail_commit_after.swap(NO_FAULT, Ordering::SeqCst);
        let ChangeSet { user_id, ops } = changes;

        let mut map = self.ledgers.write().await;
        let mut staged = map.get(&user_id).cloned().unwrap_or_default();
        for (applied, op) in ops.into_iter().enumerate() {
            if applied == fail_after {
                return Err(LedgerError::TransactionFailure(format!(
                    "injected fault after {applied} ops"
                )));
            }
            apply_op(&mut staged, user_id, op)?;
        }
        map.insert(user_id, staged);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::Kwh;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, day, 18, 0, 0)
            .single()
            .unwrap_or_else(|| panic!("valid date"))
    }

    async fn seeded(user: UserId, values: &[(u32, i64)]) -> (MemoryLedgerStore, Vec<EventId>) {
        let store = MemoryLedgerStore::new();
        let mut changes = ChangeSet::new(user);
        let mut ids = Vec::new();
        for (day, v) in values {
            let ev = MeterEvent::reading(user, at(*day), Kwh::from(*v));
            ids.push(ev.id);
            changes = changes.insert_event(ev);
        }
        let Ok(()) = store.commit(changes).await else {
            panic!("seed commit failed");
        };
        (store, ids)
    }

    async fn balances(store: &MemoryLedgerStore, user: UserId) -> Vec<Kwh> {
        let Ok(events) = store.list_events(user, false).await else {
            panic!("list failed");
        };
        events.iter().map(|e| e.balance_kwh).collect()
    }

    #[tokio::test]
    async fn shift_applies_to_listed_events_only() {
        let user = UserId::new();
        let (store, ids) = seeded(user, &[(1, 90), (2, 45), (3, 30)]).await;
        let shifted: Vec<EventId> = ids.iter().skip(1).copied().collect();

        let result = store
            .commit(ChangeSet::new(user).shift_balances(shifted, Kwh::from(40)))
            .await;
        assert!(result.is_ok());
        assert_eq!(
            balances(&store, user).await,
            vec![Kwh::from(90), Kwh::from(85), Kwh::from(70)]
        );
    }

    #[tokio::test]
    async fn injected_fault_leaves_ledger_untouched() {
        let user = UserId::new();
        let (store, ids) = seeded(user, &[(1, 45), (2, 30), (3, 10)]).await;
        let before = balances(&store, user).await;

        store.fail_next_commit_after(1);
        let audit = RecalculationAudit::new(
            user,
            EventId::new(),
            crate::domain::TriggerType::NewBackdateTopup,
            Kwh::from(40),
            ids.clone(),
            Utc::now(),
            chrono::Duration::hours(24),
        );
        let result = store
            .commit(
                ChangeSet::new(user)
                    .shift_balances(ids, Kwh::from(40))
                    .insert_audit(audit),
            )
            .await;
        assert!(matches!(result, Err(LedgerError::TransactionFailure(_))));
        assert_eq!(balances(&store, user).await, before);
        let Ok(audits) = store.list_audits(user).await else {
            panic!("list audits failed");
        };
        assert!(audits.is_empty());
    }

    #[tokio::test]
    async fn shifting_voided_event_fails_whole_commit() {
        let user = UserId::new();
        let (store, ids) = seeded(user, &[(1, 45), (2, 30)]).await;
        let Some(second) = ids.get(1).copied() else {
            panic!("two ids seeded");
        };
        let _ = store
            .commit(ChangeSet::new(user).void_event(second, "typo", at(5)))
            .await;

        let result = store
            .commit(ChangeSet::new(user).shift_balances(ids, Kwh::from(5)))
            .await;
        assert!(result.is_err());
        assert_eq!(balances(&store, user).await, vec![Kwh::from(45)]);
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let user = UserId::new();
        let (store, ids) = seeded(user, &[(1, 45)]).await;
        let other = UserId::new();

        let Ok(None) = store.latest(other).await else {
            panic!("other user sees no events");
        };
        let result = store
            .commit(ChangeSet::new(other).shift_balances(ids, Kwh::from(1)))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn dated_read_fault_is_transient() {
        let user = UserId::new();
        let (store, _) = seeded(user, &[(1, 45)]).await;
        store.fail_dated_reads(true);
        let result = store.fetch_before(user, at(9)).await;
        assert!(matches!(result, Err(ref e) if e.is_transient()));
        store.fail_dated_reads(false);
        assert!(matches!(store.fetch_before(user, at(9)).await, Ok(Some(_))));
    }

    #[tokio::test]
    async fn repeated_id_fails_the_shift() {
        let user = UserId::new();
        let (store, ids) = seeded(user, &[(1, 45)]).await;
        let Some(id) = ids.first().copied() else {
            panic!("one id seeded");
        };

        let result = store
            .commit(ChangeSet::new(user).shift_balances(vec![id, id], Kwh::from(40)))
            .await;
        assert!(matches!(result, Err(LedgerError::TransactionFailure(_))));
        assert_eq!(balances(&store, user).await, vec![Kwh::from(45)]);
    }

    #[tokio::test]
    async fn out_of_range_shift_fails_whole_commit() {
        let user = UserId::new();
        let (store, ids) = seeded(user, &[(1, 45), (2, 30)]).await;
        let Ok(huge) = "79228162514264337593543950335".parse::<Kwh>() else {
            panic!("largest decimal parses");
        };

        let result = store
            .commit(ChangeSet::new(user).shift_balances(ids, huge))
            .await;
        assert!(matches!(result, Err(LedgerError::InvalidValue(_))));
        assert_eq!(balances(&store, user).await, vec![Kwh::from(45), Kwh::from(30)]);
    }

    #[tokio::test]
    async fn second_active_event_on_a_date_is_refused() {
        let user = UserId::new();
        let (store, ids) = seeded(user, &[(1, 45)]).await;
        let Some(first) = ids.first().copied() else {
            panic!("one id seeded");
        };

        let clash = MeterEvent::reading(user, at(1), Kwh::from(40));
        let result = store.commit(ChangeSet::new(user).insert_event(clash)).await;
        assert!(matches!(result, Err(LedgerError::TransactionFailure(_))));

        let replacement = MeterEvent::reading(user, at(1), Kwh::from(40));
        let result = store
            .commit(
                ChangeSet::new(user)
                    .void_event(first, "replaced", at(2))
                    .insert_event(replacement),
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(balances(&store, user).await, vec![Kwh::from(40)]);
    }
}
