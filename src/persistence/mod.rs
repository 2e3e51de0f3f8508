//! Persistence layer: the ledger store seam and its implementations.
//!
//! [`LedgerStore`] exposes ordered reads over a user's events and a single
//! write primitive, [`LedgerStore::commit`], which applies a [`ChangeSet`]
//! all-or-nothing. Every mutation the service performs, from a plain reading
//! to a cascade with its audit row, goes through one change set, so a reader
//! never sees a half-shifted ledger.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{AuditId, EventId, Kwh, MeterEvent, RecalculationAudit, UserId};
use crate::error::LedgerError;

pub use memory::MemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

/// One write inside a [`ChangeSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOp {
    /// Append a new event.
    InsertEvent(MeterEvent),
    /// Mark an active event as voided.
    VoidEvent {
        /// Event to void.
        event_id: EventId,
        /// Reason recorded on the event.
        reason: String,
        /// Void timestamp.
        at: DateTime<Utc>,
    },
    /// Record which event replaced a voided one.
    LinkSuperseded {
        /// The replaced event.
        event_id: EventId,
        /// Its replacement.
        superseded_by: EventId,
    },
    /// Add `offset` to the balance of every listed active event. Fails
    /// unless every id is an active event of the change set's user.
    ShiftBalances {
        /// Events to shift.
        event_ids: Vec<EventId>,
        /// Offset to add (negative to undo).
        offset: Kwh,
    },
    /// Append an audit row.
    InsertAudit(RecalculationAudit),
    /// Stamp an audit as undone.
    MarkAuditUndone {
        /// Audit to stamp.
        audit_id: AuditId,
        /// Undo timestamp.
        at: DateTime<Utc>,
    },
}

/// Ordered writes for one user, committed atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    /// Every op is scoped to this user.
    pub user_id: UserId,
    /// Writes, applied in order.
    pub ops: Vec<ChangeOp>,
}

impl ChangeSet {
    /// Creates an empty change set for `user_id`.
    #[must_use]
    pub const fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ops: Vec::new(),
        }
    }

    /// Appends an event insertion.
    #[must_use]
    pub fn insert_event(mut self, event: MeterEvent) -> Self {
        self.ops.push(ChangeOp::InsertEvent(event));
        self
    }

    /// Appends a void.
    #[must_use]
    pub fn void_event(mut self, event_id: EventId, reason: &str, at: DateTime<Utc>) -> Self {
        self.ops.push(ChangeOp::VoidEvent {
            event_id,
            reason: reason.to_string(),
            at,
        });
        self
    }

    /// Appends a superseded-by link.
    #[must_use]
    pub fn link_superseded(mut self, event_id: EventId, superseded_by: EventId) -> Self {
        self.ops.push(ChangeOp::LinkSuperseded {
            event_id,
            superseded_by,
        });
        self
    }

    /// Appends a balance shift. Empty id lists are skipped.
    #[must_use]
    pub fn shift_balances(mut self, event_ids: Vec<EventId>, offset: Kwh) -> Self {
        if !event_ids.is_empty() {
            self.ops.push(ChangeOp::ShiftBalances { event_ids, offset });
        }
        self
    }

    /// Appends an audit row.
    #[must_use]
    pub fn insert_audit(mut self, audit: RecalculationAudit) -> Self {
        self.ops.push(ChangeOp::InsertAudit(audit));
        self
    }

    /// Appends an undo stamp.
    #[must_use]
    pub fn mark_audit_undone(mut self, audit_id: AuditId, at: DateTime<Utc>) -> Self {
        self.ops.push(ChangeOp::MarkAuditUndone { audit_id, at });
        self
    }

    /// Returns `true` if there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Storage backend for meter events and recalculation audits.
///
/// Reads only return rows owned by the given user. Ordered reads consider
/// active events only.
#[async_trait]
pub trait LedgerStore: Send + Sync + std::fmt::Debug {
    /// Short backend name reported by the health check.
    fn backend(&self) -> &'static str;

    /// Checks that the backend can serve requests.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::PersistenceError`] if it cannot.
    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    /// Latest active event strictly before `date`.
    async fn fetch_before(
        &self,
        user_id: UserId,
        date: DateTime<Utc>,
    ) -> Result<Option<MeterEvent>, LedgerError>;

    /// Active events strictly after `date`, oldest first.
    async fn fetch_after(
        &self,
        user_id: UserId,
        date: DateTime<Utc>,
    ) -> Result<Vec<MeterEvent>, LedgerError>;

    /// Active event at exactly `date`.
    async fn fetch_at(
        &self,
        user_id: UserId,
        date: DateTime<Utc>,
    ) -> Result<Option<MeterEvent>, LedgerError>;

    /// Most recent active event.
    async fn latest(&self, user_id: UserId) -> Result<Option<MeterEvent>, LedgerError>;

    /// Event by id, active or voided.
    async fn get_event(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> Result<Option<MeterEvent>, LedgerError>;

    /// All events of a user ordered by `event_date`, then `created_at`.
    async fn list_events(
        &self,
        user_id: UserId,
        include_voided: bool,
    ) -> Result<Vec<MeterEvent>, LedgerError>;

    /// Audit by id.
    async fn get_audit(
        &self,
        user_id: UserId,
        audit_id: AuditId,
    ) -> Result<Option<RecalculationAudit>, LedgerError>;

    /// Audit carrying the given idempotency key.
    async fn find_audit_by_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<RecalculationAudit>, LedgerError>;

    /// All audits of a user, newest first.
    async fn list_audits(&self, user_id: UserId) -> Result<Vec<RecalculationAudit>, LedgerError>;

    /// Applies every op of `changes` or none of them.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::TransactionFailure`] (or the specific error of
    /// the failing op) and leaves the store unchanged.
    async fn commit(&self, changes: ChangeSet) -> Result<(), LedgerError>;
}
