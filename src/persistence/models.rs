//! Database rows for events and recalculation audits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{AuditId, EventId, Kwh, MeterEvent, RecalculationAudit, UserId};
use crate::error::LedgerError;

/// A row from the `meter_events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    /// Event id.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// `"reading"` or `"topup"`.
    pub event_type: String,
    /// Attributed date.
    pub event_date: DateTime<Utc>,
    /// Balance in kWh.
    pub balance_kwh: Decimal,
    /// Purchased kWh for top-ups.
    pub purchase_kwh: Option<Decimal>,
    /// Money paid.
    pub token_cost: Option<Decimal>,
    /// Free text.
    pub notes: Option<String>,
    /// Logical deletion flag.
    pub voided: bool,
    /// Void reason.
    pub voided_reason: Option<String>,
    /// Void timestamp.
    pub voided_at: Option<DateTime<Utc>>,
    /// Replaced event.
    pub supersedes: Option<Uuid>,
    /// Replacing event.
    pub superseded_by: Option<Uuid>,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for MeterEvent {
    type Error = LedgerError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: EventId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            event_type: row
                .event_type
                .parse()
                .map_err(|e: LedgerError| LedgerError::PersistenceError(e.to_string()))?,
            event_date: row.event_date,
            balance_kwh: Kwh::new(row.balance_kwh),
            purchase_kwh: row.purchase_kwh.map(Kwh::new),
            token_cost: row.token_cost,
            notes: row.notes,
            voided: row.voided,
            voided_reason: row.voided_reason,
            voided_at: row.voided_at,
            supersedes: row.supersedes.map(EventId::from_uuid),
            superseded_by: row.superseded_by.map(EventId::from_uuid),
            created_at: row.created_at,
        })
    }
}

/// A row from the `recalculation_audits` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditRow {
    /// Audit id.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Event that caused the cascade.
    pub triggering_event_id: Uuid,
    /// Trigger discriminator.
    pub trigger_type: String,
    /// Applied offset.
    pub offset_kwh: Decimal,
    /// Shifted events, oldest first.
    pub affected_event_ids: Vec<Uuid>,
    /// Commit time.
    pub applied_at: DateTime<Utc>,
    /// End of the undo window.
    pub undo_deadline: DateTime<Utc>,
    /// Undo time.
    pub undone_at: Option<DateTime<Utc>>,
    /// Client idempotency key.
    pub idempotency_key: Option<String>,
}

impl TryFrom<AuditRow> for RecalculationAudit {
    type Error = LedgerError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: AuditId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            triggering_event_id: EventId::from_uuid(row.triggering_event_id),
            trigger_type: row
                .trigger_type
                .parse()
                .map_err(|e: LedgerError| LedgerError::PersistenceError(e.to_string()))?,
            offset_kwh: Kwh::new(row.offset_kwh),
            affected_event_ids: row
                .affected_event_ids
                .into_iter()
                .map(EventId::from_uuid)
                .collect(),
            applied_at: row.applied_at,
            undo_deadline: row.undo_deadline,
            undone_at: row.undone_at,
            idempotency_key: row.idempotency_key,
        })
    }
}
