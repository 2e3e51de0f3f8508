//! Inputs and outcomes of the ledger service pipelines.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    ConflictResolution, DuplicateConflict, EventId, EventType, ImpactReport, Kwh, MeterEvent,
    RecalculationAudit, TriggerType, UserId, ValidationResult,
};

/// A candidate event submitted by a user.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Reading or top-up.
    pub event_type: EventType,
    /// Attributed date.
    pub event_date: DateTime<Utc>,
    /// Meter display value; required for readings.
    pub balance_kwh: Option<Kwh>,
    /// Purchased energy; required for top-ups.
    pub purchase_kwh: Option<Kwh>,
    /// Money paid.
    pub token_cost: Option<Decimal>,
    /// Free text.
    pub notes: Option<String>,
    /// Choice made after a previous [`SubmitOutcome::DuplicateDate`].
    pub resolution: Option<ConflictResolution>,
    /// Commit a backdated top-up after its preview was shown.
    pub confirm_cascade: bool,
    /// Client key that makes a retried cascade a no-op.
    pub idempotency_key: Option<String>,
}

impl NewEvent {
    /// A reading with no optional fields.
    #[must_use]
    pub const fn reading(event_date: DateTime<Utc>, balance_kwh: Kwh) -> Self {
        Self {
            event_type: EventType::Reading,
            event_date,
            balance_kwh: Some(balance_kwh),
            purchase_kwh: None,
            token_cost: None,
            notes: None,
            resolution: None,
            confirm_cascade: false,
            idempotency_key: None,
        }
    }

    /// A top-up with no optional fields.
    #[must_use]
    pub const fn topup(event_date: DateTime<Utc>, purchase_kwh: Kwh) -> Self {
        Self {
            event_type: EventType::Topup,
            event_date,
            balance_kwh: None,
            purchase_kwh: Some(purchase_kwh),
            token_cost: None,
            notes: None,
            resolution: None,
            confirm_cascade: false,
            idempotency_key: None,
        }
    }

    /// Marks the cascade as confirmed.
    #[must_use]
    pub const fn confirmed(mut self) -> Self {
        self.confirm_cascade = true;
        self
    }

    /// Sets the duplicate-date resolution.
    #[must_use]
    pub const fn resolved(mut self, resolution: ConflictResolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// The same values expressed as an edit of another event.
    #[must_use]
    pub fn into_edit(self) -> EditEvent {
        EditEvent {
            event_date: None,
            balance_kwh: self.balance_kwh,
            purchase_kwh: self.purchase_kwh,
            token_cost: self.token_cost,
            notes: self.notes,
            confirm_cascade: self.confirm_cascade,
            idempotency_key: self.idempotency_key,
        }
    }
}

/// Changes to an existing event. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditEvent {
    /// New date.
    pub event_date: Option<DateTime<Utc>>,
    /// New reading value; readings only.
    pub balance_kwh: Option<Kwh>,
    /// New purchase amount; top-ups only.
    pub purchase_kwh: Option<Kwh>,
    /// New token cost.
    pub token_cost: Option<Decimal>,
    /// New notes.
    pub notes: Option<String>,
    /// Commit a cascade after its preview was shown.
    pub confirm_cascade: bool,
    /// Client key that makes a retried cascade a no-op.
    pub idempotency_key: Option<String>,
}

/// Result of a submit or edit pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The event was written.
    Recorded {
        /// The stored event.
        event: MeterEvent,
        /// Validation result, carrying consumption for readings.
        validation: ValidationResult,
        /// Cascade applied together with the event, if any.
        audit: Option<RecalculationAudit>,
    },
    /// Validation blocked the event. Nothing was written.
    Rejected(ValidationResult),
    /// Another active event exists at the same date. Nothing was written.
    DuplicateDate(DuplicateConflict),
    /// The event would shift later balances; resubmit with confirmation.
    NeedsConfirmation(ImpactReport),
}

/// Explicit cascade request for [`super::LedgerService::apply_cascade`].
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeRequest {
    /// Owning user.
    pub user_id: UserId,
    /// Event that caused the cascade.
    pub triggering_event_id: EventId,
    /// Kind of change.
    pub trigger_type: TriggerType,
    /// Events to shift, oldest first.
    pub affected_event_ids: Vec<EventId>,
    /// Offset to add.
    pub offset_kwh: Kwh,
    /// Client key that makes a retried apply a no-op.
    pub idempotency_key: Option<String>,
}
