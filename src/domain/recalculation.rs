//! Audit records for applied cascades and the undo-window rules.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{AuditId, EventId, Kwh, UserId};
use crate::error::LedgerError;

/// Default time a cascade stays reversible.
pub const DEFAULT_UNDO_WINDOW_HOURS: i64 = 24;

/// What caused a cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    /// A new top-up dated before existing events.
    NewBackdateTopup,
    /// An edit that changed a top-up's purchase amount.
    EditTopup,
    /// An edit that moved a top-up to a different date.
    BackdateTopup,
}

impl TriggerType {
    /// Returns the storage discriminator.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NewBackdateTopup => "NEW_BACKDATE_TOPUP",
            Self::EditTopup => "EDIT_TOPUP",
            Self::BackdateTopup => "BACKDATE_TOPUP",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW_BACKDATE_TOPUP" => Ok(Self::NewBackdateTopup),
            "EDIT_TOPUP" => Ok(Self::EditTopup),
            "BACKDATE_TOPUP" => Ok(Self::BackdateTopup),
            other => Err(LedgerError::Internal(format!("unknown trigger type: {other}"))),
        }
    }
}

/// Record of one applied cascade. Written in the same atomic change set as
/// the balance shift it describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalculationAudit {
    /// Audit identifier.
    pub id: AuditId,
    /// Owning user.
    pub user_id: UserId,
    /// Event whose insertion or edit caused the cascade.
    pub triggering_event_id: EventId,
    /// Kind of change that caused the cascade.
    pub trigger_type: TriggerType,
    /// Offset added to every affected event.
    pub offset_kwh: Kwh,
    /// Shifted events, oldest first.
    pub affected_event_ids: Vec<EventId>,
    /// When the cascade was committed.
    pub applied_at: DateTime<Utc>,
    /// Last instant (exclusive) at which the cascade may be undone.
    pub undo_deadline: DateTime<Utc>,
    /// When the cascade was undone, if it was.
    pub undone_at: Option<DateTime<Utc>>,
    /// Client-supplied key that makes a retried apply a no-op.
    pub idempotency_key: Option<String>,
}

impl RecalculationAudit {
    /// Creates an audit applied at `applied_at` with the given undo window.
    #[must_use]
    pub fn new(
        user_id: UserId,
        triggering_event_id: EventId,
        trigger_type: TriggerType,
        offset_kwh: Kwh,
        affected_event_ids: Vec<EventId>,
        applied_at: DateTime<Utc>,
        undo_window: Duration,
    ) -> Self {
        Self {
            id: AuditId::new(),
            user_id,
            triggering_event_id,
            trigger_type,
            offset_kwh,
            affected_event_ids,
            applied_at,
            undo_deadline: applied_at + undo_window,
            undone_at: None,
            idempotency_key: None,
        }
    }

    /// Attaches an idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    /// Checks that the cascade can still be reversed at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AlreadyUndone`] if it was already reversed, or
    /// [`LedgerError::UndoExpired`] once `now` reaches the deadline.
    pub fn check_undoable(&self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if let Some(undone_at) = self.undone_at {
            return Err(LedgerError::AlreadyUndone { undone_at });
        }
        if now >= self.undo_deadline {
            return Err(LedgerError::UndoExpired {
                deadline: self.undo_deadline,
            });
        }
        Ok(())
    }

    /// Returns `true` if [`Self::check_undoable`] would pass at `now`.
    #[must_use]
    pub fn is_undoable(&self, now: DateTime<Utc>) -> bool {
        self.check_undoable(now).is_ok()
    }

    /// Offset that reverses this cascade.
    #[must_use]
    pub fn reverse_offset(&self) -> Kwh {
        -self.offset_kwh
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn audit(applied_at: DateTime<Utc>) -> RecalculationAudit {
        RecalculationAudit::new(
            UserId::new(),
            EventId::new(),
            TriggerType::NewBackdateTopup,
            Kwh::from(40),
            vec![EventId::new(), EventId::new()],
            applied_at,
            Duration::hours(DEFAULT_UNDO_WINDOW_HOURS),
        )
    }

    #[test]
    fn deadline_is_applied_at_plus_window() {
        let now = Utc::now();
        let a = audit(now);
        assert_eq!(a.undo_deadline, now + Duration::hours(24));
        assert!(a.is_undoable(now));
        assert!(a.is_undoable(now + Duration::hours(23)));
    }

    #[test]
    fn undo_rejected_at_deadline() {
        let now = Utc::now();
        let a = audit(now);
        let result = a.check_undoable(now + Duration::hours(24));
        assert!(matches!(result, Err(LedgerError::UndoExpired { .. })));
    }

    #[test]
    fn undo_rejected_twice() {
        let now = Utc::now();
        let mut a = audit(now);
        a.undone_at = Some(now);
        let result = a.check_undoable(now);
        assert!(matches!(result, Err(LedgerError::AlreadyUndone { .. })));
    }

    #[test]
    fn reverse_offset_negates() {
        let a = audit(Utc::now());
        assert_eq!(a.reverse_offset(), Kwh::from(-40));
    }

    #[test]
    fn trigger_type_storage_names_round_trip() {
        for t in [
            TriggerType::NewBackdateTopup,
            TriggerType::EditTopup,
            TriggerType::BackdateTopup,
        ] {
            assert_eq!(t.as_str().parse::<TriggerType>().ok(), Some(t));
        }
    }
}
