//! Meter events: the dated balance records that make up a user's ledger.
//!
//! History is append-only. Editing an event never changes it in place: the
//! old event is voided and a replacement is inserted with a `supersedes`
//! link. The only field that ever changes on a live event is `balance_kwh`,
//! and only through a recalculation cascade.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{EventId, Kwh, KwhOverflow, UserId};
use crate::error::LedgerError;

/// Kind of balance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The balance shown on the meter display.
    Reading,
    /// A purchase of prepaid energy; `balance_kwh` holds the balance after
    /// the purchase was applied.
    Topup,
}

impl EventType {
    /// Returns the storage discriminator.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reading => "reading",
            Self::Topup => "topup",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reading" => Ok(Self::Reading),
            "topup" => Ok(Self::Topup),
            other => Err(LedgerError::InvalidRequest(format!(
                "unknown event type: {other}"
            ))),
        }
    }
}

/// Lifecycle state of an event. `Active → Voided` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Visible in the current view.
    Active,
    /// Logically deleted, kept for audit.
    Voided,
}

/// A single dated balance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterEvent {
    /// Stable identifier.
    pub id: EventId,
    /// Owning user.
    pub user_id: UserId,
    /// Reading or top-up.
    pub event_type: EventType,
    /// Time the event is attributed to. May lie in the past.
    pub event_date: DateTime<Utc>,
    /// Meter balance at `event_date` (after the purchase for top-ups).
    pub balance_kwh: Kwh,
    /// Energy added by a top-up.
    pub purchase_kwh: Option<Kwh>,
    /// Money paid for a top-up.
    pub token_cost: Option<Decimal>,
    /// Free text.
    pub notes: Option<String>,
    /// Logical deletion flag.
    pub voided: bool,
    /// Why the event was voided.
    pub voided_reason: Option<String>,
    /// When the event was voided.
    pub voided_at: Option<DateTime<Utc>>,
    /// The voided event this one replaces.
    pub supersedes: Option<EventId>,
    /// The event that replaced this one.
    pub superseded_by: Option<EventId>,
    /// Wall-clock insertion time.
    pub created_at: DateTime<Utc>,
}

impl MeterEvent {
    /// Creates an active meter reading.
    #[must_use]
    pub fn reading(user_id: UserId, event_date: DateTime<Utc>, balance_kwh: Kwh) -> Self {
        Self::active(user_id, EventType::Reading, event_date, balance_kwh, None)
    }

    /// Creates an active top-up whose balance is `previous_balance +
    /// purchase_kwh`.
    ///
    /// # Errors
    ///
    /// Returns [`KwhOverflow`] if the resulting balance is out of range.
    pub fn topup(
        user_id: UserId,
        event_date: DateTime<Utc>,
        previous_balance: Kwh,
        purchase_kwh: Kwh,
    ) -> Result<Self, KwhOverflow> {
        Ok(Self::active(
            user_id,
            EventType::Topup,
            event_date,
            previous_balance.try_add(purchase_kwh)?,
            Some(purchase_kwh),
        ))
    }

    fn active(
        user_id: UserId,
        event_type: EventType,
        event_date: DateTime<Utc>,
        balance_kwh: Kwh,
        purchase_kwh: Option<Kwh>,
    ) -> Self {
        Self {
            id: EventId::new(),
            user_id,
            event_type,
            event_date,
            balance_kwh,
            purchase_kwh,
            token_cost: None,
            notes: None,
            voided: false,
            voided_reason: None,
            voided_at: None,
            supersedes: None,
            superseded_by: None,
            created_at: Utc::now(),
        }
    }

    /// Sets the token cost.
    #[must_use]
    pub fn with_token_cost(mut self, token_cost: Option<Decimal>) -> Self {
        self.token_cost = token_cost;
        self
    }

    /// Sets the notes.
    #[must_use]
    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    /// Marks this event as replacing `previous`.
    #[must_use]
    pub fn superseding(mut self, previous: EventId) -> Self {
        self.supersedes = Some(previous);
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn status(&self) -> EventStatus {
        if self.voided {
            EventStatus::Voided
        } else {
            EventStatus::Active
        }
    }

    /// Returns `true` unless the event has been voided.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.voided
    }

    /// Returns `true` for top-ups.
    #[must_use]
    pub fn is_topup(&self) -> bool {
        self.event_type == EventType::Topup
    }

    /// Balance immediately before this event: the top-up's purchase is
    /// removed, a reading is returned as-is.
    ///
    /// # Errors
    ///
    /// Returns [`KwhOverflow`] if the difference is out of range.
    pub fn balance_before_purchase(&self) -> Result<Kwh, KwhOverflow> {
        match self.purchase_kwh {
            Some(purchase) if self.is_topup() => self.balance_kwh.try_sub(purchase),
            _ => Ok(self.balance_kwh),
        }
    }

    /// Price paid per kWh for a top-up with a known cost.
    #[must_use]
    pub fn unit_price(&self) -> Option<Decimal> {
        let purchase = self.purchase_kwh?.as_decimal();
        let cost = self.token_cost?;
        if purchase.is_zero() {
            return None;
        }
        cost.checked_div(purchase)
    }

    /// Transitions `Active → Voided`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::EventVoided`] if the event is already voided.
    pub fn void(&mut self, reason: &str, at: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.voided {
            return Err(LedgerError::EventVoided(*self.id.as_uuid()));
        }
        self.voided = true;
        self.voided_reason = Some(reason.to_string());
        self.voided_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 8, 0, 0)
            .single()
            .unwrap_or_else(|| panic!("valid date"))
    }

    #[test]
    fn topup_balance_adds_purchase() {
        let Ok(ev) = MeterEvent::topup(UserId::new(), at(1), Kwh::from(12), Kwh::from(40)) else {
            panic!("small top-up fits");
        };
        assert_eq!(ev.balance_kwh, Kwh::from(52));
        assert_eq!(ev.balance_before_purchase(), Ok(Kwh::from(12)));
        assert_eq!(ev.purchase_kwh, Some(Kwh::from(40)));
    }

    #[test]
    fn topup_past_decimal_range_is_refused() {
        let Ok(huge) = "79228162514264337593543950335".parse::<Kwh>() else {
            panic!("largest decimal parses");
        };
        assert!(MeterEvent::topup(UserId::new(), at(1), Kwh::from(1), huge).is_err());
        assert!(MeterEvent::topup(UserId::new(), at(1), Kwh::ZERO, huge).is_ok());
    }

    #[test]
    fn reading_has_no_purchase() {
        let ev = MeterEvent::reading(UserId::new(), at(1), Kwh::from(30));
        assert!(ev.purchase_kwh.is_none());
        assert_eq!(ev.balance_before_purchase(), Ok(Kwh::from(30)));
        assert_eq!(ev.status(), EventStatus::Active);
    }

    #[test]
    fn void_is_one_way() {
        let mut ev = MeterEvent::reading(UserId::new(), at(2), Kwh::from(30));
        assert!(ev.void("typo", at(3)).is_ok());
        assert_eq!(ev.status(), EventStatus::Voided);
        assert_eq!(ev.voided_reason.as_deref(), Some("typo"));
        assert_eq!(ev.voided_at, Some(at(3)));

        let again = ev.void("again", at(4));
        assert!(matches!(again, Err(LedgerError::EventVoided(_))));
        assert_eq!(ev.voided_reason.as_deref(), Some("typo"));
    }

    #[test]
    fn unit_price_from_cost_and_purchase() {
        let Ok(no_cost) = MeterEvent::topup(UserId::new(), at(1), Kwh::ZERO, Kwh::from(50)) else {
            panic!("small top-up fits");
        };
        assert_eq!(no_cost.unit_price(), None);

        let ev = no_cost.with_token_cost(Some(Decimal::new(10000, 2)));
        assert_eq!(ev.unit_price(), Some(Decimal::from(2)));
    }

    #[test]
    fn event_type_parses_storage_names() {
        assert_eq!("reading".parse::<EventType>().ok(), Some(EventType::Reading));
        assert_eq!("topup".parse::<EventType>().ok(), Some(EventType::Topup));
        assert!("refund".parse::<EventType>().is_err());
    }
}
