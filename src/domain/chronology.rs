//! Ordered lookups over a user's events.
//!
//! These helpers only ever consider active events; voided events are kept
//! for audit but take no part in ordering. Stores use them to answer the
//! fetch-before / fetch-after reads, and the impact analyzer uses
//! [`CascadeWindow`] to pick the events a cascade touches.

use chrono::{DateTime, Utc};

use super::{EventId, MeterEvent};

/// Latest active event strictly before `date`.
#[must_use]
pub fn last_event_before(events: &[MeterEvent], date: DateTime<Utc>) -> Option<&MeterEvent> {
    events
        .iter()
        .filter(|e| e.is_active() && e.event_date < date)
        .max_by_key(|e| e.event_date)
}

/// Active events strictly after `date`, oldest first.
#[must_use]
pub fn events_after(events: &[MeterEvent], date: DateTime<Utc>) -> Vec<&MeterEvent> {
    let mut later: Vec<&MeterEvent> = events
        .iter()
        .filter(|e| e.is_active() && e.event_date > date)
        .collect();
    later.sort_by_key(|e| e.event_date);
    later
}

/// The active event recorded at exactly `date`, if any.
#[must_use]
pub fn event_at(events: &[MeterEvent], date: DateTime<Utc>) -> Option<&MeterEvent> {
    events
        .iter()
        .find(|e| e.is_active() && e.event_date == date)
}

/// Most recent active event.
#[must_use]
pub fn latest(events: &[MeterEvent]) -> Option<&MeterEvent> {
    events
        .iter()
        .filter(|e| e.is_active())
        .max_by_key(|e| e.event_date)
}

/// Date range whose events receive a cascade offset.
///
/// Events strictly after `after` and strictly before `until` are shifted.
/// The first active event at or after `until` is the unshifted tail that the
/// shifted chain must still connect to. `exclude` skips the event being
/// moved by the edit that triggered the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeWindow {
    /// Exclusive lower bound.
    pub after: DateTime<Utc>,
    /// Exclusive upper bound; `None` runs to the end of the ledger.
    pub until: Option<DateTime<Utc>>,
    /// Event ignored by the window.
    pub exclude: Option<EventId>,
}

impl CascadeWindow {
    /// Window covering everything after `after`.
    #[must_use]
    pub const fn open(after: DateTime<Utc>) -> Self {
        Self {
            after,
            until: None,
            exclude: None,
        }
    }

    /// Window between two dates.
    #[must_use]
    pub const fn between(after: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            after,
            until: Some(until),
            exclude: None,
        }
    }

    /// Skips `id` when selecting events.
    #[must_use]
    pub const fn excluding(mut self, id: EventId) -> Self {
        self.exclude = Some(id);
        self
    }

    /// Splits the active events after `self.after` (already ordered) into
    /// the shifted part and the unshifted tail event.
    #[must_use]
    pub fn split(&self, later: Vec<MeterEvent>) -> (Vec<MeterEvent>, Option<MeterEvent>) {
        let mut affected = Vec::new();
        let mut tail = None;
        for event in later {
            if Some(event.id) == self.exclude || event.event_date <= self.after {
                continue;
            }
            match self.until {
                Some(until) if event.event_date >= until => {
                    tail = Some(event);
                    break;
                }
                _ => affected.push(event),
            }
        }
        (affected, tail)
    }
}
