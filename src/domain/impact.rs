//! Backdate impact analysis.
//!
//! Given the events a cascade would shift and the offset it would apply,
//! [`analyze`] previews the before/after balance of each event and reports
//! anything that would leave the ledger in an illogical state. It never
//! writes, so it is safe to call repeatedly while a user is still composing
//! a backdated entry.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{EventId, EventType, Kwh, KwhOverflow, MeterEvent};
use crate::error::LedgerError;

/// How serious an [`ImpactIssue`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The cascade must not be applied.
    Block,
    /// The cascade may be applied after the user acknowledges it.
    Warn,
}

/// A problem found while previewing a cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImpactIssue {
    /// After the shift, a reading would be higher than the event before it.
    OrderingViolation {
        /// The earlier event of the conflicting pair.
        earlier: EventId,
        /// Its balance after the shift.
        earlier_after: Kwh,
        /// The later reading of the conflicting pair.
        later: EventId,
        /// Its balance after the shift (unchanged if it lies past the window).
        later_after: Kwh,
    },
    /// A negative offset would drive an event's balance below zero.
    NegativeBalance {
        /// The event that would go negative.
        event_id: EventId,
        /// Its balance after the shift.
        after: Kwh,
    },
    /// The offset is larger than the configured warning threshold.
    LargeOffset {
        /// Offset being applied.
        offset: Kwh,
        /// Configured threshold.
        threshold: Kwh,
    },
}

impl ImpactIssue {
    /// Severity of this issue.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::OrderingViolation { .. } | Self::NegativeBalance { .. } => Severity::Block,
            Self::LargeOffset { .. } => Severity::Warn,
        }
    }

    /// Converts a blocking issue into the error surfaced to callers.
    #[must_use]
    pub fn to_error(&self) -> Option<LedgerError> {
        match self {
            Self::OrderingViolation { earlier, later, .. } => Some(LedgerError::CascadeConflict {
                earlier: *earlier.as_uuid(),
                later: *later.as_uuid(),
            }),
            Self::NegativeBalance { event_id, after } => Some(LedgerError::CascadeNegative {
                event_id: *event_id.as_uuid(),
                after: after.to_string(),
            }),
            Self::LargeOffset { .. } => None,
        }
    }
}

/// Before/after balance of one event touched by a cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffectedPreview {
    /// Event being shifted.
    pub event_id: EventId,
    /// Its type.
    pub event_type: EventType,
    /// Its date.
    pub event_date: DateTime<Utc>,
    /// Current balance.
    pub before: Kwh,
    /// Balance after the shift.
    pub after: Kwh,
}

/// Result of [`analyze`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpactReport {
    /// Offset the cascade would apply.
    pub offset_kwh: Kwh,
    /// Problems found, in chain order.
    pub issues: Vec<ImpactIssue>,
    /// One entry per affected event, oldest first.
    pub preview: Vec<AffectedPreview>,
}

impl ImpactReport {
    /// Returns `true` if any issue blocks the cascade.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.issues.iter().any(|i| i.severity() == Severity::Block)
    }

    /// Issues with [`Severity::Block`].
    pub fn blocking_issues(&self) -> impl Iterator<Item = &ImpactIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity() == Severity::Block)
    }

    /// Ids of the affected events, in order.
    #[must_use]
    pub fn affected_ids(&self) -> Vec<EventId> {
        self.preview.iter().map(|p| p.event_id).collect()
    }

    /// Returns `true` if there is nothing to shift.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.preview.is_empty()
    }

    /// Fails with the first blocking issue, if any.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::CascadeConflict`] or
    /// [`LedgerError::CascadeNegative`] for the first blocking issue.
    pub fn ensure_unblocked(&self) -> Result<(), LedgerError> {
        match self.blocking_issues().find_map(ImpactIssue::to_error) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Tunables for [`analyze`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImpactPolicy {
    /// Offsets with an absolute value above this raise a warning.
    pub large_offset_warn: Option<Kwh>,
}

/// Previews shifting every event in `affected` by `offset`.
///
/// `affected` must be ordered by `event_date`. `tail` is the first event
/// after the window, which keeps its balance and must still satisfy the
/// depletion rule against the last shifted event.
///
/// # Errors
///
/// Returns [`KwhOverflow`] if a shifted balance is out of range.
pub fn analyze(
    affected: &[MeterEvent],
    tail: Option<&MeterEvent>,
    offset: Kwh,
    policy: ImpactPolicy,
) -> Result<ImpactReport, KwhOverflow> {
    let mut issues = Vec::new();

    if let Some(threshold) = policy.large_offset_warn
        && offset.abs() > threshold
    {
        issues.push(ImpactIssue::LargeOffset { offset, threshold });
    }

    let preview = affected
        .iter()
        .map(|e| {
            Ok(AffectedPreview {
                event_id: e.id,
                event_type: e.event_type,
                event_date: e.event_date,
                before: e.balance_kwh,
                after: e.balance_kwh.try_add(offset)?,
            })
        })
        .collect::<Result<Vec<_>, KwhOverflow>>()?;

    for p in &preview {
        if p.after.is_negative() {
            issues.push(ImpactIssue::NegativeBalance {
                event_id: p.event_id,
                after: p.after,
            });
        }
    }

    let chain = preview
        .iter()
        .map(|p| (p.event_id, p.event_type, p.after))
        .chain(tail.map(|t| (t.id, t.event_type, t.balance_kwh)));
    let mut previous: Option<(EventId, Kwh)> = None;
    for (id, event_type, value) in chain {
        if let Some((prev_id, prev_value)) = previous
            && event_type == EventType::Reading
            && value > prev_value
        {
            issues.push(ImpactIssue::OrderingViolation {
                earlier: prev_id,
                earlier_after: prev_value,
                later: id,
                later_after: value,
            });
        }
        previous = Some((id, value));
    }

    Ok(ImpactReport {
        offset_kwh: offset,
        issues,
        preview,
    })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::UserId;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 9, 30, 0)
            .single()
            .unwrap_or_else(|| panic!("valid date"))
    }

    fn readings(user: UserId, values: &[i64]) -> Vec<MeterEvent> {
        values
            .iter()
            .zip(10u32..)
            .map(|(v, day)| MeterEvent::reading(user, at(day), Kwh::from(*v)))
            .collect()
    }

    fn report_for(
        affected: &[MeterEvent],
        tail: Option<&MeterEvent>,
        offset: Kwh,
        policy: ImpactPolicy,
    ) -> ImpactReport {
        let Ok(report) = analyze(affected, tail, offset, policy) else {
            panic!("shift stays in range");
        };
        report
    }

    #[test]
    fn preview_shifts_every_affected_event() {
        let events = readings(UserId::new(), &[45, 30, 10]);
        let report = report_for(&events, None, Kwh::from(40), ImpactPolicy::default());

        let afters: Vec<Kwh> = report.preview.iter().map(|p| p.after).collect();
        assert_eq!(afters, vec![Kwh::from(85), Kwh::from(70), Kwh::from(50)]);
        let befores: Vec<Kwh> = report.preview.iter().map(|p| p.before).collect();
        assert_eq!(befores, vec![Kwh::from(45), Kwh::from(30), Kwh::from(10)]);
        assert!(report.issues.is_empty());
        assert!(report.ensure_unblocked().is_ok());
    }

    #[test]
    fn reading_rising_after_shift_blocks_with_pair() {
        let events = readings(UserId::new(), &[45, 30, 10, 25]);
        let report = report_for(&events, None, Kwh::from(40), ImpactPolicy::default());

        assert!(report.is_blocked());
        let Some(ImpactIssue::OrderingViolation { earlier, later, .. }) =
            report.blocking_issues().next()
        else {
            panic!("expected an ordering violation");
        };
        let (Some(third), Some(fourth)) = (events.get(2), events.get(3)) else {
            panic!("fixture has four events");
        };
        assert_eq!((*earlier, *later), (third.id, fourth.id));
        assert!(matches!(
            report.ensure_unblocked(),
            Err(LedgerError::CascadeConflict { .. })
        ));
    }

    #[test]
    fn shifted_reading_compared_to_unshifted_tail() {
        let user = UserId::new();
        let affected = readings(user, &[45, 30, 10]);
        let tail = MeterEvent::reading(user, at(20), Kwh::from(20));

        let report = report_for(&affected, Some(&tail), Kwh::from(40), ImpactPolicy::default());
        assert!(!report.is_blocked(), "50 then 20 still depletes");

        let report = report_for(&affected, Some(&tail), Kwh::from(-5), ImpactPolicy::default());
        let Some(ImpactIssue::OrderingViolation { later, .. }) = report.blocking_issues().next()
        else {
            panic!("expected tail violation");
        };
        assert_eq!(*later, tail.id);
        assert_eq!(report.preview.len(), 3, "tail is not shifted");
    }

    #[test]
    fn tail_topup_never_violates() {
        let user = UserId::new();
        let affected = readings(user, &[10]);
        let Ok(tail) = MeterEvent::topup(user, at(25), Kwh::from(5), Kwh::from(100)) else {
            panic!("small top-up fits");
        };
        let report = report_for(&affected, Some(&tail), Kwh::from(-4), ImpactPolicy::default());
        assert!(!report.is_blocked());
    }

    #[test]
    fn negative_offset_below_zero_blocks() {
        let events = readings(UserId::new(), &[45, 30, 10]);
        let report = report_for(&events, None, Kwh::from(-15), ImpactPolicy::default());
        let Some(third) = events.get(2) else {
            panic!("fixture has three events");
        };
        assert_eq!(
            report.blocking_issues().next(),
            Some(&ImpactIssue::NegativeBalance {
                event_id: third.id,
                after: Kwh::from(-5),
            })
        );
        assert!(matches!(
            report.ensure_unblocked(),
            Err(LedgerError::CascadeNegative { .. })
        ));
    }

    #[test]
    fn large_offset_only_warns() {
        let events = readings(UserId::new(), &[45]);
        let policy = ImpactPolicy {
            large_offset_warn: Some(Kwh::from(100)),
        };
        let report = report_for(&events, None, Kwh::from(500), policy);
        assert_eq!(report.issues.len(), 1);
        assert!(!report.is_blocked());
        assert!(report.ensure_unblocked().is_ok());
    }

    #[test]
    fn empty_window_is_empty_report() {
        let report = report_for(&[], None, Kwh::from(40), ImpactPolicy::default());
        assert!(report.is_empty());
        assert!(report.affected_ids().is_empty());
    }

    #[test]
    fn shift_past_decimal_range_is_an_error() {
        let Ok(huge) = "79228162514264337593543950335".parse::<Kwh>() else {
            panic!("largest decimal parses");
        };
        let events = readings(UserId::new(), &[45]);
        assert!(analyze(&events, None, huge, ImpactPolicy::default()).is_err());
        assert!(analyze(&[], None, huge, ImpactPolicy::default()).is_ok());
    }
}
