//! Classification of a proposed balance against the last known balance.
//!
//! Every function here is pure: no I/O, no clock, same inputs give the same
//! result. They are cheap enough to run on every keystroke for live feedback
//! and again at submit time as the hard gate.

use serde::Serialize;

use super::{EventId, EventType, Kwh, KwhOverflow, MeterEvent};
use crate::error::LedgerError;

/// Outcome of validating a candidate balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationResult {
    /// The candidate may be persisted.
    Valid {
        /// Energy used since the prior reading, for readings with a prior.
        consumption: Option<Kwh>,
    },
    /// The value is malformed or negative. Blocking.
    InvalidValue {
        /// What was wrong with the input.
        reason: String,
    },
    /// A reading is higher than the prior balance. Blocking: the entry is
    /// most likely a top-up and should be re-entered as one.
    ReadingIncreased {
        /// How much higher than the prior balance the candidate is.
        delta: Kwh,
        /// The prior balance the candidate was compared against.
        prior: Kwh,
    },
    /// A backdated reading is lower than the reading that follows it.
    /// Blocking.
    ExceedsSuccessor {
        /// The later reading that would now show an increase.
        successor_id: EventId,
        /// The later reading's balance.
        successor_balance: Kwh,
    },
}

impl ValidationResult {
    /// Returns `true` if the candidate must not be persisted.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        !matches!(self, Self::Valid { .. })
    }

    /// User-facing corrective action for blocking results.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Valid { .. } => None,
            Self::InvalidValue { .. } => Some("enter a non-negative number"),
            Self::ReadingIncreased { .. } => Some("re-enter this event as a top-up"),
            Self::ExceedsSuccessor { .. } => {
                Some("check the date or the value; a later reading is higher")
            }
        }
    }

    /// The error reported to API clients for a blocking result.
    #[must_use]
    pub fn to_error(&self) -> Option<LedgerError> {
        match self {
            Self::Valid { .. } => None,
            Self::InvalidValue { reason } => Some(LedgerError::InvalidValue(reason.clone())),
            Self::ReadingIncreased { delta, prior } => Some(LedgerError::MonotonicityViolation {
                prior: prior.to_string(),
                candidate: prior
                    .checked_add(*delta)
                    .map_or_else(|| "out of range".to_string(), |c| c.to_string()),
                delta: delta.to_string(),
            }),
            Self::ExceedsSuccessor {
                successor_id,
                successor_balance,
            } => Some(LedgerError::InvalidRequest(format!(
                "later reading {successor_id} shows {successor_balance} kWh, above this reading"
            ))),
        }
    }
}

impl From<KwhOverflow> for ValidationResult {
    fn from(e: KwhOverflow) -> Self {
        Self::InvalidValue {
            reason: e.to_string(),
        }
    }
}

/// Validates `candidate` against the balance of the prior event.
///
/// `prior` is `None` when the user has no earlier event, in which case any
/// non-negative value is accepted.
#[must_use]
pub fn validate(candidate: Kwh, prior: Option<Kwh>, event_type: EventType) -> ValidationResult {
    if candidate.is_negative() {
        return ValidationResult::InvalidValue {
            reason: format!("balance must not be negative: {candidate}"),
        };
    }
    let Some(prior) = prior else {
        return ValidationResult::Valid { consumption: None };
    };
    let outcome = match event_type {
        EventType::Topup => Ok(ValidationResult::Valid { consumption: None }),
        EventType::Reading if candidate > prior => candidate
            .try_sub(prior)
            .map(|delta| ValidationResult::ReadingIncreased { delta, prior }),
        EventType::Reading => prior
            .try_sub(candidate)
            .map(|consumption| ValidationResult::Valid {
                consumption: Some(consumption),
            }),
    };
    outcome.unwrap_or_else(ValidationResult::from)
}

/// Parses raw user input and validates it.
///
/// Empty, non-numeric, `NaN` and infinite inputs yield
/// [`ValidationResult::InvalidValue`].
#[must_use]
pub fn validate_input(raw: &str, prior: Option<Kwh>, event_type: EventType) -> ValidationResult {
    match raw.parse::<Kwh>() {
        Ok(candidate) => validate(candidate, prior, event_type),
        Err(e) => ValidationResult::InvalidValue {
            reason: e.to_string(),
        },
    }
}

/// Checks a reading being inserted before an existing event.
///
/// Only a following `Reading` constrains the candidate; a following top-up
/// may legitimately be higher.
#[must_use]
pub fn validate_successor(candidate: Kwh, successor: Option<&MeterEvent>) -> ValidationResult {
    match successor {
        Some(next) if next.event_type == EventType::Reading && next.balance_kwh > candidate => {
            ValidationResult::ExceedsSuccessor {
                successor_id: next.id,
                successor_balance: next.balance_kwh,
            }
        }
        _ => ValidationResult::Valid { consumption: None },
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::UserId;
    use chrono::Utc;
    use proptest::prelude::*;

    #[test]
    fn reading_above_prior_is_blocked_with_delta() {
        let result = validate(Kwh::from(60), Some(Kwh::from(50)), EventType::Reading);
        assert_eq!(
            result,
            ValidationResult::ReadingIncreased {
                delta: Kwh::from(10),
                prior: Kwh::from(50),
            }
        );
        assert!(result.is_blocking());
        assert_eq!(result.suggestion(), Some("re-enter this event as a top-up"));
    }

    #[test]
    fn reading_below_prior_reports_consumption() {
        let result = validate(Kwh::from(30), Some(Kwh::from(50)), EventType::Reading);
        assert_eq!(
            result,
            ValidationResult::Valid {
                consumption: Some(Kwh::from(20)),
            }
        );
        assert!(!result.is_blocking());
    }

    #[test]
    fn equal_reading_is_valid_with_zero_consumption() {
        let result = validate(Kwh::from(50), Some(Kwh::from(50)), EventType::Reading);
        assert_eq!(
            result,
            ValidationResult::Valid {
                consumption: Some(Kwh::ZERO),
            }
        );
    }

    #[test]
    fn first_entry_is_always_valid() {
        let result = validate(Kwh::from(100), None, EventType::Reading);
        assert_eq!(result, ValidationResult::Valid { consumption: None });
    }

    #[test]
    fn topup_has_no_upper_bound() {
        let result = validate(Kwh::from(5_000), Some(Kwh::from(1)), EventType::Topup);
        assert!(!result.is_blocking());
    }

    #[test]
    fn negative_candidate_is_invalid() {
        let result = validate(Kwh::from(-1), Some(Kwh::from(50)), EventType::Topup);
        assert!(matches!(result, ValidationResult::InvalidValue { .. }));
        assert!(result.is_blocking());
    }

    #[test]
    fn unparsable_input_is_invalid() {
        for raw in ["", "abc", "NaN", "inf", "-inf"] {
            let result = validate_input(raw, Some(Kwh::from(5)), EventType::Reading);
            assert!(
                matches!(result, ValidationResult::InvalidValue { .. }),
                "{raw:?} accepted"
            );
        }
    }

    #[test]
    fn successor_reading_above_candidate_blocks() {
        let next = MeterEvent::reading(UserId::new(), Utc::now(), Kwh::from(30));
        let result = validate_successor(Kwh::from(20), Some(&next));
        assert_eq!(
            result,
            ValidationResult::ExceedsSuccessor {
                successor_id: next.id,
                successor_balance: Kwh::from(30),
            }
        );
    }

    #[test]
    fn increase_maps_to_monotonicity_error() {
        let result = validate(Kwh::from(60), Some(Kwh::from(50)), EventType::Reading);
        let Some(LedgerError::MonotonicityViolation {
            prior,
            candidate,
            delta,
        }) = result.to_error()
        else {
            panic!("expected monotonicity violation");
        };
        assert_eq!((prior.as_str(), candidate.as_str(), delta.as_str()), ("50", "60", "10"));
        assert!(ValidationResult::Valid { consumption: None }.to_error().is_none());
    }

    #[test]
    fn successor_topup_does_not_constrain() {
        let Ok(next) = MeterEvent::topup(UserId::new(), Utc::now(), Kwh::from(10), Kwh::from(40))
        else {
            panic!("small top-up fits");
        };
        let result = validate_successor(Kwh::from(20), Some(&next));
        assert!(!result.is_blocking());
        assert!(!validate_successor(Kwh::from(20), None).is_blocking());
    }

    fn kwh() -> impl Strategy<Value = Kwh> {
        (0i64..10_000_000).prop_map(|m| Kwh::from_parts(m, 3))
    }

    fn event_type() -> impl Strategy<Value = EventType> {
        prop_oneof![Just(EventType::Reading), Just(EventType::Topup)]
    }

    proptest! {
        /// Identical inputs always produce identical results.
        #[test]
        fn prop_validate_is_deterministic(
            candidate in kwh(),
            prior in proptest::option::of(kwh()),
            ty in event_type(),
        ) {
            prop_assert_eq!(validate(candidate, prior, ty), validate(candidate, prior, ty));
        }

        /// A chain of readings accepted one after another never increases.
        #[test]
        fn prop_accepted_readings_deplete(values in proptest::collection::vec(kwh(), 1..40)) {
            let mut accepted: Vec<Kwh> = Vec::new();
            for v in values {
                let prior = accepted.last().copied();
                if !validate(v, prior, EventType::Reading).is_blocking() {
                    accepted.push(v);
                }
            }
            for pair in accepted.windows(2) {
                if let [earlier, later] = pair {
                    prop_assert!(later <= earlier);
                }
            }
        }
    }
}
