//! Event DTOs for submit, edit, validation and preview endpoints.
//!
//! Energy amounts travel as decimal strings (`"12.5"`) so no precision is
//! lost between client and ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::audit_dto::AuditDto;
use super::common_dto::{PaginationMeta, parse_decimal, parse_kwh};
use crate::domain::{
    AffectedPreview, ConflictResolution, DuplicateConflict, EventType, ImpactIssue, ImpactReport,
    MeterEvent, ValidationResult,
};
use crate::error::LedgerError;
use crate::service::{EditEvent, NewEvent};

/// Request body for `POST /users/{user_id}/events`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitEventRequest {
    /// `"reading"` or `"topup"`.
    pub event_type: String,
    /// Date the event is attributed to.
    pub event_date: DateTime<Utc>,
    /// Meter display value (readings).
    #[serde(default)]
    pub balance_kwh: Option<String>,
    /// Purchased energy (top-ups).
    #[serde(default)]
    pub purchase_kwh: Option<String>,
    /// Money paid.
    #[serde(default)]
    pub token_cost: Option<String>,
    /// Free text.
    #[serde(default)]
    pub notes: Option<String>,
    /// `"edit_existing"` or `"replace"` after a duplicate-date response.
    #[serde(default)]
    pub resolution: Option<ConflictResolution>,
    /// Set after reviewing a `needs_confirmation` response.
    #[serde(default)]
    pub confirm_cascade: bool,
    /// Client key that makes a retried cascade a no-op.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl SubmitEventRequest {
    /// Parses the request into a service command.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidRequest`] for an unknown event type or
    /// [`LedgerError::InvalidValue`] for malformed amounts.
    pub fn into_command(self) -> Result<NewEvent, LedgerError> {
        Ok(NewEvent {
            event_type: self.event_type.parse::<EventType>()?,
            event_date: self.event_date,
            balance_kwh: parse_kwh("balance_kwh", self.balance_kwh.as_deref())?,
            purchase_kwh: parse_kwh("purchase_kwh", self.purchase_kwh.as_deref())?,
            token_cost: parse_decimal("token_cost", self.token_cost.as_deref())?,
            notes: self.notes,
            resolution: self.resolution,
            confirm_cascade: self.confirm_cascade,
            idempotency_key: self.idempotency_key,
        })
    }
}

/// Request body for `PUT /users/{user_id}/events/{event_id}`. Omitted
/// fields keep their current value.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct EditEventRequest {
    /// New date.
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
    /// New reading value.
    #[serde(default)]
    pub balance_kwh: Option<String>,
    /// New purchase amount.
    #[serde(default)]
    pub purchase_kwh: Option<String>,
    /// New token cost.
    #[serde(default)]
    pub token_cost: Option<String>,
    /// New notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Set after reviewing a `needs_confirmation` response.
    #[serde(default)]
    pub confirm_cascade: bool,
    /// Client key that makes a retried cascade a no-op.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl EditEventRequest {
    /// Parses the request into a service command.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidValue`] for malformed amounts.
    pub fn into_command(self) -> Result<EditEvent, LedgerError> {
        Ok(EditEvent {
            event_date: self.event_date,
            balance_kwh: parse_kwh("balance_kwh", self.balance_kwh.as_deref())?,
            purchase_kwh: parse_kwh("purchase_kwh", self.purchase_kwh.as_deref())?,
            token_cost: parse_decimal("token_cost", self.token_cost.as_deref())?,
            notes: self.notes,
            confirm_cascade: self.confirm_cascade,
            idempotency_key: self.idempotency_key,
        })
    }
}

/// Request body for `POST /users/{user_id}/events/validate`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateEventRequest {
    /// `"reading"` or `"topup"`.
    pub event_type: String,
    /// Date the event would be attributed to.
    pub event_date: DateTime<Utc>,
    /// Raw input: the balance for readings, the purchase for top-ups.
    pub value: String,
}

/// Request body for `POST /users/{user_id}/events/preview`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PreviewRequest {
    /// Date of the backdated top-up.
    pub event_date: DateTime<Utc>,
    /// Offset the cascade would apply.
    pub offset_kwh: String,
}

/// Query parameters for `GET /users/{user_id}/events`.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryParams {
    /// Include voided events. Defaults to `false`.
    #[serde(default)]
    pub include_voided: bool,
}

/// Query parameters for `DELETE /users/{user_id}/events/{event_id}`.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VoidParams {
    /// Reason stored on the voided event. Defaults to `"deleted"`.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Query parameters for `GET /users/{user_id}/duplicates`.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DuplicateParams {
    /// Date to check.
    pub date: DateTime<Utc>,
}

/// A meter event as returned by the API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EventDto {
    /// Event id.
    pub event_id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// `"reading"` or `"topup"`.
    pub event_type: String,
    /// Attributed date.
    pub event_date: DateTime<Utc>,
    /// Balance in kWh.
    pub balance_kwh: String,
    /// Purchased kWh (top-ups).
    pub purchase_kwh: Option<String>,
    /// Money paid.
    pub token_cost: Option<String>,
    /// Cost per kWh, when both amounts are known.
    pub unit_price: Option<String>,
    /// Free text.
    pub notes: Option<String>,
    /// `"active"` or `"voided"`.
    pub status: String,
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

impl From<&MeterEvent> for EventDto {
    fn from(event: &MeterEvent) -> Self {
        Self {
            event_id: *event.id.as_uuid(),
            user_id: *event.user_id.as_uuid(),
            event_type: event.event_type.to_string(),
            event_date: event.event_date,
            balance_kwh: event.balance_kwh.to_string(),
            purchase_kwh: event.purchase_kwh.map(|p| p.to_string()),
            token_cost: event.token_cost.map(|c| c.to_string()),
            unit_price: event.unit_price().map(|p| p.round_dp(4).to_string()),
            notes: event.notes.clone(),
            status: if event.is_active() { "active" } else { "voided" }.to_string(),
            voided_reason: event.voided_reason.clone(),
            voided_at: event.voided_at,
            supersedes: event.supersedes.map(|id| *id.as_uuid()),
            superseded_by: event.superseded_by.map(|id| *id.as_uuid()),
            created_at: event.created_at,
        }
    }
}

/// Paginated event history.
#[derive(Debug, Serialize, ToSchema)]
pub struct EventListResponse {
    /// Events ordered by date.
    pub data: Vec<EventDto>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Outcome of validating a candidate value.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ValidationDto {
    /// `"valid"`, `"invalid_value"`, `"reading_increased"` or
    /// `"exceeds_successor"`.
    pub status: String,
    /// Whether the value may not be stored.
    pub blocking: bool,
    /// Energy used since the prior reading.
    pub consumption_kwh: Option<String>,
    /// Amount above the prior balance.
    pub delta_kwh: Option<String>,
    /// Prior balance the value was compared with.
    pub prior_kwh: Option<String>,
    /// Later reading that would show an increase.
    pub successor_id: Option<Uuid>,
    /// Why the value is invalid.
    pub reason: Option<String>,
    /// Corrective action for the user.
    pub suggestion: Option<String>,
}

impl From<&ValidationResult> for ValidationDto {
    fn from(result: &ValidationResult) -> Self {
        let mut dto = Self {
            status: String::new(),
            blocking: result.is_blocking(),
            consumption_kwh: None,
            delta_kwh: None,
            prior_kwh: None,
            successor_id: None,
            reason: None,
            suggestion: result.suggestion().map(str::to_string),
        };
        match result {
            ValidationResult::Valid { consumption } => {
                dto.status = "valid".to_string();
                dto.consumption_kwh = consumption.map(|c| c.to_string());
            }
            ValidationResult::InvalidValue { reason } => {
                dto.status = "invalid_value".to_string();
                dto.reason = Some(reason.clone());
            }
            ValidationResult::ReadingIncreased { delta, prior } => {
                dto.status = "reading_increased".to_string();
                dto.delta_kwh = Some(delta.to_string());
                dto.prior_kwh = Some(prior.to_string());
            }
            ValidationResult::ExceedsSuccessor {
                successor_id,
                successor_balance,
            } => {
                dto.status = "exceeds_successor".to_string();
                dto.successor_id = Some(*successor_id.as_uuid());
                dto.reason = Some(format!(
                    "a later reading shows {successor_balance} kWh"
                ));
            }
        }
        dto
    }
}

/// One problem found by the impact analysis.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ImpactIssueDto {
    /// `"ordering_violation"`, `"negative_balance"` or `"large_offset"`.
    pub kind: String,
    /// `"block"` or `"warn"`.
    pub severity: String,
    /// Events involved, oldest first.
    pub event_ids: Vec<Uuid>,
    /// Human-readable description.
    pub message: String,
}

impl From<&ImpactIssue> for ImpactIssueDto {
    fn from(issue: &ImpactIssue) -> Self {
        let severity = match issue.severity() {
            crate::domain::Severity::Block => "block",
            crate::domain::Severity::Warn => "warn",
        }
        .to_string();
        match issue {
            ImpactIssue::OrderingViolation {
                earlier,
                earlier_after,
                later,
                later_after,
            } => Self {
                kind: "ordering_violation".to_string(),
                severity,
                event_ids: vec![*earlier.as_uuid(), *later.as_uuid()],
                message: format!(
                    "reading would rise from {earlier_after} kWh to {later_after} kWh"
                ),
            },
            ImpactIssue::NegativeBalance { event_id, after } => Self {
                kind: "negative_balance".to_string(),
                severity,
                event_ids: vec![*event_id.as_uuid()],
                message: format!("balance would drop to {after} kWh"),
            },
            ImpactIssue::LargeOffset { offset, threshold } => Self {
                kind: "large_offset".to_string(),
                severity,
                event_ids: Vec::new(),
                message: format!("offset of {offset} kWh exceeds {threshold} kWh"),
            },
        }
    }
}

/// Before/after balance of one shifted event.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AffectedEventDto {
    /// Event id.
    pub event_id: Uuid,
    /// `"reading"` or `"topup"`.
    pub event_type: String,
    /// Event date.
    pub event_date: DateTime<Utc>,
    /// Current balance.
    pub before_kwh: String,
    /// Balance after the shift.
    pub after_kwh: String,
}

impl From<&AffectedPreview> for AffectedEventDto {
    fn from(p: &AffectedPreview) -> Self {
        Self {
            event_id: *p.event_id.as_uuid(),
            event_type: p.event_type.to_string(),
            event_date: p.event_date,
            before_kwh: p.before.to_string(),
            after_kwh: p.after.to_string(),
        }
    }
}

/// Preview of a cascade.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ImpactDto {
    /// Offset the cascade would apply.
    pub offset_kwh: String,
    /// Whether any issue blocks the cascade.
    pub blocked: bool,
    /// Problems found.
    pub issues: Vec<ImpactIssueDto>,
    /// Events that would shift, oldest first.
    pub affected: Vec<AffectedEventDto>,
}

impl From<&ImpactReport> for ImpactDto {
    fn from(report: &ImpactReport) -> Self {
        Self {
            offset_kwh: report.offset_kwh.to_string(),
            blocked: report.is_blocked(),
            issues: report.issues.iter().map(ImpactIssueDto::from).collect(),
            affected: report.preview.iter().map(AffectedEventDto::from).collect(),
        }
    }
}

/// An existing event colliding with a submission.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConflictDto {
    /// The event already recorded at that date.
    pub existing: EventDto,
    /// Accepted values for `resolution`.
    pub options: Vec<String>,
}

impl From<&DuplicateConflict> for ConflictDto {
    fn from(conflict: &DuplicateConflict) -> Self {
        Self {
            existing: EventDto::from(&conflict.existing),
            options: conflict
                .options
                .iter()
                .map(|o| match o {
                    ConflictResolution::EditExisting => "edit_existing".to_string(),
                    ConflictResolution::Replace => "replace".to_string(),
                })
                .collect(),
        }
    }
}

/// Response body for submit and edit.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitResponse {
    /// `"recorded"`, `"needs_confirmation"` or `"duplicate_date"`.
    pub outcome: String,
    /// Stored event (`recorded`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<EventDto>,
    /// Validation result (`recorded`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationDto>,
    /// Applied cascade (`recorded` with a cascade).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recalculation: Option<AuditDto>,
    /// Cascade preview (`needs_confirmation`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<ImpactDto>,
    /// Colliding event (`duplicate_date`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictDto>,
}

/// Response body for `GET /users/{user_id}/balance`.
#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceResponse {
    /// User id.
    pub user_id: Uuid,
    /// Current balance, absent for a user with no events.
    pub balance_kwh: Option<String>,
    /// Event that carries the balance.
    pub event_id: Option<Uuid>,
    /// Date of that event.
    pub as_of: Option<DateTime<Utc>>,
}

/// Response body for `GET /users/{user_id}/duplicates`.
#[derive(Debug, Serialize, ToSchema)]
pub struct DuplicateCheckResponse {
    /// Whether an active event exists at the date.
    pub duplicate: bool,
    /// The existing event.
    pub existing: Option<EventDto>,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{Kwh, UserId};

    fn submit_json(body: serde_json::Value) -> SubmitEventRequest {
        let Ok(req) = serde_json::from_value(body) else {
            panic!("request did not deserialize");
        };
        req
    }

    #[test]
    fn submit_request_parses_amounts() {
        let req = submit_json(serde_json::json!({
            "event_type": "topup",
            "event_date": "2024-05-01T09:00:00Z",
            "purchase_kwh": "40.5",
            "token_cost": "81.00",
            "confirm_cascade": true,
        }));
        let Ok(cmd) = req.into_command() else {
            panic!("valid request rejected");
        };
        assert_eq!(cmd.event_type, EventType::Topup);
        assert_eq!(cmd.purchase_kwh, Some(Kwh::from_parts(405, 1)));
        assert!(cmd.balance_kwh.is_none());
        assert!(cmd.confirm_cascade);
    }

    #[test]
    fn submit_request_rejects_unknown_type_and_bad_amount() {
        let unknown = submit_json(serde_json::json!({
            "event_type": "refund",
            "event_date": "2024-05-01T09:00:00Z",
        }));
        assert!(matches!(
            unknown.into_command(),
            Err(LedgerError::InvalidRequest(_))
        ));

        let bad = submit_json(serde_json::json!({
            "event_type": "reading",
            "event_date": "2024-05-01T09:00:00Z",
            "balance_kwh": "NaN",
        }));
        assert!(matches!(bad.into_command(), Err(LedgerError::InvalidValue(_))));
    }

    #[test]
    fn resolution_uses_snake_case() {
        let req = submit_json(serde_json::json!({
            "event_type": "reading",
            "event_date": "2024-05-01T09:00:00Z",
            "balance_kwh": "10",
            "resolution": "edit_existing",
        }));
        assert_eq!(req.resolution, Some(ConflictResolution::EditExisting));
    }

    #[test]
    fn event_dto_formats_amounts_as_strings() {
        let Ok(event) = MeterEvent::topup(
            UserId::new(),
            Utc::now(),
            Kwh::from(10),
            Kwh::from_parts(405, 1),
        ) else {
            panic!("small top-up fits");
        };
        let dto = EventDto::from(&event);
        assert_eq!(dto.balance_kwh, "50.5");
        assert_eq!(dto.purchase_kwh.as_deref(), Some("40.5"));
        assert_eq!(dto.status, "active");
    }

    #[test]
    fn validation_dto_carries_suggestion() {
        let dto = ValidationDto::from(&ValidationResult::ReadingIncreased {
            delta: Kwh::from(10),
            prior: Kwh::from(50),
        });
        assert_eq!(dto.status, "reading_increased");
        assert!(dto.blocking);
        assert_eq!(dto.delta_kwh.as_deref(), Some("10"));
        assert_eq!(
            dto.suggestion.as_deref(),
            Some("re-enter this event as a top-up")
        );
    }
}
