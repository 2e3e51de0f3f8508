//! Recalculation audit DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::common_dto::parse_kwh;
use crate::domain::{EventId, RecalculationAudit, TriggerType, UserId};
use crate::error::LedgerError;
use crate::service::CascadeRequest;

/// A recalculation audit as returned by the API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditDto {
    /// Audit id.
    pub audit_id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Event that caused the cascade.
    pub triggering_event_id: Uuid,
    /// `NEW_BACKDATE_TOPUP`, `EDIT_TOPUP` or `BACKDATE_TOPUP`.
    pub trigger_type: String,
    /// Applied offset.
    pub offset_kwh: String,
    /// Shifted events, oldest first.
    pub affected_event_ids: Vec<Uuid>,
    /// Commit time.
    pub applied_at: DateTime<Utc>,
    /// End of the undo window.
    pub undo_deadline: DateTime<Utc>,
    /// Undo time.
    pub undone_at: Option<DateTime<Utc>>,
    /// Whether the cascade can still be undone.
    pub undoable: bool,
}

impl From<&RecalculationAudit> for AuditDto {
    fn from(audit: &RecalculationAudit) -> Self {
        Self {
            audit_id: *audit.id.as_uuid(),
            user_id: *audit.user_id.as_uuid(),
            triggering_event_id: *audit.triggering_event_id.as_uuid(),
            trigger_type: audit.trigger_type.to_string(),
            offset_kwh: audit.offset_kwh.to_string(),
            affected_event_ids: audit
                .affected_event_ids
                .iter()
                .map(|id| *id.as_uuid())
                .collect(),
            applied_at: audit.applied_at,
            undo_deadline: audit.undo_deadline,
            undone_at: audit.undone_at,
            undoable: audit.is_undoable(Utc::now()),
        }
    }
}

/// Response body for `GET /users/{user_id}/recalculations`.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuditListResponse {
    /// Audits, newest first.
    pub data: Vec<AuditDto>,
}

/// Request body for `POST /users/{user_id}/recalculations`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ApplyCascadeRequest {
    /// Event that caused the cascade.
    pub triggering_event_id: Uuid,
    /// `NEW_BACKDATE_TOPUP`, `EDIT_TOPUP` or `BACKDATE_TOPUP`.
    pub trigger_type: String,
    /// Events to shift, oldest first.
    pub affected_event_ids: Vec<Uuid>,
    /// Offset to add.
    pub offset_kwh: String,
    /// Client key that makes a retried apply a no-op.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl ApplyCascadeRequest {
    /// Parses the request into a service command for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidRequest`] for an unknown trigger type
    /// or [`LedgerError::InvalidValue`] for a malformed offset.
    pub fn into_command(self, user_id: UserId) -> Result<CascadeRequest, LedgerError> {
        let trigger_type = self
            .trigger_type
            .parse::<TriggerType>()
            .map_err(|_| {
                LedgerError::InvalidRequest(format!("unknown trigger type: {}", self.trigger_type))
            })?;
        let offset_kwh = parse_kwh("offset_kwh", Some(&self.offset_kwh))?
            .ok_or_else(|| LedgerError::InvalidValue("offset_kwh is required".to_string()))?;
        Ok(CascadeRequest {
            user_id,
            triggering_event_id: EventId::from_uuid(self.triggering_event_id),
            trigger_type,
            affected_event_ids: self
                .affected_event_ids
                .into_iter()
                .map(EventId::from_uuid)
                .collect(),
            offset_kwh,
            idempotency_key: self.idempotency_key,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::Kwh;
    use chrono::Duration;

    #[test]
    fn audit_dto_reports_undoable_window() {
        let audit = RecalculationAudit::new(
            UserId::new(),
            EventId::new(),
            TriggerType::EditTopup,
            Kwh::from(10),
            vec![EventId::new()],
            Utc::now(),
            Duration::hours(24),
        );
        let dto = AuditDto::from(&audit);
        assert!(dto.undoable);
        assert_eq!(dto.trigger_type, "EDIT_TOPUP");
        assert_eq!(dto.affected_event_ids.len(), 1);
    }

    #[test]
    fn apply_request_rejects_unknown_trigger() {
        let req = ApplyCascadeRequest {
            triggering_event_id: Uuid::new_v4(),
            trigger_type: "SIDEWAYS".to_string(),
            affected_event_ids: vec![Uuid::new_v4()],
            offset_kwh: "5".to_string(),
            idempotency_key: None,
        };
        assert!(matches!(
            req.into_command(UserId::new()),
            Err(LedgerError::InvalidRequest(_))
        ));
    }
}
