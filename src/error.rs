//! Ledger error types with HTTP status code mapping.
//!
//! [`LedgerError`] is the central error type. Each variant maps to a
//! numeric code and an HTTP status. Expected outcomes of normal use (a
//! reading that went up, a duplicate date, a cascade awaiting confirmation)
//! are not errors; see [`crate::service::SubmitOutcome`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 4002,
///     "message": "cascade conflict between ... and ...",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional corrective hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                  |
/// |-----------|-----------------|------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request              |
/// | 2000–2999 | State/Not Found | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Server          | 500 Internal Server Error    |
/// | 4000–4999 | Business rule   | 422 Unprocessable Entity     |
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Malformed or negative input value.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Request is well-formed but not acceptable as a whole.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A reading is higher than the prior balance.
    #[error("reading {candidate} kWh is {delta} kWh above the prior balance of {prior} kWh")]
    MonotonicityViolation {
        /// Prior balance.
        prior: String,
        /// Submitted reading.
        candidate: String,
        /// Amount by which the reading exceeds the prior balance.
        delta: String,
    },

    /// Shifting the later events would make a reading rise above its
    /// predecessor.
    #[error("cascade conflict between events {earlier} and {later}")]
    CascadeConflict {
        /// Earlier event of the conflicting pair.
        earlier: uuid::Uuid,
        /// Later reading of the conflicting pair.
        later: uuid::Uuid,
    },

    /// Shifting the later events would make a balance negative.
    #[error("cascade would leave event {event_id} at {after} kWh")]
    CascadeNegative {
        /// Event that would go negative.
        event_id: uuid::Uuid,
        /// Its balance after the shift.
        after: String,
    },

    /// No active or voided event with the given id for this user.
    #[error("event not found: {0}")]
    EventNotFound(uuid::Uuid),

    /// No recalculation audit with the given id for this user.
    #[error("recalculation not found: {0}")]
    AuditNotFound(uuid::Uuid),

    /// The event has been voided and can no longer change.
    #[error("event {0} is voided")]
    EventVoided(uuid::Uuid),

    /// A cascade with the same idempotency key was already applied.
    #[error("request already applied as recalculation {audit_id}")]
    DuplicateRequest {
        /// The audit written by the first request.
        audit_id: uuid::Uuid,
    },

    /// Events shifted by the cascade have been edited or voided since.
    #[error("recalculation {0} can no longer be undone: affected events changed")]
    UndoConflict(uuid::Uuid),

    /// The undo window has closed.
    #[error("undo window closed at {deadline}")]
    UndoExpired {
        /// End of the undo window.
        deadline: DateTime<Utc>,
    },

    /// The cascade was already undone.
    #[error("recalculation already undone at {undone_at}")]
    AlreadyUndone {
        /// When it was undone.
        undone_at: DateTime<Utc>,
    },

    /// An atomic write could not complete. Nothing was written.
    #[error("transaction failed: {0}")]
    TransactionFailure(String),

    /// Persistence layer read failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidValue(_) => 1001,
            Self::InvalidRequest(_) => 1002,
            Self::EventNotFound(_) => 2001,
            Self::AuditNotFound(_) => 2002,
            Self::EventVoided(_) => 2003,
            Self::DuplicateRequest { .. } => 2004,
            Self::UndoConflict(_) => 2005,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::TransactionFailure(_) => 3002,
            Self::MonotonicityViolation { .. } => 4001,
            Self::CascadeConflict { .. } => 4002,
            Self::CascadeNegative { .. } => 4003,
            Self::UndoExpired { .. } => 4004,
            Self::AlreadyUndone { .. } => 4005,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidValue(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::EventNotFound(_) | Self::AuditNotFound(_) => StatusCode::NOT_FOUND,
            Self::EventVoided(_) | Self::DuplicateRequest { .. } | Self::UndoConflict(_) => {
                StatusCode::CONFLICT
            }
            Self::MonotonicityViolation { .. }
            | Self::CascadeConflict { .. }
            | Self::CascadeNegative { .. }
            | Self::UndoExpired { .. }
            | Self::AlreadyUndone { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::TransactionFailure(_) | Self::PersistenceError(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Corrective hint shown next to the message.
    #[must_use]
    pub const fn details(&self) -> Option<&'static str> {
        match self {
            Self::MonotonicityViolation { .. } => Some("re-enter this event as a top-up"),
            Self::CascadeConflict { .. } | Self::CascadeNegative { .. } => {
                Some("choose a different date or amount")
            }
            Self::TransactionFailure(_) => Some("nothing was saved; the request may be retried"),
            _ => None,
        }
    }

    /// Returns `true` for failures that may clear up on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::TransactionFailure(_))
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: self.details().map(str::to_string),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
