//! Recalculation handlers: list, inspect, apply and undo cascades.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::api::dto::{ApplyCascadeRequest, AuditDto, AuditListResponse};
use crate::app_state::AppState;
use crate::domain::{AuditId, UserId};
use crate::error::{ErrorResponse, LedgerError};

/// `GET /users/{user_id}/recalculations` — Cascade audit trail.
///
/// # Errors
///
/// Returns [`LedgerError`] on a store failure.
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}/recalculations",
    tag = "Recalculations",
    summary = "List recalculations",
    description = "Returns every cascade applied to the user's ledger, newest first.",
    params(("user_id" = Uuid, Path, description = "User UUID")),
    responses(
        (status = 200, description = "Audit list", body = AuditListResponse),
    )
)]
pub async fn list_recalculations(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, LedgerError> {
    let audits = state
        .ledger_service
        .list_audits(UserId::from_uuid(user_id))
        .await?;
    Ok(Json(AuditListResponse {
        data: audits.iter().map(AuditDto::from).collect(),
    }))
}

/// `GET /users/{user_id}/recalculations/{audit_id}` — Single audit.
///
/// # Errors
///
/// Returns [`LedgerError::AuditNotFound`] if the audit does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}/recalculations/{audit_id}",
    tag = "Recalculations",
    summary = "Get a recalculation",
    params(
        ("user_id" = Uuid, Path, description = "User UUID"),
        ("audit_id" = Uuid, Path, description = "Audit UUID"),
    ),
    responses(
        (status = 200, description = "Audit", body = AuditDto),
        (status = 404, description = "Audit not found", body = ErrorResponse),
    )
)]
pub async fn get_recalculation(
    State(state): State<AppState>,
    Path((user_id, audit_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, LedgerError> {
    let audit = state
        .ledger_service
        .get_audit(UserId::from_uuid(user_id), AuditId::from_uuid(audit_id))
        .await?;
    Ok(Json(AuditDto::from(&audit)))
}

/// `POST /users/{user_id}/recalculations` — Apply an explicit cascade.
///
/// # Errors
///
/// Returns [`LedgerError`] for a reused idempotency key, an empty event
/// list, or an event that is no longer active.
#[utoipa::path(
    post,
    path = "/api/v1/users/{user_id}/recalculations",
    tag = "Recalculations",
    summary = "Apply a cascade",
    description = "Shifts the listed events by the offset and records an audit. Resending the same `idempotency_key` is rejected without writing.",
    params(("user_id" = Uuid, Path, description = "User UUID")),
    request_body = ApplyCascadeRequest,
    responses(
        (status = 201, description = "Cascade applied", body = AuditDto),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 409, description = "Idempotency key already used", body = ErrorResponse),
    )
)]
pub async fn apply_recalculation(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<ApplyCascadeRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let command = req.into_command(UserId::from_uuid(user_id))?;
    let audit = state.ledger_service.apply_cascade(command).await?;
    Ok((StatusCode::CREATED, Json(AuditDto::from(&audit))))
}

/// `POST /users/{user_id}/recalculations/{audit_id}/undo` — Undo a cascade.
///
/// # Errors
///
/// Returns [`LedgerError`] when the audit is missing, already undone,
/// past its deadline, or its events changed since.
#[utoipa::path(
    post,
    path = "/api/v1/users/{user_id}/recalculations/{audit_id}/undo",
    tag = "Recalculations",
    summary = "Undo a cascade",
    description = "Reverses the offset on every affected event while the undo window is open.",
    params(
        ("user_id" = Uuid, Path, description = "User UUID"),
        ("audit_id" = Uuid, Path, description = "Audit UUID"),
    ),
    responses(
        (status = 200, description = "Cascade undone", body = AuditDto),
        (status = 404, description = "Audit not found", body = ErrorResponse),
        (status = 409, description = "Affected events changed", body = ErrorResponse),
        (status = 422, description = "Window closed or already undone", body = ErrorResponse),
    )
)]
pub async fn undo_recalculation(
    State(state): State<AppState>,
    Path((user_id, audit_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, LedgerError> {
    let audit = state
        .ledger_service
        .undo_cascade(UserId::from_uuid(user_id), AuditId::from_uuid(audit_id))
        .await?;
    Ok(Json(AuditDto::from(&audit)))
}

/// Recalculation routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/users/{user_id}/recalculations",
            get(list_recalculations).post(apply_recalculation),
        )
        .route(
            "/users/{user_id}/recalculations/{audit_id}",
            get(get_recalculation),
        )
        .route(
            "/users/{user_id}/recalculations/{audit_id}/undo",
            post(undo_recalculation),
        )
}
