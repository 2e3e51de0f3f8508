//! Event handlers: submit, validate, preview, history, edit, void.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::api::dto::{
    AuditDto, BalanceResponse, ConflictDto, DuplicateCheckResponse, DuplicateParams,
    EditEventRequest, EventDto, EventListResponse, HistoryParams, ImpactDto, PaginationParams,
    PreviewRequest, SubmitEventRequest, SubmitResponse, ValidateEventRequest, ValidationDto,
    parse_kwh,
};
use crate::app_state::AppState;
use crate::domain::{EventId, EventType, UserId};
use crate::error::{ErrorResponse, LedgerError};
use crate::service::SubmitOutcome;

/// Reason stored when a client deletes an event without giving one.
const DEFAULT_VOID_REASON: &str = "deleted";

/// `POST /users/{user_id}/events` — Submit a reading or top-up.
///
/// # Errors
///
/// Returns [`LedgerError`] when validation blocks the event or a cascade
/// cannot be applied.
#[utoipa::path(
    post,
    path = "/api/v1/users/{user_id}/events",
    tag = "Events",
    summary = "Submit an event",
    description = "Validates and records a reading or top-up. A top-up dated before existing events returns `needs_confirmation` with a preview until it is resubmitted with `confirm_cascade`; a date already in use returns `duplicate_date` until a `resolution` is given.",
    params(("user_id" = Uuid, Path, description = "User UUID")),
    request_body = SubmitEventRequest,
    responses(
        (status = 201, description = "Event recorded", body = SubmitResponse),
        (status = 200, description = "Cascade awaiting confirmation", body = SubmitResponse),
        (status = 409, description = "Another event exists at this date", body = SubmitResponse),
        (status = 400, description = "Malformed request or value", body = ErrorResponse),
        (status = 422, description = "Reading increased or cascade blocked", body = ErrorResponse),
    )
)]
pub async fn submit_event(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<SubmitEventRequest>,
) -> Result<Response, LedgerError> {
    let command = req.into_command()?;
    let outcome = state
        .ledger_service
        .submit(UserId::from_uuid(user_id), command)
        .await?;
    outcome_response(outcome, StatusCode::CREATED)
}

/// `POST /users/{user_id}/events/validate` — Live validation of raw input.
///
/// # Errors
///
/// Returns [`LedgerError`] on an unknown event type or a store failure.
#[utoipa::path(
    post,
    path = "/api/v1/users/{user_id}/events/validate",
    tag = "Events",
    summary = "Validate a candidate value",
    description = "Classifies a raw value against the events around the given date without writing anything.",
    params(("user_id" = Uuid, Path, description = "User UUID")),
    request_body = ValidateEventRequest,
    responses(
        (status = 200, description = "Validation result", body = ValidationDto),
        (status = 400, description = "Unknown event type", body = ErrorResponse),
    )
)]
pub async fn validate_event(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<ValidateEventRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let event_type = req.event_type.parse::<EventType>()?;
    let result = state
        .ledger_service
        .validate_candidate(
            UserId::from_uuid(user_id),
            event_type,
            req.event_date,
            &req.value,
        )
        .await?;
    Ok(Json(ValidationDto::from(&result)))
}

/// `POST /users/{user_id}/events/preview` — Preview a backdate cascade.
///
/// # Errors
///
/// Returns [`LedgerError`] on a malformed offset or a store failure.
#[utoipa::path(
    post,
    path = "/api/v1/users/{user_id}/events/preview",
    tag = "Events",
    summary = "Preview a backdated top-up",
    description = "Shows how every event after the date would shift and whether the shift is blocked.",
    params(("user_id" = Uuid, Path, description = "User UUID")),
    request_body = PreviewRequest,
    responses(
        (status = 200, description = "Impact preview", body = ImpactDto),
        (status = 400, description = "Malformed offset", body = ErrorResponse),
    )
)]
pub async fn preview_backdate(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<PreviewRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let offset = parse_kwh("offset_kwh", Some(&req.offset_kwh))?
        .ok_or_else(|| LedgerError::InvalidValue("offset_kwh is required".to_string()))?;
    let report = state
        .ledger_service
        .analyze_backdate(UserId::from_uuid(user_id), req.event_date, offset)
        .await?;
    Ok(Json(ImpactDto::from(&report)))
}

/// `GET /users/{user_id}/events` — Event history.
///
/// # Errors
///
/// Returns [`LedgerError`] on a store failure.
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}/events",
    tag = "Events",
    summary = "List events",
    description = "Returns the user's events ordered by date, optionally including voided ones.",
    params(("user_id" = Uuid, Path, description = "User UUID"), HistoryParams, PaginationParams),
    responses(
        (status = 200, description = "Paginated history", body = EventListResponse),
    )
)]
pub async fn list_events(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(history): Query<HistoryParams>,
    Query(page): Query<PaginationParams>,
) -> Result<impl IntoResponse, LedgerError> {
    let events = state
        .ledger_service
        .history(UserId::from_uuid(user_id), history.include_voided)
        .await?;
    let (events, pagination) = page.paginate(events);
    Ok(Json(EventListResponse {
        data: events.iter().map(EventDto::from).collect(),
        pagination,
    }))
}

/// `GET /users/{user_id}/events/{event_id}` — Single event.
///
/// # Errors
///
/// Returns [`LedgerError::EventNotFound`] if the event does not exist.
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}/events/{event_id}",
    tag = "Events",
    summary = "Get an event",
    params(
        ("user_id" = Uuid, Path, description = "User UUID"),
        ("event_id" = Uuid, Path, description = "Event UUID"),
    ),
    responses(
        (status = 200, description = "Event", body = EventDto),
        (status = 404, description = "Event not found", body = ErrorResponse),
    )
)]
pub async fn get_event(
    State(state): State<AppState>,
    Path((user_id, event_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, LedgerError> {
    let event = state
        .ledger_service
        .get_event(UserId::from_uuid(user_id), EventId::from_uuid(event_id))
        .await?;
    Ok(Json(EventDto::from(&event)))
}

/// `PUT /users/{user_id}/events/{event_id}` — Edit an event.
///
/// # Errors
///
/// Returns [`LedgerError`] when the event is missing or voided, the edit is
/// invalid, or its cascade is blocked.
#[utoipa::path(
    put,
    path = "/api/v1/users/{user_id}/events/{event_id}",
    tag = "Events",
    summary = "Edit an event",
    description = "Voids the event and records a replacement. Top-up amount or date changes cascade to later events and need `confirm_cascade`.",
    params(
        ("user_id" = Uuid, Path, description = "User UUID"),
        ("event_id" = Uuid, Path, description = "Event UUID"),
    ),
    request_body = EditEventRequest,
    responses(
        (status = 200, description = "Replacement recorded or cascade awaiting confirmation", body = SubmitResponse),
        (status = 404, description = "Event not found", body = ErrorResponse),
        (status = 409, description = "Event voided or target date in use", body = ErrorResponse),
        (status = 422, description = "Edit blocked", body = ErrorResponse),
    )
)]
pub async fn edit_event(
    State(state): State<AppState>,
    Path((user_id, event_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<EditEventRequest>,
) -> Result<Response, LedgerError> {
    let command = req.into_command()?;
    let outcome = state
        .ledger_service
        .edit(
            UserId::from_uuid(user_id),
            EventId::from_uuid(event_id),
            command,
        )
        .await?;
    outcome_response(outcome, StatusCode::OK)
}

/// `DELETE /users/{user_id}/events/{event_id}` — Void an event.
///
/// # Errors
///
/// Returns [`LedgerError`] if the event is missing or already voided.
#[utoipa::path(
    delete,
    path = "/api/v1/users/{user_id}/events/{event_id}",
    tag = "Events",
    summary = "Void an event",
    description = "Marks the event as voided. Later balances are not changed.",
    params(
        ("user_id" = Uuid, Path, description = "User UUID"),
        ("event_id" = Uuid, Path, description = "Event UUID"),
        crate::api::dto::VoidParams,
    ),
    responses(
        (status = 200, description = "Voided event", body = EventDto),
        (status = 404, description = "Event not found", body = ErrorResponse),
        (status = 409, description = "Event already voided", body = ErrorResponse),
    )
)]
pub async fn void_event(
    State(state): State<AppState>,
    Path((user_id, event_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<crate::api::dto::VoidParams>,
) -> Result<impl IntoResponse, LedgerError> {
    let reason = params
        .reason
        .unwrap_or_else(|| DEFAULT_VOID_REASON.to_string());
    let event = state
        .ledger_service
        .void(
            UserId::from_uuid(user_id),
            EventId::from_uuid(event_id),
            &reason,
        )
        .await?;
    Ok(Json(EventDto::from(&event)))
}

/// `GET /users/{user_id}/balance` — Current balance.
///
/// # Errors
///
/// Returns [`LedgerError`] on a store failure.
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}/balance",
    tag = "Events",
    summary = "Current balance",
    params(("user_id" = Uuid, Path, description = "User UUID")),
    responses(
        (status = 200, description = "Balance of the most recent event", body = BalanceResponse),
    )
)]
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, LedgerError> {
    let latest = state
        .ledger_service
        .current_balance(UserId::from_uuid(user_id))
        .await?;
    Ok(Json(BalanceResponse {
        user_id,
        balance_kwh: latest.as_ref().map(|e| e.balance_kwh.to_string()),
        event_id: latest.as_ref().map(|e| *e.id.as_uuid()),
        as_of: latest.as_ref().map(|e| e.event_date),
    }))
}

/// `GET /users/{user_id}/duplicates?date=` — Duplicate-date check.
///
/// # Errors
///
/// Returns [`LedgerError`] on a store failure.
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}/duplicates",
    tag = "Events",
    summary = "Check a date for an existing event",
    params(("user_id" = Uuid, Path, description = "User UUID"), DuplicateParams),
    responses(
        (status = 200, description = "Duplicate check", body = DuplicateCheckResponse),
    )
)]
pub async fn check_duplicate(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(params): Query<DuplicateParams>,
) -> Result<impl IntoResponse, LedgerError> {
    let existing = state
        .ledger_service
        .check_duplicate(UserId::from_uuid(user_id), params.date)
        .await?;
    Ok(Json(DuplicateCheckResponse {
        duplicate: existing.is_some(),
        existing: existing.as_ref().map(EventDto::from),
    }))
}

/// Event routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users/{user_id}/events", post(submit_event).get(list_events))
        .route("/users/{user_id}/events/validate", post(validate_event))
        .route("/users/{user_id}/events/preview", post(preview_backdate))
        .route(
            "/users/{user_id}/events/{event_id}",
            get(get_event).put(edit_event).delete(void_event),
        )
        .route("/users/{user_id}/balance", get(get_balance))
        .route("/users/{user_id}/duplicates", get(check_duplicate))
}

/// Maps a pipeline outcome to its HTTP response. Blocked validation
/// becomes the matching error.
fn outcome_response(outcome: SubmitOutcome, recorded: StatusCode) -> Result<Response, LedgerError> {
    let empty = SubmitResponse {
        outcome: String::new(),
        event: None,
        validation: None,
        recalculation: None,
        impact: None,
        conflict: None,
    };
    let (status, body) = match outcome {
        SubmitOutcome::Recorded {
            event,
            validation,
            audit,
        } => (
            recorded,
            SubmitResponse {
                outcome: "recorded".to_string(),
                event: Some(EventDto::from(&event)),
                validation: Some(ValidationDto::from(&validation)),
                recalculation: audit.as_ref().map(AuditDto::from),
                ..empty
            },
        ),
        SubmitOutcome::NeedsConfirmation(report) => (
            StatusCode::OK,
            SubmitResponse {
                outcome: "needs_confirmation".to_string(),
                impact: Some(ImpactDto::from(&report)),
                ..empty
            },
        ),
        SubmitOutcome::DuplicateDate(conflict) => (
            StatusCode::CONFLICT,
            SubmitResponse {
                outcome: "duplicate_date".to_string(),
                conflict: Some(ConflictDto::from(&conflict)),
                ..empty
            },
        ),
        SubmitOutcome::Rejected(result) => {
            return Err(result.to_error().unwrap_or_else(|| {
                LedgerError::Internal("rejected outcome without a blocking result".to_string())
            }));
        }
    };
    Ok((status, Json(body)).into_response())
}
