//! REST API layer: route handlers, DTOs, and router composition.
//!
//! All ledger endpoints are mounted under `/api/v1`. With the `swagger-ui`
//! feature the OpenAPI document is served at `/api-docs/openapi.json` and
//! browsable at `/swagger-ui`.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "kwh-ledger",
        description = "Prepaid electricity meter ledger with backdated top-up recalculation"
    ),
    paths(
        handlers::system::health_handler,
        handlers::events::submit_event,
        handlers::events::validate_event,
        handlers::events::preview_backdate,
        handlers::events::list_events,
        handlers::events::get_event,
        handlers::events::edit_event,
        handlers::events::void_event,
        handlers::events::get_balance,
        handlers::events::check_duplicate,
        handlers::recalculations::list_recalculations,
        handlers::recalculations::get_recalculation,
        handlers::recalculations::apply_recalculation,
        handlers::recalculations::undo_recalculation,
    ),
    components(schemas(
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
        crate::domain::ConflictResolution,
        dto::SubmitEventRequest,
        dto::EditEventRequest,
        dto::ValidateEventRequest,
        dto::PreviewRequest,
        dto::ApplyCascadeRequest,
        dto::SubmitResponse,
        dto::EventDto,
        dto::EventListResponse,
        dto::ValidationDto,
        dto::ImpactDto,
        dto::ImpactIssueDto,
        dto::AffectedEventDto,
        dto::ConflictDto,
        dto::BalanceResponse,
        dto::DuplicateCheckResponse,
        dto::AuditDto,
        dto::AuditListResponse,
        dto::PaginationMeta,
        handlers::system::HealthResponse,
    )),
    tags(
        (name = "Events", description = "Readings, top-ups and their validation"),
        (name = "Recalculations", description = "Cascade audit trail and undo"),
        (name = "System", description = "Service health"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}
