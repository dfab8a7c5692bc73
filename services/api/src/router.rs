//! Axum Router Configuration
//!
//! Defines the complete HTTP routing for the service: the REST API, the
//! WebSocket endpoint and the OpenAPI documentation.

use crate::{
    handlers,
    models::{
        Checkpoint, CreateSessionPayload, ErrorResponse, QuestionResult, ResumeResponse,
        SaveCheckpointPayload, Session, SessionStatus, TaskResponse, UpdateSessionStatusPayload,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, patch, put},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_session,
        handlers::list_sessions,
        handlers::get_session,
        handlers::update_session_status,
        handlers::get_resume,
        handlers::save_checkpoint,
        handlers::list_question_results,
        handlers::list_tasks,
    ),
    components(
        schemas(
            Session, SessionStatus, Checkpoint, QuestionResult, CreateSessionPayload,
            UpdateSessionStatusPayload, SaveCheckpointPayload, ResumeResponse, TaskResponse,
            ErrorResponse
        )
    ),
    tags(
        (name = "Simulation Training API", description = "Session management and resume for streamed training simulations")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route("/sessions/{id}", get(handlers::get_session))
        .route(
            "/sessions/{id}/status",
            patch(handlers::update_session_status),
        )
        .route("/sessions/{id}/resume", get(handlers::get_resume))
        .route("/sessions/{id}/checkpoint", put(handlers::save_checkpoint))
        .route(
            "/sessions/{id}/questions",
            get(handlers::list_question_results),
        )
        .route("/tasks", get(handlers::list_tasks))
        .route("/ws", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
