//! Axum Handlers for the REST API
//!
//! Session management, resume lookups and the task catalogue. Every handler is
//! annotated with `utoipa` so the OpenAPI document stays in sync.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use simtrain_core::{checkpoint::ResumeCheckpoint, resume};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    models::{
        Checkpoint, CreateSessionPayload, ErrorResponse, QuestionResult, ResumeResponse,
        SaveCheckpointPayload, Session, TaskResponse, UpdateSessionStatusPayload,
    },
    state::AppState,
};

const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn user_id(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{USER_ID_HEADER} header is required")))
}

/// Loads a session owned by the caller or fails with `NotFound`.
async fn owned_session(state: &AppState, id: Uuid, user_id: &str) -> Result<Session, ApiError> {
    state
        .db
        .get_session(id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{}' not found", id)))
}

/// Create a new training session.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionPayload,
    responses(
        (status = 201, description = "Session created successfully", body = Session),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user creating the session")
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id(&headers)?;
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }

    let session = state.db.create_session(user_id, title).await?;
    info!(session_id = %session.id, %user_id, "Training session created");
    Ok((StatusCode::CREATED, Json(session)))
}

/// List all sessions for a user.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "List of sessions", body = [Session]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Session>>, ApiError> {
    let sessions = state.db.list_sessions(user_id(&headers)?).await?;
    Ok(Json(sessions))
}

/// Get a specific session by its ID.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = Session),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = owned_session(&state, id, user_id(&headers)?).await?;
    Ok((StatusCode::OK, Json(session)))
}

/// Update the status of a session.
#[utoipa::path(
    patch,
    path = "/sessions/{id}/status",
    request_body = UpdateSessionStatusPayload,
    responses(
        (status = 200, description = "Session status updated successfully", body = Session),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn update_session_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateSessionStatusPayload>,
) -> Result<impl IntoResponse, ApiError> {
    owned_session(&state, id, user_id(&headers)?).await?;
    let updated_session = state.db.update_session_status(id, payload.status).await?;
    Ok((StatusCode::OK, Json(updated_session)))
}

/// Resolve where a session would resume from its latest checkpoint.
#[utoipa::path(
    get,
    path = "/sessions/{id}/resume",
    responses(
        (status = 200, description = "Resolved resume point", body = ResumeResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_resume(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ResumeResponse>, ApiError> {
    owned_session(&state, id, user_id(&headers)?).await?;
    let checkpoint = state.db.get_latest_checkpoint(id).await?.map(ResumeCheckpoint::from);
    let resolution = resume::resolve(checkpoint.as_ref(), &state.sequence);
    let task_name = state
        .sequence
        .get(resolution.phase_index)
        .map(|task| task.name.clone())
        .unwrap_or_default();
    Ok(Json(ResumeResponse::new(&resolution, task_name)))
}

/// Store a resume point for a session.
///
/// The index is stored as given; clamping happens when it is resolved.
#[utoipa::path(
    put,
    path = "/sessions/{id}/checkpoint",
    request_body = SaveCheckpointPayload,
    responses(
        (status = 200, description = "Checkpoint saved", body = Checkpoint),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn save_checkpoint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<SaveCheckpointPayload>,
) -> Result<Json<Checkpoint>, ApiError> {
    owned_session(&state, id, user_id(&headers)?).await?;
    let checkpoint = state.db.save_checkpoint(id, payload.phase_index).await?;
    Ok(Json(checkpoint))
}

/// List the question results recorded for a session.
#[utoipa::path(
    get,
    path = "/sessions/{id}/questions",
    responses(
        (status = 200, description = "Recorded question results", body = [QuestionResult]),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn list_question_results(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<QuestionResult>>, ApiError> {
    owned_session(&state, id, user_id(&headers)?).await?;
    Ok(Json(state.db.get_question_results(id).await?))
}

/// List the tasks every session runs through, in order.
#[utoipa::path(
    get,
    path = "/tasks",
    responses(
        (status = 200, description = "The task sequence", body = [TaskResponse])
    )
)]
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<TaskResponse>> {
    Json(
        state
            .sequence
            .tasks()
            .iter()
            .enumerate()
            .map(|(index, task)| TaskResponse::new(index, task))
            .collect(),
    )
}
