//! API and Database Models
//!
//! This module defines the core data structures used for both database mapping
//! with `sqlx` and for generating OpenAPI documentation with `utoipa`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use simtrain_core::{
    checkpoint::ResumeCheckpoint, resume::ResumeResolution, sequence::TaskDefinition,
};
use sqlx::FromRow;
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(sqlx::Type, Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq)]
#[sqlx(type_name = "session_status", rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Ended => write!(f, "ended"),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
pub struct Session {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    #[schema(value_type = String, example = "active")]
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted resume point, one row per save.
#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
pub struct Checkpoint {
    pub id: i64,
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    pub phase_index: i64,
    pub saved_at: DateTime<Utc>,
}

impl From<Checkpoint> for ResumeCheckpoint {
    fn from(row: Checkpoint) -> Self {
        ResumeCheckpoint {
            phase_index: row.phase_index,
            saved_at: row.saved_at,
        }
    }
}

/// An answered in-simulation question, recorded when a session ends.
#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
pub struct QuestionResult {
    pub id: i64,
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    pub question_id: String,
    pub prompt: String,
    pub answer: Option<String>,
    pub correct: Option<bool>,
    pub answered_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateSessionPayload {
    #[schema(example = "Steel frame assembly")]
    pub title: String,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateSessionStatusPayload {
    #[schema(example = "ended")]
    pub status: SessionStatus,
}

#[derive(Deserialize, ToSchema)]
pub struct SaveCheckpointPayload {
    #[schema(example = 3)]
    pub phase_index: i64,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ResumeResponse {
    pub phase_index: usize,
    pub is_from_start: bool,
    /// Rounded completion percentage for display.
    pub display_progress: u8,
    pub task_name: String,
}

impl ResumeResponse {
    pub fn new(resolution: &ResumeResolution, task_name: impl Into<String>) -> Self {
        Self {
            phase_index: resolution.phase_index,
            is_from_start: resolution.is_from_start,
            display_progress: resolution.display_progress,
            task_name: task_name.into(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct TaskResponse {
    pub index: usize,
    pub task_id: String,
    pub name: String,
    pub phase: String,
    pub tool: String,
}

impl TaskResponse {
    pub fn new(index: usize, task: &TaskDefinition) -> Self {
        Self {
            index,
            task_id: task.task_id.clone(),
            name: task.name.clone(),
            phase: task.phase.clone(),
            tool: task.tool.to_string(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
