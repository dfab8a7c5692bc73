//! Data Access Layer
//!
//! This module contains all the functions for interacting with the PostgreSQL database.
//! Queries are checked at runtime (`query_as` + `FromRow`) so the crate builds without a
//! live database; migrations are embedded at compile time.

use anyhow::Result;
use async_trait::async_trait;
use simtrain_core::{
    checkpoint::{CheckpointStore, ResumeCheckpoint},
    controllers::question::QuestionRecord,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Checkpoint, QuestionResult, Session, SessionStatus};

const SESSION_COLUMNS: &str = "id, user_id, title, status, created_at, updated_at";

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Creates a new training session for a user.
    pub async fn create_session(&self, user_id: &str, title: &str) -> Result<Session> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "INSERT INTO sessions (user_id, title) VALUES ($1, $2) RETURNING {SESSION_COLUMNS}"
        ))
        .bind(user_id)
        .bind(title)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    /// Retrieves a single session by its ID, scoped to a specific user.
    pub async fn get_session(&self, session_id: Uuid, user_id: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1 AND user_id = $2"
        ))
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    /// Retrieves a single session by its ID regardless of owner.
    pub async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    /// Lists all sessions for a given user, ordered by most recent.
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    /// Updates the status of a session (e.g., from 'active' to 'ended').
    pub async fn update_session_status(
        &self,
        session_id: Uuid,
        status: SessionStatus,
    ) -> Result<Session> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "UPDATE sessions SET status = $1, updated_at = now() WHERE id = $2 RETURNING {SESSION_COLUMNS}"
        ))
        .bind(status)
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    /// Records a new resume point for a session.
    pub async fn save_checkpoint(&self, session_id: Uuid, phase_index: i64) -> Result<Checkpoint> {
        let checkpoint = sqlx::query_as::<_, Checkpoint>(
            "INSERT INTO checkpoints (session_id, phase_index) VALUES ($1, $2) \
             RETURNING id, session_id, phase_index, saved_at",
        )
        .bind(session_id)
        .bind(phase_index)
        .fetch_one(&self.pool)
        .await?;
        Ok(checkpoint)
    }

    /// Retrieves the most recent checkpoint for a session.
    pub async fn get_latest_checkpoint(&self, session_id: Uuid) -> Result<Option<Checkpoint>> {
        let checkpoint = sqlx::query_as::<_, Checkpoint>(
            "SELECT id, session_id, phase_index, saved_at FROM checkpoints \
             WHERE session_id = $1 ORDER BY saved_at DESC, id DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(checkpoint)
    }

    /// Stores the answered questions of a finished run in a single transaction.
    pub async fn record_question_results(
        &self,
        session_id: Uuid,
        questions: &[QuestionRecord],
    ) -> Result<()> {
        if questions.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for question in questions {
            sqlx::query(
                "INSERT INTO question_results \
                 (session_id, question_id, prompt, answer, correct, answered_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(session_id)
            .bind(&question.question_id)
            .bind(&question.prompt)
            .bind(question.outcome.answer.as_deref())
            .bind(question.outcome.correct)
            .bind(question.answered_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Lists the recorded question results for a session.
    pub async fn get_question_results(&self, session_id: Uuid) -> Result<Vec<QuestionResult>> {
        let results = sqlx::query_as::<_, QuestionResult>(
            "SELECT id, session_id, question_id, prompt, answer, correct, answered_at \
             FROM question_results WHERE session_id = $1 ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(results)
    }
}

#[async_trait]
impl CheckpointStore for Db {
    async fn load_checkpoint(&self, session_id: Uuid) -> Result<Option<ResumeCheckpoint>> {
        Ok(self
            .get_latest_checkpoint(session_id)
            .await?
            .map(ResumeCheckpoint::from))
    }
}
