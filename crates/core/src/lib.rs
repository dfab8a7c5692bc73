pub mod bus;
pub mod checkpoint;
pub mod controllers;
pub mod protocol;
pub mod resume;
pub mod sequence;
pub mod session;
pub mod throttle;
pub mod training;

use controllers::{explosion::ExplosionState, question::QuestionOutcome};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;
use training::TrainingState;

/// Derived-state notifications the core pushes to the surrounding runtime.
///
/// This is the only way state leaves the core besides snapshot queries; the
/// runtime forwards these to the UI and to persistence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The training progression changed.
    TrainingUpdated(TrainingState),
    /// New explosion telemetry arrived.
    ExplosionUpdated(ExplosionState),
    /// The simulation opened (or re-worded) a question.
    QuestionOpened { question_id: String, prompt: String },
    /// A question was answered and/or graded.
    QuestionResolved {
        question_id: String,
        outcome: QuestionOutcome,
    },
    /// Open questions dropped when the session ended.
    QuestionsDiscarded { question_ids: Vec<String> },
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

pub(crate) fn emit(events: &Option<EventSender>, event: SessionEvent) {
    if let Some(tx) = events {
        if tx.send(event).is_err() {
            warn!("Failed to broadcast session event: receiver dropped.");
        }
    }
}
