//! Defines the WebSocket message protocol between the browser client and the API server.

use crate::models::{ResumeResponse, TaskResponse};
use serde::{Deserialize, Serialize};
use simtrain_core::{
    SessionEvent,
    controllers::{explosion::ExplosionState, question::QuestionOutcome},
    training::TrainingState,
};
use uuid::Uuid;

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Attaches the socket to a stored session. This must be the first message.
    Init { session_id: Uuid },
    /// One raw frame received from the simulation's data channel.
    SimulationFrame { frame: String },
    /// Slider input; rate-limited before it reaches the simulation.
    SetExplosionLevel { level: f64 },
    Explode,
    Assemble,
    SubmitAnswer { question_id: String, answer: String },
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms initialization with the resolved resume point and the current state.
    Initialized {
        session_id: Uuid,
        resume: ResumeResponse,
        training: TrainingState,
        tasks: Vec<TaskResponse>,
    },
    StateUpdate { state: TrainingState },
    ExplosionUpdate { state: ExplosionState },
    QuestionOpened { question_id: String, prompt: String },
    QuestionResolved {
        question_id: String,
        outcome: QuestionOutcome,
    },
    QuestionsDiscarded { question_ids: Vec<String> },
    /// A wire frame the browser must write to the simulation's data channel.
    OutboundFrame { frame: String },
    /// Reports an error to the client.
    Error { message: String },
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::TrainingUpdated(state) => ServerMessage::StateUpdate { state },
            SessionEvent::ExplosionUpdated(state) => ServerMessage::ExplosionUpdate { state },
            SessionEvent::QuestionOpened {
                question_id,
                prompt,
            } => ServerMessage::QuestionOpened {
                question_id,
                prompt,
            },
            SessionEvent::QuestionResolved {
                question_id,
                outcome,
            } => ServerMessage::QuestionResolved {
                question_id,
                outcome,
            },
            SessionEvent::QuestionsDiscarded { question_ids } => {
                ServerMessage::QuestionsDiscarded { question_ids }
            }
        }
    }
}
