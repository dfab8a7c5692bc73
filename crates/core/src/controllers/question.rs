//! Question Flow
//!
//! Tracks in-simulation questions from prompt to answer. A `QuestionPrompt`
//! opens a question; it is closed either by a local answer (which is also sent
//! to the simulation) or by a remote `QuestionResult`. When the training ends,
//! open questions are discarded unanswered and the answered ones are handed
//! back to the caller for persistence.

use crate::bus::{MessageBus, Subscription, lock};
use crate::protocol::{FIELD_SEPARATOR, InboundEvent, OutboundTag};
use crate::{EventSender, SessionEvent, emit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuestionError {
    #[error("Question '{0}' is not open")]
    UnknownQuestion(String),
    #[error("Question '{0}' was already answered")]
    AlreadyAnswered(String),
    #[error("Training session has ended")]
    SessionEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Open,
    Answered,
}

/// What is known about an answered question. `answer` is `None` when the
/// simulation graded an answer given inside the simulation itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuestionOutcome {
    pub answer: Option<String>,
    pub correct: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub question_id: String,
    pub prompt: String,
    pub status: QuestionStatus,
    pub outcome: QuestionOutcome,
    pub opened_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct QuestionBook {
    questions: Vec<QuestionRecord>,
    /// Answered questions of a training run that has already ended.
    completed: Vec<QuestionRecord>,
    ended: bool,
}

impl QuestionBook {
    fn find_mut(&mut self, question_id: &str) -> Option<&mut QuestionRecord> {
        self.questions
            .iter_mut()
            .find(|q| q.question_id == question_id)
    }

    fn on_prompt(&mut self, question_id: &str, prompt: &str) -> Option<SessionEvent> {
        if question_id.is_empty() || self.ended {
            debug!(question_id, ended = self.ended, "Ignoring question prompt");
            return None;
        }
        match self.find_mut(question_id) {
            Some(existing) if existing.status == QuestionStatus::Open => {
                existing.prompt = prompt.to_string();
            }
            Some(_) => {
                debug!(question_id, "Prompt for an answered question; ignoring");
                return None;
            }
            None => {
                info!(question_id, "Question opened");
                self.questions.push(QuestionRecord {
                    question_id: question_id.to_string(),
                    prompt: prompt.to_string(),
                    status: QuestionStatus::Open,
                    outcome: QuestionOutcome::default(),
                    opened_at: Utc::now(),
                    answered_at: None,
                });
            }
        }
        Some(SessionEvent::QuestionOpened {
            question_id: question_id.to_string(),
            prompt: prompt.to_string(),
        })
    }

    fn on_result(&mut self, question_id: &str, correct: bool) -> Option<SessionEvent> {
        let Some(record) = self.find_mut(question_id) else {
            debug!(question_id, "Result for an unknown question; ignoring");
            return None;
        };
        if record.status == QuestionStatus::Open {
            record.status = QuestionStatus::Answered;
            record.answered_at = Some(Utc::now());
        }
        record.outcome.correct = Some(correct);
        info!(question_id, correct, "Question graded");
        Some(SessionEvent::QuestionResolved {
            question_id: question_id.to_string(),
            outcome: record.outcome.clone(),
        })
    }

    fn answer(&mut self, question_id: &str, answer: &str) -> Result<QuestionOutcome, QuestionError> {
        if self.ended {
            return Err(QuestionError::SessionEnded);
        }
        let record = self
            .find_mut(question_id)
            .ok_or_else(|| QuestionError::UnknownQuestion(question_id.to_string()))?;
        if record.status == QuestionStatus::Answered {
            return Err(QuestionError::AlreadyAnswered(question_id.to_string()));
        }
        record.status = QuestionStatus::Answered;
        record.answered_at = Some(Utc::now());
        record.outcome.answer = Some(answer.to_string());
        Ok(record.outcome.clone())
    }

    /// Drops open questions, moves answered ones to `completed`, and returns
    /// the ids of the dropped ones.
    fn end(&mut self) -> Vec<String> {
        self.ended = true;
        let (answered, open): (Vec<_>, Vec<_>) = self
            .questions
            .drain(..)
            .partition(|q| q.status == QuestionStatus::Answered);
        self.completed.extend(answered);
        open.into_iter().map(|q| q.question_id).collect()
    }
}

pub struct QuestionFlow {
    bus: MessageBus,
    book: Arc<Mutex<QuestionBook>>,
    events: Option<EventSender>,
    subscription: Subscription,
}

impl QuestionFlow {
    pub fn attach(bus: &MessageBus, events: Option<EventSender>) -> Self {
        let book = Arc::new(Mutex::new(QuestionBook::default()));
        let listener_book = book.clone();
        let listener_events = events.clone();
        let subscription = bus.on_message(move |event| {
            let emitted = match event {
                InboundEvent::QuestionPrompt {
                    question_id,
                    prompt,
                } => lock(&listener_book).on_prompt(question_id, prompt),
                InboundEvent::QuestionResult {
                    question_id,
                    correct,
                } => lock(&listener_book).on_result(question_id, *correct),
                InboundEvent::TrainingEnded => {
                    discarded_event(lock(&listener_book).end())
                }
                _ => None,
            };
            if let Some(event) = emitted {
                emit(&listener_events, event);
            }
        });
        Self {
            bus: bus.clone(),
            book,
            events,
            subscription,
        }
    }

    /// Answers an open question locally and forwards the answer to the
    /// simulation as `QuestionAnswer:<id>:<answer>`.
    pub fn submit_answer(&self, question_id: &str, answer: &str) -> Result<(), QuestionError> {
        let outcome = lock(&self.book).answer(question_id, answer)?;
        info!(question_id, "Question answered locally");
        self.bus.send_message(
            OutboundTag::QuestionAnswer,
            &format!("{}{}{}", question_id, FIELD_SEPARATOR, answer),
        );
        emit(
            &self.events,
            SessionEvent::QuestionResolved {
                question_id: question_id.to_string(),
                outcome,
            },
        );
        Ok(())
    }

    pub fn question(&self, question_id: &str) -> Option<QuestionRecord> {
        lock(&self.book)
            .questions
            .iter()
            .find(|q| q.question_id == question_id)
            .cloned()
    }

    pub fn open_questions(&self) -> Vec<QuestionRecord> {
        lock(&self.book)
            .questions
            .iter()
            .filter(|q| q.status == QuestionStatus::Open)
            .cloned()
            .collect()
    }

    pub fn is_ended(&self) -> bool {
        lock(&self.book).ended
    }

    /// Ends the question flow. Open questions are discarded; the answered
    /// questions of the run are returned once and not kept.
    pub fn end_session(&self) -> Vec<QuestionRecord> {
        let (discarded, completed) = {
            let mut book = lock(&self.book);
            let discarded = book.end();
            (discarded, std::mem::take(&mut book.completed))
        };
        if let Some(event) = discarded_event(discarded) {
            emit(&self.events, event);
        }
        completed
    }

    pub fn detach(&self) {
        self.subscription.unsubscribe();
    }
}

fn discarded_event(question_ids: Vec<String>) -> Option<SessionEvent> {
    if question_ids.is_empty() {
        return None;
    }
    info!(count = question_ids.len(), "Discarding unanswered questions");
    Some(SessionEvent::QuestionsDiscarded { question_ids })
}
