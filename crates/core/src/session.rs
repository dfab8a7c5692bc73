//! Training Session
//!
//! Wires one bus, one orchestrator and the feature controllers together for a
//! single learner session. Nothing here is global: every session gets its own
//! bus, so two sessions never see each other's traffic.

use crate::bus::{MessageBus, Subscription, Transport};
use crate::checkpoint::{CheckpointStore, ResumeCheckpoint};
use crate::controllers::{
    explosion::ExplosionController,
    question::{QuestionFlow, QuestionRecord},
};
use crate::protocol::OutboundTag;
use crate::resume::{self, ResumeResolution};
use crate::sequence::TaskSequence;
use crate::training::{TrainingHandle, TrainingOrchestrator, TrainingState};
use crate::{EventReceiver, SessionEvent};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

pub struct TrainingSession {
    bus: MessageBus,
    training: TrainingHandle,
    training_subscription: Subscription,
    explosion: ExplosionController,
    questions: QuestionFlow,
}

impl TrainingSession {
    /// Builds a session and returns it along with the stream of derived-state
    /// events.
    pub fn new(sequence: Arc<TaskSequence>, transport: Arc<dyn Transport>) -> (Self, EventReceiver) {
        let (events_tx, events_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let bus = MessageBus::new(transport);
        let orchestrator = TrainingOrchestrator::new(sequence, Some(events_tx.clone()));
        let (training, training_subscription) = TrainingHandle::attach(orchestrator, &bus);
        let explosion = ExplosionController::attach(&bus, Some(events_tx.clone()));
        let questions = QuestionFlow::attach(&bus, Some(events_tx));
        (
            Self {
                bus,
                training,
                training_subscription,
                explosion,
                questions,
            },
            events_rx,
        )
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Feeds one raw frame from the data channel. Returns `false` if the frame
    /// was dropped.
    pub fn ingest(&self, raw: &str) -> bool {
        self.bus.dispatch_frame(raw)
    }

    pub fn training(&self) -> TrainingState {
        self.training.snapshot()
    }

    pub fn sequence(&self) -> Arc<TaskSequence> {
        self.training.sequence()
    }

    pub fn explosion(&self) -> &ExplosionController {
        &self.explosion
    }

    pub fn questions(&self) -> &QuestionFlow {
        &self.questions
    }

    /// Resolves a checkpoint against this session's sequence without applying it.
    pub fn resolve_resume(&self, checkpoint: Option<&ResumeCheckpoint>) -> ResumeResolution {
        resume::resolve(checkpoint, &self.sequence())
    }

    /// Loads the checkpoint for `session_id` and resolves it.
    pub async fn resolve_from_store(
        &self,
        store: &dyn CheckpointStore,
        session_id: Uuid,
    ) -> Result<ResumeResolution> {
        let checkpoint = store.load_checkpoint(session_id).await?;
        Ok(self.resolve_resume(checkpoint.as_ref()))
    }

    /// Moves the orchestrator to the resolved point and, unless starting over,
    /// tells the simulation to jump to the same task.
    pub fn apply_resume(&self, resolution: &ResumeResolution) {
        self.training.apply_resume(resolution);
        if !resolution.is_from_start {
            self.bus
                .send_message(OutboundTag::JumpToTask, &resolution.phase_index.to_string());
        }
    }

    /// Ends the session: discards open questions, returns the answered ones and
    /// detaches every listener from the bus.
    pub fn end(&self) -> Vec<QuestionRecord> {
        let answered = self.questions.end_session();
        self.training_subscription.unsubscribe();
        self.explosion.detach();
        self.questions.detach();
        info!(answered = answered.len(), "Training session ended");
        answered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RecordingTransport;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::training::TrainingStatus;
    use chrono::Utc;

    fn session() -> (TrainingSession, EventReceiver, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        let (session, events) = TrainingSession::new(TaskSequence::builtin(), transport.clone());
        (session, events, transport)
    }

    fn drain(events: &mut EventReceiver) -> Vec<SessionEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    #[test]
    fn test_frames_reach_every_component() {
        let (session, mut events, _) = session();
        assert!(session.ingest("TaskProgress:2"));
        assert!(session.ingest("ExplosionUpdate:0.6:true"));
        assert!(session.ingest("QuestionPrompt:q1:Why?"));
        assert!(!session.ingest("Garbage"));

        assert_eq!(session.training().current_task_index, 2);
        assert!(session.explosion().state().is_animating);
        assert_eq!(session.questions().open_questions().len(), 1);

        let events = drain(&mut events);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], SessionEvent::TrainingUpdated(_)));
        assert!(matches!(events[1], SessionEvent::ExplosionUpdated(_)));
        assert!(matches!(events[2], SessionEvent::QuestionOpened { .. }));
    }

    #[test]
    fn test_sessions_do_not_share_traffic() {
        let (a, _, _) = session();
        let (b, _, _) = session();
        a.ingest("TaskProgress:3");
        assert_eq!(a.training().current_task_index, 3);
        assert_eq!(b.training().current_task_index, 0);
    }

    #[tokio::test]
    async fn test_resume_from_store_and_apply() {
        let (session, _, transport) = session();
        let store = InMemoryCheckpointStore::new();
        let id = Uuid::new_v4();
        store.insert(
            id,
            ResumeCheckpoint {
                phase_index: 99,
                saved_at: Utc::now(),
            },
        );

        let resolution = session.resolve_from_store(&store, id).await.unwrap();
        assert_eq!(resolution.phase_index, 5);
        // Resolving alone does not move the orchestrator.
        assert_eq!(session.training().status, TrainingStatus::NotStarted);

        session.apply_resume(&resolution);
        assert_eq!(session.training().current_task_index, 5);
        assert_eq!(transport.frames(), vec!["JumpToTask:5"]);
    }

    #[tokio::test]
    async fn test_resume_from_start_sends_nothing() {
        let (session, _, transport) = session();
        let store = InMemoryCheckpointStore::new();
        let resolution = session
            .resolve_from_store(&store, Uuid::new_v4())
            .await
            .unwrap();
        assert!(resolution.is_from_start);
        session.apply_resume(&resolution);
        assert!(transport.frames().is_empty());
    }

    #[test]
    fn test_end_detaches_all_listeners() {
        let (session, _, _) = session();
        session.ingest("QuestionPrompt:q1:open");
        session.ingest("QuestionPrompt:q2:answered");
        session.questions().submit_answer("q2", "yes").unwrap();

        let answered = session.end();
        assert_eq!(answered.len(), 1);
        assert_eq!(session.bus().listener_count(), 0);

        session.ingest("TaskProgress:4");
        assert_eq!(session.training().current_task_index, 0);
    }
}
