//! Training Orchestrator
//!
//! The state machine of record for a learner's progression through a
//! [`TaskSequence`]. It reacts to `TaskProgress` and `ToolChange` events from
//! the bus and is otherwise only queried.
//!
//! ```text
//! NotStarted --TaskProgress(i < n)--> InProgress --TaskProgress(n)--> Complete
//! ```
//!
//! Frames arrive from a streamed transport and may be late or duplicated: an
//! index behind the current one is treated as stale and ignored, an index past
//! the end is clamped to the terminal position.

use crate::bus::{MessageBus, Subscription, lock};
use crate::protocol::InboundEvent;
use crate::resume::ResumeResolution;
use crate::sequence::{TaskSequence, ToolId};
use crate::{EventSender, SessionEvent, emit};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Task name reported once every task is done.
pub const COMPLETE_TASK_NAME: &str = "Training complete";
/// Phase label reported once every task is done.
pub const COMPLETE_PHASE: &str = "complete";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    NotStarted,
    InProgress,
    Complete,
}

/// Snapshot of a learner's progression.
///
/// `current_task_index < total_tasks` unless `status` is `Complete`, in which
/// case they are equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingState {
    pub current_task_index: usize,
    pub total_tasks: usize,
    pub task_name: String,
    pub phase: String,
    /// Whole percent, truncated.
    pub progress: u8,
    pub current_tool: ToolId,
    pub status: TrainingStatus,
}

/// `floor(index / total * 100)`, saturating at 100.
pub fn truncated_progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = index.min(total) * 100 / total;
    percent as u8
}

pub struct TrainingOrchestrator {
    sequence: Arc<TaskSequence>,
    state: TrainingState,
    events: Option<EventSender>,
}

impl TrainingOrchestrator {
    pub fn new(sequence: Arc<TaskSequence>, events: Option<EventSender>) -> Self {
        let state = Self::state_at(&sequence, 0, TrainingStatus::NotStarted);
        Self {
            sequence,
            state,
            events,
        }
    }

    fn state_at(sequence: &TaskSequence, index: usize, status: TrainingStatus) -> TrainingState {
        let total = sequence.len();
        let (task_name, phase, tool) = match sequence.get(index) {
            Some(task) => (task.name.clone(), task.phase.clone(), task.tool.clone()),
            None => (
                COMPLETE_TASK_NAME.to_string(),
                COMPLETE_PHASE.to_string(),
                ToolId::default(),
            ),
        };
        TrainingState {
            current_task_index: index,
            total_tasks: total,
            task_name,
            phase,
            progress: truncated_progress(index, total),
            current_tool: tool,
            status,
        }
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn sequence(&self) -> &Arc<TaskSequence> {
        &self.sequence
    }

    pub fn is_complete(&self) -> bool {
        self.state.status == TrainingStatus::Complete
    }

    /// Applies an inbound event. Returns `true` if the state changed.
    pub fn handle(&mut self, event: &InboundEvent) -> bool {
        let changed = match event {
            InboundEvent::TaskProgress { task_index } => self.on_task_progress(*task_index),
            InboundEvent::ToolChange { tool } => self.on_tool_change(tool),
            _ => false,
        };
        if changed {
            emit(&self.events, SessionEvent::TrainingUpdated(self.state.clone()));
        }
        changed
    }

    fn on_task_progress(&mut self, raw_index: i64) -> bool {
        if self.is_complete() {
            debug!(raw_index, "Training already complete; ignoring task progress");
            return false;
        }

        let total = self.sequence.len();
        let index = usize::try_from(raw_index.max(0))
            .unwrap_or(usize::MAX)
            .min(total);
        if index as i64 != raw_index {
            debug!(raw_index, clamped = index, "Clamped out-of-range task index");
        }

        let current = self.state.current_task_index;
        if index < current {
            debug!(index, current, "Ignoring stale task progress");
            return false;
        }
        if index == current && self.state.status == TrainingStatus::InProgress {
            return false;
        }

        let status = if index == total {
            TrainingStatus::Complete
        } else {
            TrainingStatus::InProgress
        };
        self.state = Self::state_at(&self.sequence, index, status);
        info!(
            task_index = index,
            total_tasks = total,
            progress = self.state.progress,
            task = %self.state.task_name,
            "Training advanced"
        );
        true
    }

    fn on_tool_change(&mut self, tool: &str) -> bool {
        if self.state.current_tool.as_str() == tool {
            return false;
        }
        debug!(from = %self.state.current_tool, to = tool, "Tool changed");
        self.state.current_tool = ToolId::new(tool);
        true
    }

    /// Positions the orchestrator at a resolved resume point. A resume from the
    /// start resets progress to zero.
    pub fn apply_resume(&mut self, resolution: &ResumeResolution) {
        let last = self.sequence.len().saturating_sub(1);
        self.state = if resolution.is_from_start {
            Self::state_at(&self.sequence, 0, TrainingStatus::NotStarted)
        } else {
            Self::state_at(
                &self.sequence,
                resolution.phase_index.min(last),
                TrainingStatus::InProgress,
            )
        };
        info!(
            task_index = self.state.current_task_index,
            from_start = resolution.is_from_start,
            "Applied resume point"
        );
        emit(&self.events, SessionEvent::TrainingUpdated(self.state.clone()));
    }
}

/// Shared handle to an orchestrator that is subscribed to a bus.
///
/// The handle only exposes queries; all mutation goes through bus events.
#[derive(Clone)]
pub struct TrainingHandle {
    inner: Arc<Mutex<TrainingOrchestrator>>,
}

impl TrainingHandle {
    pub fn attach(orchestrator: TrainingOrchestrator, bus: &MessageBus) -> (Self, Subscription) {
        let inner = Arc::new(Mutex::new(orchestrator));
        let listener_state = inner.clone();
        let subscription = bus.on_message(move |event| {
            if matches!(
                event,
                InboundEvent::TaskProgress { .. } | InboundEvent::ToolChange { .. }
            ) {
                lock(&listener_state).handle(event);
            }
        });
        (Self { inner }, subscription)
    }

    pub fn snapshot(&self) -> TrainingState {
        lock(&self.inner).state().clone()
    }

    pub fn sequence(&self) -> Arc<TaskSequence> {
        lock(&self.inner).sequence().clone()
    }

    pub(crate) fn apply_resume(&self, resolution: &ResumeResolution) {
        lock(&self.inner).apply_resume(resolution);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RecordingTransport;
    use crate::sequence::TaskDefinition;
    use tokio::sync::mpsc;

    fn six_tasks() -> Arc<TaskSequence> {
        TaskSequence::builtin()
    }

    fn progress(index: i64) -> InboundEvent {
        InboundEvent::TaskProgress { task_index: index }
    }

    #[test]
    fn test_initial_state() {
        let orchestrator = TrainingOrchestrator::new(six_tasks(), None);
        let state = orchestrator.state();
        assert_eq!(state.current_task_index, 0);
        assert_eq!(state.total_tasks, 6);
        assert_eq!(state.progress, 0);
        assert_eq!(state.status, TrainingStatus::NotStarted);
        assert_eq!(state.task_name, "Survey the site");
        assert_eq!(state.current_tool, ToolId::new("laser_level"));
    }

    #[test]
    fn test_progress_is_truncated_for_every_index() {
        for total in 1..=12usize {
            let tasks = (0..total)
                .map(|i| TaskDefinition::new(&format!("t{i}"), "Task", "Phase", "tool"))
                .collect();
            let sequence = Arc::new(TaskSequence::new(tasks).unwrap());
            for i in 0..total {
                let mut orchestrator = TrainingOrchestrator::new(sequence.clone(), None);
                orchestrator.handle(&progress(i as i64));
                let state = orchestrator.state();
                assert_eq!(state.current_task_index, i);
                assert_eq!(state.progress as usize, i * 100 / total);
            }
        }
    }

    #[test]
    fn test_truncated_not_rounded() {
        // 5/6 = 83.33, 2/3 = 66.67
        assert_eq!(truncated_progress(5, 6), 83);
        assert_eq!(truncated_progress(2, 3), 66);
        assert_eq!(truncated_progress(3, 3), 100);
        assert_eq!(truncated_progress(9, 3), 100);
        assert_eq!(truncated_progress(1, 0), 0);
    }

    #[test]
    fn test_task_progress_zero_starts_training() {
        let mut orchestrator = TrainingOrchestrator::new(six_tasks(), None);
        assert!(orchestrator.handle(&progress(0)));
        assert_eq!(orchestrator.state().status, TrainingStatus::InProgress);
        // Duplicate frame is a no-op.
        assert!(!orchestrator.handle(&progress(0)));
    }

    #[test]
    fn test_completion_and_no_movement_afterwards() {
        let mut orchestrator = TrainingOrchestrator::new(six_tasks(), None);
        orchestrator.handle(&progress(6));
        let state = orchestrator.state().clone();
        assert_eq!(state.status, TrainingStatus::Complete);
        assert_eq!(state.current_task_index, 6);
        assert_eq!(state.progress, 100);
        assert_eq!(state.task_name, COMPLETE_TASK_NAME);
        assert_eq!(state.phase, COMPLETE_PHASE);

        assert!(!orchestrator.handle(&progress(7)));
        assert!(!orchestrator.handle(&progress(2)));
        assert_eq!(orchestrator.state(), &state);
    }

    #[test]
    fn test_out_of_range_indices_are_clamped() {
        let mut orchestrator = TrainingOrchestrator::new(six_tasks(), None);
        orchestrator.handle(&progress(i64::MAX));
        assert_eq!(orchestrator.state().current_task_index, 6);
        assert!(orchestrator.is_complete());

        let mut orchestrator = TrainingOrchestrator::new(six_tasks(), None);
        orchestrator.handle(&progress(-4));
        assert_eq!(orchestrator.state().current_task_index, 0);
        assert_eq!(orchestrator.state().status, TrainingStatus::InProgress);
    }

    #[test]
    fn test_stale_progress_is_ignored() {
        let mut orchestrator = TrainingOrchestrator::new(six_tasks(), None);
        orchestrator.handle(&progress(3));
        assert!(!orchestrator.handle(&progress(1)));
        assert_eq!(orchestrator.state().current_task_index, 3);
        assert_eq!(orchestrator.state().progress, 50);
    }

    #[test]
    fn test_tool_change_keeps_task_index() {
        let mut orchestrator = TrainingOrchestrator::new(six_tasks(), None);
        orchestrator.handle(&progress(2));
        assert_eq!(orchestrator.state().current_tool, ToolId::new("torque_wrench"));

        assert!(orchestrator.handle(&InboundEvent::ToolChange {
            tool: "hammer".to_string()
        }));
        assert_eq!(orchestrator.state().current_tool, ToolId::new("hammer"));
        assert_eq!(orchestrator.state().current_task_index, 2);
        assert!(!orchestrator.handle(&InboundEvent::ToolChange {
            tool: "hammer".to_string()
        }));

        // The next task brings its own tool.
        orchestrator.handle(&progress(3));
        assert_eq!(orchestrator.state().current_tool, ToolId::new("crane_remote"));
    }

    #[test]
    fn test_ignores_unrelated_events() {
        let mut orchestrator = TrainingOrchestrator::new(six_tasks(), None);
        assert!(!orchestrator.handle(&InboundEvent::TrainingEnded));
        assert!(!orchestrator.handle(&InboundEvent::ExplosionUpdate {
            value: 1.0,
            is_animating: true
        }));
    }

    #[test]
    fn test_apply_resume() {
        let mut orchestrator = TrainingOrchestrator::new(six_tasks(), None);
        orchestrator.apply_resume(&ResumeResolution {
            phase_index: 3,
            is_from_start: false,
            display_progress: 50,
        });
        assert_eq!(orchestrator.state().current_task_index, 3);
        assert_eq!(orchestrator.state().status, TrainingStatus::InProgress);

        orchestrator.apply_resume(&ResumeResolution::from_start());
        assert_eq!(orchestrator.state().current_task_index, 0);
        assert_eq!(orchestrator.state().progress, 0);
        assert_eq!(orchestrator.state().status, TrainingStatus::NotStarted);
    }

    #[test]
    fn test_emits_training_updates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut orchestrator = TrainingOrchestrator::new(six_tasks(), Some(tx));
        orchestrator.handle(&progress(1));
        orchestrator.handle(&progress(0));

        match rx.try_recv().unwrap() {
            SessionEvent::TrainingUpdated(state) => assert_eq!(state.current_task_index, 1),
            other => panic!("Unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_handle_reacts_to_bus() {
        let bus = MessageBus::new(Arc::new(RecordingTransport::new()));
        let (handle, subscription) =
            TrainingHandle::attach(TrainingOrchestrator::new(six_tasks(), None), &bus);

        bus.dispatch_frame("TaskProgress:4");
        bus.dispatch_frame("ToolChange:brush");
        let state = handle.snapshot();
        assert_eq!(state.current_task_index, 4);
        assert_eq!(state.progress, 66);
        assert_eq!(state.current_tool, ToolId::new("brush"));

        subscription.unsubscribe();
        bus.dispatch_frame("TaskProgress:5");
        assert_eq!(handle.snapshot().current_task_index, 4);
    }
}
