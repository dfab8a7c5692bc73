//! Task Sequence
//!
//! The ordered list of training tasks a learner works through. A sequence is
//! fixed once built and is shared by reference between the orchestrator, the
//! resume resolver and the presentation layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, LazyLock};

/// Identifier of a tool in the simulation (e.g. `"torque_wrench"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolId(pub String);

impl ToolId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ToolId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A single step of the training.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub task_id: String,
    pub name: String,
    /// Phase label shown alongside the task name.
    pub phase: String,
    /// Tool the learner is expected to hold for this task.
    pub tool: ToolId,
}

impl TaskDefinition {
    pub fn new(task_id: &str, name: &str, phase: &str, tool: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            name: name.to_string(),
            phase: phase.to_string(),
            tool: ToolId::new(tool),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("Task sequence is empty")]
    Empty,
    #[error("Duplicate task id '{0}' in task sequence")]
    DuplicateTaskId(String),
    #[error("Failed to read task sequence: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse task sequence: {0}")]
    Parse(#[from] serde_json::Error),
}

/// An ordered, non-empty, immutable list of tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TaskSequence {
    tasks: Vec<TaskDefinition>,
}

impl TaskSequence {
    pub fn new(tasks: Vec<TaskDefinition>) -> Result<Self, SequenceError> {
        if tasks.is_empty() {
            return Err(SequenceError::Empty);
        }
        for (i, task) in tasks.iter().enumerate() {
            if tasks[..i].iter().any(|t| t.task_id == task.task_id) {
                return Err(SequenceError::DuplicateTaskId(task.task_id.clone()));
            }
        }
        Ok(Self { tasks })
    }

    /// Loads a sequence from a JSON array of task definitions.
    pub fn from_json_file(path: &Path) -> Result<Self, SequenceError> {
        let raw = std::fs::read_to_string(path)?;
        let tasks: Vec<TaskDefinition> = serde_json::from_str(&raw)?;
        Self::new(tasks)
    }

    /// The sequence compiled into the binary.
    pub fn builtin() -> Arc<TaskSequence> {
        BUILTIN_SEQUENCE.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TaskDefinition> {
        self.tasks.get(index)
    }

    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn position(&self, task_id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.task_id == task_id)
    }
}

static BUILTIN_SEQUENCE: LazyLock<Arc<TaskSequence>> = LazyLock::new(|| {
    Arc::new(TaskSequence {
        tasks: vec![
            TaskDefinition::new("site-survey", "Survey the site", "Preparation", "laser_level"),
            TaskDefinition::new("foundation", "Pour the foundation", "Groundwork", "concrete_mixer"),
            TaskDefinition::new("framing", "Erect the steel frame", "Structure", "torque_wrench"),
            TaskDefinition::new("floors", "Install floor slabs", "Structure", "crane_remote"),
            TaskDefinition::new("facade", "Mount the facade panels", "Envelope", "rivet_gun"),
            TaskDefinition::new("inspection", "Final inspection", "Handover", "inspection_tablet"),
        ],
    })
});
