//! Session Resume Resolver
//!
//! Decides where a learner picks up, given the checkpoint persisted by an
//! earlier session. Resolution is pure: it neither writes the checkpoint store
//! nor starts the orchestrator.

use crate::checkpoint::ResumeCheckpoint;
use crate::sequence::TaskSequence;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeResolution {
    pub phase_index: usize,
    pub is_from_start: bool,
    /// Rounded percentage for display only. The orchestrator's own progress
    /// is truncated and may differ by one.
    pub display_progress: u8,
}

impl ResumeResolution {
    pub fn from_start() -> Self {
        Self {
            phase_index: 0,
            is_from_start: true,
            display_progress: 0,
        }
    }
}

/// `round(index / len * 100)`, half away from zero.
pub fn rounded_progress(index: usize, len: usize) -> u8 {
    if len == 0 {
        return 0;
    }
    let percent = (index.min(len) as f64 / len as f64 * 100.0).round();
    percent as u8
}

pub fn resolve(checkpoint: Option<&ResumeCheckpoint>, sequence: &TaskSequence) -> ResumeResolution {
    let Some(checkpoint) = checkpoint else {
        return ResumeResolution::from_start();
    };
    if checkpoint.phase_index <= 0 || sequence.is_empty() {
        return ResumeResolution::from_start();
    }

    let last = sequence.len() - 1;
    let phase_index = usize::try_from(checkpoint.phase_index)
        .unwrap_or(usize::MAX)
        .min(last);
    if phase_index as i64 != checkpoint.phase_index {
        tracing::warn!(
            stored = checkpoint.phase_index,
            clamped = phase_index,
            "Checkpoint beyond task sequence; clamping resume point"
        );
    }

    ResumeResolution {
        phase_index,
        is_from_start: false,
        display_progress: rounded_progress(phase_index, sequence.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn checkpoint(phase_index: i64) -> ResumeCheckpoint {
        ResumeCheckpoint {
            phase_index,
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_checkpoint_starts_from_beginning() {
        let resolution = resolve(None, &TaskSequence::builtin());
        assert_eq!(resolution.phase_index, 0);
        assert!(resolution.is_from_start);
    }

    #[test]
    fn test_non_positive_checkpoint_starts_from_beginning() {
        let sequence = TaskSequence::builtin();
        assert_eq!(resolve(Some(&checkpoint(0)), &sequence), ResumeResolution::from_start());
        assert_eq!(resolve(Some(&checkpoint(-2)), &sequence), ResumeResolution::from_start());
    }

    #[test]
    fn test_mid_sequence_checkpoint() {
        let resolution = resolve(Some(&checkpoint(3)), &TaskSequence::builtin());
        assert_eq!(
            resolution,
            ResumeResolution {
                phase_index: 3,
                is_from_start: false,
                display_progress: 50,
            }
        );
    }

    #[test]
    fn test_checkpoint_past_end_is_clamped() {
        let resolution = resolve(Some(&checkpoint(99)), &TaskSequence::builtin());
        assert_eq!(resolution.phase_index, 5);
        assert!(!resolution.is_from_start);
        assert_eq!(resolution.display_progress, 83);

        let resolution = resolve(Some(&checkpoint(6)), &TaskSequence::builtin());
        assert_eq!(resolution.phase_index, 5);
    }

    #[test]
    fn test_display_rounds_where_orchestrator_truncates() {
        // 2/3 of the way: display 67, orchestrator 66.
        assert_eq!(rounded_progress(2, 3), 67);
        assert_eq!(crate::training::truncated_progress(2, 3), 66);
        assert_eq!(rounded_progress(1, 8), 13);
        assert_eq!(rounded_progress(0, 0), 0);
    }
}
