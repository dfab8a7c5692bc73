//! Offline replay of a recorded simulation data channel.
//!
//! Feeds a frame log (one wire frame per line) through a `TrainingSession` and
//! prints every derived-state event plus a final summary as JSON lines. Used to
//! check a simulation build's tags and field order against the decoder.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use simtrain_core::{
    SessionEvent,
    bus::RecordingTransport,
    checkpoint::{InMemoryCheckpointStore, ResumeCheckpoint},
    controllers::{explosion::ExplosionState, question::QuestionRecord},
    protocol::InboundEvent,
    resume::ResumeResolution,
    sequence::TaskSequence,
    session::TrainingSession,
    training::TrainingState,
};
use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{Level, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(version, about = "Replay a recorded simulation frame log through the training core")]
struct Args {
    /// File with one wire frame per line. Blank lines and `#` comments are skipped.
    frames: PathBuf,

    /// JSON task sequence to replay against instead of the built-in one.
    #[arg(long)]
    sequence: Option<PathBuf>,

    /// Resume from this saved task index before replaying.
    #[arg(long, allow_negative_numbers = true)]
    checkpoint: Option<i64>,

    /// Answer a question as soon as it opens, as `QUESTION_ID=ANSWER`. Repeatable.
    #[arg(long = "answer", value_parser = parse_answer)]
    answers: Vec<(String, String)>,

    /// Only report frames that fail to decode.
    #[arg(long)]
    strict: bool,

    #[arg(long, default_value = "warn")]
    log_level: Level,
}

fn parse_answer(raw: &str) -> Result<(String, String)> {
    let (id, answer) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected QUESTION_ID=ANSWER, got '{raw}'"))?;
    if id.is_empty() {
        return Err(anyhow!("question id must not be empty"));
    }
    Ok((id.to_string(), answer.to_string()))
}

/// One line of replay output.
#[derive(Serialize, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ReplayLine {
    Resume {
        resolution: ResumeResolution,
    },
    Event {
        line: usize,
        event: SessionEvent,
    },
    Undecoded {
        line: usize,
        frame: String,
    },
    Summary(Box<ReplaySummary>),
}

#[derive(Serialize, Debug)]
struct ReplaySummary {
    frames_read: usize,
    frames_dropped: usize,
    training: TrainingState,
    explosion: ExplosionState,
    answered_questions: Vec<QuestionRecord>,
    outbound_frames: Vec<String>,
}

/// Reads a frame log, skipping blank lines and comments. Yields 1-based line numbers.
fn read_frames(path: &Path) -> Result<Vec<(usize, String)>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read frame log {}", path.display()))?;
    Ok(contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim_end_matches('\r').to_string()))
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .collect())
}

async fn replay(
    args: &Args,
    sequence: Arc<TaskSequence>,
    frames: Vec<(usize, String)>,
) -> Result<Vec<ReplayLine>> {
    let transport = Arc::new(RecordingTransport::new());
    let (session, mut events) = TrainingSession::new(sequence, transport.clone());
    let mut output = Vec::new();

    if let Some(phase_index) = args.checkpoint {
        let session_id = Uuid::new_v4();
        let store = InMemoryCheckpointStore::new();
        store.insert(
            session_id,
            ResumeCheckpoint {
                phase_index,
                saved_at: Utc::now(),
            },
        );
        let resolution = session.resolve_from_store(&store, session_id).await?;
        session.apply_resume(&resolution);
        output.push(ReplayLine::Resume { resolution });
    }
    // Resume events are summarised by the resume line.
    while events.try_recv().is_ok() {}

    let scripted: HashMap<&str, &str> = args
        .answers
        .iter()
        .map(|(id, answer)| (id.as_str(), answer.as_str()))
        .collect();
    let frames_read = frames.len();
    let mut frames_dropped = 0;

    for (line, frame) in frames {
        if !session.ingest(&frame) {
            frames_dropped += 1;
            output.push(ReplayLine::Undecoded { line, frame });
            continue;
        }
        if let Some(InboundEvent::QuestionPrompt { question_id, .. }) = InboundEvent::decode(&frame)
        {
            if let Some(answer) = scripted.get(question_id.as_str()) {
                if let Err(e) = session.questions().submit_answer(&question_id, answer) {
                    warn!(%question_id, error = %e, "Scripted answer rejected");
                }
            }
        }
        while let Ok(event) = events.try_recv() {
            if !args.strict {
                output.push(ReplayLine::Event { line, event });
            }
        }
    }

    let training = session.training();
    let explosion = session.explosion().state();
    let answered_questions = session.end();
    info!(frames_read, frames_dropped, "Replay finished");

    output.push(ReplayLine::Summary(Box::new(ReplaySummary {
        frames_read,
        frames_dropped,
        training,
        explosion,
        answered_questions,
        outbound_frames: transport.frames(),
    })));
    Ok(output)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(io::stderr)
        .init();

    let sequence = match &args.sequence {
        Some(path) => Arc::new(
            TaskSequence::from_json_file(path)
                .with_context(|| format!("Failed to load task sequence from {}", path.display()))?,
        ),
        None => TaskSequence::builtin(),
    };
    let frames = read_frames(&args.frames)?;

    let output = replay(&args, sequence, frames).await?;
    let mut stdout = io::stdout().lock();
    for line in &output {
        serde_json::to_writer(&mut stdout, line)?;
        writeln!(stdout)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["simtrain-replay", "frames.log"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    fn summary(output: &[ReplayLine]) -> &ReplaySummary {
        match output.last() {
            Some(ReplayLine::Summary(summary)) => summary,
            other => panic!("expected summary, got {other:?}"),
        }
    }

    #[test]
    fn test_read_frames_skips_blanks_and_comments() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# recorded 2025-03-02").unwrap();
        writeln!(file, "TaskProgress:1").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "ToolChange:crane_remote\r").unwrap();

        let frames = read_frames(file.path()).unwrap();
        assert_eq!(
            frames,
            vec![
                (2, "TaskProgress:1".to_string()),
                (4, "ToolChange:crane_remote".to_string())
            ]
        );
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(
            parse_answer("q1=two:three").unwrap(),
            ("q1".to_string(), "two:three".to_string())
        );
        assert!(parse_answer("q1").is_err());
        assert!(parse_answer("=x").is_err());
    }

    #[tokio::test]
    async fn test_replay_reports_events_and_summary() {
        let frames = vec![
            (1, "TaskProgress:2".to_string()),
            (2, "Bogus:1".to_string()),
            (3, "QuestionPrompt:q1:Which bolt first?".to_string()),
            (4, "QuestionResult:q1:true".to_string()),
        ];
        let output = replay(&args(&["--answer", "q1=B"]), TaskSequence::builtin(), frames)
            .await
            .unwrap();

        assert!(matches!(
            output[0],
            ReplayLine::Event {
                line: 1,
                event: SessionEvent::TrainingUpdated(_)
            }
        ));
        assert!(
            output
                .iter()
                .any(|l| matches!(l, ReplayLine::Undecoded { line: 2, .. }))
        );

        let summary = summary(&output);
        assert_eq!(summary.frames_read, 4);
        assert_eq!(summary.frames_dropped, 1);
        assert_eq!(summary.training.current_task_index, 2);
        assert_eq!(summary.outbound_frames, vec!["QuestionAnswer:q1:B"]);
        assert_eq!(summary.answered_questions.len(), 1);
        assert_eq!(summary.answered_questions[0].outcome.correct, Some(true));
    }

    #[tokio::test]
    async fn test_replay_with_checkpoint_jumps_first() {
        let output = replay(
            &args(&["--checkpoint", "3", "--strict"]),
            TaskSequence::builtin(),
            vec![(1, "TaskProgress:4".to_string())],
        )
        .await
        .unwrap();

        match &output[0] {
            ReplayLine::Resume { resolution } => {
                assert_eq!(resolution.phase_index, 3);
                assert_eq!(resolution.display_progress, 50);
            }
            other => panic!("expected resume line, got {other:?}"),
        }
        assert_eq!(output.len(), 2);
        let summary = summary(&output);
        assert_eq!(summary.outbound_frames, vec!["JumpToTask:3"]);
        assert_eq!(summary.training.current_task_index, 4);
    }
}
