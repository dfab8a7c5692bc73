//! Wire Codec for the Simulation Data Channel
//!
//! Frames exchanged with the streamed simulation are plain strings of the form
//! `<Tag>` or `<Tag>:<data>`. The codec only splits off the tag; the data is
//! kept verbatim and is turned into typed fields by [`InboundEvent::from_parsed`],
//! which is where all defaulting of missing or malformed fields happens.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Version of the tag table below. Bump whenever a tag or a field layout changes
/// in the simulation build.
pub const PROTOCOL_VERSION: u32 = 1;

/// Separator between the tag and the payload, and between payload fields.
pub const FIELD_SEPARATOR: char = ':';

/// Tags the simulation sends to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InboundTag {
    TaskProgress,
    ToolChange,
    ExplosionUpdate,
    QuestionPrompt,
    QuestionResult,
    TrainingEnded,
}

impl InboundTag {
    pub const ALL: [InboundTag; 6] = [
        InboundTag::TaskProgress,
        InboundTag::ToolChange,
        InboundTag::ExplosionUpdate,
        InboundTag::QuestionPrompt,
        InboundTag::QuestionResult,
        InboundTag::TrainingEnded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InboundTag::TaskProgress => "TaskProgress",
            InboundTag::ToolChange => "ToolChange",
            InboundTag::ExplosionUpdate => "ExplosionUpdate",
            InboundTag::QuestionPrompt => "QuestionPrompt",
            InboundTag::QuestionResult => "QuestionResult",
            InboundTag::TrainingEnded => "TrainingEnded",
        }
    }

    /// Exact, case-sensitive lookup of a wire tag.
    pub fn from_wire(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl fmt::Display for InboundTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tags the client sends to the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboundTag {
    ExplosionLevel,
    ExplosionControl,
    QuestionAnswer,
    JumpToTask,
}

impl OutboundTag {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboundTag::ExplosionLevel => "ExplosionLevel",
            OutboundTag::ExplosionControl => "ExplosionControl",
            OutboundTag::QuestionAnswer => "QuestionAnswer",
            OutboundTag::JumpToTask => "JumpToTask",
        }
    }
}

impl fmt::Display for OutboundTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame whose tag is known but whose payload has not been interpreted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub tag: InboundTag,
    pub data: String,
}

impl ParsedMessage {
    /// Positional payload fields. An empty payload has no fields.
    pub fn fields(&self) -> Vec<&str> {
        if self.data.is_empty() {
            Vec::new()
        } else {
            self.data.split(FIELD_SEPARATOR).collect()
        }
    }
}

/// Splits a raw frame into tag and payload. Returns `None` for empty frames and
/// unknown tags; the caller drops those.
pub fn decode(raw: &str) -> Option<ParsedMessage> {
    let frame = raw.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if frame.is_empty() {
        return None;
    }
    let (tag, data) = match frame.split_once(FIELD_SEPARATOR) {
        Some((tag, data)) => (tag, data),
        None => (frame, ""),
    };
    match InboundTag::from_wire(tag) {
        Some(tag) => Some(ParsedMessage {
            tag,
            data: data.to_string(),
        }),
        None => {
            debug!(tag, "Dropping frame with unknown tag");
            None
        }
    }
}

/// Builds an outbound frame. An empty payload yields the bare tag.
pub fn encode(tag: OutboundTag, payload: &str) -> String {
    if payload.is_empty() {
        tag.as_str().to_string()
    } else {
        format!("{}{}{}", tag.as_str(), FIELD_SEPARATOR, payload)
    }
}

/// Numeric field at `index`; missing, unparsable and non-finite values are `0.0`.
pub fn field_f64(fields: &[&str], index: usize) -> f64 {
    fields
        .get(index)
        .and_then(|f| f.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Integer field at `index`; missing or unparsable values are `0`.
///
/// Fractional values sent by the simulation (e.g. `"3.0"`) are truncated.
pub fn field_i64(fields: &[&str], index: usize) -> i64 {
    let Some(raw) = fields.get(index).map(|f| f.trim()) else {
        return 0;
    };
    raw.parse::<i64>()
        .ok()
        .or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(|v| v.trunc() as i64)
        })
        .unwrap_or(0)
}

/// Boolean field at `index`: only the exact string `"true"` is true.
pub fn field_bool(fields: &[&str], index: usize) -> bool {
    fields.get(index).is_some_and(|f| *f == "true")
}

/// String field at `index`; missing fields are empty.
pub fn field_str<'a>(fields: &[&'a str], index: usize) -> &'a str {
    fields.get(index).copied().unwrap_or("")
}

/// Typed view of an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// The learner reached the task at `task_index` (may be out of range; the
    /// orchestrator clamps).
    TaskProgress { task_index: i64 },
    /// The learner switched tools.
    ToolChange { tool: String },
    /// Explosion animation telemetry.
    ExplosionUpdate { value: f64, is_animating: bool },
    /// The simulation is asking the learner a question.
    QuestionPrompt { question_id: String, prompt: String },
    /// The simulation graded an answer.
    QuestionResult { question_id: String, correct: bool },
    /// The simulation ended the training run.
    TrainingEnded,
}

impl InboundEvent {
    pub fn tag(&self) -> InboundTag {
        match self {
            InboundEvent::TaskProgress { .. } => InboundTag::TaskProgress,
            InboundEvent::ToolChange { .. } => InboundTag::ToolChange,
            InboundEvent::ExplosionUpdate { .. } => InboundTag::ExplosionUpdate,
            InboundEvent::QuestionPrompt { .. } => InboundTag::QuestionPrompt,
            InboundEvent::QuestionResult { .. } => InboundTag::QuestionResult,
            InboundEvent::TrainingEnded => InboundTag::TrainingEnded,
        }
    }

    /// Interprets the payload of a parsed frame. Total over all inputs.
    pub fn from_parsed(msg: &ParsedMessage) -> Self {
        let fields = msg.fields();
        match msg.tag {
            InboundTag::TaskProgress => InboundEvent::TaskProgress {
                task_index: field_i64(&fields, 0),
            },
            InboundTag::ToolChange => InboundEvent::ToolChange {
                tool: field_str(&fields, 0).trim().to_string(),
            },
            InboundTag::ExplosionUpdate => InboundEvent::ExplosionUpdate {
                value: field_f64(&fields, 0),
                is_animating: field_bool(&fields, 1),
            },
            InboundTag::QuestionPrompt => {
                // The prompt is free text and keeps any colons it contains.
                let (question_id, prompt) = msg
                    .data
                    .split_once(FIELD_SEPARATOR)
                    .unwrap_or((msg.data.as_str(), ""));
                InboundEvent::QuestionPrompt {
                    question_id: question_id.trim().to_string(),
                    prompt: prompt.to_string(),
                }
            }
            InboundTag::QuestionResult => InboundEvent::QuestionResult {
                question_id: field_str(&fields, 0).trim().to_string(),
                correct: field_bool(&fields, 1),
            },
            InboundTag::TrainingEnded => InboundEvent::TrainingEnded,
        }
    }

    /// Decodes a raw frame straight into a typed event.
    pub fn decode(raw: &str) -> Option<Self> {
        decode(raw).map(|msg| Self::from_parsed(&msg))
    }
}
