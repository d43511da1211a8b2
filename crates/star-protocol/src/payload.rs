//! The inner business payload carried in `Envelope::Message`.
//!
//! Payload vocabulary (action names, event names, parameter shapes) is
//! intentionally open — only the envelope shape is validated, never the
//! business meaning of a given `action`/`event`/`stream_type` name.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome status, the one part of the inner protocol the Hub/client care
/// about structurally (spec.md §3: "object with at minimum `status`").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// The body of an `outcome` payload. `status` is the only structurally
/// required field; everything else a handler needs rides in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeBody {
    pub status: OutcomeStatus,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// `envelope.payload` when `envelope.type == message`, tagged by
/// `payload.type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Action {
        id: String,
        action: String,
        parameters: Value,
    },
    Outcome {
        /// Echoes the originating action's id.
        id: String,
        outcome: OutcomeBody,
        outcome_type: String,
    },
    Event {
        id: String,
        event: String,
        data: Value,
    },
    Stream {
        stream_type: String,
        /// Monotonic non-negative per (sender, stream_type); gaps allowed.
        sequence: u64,
        data: Value,
    },
}

impl Payload {
    /// The correlation id used by `send_and_wait`, when this variant has
    /// one. `Stream` has no id — streams are not correlated request/response
    /// pairs.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Payload::Action { id, .. } | Payload::Outcome { id, .. } | Payload::Event { id, .. } => {
                Some(id)
            }
            Payload::Stream { .. } => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Action { .. } => "action",
            Payload::Outcome { .. } => "outcome",
            Payload::Event { .. } => "event",
            Payload::Stream { .. } => "stream",
        }
    }
}
