//! The outer wire envelope (spec.md §3 "Envelope (outer protocol)").

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorCode, ProtocolError};
use crate::identity::Identity;
use crate::payload::Payload;

pub const PROTOCOL_VERSION: &str = "1";

/// The envelope-level discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    Heartbeat,
    Message,
    Error,
}

/// System payload for `envelope.type == heartbeat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub timestamp: String,
    pub server_status: String,
    pub ping: String,
}

impl HeartbeatPayload {
    #[must_use]
    pub fn running() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            server_status: "running".to_owned(),
            ping: "pong".to_owned(),
        }
    }
}

/// System payload for `envelope.type == error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelopePayload {
    pub error_code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorEnvelopePayload {
    #[must_use]
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A fully-decoded envelope payload, typed by `envelope.type`.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedPayload {
    Heartbeat(HeartbeatPayload),
    Message(Payload),
    Error(ErrorEnvelopePayload),
}

/// The outer wire envelope. Field layout matches spec.md §3's table exactly;
/// `payload` stays untyped JSON at rest so decode can succeed even when the
/// caller only wants to branch on `envelope_type` before committing to a
/// typed parse of `payload` (see [`Envelope::typed_payload`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub envelope_type: EnvelopeType,
    pub sender: Identity,
    pub recipient: Identity,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Envelope {
    #[must_use]
    pub fn message(sender: Identity, recipient: Identity, payload: Payload) -> Self {
        Self {
            envelope_type: EnvelopeType::Message,
            sender,
            recipient,
            payload: serde_json::to_value(payload).expect("Payload always serializes"),
            timestamp: None,
            id: None,
            version: None,
        }
    }

    #[must_use]
    pub fn heartbeat(recipient: Identity, payload: HeartbeatPayload) -> Self {
        Self {
            envelope_type: EnvelopeType::Heartbeat,
            sender: Identity::hub(),
            recipient,
            payload: serde_json::to_value(payload).expect("HeartbeatPayload always serializes"),
            timestamp: None,
            id: None,
            version: None,
        }
    }

    #[must_use]
    pub fn error(recipient: Identity, payload: ErrorEnvelopePayload) -> Self {
        Self {
            envelope_type: EnvelopeType::Error,
            sender: Identity::hub(),
            recipient,
            payload: serde_json::to_value(payload).expect("ErrorEnvelopePayload always serializes"),
            timestamp: None,
            id: None,
            version: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Parse `self.payload` against the shape implied by `self.envelope_type`.
    pub fn typed_payload(&self) -> Result<TypedPayload, ProtocolError> {
        match self.envelope_type {
            EnvelopeType::Heartbeat => serde_json::from_value(self.payload.clone())
                .map(TypedPayload::Heartbeat)
                .map_err(|e| ProtocolError::Validation(format!("bad heartbeat payload: {e}"))),
            EnvelopeType::Message => serde_json::from_value(self.payload.clone())
                .map(TypedPayload::Message)
                .map_err(|e| ProtocolError::Validation(format!("bad message payload: {e}"))),
            EnvelopeType::Error => serde_json::from_value(self.payload.clone())
                .map(TypedPayload::Error)
                .map_err(|e| ProtocolError::Validation(format!("bad error payload: {e}"))),
        }
    }
}
