//! Encode/decode a single JSON envelope per frame (spec.md §4.1).

use chrono::Utc;

use crate::envelope::{Envelope, PROTOCOL_VERSION};
use crate::error::ProtocolError;

/// Default and hard cap on frame size (spec.md §4.1, §5: "max_frame_bytes").
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Encode an envelope to a UTF-8 JSON frame, filling `timestamp` (current
/// UTC instant) and `version` ("1") when absent.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    let mut envelope = envelope.clone();
    if envelope.timestamp.is_none() {
        envelope.timestamp = Some(Utc::now().to_rfc3339());
    }
    if envelope.version.is_none() {
        envelope.version = Some(PROTOCOL_VERSION.to_owned());
    }
    serde_json::to_string(&envelope).map_err(ProtocolError::Decode)
}

/// Decode exactly one JSON object into an envelope, rejecting frames over
/// `max_frame_bytes` before attempting to parse.
pub fn decode(frame: &str, max_frame_bytes: usize) -> Result<Envelope, ProtocolError> {
    let size = frame.len();
    if size > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            size,
            limit: max_frame_bytes,
        });
    }
    serde_json::from_str(frame).map_err(ProtocolError::Decode)
}

/// [`decode`] with the default 1 MiB bound.
pub fn decode_default(frame: &str) -> Result<Envelope, ProtocolError> {
    decode(frame, DEFAULT_MAX_FRAME_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::HeartbeatPayload;
    use crate::identity::{Identity, IdentityKind};

    #[test]
    fn encode_fills_timestamp_and_version_when_absent() {
        let envelope =
            Envelope::heartbeat(Identity::new(IdentityKind::Agent, "a1").unwrap(), HeartbeatPayload::running());
        let text = encode(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert!(back.timestamp.is_some());
        assert_eq!(back.version.as_deref(), Some("1"));
    }

    #[test]
    fn round_trip_preserves_explicit_fields() {
        let envelope = Envelope::heartbeat(
            Identity::new(IdentityKind::Agent, "a1").unwrap(),
            HeartbeatPayload::running(),
        )
        .with_id("trace-42");
        let text = encode(&envelope).unwrap();
        let back = decode_default(&text).unwrap();
        assert_eq!(back.id.as_deref(), Some("trace-42"));
    }

    #[test]
    fn decode_rejects_oversized_frame_before_parsing() {
        let huge = "x".repeat(DEFAULT_MAX_FRAME_BYTES + 1);
        let err = decode_default(&huge).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[test]
    fn decode_accepts_frame_at_exact_bound() {
        // Build a real envelope and pad `details`-free payload so the frame
        // lands at exactly the configured bound.
        let small_envelope = Envelope::heartbeat(
            Identity::new(IdentityKind::Agent, "a1").unwrap(),
            HeartbeatPayload::running(),
        );
        let base = encode(&small_envelope).unwrap();
        let bound = base.len();
        assert!(decode(&base, bound).is_ok());
        assert!(decode(&base, bound - 1).is_err());
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let err = decode_default("{not-json").unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }
}
