//! Envelope shape validation (spec.md §4.3).
//!
//! JSON shape and the `envelope.type` enum are already enforced by
//! [`crate::codec::decode`] going through serde's typed deserialization —
//! a frame that doesn't parse never reaches here. What's left to check:
//! identity well-formedness, recipient wildcard legality, and that the
//! payload discriminator/required fields match `envelope.type`.

use crate::envelope::{Envelope, EnvelopeType};
use crate::error::ProtocolError;
use crate::identity::{validate_id_charset, Identity};

/// Run the full §4.3 checklist against a decoded envelope.
pub fn validate(envelope: &Envelope) -> Result<(), ProtocolError> {
    validate_identity(&envelope.sender, false)?;
    validate_identity(&envelope.recipient, true)?;

    // Checks the payload discriminator and variant-specific required fields,
    // since `typed_payload` performs a typed parse against `envelope_type`.
    envelope.typed_payload()?;

    Ok(())
}

fn validate_identity(identity: &Identity, wildcard_allowed: bool) -> Result<(), ProtocolError> {
    if identity.is_wildcard() {
        if wildcard_allowed {
            return Ok(());
        }
        return Err(ProtocolError::Validation(format!(
            "wildcard id is not permitted for this identity position: {identity:?}"
        )));
    }
    if identity.id.is_empty() {
        return Err(ProtocolError::Validation(
            "recipient.id must be non-empty".to_owned(),
        ));
    }
    validate_id_charset(&identity.id).map_err(|_| {
        ProtocolError::Validation(format!("identity id '{}' is malformed", identity.id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::HeartbeatPayload;
    use crate::identity::IdentityKind;
    use crate::payload::Payload;
    use serde_json::json;

    fn agent(id: &str) -> Identity {
        Identity::new(IdentityKind::Agent, id).unwrap()
    }

    #[test]
    fn accepts_well_formed_message_envelope() {
        let envelope = Envelope::message(
            agent("a1"),
            Identity::new(IdentityKind::Environment, "demo").unwrap(),
            Payload::Action {
                id: "x1".to_owned(),
                action: "move".to_owned(),
                parameters: json!({}),
            },
        );
        assert!(validate(&envelope).is_ok());
    }

    #[test]
    fn rejects_wildcard_sender() {
        let mut envelope = Envelope::message(
            agent("a1"),
            agent("a2"),
            Payload::Event {
                id: "e1".to_owned(),
                event: "ping".to_owned(),
                data: json!({}),
            },
        );
        envelope.sender = Identity::wildcard(IdentityKind::Agent);
        assert!(validate(&envelope).is_err());
    }

    #[test]
    fn allows_wildcard_recipient() {
        let envelope = Envelope::message(
            agent("a1"),
            Identity::wildcard(IdentityKind::Agent),
            Payload::Event {
                id: "e1".to_owned(),
                event: "ping".to_owned(),
                data: json!({}),
            },
        );
        assert!(validate(&envelope).is_ok());
    }

    #[test]
    fn rejects_malformed_payload_for_message_type() {
        let mut envelope = Envelope::heartbeat(agent("a1"), HeartbeatPayload::running());
        envelope.envelope_type = EnvelopeType::Message;
        envelope.payload = json!({"type": "action", "action": "move"}); // missing id/parameters
        assert!(validate(&envelope).is_err());
    }
}
