//! Envelope routing (spec.md §4.4).
//!
//! A free function with no hidden state, grounded on the teacher's
//! `handle_event_batch` dispatch shape (validate shape, branch on kind,
//! enqueue/ack/error) but generalized from a single forwarder-event-batch
//! case to the full heartbeat/error/message taxonomy and the
//! unicast/broadcast/scoped-broadcast addressing spec.md requires.

use star_protocol::{
    Envelope, EnvelopeType, ErrorCode, ErrorEnvelopePayload, Identity, IdentityKind, Payload,
    TypedPayload,
};
use tracing::{info, warn};

use crate::auth::Authenticator;
use crate::registry::Registry;

/// The result of attempting to route one validated inbound envelope.
#[derive(Debug)]
pub enum RouteOutcome {
    /// `message` delivered to these recipients (one for unicast, many for
    /// broadcast; empty is possible for a broadcast with no live recipients,
    /// spec.md B3).
    Delivered(Vec<Identity>),
    /// An `error` envelope was queued back to the sender.
    ErrorSent(Identity, ErrorCode),
    /// `heartbeat`/`error` from a client: liveness evidence or a logged
    /// counter bump, never forwarded (spec.md §4.4).
    Ignored,
}

/// The payload's own correlation id (spec.md §7), not the outer envelope's
/// optional trace `id` — real client traffic via `RawClient::send` never
/// sets the latter, so an error keyed off it would never correlate back to
/// a caller's `send_and_wait`.
fn correlation_id_of(envelope: &Envelope) -> Option<String> {
    match envelope.typed_payload() {
        Ok(TypedPayload::Message(payload)) => payload.correlation_id().map(str::to_owned),
        _ => None,
    }
}

/// Route one envelope already known to have passed the validator
/// (spec.md §4.3) and whose `sender` has been confirmed to match
/// `source_identity` by the acceptor's reader task (spec.md I4).
pub async fn route(
    envelope: Envelope,
    source_identity: &Identity,
    registry: &Registry,
    authenticator: &dyn Authenticator,
) -> RouteOutcome {
    match envelope.envelope_type {
        EnvelopeType::Heartbeat => {
            registry.touch_traffic(source_identity).await;
            RouteOutcome::Ignored
        }
        EnvelopeType::Error => {
            warn!(sender = %source_identity.id, "client reported an error envelope");
            registry.touch_traffic(source_identity).await;
            RouteOutcome::Ignored
        }
        EnvelopeType::Message => route_message(envelope, source_identity, registry, authenticator).await,
    }
}

async fn route_message(
    envelope: Envelope,
    source_identity: &Identity,
    registry: &Registry,
    authenticator: &dyn Authenticator,
) -> RouteOutcome {
    registry.touch_traffic(source_identity).await;

    if &envelope.sender != source_identity {
        return send_error(
            registry,
            source_identity,
            ErrorCode::ValidationError,
            "sender does not match the connection's registered identity",
            None,
        )
        .await;
    }

    if envelope.sender == envelope.recipient {
        let original_message_id = correlation_id_of(&envelope);
        return send_error(
            registry,
            source_identity,
            ErrorCode::ValidationError,
            "self-addressed envelopes are rejected",
            original_message_id,
        )
        .await;
    }

    if !authenticator.authorize(source_identity, &envelope).await {
        let original_message_id = correlation_id_of(&envelope);
        return send_error(
            registry,
            source_identity,
            ErrorCode::PermissionDenied,
            "sender is not permitted to address this recipient",
            original_message_id,
        )
        .await;
    }

    if envelope.recipient.is_wildcard() {
        return deliver_broadcast(envelope, source_identity, registry).await;
    }

    deliver_unicast(envelope, source_identity, registry).await
}

async fn deliver_unicast(
    envelope: Envelope,
    source_identity: &Identity,
    registry: &Registry,
) -> RouteOutcome {
    let Some(target) = registry.lookup(envelope.recipient.kind, &envelope.recipient.id).await else {
        let original_message_id = correlation_id_of(&envelope);
        return send_error(
            registry,
            source_identity,
            ErrorCode::RoutingNoRecipient,
            &format!("no open session for {:?}", envelope.recipient),
            original_message_id,
        )
        .await;
    };
    let recipient = target.identity.clone();
    target.send_queue.enqueue(envelope);
    RouteOutcome::Delivered(vec![recipient])
}

async fn deliver_broadcast(
    envelope: Envelope,
    source_identity: &Identity,
    registry: &Registry,
) -> RouteOutcome {
    let targets = if envelope.recipient.kind == IdentityKind::Agent
        && source_identity.kind == IdentityKind::Environment
    {
        // Scoped broadcast: an environment's `(agent, "*")` reaches only the
        // agents currently attached to that environment (spec.md §4.4).
        registry.agents_in_environment(&source_identity.id).await
    } else {
        registry.all_of_kind(envelope.recipient.kind, source_identity).await
    };

    info!(
        recipient_kind = ?envelope.recipient.kind,
        count = targets.len(),
        "broadcasting message"
    );

    let mut delivered = Vec::with_capacity(targets.len());
    for target in targets {
        target.send_queue.enqueue(envelope.clone());
        delivered.push(target.identity);
    }
    RouteOutcome::Delivered(delivered)
}

async fn send_error(
    registry: &Registry,
    recipient: &Identity,
    code: ErrorCode,
    message: &str,
    original_message_id: Option<String>,
) -> RouteOutcome {
    let mut payload = ErrorEnvelopePayload::new(code, message);
    if let Some(id) = original_message_id {
        payload = payload.with_details(serde_json::json!({ "original_message_id": id }));
    }
    let error_envelope = Envelope::error(recipient.clone(), payload);
    if let Some(target) = registry.lookup(recipient.kind, &recipient.id).await {
        target.send_queue.enqueue(error_envelope);
    }
    RouteOutcome::ErrorSent(recipient.clone(), code)
}
