//! Connection acceptor (spec.md §4.2).
//!
//! Generalizes the teacher's `ws_forwarder_handler`/`handle_forwarder_socket`
//! pair (one Axum handler per participant kind, doing auth → hello →
//! register → read/write loop → deregister) into a single path-matching
//! handler covering all three URL shapes.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use star_metrics::MetricsSink;
use tracing::{info, warn};

use star_protocol::{
    Envelope, ErrorCode, ErrorEnvelopePayload, HeartbeatPayload, Identity, IdentityKind,
};

use crate::auth::{Authenticator, ConnectPath};
use crate::config::HubConfig;
use crate::error::HubError;
use crate::registry::{Registry, SendQueue, SessionTasks};
use crate::router;

/// Shared state every acceptor handler needs; mirrors the teacher's
/// `AppState` being threaded through every Axum handler via `State`.
#[derive(Clone)]
pub struct HubContext {
    pub registry: Arc<Registry>,
    pub config: Arc<HubConfig>,
    pub authenticator: Arc<dyn Authenticator>,
    pub metrics: Arc<dyn star_metrics::MetricsSink>,
}

pub async fn agent_handler(
    ws: WebSocketUpgrade,
    Path((env_id, agent_id)): Path<(String, String)>,
    State(ctx): State<HubContext>,
    headers: HeaderMap,
) -> Response {
    accept(ws, ctx, headers, IdentityKind::Agent, agent_id, Some(env_id)).await
}

pub async fn environment_handler(
    ws: WebSocketUpgrade,
    Path(env_id): Path<String>,
    State(ctx): State<HubContext>,
    headers: HeaderMap,
) -> Response {
    accept(ws, ctx, headers, IdentityKind::Environment, env_id, None).await
}

pub async fn human_handler(
    ws: WebSocketUpgrade,
    Path(human_id): Path<String>,
    State(ctx): State<HubContext>,
    headers: HeaderMap,
) -> Response {
    accept(ws, ctx, headers, IdentityKind::Human, human_id, None).await
}

async fn accept(
    ws: WebSocketUpgrade,
    ctx: HubContext,
    headers: HeaderMap,
    kind: IdentityKind,
    raw_id: String,
    env_id: Option<String>,
) -> Response {
    let identity = match Identity::new(kind, raw_id) {
        Ok(identity) => identity,
        Err(e) => return HubError::MalformedPath(e.to_string()).into_response(),
    };

    let open = ctx.registry.len().await;
    if open >= ctx.config.max_connections {
        return HubError::AtCapacity(open).into_response();
    }

    if ctx.config.enable_auth {
        let path = ConnectPath { identity: identity.clone(), env_id: env_id.clone() };
        if !ctx.authenticator.authenticate(&path, &headers).await {
            return HubError::Unauthenticated.into_response();
        }
    }

    ws.on_upgrade(move |socket| run_session(socket, ctx, identity, env_id))
}

async fn run_session(socket: WebSocket, ctx: HubContext, identity: Identity, env_id: Option<String>) {
    let (mut sink, mut stream) = socket.split();
    let send_queue = Arc::new(SendQueue::new(ctx.config.send_queue_depth));

    // Initial heartbeat (spec.md §4.2 point 4), sent before the session is
    // even registered so a slow registration never delays first liveness
    // evidence to the new peer.
    let greeting = Envelope::heartbeat(identity.clone(), HeartbeatPayload::running());
    if let Ok(text) = star_protocol::encode(&greeting) {
        if sink.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    let writer_queue = send_queue.clone();
    let writer = tokio::spawn(async move {
        loop {
            let envelope = writer_queue.dequeue().await;
            let Ok(text) = star_protocol::encode(&envelope) else { continue };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let reader_registry = ctx.registry.clone();
    let reader_authenticator = ctx.authenticator.clone();
    let reader_identity = identity.clone();
    let max_frame_bytes = ctx.config.max_frame_bytes;
    let enable_validation = ctx.config.enable_validation;
    let reply_queue = send_queue.clone();
    let reader = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    handle_frame(
                        &text,
                        max_frame_bytes,
                        enable_validation,
                        &reader_identity,
                        &reader_registry,
                        reader_authenticator.as_ref(),
                        &reply_queue,
                    )
                    .await;
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(Message::Binary(_)) => {
                    warn!(id = %reader_identity.id, "binary frames are not supported");
                }
                Err(e) => {
                    warn!(id = %reader_identity.id, error = %e, "websocket read error");
                    break;
                }
            }
        }
        // The reader owns the exit path: once the transport is gone (close
        // frame, EOF, or error) it is responsible for removing its own
        // bookkeeping. An eviction instead aborts both tasks directly
        // (`registry::evict`), so this never double-removes a replacement.
        reader_registry.deregister(&reader_identity).await;
        info!(kind = ?reader_identity.kind, id = %reader_identity.id, "session deregistered");
    });

    let outcome = ctx
        .registry
        .register(identity.clone(), env_id, send_queue, SessionTasks { reader, writer })
        .await;
    info!(kind = ?identity.kind, id = %identity.id, replaced = ?outcome, "session accepted");
    ctx.metrics
        .counter_inc("star_hub_sessions_accepted", &[("kind", kind_label(identity.kind))]);
}

#[allow(clippy::too_many_arguments)]
async fn handle_frame(
    text: &str,
    max_frame_bytes: usize,
    enable_validation: bool,
    source_identity: &Identity,
    registry: &Registry,
    authenticator: &dyn Authenticator,
    reply_queue: &SendQueue,
) {
    let envelope = match star_protocol::decode(text, max_frame_bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            let payload = ErrorEnvelopePayload::new(e.code(), e.to_string());
            reply_queue.enqueue(Envelope::error(source_identity.clone(), payload));
            return;
        }
    };

    if enable_validation {
        if let Err(e) = star_protocol::validate(&envelope) {
            let payload = ErrorEnvelopePayload::new(e.code(), e.to_string());
            reply_queue.enqueue(Envelope::error(source_identity.clone(), payload));
            return;
        }
    }

    if &envelope.sender != source_identity {
        let payload = ErrorEnvelopePayload::new(
            ErrorCode::ValidationError,
            "sender does not match the connection's registered identity",
        );
        reply_queue.enqueue(Envelope::error(source_identity.clone(), payload));
        return;
    }

    router::route(envelope, source_identity, registry, authenticator).await;
}

fn kind_label(kind: IdentityKind) -> &'static str {
    match kind {
        IdentityKind::Hub => "hub",
        IdentityKind::Agent => "agent",
        IdentityKind::Environment => "environment",
        IdentityKind::Human => "human",
    }
}

/// Convenience constant mirroring the teacher's per-session interval, no
/// longer used by the acceptor itself now that heartbeats are Hub-wide
/// (spec.md §4.5) but kept for the grace-period default referenced by
/// `star-client::core`'s `close()`.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);
