//! `StarClient`: the reconnecting WebSocket client shared by every role
//! facade (spec.md §4.6).
//!
//! One supervisor task owns the transport for the whole lifetime of a
//! [`ClientHandle`]: it connects, runs a combined read/write loop against
//! the current socket, and on disconnect backs off and reconnects with a
//! fresh socket. Handler registrations and the correlation table live on
//! the shared, reconnect-independent state, so a reconnect never loses a
//! caller's `on_event`/`on_action` wiring — generalizing the teacher's
//! `UplinkSession::connect`/`send_batch` (`services/forwarder/src/uplink.rs`)
//! and `run_session_loop` (`services/receiver/src/session.rs`) into one
//! reusable core instead of two bespoke structs.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, trace, warn};

use star_metrics::MetricsSink;
use star_protocol::{codec, Envelope, EnvelopeType, Identity, Payload, TypedPayload};

use crate::backoff::{compute_delay, BackoffConfig};
use crate::error::ClientError;

type EnvelopeHandler = Box<dyn Fn(Envelope, Payload) + Send + Sync>;

/// Handler registrations for one `StarClient`. Built with the builder
/// methods below and handed to [`StarClient::connect`]; stored for the
/// life of the [`ClientHandle`] so they survive every reconnect.
#[derive(Default)]
pub struct HandlerSet {
    on_action: Option<EnvelopeHandler>,
    on_outcome: Option<EnvelopeHandler>,
    on_event: Option<EnvelopeHandler>,
    on_stream: Option<EnvelopeHandler>,
    named_actions: HashMap<String, EnvelopeHandler>,
    named_events: HashMap<String, EnvelopeHandler>,
}

impl HandlerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_action(mut self, f: impl Fn(Envelope, Payload) + Send + Sync + 'static) -> Self {
        self.on_action = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_outcome(mut self, f: impl Fn(Envelope, Payload) + Send + Sync + 'static) -> Self {
        self.on_outcome = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_event(mut self, f: impl Fn(Envelope, Payload) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_stream(mut self, f: impl Fn(Envelope, Payload) + Send + Sync + 'static) -> Self {
        self.on_stream = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_named_action(
        mut self,
        action: impl Into<String>,
        f: impl Fn(Envelope, Payload) + Send + Sync + 'static,
    ) -> Self {
        self.named_actions.insert(action.into(), Box::new(f));
        self
    }

    #[must_use]
    pub fn on_named_event(
        mut self,
        event: impl Into<String>,
        f: impl Fn(Envelope, Payload) + Send + Sync + 'static,
    ) -> Self {
        self.named_events.insert(event.into(), Box::new(f));
        self
    }
}

/// Outcome of a correlated `send_and_wait` call.
type CorrelationResult = Result<Payload, ClientError>;

struct Shared {
    identity: Identity,
    url: String,
    auth_header: Option<HeaderValue>,
    handlers: HandlerSet,
    max_frame_bytes: usize,
    outbound_tx: mpsc::UnboundedSender<Envelope>,
    correlations: Mutex<HashMap<String, oneshot::Sender<CorrelationResult>>>,
    closed: AtomicBool,
    closed_notify: Notify,
    metrics: std::sync::Arc<dyn MetricsSink>,
}

/// A live, self-reconnecting connection to the Hub. Dropping the handle
/// (or calling [`ClientHandle::close`]) tears down the transport and
/// cancels the supervisor task — the "scoped resource lifetime" spec.md §9
/// calls for.
pub struct ClientHandle {
    shared: std::sync::Arc<Shared>,
    supervisor: Option<JoinHandle<()>>,
}

impl ClientHandle {
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.shared.identity
    }

    /// Enqueue an envelope for the writer side of the current (or next,
    /// if mid-reconnect) connection. Never touches the socket directly,
    /// matching the teacher's pattern of a single task owning the
    /// `SinkExt::send` call.
    pub fn send(&self, envelope: Envelope) -> Result<(), ClientError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        self.shared
            .outbound_tx
            .send(envelope)
            .map_err(|_| ClientError::ConnectionLost)
    }

    /// Send an envelope whose `payload.id` correlates to an eventual
    /// `outcome`, and wait up to `timeout` for it. Registers a `oneshot`
    /// keyed by that id in the correlation table, grounded on the
    /// teacher's `ForwarderCommand::ConfigGet { reply: oneshot::Sender<_> }`
    /// pattern generalized from one fixed command type to an open,
    /// id-keyed table.
    pub async fn send_and_wait(
        &self,
        envelope: Envelope,
        timeout: Duration,
    ) -> Result<Payload, ClientError> {
        let id = match envelope.typed_payload() {
            Ok(TypedPayload::Message(payload)) => payload.correlation_id().map(str::to_owned),
            _ => None,
        }
        .ok_or_else(|| {
            ClientError::Protocol(star_protocol::ProtocolError::Validation(
                "send_and_wait requires a message payload with a correlation id".to_owned(),
            ))
        })?;

        let (tx, rx) = oneshot::channel();
        self.shared.correlations.lock().unwrap().insert(id.clone(), tx);
        if let Err(e) = self.send(envelope) {
            self.shared.correlations.lock().unwrap().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => {
                self.shared.correlations.lock().unwrap().remove(&id);
                Err(ClientError::Timeout)
            }
        }
    }

    /// Idempotent (P5): a second call is a no-op.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.closed_notify.notify_waiters();
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.close();
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
    }
}

/// Entry point for the client core. A unit type so the constructor reads
/// as `StarClient::connect(...)`, matching the other facades'
/// `Thing::connect(...)` convention.
pub struct StarClient;

impl StarClient {
    /// Connect to `url`, registering `handlers` for the life of the
    /// returned handle. Counters/gauges go nowhere (spec.md §4.7's
    /// no-op default); use [`Self::connect_with_metrics`] to route them
    /// somewhere real.
    pub async fn connect(
        url: impl Into<String>,
        identity: Identity,
        handlers: HandlerSet,
    ) -> Result<ClientHandle, ClientError> {
        Self::connect_with(
            url,
            identity,
            handlers,
            None,
            codec::DEFAULT_MAX_FRAME_BYTES,
            std::sync::Arc::new(star_metrics::NoopMetricsSink),
        )
        .await
    }

    /// Same as [`Self::connect`] but with a bearer token injected as an
    /// `Authorization` header on the upgrade request, for Hubs running
    /// with `enable_auth = true` — grounded on the teacher's
    /// `build_ws_request` (`services/forwarder/src/uplink.rs`).
    pub async fn connect_with_token(
        url: impl Into<String>,
        identity: Identity,
        handlers: HandlerSet,
        token: &str,
    ) -> Result<ClientHandle, ClientError> {
        let header = format!("Bearer {token}")
            .parse::<HeaderValue>()
            .map_err(|_| ClientError::Protocol(star_protocol::ProtocolError::Validation(
                "token is not a valid header value".to_owned(),
            )))?;
        Self::connect_with(
            url,
            identity,
            handlers,
            Some(header),
            codec::DEFAULT_MAX_FRAME_BYTES,
            std::sync::Arc::new(star_metrics::NoopMetricsSink),
        )
        .await
    }

    /// Same as [`Self::connect`] but reporting connect/reconnect counters
    /// through `metrics` (spec.md §4.7), for callers running their own
    /// collector instead of the no-op default.
    pub async fn connect_with_metrics(
        url: impl Into<String>,
        identity: Identity,
        handlers: HandlerSet,
        metrics: std::sync::Arc<dyn MetricsSink>,
    ) -> Result<ClientHandle, ClientError> {
        Self::connect_with(url, identity, handlers, None, codec::DEFAULT_MAX_FRAME_BYTES, metrics).await
    }

    async fn connect_with(
        url: impl Into<String>,
        identity: Identity,
        handlers: HandlerSet,
        auth_header: Option<HeaderValue>,
        max_frame_bytes: usize,
        metrics: std::sync::Arc<dyn MetricsSink>,
    ) -> Result<ClientHandle, ClientError> {
        let url = url.into();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let shared = std::sync::Arc::new(Shared {
            identity,
            url: url.clone(),
            auth_header,
            handlers,
            max_frame_bytes,
            outbound_tx,
            correlations: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            metrics,
        });

        // Dial once up front so `connect` itself reports an immediate
        // unreachable-Hub failure rather than silently starting to retry,
        // and hand the live socket to the supervisor so it doesn't have to
        // redial before the caller's first `send` goes out.
        let initial_stream = connect_once(&shared).await?;

        let supervisor_shared = shared.clone();
        let supervisor = tokio::spawn(async move {
            run(supervisor_shared, outbound_rx, initial_stream).await;
        });

        Ok(ClientHandle { shared, supervisor: Some(supervisor) })
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect_once(shared: &Shared) -> Result<WsStream, ClientError> {
    let mut request = shared
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| ClientError::Connect { url: shared.url.clone(), source: Box::new(e) })?;
    if let Some(header) = &shared.auth_header {
        request.headers_mut().insert("Authorization", header.clone());
    }
    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| ClientError::Connect { url: shared.url.clone(), source: Box::new(e) })?;
    Ok(stream)
}

/// The supervisor loop: connect, run the combined read/write loop until
/// the socket drops or the handle is closed, then back off and retry.
async fn run(
    shared: std::sync::Arc<Shared>,
    mut outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    initial_stream: WsStream,
) {
    let backoff = BackoffConfig::default();
    let mut attempt: u32 = 0;
    let mut next_stream = Some(initial_stream);

    loop {
        if shared.closed.load(Ordering::SeqCst) {
            return;
        }

        let stream = match next_stream.take() {
            Some(stream) => stream,
            None => match connect_once(&shared).await {
                Ok(stream) => {
                    attempt = 0;
                    stream
                }
                Err(e) => {
                    warn!(url = %shared.url, error = %e, attempt, "reconnect attempt failed");
                    shared.metrics.counter_inc("star_client_reconnect_failures_total", &[]);
                    attempt = attempt.saturating_add(1);
                    let delay = compute_delay(&backoff, attempt);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => continue,
                        () = shared.closed_notify.notified() => return,
                    }
                }
            },
        };

        info!(url = %shared.url, identity = ?shared.identity, "connected");
        shared.metrics.counter_inc("star_client_connects_total", &[]);
        let (mut sink, mut stream) = stream.split();

        loop {
            tokio::select! {
                () = shared.closed_notify.notified() => {
                    drain_before_close(&mut sink, &mut outbound_rx).await;
                    return;
                }
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(envelope) => {
                            match codec::encode(&envelope) {
                                Ok(frame) => {
                                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                                        warn!(error = %e, "send failed, reconnecting");
                                        break;
                                    }
                                }
                                Err(e) => warn!(error = %e, "dropping envelope that failed to encode"),
                            }
                        }
                        None => return,
                    }
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => dispatch(&shared, &text),
                        Some(Ok(Message::Ping(data))) => {
                            let _ = sink.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("peer closed connection");
                            break;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!(error = %e, "read error, reconnecting");
                            break;
                        }
                    }
                }
            }
        }

        fail_outstanding_correlations(&shared);

        if shared.closed.load(Ordering::SeqCst) {
            return;
        }
        attempt = attempt.saturating_add(1);
        let delay = compute_delay(&backoff, attempt);
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = shared.closed_notify.notified() => return,
        }
    }
}

/// Pull the `OutcomeBody` out of a `send_and_wait` result, used by every
/// role facade's action methods. An outcome carrying `status: error` is
/// surfaced as `Err` rather than handed back as a successful result the
/// caller has to re-check.
pub(crate) fn expect_outcome(payload: Payload) -> Result<star_protocol::OutcomeBody, ClientError> {
    match payload {
        Payload::Outcome { outcome, .. } if outcome.status == star_protocol::OutcomeStatus::Error => {
            Err(ClientError::OutcomeError(serde_json::Value::Object(outcome.extra)))
        }
        Payload::Outcome { outcome, .. } => Ok(outcome),
        other => Err(ClientError::Protocol(star_protocol::ProtocolError::Validation(format!(
            "expected an outcome payload, got {}",
            other.kind()
        )))),
    }
}

/// Bounded grace period `close()` gives already-queued outbound envelopes
/// to reach the socket before the Close frame goes out. Mirrors the
/// teacher's own `star_hub::acceptor::SHUTDOWN_GRACE_PERIOD`, duplicated
/// here rather than imported so the client crate doesn't pull in a
/// dependency on the Hub crate for one constant; used as the outer time
/// box around draining, not a wait for messages that may never arrive.
const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(5);

async fn drain_before_close(
    sink: &mut futures_util::stream::SplitSink<WsStream, Message>,
    outbound_rx: &mut mpsc::UnboundedReceiver<Envelope>,
) {
    let deadline = tokio::time::Instant::now() + CLOSE_GRACE_PERIOD;
    while tokio::time::Instant::now() < deadline {
        let Ok(envelope) = outbound_rx.try_recv() else { break };
        if let Ok(frame) = codec::encode(&envelope) {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

fn fail_outstanding_correlations(shared: &Shared) {
    let mut pending = shared.correlations.lock().unwrap();
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(ClientError::ConnectionLost));
    }
}

/// Resolve the `send_and_wait` waiting on the action/event this `error`
/// envelope refers to, so a `PERMISSION_DENIED`/`VALIDATION_ERROR` response
/// from the Hub (router.rs's `send_error`, keyed off the original payload's
/// correlation id in `details.original_message_id`) fails the caller
/// immediately instead of only after the full `send_and_wait` timeout
/// (spec.md §7 "a business caller of `send_and_wait` observes either a
/// success outcome or one of {TIMEOUT, CONNECTION_LOST, PERMISSION_DENIED,
/// VALIDATION_ERROR}").
fn fail_correlation_for_error(shared: &Shared, err: &star_protocol::ErrorEnvelopePayload) {
    let Some(original_id) = err
        .details
        .as_ref()
        .and_then(|d| d.get("original_message_id"))
        .and_then(|v| v.as_str())
    else {
        return;
    };

    let pending = shared.correlations.lock().unwrap().remove(original_id);
    if let Some(tx) = pending {
        let _ = tx.send(Err(client_error_for_code(err)));
    }
}

/// Map a wire error code to the typed `ClientError` a `send_and_wait`
/// caller observes (spec.md §7).
fn client_error_for_code(err: &star_protocol::ErrorEnvelopePayload) -> ClientError {
    use star_protocol::{ErrorCode, ProtocolError};
    match err.error_code {
        ErrorCode::PermissionDenied => ClientError::Protocol(ProtocolError::PermissionDenied(err.message.clone())),
        ErrorCode::ValidationError | ErrorCode::InvalidClientType => {
            ClientError::Protocol(ProtocolError::Validation(err.message.clone()))
        }
        ErrorCode::RoutingNoRecipient => ClientError::Protocol(ProtocolError::NoRecipient(err.message.clone())),
        ErrorCode::Timeout => ClientError::Timeout,
        ErrorCode::ConnectionLost | ErrorCode::ConnectionFailed | ErrorCode::ReconnectionFailed => {
            ClientError::ConnectionLost
        }
        ErrorCode::IdleTimeout | ErrorCode::Replaced | ErrorCode::InternalError => {
            ClientError::Protocol(ProtocolError::Validation(err.message.clone()))
        }
    }
}

/// Decode and route one inbound text frame. Logs and continues on
/// malformed or unrecognized frames rather than terminating the loop,
/// mirroring the teacher's `session.rs` dispatch.
fn dispatch(shared: &Shared, text: &str) {
    let envelope = match codec::decode(text, shared.max_frame_bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            return;
        }
    };

    match envelope.envelope_type {
        EnvelopeType::Heartbeat => trace!("heartbeat"),
        EnvelopeType::Error => {
            if let Ok(TypedPayload::Error(err)) = envelope.typed_payload() {
                warn!(code = %err.error_code, message = %err.message, "hub reported error");
                fail_correlation_for_error(shared, &err);
            }
        }
        EnvelopeType::Message => match envelope.typed_payload() {
            Ok(TypedPayload::Message(payload)) => dispatch_payload(shared, envelope, payload),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "dropping message with malformed payload"),
        },
    }
}

fn dispatch_payload(shared: &Shared, envelope: Envelope, payload: Payload) {
    match &payload {
        Payload::Action { action, .. } => {
            let named = shared.handlers.named_actions.get(action);
            let generic = shared.handlers.on_action.as_ref();
            call_handlers(&[named, generic], envelope, payload);
        }
        Payload::Outcome { id, .. } => {
            let pending = shared.correlations.lock().unwrap().remove(id);
            match pending {
                Some(tx) => {
                    let _ = tx.send(Ok(payload));
                }
                None => call_handler(shared.handlers.on_outcome.as_ref(), envelope, payload),
            }
        }
        Payload::Event { event, .. } => {
            let named = shared.handlers.named_events.get(event);
            let generic = shared.handlers.on_event.as_ref();
            call_handlers(&[named, generic], envelope, payload);
        }
        Payload::Stream { .. } => {
            call_handler(shared.handlers.on_stream.as_ref(), envelope, payload);
        }
    }
}

/// Run every handler registered for this message — a named-action/event
/// handler and the generic `on_action`/`on_event` handler are independent
/// registrations, not an either/or fallback, so both see the message when
/// both are present.
fn call_handlers(handlers: &[Option<&EnvelopeHandler>], envelope: Envelope, payload: Payload) {
    let present: Vec<&EnvelopeHandler> = handlers.iter().filter_map(|h| *h).collect();
    let Some((last, rest)) = present.split_last() else { return };
    for handler in rest {
        call_handler(Some(*handler), envelope.clone(), payload.clone());
    }
    call_handler(Some(*last), envelope, payload);
}

/// Run a handler behind `catch_unwind` so a panicking callback can't take
/// down the read loop — the loop just logs and moves on to the next frame.
fn call_handler(handler: Option<&EnvelopeHandler>, envelope: Envelope, payload: Payload) {
    let Some(handler) = handler else { return };
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(envelope, payload)));
    if outcome.is_err() {
        warn!("message handler panicked; continuing read loop");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use star_protocol::IdentityKind;

    use super::*;

    fn test_envelope(action: &str) -> Envelope {
        let agent = Identity::new(IdentityKind::Agent, "agent-1").unwrap();
        let environment = Identity::new(IdentityKind::Environment, "env-1").unwrap();
        Envelope::message(
            agent,
            environment,
            Payload::Action {
                id: "corr-1".to_owned(),
                action: action.to_owned(),
                parameters: serde_json::json!({}),
            },
        )
    }

    #[test]
    fn both_named_and_generic_action_handlers_fire() {
        static NAMED_CALLS: AtomicUsize = AtomicUsize::new(0);
        static GENERIC_CALLS: AtomicUsize = AtomicUsize::new(0);

        let handlers = HandlerSet::new()
            .on_action(|_, _| {
                GENERIC_CALLS.fetch_add(1, Ordering::SeqCst);
            })
            .on_named_action("move", |_, _| {
                NAMED_CALLS.fetch_add(1, Ordering::SeqCst);
            });

        let envelope = test_envelope("move");
        let payload = match envelope.typed_payload().unwrap() {
            TypedPayload::Message(payload) => payload,
            _ => unreachable!(),
        };
        dispatch_payload(&handlers_shared(handlers), envelope, payload);

        assert_eq!(NAMED_CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(GENERIC_CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn only_generic_handler_fires_when_no_name_matches() {
        static GENERIC_CALLS: AtomicUsize = AtomicUsize::new(0);

        let handlers = HandlerSet::new()
            .on_action(|_, _| {
                GENERIC_CALLS.fetch_add(1, Ordering::SeqCst);
            })
            .on_named_action("attack", |_, _| panic!("wrong action name matched"));

        let envelope = test_envelope("move");
        let payload = match envelope.typed_payload().unwrap() {
            TypedPayload::Message(payload) => payload,
            _ => unreachable!(),
        };
        dispatch_payload(&handlers_shared(handlers), envelope, payload);

        assert_eq!(GENERIC_CALLS.load(Ordering::SeqCst), 1);
    }

    /// Build a throwaway [`Shared`] around a [`HandlerSet`] for `dispatch_payload`
    /// tests — the rest of `Shared` is unreachable from those code paths.
    fn handlers_shared(handlers: HandlerSet) -> Shared {
        let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
        Shared {
            identity: Identity::new(IdentityKind::Environment, "env-1").unwrap(),
            url: "ws://example.invalid".to_owned(),
            auth_header: None,
            handlers,
            max_frame_bytes: codec::DEFAULT_MAX_FRAME_BYTES,
            outbound_tx,
            correlations: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            metrics: std::sync::Arc::new(star_metrics::NoopMetricsSink),
        }
    }
}
