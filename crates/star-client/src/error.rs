//! Client-facing error type (spec.md §9).

use thiserror::Error;

use star_protocol::ProtocolError;

/// Errors a `StarClient` (or role facade) can surface to its caller.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("timed out waiting for a response")]
    Timeout,

    #[error("connection lost before a response arrived")]
    ConnectionLost,

    #[error("client is closed")]
    Closed,

    #[error("server reported outcome status=error: {0:?}")]
    OutcomeError(serde_json::Value),
}
